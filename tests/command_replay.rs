//! Conformance of the recorded-command contract: the same op sequence must
//! produce the same observable call stream on any sink, and resetting a list
//! must drop every effect of the previous recording.

mod common;

use common::RecordingSink;
use sumi::gpu::*;
use sumi::Handle;

fn sample_list() -> CommandList {
    let mut list = CommandList::new(
        Handle::from_raw_parts(1, 0),
        QueueType::Graphics,
        "sample",
    );
    list.begin_recording();
    list.update_buffer(
        BufferSlice {
            buffer: Handle::from_raw_parts(7, 0),
            offset: 64,
            size: 8,
        },
        &[1, 2, 3, 4, 5, 6, 7, 8],
    );
    list.begin_render_pass(BeginRenderPassOp {
        render_pass: Handle::from_raw_parts(2, 0),
        framebuffer: Handle::from_raw_parts(3, 0),
        render_area: Rect2D {
            x: 0,
            y: 0,
            w: 128,
            h: 128,
        },
        clear_values: vec![ClearValue::Color([0.1, 0.2, 0.3, 1.0])],
    });
    list.bind_pipeline(Handle::from_raw_parts(4, 0));
    list.set_viewport(Viewport {
        x: 0.0,
        y: 0.0,
        w: 128.0,
        h: 128.0,
        min_depth: 0.0,
        max_depth: 1.0,
    });
    list.set_scissor(Rect2D {
        x: 0,
        y: 0,
        w: 128,
        h: 128,
    });
    list.bind_bind_group(BindBindGroupOp {
        slot: 0,
        group: Handle::from_raw_parts(5, 0),
        dynamic_offset: None,
    });
    list.bind_vertex_buffer(BufferSlice {
        buffer: Handle::from_raw_parts(6, 0),
        offset: 0,
        size: 1024,
    });
    list.bind_index_buffer(
        BufferSlice {
            buffer: Handle::from_raw_parts(8, 0),
            offset: 0,
            size: 512,
        },
        IndexType::U32,
    );
    list.draw_indexed(DrawIndexedOp {
        index_count: 36,
        instance_count: 1,
        first_index: 0,
        vertex_offset: 0,
        first_instance: 0,
    });
    list.next_subpass();
    list.draw(DrawOp {
        vertex_count: 3,
        instance_count: 1,
        first_vertex: 0,
        first_instance: 0,
    });
    list.end_render_pass();
    list.image_barrier(ImageBarrierOp {
        view: Handle::from_raw_parts(9, 0),
        src: BarrierPoint::ColorWrite,
        dst: BarrierPoint::Present,
    });
    list.end_recording();
    list
}

#[test]
fn identical_sequences_replay_identically_on_two_sinks() {
    let list = sample_list();

    let mut first = RecordingSink::default();
    let mut second = RecordingSink::default();
    replay_ops(list.ops(), &mut first);
    replay_ops(list.ops(), &mut second);

    assert!(!first.calls.is_empty());
    assert_eq!(first.calls, second.calls);
}

#[test]
fn every_recorded_op_reaches_the_sink_in_order() {
    let list = sample_list();
    let mut sink = RecordingSink::default();
    replay_ops(list.ops(), &mut sink);

    // One observable call per recorded op, in recorded order.
    assert_eq!(sink.calls.len(), list.ops().len());
    assert!(sink.calls[0].starts_with("update_buffer"));
    assert!(sink.calls[1].starts_with("begin_render_pass"));
    assert_eq!(sink.calls[sink.calls.len() - 2], "end_render_pass");
    assert!(sink.calls.last().unwrap().starts_with("image_barrier"));

    let subpass_pos = sink.calls.iter().position(|c| c == "next_subpass").unwrap();
    let draw_pos = sink
        .calls
        .iter()
        .position(|c| c.starts_with("draw "))
        .unwrap();
    assert!(subpass_pos < draw_pos, "subpass split must precede its draws");
}

#[test]
fn reset_and_rerecord_replays_only_the_second_sequence() {
    let mut list = sample_list();

    let mut before = RecordingSink::default();
    replay_ops(list.ops(), &mut before);

    list.reset();
    list.begin_recording();
    list.copy_buffers(CopyBufferOp {
        src: BufferSlice {
            buffer: Handle::from_raw_parts(10, 0),
            offset: 0,
            size: 256,
        },
        dst: BufferSlice {
            buffer: Handle::from_raw_parts(11, 0),
            offset: 0,
            size: 256,
        },
    });
    list.end_recording();

    let mut after = RecordingSink::default();
    replay_ops(list.ops(), &mut after);

    assert_eq!(after.calls.len(), 1);
    assert!(after.calls[0].starts_with("copy_buffer"));
    // Nothing from the first recording leaks through.
    for call in &before.calls {
        assert!(!after.calls.contains(call));
    }
}

#[test]
fn snapshot_is_stable_across_later_rerecording() {
    let mut list = sample_list();
    let snapshot = list.snapshot();
    let len = snapshot.len();

    list.reset();
    list.begin_recording();
    list.end_recording();

    assert_eq!(snapshot.len(), len);
    assert_eq!(list.ops().len(), 0);
}
