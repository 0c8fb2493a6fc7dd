//! Frame-pipeline behavior against the mock backend: stage ordering and
//! synchronization chains, stale-swapchain rebuild, and deferred
//! destruction timing.

mod common;

use common::{MockBackend, SharedStats};
use serial_test::serial;
use sumi::gpu::*;
use sumi::render::*;

const FRAMES: usize = 3;

fn make_system() -> (RenderSystem, SharedStats) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (backend, stats) = MockBackend::new(FRAMES);
    let device = RenderDevice::new(Box::new(backend));
    let config = RendererConfig {
        frames_in_flight: FRAMES as u32,
        ..Default::default()
    };
    let system = RenderSystem::new(device, config).expect("render system init");
    (system, stats)
}

fn run_one_frame(system: &mut RenderSystem) {
    system.start_frame().unwrap();
    system.pre_render_frame(&FrameUpdates::default()).unwrap();
    system.render_frame(&SubmittedFrame::default()).unwrap();
    // Presents are asynchronous; drain the queue so assertions see them.
    system.device().wait_idle().unwrap();
}

#[test]
#[serial]
fn a_frame_produces_three_chained_submissions_and_a_present() {
    let (mut system, stats) = make_system();
    run_one_frame(&mut system);

    let s = stats.lock().unwrap();
    assert_eq!(s.executions.len(), 3, "pre-render, main, post-process");
    assert_eq!(s.presents.len(), 1);

    let pre = &s.executions[0];
    let main = &s.executions[1];
    let post = &s.executions[2];

    // Pre-render signals its stage semaphore and waits on nothing.
    assert!(pre.wait_sems.is_empty());
    assert_eq!(pre.signal_sems.len(), 1);

    // Main waits on [framebuffer-ready, pre-render-finished].
    assert_eq!(main.wait_sems.len(), 2);
    assert!(main.wait_sems.contains(&pre.signal_sems[0]));
    assert_eq!(main.signal_sems.len(), 1);

    // Post waits on main and signals both its semaphore and the slot fence.
    assert_eq!(post.wait_sems, main.signal_sems);
    assert_eq!(post.signal_sems.len(), 1);
    assert!(post.fence.is_some(), "post-process signals the reuse fence");
    assert!(pre.fence.is_none());
    assert!(main.fence.is_none());

    drop(s);
    system.shutdown().unwrap();
}

#[test]
#[serial]
fn main_pass_records_prepass_then_color_subpass() {
    let (mut system, stats) = make_system();
    run_one_frame(&mut system);

    let s = stats.lock().unwrap();
    let main_ops = &s.executions[1].ops;
    let begins = main_ops
        .iter()
        .filter(|op| matches!(op, RenderOp::BeginRenderPass(_)))
        .count();
    let subpass_splits = main_ops
        .iter()
        .filter(|op| matches!(op, RenderOp::NextSubpass))
        .count();
    assert_eq!(begins, 1, "one geometry pass");
    assert_eq!(subpass_splits, 1, "prepass then main color subpass");

    drop(s);
    system.shutdown().unwrap();
}

#[test]
#[serial]
fn stale_acquire_rebuilds_exactly_once_then_succeeds() {
    let (mut system, stats) = make_system();

    // Prime: run one full frame so a fence is in flight.
    run_one_frame(&mut system);
    let waits_before = stats.lock().unwrap().fence_waits;

    // Script exactly one stale acquisition.
    stats.lock().unwrap().acquire_script.push_back(true);
    run_one_frame(&mut system);

    let s = stats.lock().unwrap();
    assert_eq!(s.rebuilds, 1, "rebuilt swapchain resources exactly once");
    assert!(
        s.fence_waits > waits_before,
        "in-flight fences were drained before the rebuild"
    );
    assert_eq!(s.presents.len(), 2, "frame still presented after retry");

    drop(s);
    system.shutdown().unwrap();
}

#[test]
#[serial]
fn queued_config_applies_at_start_of_frame_not_immediately() {
    let (mut system, stats) = make_system();
    run_one_frame(&mut system);

    let mut cfg = RendererConfig::default();
    cfg.width = 1920;
    cfg.height = 1080;
    system.queue_config(cfg);
    assert_eq!(stats.lock().unwrap().rebuilds, 0, "not applied mid-frame");

    run_one_frame(&mut system);
    assert_eq!(stats.lock().unwrap().rebuilds, 1, "applied at start_frame");

    system.shutdown().unwrap();
}

#[test]
#[serial]
fn console_resize_round_trips_through_queued_config() {
    let (mut system, stats) = make_system();
    run_one_frame(&mut system);

    system.exec_console("resize 800 600").unwrap();
    assert_eq!(stats.lock().unwrap().rebuilds, 0);
    run_one_frame(&mut system);
    assert_eq!(stats.lock().unwrap().rebuilds, 1);

    assert!(system.exec_console("resize 800").is_err());
    assert!(system.exec_console("present_mode mailbox").is_ok());

    system.shutdown().unwrap();
}

#[test]
#[serial]
fn deferred_destroy_waits_for_the_frame_in_flight_count() {
    let (mut system, stats) = make_system();

    let destroyed = || stats.lock().unwrap().destroyed_bind_groups;

    let sprite = system
        .create_sprite_instance(&SpriteInstanceInfo {
            debug_name: "test sprite".into(),
            material: sumi::Handle::from_raw_parts(0, 0),
            vertex_buffer: BufferSlice::default(),
            vertex_count: 6,
            transparent: false,
        })
        .unwrap();

    // Destroy before any frame completes: nothing is freed synchronously.
    system.destroy_sprite_instance(sprite);
    assert_eq!(destroyed(), 0);
    assert!(system.sprite_resources_live(sprite));
    assert_eq!(system.pending_destroys(), 1);

    // The destroyer runs only after FRAMES start_frame calls have elapsed.
    for i in 1..FRAMES {
        run_one_frame(&mut system);
        assert_eq!(destroyed(), 0, "freed too early, after {i} frames");
    }
    run_one_frame(&mut system);
    // The GPU-side destroy runs through the render queue; a sync round-trip
    // flushes it.
    system.device().wait_idle().unwrap();
    assert_eq!(destroyed(), 1);
    assert!(!system.sprite_resources_live(sprite));
    assert_eq!(system.pending_destroys(), 0);

    system.shutdown().unwrap();
}

#[test]
#[serial]
fn destroy_resources_jobs_are_also_frame_counted() {
    let (mut system, stats) = make_system();
    let buffer = system
        .create_resources(|f| {
            f.make_buffer(&BufferInfo {
                debug_name: "doomed",
                byte_size: 128,
                ..Default::default()
            })
        })
        .unwrap();

    let destroyed = || stats.lock().unwrap().destroyed_buffers;
    system.destroy_resources(move |f| f.destroy_buffer(buffer));

    for _ in 0..FRAMES - 1 {
        run_one_frame(&mut system);
    }
    system.device().wait_idle().unwrap();
    assert_eq!(destroyed(), 0);

    run_one_frame(&mut system);
    system.device().wait_idle().unwrap();
    assert_eq!(destroyed(), 1);

    system.shutdown().unwrap();
}

#[test]
#[serial]
fn missing_instances_in_updates_are_skipped_not_fatal() {
    let (mut system, stats) = make_system();

    system.start_frame().unwrap();
    let updates = FrameUpdates {
        cameras: vec![(
            sumi::Handle::from_raw_parts(999 % 64, 7),
            glam::Mat4::IDENTITY,
            glam::Mat4::IDENTITY,
        )],
        ..Default::default()
    };
    system.pre_render_frame(&updates).unwrap();
    system.render_frame(&SubmittedFrame::default()).unwrap();
    system.device().wait_idle().unwrap();

    // The frame still ran to present.
    assert_eq!(stats.lock().unwrap().presents.len(), 1);
    // And no uniform write was recorded for the missing camera.
    let s = stats.lock().unwrap();
    assert!(s.executions[0].ops.is_empty());

    drop(s);
    system.shutdown().unwrap();
}

#[test]
#[serial]
fn instances_draw_after_pipelines_are_set() {
    let (mut system, stats) = make_system();

    // Minimal pipeline set + a mesh with one opaque submesh.
    let (pipeline, material, vertex, index) = system
        .create_resources(|f| {
            let rp = f.make_render_pass(&RenderPassInfo::default())?;
            let layout = f.make_bind_group_layout(&BindGroupLayoutInfo::default())?;
            let _ = (rp, layout);
            let pipeline = f.make_graphics_pipeline(&GraphicsPipelineInfo::default())?;
            let material_layout = f.make_bind_group_layout(&BindGroupLayoutInfo::default())?;
            let material = f.make_bind_group(&BindGroupInfo {
                layout: material_layout,
                ..Default::default()
            })?;
            let vertex = f.make_buffer(&BufferInfo {
                debug_name: "verts",
                byte_size: 1024,
                usage: BufferUsage::VERTEX,
                ..Default::default()
            })?;
            let index = f.make_buffer(&BufferInfo {
                debug_name: "indices",
                byte_size: 512,
                usage: BufferUsage::INDEX,
                ..Default::default()
            })?;
            Ok((pipeline, material, vertex, index))
        })
        .unwrap();

    system.set_scene_pipelines(ScenePipelines {
        prepass: Some(pipeline),
        opaque: Some(pipeline),
        ..Default::default()
    });

    let camera = system.create_camera(&CameraInfo::default()).unwrap();
    let mesh = system
        .create_static_mesh_instance(&StaticMeshInstanceInfo {
            debug_name: "cube".into(),
            mesh: MeshData {
                vertex_buffer: BufferSlice::whole(vertex, 1024),
                index_buffer: Some(BufferSlice::whole(index, 512)),
                index_type: IndexType::U32,
                submeshes: vec![SubmeshDesc {
                    material,
                    first_index: 0,
                    index_count: 36,
                    first_vertex: 0,
                    vertex_count: 24,
                    transparent: false,
                }],
            },
        })
        .unwrap();

    system.start_frame().unwrap();
    system.pre_render_frame(&FrameUpdates::default()).unwrap();
    system
        .render_frame(&SubmittedFrame {
            camera,
            static_meshes: vec![mesh],
            ..Default::default()
        })
        .unwrap();
    system.device().wait_idle().unwrap();

    let s = stats.lock().unwrap();
    let main_ops = &s.executions[1].ops;
    let indirect_draws = main_ops
        .iter()
        .filter(|op| matches!(op, RenderOp::DrawIndexedIndirect(_)))
        .count();
    // One prepass draw + one main-pass draw for the single submesh.
    assert_eq!(indirect_draws, 2);
    // The indirect records were uploaded before the pass began.
    assert!(matches!(main_ops[0], RenderOp::UpdateBuffer { .. }));

    drop(s);
    system.shutdown().unwrap();
}
