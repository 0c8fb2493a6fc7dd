use std::sync::Arc;

use super::structs::SubresourceRange;
use super::types::*;
use crate::utils::Handle;

//===----------------------------------------------------------------------===//
// Recorded operations
//===----------------------------------------------------------------------===//

#[derive(Debug, Clone, PartialEq)]
pub struct BeginRenderPassOp {
    pub render_pass: Handle<RenderPass>,
    pub framebuffer: Handle<Framebuffer>,
    pub render_area: Rect2D,
    pub clear_values: Vec<ClearValue>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BindBindGroupOp {
    pub slot: u32,
    pub group: Handle<BindGroup>,
    pub dynamic_offset: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawOp {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawIndexedOp {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawIndirectOp {
    pub buffer: BufferSlice,
    pub draw_count: u32,
    pub stride: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CopyBufferOp {
    pub src: BufferSlice,
    pub dst: BufferSlice,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CopyBufferImageOp {
    pub src: BufferSlice,
    pub dst: Handle<Image>,
    pub range: SubresourceRange,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlitOp {
    pub src: Handle<ImageView>,
    pub dst: Handle<ImageView>,
    pub src_region: Rect2D,
    pub dst_region: Rect2D,
    pub filter: Filter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierPoint {
    Transfer,
    VertexRead,
    ColorWrite,
    DepthWrite,
    ShaderRead,
    Present,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageBarrierOp {
    pub view: Handle<ImageView>,
    pub src: BarrierPoint,
    pub dst: BarrierPoint,
}

/// The intermediate command representation. One backend encodes these into a
/// native command buffer once at submit; the other re-replays them against
/// the driver on every execute. Observable effect ordering is identical.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOp {
    BeginRenderPass(BeginRenderPassOp),
    NextSubpass,
    EndRenderPass,
    BindPipeline(Handle<GraphicsPipeline>),
    BindBindGroup(BindBindGroupOp),
    BindVertexBuffer(BufferSlice),
    BindIndexBuffer(BufferSlice, IndexType),
    SetViewport(Viewport),
    SetScissor(Rect2D),
    Draw(DrawOp),
    DrawIndexed(DrawIndexedOp),
    DrawIndirect(DrawIndirectOp),
    DrawIndexedIndirect(DrawIndirectOp),
    UpdateBuffer { dst: BufferSlice, data: Vec<u8> },
    CopyBuffer(CopyBufferOp),
    CopyBufferToImage(CopyBufferImageOp),
    Blit(BlitOp),
    ImageBarrier(ImageBarrierOp),
}

impl RenderOp {
    /// Whether the op is only legal inside a render pass.
    fn requires_pass(&self) -> bool {
        matches!(
            self,
            RenderOp::BindPipeline(_)
                | RenderOp::BindBindGroup(_)
                | RenderOp::BindVertexBuffer(_)
                | RenderOp::BindIndexBuffer(..)
                | RenderOp::SetViewport(_)
                | RenderOp::SetScissor(_)
                | RenderOp::Draw(_)
                | RenderOp::DrawIndexed(_)
                | RenderOp::DrawIndirect(_)
                | RenderOp::DrawIndexedIndirect(_)
        )
    }

    /// Whether the op is only legal outside a render pass.
    fn requires_no_pass(&self) -> bool {
        matches!(
            self,
            RenderOp::UpdateBuffer { .. }
                | RenderOp::CopyBuffer(_)
                | RenderOp::CopyBufferToImage(_)
                | RenderOp::Blit(_)
                | RenderOp::ImageBarrier(_)
        )
    }
}

//===----------------------------------------------------------------------===//
// Command list
//===----------------------------------------------------------------------===//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordState {
    Initial,
    Recording,
    Executable,
}

/// Replayable command sequence bounded by `begin_recording`/`end_recording`.
///
/// `reset` clears recorded content but keeps the backend identity, so a list
/// can be re-recorded every frame without re-allocating native state.
/// Recording while a prior snapshot is in flight is safe: `snapshot` hands an
/// immutable `Arc` of the op sequence to the render thread.
pub struct CommandList {
    handle: Handle<NativeCommandList>,
    queue_type: QueueType,
    debug_name: String,
    ops: Vec<RenderOp>,
    state: RecordState,
    in_pass: bool,
    subpass: u32,
}

impl CommandList {
    pub fn new(
        handle: Handle<NativeCommandList>,
        queue_type: QueueType,
        debug_name: &str,
    ) -> Self {
        Self {
            handle,
            queue_type,
            debug_name: debug_name.to_string(),
            ops: Vec::new(),
            state: RecordState::Initial,
            in_pass: false,
            subpass: 0,
        }
    }

    pub fn handle(&self) -> Handle<NativeCommandList> {
        self.handle
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    pub fn begin_recording(&mut self) {
        debug_assert!(
            self.state != RecordState::Recording,
            "begin_recording on {:?} while already recording",
            self.debug_name
        );
        self.ops.clear();
        self.state = RecordState::Recording;
        self.in_pass = false;
        self.subpass = 0;
    }

    pub fn end_recording(&mut self) {
        debug_assert!(
            self.state == RecordState::Recording,
            "end_recording on {:?} without begin_recording",
            self.debug_name
        );
        debug_assert!(
            !self.in_pass,
            "end_recording on {:?} inside an open render pass",
            self.debug_name
        );
        self.state = RecordState::Executable;
    }

    /// Clears content, keeps identity.
    pub fn reset(&mut self) {
        self.ops.clear();
        self.state = RecordState::Initial;
        self.in_pass = false;
        self.subpass = 0;
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecordState::Recording
    }

    pub fn is_executable(&self) -> bool {
        self.state == RecordState::Executable
    }

    pub fn ops(&self) -> &[RenderOp] {
        &self.ops
    }

    /// Immutable snapshot for submission to the render thread. Recording may
    /// continue (after `reset`) while the snapshot is in flight.
    pub fn snapshot(&self) -> Arc<[RenderOp]> {
        debug_assert!(
            self.state == RecordState::Executable,
            "snapshot of {:?} before end_recording",
            self.debug_name
        );
        self.ops.as_slice().into()
    }

    fn push(&mut self, op: RenderOp) {
        debug_assert!(
            self.state == RecordState::Recording,
            "recording op into {:?} outside begin/end",
            self.debug_name
        );
        if op.requires_pass() {
            debug_assert!(
                self.in_pass,
                "op {:?} outside a render pass in {:?}",
                op, self.debug_name
            );
        } else if op.requires_no_pass() {
            debug_assert!(
                !self.in_pass,
                "op {:?} inside a render pass in {:?}",
                op, self.debug_name
            );
        }
        self.ops.push(op);
    }

    pub fn begin_render_pass(&mut self, op: BeginRenderPassOp) {
        debug_assert!(!self.in_pass, "nested render pass in {:?}", self.debug_name);
        self.push(RenderOp::BeginRenderPass(op));
        self.in_pass = true;
        self.subpass = 0;
    }

    pub fn next_subpass(&mut self) {
        debug_assert!(self.in_pass, "next_subpass outside a render pass");
        self.push(RenderOp::NextSubpass);
        self.subpass += 1;
    }

    pub fn end_render_pass(&mut self) {
        debug_assert!(self.in_pass, "end_render_pass without begin_render_pass");
        self.in_pass = false;
        self.push(RenderOp::EndRenderPass);
    }

    pub fn bind_pipeline(&mut self, pipeline: Handle<GraphicsPipeline>) {
        self.push(RenderOp::BindPipeline(pipeline));
    }

    pub fn bind_bind_group(&mut self, op: BindBindGroupOp) {
        self.push(RenderOp::BindBindGroup(op));
    }

    pub fn bind_vertex_buffer(&mut self, slice: BufferSlice) {
        self.push(RenderOp::BindVertexBuffer(slice));
    }

    pub fn bind_index_buffer(&mut self, slice: BufferSlice, ty: IndexType) {
        self.push(RenderOp::BindIndexBuffer(slice, ty));
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.push(RenderOp::SetViewport(viewport));
    }

    pub fn set_scissor(&mut self, rect: Rect2D) {
        self.push(RenderOp::SetScissor(rect));
    }

    pub fn draw(&mut self, op: DrawOp) {
        self.push(RenderOp::Draw(op));
    }

    pub fn draw_indexed(&mut self, op: DrawIndexedOp) {
        self.push(RenderOp::DrawIndexed(op));
    }

    pub fn draw_indirect(&mut self, op: DrawIndirectOp) {
        self.push(RenderOp::DrawIndirect(op));
    }

    pub fn draw_indexed_indirect(&mut self, op: DrawIndirectOp) {
        self.push(RenderOp::DrawIndexedIndirect(op));
    }

    pub fn update_buffer(&mut self, dst: BufferSlice, data: &[u8]) {
        debug_assert_eq!(dst.size as usize, data.len(), "update_buffer size mismatch");
        self.push(RenderOp::UpdateBuffer {
            dst,
            data: data.to_vec(),
        });
    }

    pub fn copy_buffers(&mut self, op: CopyBufferOp) {
        self.push(RenderOp::CopyBuffer(op));
    }

    pub fn copy_buffer_to_image(&mut self, op: CopyBufferImageOp) {
        self.push(RenderOp::CopyBufferToImage(op));
    }

    pub fn blit(&mut self, op: BlitOp) {
        self.push(RenderOp::Blit(op));
    }

    pub fn image_barrier(&mut self, op: ImageBarrierOp) {
        self.push(RenderOp::ImageBarrier(op));
    }
}

//===----------------------------------------------------------------------===//
// Command sink & replay
//===----------------------------------------------------------------------===//

/// The observable-effects contract between the recorded representation and a
/// backend. Conformance is defined purely over the ordering of these calls:
/// replaying the same op sequence into any two sinks must produce the same
/// call sequence.
pub trait CommandSink {
    fn begin_render_pass(&mut self, op: &BeginRenderPassOp);
    fn next_subpass(&mut self);
    fn end_render_pass(&mut self);
    fn bind_pipeline(&mut self, pipeline: Handle<GraphicsPipeline>);
    fn bind_bind_group(&mut self, op: &BindBindGroupOp);
    fn bind_vertex_buffer(&mut self, slice: BufferSlice);
    fn bind_index_buffer(&mut self, slice: BufferSlice, ty: IndexType);
    fn set_viewport(&mut self, viewport: Viewport);
    fn set_scissor(&mut self, rect: Rect2D);
    fn draw(&mut self, op: &DrawOp);
    fn draw_indexed(&mut self, op: &DrawIndexedOp);
    fn draw_indirect(&mut self, op: &DrawIndirectOp);
    fn draw_indexed_indirect(&mut self, op: &DrawIndirectOp);
    fn update_buffer(&mut self, dst: BufferSlice, data: &[u8]);
    fn copy_buffer(&mut self, op: &CopyBufferOp);
    fn copy_buffer_to_image(&mut self, op: &CopyBufferImageOp);
    fn blit(&mut self, op: &BlitOp);
    fn image_barrier(&mut self, op: &ImageBarrierOp);
}

/// Forward every recorded op to `sink`, in order.
pub fn replay_ops(ops: &[RenderOp], sink: &mut dyn CommandSink) {
    for op in ops {
        match op {
            RenderOp::BeginRenderPass(op) => sink.begin_render_pass(op),
            RenderOp::NextSubpass => sink.next_subpass(),
            RenderOp::EndRenderPass => sink.end_render_pass(),
            RenderOp::BindPipeline(p) => sink.bind_pipeline(*p),
            RenderOp::BindBindGroup(op) => sink.bind_bind_group(op),
            RenderOp::BindVertexBuffer(s) => sink.bind_vertex_buffer(*s),
            RenderOp::BindIndexBuffer(s, ty) => sink.bind_index_buffer(*s, *ty),
            RenderOp::SetViewport(v) => sink.set_viewport(*v),
            RenderOp::SetScissor(r) => sink.set_scissor(*r),
            RenderOp::Draw(op) => sink.draw(op),
            RenderOp::DrawIndexed(op) => sink.draw_indexed(op),
            RenderOp::DrawIndirect(op) => sink.draw_indirect(op),
            RenderOp::DrawIndexedIndirect(op) => sink.draw_indexed_indirect(op),
            RenderOp::UpdateBuffer { dst, data } => sink.update_buffer(*dst, data),
            RenderOp::CopyBuffer(op) => sink.copy_buffer(op),
            RenderOp::CopyBufferToImage(op) => sink.copy_buffer_to_image(op),
            RenderOp::Blit(op) => sink.blit(op),
            RenderOp::ImageBarrier(op) => sink.image_barrier(op),
        }
    }
}

/// A command list submission bound for the render thread: the op snapshot
/// plus the native list identity and synchronization lists.
#[derive(Clone)]
pub struct Submission {
    pub list: Handle<NativeCommandList>,
    pub queue_type: QueueType,
    pub ops: Arc<[RenderOp]>,
    pub wait_sems: Vec<Handle<Semaphore>>,
    pub signal_sems: Vec<Handle<Semaphore>>,
    pub fence: Option<Handle<Fence>>,
}

impl Submission {
    pub fn new(list: &CommandList, info: &super::structs::SubmitInfo) -> Self {
        Self {
            list: list.handle(),
            queue_type: list.queue_type(),
            ops: list.snapshot(),
            wait_sems: info.wait_sems.clone(),
            signal_sems: info.signal_sems.clone(),
            fence: info.fence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draw(count: u32) -> DrawOp {
        DrawOp {
            vertex_count: count,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
        }
    }

    fn pass() -> BeginRenderPassOp {
        BeginRenderPassOp {
            render_pass: Default::default(),
            framebuffer: Default::default(),
            render_area: Rect2D {
                x: 0,
                y: 0,
                w: 64,
                h: 64,
            },
            clear_values: vec![ClearValue::default()],
        }
    }

    #[test]
    fn reset_drops_previous_recording_entirely() {
        let mut list = CommandList::new(Default::default(), QueueType::Graphics, "test");

        list.begin_recording();
        list.begin_render_pass(pass());
        list.draw(draw(3));
        list.end_render_pass();
        list.end_recording();
        let first = list.snapshot();
        assert_eq!(first.len(), 3);

        list.reset();
        list.begin_recording();
        list.begin_render_pass(pass());
        list.draw(draw(6));
        list.draw(draw(9));
        list.end_render_pass();
        list.end_recording();

        // Only the second sequence's effects remain.
        let second = list.snapshot();
        assert_eq!(second.len(), 4);
        assert!(second
            .iter()
            .all(|op| !matches!(op, RenderOp::Draw(d) if d.vertex_count == 3)));
    }

    #[test]
    fn reset_keeps_identity() {
        let handle = Handle::new(3, 1);
        let mut list = CommandList::new(handle, QueueType::Graphics, "test");
        list.begin_recording();
        list.end_recording();
        list.reset();
        assert_eq!(list.handle(), handle);
    }

    #[test]
    #[should_panic(expected = "outside a render pass")]
    #[cfg(debug_assertions)]
    fn draw_outside_pass_is_a_precondition_violation() {
        let mut list = CommandList::new(Default::default(), QueueType::Graphics, "test");
        list.begin_recording();
        list.draw(draw(3));
    }

    #[test]
    #[should_panic(expected = "inside a render pass")]
    #[cfg(debug_assertions)]
    fn copy_inside_pass_is_a_precondition_violation() {
        let mut list = CommandList::new(Default::default(), QueueType::Graphics, "test");
        list.begin_recording();
        list.begin_render_pass(pass());
        list.copy_buffers(CopyBufferOp {
            src: Default::default(),
            dst: Default::default(),
        });
    }
}
