//! Shared test doubles: a scriptable mock backend that records every
//! observable effect, and a command sink that records replayed calls.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use sumi::gpu::*;
use sumi::utils::Pool;
use sumi::Handle;

// Slot/generation carry identity across marker types, same as the real
// backends do internally.
fn retag<A, B>(h: Handle<A>) -> Handle<B> {
    Handle::from_raw_parts(h.slot, h.generation)
}

#[allow(dead_code)]
pub fn handle_from_key<T>(key: u32) -> Handle<T> {
    Handle::from_raw_parts((key >> 16) as u16, (key & 0xffff) as u16)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecRecord {
    pub list: u32,
    pub ops: Vec<RenderOp>,
    pub wait_sems: Vec<u32>,
    pub signal_sems: Vec<u32>,
    pub fence: Option<u32>,
}

#[derive(Default)]
pub struct MockStats {
    pub created_buffers: usize,
    pub destroyed_buffers: usize,
    pub created_bind_groups: usize,
    pub destroyed_bind_groups: usize,
    pub rebuilds: usize,
    pub fence_waits: usize,
    pub executions: Vec<ExecRecord>,
    pub presents: Vec<u32>,
    /// Pending scripted results; `true` means the next acquire reports
    /// stale. Empty script means always valid.
    pub acquire_script: VecDeque<bool>,
}

pub type SharedStats = Arc<Mutex<MockStats>>;

/// Backend double: every resource is a pool slot, every effect is recorded.
pub struct MockBackend {
    pub stats: SharedStats,
    buffers: Pool<Vec<u8>>,
    mapped: Vec<Handle<Buffer>>,
    images: Pool<()>,
    image_views: Pool<()>,
    samplers: Pool<()>,
    bind_group_layouts: Pool<()>,
    bind_groups: Pool<()>,
    render_passes: Pool<()>,
    framebuffers: Pool<()>,
    shader_modules: Pool<()>,
    vertex_inputs: Pool<()>,
    pipelines: Pool<()>,
    fences: Pool<()>,
    semaphores: Pool<()>,
    cmd_lists: Pool<()>,
    swap_views: Vec<Handle<ImageView>>,
    ready_sems: Vec<Handle<Semaphore>>,
    frame_cursor: u32,
    extent: Extent2D,
}

impl MockBackend {
    pub fn new(frames: usize) -> (Self, SharedStats) {
        let stats: SharedStats = Arc::default();
        let mut backend = Self {
            stats: stats.clone(),
            buffers: Pool::new(64),
            mapped: Vec::new(),
            images: Pool::new(64),
            image_views: Pool::new(64),
            samplers: Pool::new(16),
            bind_group_layouts: Pool::new(16),
            bind_groups: Pool::new(64),
            render_passes: Pool::new(16),
            framebuffers: Pool::new(16),
            shader_modules: Pool::new(16),
            vertex_inputs: Pool::new(16),
            pipelines: Pool::new(16),
            fences: Pool::new(16),
            semaphores: Pool::new(64),
            cmd_lists: Pool::new(16),
            swap_views: Vec::new(),
            ready_sems: Vec::new(),
            frame_cursor: 0,
            extent: Extent2D {
                width: 640,
                height: 360,
            },
        };
        for _ in 0..frames {
            let v = backend.image_views.insert(()).map(retag).unwrap();
            backend.swap_views.push(v);
            let s = backend.semaphores.insert(()).map(retag).unwrap();
            backend.ready_sems.push(s);
        }
        (backend, stats)
    }
}

impl ResourceFactory for MockBackend {
    fn make_buffer(&mut self, info: &BufferInfo) -> Result<Handle<Buffer>> {
        self.stats.lock().unwrap().created_buffers += 1;
        self.buffers
            .insert(vec![0u8; info.byte_size as usize])
            .map(retag)
            .ok_or(GPUError::SlotError("buffer"))
    }

    fn destroy_buffer(&mut self, buffer: Handle<Buffer>) {
        if self.buffers.release(retag(buffer)).is_some() {
            self.stats.lock().unwrap().destroyed_buffers += 1;
        }
    }

    fn map_buffer(&mut self, buffer: Handle<Buffer>) -> Result<*mut u8> {
        assert!(!self.mapped.contains(&buffer), "double map");
        let data = self
            .buffers
            .get_mut_ref(retag(buffer))
            .ok_or(GPUError::StaleHandle("buffer"))?;
        self.mapped.push(buffer);
        Ok(data.as_mut_ptr())
    }

    fn unmap_buffer(&mut self, buffer: Handle<Buffer>) -> Result<()> {
        let idx = self
            .mapped
            .iter()
            .position(|b| *b == buffer)
            .expect("unmap without map");
        self.mapped.swap_remove(idx);
        Ok(())
    }

    fn make_image(&mut self, _info: &ImageInfo) -> Result<Handle<Image>> {
        self.images
            .insert(())
            .map(retag)
            .ok_or(GPUError::SlotError("image"))
    }

    fn allocate_image(&mut self, info: &ImageInfo) -> Result<Handle<Image>> {
        assert!(info.initial_data.is_none());
        self.make_image(info)
    }

    fn destroy_image(&mut self, image: Handle<Image>) {
        self.images.release(retag(image));
    }

    fn make_image_view(&mut self, _info: &ImageViewInfo) -> Result<Handle<ImageView>> {
        self.image_views
            .insert(())
            .map(retag)
            .ok_or(GPUError::SlotError("image view"))
    }

    fn destroy_image_view(&mut self, view: Handle<ImageView>) {
        self.image_views.release(retag(view));
    }

    fn make_sampler(&mut self, _info: &SamplerInfo) -> Result<Handle<Sampler>> {
        self.samplers
            .insert(())
            .map(retag)
            .ok_or(GPUError::SlotError("sampler"))
    }

    fn destroy_sampler(&mut self, sampler: Handle<Sampler>) {
        self.samplers.release(retag(sampler));
    }

    fn make_bind_group_layout(
        &mut self,
        _info: &BindGroupLayoutInfo,
    ) -> Result<Handle<BindGroupLayout>> {
        self.bind_group_layouts
            .insert(())
            .map(retag)
            .ok_or(GPUError::SlotError("bind group layout"))
    }

    fn destroy_bind_group_layout(&mut self, layout: Handle<BindGroupLayout>) {
        self.bind_group_layouts.release(retag(layout));
    }

    fn make_bind_group(&mut self, _info: &BindGroupInfo) -> Result<Handle<BindGroup>> {
        self.stats.lock().unwrap().created_bind_groups += 1;
        self.bind_groups
            .insert(())
            .map(retag)
            .ok_or(GPUError::SlotError("bind group"))
    }

    fn destroy_bind_group(&mut self, group: Handle<BindGroup>) {
        if self.bind_groups.release(retag(group)).is_some() {
            self.stats.lock().unwrap().destroyed_bind_groups += 1;
        }
    }

    fn make_render_pass(&mut self, _info: &RenderPassInfo) -> Result<Handle<RenderPass>> {
        self.render_passes
            .insert(())
            .map(retag)
            .ok_or(GPUError::SlotError("render pass"))
    }

    fn destroy_render_pass(&mut self, render_pass: Handle<RenderPass>) {
        self.render_passes.release(retag(render_pass));
    }

    fn make_framebuffer(&mut self, _info: &FramebufferInfo) -> Result<Handle<Framebuffer>> {
        self.framebuffers
            .insert(())
            .map(retag)
            .ok_or(GPUError::SlotError("framebuffer"))
    }

    fn destroy_framebuffer(&mut self, framebuffer: Handle<Framebuffer>) {
        self.framebuffers.release(retag(framebuffer));
    }

    fn make_shader_module(&mut self, _info: &ShaderModuleInfo) -> Result<Handle<ShaderModule>> {
        self.shader_modules
            .insert(())
            .map(retag)
            .ok_or(GPUError::SlotError("shader module"))
    }

    fn destroy_shader_module(&mut self, module: Handle<ShaderModule>) {
        self.shader_modules.release(retag(module));
    }

    fn make_vertex_input_state(
        &mut self,
        _info: &VertexInputStateInfo,
    ) -> Result<Handle<VertexInputState>> {
        self.vertex_inputs
            .insert(())
            .map(retag)
            .ok_or(GPUError::SlotError("vertex input state"))
    }

    fn destroy_vertex_input_state(&mut self, state: Handle<VertexInputState>) {
        self.vertex_inputs.release(retag(state));
    }

    fn make_graphics_pipeline(
        &mut self,
        _info: &GraphicsPipelineInfo,
    ) -> Result<Handle<GraphicsPipeline>> {
        self.pipelines
            .insert(())
            .map(retag)
            .ok_or(GPUError::SlotError("graphics pipeline"))
    }

    fn destroy_graphics_pipeline(&mut self, pipeline: Handle<GraphicsPipeline>) {
        self.pipelines.release(retag(pipeline));
    }

    fn make_semaphore(&mut self) -> Result<Handle<Semaphore>> {
        self.semaphores
            .insert(())
            .map(retag)
            .ok_or(GPUError::SlotError("semaphore"))
    }

    fn destroy_semaphore(&mut self, semaphore: Handle<Semaphore>) {
        self.semaphores.release(retag(semaphore));
    }

    fn make_fence(&mut self) -> Result<Handle<Fence>> {
        self.fences
            .insert(())
            .map(retag)
            .ok_or(GPUError::SlotError("fence"))
    }

    fn destroy_fence(&mut self, fence: Handle<Fence>) {
        self.fences.release(retag(fence));
    }

    fn make_command_list(&mut self, info: &CommandListInfo) -> Result<CommandList> {
        let handle = self
            .cmd_lists
            .insert(())
            .map(retag)
            .ok_or(GPUError::SlotError("command list"))?;
        Ok(CommandList::new(handle, info.queue_type, info.debug_name))
    }

    fn destroy_command_list(&mut self, list: CommandList) {
        self.cmd_lists.release(retag(list.handle()));
    }
}

impl RenderBackend for MockBackend {
    fn factory(&mut self) -> &mut dyn ResourceFactory {
        self
    }

    fn execute(&mut self, submission: &Submission) -> Result<()> {
        self.stats.lock().unwrap().executions.push(ExecRecord {
            list: submission.list.key(),
            ops: submission.ops.to_vec(),
            wait_sems: submission.wait_sems.iter().map(|s| s.key()).collect(),
            signal_sems: submission.signal_sems.iter().map(|s| s.key()).collect(),
            fence: submission.fence.map(|f| f.key()),
        });
        Ok(())
    }

    fn acquire_next_image(&mut self) -> Result<AcquiredImage> {
        let stale = self
            .stats
            .lock()
            .unwrap()
            .acquire_script
            .pop_front()
            .unwrap_or(false);
        if stale {
            return Ok(AcquiredImage::Stale);
        }
        let index = self.frame_cursor % self.ready_sems.len() as u32;
        self.frame_cursor = self.frame_cursor.wrapping_add(1);
        Ok(AcquiredImage::Valid {
            index,
            ready: self.ready_sems[index as usize],
        })
    }

    fn present(&mut self, info: &PresentInfo) -> Result<()> {
        self.stats.lock().unwrap().presents.push(info.image_index);
        Ok(())
    }

    fn rebuild_swapchain(&mut self, config: &SwapchainConfig) -> Result<()> {
        self.stats.lock().unwrap().rebuilds += 1;
        self.extent = config.extent;
        Ok(())
    }

    fn wait_fence(&mut self, _fence: Handle<Fence>) -> Result<()> {
        self.stats.lock().unwrap().fence_waits += 1;
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        Ok(())
    }

    fn frame_count(&self) -> usize {
        self.ready_sems.len()
    }

    fn swapchain_views(&self) -> Vec<Handle<ImageView>> {
        self.swap_views.clone()
    }

    fn swapchain_extent(&self) -> Extent2D {
        self.extent
    }
}

/// Records the observable call stream a replay produces, as comparable
/// strings: the cross-backend conformance contract.
#[derive(Default)]
pub struct RecordingSink {
    pub calls: Vec<String>,
}

impl CommandSink for RecordingSink {
    fn begin_render_pass(&mut self, op: &BeginRenderPassOp) {
        self.calls.push(format!(
            "begin_render_pass rp={} fb={} area={:?}",
            op.render_pass.key(),
            op.framebuffer.key(),
            op.render_area
        ));
    }

    fn next_subpass(&mut self) {
        self.calls.push("next_subpass".into());
    }

    fn end_render_pass(&mut self) {
        self.calls.push("end_render_pass".into());
    }

    fn bind_pipeline(&mut self, pipeline: Handle<GraphicsPipeline>) {
        self.calls.push(format!("bind_pipeline {}", pipeline.key()));
    }

    fn bind_bind_group(&mut self, op: &BindBindGroupOp) {
        self.calls.push(format!(
            "bind_bind_group slot={} group={} dyn={:?}",
            op.slot,
            op.group.key(),
            op.dynamic_offset
        ));
    }

    fn bind_vertex_buffer(&mut self, slice: BufferSlice) {
        self.calls.push(format!(
            "bind_vertex_buffer {}+{}",
            slice.buffer.key(),
            slice.offset
        ));
    }

    fn bind_index_buffer(&mut self, slice: BufferSlice, ty: IndexType) {
        self.calls.push(format!(
            "bind_index_buffer {}+{} {ty:?}",
            slice.buffer.key(),
            slice.offset
        ));
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.calls.push(format!("set_viewport {viewport:?}"));
    }

    fn set_scissor(&mut self, rect: Rect2D) {
        self.calls.push(format!("set_scissor {rect:?}"));
    }

    fn draw(&mut self, op: &DrawOp) {
        self.calls.push(format!("draw {op:?}"));
    }

    fn draw_indexed(&mut self, op: &DrawIndexedOp) {
        self.calls.push(format!("draw_indexed {op:?}"));
    }

    fn draw_indirect(&mut self, op: &DrawIndirectOp) {
        self.calls.push(format!("draw_indirect {op:?}"));
    }

    fn draw_indexed_indirect(&mut self, op: &DrawIndirectOp) {
        self.calls.push(format!("draw_indexed_indirect {op:?}"));
    }

    fn update_buffer(&mut self, dst: BufferSlice, data: &[u8]) {
        self.calls.push(format!(
            "update_buffer {}+{} len={}",
            dst.buffer.key(),
            dst.offset,
            data.len()
        ));
    }

    fn copy_buffer(&mut self, op: &CopyBufferOp) {
        self.calls.push(format!("copy_buffer {op:?}"));
    }

    fn copy_buffer_to_image(&mut self, op: &CopyBufferImageOp) {
        self.calls.push(format!("copy_buffer_to_image {op:?}"));
    }

    fn blit(&mut self, op: &BlitOp) {
        self.calls.push(format!("blit {op:?}"));
    }

    fn image_barrier(&mut self, op: &ImageBarrierOp) {
        self.calls.push(format!("image_barrier {op:?}"));
    }
}
