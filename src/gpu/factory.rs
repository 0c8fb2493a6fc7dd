use super::command::CommandList;
use super::structs::*;
use super::types::*;
use super::Result;
use crate::utils::Handle;

/// The resource creation/destruction contract every backend implements.
///
/// Every creation call takes an immutable, fully-specified `*Info` and
/// returns a handle valid until the matching destroy call. Destroy calls are
/// not idempotent: destroying a handle twice is a programmer error, matching
/// the backing native APIs. `map_buffer`/`unmap_buffer` must be paired and
/// are non-reentrant per handle.
///
/// Factory methods run on the backend's render thread, reached through
/// [`RenderDevice::create_resources`](super::device::RenderDevice::create_resources).
pub trait ResourceFactory {
    fn make_buffer(&mut self, info: &BufferInfo) -> Result<Handle<Buffer>>;
    fn destroy_buffer(&mut self, buffer: Handle<Buffer>);

    /// Maps the whole buffer. The buffer must have been created with
    /// [`MemoryProps::HOST_VISIBLE`].
    fn map_buffer(&mut self, buffer: Handle<Buffer>) -> Result<*mut u8>;
    fn unmap_buffer(&mut self, buffer: Handle<Buffer>) -> Result<()>;

    /// Creates an image and uploads `initial_data` when present.
    fn make_image(&mut self, info: &ImageInfo) -> Result<Handle<Image>>;
    /// Creates an image and binds backing memory without uploading anything;
    /// for targets whose contents arrive later (deferred/virtual-texture
    /// style use). `initial_data` must be `None`.
    fn allocate_image(&mut self, info: &ImageInfo) -> Result<Handle<Image>>;
    fn destroy_image(&mut self, image: Handle<Image>);

    fn make_image_view(&mut self, info: &ImageViewInfo) -> Result<Handle<ImageView>>;
    fn destroy_image_view(&mut self, view: Handle<ImageView>);

    fn make_sampler(&mut self, info: &SamplerInfo) -> Result<Handle<Sampler>>;
    fn destroy_sampler(&mut self, sampler: Handle<Sampler>);

    fn make_bind_group_layout(
        &mut self,
        info: &BindGroupLayoutInfo,
    ) -> Result<Handle<BindGroupLayout>>;
    fn destroy_bind_group_layout(&mut self, layout: Handle<BindGroupLayout>);

    fn make_bind_group(&mut self, info: &BindGroupInfo) -> Result<Handle<BindGroup>>;
    fn destroy_bind_group(&mut self, group: Handle<BindGroup>);

    fn make_render_pass(&mut self, info: &RenderPassInfo) -> Result<Handle<RenderPass>>;
    fn destroy_render_pass(&mut self, render_pass: Handle<RenderPass>);

    fn make_framebuffer(&mut self, info: &FramebufferInfo) -> Result<Handle<Framebuffer>>;
    fn destroy_framebuffer(&mut self, framebuffer: Handle<Framebuffer>);

    fn make_shader_module(&mut self, info: &ShaderModuleInfo) -> Result<Handle<ShaderModule>>;
    fn destroy_shader_module(&mut self, module: Handle<ShaderModule>);

    fn make_vertex_input_state(
        &mut self,
        info: &VertexInputStateInfo,
    ) -> Result<Handle<VertexInputState>>;
    fn destroy_vertex_input_state(&mut self, state: Handle<VertexInputState>);

    fn make_graphics_pipeline(
        &mut self,
        info: &GraphicsPipelineInfo,
    ) -> Result<Handle<GraphicsPipeline>>;
    fn destroy_graphics_pipeline(&mut self, pipeline: Handle<GraphicsPipeline>);

    fn make_semaphore(&mut self) -> Result<Handle<Semaphore>>;
    fn destroy_semaphore(&mut self, semaphore: Handle<Semaphore>);

    fn make_fence(&mut self) -> Result<Handle<Fence>>;
    fn destroy_fence(&mut self, fence: Handle<Fence>);

    fn make_command_list(&mut self, info: &CommandListInfo) -> Result<CommandList>;
    fn destroy_command_list(&mut self, list: CommandList);
}
