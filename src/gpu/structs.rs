use super::types::*;
use crate::utils::Handle;

#[derive(Debug, Clone, Copy)]
pub struct BufferInfo<'a> {
    pub debug_name: &'a str,
    pub byte_size: u32,
    pub usage: BufferUsage,
    pub memory_props: MemoryProps,
    pub initial_data: Option<&'a [u8]>,
}

impl<'a> Default for BufferInfo<'a> {
    fn default() -> Self {
        Self {
            debug_name: "buffer",
            byte_size: 1024,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            memory_props: MemoryProps::DEVICE_LOCAL,
            initial_data: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImageInfo<'a> {
    pub debug_name: &'a str,
    pub dim: [u32; 3],
    pub layers: u32,
    pub format: Format,
    pub mip_levels: u32,
    pub samples: SampleCount,
    pub usage: ImageUsage,
    /// Uploaded by `make_image`; must be `None` for `allocate_image`.
    pub initial_data: Option<&'a [u8]>,
}

impl<'a> Default for ImageInfo<'a> {
    fn default() -> Self {
        Self {
            debug_name: "image",
            dim: [1280, 720, 1],
            layers: 1,
            format: Format::RGBA8,
            mip_levels: 1,
            samples: SampleCount::S1,
            usage: ImageUsage::SAMPLED | ImageUsage::COPY_DST,
            initial_data: None,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubresourceRange {
    pub base_mip: u32,
    pub mip_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

impl Default for SubresourceRange {
    fn default() -> Self {
        Self {
            base_mip: 0,
            mip_count: 1,
            base_layer: 0,
            layer_count: 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImageViewInfo<'a> {
    pub debug_name: &'a str,
    pub image: Handle<Image>,
    pub range: SubresourceRange,
}

impl<'a> Default for ImageViewInfo<'a> {
    fn default() -> Self {
        Self {
            debug_name: "image_view",
            image: Default::default(),
            range: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SamplerInfo<'a> {
    pub debug_name: &'a str,
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub address_mode: SamplerAddressMode,
}

impl<'a> Default for SamplerInfo<'a> {
    fn default() -> Self {
        Self {
            debug_name: "sampler",
            min_filter: Filter::Linear,
            mag_filter: Filter::Linear,
            address_mode: SamplerAddressMode::Repeat,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentDescription {
    pub format: Format,
    pub samples: SampleCount,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
}

impl Default for AttachmentDescription {
    fn default() -> Self {
        Self {
            format: Format::BGRA8Unorm,
            samples: SampleCount::S1,
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
        }
    }
}

/// One subpass: indices into the render pass attachment list.
#[derive(Debug, Clone, Default)]
pub struct SubpassDescription<'a> {
    pub color_attachments: &'a [u32],
    pub depth_attachment: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct RenderPassInfo<'a> {
    pub debug_name: &'a str,
    pub attachments: &'a [AttachmentDescription],
    pub subpasses: &'a [SubpassDescription<'a>],
}

#[derive(Debug, Clone, Default)]
pub struct FramebufferInfo<'a> {
    pub debug_name: &'a str,
    pub render_pass: Handle<RenderPass>,
    pub attachments: &'a [Handle<ImageView>],
    pub extent: Extent2D,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ShaderStages: u32 {
        const VERTEX   = 0x1;
        const FRAGMENT = 0x2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingType {
    UniformBuffer,
    DynamicUniformBuffer,
    StorageBuffer,
    SampledImage,
    Sampler,
    CombinedImageSampler,
}

#[derive(Debug, Clone, Copy)]
pub struct BindingDesc {
    pub binding: u32,
    pub ty: BindingType,
    pub count: u32,
    pub stages: ShaderStages,
}

#[derive(Debug, Clone, Default)]
pub struct BindGroupLayoutInfo<'a> {
    pub debug_name: &'a str,
    pub bindings: &'a [BindingDesc],
}

#[derive(Debug, Clone, Copy)]
pub enum ShaderResource {
    Buffer(BufferSlice),
    Image(Handle<ImageView>),
    Sampler(Handle<Sampler>),
    CombinedImageSampler(Handle<ImageView>, Handle<Sampler>),
}

#[derive(Debug, Clone, Copy)]
pub struct BindingResource {
    pub binding: u32,
    pub resource: ShaderResource,
}

#[derive(Debug, Clone, Default)]
pub struct BindGroupInfo<'a> {
    pub debug_name: &'a str,
    pub layout: Handle<BindGroupLayout>,
    pub bindings: &'a [BindingResource],
}

#[derive(Debug, Clone, Copy)]
pub enum ShaderCode<'a> {
    /// Pre-compiled SPIR-V words (explicit backend).
    Spirv(&'a [u32]),
    /// WGSL source (implicit backend). Shader *compilation* stays out of
    /// scope; both variants are caller-provided artifacts.
    Wgsl(&'a str),
}

#[derive(Debug, Clone, Copy)]
pub struct ShaderModuleInfo<'a> {
    pub debug_name: &'a str,
    pub code: ShaderCode<'a>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VertexRate {
    #[default]
    Vertex,
    Instance,
}

#[derive(Debug, Clone, Copy)]
pub struct VertexBindingDesc {
    pub binding: u32,
    pub stride: u32,
    pub rate: VertexRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    F32x2,
    F32x3,
    F32x4,
    U32x4,
}

#[derive(Debug, Clone, Copy)]
pub struct VertexAttributeDesc {
    pub location: u32,
    pub binding: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

#[derive(Debug, Clone, Default)]
pub struct VertexInputStateInfo<'a> {
    pub debug_name: &'a str,
    pub bindings: &'a [VertexBindingDesc],
    pub attributes: &'a [VertexAttributeDesc],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Topology {
    #[default]
    TriangleList,
    TriangleStrip,
    LineList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    #[default]
    Back,
    Front,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DepthState {
    pub test: bool,
    pub write: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ColorBlendState {
    pub blend_enable: bool,
    /// All-channels-off turns the attachment into a depth-only target
    /// (the prepass pipeline).
    pub write_mask_rgba: [bool; 4],
}

impl ColorBlendState {
    pub fn opaque() -> Self {
        Self {
            blend_enable: false,
            write_mask_rgba: [true; 4],
        }
    }

    pub fn alpha_blend() -> Self {
        Self {
            blend_enable: true,
            write_mask_rgba: [true; 4],
        }
    }

    pub fn no_color_writes() -> Self {
        Self {
            blend_enable: false,
            write_mask_rgba: [false; 4],
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GraphicsPipelineDetails {
    pub topology: Topology,
    pub cull_mode: CullMode,
    pub depth: DepthState,
    pub color_blend: ColorBlendState,
}

#[derive(Debug, Clone, Default)]
pub struct GraphicsPipelineInfo<'a> {
    pub debug_name: &'a str,
    pub vertex_shader: Handle<ShaderModule>,
    /// Absent for depth-only pipelines.
    pub fragment_shader: Option<Handle<ShaderModule>>,
    pub vertex_input: Handle<VertexInputState>,
    pub bind_group_layouts: &'a [Handle<BindGroupLayout>],
    pub render_pass: Handle<RenderPass>,
    pub subpass: u32,
    pub details: GraphicsPipelineDetails,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CommandListInfo<'a> {
    pub debug_name: &'a str,
    pub queue_type: QueueType,
}

#[derive(Debug, Clone, Default)]
pub struct SubmitInfo {
    pub wait_sems: Vec<Handle<Semaphore>>,
    pub signal_sems: Vec<Handle<Semaphore>>,
    pub fence: Option<Handle<Fence>>,
}

#[derive(Debug, Clone, Default)]
pub struct PresentInfo {
    pub image_index: u32,
    pub wait_sems: Vec<Handle<Semaphore>>,
}

/// Swapchain shape requested by the orchestrator; applied on rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainConfig {
    pub extent: Extent2D,
    pub present_mode: PresentMode,
    pub image_count: u32,
}

impl Default for SwapchainConfig {
    fn default() -> Self {
        Self {
            extent: Extent2D {
                width: 1280,
                height: 720,
            },
            present_mode: PresentMode::Fifo,
            image_count: 3,
        }
    }
}
