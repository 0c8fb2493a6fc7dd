use crate::gpu::structs::*;
use crate::gpu::types::*;

pub(super) fn lib_to_wgpu_format(format: Format) -> wgpu::TextureFormat {
    match format {
        Format::R8Uint => wgpu::TextureFormat::R8Uint,
        Format::RGBA8 => wgpu::TextureFormat::Rgba8UnormSrgb,
        Format::RGBA8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        Format::BGRA8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        Format::RGBA32F => wgpu::TextureFormat::Rgba32Float,
        Format::D24S8 => wgpu::TextureFormat::Depth24PlusStencil8,
        Format::D32F => wgpu::TextureFormat::Depth32Float,
    }
}

pub(super) fn bytes_per_pixel(format: Format) -> u32 {
    match format {
        Format::R8Uint => 1,
        Format::RGBA8 | Format::RGBA8Unorm | Format::BGRA8Unorm => 4,
        Format::RGBA32F => 16,
        Format::D24S8 | Format::D32F => 4,
    }
}

pub(super) fn lib_to_wgpu_present_mode(mode: PresentMode) -> wgpu::PresentMode {
    match mode {
        PresentMode::Immediate => wgpu::PresentMode::Immediate,
        PresentMode::Fifo => wgpu::PresentMode::Fifo,
        PresentMode::Mailbox => wgpu::PresentMode::Mailbox,
    }
}

pub(super) fn lib_to_wgpu_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
    let mut flags = wgpu::BufferUsages::empty();
    if usage.contains(BufferUsage::VERTEX) {
        flags |= wgpu::BufferUsages::VERTEX;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= wgpu::BufferUsages::INDEX;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        flags |= wgpu::BufferUsages::UNIFORM;
    }
    if usage.contains(BufferUsage::STORAGE) {
        flags |= wgpu::BufferUsages::STORAGE;
    }
    if usage.contains(BufferUsage::INDIRECT) {
        flags |= wgpu::BufferUsages::INDIRECT;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        flags |= wgpu::BufferUsages::COPY_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        flags |= wgpu::BufferUsages::COPY_DST;
    }
    flags
}

pub(super) fn lib_to_wgpu_image_usage(usage: ImageUsage, format: Format) -> wgpu::TextureUsages {
    let mut flags = wgpu::TextureUsages::empty();
    if usage.contains(ImageUsage::SAMPLED) {
        flags |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if usage.contains(ImageUsage::COLOR_TARGET)
        || usage.contains(ImageUsage::DEPTH_TARGET)
        || matches!(format, Format::D24S8 | Format::D32F)
    {
        flags |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    if usage.contains(ImageUsage::COPY_SRC) {
        flags |= wgpu::TextureUsages::COPY_SRC;
    }
    if usage.contains(ImageUsage::COPY_DST) {
        flags |= wgpu::TextureUsages::COPY_DST;
    }
    flags
}

pub(super) fn lib_to_wgpu_filter(filter: Filter) -> wgpu::FilterMode {
    match filter {
        Filter::Nearest => wgpu::FilterMode::Nearest,
        Filter::Linear => wgpu::FilterMode::Linear,
    }
}

pub(super) fn lib_to_wgpu_address_mode(mode: SamplerAddressMode) -> wgpu::AddressMode {
    match mode {
        SamplerAddressMode::Repeat => wgpu::AddressMode::Repeat,
        SamplerAddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        SamplerAddressMode::ClampToBorder => wgpu::AddressMode::ClampToBorder,
    }
}

pub(super) fn lib_to_wgpu_index_format(ty: IndexType) -> wgpu::IndexFormat {
    match ty {
        IndexType::U16 => wgpu::IndexFormat::Uint16,
        IndexType::U32 => wgpu::IndexFormat::Uint32,
    }
}

pub(super) fn lib_to_wgpu_topology(topology: Topology) -> wgpu::PrimitiveTopology {
    match topology {
        Topology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
        Topology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        Topology::LineList => wgpu::PrimitiveTopology::LineList,
    }
}

pub(super) fn lib_to_wgpu_cull_mode(mode: CullMode) -> Option<wgpu::Face> {
    match mode {
        CullMode::None => None,
        CullMode::Back => Some(wgpu::Face::Back),
        CullMode::Front => Some(wgpu::Face::Front),
    }
}

pub(super) fn lib_to_wgpu_vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::F32x2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::F32x3 => wgpu::VertexFormat::Float32x3,
        VertexFormat::F32x4 => wgpu::VertexFormat::Float32x4,
        VertexFormat::U32x4 => wgpu::VertexFormat::Uint32x4,
    }
}

pub(super) fn lib_to_wgpu_shader_stages(stages: ShaderStages) -> wgpu::ShaderStages {
    let mut flags = wgpu::ShaderStages::empty();
    if stages.contains(ShaderStages::VERTEX) {
        flags |= wgpu::ShaderStages::VERTEX;
    }
    if stages.contains(ShaderStages::FRAGMENT) {
        flags |= wgpu::ShaderStages::FRAGMENT;
    }
    flags
}
