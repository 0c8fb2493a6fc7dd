use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::utils::Handle;

// Opaque marker types for backend-owned resources. The public surface only
// ever sees `Handle<T>` over these; the concrete structs live in the owning
// backend's arenas.
pub struct Buffer;
pub struct Image;
pub struct ImageView;
pub struct Sampler;
pub struct BindGroup;
pub struct BindGroupLayout;
pub struct GraphicsPipeline;
pub struct RenderPass;
pub struct Framebuffer;
pub struct Fence;
pub struct Semaphore;
pub struct ShaderModule;
pub struct VertexInputState;
/// Identity of a command list inside its owning backend. Reset keeps this
/// identity; only destroy releases it.
pub struct NativeCommandList;

bitflags! {
    #[repr(C)]
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX   = 0x1;
        const INDEX    = 0x2;
        const UNIFORM  = 0x4;
        const STORAGE  = 0x8;
        const INDIRECT = 0x10;
        const COPY_SRC = 0x20;
        const COPY_DST = 0x40;
    }
}

bitflags! {
    #[repr(C)]
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        const SAMPLED          = 0x1;
        const COLOR_TARGET     = 0x2;
        const DEPTH_TARGET     = 0x4;
        const COPY_SRC         = 0x8;
        const COPY_DST         = 0x10;
    }
}

bitflags! {
    #[repr(C)]
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryProps: u32 {
        const DEVICE_LOCAL  = 0x1;
        const HOST_VISIBLE  = 0x2;
        const HOST_COHERENT = 0x4;
    }
}

unsafe impl Pod for BufferUsage {}
unsafe impl Zeroable for BufferUsage {}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum Format {
    R8Uint,
    #[default]
    RGBA8,
    RGBA8Unorm,
    BGRA8Unorm,
    RGBA32F,
    D24S8,
    D32F,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentMode {
    Immediate,
    #[default]
    Fifo,
    Mailbox,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum QueueType {
    #[default]
    Graphics,
    Transfer,
    Present,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum IndexType {
    U16,
    #[default]
    U32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum Filter {
    #[default]
    Nearest,
    Linear,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum SamplerAddressMode {
    #[default]
    Repeat,
    ClampToEdge,
    ClampToBorder,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum SampleCount {
    #[default]
    S1,
    S4,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum LoadOp {
    #[default]
    Load,
    Clear,
    DontCare,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum StoreOp {
    #[default]
    Store,
    DontCare,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

impl Default for ClearValue {
    fn default() -> Self {
        ClearValue::Color([0.0, 0.0, 0.0, 1.0])
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct Rect2D {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Default, Pod, Zeroable)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

/// Non-owning view of a byte range inside a backend-owned buffer. The buffer
/// allocator is the sole owner of the backing buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferSlice {
    pub buffer: Handle<Buffer>,
    pub offset: u32,
    pub size: u32,
}

impl BufferSlice {
    pub fn whole(buffer: Handle<Buffer>, size: u32) -> Self {
        Self {
            buffer,
            offset: 0,
            size,
        }
    }
}

/// GPU layout of a non-indexed indirect draw record.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct IndirectCommand {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

/// GPU layout of an indexed indirect draw record.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct IndexedIndirectCommand {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}
