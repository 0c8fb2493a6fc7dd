pub mod allocator;
pub mod command;
pub mod device;
pub mod error;
pub mod factory;
pub mod queue;
pub mod renderer;
pub mod structs;
pub mod types;

#[cfg(feature = "sumi-vulkan")]
pub mod vulkan;
#[cfg(feature = "sumi-wgpu")]
pub mod wgpu;

pub use crate::utils::{Handle, Pool};

pub use allocator::{BufferAllocator, BACKING_GRANULARITY};
pub use command::{
    BarrierPoint, BeginRenderPassOp, BindBindGroupOp, BlitOp, CommandList, CommandSink,
    CopyBufferImageOp, CopyBufferOp, DrawIndexedOp, DrawIndirectOp, DrawOp, ImageBarrierOp,
    RenderOp, Submission, replay_ops,
};
pub use device::RenderDevice;
pub use error::{GPUError, Result};
pub use factory::ResourceFactory;
pub use queue::{BackendJob, RenderCommand};
pub use renderer::{AcquiredImage, RenderBackend};
pub use structs::*;
pub use types::*;
