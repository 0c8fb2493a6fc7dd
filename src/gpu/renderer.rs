use super::command::Submission;
use super::factory::ResourceFactory;
use super::structs::{PresentInfo, SwapchainConfig};
use super::types::{Extent2D, Fence, ImageView, Semaphore};
use super::Result;
use crate::utils::Handle;

/// Result of a frame acquisition attempt. A stale swapchain is not an error:
/// the orchestrator reacts to the sentinel by rebuilding and retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquiredImage {
    Valid {
        /// Index of the acquired swap image; selects the frame slot.
        index: u32,
        /// Signaled once the image is actually ready to be rendered to.
        ready: Handle<Semaphore>,
    },
    /// The swapchain no longer matches the surface (resize, present-mode
    /// change). No image index is valid until a rebuild.
    Stale,
}

/// A concrete graphics-API implementation behind the render thread.
///
/// Exactly one render thread owns the backend; every call below happens on
/// that thread. The two shipped implementations are the explicit-sync Vulkan
/// backend and the implicit-sync wgpu backend; call sites depend only on this
/// trait.
pub trait RenderBackend: Send {
    fn factory(&mut self) -> &mut dyn ResourceFactory;

    /// Submit a recorded command sequence to the backend's queue with
    /// explicit wait/signal semaphore lists and an optional completion fence.
    fn execute(&mut self, submission: &Submission) -> Result<()>;

    fn acquire_next_image(&mut self) -> Result<AcquiredImage>;

    fn present(&mut self, info: &PresentInfo) -> Result<()>;

    /// Tears down and rebuilds the swapchain and all per-swapchain resources.
    /// Callers must have drained in-flight GPU work first.
    fn rebuild_swapchain(&mut self, config: &SwapchainConfig) -> Result<()>;

    /// Block until `fence` signals, then reset it for reuse.
    fn wait_fence(&mut self, fence: Handle<Fence>) -> Result<()>;

    fn wait_idle(&mut self) -> Result<()>;

    /// Nudge the driver to make progress on pending work. The render thread
    /// brackets factory jobs with this to bound creation latency; explicit
    /// APIs may treat it as a no-op.
    fn flush(&mut self) {}

    /// Number of swapchain images, which is also the frame-in-flight count.
    fn frame_count(&self) -> usize;

    /// One image view per swap image, indexable by acquired index. Invalidated
    /// by `rebuild_swapchain`. Empty when running headless.
    fn swapchain_views(&self) -> Vec<Handle<ImageView>>;

    fn swapchain_extent(&self) -> Extent2D;
}
