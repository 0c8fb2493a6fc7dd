use super::command::Submission;
use super::renderer::RenderBackend;
use super::structs::PresentInfo;

/// A job executed on the render thread with exclusive access to the backend
/// (and through it, the resource factory).
pub type BackendJob = Box<dyn FnOnce(&mut dyn RenderBackend) + Send + 'static>;

/// Queue entry consumed by the backend's render thread. Produced by any
/// thread; FIFO order is preserved per producer.
pub enum RenderCommand {
    /// Stop the render loop.
    Abort,
    /// Run a resource-factory job. Producers needing the result block on a
    /// one-shot completion signal captured inside the job.
    CreateResources(BackendJob),
    /// Submit a recorded command sequence to the backend queue.
    ExecuteCommandBuffer(Submission),
    /// Present the current swap image.
    SwapWindow(PresentInfo),
}

impl std::fmt::Debug for RenderCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderCommand::Abort => write!(f, "Abort"),
            RenderCommand::CreateResources(_) => write!(f, "CreateResources"),
            RenderCommand::ExecuteCommandBuffer(s) => {
                write!(f, "ExecuteCommandBuffer({} ops)", s.ops.len())
            }
            RenderCommand::SwapWindow(p) => write!(f, "SwapWindow(image {})", p.image_index),
        }
    }
}
