use crate::gpu::{
    BufferSlice, CommandList, Fence, Framebuffer, Handle, Image, ImageView, Semaphore,
};

/// Frame-slot lifecycle. Stages advance strictly in order; `Idle` is both the
/// start and the post-present state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquired,
    PreRendered,
    MainRendered,
    PostProcessed,
    Presented,
}

impl FrameState {
    pub(crate) fn expect(self, want: FrameState, stage: &str) {
        debug_assert_eq!(
            self, want,
            "{stage} called out of order (frame slot is {self:?})"
        );
    }
}

/// Everything owned by one frame-in-flight slot. The fence gates reuse: a
/// slot's command lists are only reset and its buffers only rewritten after
/// the fence has signaled.
pub struct FrameInfo {
    pub(crate) state: FrameState,
    pub(crate) image_index: u32,

    /// Signaled by acquisition when the slot's swap image is writable.
    pub(crate) framebuffer_ready: Handle<Semaphore>,
    pub(crate) pre_render_finished: Handle<Semaphore>,
    pub(crate) main_render_finished: Handle<Semaphore>,
    pub(crate) postprocess_finished: Handle<Semaphore>,
    pub(crate) fence: Handle<Fence>,
    /// Whether the fence has a pending signal we must wait for before reuse.
    pub(crate) fence_submitted: bool,

    pub(crate) pre_render_cmds: CommandList,
    pub(crate) main_cmds: CommandList,
    pub(crate) post_cmds: CommandList,

    /// Indirect draw records for this frame's batches.
    pub(crate) indirect: BufferSlice,

    // Swapchain-dependent targets; rebuilt on resize/present-mode change.
    pub(crate) color_image: Handle<Image>,
    pub(crate) color_view: Handle<ImageView>,
    pub(crate) depth_image: Handle<Image>,
    pub(crate) depth_view: Handle<ImageView>,
    pub(crate) geometry_fb: Handle<Framebuffer>,
    pub(crate) post_fb: Handle<Framebuffer>,
}
