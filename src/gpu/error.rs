use thiserror::Error;

#[derive(Debug, Error)]
pub enum GPUError {
    #[error("ran out of handle slots for {0}")]
    SlotError(&'static str),

    #[error("stale or invalid {0} handle")]
    StaleHandle(&'static str),

    #[error("required device feature unsupported: {0}")]
    MissingFeature(&'static str),

    #[error("no compatible queue family for {0}")]
    NoQueueFamily(&'static str),

    #[error("swapchain configuration failed: {0}")]
    SwapchainConfig(&'static str),

    #[error("render thread is not running")]
    RenderThreadDown,

    #[error("command recording violation: {0}")]
    Recording(&'static str),

    #[error("buffer allocation failed: {0}")]
    Allocation(&'static str),

    #[error("backend does not implement {0}")]
    Unimplemented(&'static str),

    #[cfg(feature = "sumi-vulkan")]
    #[error("vulkan error: {0}")]
    Vulkan(#[from] ash::vk::Result),

    #[cfg(feature = "sumi-vulkan")]
    #[error("vulkan loader error: {0}")]
    Loading(#[from] ash::LoadingError),

    #[cfg(feature = "sumi-wgpu")]
    #[error("wgpu surface creation failed: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),

    #[cfg(feature = "sumi-wgpu")]
    #[error("wgpu device request failed: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
}

pub type Result<T, E = GPUError> = std::result::Result<T, E>;
