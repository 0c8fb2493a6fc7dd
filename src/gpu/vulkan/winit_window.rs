use winit::dpi::PhysicalSize;
use winit::event_loop::EventLoop;
use winit::window::{Window, WindowBuilder};

use crate::gpu::{GPUError, Result};

#[derive(Debug, Clone)]
pub struct WindowInfo {
    pub title: String,
    pub size: [u32; 2],
    pub resizable: bool,
}

impl Default for WindowInfo {
    fn default() -> Self {
        Self {
            title: "sumi".into(),
            size: [1280, 720],
            resizable: true,
        }
    }
}

/// Create a winit window to pass to [`VulkanBackend::attach_window`]. The
/// event loop stays with the caller; only the surface crosses into the
/// backend.
///
/// [`VulkanBackend::attach_window`]: super::VulkanBackend::attach_window
pub fn create_window(info: &WindowInfo) -> Result<(EventLoop<()>, Window)> {
    let event_loop = EventLoop::new();
    let window = WindowBuilder::new()
        .with_title(info.title.clone())
        .with_inner_size(PhysicalSize::new(info.size[0], info.size[1]))
        .with_resizable(info.resizable)
        .build(&event_loop)
        .map_err(|_| GPUError::SwapchainConfig("window creation failed"))?;
    Ok((event_loop, window))
}
