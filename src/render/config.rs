use serde::{Deserialize, Serialize};

use crate::gpu::{Extent2D, PresentMode, SwapchainConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Vulkan,
    Wgpu,
}

/// Renderer configuration. Loaded once at init and then only *queued*:
/// changes apply at the next `start_frame`, never mid-frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub width: u32,
    pub height: u32,
    pub present_mode: PresentMode,
    pub backend: BackendKind,
    pub frames_in_flight: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            present_mode: PresentMode::Fifo,
            backend: BackendKind::Vulkan,
            frames_in_flight: 3,
        }
    }
}

impl RendererConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    pub fn swapchain(&self) -> SwapchainConfig {
        SwapchainConfig {
            extent: Extent2D {
                width: self.width,
                height: self.height,
            },
            present_mode: self.present_mode,
            image_count: self.frames_in_flight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg = RendererConfig::from_toml_str("width = 1920\nheight = 1080\n").unwrap();
        assert_eq!(cfg.width, 1920);
        assert_eq!(cfg.height, 1080);
        assert_eq!(cfg.present_mode, PresentMode::Fifo);
        assert_eq!(cfg.frames_in_flight, 3);
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = RendererConfig {
            width: 800,
            height: 600,
            present_mode: PresentMode::Mailbox,
            backend: BackendKind::Wgpu,
            frames_in_flight: 2,
        };
        let parsed = RendererConfig::from_toml_str(&cfg.to_toml_string()).unwrap();
        assert_eq!(parsed, cfg);
    }
}
