mod conversions;
mod factory;
mod replay;
pub mod sync;

use log::{debug, trace, warn};

use crate::gpu::command::Submission;
use crate::gpu::factory::ResourceFactory;
use crate::gpu::renderer::{AcquiredImage, RenderBackend};
use crate::gpu::structs::*;
use crate::gpu::types::*;
use crate::gpu::{GPUError, Result};
use crate::utils::{Handle, Pool};

pub use sync::CountingSemaphore;

/// Re-type a handle between the public marker and the backend arena element.
pub(crate) fn retag<A, B>(h: Handle<A>) -> Handle<B> {
    Handle::new(h.slot, h.generation)
}

pub(crate) struct WgBuffer {
    pub(crate) raw: wgpu::Buffer,
    pub(crate) size: u32,
    /// CPU shadow backing `map_buffer`; flushed on unmap. The implicit API
    /// has no persistent mapping to hand out.
    pub(crate) shadow: Option<Box<[u8]>>,
    pub(crate) mapped: bool,
}

pub(crate) struct WgImage {
    pub(crate) tex: wgpu::Texture,
    pub(crate) format: Format,
    pub(crate) dim: [u32; 3],
}

pub(crate) enum WgImageView {
    Texture {
        view: wgpu::TextureView,
        image: Handle<Image>,
    },
    /// Resolves to the current surface texture at replay time.
    Swapchain,
}

pub(crate) struct WgSampler {
    pub(crate) raw: wgpu::Sampler,
}

pub(crate) struct WgBindGroupLayout {
    pub(crate) raw: wgpu::BindGroupLayout,
}

pub(crate) struct WgBindGroup {
    pub(crate) raw: wgpu::BindGroup,
}

/// Subpass list with owned indices; wgpu has no render pass objects, so this
/// only carries the shape used to emulate subpasses and derive pipeline
/// targets.
pub(crate) struct WgRenderPass {
    pub(crate) attachments: Vec<AttachmentDescription>,
    pub(crate) subpass_colors: Vec<Vec<u32>>,
    pub(crate) subpass_depth: Vec<Option<u32>>,
}

pub(crate) struct WgFramebuffer {
    pub(crate) attachments: Vec<Handle<ImageView>>,
}

pub(crate) struct WgShaderModule {
    pub(crate) raw: wgpu::ShaderModule,
}

pub(crate) struct WgVertexInput {
    pub(crate) bindings: Vec<VertexBindingDesc>,
    pub(crate) attributes: Vec<VertexAttributeDesc>,
}

pub(crate) struct WgPipeline {
    pub(crate) raw: wgpu::RenderPipeline,
}

pub(crate) struct WgFence {
    pub(crate) pending: Option<wgpu::SubmissionIndex>,
}

pub(crate) struct WgCommandList;

#[derive(Clone)]
pub struct WgpuBackendInfo {
    pub swapchain: SwapchainConfig,
}

impl Default for WgpuBackendInfo {
    fn default() -> Self {
        Self {
            swapchain: SwapchainConfig::default(),
        }
    }
}

/// The implicit-synchronization backend: one driver-managed queue, no native
/// semaphores or fences. Command lists are replayed against a fresh encoder
/// at execute time; "fences" are retained submission indices and
/// "semaphores" are CPU-side counting primitives.
pub struct WgpuBackend {
    pub(crate) instance: wgpu::Instance,
    pub(crate) adapter: wgpu::Adapter,
    pub(crate) device: wgpu::Device,
    pub(crate) queue: wgpu::Queue,

    pub(crate) surface: Option<wgpu::Surface<'static>>,
    pub(crate) surface_config: Option<wgpu::SurfaceConfiguration>,
    pub(crate) current_frame: Option<wgpu::SurfaceTexture>,
    swapchain_config: SwapchainConfig,
    swap_views: Vec<Handle<ImageView>>,
    ready_sems: Vec<Handle<Semaphore>>,
    frame_cursor: u32,

    pub(crate) buffers: Pool<WgBuffer>,
    pub(crate) images: Pool<WgImage>,
    pub(crate) image_views: Pool<WgImageView>,
    pub(crate) samplers: Pool<WgSampler>,
    pub(crate) bind_group_layouts: Pool<WgBindGroupLayout>,
    pub(crate) bind_groups: Pool<WgBindGroup>,
    pub(crate) render_passes: Pool<WgRenderPass>,
    pub(crate) framebuffers: Pool<WgFramebuffer>,
    pub(crate) shader_modules: Pool<WgShaderModule>,
    pub(crate) vertex_inputs: Pool<WgVertexInput>,
    pub(crate) pipelines: Pool<WgPipeline>,
    pub(crate) fences: Pool<WgFence>,
    pub(crate) semaphores: Pool<CountingSemaphore>,
    pub(crate) cmd_lists: Pool<WgCommandList>,
}

impl WgpuBackend {
    pub fn new(info: &WgpuBackendInfo) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(
            &wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            },
        ))
        .ok_or(GPUError::MissingFeature("no compatible wgpu adapter"))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("sumi-wgpu-device"),
                required_features: wgpu::Features::INDIRECT_FIRST_INSTANCE,
                required_limits: wgpu::Limits::default(),
            },
            None,
        ))?;

        debug!("wgpu adapter: {:?}", adapter.get_info().name);

        let mut backend = Self {
            instance,
            adapter,
            device,
            queue,
            surface: None,
            surface_config: None,
            current_frame: None,
            swapchain_config: info.swapchain,
            swap_views: Vec::new(),
            ready_sems: Vec::new(),
            frame_cursor: 0,
            buffers: Pool::default(),
            images: Pool::default(),
            image_views: Pool::default(),
            samplers: Pool::default(),
            bind_group_layouts: Pool::default(),
            bind_groups: Pool::default(),
            render_passes: Pool::default(),
            framebuffers: Pool::default(),
            shader_modules: Pool::default(),
            vertex_inputs: Pool::default(),
            pipelines: Pool::default(),
            fences: Pool::default(),
            semaphores: Pool::default(),
            cmd_lists: Pool::default(),
        };

        // One logical swap view per frame slot; all resolve to the live
        // surface texture during replay.
        for _ in 0..info.swapchain.image_count {
            let view = backend
                .image_views
                .insert(WgImageView::Swapchain)
                .map(retag)
                .ok_or(GPUError::SlotError("image view"))?;
            backend.swap_views.push(view);
            let sem = backend.make_semaphore()?;
            backend.ready_sems.push(sem);
        }

        Ok(backend)
    }

    /// Configure presentation for `window`. Must run before the backend moves
    /// to the render thread. The window target needs to satisfy wgpu's
    /// surface-target contract (e.g. an `Arc`-owned window).
    pub fn attach_window(
        &mut self,
        window: impl Into<wgpu::SurfaceTarget<'static>>,
    ) -> Result<()> {
        let surface = self.instance.create_surface(window)?;
        let capabilities = surface.get_capabilities(&self.adapter);
        let format = capabilities
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .unwrap_or(capabilities.formats[0]);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_DST,
            format,
            width: self.swapchain_config.extent.width.max(1),
            height: self.swapchain_config.extent.height.max(1),
            present_mode: conversions::lib_to_wgpu_present_mode(
                self.swapchain_config.present_mode,
            ),
            alpha_mode: capabilities.alpha_modes[0],
            view_formats: Vec::new(),
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&self.device, &config);
        self.surface = Some(surface);
        self.surface_config = Some(config);
        Ok(())
    }

    pub(crate) fn current_swap_view(&self) -> Option<wgpu::TextureView> {
        self.current_frame
            .as_ref()
            .map(|f| f.texture.create_view(&wgpu::TextureViewDescriptor::default()))
    }

    pub fn destroy(self) {
        // wgpu resources drop with their pools.
    }
}

impl RenderBackend for WgpuBackend {
    fn factory(&mut self) -> &mut dyn ResourceFactory {
        self
    }

    fn execute(&mut self, submission: &Submission) -> Result<()> {
        if self
            .cmd_lists
            .get_ref(retag(submission.list))
            .is_none()
        {
            return Err(GPUError::StaleHandle("command list"));
        }

        // Dependency ordering: earlier submits on this thread have already
        // signaled, so these waits only block on genuine cross-stage edges.
        for sem in &submission.wait_sems {
            match self.semaphores.get_ref(retag(*sem)) {
                Some(s) => s.wait(),
                None => warn!("wait on stale semaphore handle; skipped"),
            }
        }

        // Replay the recorded list against the driver.
        let index = replay::replay_submission(self, submission)?;

        for sem in &submission.signal_sems {
            match self.semaphores.get_ref(retag(*sem)) {
                Some(s) => s.signal(),
                None => warn!("signal of stale semaphore handle; skipped"),
            }
        }
        if let Some(fence) = submission.fence {
            match self.fences.get_mut_ref(retag(fence)) {
                Some(f) => f.pending = Some(index),
                None => warn!("fence of stale handle; skipped"),
            }
        }
        Ok(())
    }

    fn acquire_next_image(&mut self) -> Result<AcquiredImage> {
        let index = self.frame_cursor % self.swap_views.len().max(1) as u32;

        if let Some(surface) = &self.surface {
            match surface.get_current_texture() {
                Ok(frame) => {
                    self.current_frame = Some(frame);
                }
                Err(wgpu::SurfaceError::Outdated) | Err(wgpu::SurfaceError::Lost) => {
                    trace!("surface outdated at acquire");
                    return Ok(AcquiredImage::Stale);
                }
                Err(wgpu::SurfaceError::Timeout) => {
                    return Ok(AcquiredImage::Stale);
                }
                Err(wgpu::SurfaceError::OutOfMemory) => {
                    return Err(GPUError::Allocation("surface out of memory"));
                }
            }
        }
        self.frame_cursor = self.frame_cursor.wrapping_add(1);

        // The image is usable the moment acquisition returns; the slot's
        // "ready" semaphore is pre-signaled so waiters pass straight through.
        let ready = self.ready_sems[index as usize];
        if let Some(s) = self.semaphores.get_ref(retag(ready)) {
            s.signal();
        }
        Ok(AcquiredImage::Valid { index, ready })
    }

    fn present(&mut self, info: &PresentInfo) -> Result<()> {
        for sem in &info.wait_sems {
            match self.semaphores.get_ref(retag(*sem)) {
                Some(s) => s.wait(),
                None => warn!("present wait on stale semaphore; skipped"),
            }
        }
        if let Some(frame) = self.current_frame.take() {
            frame.present();
        }
        Ok(())
    }

    fn rebuild_swapchain(&mut self, config: &SwapchainConfig) -> Result<()> {
        self.swapchain_config = *config;
        self.current_frame = None;
        if let (Some(surface), Some(sc)) = (&self.surface, &mut self.surface_config) {
            sc.width = config.extent.width.max(1);
            sc.height = config.extent.height.max(1);
            sc.present_mode = conversions::lib_to_wgpu_present_mode(config.present_mode);
            surface.configure(&self.device, sc);
        }

        // Keep one logical swap view + ready semaphore per slot.
        while self.swap_views.len() < config.image_count as usize {
            let view = self
                .image_views
                .insert(WgImageView::Swapchain)
                .map(retag)
                .ok_or(GPUError::SlotError("image view"))?;
            self.swap_views.push(view);
            let sem = self.make_semaphore()?;
            self.ready_sems.push(sem);
        }
        while self.swap_views.len() > config.image_count as usize {
            if let Some(view) = self.swap_views.pop() {
                self.image_views.release(retag(view));
            }
            if let Some(sem) = self.ready_sems.pop() {
                self.destroy_semaphore(sem);
            }
        }
        Ok(())
    }

    fn wait_fence(&mut self, fence: Handle<Fence>) -> Result<()> {
        let f = self
            .fences
            .get_mut_ref(retag(fence))
            .ok_or(GPUError::StaleHandle("fence"))?;
        if let Some(index) = f.pending.take() {
            let _ = self
                .device
                .poll(wgpu::Maintain::WaitForSubmissionIndex(index));
        }
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        let _ = self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    fn flush(&mut self) {
        // Nudge pending work; bounds factory-job latency.
        let _ = self.device.poll(wgpu::Maintain::Poll);
    }

    fn frame_count(&self) -> usize {
        self.swap_views.len()
    }

    fn swapchain_views(&self) -> Vec<Handle<ImageView>> {
        self.swap_views.clone()
    }

    fn swapchain_extent(&self) -> Extent2D {
        match &self.surface_config {
            Some(sc) => Extent2D {
                width: sc.width,
                height: sc.height,
            },
            None => self.swapchain_config.extent,
        }
    }
}
