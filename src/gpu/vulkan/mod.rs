mod conversions;
mod descriptors;
mod display;
mod factory;
mod sink;
mod staging;
#[cfg(feature = "sumi-winit")]
pub mod winit_window;

use std::ffi::{c_char, CStr, CString};
use std::mem::ManuallyDrop;

use ash::vk;
use log::{debug, error, warn};
use vk_mem::Alloc;

use crate::gpu::command::Submission;
use crate::gpu::factory::ResourceFactory;
use crate::gpu::renderer::{AcquiredImage, RenderBackend};
use crate::gpu::structs::*;
use crate::gpu::types::*;
use crate::gpu::{GPUError, Result};
use crate::utils::{Handle, Pool};

use conversions::*;
use descriptors::DescriptorPoolTable;
use display::Display;
use staging::StagingPool;

pub use descriptors::{ThreadIndexSource, WorkerThreadIndices};

/// Names of debugging layers enabled when validation is requested.
pub const DEBUG_LAYER_NAMES: [*const c_char; 1] =
    [b"VK_LAYER_KHRONOS_validation\0".as_ptr() as *const c_char];

/// Re-type a handle between the public marker and the backend arena element.
/// Slot and generation carry the identity; the type only tags the arena.
pub(crate) fn retag<A, B>(h: Handle<A>) -> Handle<B> {
    Handle::new(h.slot, h.generation)
}

pub(crate) struct VkBuffer {
    pub(crate) buf: vk::Buffer,
    pub(crate) alloc: vk_mem::Allocation,
    pub(crate) size: u32,
    pub(crate) mapped: bool,
}

pub(crate) struct VkImage {
    pub(crate) img: vk::Image,
    pub(crate) alloc: Option<vk_mem::Allocation>,
    pub(crate) dim: [u32; 3],
    pub(crate) format: Format,
    pub(crate) layers: u32,
    pub(crate) mip_levels: u32,
    pub(crate) layout: vk::ImageLayout,
}

pub(crate) struct VkImageView {
    pub(crate) view: vk::ImageView,
    pub(crate) image: Handle<Image>,
}

pub(crate) struct VkSampler {
    pub(crate) raw: vk::Sampler,
}

pub(crate) struct VkBindGroupLayout {
    pub(crate) layout: vk::DescriptorSetLayout,
    /// (binding, descriptor type) table for writes at bind-group creation.
    pub(crate) bindings: Vec<(u32, vk::DescriptorType)>,
}

pub(crate) struct VkBindGroup {
    pub(crate) set: vk::DescriptorSet,
    pub(crate) pool_index: usize,
}

pub(crate) struct VkRenderPass {
    pub(crate) raw: vk::RenderPass,
    pub(crate) subpass_color_counts: Vec<u32>,
}

pub(crate) struct VkFramebuffer {
    pub(crate) raw: vk::Framebuffer,
    pub(crate) extent: Extent2D,
}

pub(crate) struct VkShaderModule {
    pub(crate) raw: vk::ShaderModule,
}

pub(crate) struct VkVertexInput {
    pub(crate) bindings: Vec<vk::VertexInputBindingDescription>,
    pub(crate) attributes: Vec<vk::VertexInputAttributeDescription>,
}

pub(crate) struct VkPipeline {
    pub(crate) raw: vk::Pipeline,
    pub(crate) layout: vk::PipelineLayout,
}

pub(crate) struct VkFence {
    pub(crate) raw: vk::Fence,
}

pub(crate) struct VkSemaphore {
    pub(crate) raw: vk::Semaphore,
}

pub(crate) struct VkCommandList {
    pub(crate) cmd_buf: vk::CommandBuffer,
}

#[derive(Default)]
pub(crate) struct Queue {
    pub(crate) queue: vk::Queue,
    pub(crate) family: u32,
}

#[derive(Clone)]
pub struct VulkanBackendInfo {
    pub app_name: String,
    pub device_index: usize,
    pub swapchain: SwapchainConfig,
    /// Worker-thread partitioning for descriptor pools.
    pub worker_threads: usize,
}

impl Default for VulkanBackendInfo {
    fn default() -> Self {
        Self {
            app_name: "sumi".into(),
            device_index: 0,
            swapchain: SwapchainConfig::default(),
            worker_threads: 4,
        }
    }
}

/// The explicit-synchronization backend: owns the Vulkan device, distinct
/// graphics/transfer/present queues, per-worker descriptor pools, a staging
/// pool, and arenas for every resource kind.
pub struct VulkanBackend {
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) pdevice: vk::PhysicalDevice,
    pub(crate) device: ash::Device,
    pub(crate) allocator: ManuallyDrop<vk_mem::Allocator>,

    pub(crate) gfx_queue: Queue,
    pub(crate) transfer_queue: Option<Queue>,
    pub(crate) present_queue: Queue,

    pub(crate) cmd_pool: vk::CommandPool,
    pub(crate) desc_pools: DescriptorPoolTable,
    pub(crate) staging: StagingPool,

    pub(crate) display: Option<Display>,
    swapchain_config: SwapchainConfig,
    headless_frame: u32,
    headless_sems: Vec<Handle<Semaphore>>,

    pub(crate) buffers: Pool<VkBuffer>,
    pub(crate) images: Pool<VkImage>,
    pub(crate) image_views: Pool<VkImageView>,
    pub(crate) samplers: Pool<VkSampler>,
    pub(crate) bind_group_layouts: Pool<VkBindGroupLayout>,
    pub(crate) bind_groups: Pool<VkBindGroup>,
    pub(crate) render_passes: Pool<VkRenderPass>,
    pub(crate) framebuffers: Pool<VkFramebuffer>,
    pub(crate) shader_modules: Pool<VkShaderModule>,
    pub(crate) vertex_inputs: Pool<VkVertexInput>,
    pub(crate) pipelines: Pool<VkPipeline>,
    pub(crate) fences: Pool<VkFence>,
    pub(crate) semaphores: Pool<VkSemaphore>,
    pub(crate) cmd_lists: Pool<VkCommandList>,

    pub(crate) debug_utils: Option<ash::extensions::ext::DebugUtils>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    destroyed: bool,
}

// Raw Vulkan handles are plain ids; the backend is moved onto the render
// thread once and never shared.
unsafe impl Send for VulkanBackend {}

impl VulkanBackend {
    /// Instance + device init without a surface. `attach_window` upgrades a
    /// headless backend to a presenting one before the render thread starts.
    pub fn new(info: &VulkanBackendInfo) -> Result<Self> {
        let enable_validation = std::env::var("SUMI_VALIDATION")
            .map(|v| v == "1")
            .unwrap_or(false);

        let entry = unsafe { ash::Entry::load() }?;

        let app_name = CString::new(info.app_name.as_str()).unwrap_or_default();
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .api_version(vk::make_api_version(0, 1, 2, 0))
            .build();

        let mut inst_exts = vec![ash::extensions::khr::Surface::name().as_ptr()];
        #[cfg(target_os = "linux")]
        inst_exts.push(ash::extensions::khr::XlibSurface::name().as_ptr());
        #[cfg(target_os = "windows")]
        inst_exts.push(ash::extensions::khr::Win32Surface::name().as_ptr());

        let mut inst_layers = Vec::new();
        if enable_validation {
            inst_exts.push(ash::extensions::ext::DebugUtils::name().as_ptr());
            let available_layers = entry.enumerate_instance_layer_properties()?;
            for &layer in &DEBUG_LAYER_NAMES {
                let name = unsafe { CStr::from_ptr(layer) };
                if available_layers
                    .iter()
                    .any(|prop| unsafe { CStr::from_ptr(prop.layer_name.as_ptr()) == name })
                {
                    inst_layers.push(layer);
                }
            }
        }

        let instance = unsafe {
            entry.create_instance(
                &vk::InstanceCreateInfo::builder()
                    .application_info(&app_info)
                    .enabled_extension_names(&inst_exts)
                    .enabled_layer_names(&inst_layers)
                    .build(),
                None,
            )
        }?;

        let pdevices = unsafe { instance.enumerate_physical_devices()? };
        if info.device_index >= pdevices.len() {
            error!(
                "device index {} out of range ({} devices)",
                info.device_index,
                pdevices.len()
            );
            return Err(GPUError::MissingFeature("requested GPU not present"));
        }
        let pdevice = pdevices[info.device_index];
        let device_prop = unsafe { instance.get_physical_device_properties(pdevice) };
        debug!("selected device: {:?}", unsafe {
            CStr::from_ptr(device_prop.device_name.as_ptr())
        });

        // Queue family selection: one graphics family (doubles as present),
        // plus a dedicated transfer family when the hardware has one.
        let queue_prop = unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
        let mut gfx_family = None;
        let mut transfer_family = None;
        for (idx, prop) in queue_prop.iter().enumerate() {
            if prop.queue_flags.contains(vk::QueueFlags::GRAPHICS) && gfx_family.is_none() {
                gfx_family = Some(idx as u32);
            }
            if prop.queue_flags.contains(vk::QueueFlags::TRANSFER)
                && !prop.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                && transfer_family.is_none()
            {
                transfer_family = Some(idx as u32);
            }
        }
        let gfx_family = gfx_family.ok_or(GPUError::NoQueueFamily("graphics"))?;

        let priorities = [1.0];
        let mut unique_families = vec![gfx_family];
        if let Some(tf) = transfer_family {
            unique_families.push(tf);
        }
        let queue_infos: Vec<_> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let supported = unsafe { instance.get_physical_device_features(pdevice) };
        if supported.multi_draw_indirect != vk::TRUE {
            // No fallback draw path exists; refuse init.
            error!("device lacks multiDrawIndirect");
            return Err(GPUError::MissingFeature("multiDrawIndirect"));
        }
        let features = vk::PhysicalDeviceFeatures::builder()
            .multi_draw_indirect(true)
            .build();

        let device_exts = [ash::extensions::khr::Swapchain::name().as_ptr()];
        let device = unsafe {
            instance.create_device(
                pdevice,
                &vk::DeviceCreateInfo::builder()
                    .queue_create_infos(&queue_infos)
                    .enabled_extension_names(&device_exts)
                    .enabled_features(&features)
                    .build(),
                None,
            )
        }?;

        let gfx_queue = Queue {
            queue: unsafe { device.get_device_queue(gfx_family, 0) },
            family: gfx_family,
        };
        let transfer_queue = transfer_family.map(|family| Queue {
            queue: unsafe { device.get_device_queue(family, 0) },
            family,
        });
        let present_queue = Queue {
            queue: gfx_queue.queue,
            family: gfx_family,
        };

        let allocator =
            vk_mem::Allocator::new(vk_mem::AllocatorCreateInfo::new(&instance, &device, pdevice))?;

        let cmd_pool = unsafe {
            device.create_command_pool(
                &vk::CommandPoolCreateInfo::builder()
                    .queue_family_index(gfx_family)
                    .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
                    .build(),
                None,
            )
        }?;

        let desc_pools = DescriptorPoolTable::new(&device, info.worker_threads.max(1))?;
        let staging = StagingPool::default();

        let (debug_utils, debug_messenger) = if enable_validation {
            let utils = ash::extensions::ext::DebugUtils::new(&entry, &instance);
            (Some(utils), None)
        } else {
            (None, None)
        };

        let mut backend = Self {
            entry,
            instance,
            pdevice,
            device,
            allocator: ManuallyDrop::new(allocator),
            gfx_queue,
            transfer_queue,
            present_queue,
            cmd_pool,
            desc_pools,
            staging,
            display: None,
            swapchain_config: info.swapchain,
            headless_frame: 0,
            headless_sems: Vec::new(),
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
            debug_utils,
            debug_messenger,
            destroyed: false,
        };

        for _ in 0..info.swapchain.image_count {
            let sem = backend.make_semaphore()?;
            backend.headless_sems.push(sem);
        }

        Ok(backend)
    }

    /// Create the surface + swapchain for `window`. Must run on the thread
    /// that owns the window, before the backend moves to the render thread.
    pub fn attach_window(
        &mut self,
        window: &dyn raw_window_handle::HasRawWindowHandle,
    ) -> Result<()> {
        let surface =
            unsafe { ash_window::create_surface(&self.entry, &self.instance, window, None) }?;
        let config = self.swapchain_config;
        let display = Display::new(self, surface, &config)?;
        self.display = Some(display);
        Ok(())
    }

    /// Route descriptor-pool partitioning through the job scheduler's thread
    /// indices instead of the built-in per-thread counter.
    pub fn set_thread_index_source(
        &mut self,
        threads: std::sync::Arc<dyn ThreadIndexSource>,
    ) {
        self.desc_pools.set_thread_source(threads);
    }

    pub(crate) fn set_name<T: vk::Handle + Copy>(&self, obj: T, name: &str, t: vk::ObjectType) {
        if name.is_empty() {
            return;
        }
        if let Some(utils) = &self.debug_utils {
            let name = CString::new(name).unwrap_or_default();
            unsafe {
                let _ = utils.set_debug_utils_object_name(
                    self.device.handle(),
                    &vk::DebugUtilsObjectNameInfoEXT::builder()
                        .object_name(&name)
                        .object_type(t)
                        .object_handle(vk::Handle::as_raw(obj))
                        .build(),
                );
            }
        }
    }

    pub(crate) fn queue(&self, ty: QueueType) -> vk::Queue {
        match ty {
            QueueType::Graphics => self.gfx_queue.queue,
            QueueType::Transfer => self
                .transfer_queue
                .as_ref()
                .unwrap_or(&self.gfx_queue)
                .queue,
            QueueType::Present => self.present_queue.queue,
        }
    }

    /// One-shot command buffer for staging uploads; blocks until complete.
    pub(crate) fn oneshot<F>(&mut self, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let cmd = unsafe {
            self.device.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::builder()
                    .command_pool(self.cmd_pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1)
                    .build(),
            )?[0]
        };
        unsafe {
            self.device.begin_command_buffer(
                cmd,
                &vk::CommandBufferBeginInfo::builder()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
                    .build(),
            )?;
        }

        record(&self.device, cmd);

        unsafe {
            self.device.end_command_buffer(cmd)?;
            let fence = self
                .device
                .create_fence(&vk::FenceCreateInfo::builder().build(), None)?;
            self.device.queue_submit(
                self.gfx_queue.queue,
                &[vk::SubmitInfo::builder().command_buffers(&[cmd]).build()],
                fence,
            )?;
            let res = self.device.wait_for_fences(&[fence], true, u64::MAX);
            self.device.destroy_fence(fence, None);
            self.device.free_command_buffers(self.cmd_pool, &[cmd]);
            res?;
        }
        Ok(())
    }

    /// Immediate layout transition through a one-shot command buffer.
    pub(crate) fn oneshot_transition(
        &mut self,
        image: Handle<Image>,
        new_layout: vk::ImageLayout,
    ) -> Result<()> {
        let (raw, old_layout, aspect, mips, layers) = {
            let img = self
                .images
                .get_ref(retag(image))
                .ok_or(GPUError::StaleHandle("image"))?;
            let aspect = if is_depth_format(img.format) {
                vk::ImageAspectFlags::DEPTH
            } else {
                vk::ImageAspectFlags::COLOR
            };
            (img.img, img.layout, aspect, img.mip_levels, img.layers)
        };

        let device = self.device.clone();
        self.oneshot(move |_, cmd| unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::default(),
                &[],
                &[],
                &[vk::ImageMemoryBarrier::builder()
                    .old_layout(old_layout)
                    .new_layout(new_layout)
                    .image(raw)
                    .subresource_range(
                        vk::ImageSubresourceRange::builder()
                            .aspect_mask(aspect)
                            .base_mip_level(0)
                            .level_count(mips)
                            .base_array_layer(0)
                            .layer_count(layers)
                            .build(),
                    )
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .build()],
            );
        })?;

        if let Some(img) = self.images.get_mut_ref(retag(image)) {
            img.layout = new_layout;
        }
        Ok(())
    }

    pub(crate) fn transition_image(
        &mut self,
        device_cmd: vk::CommandBuffer,
        image: Handle<Image>,
        new_layout: vk::ImageLayout,
        src: (vk::PipelineStageFlags, vk::AccessFlags),
        dst: (vk::PipelineStageFlags, vk::AccessFlags),
    ) {
        let Some(img) = self.images.get_mut_ref(retag(image)) else {
            warn!("transition of stale image handle; skipped");
            return;
        };
        let aspect = if is_depth_format(img.format) {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(img.layout)
            .new_layout(new_layout)
            .src_access_mask(src.1)
            .dst_access_mask(dst.1)
            .image(img.img)
            .subresource_range(
                vk::ImageSubresourceRange::builder()
                    .aspect_mask(aspect)
                    .base_mip_level(0)
                    .level_count(img.mip_levels)
                    .base_array_layer(0)
                    .layer_count(img.layers)
                    .build(),
            )
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .build();
        img.layout = new_layout;
        unsafe {
            self.device.cmd_pipeline_barrier(
                device_cmd,
                src.0,
                dst.0,
                vk::DependencyFlags::default(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    fn headless_acquire(&mut self) -> Result<AcquiredImage> {
        let index = self.headless_frame % self.headless_sems.len().max(1) as u32;
        self.headless_frame = self.headless_frame.wrapping_add(1);
        let ready = self.headless_sems[index as usize];

        // Nothing presents in headless mode, so satisfy waiters with a
        // signal-only submit.
        let raw = self
            .semaphores
            .get_ref(retag(ready))
            .ok_or(GPUError::StaleHandle("semaphore"))?
            .raw;
        unsafe {
            self.device.queue_submit(
                self.gfx_queue.queue,
                &[vk::SubmitInfo::builder()
                    .signal_semaphores(&[raw])
                    .build()],
                vk::Fence::null(),
            )?;
        }
        Ok(AcquiredImage::Valid { index, ready })
    }

    /// Tear down everything. All GPU work must have completed.
    pub fn destroy(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        unsafe {
            let _ = self.device.device_wait_idle();
        }
        if let Some(display) = self.display.take() {
            display.destroy(self);
        }
        self.staging.destroy(&self.device, &mut self.allocator);
        self.desc_pools.destroy(&self.device);

        unsafe {
            self.cmd_lists.drain(|_| {});
            self.semaphores.drain(|s| self.device.destroy_semaphore(s.raw, None));
            self.fences.drain(|f| self.device.destroy_fence(f.raw, None));
            self.pipelines.drain(|p| {
                self.device.destroy_pipeline(p.raw, None);
                self.device.destroy_pipeline_layout(p.layout, None);
            });
            self.shader_modules
                .drain(|m| self.device.destroy_shader_module(m.raw, None));
            self.framebuffers
                .drain(|f| self.device.destroy_framebuffer(f.raw, None));
            self.render_passes
                .drain(|rp| self.device.destroy_render_pass(rp.raw, None));
            self.bind_group_layouts
                .drain(|l| self.device.destroy_descriptor_set_layout(l.layout, None));
            self.samplers.drain(|s| self.device.destroy_sampler(s.raw, None));
            self.image_views
                .drain(|v| self.device.destroy_image_view(v.view, None));

            let allocator = &mut self.allocator;
            self.images.drain(|mut img| {
                if let Some(alloc) = img.alloc.as_mut() {
                    allocator.destroy_image(img.img, alloc);
                }
            });
            self.buffers.drain(|mut buf| {
                allocator.destroy_buffer(buf.buf, &mut buf.alloc);
            });

            self.device.destroy_command_pool(self.cmd_pool, None);
            ManuallyDrop::drop(&mut self.allocator);

            if let (Some(utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger) {
                utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        // The render thread drops the backend when its loop exits.
        self.teardown();
    }
}

impl RenderBackend for VulkanBackend {
    fn factory(&mut self) -> &mut dyn ResourceFactory {
        self
    }

    fn execute(&mut self, submission: &Submission) -> Result<()> {
        sink::encode_and_submit(self, submission)
    }

    fn acquire_next_image(&mut self) -> Result<AcquiredImage> {
        if self.display.is_some() {
            display::acquire(self)
        } else {
            self.headless_acquire()
        }
    }

    fn present(&mut self, info: &PresentInfo) -> Result<()> {
        if self.display.is_some() {
            display::present(self, info)
        } else {
            Ok(())
        }
    }

    fn rebuild_swapchain(&mut self, config: &SwapchainConfig) -> Result<()> {
        self.swapchain_config = *config;
        if self.display.is_some() {
            display::rebuild(self, config)
        } else {
            Ok(())
        }
    }

    fn wait_fence(&mut self, fence: Handle<Fence>) -> Result<()> {
        let raw = self
            .fences
            .get_ref(retag(fence))
            .ok_or(GPUError::StaleHandle("fence"))?
            .raw;
        unsafe {
            self.device.wait_for_fences(&[raw], true, u64::MAX)?;
            self.device.reset_fences(&[raw])?;
        }
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    fn frame_count(&self) -> usize {
        match &self.display {
            Some(d) => d.image_count(),
            None => self.swapchain_config.image_count as usize,
        }
    }

    fn swapchain_views(&self) -> Vec<Handle<ImageView>> {
        match &self.display {
            Some(d) => d.views.clone(),
            None => Vec::new(),
        }
    }

    fn swapchain_extent(&self) -> Extent2D {
        match &self.display {
            Some(d) => d.extent,
            None => self.swapchain_config.extent,
        }
    }
}
