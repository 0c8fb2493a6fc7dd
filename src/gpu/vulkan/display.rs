use ash::vk;
use log::{debug, warn};

use crate::gpu::factory::ResourceFactory;
use crate::gpu::renderer::AcquiredImage;
use crate::gpu::structs::*;
use crate::gpu::types::*;
use crate::gpu::{GPUError, Result};
use crate::utils::Handle;

use super::{retag, VulkanBackend};

/// Surface + swapchain + per-image acquire synchronization. All swapchain
/// images live in the backend's image pool like any other image; the display
/// only owns the native swapchain objects.
pub(crate) struct Display {
    pub(crate) surface: vk::SurfaceKHR,
    pub(crate) surface_loader: ash::extensions::khr::Surface,
    pub(crate) sc_loader: ash::extensions::khr::Swapchain,
    pub(crate) swapchain: vk::SwapchainKHR,
    pub(crate) images: Vec<Handle<Image>>,
    pub(crate) views: Vec<Handle<ImageView>>,
    pub(crate) acquire_sems: Vec<Handle<Semaphore>>,
    pub(crate) sem_idx: usize,
    pub(crate) extent: Extent2D,
}

impl Display {
    pub(crate) fn new(
        backend: &mut VulkanBackend,
        surface: vk::SurfaceKHR,
        config: &SwapchainConfig,
    ) -> Result<Self> {
        let surface_loader =
            ash::extensions::khr::Surface::new(&backend.entry, &backend.instance);
        let sc_loader =
            ash::extensions::khr::Swapchain::new(&backend.instance, &backend.device);

        let supported = unsafe {
            surface_loader.get_physical_device_surface_support(
                backend.pdevice,
                backend.present_queue.family,
                surface,
            )?
        };
        if !supported {
            return Err(GPUError::NoQueueFamily("present"));
        }

        let mut display = Self {
            surface,
            surface_loader,
            sc_loader,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            views: Vec::new(),
            acquire_sems: Vec::new(),
            sem_idx: 0,
            extent: config.extent,
        };
        display.build_swapchain(backend, config)?;
        Ok(display)
    }

    pub(crate) fn image_count(&self) -> usize {
        self.images.len()
    }

    fn build_swapchain(
        &mut self,
        backend: &mut VulkanBackend,
        config: &SwapchainConfig,
    ) -> Result<()> {
        let capabilities = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(backend.pdevice, self.surface)?
        };
        let present_modes = unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(backend.pdevice, self.surface)?
        };

        let mut chosen_extent = vk::Extent2D {
            width: config.extent.width,
            height: config.extent.height,
        };
        if capabilities.current_extent.width != u32::MAX {
            chosen_extent = capabilities.current_extent;
        } else {
            chosen_extent.width = chosen_extent.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            );
            chosen_extent.height = chosen_extent.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            );
        }

        let mut present_mode = super::conversions::lib_to_vk_present_mode(config.present_mode);
        if !present_modes.contains(&present_mode) {
            // FIFO support is mandatory.
            warn!("present mode {present_mode:?} unsupported; falling back to FIFO");
            present_mode = vk::PresentModeKHR::FIFO;
        }

        let wanted_format = vk::Format::B8G8R8A8_UNORM;
        let image_usage = vk::ImageUsageFlags::COLOR_ATTACHMENT
            | vk::ImageUsageFlags::TRANSFER_DST
            | vk::ImageUsageFlags::TRANSFER_SRC;

        let swapchain = unsafe {
            self.sc_loader.create_swapchain(
                &vk::SwapchainCreateInfoKHR::builder()
                    .surface(self.surface)
                    .present_mode(present_mode)
                    .image_format(wanted_format)
                    .image_array_layers(1)
                    .image_color_space(vk::ColorSpaceKHR::SRGB_NONLINEAR)
                    .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .image_extent(chosen_extent)
                    .image_usage(image_usage)
                    .min_image_count(config.image_count.max(capabilities.min_image_count))
                    .pre_transform(capabilities.current_transform)
                    .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
                    .build(),
                None,
            )?
        };
        self.swapchain = swapchain;
        self.extent = Extent2D {
            width: chosen_extent.width,
            height: chosen_extent.height,
        };

        let raw_images = unsafe { self.sc_loader.get_swapchain_images(swapchain)? };
        debug!(
            "swapchain {}x{} with {} images, {present_mode:?}",
            chosen_extent.width,
            chosen_extent.height,
            raw_images.len()
        );

        for raw in raw_images {
            let handle: Handle<Image> = backend
                .images
                .insert(super::VkImage {
                    img: raw,
                    alloc: None,
                    dim: [chosen_extent.width, chosen_extent.height, 1],
                    format: Format::BGRA8Unorm,
                    layers: 1,
                    mip_levels: 1,
                    layout: vk::ImageLayout::UNDEFINED,
                })
                .map(retag)
                .ok_or(GPUError::SlotError("image"))?;

            // Swapchain images start presentable.
            backend.oneshot_transition(handle, vk::ImageLayout::PRESENT_SRC_KHR)?;

            let view = backend.make_image_view(&ImageViewInfo {
                debug_name: "swapchain view",
                image: handle,
                range: Default::default(),
            })?;

            self.images.push(handle);
            self.views.push(view);
            self.acquire_sems.push(backend.make_semaphore()?);
        }
        self.sem_idx = 0;
        Ok(())
    }

    fn teardown_swapchain(&mut self, backend: &mut VulkanBackend) {
        for view in self.views.drain(..) {
            backend.destroy_image_view(view);
        }
        for image in self.images.drain(..) {
            // Swapchain-owned memory; only the pool entry goes away.
            backend.images.release(retag(image));
        }
        for sem in self.acquire_sems.drain(..) {
            backend.destroy_semaphore(sem);
        }
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe { self.sc_loader.destroy_swapchain(self.swapchain, None) };
            self.swapchain = vk::SwapchainKHR::null();
        }
    }

    pub(crate) fn destroy(mut self, backend: &mut VulkanBackend) {
        self.teardown_swapchain(backend);
        unsafe { self.surface_loader.destroy_surface(self.surface, None) };
    }
}

pub(crate) fn acquire(backend: &mut VulkanBackend) -> Result<AcquiredImage> {
    let VulkanBackend {
        display,
        semaphores,
        ..
    } = backend;
    let d = display.as_mut().expect("acquire without a display");

    let ready = d.acquire_sems[d.sem_idx];
    let raw_sem = semaphores
        .get_ref(retag(ready))
        .ok_or(GPUError::StaleHandle("semaphore"))?
        .raw;

    let res = unsafe {
        d.sc_loader.acquire_next_image(
            d.swapchain,
            u64::MAX,
            raw_sem,
            vk::Fence::null(),
        )
    };

    match res {
        Ok((_, true)) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquiredImage::Stale),
        Ok((index, false)) => {
            d.sem_idx = (d.sem_idx + 1) % d.acquire_sems.len();
            Ok(AcquiredImage::Valid { index, ready })
        }
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn present(backend: &mut VulkanBackend, info: &PresentInfo) -> Result<()> {
    let VulkanBackend {
        display,
        semaphores,
        present_queue,
        ..
    } = backend;
    let d = display.as_ref().expect("present without a display");

    let mut raw_wait_sems = Vec::with_capacity(info.wait_sems.len());
    for sem in &info.wait_sems {
        raw_wait_sems.push(
            semaphores
                .get_ref(retag(*sem))
                .ok_or(GPUError::StaleHandle("semaphore"))?
                .raw,
        );
    }

    unsafe {
        d.sc_loader.queue_present(
            present_queue.queue,
            &vk::PresentInfoKHR::builder()
                .image_indices(&[info.image_index])
                .swapchains(&[d.swapchain])
                .wait_semaphores(&raw_wait_sems)
                .build(),
        )?;
    }
    Ok(())
}

pub(crate) fn rebuild(backend: &mut VulkanBackend, config: &SwapchainConfig) -> Result<()> {
    unsafe { backend.device.device_wait_idle()? };

    let mut display = backend.display.take().expect("rebuild without a display");
    display.teardown_swapchain(backend);
    let res = display.build_swapchain(backend, config);
    backend.display = Some(display);
    res
}
