use ash::vk;
use log::warn;
use vk_mem::Alloc;

use crate::gpu::command::CommandList;
use crate::gpu::factory::ResourceFactory;
use crate::gpu::structs::*;
use crate::gpu::types::*;
use crate::gpu::{GPUError, Result};
use crate::utils::Handle;

use super::conversions::*;
use super::staging::StagingPool;
use super::{retag, VulkanBackend};
use super::{
    VkBindGroup, VkBindGroupLayout, VkBuffer, VkCommandList, VkFence, VkFramebuffer, VkImage,
    VkImageView, VkPipeline, VkRenderPass, VkSampler, VkSemaphore, VkShaderModule, VkVertexInput,
};

impl VulkanBackend {
    fn create_image_raw(&mut self, info: &ImageInfo) -> Result<Handle<Image>> {
        let (image, allocation) = unsafe {
            self.allocator.create_image(
                &vk::ImageCreateInfo::builder()
                    .extent(vk::Extent3D {
                        width: info.dim[0],
                        height: info.dim[1],
                        depth: 1,
                    })
                    .array_layers(info.layers)
                    .format(lib_to_vk_format(info.format))
                    .mip_levels(info.mip_levels)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .usage(lib_to_vk_image_usage(info.usage, info.format))
                    .image_type(vk::ImageType::TYPE_2D)
                    .samples(lib_to_vk_sample_count(info.samples))
                    .tiling(vk::ImageTiling::OPTIMAL)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .build(),
                &vk_mem::AllocationCreateInfo {
                    usage: vk_mem::MemoryUsage::Auto,
                    ..Default::default()
                },
            )
        }?;

        self.set_name(image, info.debug_name, vk::ObjectType::IMAGE);

        self.images
            .insert(VkImage {
                img: image,
                alloc: Some(allocation),
                dim: info.dim,
                format: info.format,
                layers: info.layers,
                mip_levels: info.mip_levels,
                layout: vk::ImageLayout::UNDEFINED,
            })
            .map(retag)
            .ok_or(GPUError::SlotError("image"))
    }

    fn upload_image(&mut self, image: Handle<Image>, data: &[u8]) -> Result<()> {
        let mut staging = self.staging.acquire(&self.allocator, data.len() as u32)?;
        StagingPool::write(&self.allocator, &mut staging, data)?;

        let (raw, dim, layers, aspect) = {
            let img = self
                .images
                .get_ref(retag(image))
                .ok_or(GPUError::StaleHandle("image"))?;
            let aspect = if is_depth_format(img.format) {
                vk::ImageAspectFlags::DEPTH
            } else {
                vk::ImageAspectFlags::COLOR
            };
            (img.img, img.dim, img.layers, aspect)
        };

        self.oneshot_transition(image, vk::ImageLayout::TRANSFER_DST_OPTIMAL)?;

        let staging_buf = staging.buf;
        let device = self.device.clone();
        self.oneshot(move |_, cmd| unsafe {
            device.cmd_copy_buffer_to_image(
                cmd,
                staging_buf,
                raw,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[vk::BufferImageCopy {
                    buffer_offset: 0,
                    image_subresource: vk::ImageSubresourceLayers::builder()
                        .aspect_mask(aspect)
                        .mip_level(0)
                        .base_array_layer(0)
                        .layer_count(layers)
                        .build(),
                    image_extent: vk::Extent3D {
                        width: dim[0],
                        height: dim[1],
                        depth: 1,
                    },
                    ..Default::default()
                }],
            );
        })?;

        self.oneshot_transition(image, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)?;
        self.staging.recycle(staging);
        Ok(())
    }
}

impl ResourceFactory for VulkanBackend {
    fn make_buffer(&mut self, info: &BufferInfo) -> Result<Handle<Buffer>> {
        let mappable = info.memory_props.contains(MemoryProps::HOST_VISIBLE);
        let create_info = vk_mem::AllocationCreateInfo {
            usage: if mappable {
                vk_mem::MemoryUsage::AutoPreferHost
            } else {
                vk_mem::MemoryUsage::Auto
            },
            flags: if mappable {
                vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM
            } else {
                vk_mem::AllocationCreateFlags::empty()
            },
            ..Default::default()
        };

        let mut usage = lib_to_vk_buffer_usage(info.usage);
        if info.initial_data.is_some() {
            usage |= vk::BufferUsageFlags::TRANSFER_DST;
        }

        let (buffer, allocation) = unsafe {
            self.allocator.create_buffer(
                &vk::BufferCreateInfo::builder()
                    .size(info.byte_size as u64)
                    .usage(usage)
                    .build(),
                &create_info,
            )
        }?;

        self.set_name(buffer, info.debug_name, vk::ObjectType::BUFFER);

        let handle: Handle<Buffer> = self
            .buffers
            .insert(VkBuffer {
                buf: buffer,
                alloc: allocation,
                size: info.byte_size,
                mapped: false,
            })
            .map(retag)
            .ok_or(GPUError::SlotError("buffer"))?;

        if let Some(data) = info.initial_data {
            let mut staging = self.staging.acquire(&self.allocator, data.len() as u32)?;
            StagingPool::write(&self.allocator, &mut staging, data)?;
            let staging_buf = staging.buf;
            let device = self.device.clone();
            let amount = data.len() as u64;
            self.oneshot(move |_, cmd| unsafe {
                device.cmd_copy_buffer(
                    cmd,
                    staging_buf,
                    buffer,
                    &[vk::BufferCopy {
                        src_offset: 0,
                        dst_offset: 0,
                        size: amount,
                    }],
                );
            })?;
            self.staging.recycle(staging);
        }

        Ok(handle)
    }

    fn destroy_buffer(&mut self, buffer: Handle<Buffer>) {
        match self.buffers.release(retag(buffer)) {
            Some(mut buf) => {
                debug_assert!(!buf.mapped, "destroying a mapped buffer");
                unsafe { self.allocator.destroy_buffer(buf.buf, &mut buf.alloc) };
            }
            None => warn!("destroy of stale buffer handle; skipped"),
        }
    }

    fn map_buffer(&mut self, buffer: Handle<Buffer>) -> Result<*mut u8> {
        let buf = self
            .buffers
            .get_mut_ref(retag(buffer))
            .ok_or(GPUError::StaleHandle("buffer"))?;
        debug_assert!(!buf.mapped, "map_buffer on an already-mapped buffer");
        let ptr = unsafe { self.allocator.map_memory(&mut buf.alloc) }?;
        buf.mapped = true;
        Ok(ptr)
    }

    fn unmap_buffer(&mut self, buffer: Handle<Buffer>) -> Result<()> {
        let buf = self
            .buffers
            .get_mut_ref(retag(buffer))
            .ok_or(GPUError::StaleHandle("buffer"))?;
        debug_assert!(buf.mapped, "unmap_buffer without a matching map_buffer");
        unsafe { self.allocator.unmap_memory(&mut buf.alloc) };
        buf.mapped = false;
        Ok(())
    }

    fn make_image(&mut self, info: &ImageInfo) -> Result<Handle<Image>> {
        let handle = self.create_image_raw(info)?;
        if let Some(data) = info.initial_data {
            self.upload_image(handle, data)?;
        }
        Ok(handle)
    }

    fn allocate_image(&mut self, info: &ImageInfo) -> Result<Handle<Image>> {
        debug_assert!(
            info.initial_data.is_none(),
            "allocate_image binds memory only; use make_image to upload"
        );
        self.create_image_raw(info)
    }

    fn destroy_image(&mut self, image: Handle<Image>) {
        match self.images.release(retag(image)) {
            Some(mut img) => {
                if let Some(alloc) = img.alloc.as_mut() {
                    unsafe { self.allocator.destroy_image(img.img, alloc) };
                }
            }
            None => warn!("destroy of stale image handle; skipped"),
        }
    }

    fn make_image_view(&mut self, info: &ImageViewInfo) -> Result<Handle<ImageView>> {
        let img = self
            .images
            .get_ref(retag(info.image))
            .ok_or(GPUError::StaleHandle("image"))?;
        let aspect = if is_depth_format(img.format) {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        let view = unsafe {
            self.device.create_image_view(
                &vk::ImageViewCreateInfo::builder()
                    .image(img.img)
                    .format(lib_to_vk_format(img.format))
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .subresource_range(
                        vk::ImageSubresourceRange::builder()
                            .aspect_mask(aspect)
                            .base_mip_level(info.range.base_mip)
                            .level_count(info.range.mip_count)
                            .base_array_layer(info.range.base_layer)
                            .layer_count(info.range.layer_count)
                            .build(),
                    )
                    .build(),
                None,
            )
        }?;
        self.set_name(view, info.debug_name, vk::ObjectType::IMAGE_VIEW);

        self.image_views
            .insert(VkImageView {
                view,
                image: info.image,
            })
            .map(retag)
            .ok_or(GPUError::SlotError("image view"))
    }

    fn destroy_image_view(&mut self, view: Handle<ImageView>) {
        match self.image_views.release(retag(view)) {
            Some(v) => unsafe { self.device.destroy_image_view(v.view, None) },
            None => warn!("destroy of stale image view handle; skipped"),
        }
    }

    fn make_sampler(&mut self, info: &SamplerInfo) -> Result<Handle<Sampler>> {
        let sampler = unsafe {
            self.device.create_sampler(
                &vk::SamplerCreateInfo::builder()
                    .min_filter(lib_to_vk_filter(info.min_filter))
                    .mag_filter(lib_to_vk_filter(info.mag_filter))
                    .address_mode_u(lib_to_vk_address_mode(info.address_mode))
                    .address_mode_v(lib_to_vk_address_mode(info.address_mode))
                    .address_mode_w(lib_to_vk_address_mode(info.address_mode))
                    .build(),
                None,
            )
        }?;
        self.set_name(sampler, info.debug_name, vk::ObjectType::SAMPLER);

        self.samplers
            .insert(VkSampler { raw: sampler })
            .map(retag)
            .ok_or(GPUError::SlotError("sampler"))
    }

    fn destroy_sampler(&mut self, sampler: Handle<Sampler>) {
        match self.samplers.release(retag(sampler)) {
            Some(s) => unsafe { self.device.destroy_sampler(s.raw, None) },
            None => warn!("destroy of stale sampler handle; skipped"),
        }
    }

    fn make_bind_group_layout(
        &mut self,
        info: &BindGroupLayoutInfo,
    ) -> Result<Handle<BindGroupLayout>> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = info
            .bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(b.binding)
                    .descriptor_type(lib_to_vk_binding_type(b.ty))
                    .descriptor_count(b.count)
                    .stage_flags(lib_to_vk_shader_stages(b.stages))
                    .build()
            })
            .collect();

        let layout = unsafe {
            self.device.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::builder()
                    .bindings(&bindings)
                    .build(),
                None,
            )
        }?;
        self.set_name(layout, info.debug_name, vk::ObjectType::DESCRIPTOR_SET_LAYOUT);

        self.bind_group_layouts
            .insert(VkBindGroupLayout {
                layout,
                bindings: info
                    .bindings
                    .iter()
                    .map(|b| (b.binding, lib_to_vk_binding_type(b.ty)))
                    .collect(),
            })
            .map(retag)
            .ok_or(GPUError::SlotError("bind group layout"))
    }

    fn destroy_bind_group_layout(&mut self, layout: Handle<BindGroupLayout>) {
        match self.bind_group_layouts.release(retag(layout)) {
            Some(l) => unsafe { self.device.destroy_descriptor_set_layout(l.layout, None) },
            None => warn!("destroy of stale bind group layout handle; skipped"),
        }
    }

    fn make_bind_group(&mut self, info: &BindGroupInfo) -> Result<Handle<BindGroup>> {
        let layout = self
            .bind_group_layouts
            .get_ref(retag(info.layout))
            .ok_or(GPUError::StaleHandle("bind group layout"))?;
        let layout_raw = layout.layout;
        let binding_types = layout.bindings.clone();

        let (set, pool_index) = self.desc_pools.allocate(&self.device, layout_raw)?;
        self.set_name(set, info.debug_name, vk::ObjectType::DESCRIPTOR_SET);

        enum RawInfo {
            Buf([vk::DescriptorBufferInfo; 1]),
            Img([vk::DescriptorImageInfo; 1]),
        }

        let mut raws = Vec::with_capacity(info.bindings.len());
        for b in info.bindings {
            let raw = match b.resource {
                ShaderResource::Buffer(slice) => {
                    let buf = self
                        .buffers
                        .get_ref(retag(slice.buffer))
                        .ok_or(GPUError::StaleHandle("buffer"))?;
                    RawInfo::Buf([vk::DescriptorBufferInfo {
                        buffer: buf.buf,
                        offset: slice.offset as u64,
                        range: slice.size as u64,
                    }])
                }
                ShaderResource::Image(view) => {
                    let v = self
                        .image_views
                        .get_ref(retag(view))
                        .ok_or(GPUError::StaleHandle("image view"))?;
                    RawInfo::Img([vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view: v.view,
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    }])
                }
                ShaderResource::Sampler(sampler) => {
                    let s = self
                        .samplers
                        .get_ref(retag(sampler))
                        .ok_or(GPUError::StaleHandle("sampler"))?;
                    RawInfo::Img([vk::DescriptorImageInfo {
                        sampler: s.raw,
                        image_view: vk::ImageView::null(),
                        image_layout: vk::ImageLayout::UNDEFINED,
                    }])
                }
                ShaderResource::CombinedImageSampler(view, sampler) => {
                    let v = self
                        .image_views
                        .get_ref(retag(view))
                        .ok_or(GPUError::StaleHandle("image view"))?;
                    let s = self
                        .samplers
                        .get_ref(retag(sampler))
                        .ok_or(GPUError::StaleHandle("sampler"))?;
                    RawInfo::Img([vk::DescriptorImageInfo {
                        sampler: s.raw,
                        image_view: v.view,
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    }])
                }
            };
            raws.push(raw);
        }

        let mut writes = Vec::with_capacity(info.bindings.len());
        for (b, raw) in info.bindings.iter().zip(raws.iter()) {
            let ty = binding_types
                .iter()
                .find(|(binding, _)| *binding == b.binding)
                .map(|(_, ty)| *ty)
                .ok_or(GPUError::Recording("binding not present in layout"))?;
            let write = vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(b.binding)
                .descriptor_type(ty);
            let write = match raw {
                RawInfo::Buf(infos) => write.buffer_info(infos),
                RawInfo::Img(infos) => write.image_info(infos),
            };
            writes.push(write.build());
        }

        unsafe { self.device.update_descriptor_sets(&writes, &[]) };

        self.bind_groups
            .insert(VkBindGroup { set, pool_index })
            .map(retag)
            .ok_or(GPUError::SlotError("bind group"))
    }

    fn destroy_bind_group(&mut self, group: Handle<BindGroup>) {
        match self.bind_groups.release(retag(group)) {
            Some(g) => self.desc_pools.free(&self.device, g.set, g.pool_index),
            None => warn!("destroy of stale bind group handle; skipped"),
        }
    }

    fn make_render_pass(&mut self, info: &RenderPassInfo) -> Result<Handle<RenderPass>> {
        let attachments: Vec<vk::AttachmentDescription> = info
            .attachments
            .iter()
            .map(|a| {
                let layout = if is_depth_format(a.format) {
                    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
                } else {
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
                };
                vk::AttachmentDescription::builder()
                    .format(lib_to_vk_format(a.format))
                    .samples(lib_to_vk_sample_count(a.samples))
                    .load_op(lib_to_vk_load_op(a.load_op))
                    .store_op(lib_to_vk_store_op(a.store_op))
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(if a.load_op == LoadOp::Load {
                        layout
                    } else {
                        vk::ImageLayout::UNDEFINED
                    })
                    .final_layout(layout)
                    .build()
            })
            .collect();

        let mut color_refs: Vec<Vec<vk::AttachmentReference>> = Vec::new();
        let mut depth_refs: Vec<Option<vk::AttachmentReference>> = Vec::new();
        for subpass in info.subpasses {
            color_refs.push(
                subpass
                    .color_attachments
                    .iter()
                    .map(|&i| vk::AttachmentReference {
                        attachment: i,
                        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    })
                    .collect(),
            );
            depth_refs.push(subpass.depth_attachment.map(|i| vk::AttachmentReference {
                attachment: i,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            }));
        }

        let subpasses: Vec<vk::SubpassDescription> = info
            .subpasses
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let builder = vk::SubpassDescription::builder()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .color_attachments(&color_refs[i]);
                match &depth_refs[i] {
                    Some(d) => builder.depth_stencil_attachment(d).build(),
                    None => builder.build(),
                }
            })
            .collect();

        // Serialize consecutive subpasses on attachment writes.
        let mut dependencies = Vec::new();
        for i in 1..subpasses.len() as u32 {
            dependencies.push(
                vk::SubpassDependency::builder()
                    .src_subpass(i - 1)
                    .dst_subpass(i)
                    .src_stage_mask(
                        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                    )
                    .src_access_mask(
                        vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                    )
                    .dst_stage_mask(
                        vk::PipelineStageFlags::FRAGMENT_SHADER
                            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                    )
                    .dst_access_mask(
                        vk::AccessFlags::SHADER_READ
                            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
                    )
                    .build(),
            );
        }

        let render_pass = unsafe {
            self.device.create_render_pass(
                &vk::RenderPassCreateInfo::builder()
                    .attachments(&attachments)
                    .subpasses(&subpasses)
                    .dependencies(&dependencies)
                    .build(),
                None,
            )
        }?;
        self.set_name(render_pass, info.debug_name, vk::ObjectType::RENDER_PASS);

        self.render_passes
            .insert(VkRenderPass {
                raw: render_pass,
                subpass_color_counts: info
                    .subpasses
                    .iter()
                    .map(|s| s.color_attachments.len() as u32)
                    .collect(),
            })
            .map(retag)
            .ok_or(GPUError::SlotError("render pass"))
    }

    fn destroy_render_pass(&mut self, render_pass: Handle<RenderPass>) {
        match self.render_passes.release(retag(render_pass)) {
            Some(rp) => unsafe { self.device.destroy_render_pass(rp.raw, None) },
            None => warn!("destroy of stale render pass handle; skipped"),
        }
    }

    fn make_framebuffer(&mut self, info: &FramebufferInfo) -> Result<Handle<Framebuffer>> {
        let rp = self
            .render_passes
            .get_ref(retag(info.render_pass))
            .ok_or(GPUError::StaleHandle("render pass"))?
            .raw;

        let mut views = Vec::with_capacity(info.attachments.len());
        for att in info.attachments {
            views.push(
                self.image_views
                    .get_ref(retag(*att))
                    .ok_or(GPUError::StaleHandle("image view"))?
                    .view,
            );
        }

        let fb = unsafe {
            self.device.create_framebuffer(
                &vk::FramebufferCreateInfo::builder()
                    .render_pass(rp)
                    .attachments(&views)
                    .width(info.extent.width)
                    .height(info.extent.height)
                    .layers(1)
                    .build(),
                None,
            )
        }?;
        self.set_name(fb, info.debug_name, vk::ObjectType::FRAMEBUFFER);

        self.framebuffers
            .insert(VkFramebuffer {
                raw: fb,
                extent: info.extent,
            })
            .map(retag)
            .ok_or(GPUError::SlotError("framebuffer"))
    }

    fn destroy_framebuffer(&mut self, framebuffer: Handle<Framebuffer>) {
        match self.framebuffers.release(retag(framebuffer)) {
            Some(fb) => unsafe { self.device.destroy_framebuffer(fb.raw, None) },
            None => warn!("destroy of stale framebuffer handle; skipped"),
        }
    }

    fn make_shader_module(&mut self, info: &ShaderModuleInfo) -> Result<Handle<ShaderModule>> {
        let spirv = match info.code {
            ShaderCode::Spirv(words) => words,
            ShaderCode::Wgsl(_) => {
                return Err(GPUError::Unimplemented("WGSL on the Vulkan backend"))
            }
        };
        let module = unsafe {
            self.device.create_shader_module(
                &vk::ShaderModuleCreateInfo::builder().code(spirv).build(),
                None,
            )
        }?;
        self.set_name(module, info.debug_name, vk::ObjectType::SHADER_MODULE);

        self.shader_modules
            .insert(VkShaderModule { raw: module })
            .map(retag)
            .ok_or(GPUError::SlotError("shader module"))
    }

    fn destroy_shader_module(&mut self, module: Handle<ShaderModule>) {
        match self.shader_modules.release(retag(module)) {
            Some(m) => unsafe { self.device.destroy_shader_module(m.raw, None) },
            None => warn!("destroy of stale shader module handle; skipped"),
        }
    }

    fn make_vertex_input_state(
        &mut self,
        info: &VertexInputStateInfo,
    ) -> Result<Handle<VertexInputState>> {
        let bindings = info
            .bindings
            .iter()
            .map(|b| {
                vk::VertexInputBindingDescription::builder()
                    .binding(b.binding)
                    .stride(b.stride)
                    .input_rate(match b.rate {
                        VertexRate::Vertex => vk::VertexInputRate::VERTEX,
                        VertexRate::Instance => vk::VertexInputRate::INSTANCE,
                    })
                    .build()
            })
            .collect();
        let attributes = info
            .attributes
            .iter()
            .map(|a| {
                vk::VertexInputAttributeDescription::builder()
                    .location(a.location)
                    .binding(a.binding)
                    .format(lib_to_vk_vertex_format(a.format))
                    .offset(a.offset)
                    .build()
            })
            .collect();

        self.vertex_inputs
            .insert(VkVertexInput {
                bindings,
                attributes,
            })
            .map(retag)
            .ok_or(GPUError::SlotError("vertex input state"))
    }

    fn destroy_vertex_input_state(&mut self, state: Handle<VertexInputState>) {
        if self.vertex_inputs.release(retag(state)).is_none() {
            warn!("destroy of stale vertex input handle; skipped");
        }
    }

    fn make_graphics_pipeline(
        &mut self,
        info: &GraphicsPipelineInfo,
    ) -> Result<Handle<GraphicsPipeline>> {
        let entry = std::ffi::CStr::from_bytes_with_nul(b"main\0").unwrap();

        let mut stages = Vec::with_capacity(2);
        stages.push(
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(
                    self.shader_modules
                        .get_ref(retag(info.vertex_shader))
                        .ok_or(GPUError::StaleHandle("shader module"))?
                        .raw,
                )
                .name(entry)
                .build(),
        );
        if let Some(fs) = info.fragment_shader {
            stages.push(
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(vk::ShaderStageFlags::FRAGMENT)
                    .module(
                        self.shader_modules
                            .get_ref(retag(fs))
                            .ok_or(GPUError::StaleHandle("shader module"))?
                            .raw,
                    )
                    .name(entry)
                    .build(),
            );
        }

        let vertex_input = self
            .vertex_inputs
            .get_ref(retag(info.vertex_input))
            .ok_or(GPUError::StaleHandle("vertex input state"))?;
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&vertex_input.bindings)
            .vertex_attribute_descriptions(&vertex_input.attributes)
            .build();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(lib_to_vk_topology(info.details.topology))
            .primitive_restart_enable(false)
            .build();

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1)
            .build();

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(lib_to_vk_cull_mode(info.details.cull_mode))
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0)
            .build();

        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .build();

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(info.details.depth.test)
            .depth_write_enable(info.details.depth.write)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .build();

        let rp = self
            .render_passes
            .get_ref(retag(info.render_pass))
            .ok_or(GPUError::StaleHandle("render pass"))?;
        let color_count = rp
            .subpass_color_counts
            .get(info.subpass as usize)
            .copied()
            .unwrap_or(1);

        let mut write_mask = vk::ColorComponentFlags::empty();
        let [r, g, b, a] = info.details.color_blend.write_mask_rgba;
        if r {
            write_mask |= vk::ColorComponentFlags::R;
        }
        if g {
            write_mask |= vk::ColorComponentFlags::G;
        }
        if b {
            write_mask |= vk::ColorComponentFlags::B;
        }
        if a {
            write_mask |= vk::ColorComponentFlags::A;
        }
        let blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(info.details.color_blend.blend_enable)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(write_mask)
            .build();
        let blend_attachments = vec![blend_attachment; color_count as usize];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::builder()
            .attachments(&blend_attachments)
            .build();

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder()
            .dynamic_states(&dynamic_states)
            .build();

        let mut set_layouts = Vec::with_capacity(info.bind_group_layouts.len());
        for l in info.bind_group_layouts {
            set_layouts.push(
                self.bind_group_layouts
                    .get_ref(retag(*l))
                    .ok_or(GPUError::StaleHandle("bind group layout"))?
                    .layout,
            );
        }
        let layout = unsafe {
            self.device.create_pipeline_layout(
                &vk::PipelineLayoutCreateInfo::builder()
                    .set_layouts(&set_layouts)
                    .build(),
                None,
            )
        }?;

        let rp_raw = rp.raw;
        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(rp_raw)
            .subpass(info.subpass)
            .build();

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, e)| e)
        }?;
        self.set_name(pipelines[0], info.debug_name, vk::ObjectType::PIPELINE);

        self.pipelines
            .insert(VkPipeline {
                raw: pipelines[0],
                layout,
            })
            .map(retag)
            .ok_or(GPUError::SlotError("graphics pipeline"))
    }

    fn destroy_graphics_pipeline(&mut self, pipeline: Handle<GraphicsPipeline>) {
        match self.pipelines.release(retag(pipeline)) {
            Some(p) => unsafe {
                self.device.destroy_pipeline(p.raw, None);
                self.device.destroy_pipeline_layout(p.layout, None);
            },
            None => warn!("destroy of stale pipeline handle; skipped"),
        }
    }

    fn make_semaphore(&mut self) -> Result<Handle<Semaphore>> {
        let raw = unsafe {
            self.device
                .create_semaphore(&vk::SemaphoreCreateInfo::builder().build(), None)
        }?;
        self.semaphores
            .insert(VkSemaphore { raw })
            .map(retag)
            .ok_or(GPUError::SlotError("semaphore"))
    }

    fn destroy_semaphore(&mut self, semaphore: Handle<Semaphore>) {
        match self.semaphores.release(retag(semaphore)) {
            Some(s) => unsafe { self.device.destroy_semaphore(s.raw, None) },
            None => warn!("destroy of stale semaphore handle; skipped"),
        }
    }

    fn make_fence(&mut self) -> Result<Handle<Fence>> {
        // Fences gate frame-slot reuse, so they start signaled.
        let raw = unsafe {
            self.device.create_fence(
                &vk::FenceCreateInfo::builder()
                    .flags(vk::FenceCreateFlags::SIGNALED)
                    .build(),
                None,
            )
        }?;
        self.fences
            .insert(VkFence { raw })
            .map(retag)
            .ok_or(GPUError::SlotError("fence"))
    }

    fn destroy_fence(&mut self, fence: Handle<Fence>) {
        match self.fences.release(retag(fence)) {
            Some(f) => unsafe { self.device.destroy_fence(f.raw, None) },
            None => warn!("destroy of stale fence handle; skipped"),
        }
    }

    fn make_command_list(&mut self, info: &CommandListInfo) -> Result<CommandList> {
        let cmd_buf = unsafe {
            self.device.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::builder()
                    .command_pool(self.cmd_pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1)
                    .build(),
            )?[0]
        };
        self.set_name(cmd_buf, info.debug_name, vk::ObjectType::COMMAND_BUFFER);

        let handle = self
            .cmd_lists
            .insert(VkCommandList { cmd_buf })
            .map(retag)
            .ok_or(GPUError::SlotError("command list"))?;
        Ok(CommandList::new(handle, info.queue_type, info.debug_name))
    }

    fn destroy_command_list(&mut self, list: CommandList) {
        match self.cmd_lists.release(retag(list.handle())) {
            Some(l) => unsafe {
                self.device.free_command_buffers(self.cmd_pool, &[l.cmd_buf]);
            },
            None => warn!("destroy of stale command list handle; skipped"),
        }
    }
}
