use std::num::NonZeroU64;

use log::warn;

use crate::gpu::command::CommandList;
use crate::gpu::factory::ResourceFactory;
use crate::gpu::structs::*;
use crate::gpu::types::*;
use crate::gpu::{GPUError, Result};
use crate::utils::Handle;

use super::conversions::*;
use super::sync::CountingSemaphore;
use super::{retag, WgpuBackend};
use super::{
    WgBindGroup, WgBindGroupLayout, WgBuffer, WgCommandList, WgFence, WgFramebuffer, WgImage,
    WgImageView, WgPipeline, WgRenderPass, WgSampler, WgShaderModule, WgVertexInput,
};

impl ResourceFactory for WgpuBackend {
    fn make_buffer(&mut self, info: &BufferInfo) -> Result<Handle<Buffer>> {
        let mut usage = lib_to_wgpu_buffer_usage(info.usage);
        let host_visible = info.memory_props.contains(MemoryProps::HOST_VISIBLE);
        if host_visible || info.initial_data.is_some() {
            usage |= wgpu::BufferUsages::COPY_DST;
        }

        let raw = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(info.debug_name),
            size: info.byte_size as u64,
            usage,
            mapped_at_creation: false,
        });

        if let Some(data) = info.initial_data {
            self.queue.write_buffer(&raw, 0, data);
        }

        self.buffers
            .insert(WgBuffer {
                raw,
                size: info.byte_size,
                shadow: if host_visible {
                    Some(vec![0u8; info.byte_size as usize].into_boxed_slice())
                } else {
                    None
                },
                mapped: false,
            })
            .map(retag)
            .ok_or(GPUError::SlotError("buffer"))
    }

    fn destroy_buffer(&mut self, buffer: Handle<Buffer>) {
        match self.buffers.release(retag(buffer)) {
            Some(buf) => {
                debug_assert!(!buf.mapped, "destroying a mapped buffer");
                buf.raw.destroy();
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
        let shadow = buf
            .shadow
            .as_mut()
            .ok_or(GPUError::Allocation("buffer is not host-visible"))?;
        buf.mapped = true;
        Ok(shadow.as_mut_ptr())
    }

    fn unmap_buffer(&mut self, buffer: Handle<Buffer>) -> Result<()> {
        let buf = self
            .buffers
            .get_mut_ref(retag(buffer))
            .ok_or(GPUError::StaleHandle("buffer"))?;
        debug_assert!(buf.mapped, "unmap_buffer without a matching map_buffer");
        buf.mapped = false;
        // Flush the shadow through the implicit queue.
        if let Some(shadow) = &buf.shadow {
            self.queue.write_buffer(&buf.raw, 0, shadow);
        }
        Ok(())
    }

    fn make_image(&mut self, info: &ImageInfo) -> Result<Handle<Image>> {
        let tex = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(info.debug_name),
            size: wgpu::Extent3d {
                width: info.dim[0],
                height: info.dim[1],
                depth_or_array_layers: info.layers,
            },
            mip_level_count: info.mip_levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: lib_to_wgpu_format(info.format),
            usage: lib_to_wgpu_image_usage(info.usage, info.format)
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        if let Some(data) = info.initial_data {
            self.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &tex,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                data,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_pixel(info.format) * info.dim[0]),
                    rows_per_image: Some(info.dim[1]),
                },
                wgpu::Extent3d {
                    width: info.dim[0],
                    height: info.dim[1],
                    depth_or_array_layers: info.layers,
                },
            );
        }

        self.images
            .insert(WgImage {
                tex,
                format: info.format,
                dim: info.dim,
            })
            .map(retag)
            .ok_or(GPUError::SlotError("image"))
    }

    fn allocate_image(&mut self, info: &ImageInfo) -> Result<Handle<Image>> {
        debug_assert!(
            info.initial_data.is_none(),
            "allocate_image binds memory only; use make_image to upload"
        );
        // The implicit API binds memory at creation either way.
        self.make_image(info)
    }

    fn destroy_image(&mut self, image: Handle<Image>) {
        match self.images.release(retag(image)) {
            Some(img) => img.tex.destroy(),
            None => warn!("destroy of stale image handle; skipped"),
        }
    }

    fn make_image_view(&mut self, info: &ImageViewInfo) -> Result<Handle<ImageView>> {
        let img = self
            .images
            .get_ref(retag(info.image))
            .ok_or(GPUError::StaleHandle("image"))?;
        let view = img.tex.create_view(&wgpu::TextureViewDescriptor {
            label: Some(info.debug_name),
            base_mip_level: info.range.base_mip,
            mip_level_count: Some(info.range.mip_count),
            base_array_layer: info.range.base_layer,
            array_layer_count: Some(info.range.layer_count),
            ..Default::default()
        });

        self.image_views
            .insert(WgImageView::Texture {
                view,
                image: info.image,
            })
            .map(retag)
            .ok_or(GPUError::SlotError("image view"))
    }

    fn destroy_image_view(&mut self, view: Handle<ImageView>) {
        if self.image_views.release(retag(view)).is_none() {
            warn!("destroy of stale image view handle; skipped");
        }
    }

    fn make_sampler(&mut self, info: &SamplerInfo) -> Result<Handle<Sampler>> {
        let raw = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(info.debug_name),
            address_mode_u: lib_to_wgpu_address_mode(info.address_mode),
            address_mode_v: lib_to_wgpu_address_mode(info.address_mode),
            address_mode_w: lib_to_wgpu_address_mode(info.address_mode),
            mag_filter: lib_to_wgpu_filter(info.mag_filter),
            min_filter: lib_to_wgpu_filter(info.min_filter),
            ..Default::default()
        });

        self.samplers
            .insert(WgSampler { raw })
            .map(retag)
            .ok_or(GPUError::SlotError("sampler"))
    }

    fn destroy_sampler(&mut self, sampler: Handle<Sampler>) {
        if self.samplers.release(retag(sampler)).is_none() {
            warn!("destroy of stale sampler handle; skipped");
        }
    }

    fn make_bind_group_layout(
        &mut self,
        info: &BindGroupLayoutInfo,
    ) -> Result<Handle<BindGroupLayout>> {
        let entries: Vec<wgpu::BindGroupLayoutEntry> = info
            .bindings
            .iter()
            .map(|b| wgpu::BindGroupLayoutEntry {
                binding: b.binding,
                visibility: lib_to_wgpu_shader_stages(b.stages),
                ty: match b.ty {
                    BindingType::UniformBuffer => wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    BindingType::DynamicUniformBuffer => wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: None,
                    },
                    BindingType::StorageBuffer => wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    BindingType::SampledImage => wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    BindingType::Sampler => {
                        wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)
                    }
                    // No combined image samplers in WebGPU; callers split
                    // them into a texture and a sampler binding.
                    BindingType::CombinedImageSampler => wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                },
                count: None,
            })
            .collect();

        let raw = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(info.debug_name),
                entries: &entries,
            });

        self.bind_group_layouts
            .insert(WgBindGroupLayout { raw })
            .map(retag)
            .ok_or(GPUError::SlotError("bind group layout"))
    }

    fn destroy_bind_group_layout(&mut self, layout: Handle<BindGroupLayout>) {
        if self.bind_group_layouts.release(retag(layout)).is_none() {
            warn!("destroy of stale bind group layout handle; skipped");
        }
    }

    fn make_bind_group(&mut self, info: &BindGroupInfo) -> Result<Handle<BindGroup>> {
        let layout = self
            .bind_group_layouts
            .get_ref(retag(info.layout))
            .ok_or(GPUError::StaleHandle("bind group layout"))?;

        let mut entries = Vec::with_capacity(info.bindings.len());
        for b in info.bindings {
            let resource = match b.resource {
                ShaderResource::Buffer(slice) => {
                    let buf = self
                        .buffers
                        .get_ref(retag(slice.buffer))
                        .ok_or(GPUError::StaleHandle("buffer"))?;
                    wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &buf.raw,
                        offset: slice.offset as u64,
                        size: NonZeroU64::new(slice.size as u64),
                    })
                }
                ShaderResource::Image(view) | ShaderResource::CombinedImageSampler(view, _) => {
                    match self
                        .image_views
                        .get_ref(retag(view))
                        .ok_or(GPUError::StaleHandle("image view"))?
                    {
                        WgImageView::Texture { view, .. } => {
                            wgpu::BindingResource::TextureView(view)
                        }
                        WgImageView::Swapchain => {
                            return Err(GPUError::Recording(
                                "swapchain views cannot be bound as shader resources",
                            ))
                        }
                    }
                }
                ShaderResource::Sampler(sampler) => wgpu::BindingResource::Sampler(
                    &self
                        .samplers
                        .get_ref(retag(sampler))
                        .ok_or(GPUError::StaleHandle("sampler"))?
                        .raw,
                ),
            };
            entries.push(wgpu::BindGroupEntry {
                binding: b.binding,
                resource,
            });
        }

        let raw = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(info.debug_name),
            layout: &layout.raw,
            entries: &entries,
        });

        self.bind_groups
            .insert(WgBindGroup { raw })
            .map(retag)
            .ok_or(GPUError::SlotError("bind group"))
    }

    fn destroy_bind_group(&mut self, group: Handle<BindGroup>) {
        if self.bind_groups.release(retag(group)).is_none() {
            warn!("destroy of stale bind group handle; skipped");
        }
    }

    fn make_render_pass(&mut self, info: &RenderPassInfo) -> Result<Handle<RenderPass>> {
        self.render_passes
            .insert(WgRenderPass {
                attachments: info.attachments.to_vec(),
                subpass_colors: info
                    .subpasses
                    .iter()
                    .map(|s| s.color_attachments.to_vec())
                    .collect(),
                subpass_depth: info.subpasses.iter().map(|s| s.depth_attachment).collect(),
            })
            .map(retag)
            .ok_or(GPUError::SlotError("render pass"))
    }

    fn destroy_render_pass(&mut self, render_pass: Handle<RenderPass>) {
        if self.render_passes.release(retag(render_pass)).is_none() {
            warn!("destroy of stale render pass handle; skipped");
        }
    }

    fn make_framebuffer(&mut self, info: &FramebufferInfo) -> Result<Handle<Framebuffer>> {
        self.framebuffers
            .insert(WgFramebuffer {
                attachments: info.attachments.to_vec(),
            })
            .map(retag)
            .ok_or(GPUError::SlotError("framebuffer"))
    }

    fn destroy_framebuffer(&mut self, framebuffer: Handle<Framebuffer>) {
        if self.framebuffers.release(retag(framebuffer)).is_none() {
            warn!("destroy of stale framebuffer handle; skipped");
        }
    }

    fn make_shader_module(&mut self, info: &ShaderModuleInfo) -> Result<Handle<ShaderModule>> {
        let source = match info.code {
            ShaderCode::Wgsl(src) => wgpu::ShaderSource::Wgsl(src.into()),
            ShaderCode::Spirv(_) => {
                return Err(GPUError::Unimplemented("SPIR-V on the wgpu backend"))
            }
        };
        let raw = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(info.debug_name),
                source,
            });

        self.shader_modules
            .insert(WgShaderModule { raw })
            .map(retag)
            .ok_or(GPUError::SlotError("shader module"))
    }

    fn destroy_shader_module(&mut self, module: Handle<ShaderModule>) {
        if self.shader_modules.release(retag(module)).is_none() {
            warn!("destroy of stale shader module handle; skipped");
        }
    }

    fn make_vertex_input_state(
        &mut self,
        info: &VertexInputStateInfo,
    ) -> Result<Handle<VertexInputState>> {
        self.vertex_inputs
            .insert(WgVertexInput {
                bindings: info.bindings.to_vec(),
                attributes: info.attributes.to_vec(),
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
        let rp = self
            .render_passes
            .get_ref(retag(info.render_pass))
            .ok_or(GPUError::StaleHandle("render pass"))?;
        let colors = rp
            .subpass_colors
            .get(info.subpass as usize)
            .ok_or(GPUError::Recording("pipeline subpass out of range"))?;
        let depth = rp
            .subpass_depth
            .get(info.subpass as usize)
            .copied()
            .flatten();

        let blend = if info.details.color_blend.blend_enable {
            Some(wgpu::BlendState::ALPHA_BLENDING)
        } else {
            None
        };
        let mut write_mask = wgpu::ColorWrites::empty();
        let [r, g, b, a] = info.details.color_blend.write_mask_rgba;
        if r {
            write_mask |= wgpu::ColorWrites::RED;
        }
        if g {
            write_mask |= wgpu::ColorWrites::GREEN;
        }
        if b {
            write_mask |= wgpu::ColorWrites::BLUE;
        }
        if a {
            write_mask |= wgpu::ColorWrites::ALPHA;
        }

        let targets: Vec<Option<wgpu::ColorTargetState>> = colors
            .iter()
            .map(|&i| {
                Some(wgpu::ColorTargetState {
                    format: lib_to_wgpu_format(rp.attachments[i as usize].format),
                    blend,
                    write_mask,
                })
            })
            .collect();

        let depth_stencil = depth.map(|i| wgpu::DepthStencilState {
            format: lib_to_wgpu_format(rp.attachments[i as usize].format),
            depth_write_enabled: info.details.depth.write,
            depth_compare: if info.details.depth.test {
                wgpu::CompareFunction::LessEqual
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        let vertex_input = self
            .vertex_inputs
            .get_ref(retag(info.vertex_input))
            .ok_or(GPUError::StaleHandle("vertex input state"))?;
        let mut attribute_storage: Vec<Vec<wgpu::VertexAttribute>> = Vec::new();
        for binding in &vertex_input.bindings {
            attribute_storage.push(
                vertex_input
                    .attributes
                    .iter()
                    .filter(|a| a.binding == binding.binding)
                    .map(|a| wgpu::VertexAttribute {
                        format: lib_to_wgpu_vertex_format(a.format),
                        offset: a.offset as u64,
                        shader_location: a.location,
                    })
                    .collect(),
            );
        }
        let buffers: Vec<wgpu::VertexBufferLayout> = vertex_input
            .bindings
            .iter()
            .enumerate()
            .map(|(i, b)| wgpu::VertexBufferLayout {
                array_stride: b.stride as u64,
                step_mode: match b.rate {
                    VertexRate::Vertex => wgpu::VertexStepMode::Vertex,
                    VertexRate::Instance => wgpu::VertexStepMode::Instance,
                },
                attributes: &attribute_storage[i],
            })
            .collect();

        let mut layouts = Vec::with_capacity(info.bind_group_layouts.len());
        for l in info.bind_group_layouts {
            layouts.push(
                &self
                    .bind_group_layouts
                    .get_ref(retag(*l))
                    .ok_or(GPUError::StaleHandle("bind group layout"))?
                    .raw,
            );
        }
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(info.debug_name),
                bind_group_layouts: &layouts,
                push_constant_ranges: &[],
            });

        let vs = &self
            .shader_modules
            .get_ref(retag(info.vertex_shader))
            .ok_or(GPUError::StaleHandle("shader module"))?
            .raw;
        let fs = match info.fragment_shader {
            Some(h) => Some(
                &self
                    .shader_modules
                    .get_ref(retag(h))
                    .ok_or(GPUError::StaleHandle("shader module"))?
                    .raw,
            ),
            None => None,
        };

        let raw = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(info.debug_name),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: vs,
                    entry_point: "vs_main",
                    compilation_options: Default::default(),
                    buffers: &buffers,
                },
                primitive: wgpu::PrimitiveState {
                    topology: lib_to_wgpu_topology(info.details.topology),
                    cull_mode: lib_to_wgpu_cull_mode(info.details.cull_mode),
                    front_face: wgpu::FrontFace::Ccw,
                    ..Default::default()
                },
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                fragment: fs.map(|module| wgpu::FragmentState {
                    module,
                    entry_point: "fs_main",
                    compilation_options: Default::default(),
                    targets: &targets,
                }),
                multiview: None,
            });

        self.pipelines
            .insert(WgPipeline { raw })
            .map(retag)
            .ok_or(GPUError::SlotError("graphics pipeline"))
    }

    fn destroy_graphics_pipeline(&mut self, pipeline: Handle<GraphicsPipeline>) {
        if self.pipelines.release(retag(pipeline)).is_none() {
            warn!("destroy of stale pipeline handle; skipped");
        }
    }

    fn make_semaphore(&mut self) -> Result<Handle<Semaphore>> {
        self.semaphores
            .insert(CountingSemaphore::new())
            .map(retag)
            .ok_or(GPUError::SlotError("semaphore"))
    }

    fn destroy_semaphore(&mut self, semaphore: Handle<Semaphore>) {
        if self.semaphores.release(retag(semaphore)).is_none() {
            warn!("destroy of stale semaphore handle; skipped");
        }
    }

    fn make_fence(&mut self) -> Result<Handle<Fence>> {
        // No pending submission: a fresh fence reads as signaled, matching
        // the explicit backend's signaled-at-creation contract.
        self.fences
            .insert(WgFence { pending: None })
            .map(retag)
            .ok_or(GPUError::SlotError("fence"))
    }

    fn destroy_fence(&mut self, fence: Handle<Fence>) {
        if self.fences.release(retag(fence)).is_none() {
            warn!("destroy of stale fence handle; skipped");
        }
    }

    fn make_command_list(&mut self, info: &CommandListInfo) -> Result<CommandList> {
        let handle = self
            .cmd_lists
            .insert(WgCommandList)
            .map(retag)
            .ok_or(GPUError::SlotError("command list"))?;
        Ok(CommandList::new(handle, info.queue_type, info.debug_name))
    }

    fn destroy_command_list(&mut self, list: CommandList) {
        if self.cmd_lists.release(retag(list.handle())).is_none() {
            warn!("destroy of stale command list handle; skipped");
        }
    }
}
