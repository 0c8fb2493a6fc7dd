use ash::vk;
use log::warn;

use crate::gpu::command::*;
use crate::gpu::types::*;
use crate::gpu::{GPUError, Result};
use crate::utils::Handle;

use super::conversions::*;
use super::{retag, VulkanBackend};

/// Encode a recorded op snapshot into the submission's native command buffer
/// and submit it with the requested semaphores/fence. The native buffer is
/// re-encoded on every execute; identity (and thus pool residency) is stable.
pub(crate) fn encode_and_submit(
    backend: &mut VulkanBackend,
    submission: &Submission,
) -> Result<()> {
    let cmd_buf = backend
        .cmd_lists
        .get_ref(retag(submission.list))
        .ok_or(GPUError::StaleHandle("command list"))?
        .cmd_buf;

    unsafe {
        backend
            .device
            .reset_command_buffer(cmd_buf, vk::CommandBufferResetFlags::empty())?;
        backend.device.begin_command_buffer(
            cmd_buf,
            &vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
                .build(),
        )?;
    }

    {
        let mut encoder = VulkanEncoder {
            backend,
            cmd: cmd_buf,
            pipeline_layout: None,
        };
        replay_ops(&submission.ops, &mut encoder);
    }

    unsafe { backend.device.end_command_buffer(cmd_buf)? };

    let mut raw_wait = Vec::with_capacity(submission.wait_sems.len());
    for sem in &submission.wait_sems {
        raw_wait.push(
            backend
                .semaphores
                .get_ref(retag(*sem))
                .ok_or(GPUError::StaleHandle("semaphore"))?
                .raw,
        );
    }
    let mut raw_signal = Vec::with_capacity(submission.signal_sems.len());
    for sem in &submission.signal_sems {
        raw_signal.push(
            backend
                .semaphores
                .get_ref(retag(*sem))
                .ok_or(GPUError::StaleHandle("semaphore"))?
                .raw,
        );
    }
    let fence = match submission.fence {
        Some(f) => {
            backend
                .fences
                .get_ref(retag(f))
                .ok_or(GPUError::StaleHandle("fence"))?
                .raw
        }
        None => vk::Fence::null(),
    };

    let stage_masks = vec![vk::PipelineStageFlags::ALL_COMMANDS; raw_wait.len()];
    let queue = backend.queue(submission.queue_type);
    unsafe {
        backend.device.queue_submit(
            queue,
            &[vk::SubmitInfo::builder()
                .command_buffers(&[cmd_buf])
                .wait_semaphores(&raw_wait)
                .wait_dst_stage_mask(&stage_masks)
                .signal_semaphores(&raw_signal)
                .build()],
            fence,
        )?;
    }
    Ok(())
}

struct VulkanEncoder<'a> {
    backend: &'a mut VulkanBackend,
    cmd: vk::CommandBuffer,
    pipeline_layout: Option<vk::PipelineLayout>,
}

impl<'a> VulkanEncoder<'a> {
    fn buffer_raw(&self, slice: BufferSlice) -> Option<vk::Buffer> {
        let buf = self.backend.buffers.get_ref(retag(slice.buffer));
        if buf.is_none() {
            warn!("stale buffer handle in command stream; op skipped");
        }
        buf.map(|b| b.buf)
    }
}

impl<'a> CommandSink for VulkanEncoder<'a> {
    fn begin_render_pass(&mut self, op: &BeginRenderPassOp) {
        let Some(rp) = self.backend.render_passes.get_ref(retag(op.render_pass)) else {
            warn!("stale render pass in command stream; op skipped");
            return;
        };
        let Some(fb) = self.backend.framebuffers.get_ref(retag(op.framebuffer)) else {
            warn!("stale framebuffer in command stream; op skipped");
            return;
        };

        let clear_values: Vec<vk::ClearValue> =
            op.clear_values.iter().map(lib_to_vk_clear_value).collect();

        unsafe {
            self.backend.device.cmd_begin_render_pass(
                self.cmd,
                &vk::RenderPassBeginInfo::builder()
                    .render_pass(rp.raw)
                    .framebuffer(fb.raw)
                    .render_area(convert_rect2d_to_vulkan(op.render_area))
                    .clear_values(&clear_values)
                    .build(),
                vk::SubpassContents::INLINE,
            );
        }
    }

    fn next_subpass(&mut self) {
        unsafe {
            self.backend
                .device
                .cmd_next_subpass(self.cmd, vk::SubpassContents::INLINE);
        }
    }

    fn end_render_pass(&mut self) {
        unsafe { self.backend.device.cmd_end_render_pass(self.cmd) };
    }

    fn bind_pipeline(&mut self, pipeline: Handle<GraphicsPipeline>) {
        let Some(p) = self.backend.pipelines.get_ref(retag(pipeline)) else {
            warn!("stale pipeline in command stream; op skipped");
            return;
        };
        self.pipeline_layout = Some(p.layout);
        unsafe {
            self.backend.device.cmd_bind_pipeline(
                self.cmd,
                vk::PipelineBindPoint::GRAPHICS,
                p.raw,
            );
        }
    }

    fn bind_bind_group(&mut self, op: &BindBindGroupOp) {
        let Some(layout) = self.pipeline_layout else {
            debug_assert!(false, "bind group bound before a pipeline");
            return;
        };
        let Some(group) = self.backend.bind_groups.get_ref(retag(op.group)) else {
            warn!("stale bind group in command stream; op skipped");
            return;
        };
        let offsets: &[u32] = match &op.dynamic_offset {
            Some(o) => std::slice::from_ref(o),
            None => &[],
        };
        unsafe {
            self.backend.device.cmd_bind_descriptor_sets(
                self.cmd,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                op.slot,
                &[group.set],
                offsets,
            );
        }
    }

    fn bind_vertex_buffer(&mut self, slice: BufferSlice) {
        let Some(buf) = self.buffer_raw(slice) else { return };
        unsafe {
            self.backend.device.cmd_bind_vertex_buffers(
                self.cmd,
                0,
                &[buf],
                &[slice.offset as u64],
            );
        }
    }

    fn bind_index_buffer(&mut self, slice: BufferSlice, ty: IndexType) {
        let Some(buf) = self.buffer_raw(slice) else { return };
        unsafe {
            self.backend.device.cmd_bind_index_buffer(
                self.cmd,
                buf,
                slice.offset as u64,
                lib_to_vk_index_type(ty),
            );
        }
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        unsafe {
            self.backend.device.cmd_set_viewport(
                self.cmd,
                0,
                &[vk::Viewport {
                    x: viewport.x,
                    y: viewport.y,
                    width: viewport.w,
                    height: viewport.h,
                    min_depth: viewport.min_depth,
                    max_depth: viewport.max_depth,
                }],
            );
        }
    }

    fn set_scissor(&mut self, rect: Rect2D) {
        unsafe {
            self.backend
                .device
                .cmd_set_scissor(self.cmd, 0, &[convert_rect2d_to_vulkan(rect)]);
        }
    }

    fn draw(&mut self, op: &DrawOp) {
        unsafe {
            self.backend.device.cmd_draw(
                self.cmd,
                op.vertex_count,
                op.instance_count,
                op.first_vertex,
                op.first_instance,
            );
        }
    }

    fn draw_indexed(&mut self, op: &DrawIndexedOp) {
        unsafe {
            self.backend.device.cmd_draw_indexed(
                self.cmd,
                op.index_count,
                op.instance_count,
                op.first_index,
                op.vertex_offset,
                op.first_instance,
            );
        }
    }

    fn draw_indirect(&mut self, op: &DrawIndirectOp) {
        let Some(buf) = self.buffer_raw(op.buffer) else { return };
        unsafe {
            self.backend.device.cmd_draw_indirect(
                self.cmd,
                buf,
                op.buffer.offset as u64,
                op.draw_count,
                op.stride,
            );
        }
    }

    fn draw_indexed_indirect(&mut self, op: &DrawIndirectOp) {
        let Some(buf) = self.buffer_raw(op.buffer) else { return };
        unsafe {
            self.backend.device.cmd_draw_indexed_indirect(
                self.cmd,
                buf,
                op.buffer.offset as u64,
                op.draw_count,
                op.stride,
            );
        }
    }

    fn update_buffer(&mut self, dst: BufferSlice, data: &[u8]) {
        debug_assert!(data.len() <= 65536, "update_buffer payload too large");
        debug_assert_eq!(data.len() % 4, 0, "update_buffer payload not 4-byte aligned");
        let Some(buf) = self.buffer_raw(dst) else { return };
        unsafe {
            self.backend
                .device
                .cmd_update_buffer(self.cmd, buf, dst.offset as u64, data);
        }
    }

    fn copy_buffer(&mut self, op: &CopyBufferOp) {
        let (Some(src), Some(dst)) = (self.buffer_raw(op.src), self.buffer_raw(op.dst)) else {
            return;
        };
        unsafe {
            self.backend.device.cmd_copy_buffer(
                self.cmd,
                src,
                dst,
                &[vk::BufferCopy {
                    src_offset: op.src.offset as u64,
                    dst_offset: op.dst.offset as u64,
                    size: op.src.size.min(op.dst.size) as u64,
                }],
            );
        }
    }

    fn copy_buffer_to_image(&mut self, op: &CopyBufferImageOp) {
        let Some(src) = self.buffer_raw(op.src) else { return };
        let Some(img) = self.backend.images.get_ref(retag(op.dst)) else {
            warn!("stale image in command stream; op skipped");
            return;
        };
        let (raw, dim, old_layout, aspect) = (
            img.img,
            img.dim,
            img.layout,
            if is_depth_format(img.format) {
                vk::ImageAspectFlags::DEPTH
            } else {
                vk::ImageAspectFlags::COLOR
            },
        );

        self.backend.transition_image(
            self.cmd,
            op.dst,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            (vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::NONE),
            (
                vk::PipelineStageFlags::TRANSFER,
                vk::AccessFlags::TRANSFER_WRITE,
            ),
        );
        unsafe {
            self.backend.device.cmd_copy_buffer_to_image(
                self.cmd,
                src,
                raw,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[vk::BufferImageCopy {
                    buffer_offset: op.src.offset as u64,
                    image_subresource: vk::ImageSubresourceLayers::builder()
                        .aspect_mask(aspect)
                        .mip_level(op.range.base_mip)
                        .base_array_layer(op.range.base_layer)
                        .layer_count(op.range.layer_count)
                        .build(),
                    image_extent: vk::Extent3D {
                        width: dim[0],
                        height: dim[1],
                        depth: 1,
                    },
                    ..Default::default()
                }],
            );
        }
        let restore = if old_layout == vk::ImageLayout::UNDEFINED {
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        } else {
            old_layout
        };
        self.backend.transition_image(
            self.cmd,
            op.dst,
            restore,
            (
                vk::PipelineStageFlags::TRANSFER,
                vk::AccessFlags::TRANSFER_WRITE,
            ),
            (
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::AccessFlags::MEMORY_READ,
            ),
        );
    }

    fn blit(&mut self, op: &BlitOp) {
        let Some(src_view) = self.backend.image_views.get_ref(retag(op.src)) else {
            warn!("stale image view in command stream; op skipped");
            return;
        };
        let src_image = src_view.image;
        let Some(dst_view) = self.backend.image_views.get_ref(retag(op.dst)) else {
            warn!("stale image view in command stream; op skipped");
            return;
        };
        let dst_image = dst_view.image;

        let (src_raw, src_dim) = {
            let img = self.backend.images.get_ref(retag(src_image)).unwrap();
            (img.img, img.dim)
        };
        let (dst_raw, dst_dim) = {
            let img = self.backend.images.get_ref(retag(dst_image)).unwrap();
            (img.img, img.dim)
        };

        let src_w = if op.src_region.w == 0 { src_dim[0] } else { op.src_region.w };
        let src_h = if op.src_region.h == 0 { src_dim[1] } else { op.src_region.h };
        let dst_w = if op.dst_region.w == 0 { dst_dim[0] } else { op.dst_region.w };
        let dst_h = if op.dst_region.h == 0 { dst_dim[1] } else { op.dst_region.h };

        self.backend.transition_image(
            self.cmd,
            src_image,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            (vk::PipelineStageFlags::ALL_COMMANDS, vk::AccessFlags::MEMORY_WRITE),
            (vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_READ),
        );
        self.backend.transition_image(
            self.cmd,
            dst_image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            (vk::PipelineStageFlags::ALL_COMMANDS, vk::AccessFlags::NONE),
            (vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_WRITE),
        );

        let sub = vk::ImageSubresourceLayers::builder()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(0)
            .base_array_layer(0)
            .layer_count(1)
            .build();
        unsafe {
            self.backend.device.cmd_blit_image(
                self.cmd,
                src_raw,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst_raw,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[vk::ImageBlit {
                    src_subresource: sub,
                    src_offsets: [
                        vk::Offset3D {
                            x: op.src_region.x,
                            y: op.src_region.y,
                            z: 0,
                        },
                        vk::Offset3D {
                            x: src_w as i32,
                            y: src_h as i32,
                            z: 1,
                        },
                    ],
                    dst_subresource: sub,
                    dst_offsets: [
                        vk::Offset3D {
                            x: op.dst_region.x,
                            y: op.dst_region.y,
                            z: 0,
                        },
                        vk::Offset3D {
                            x: dst_w as i32,
                            y: dst_h as i32,
                            z: 1,
                        },
                    ],
                }],
                lib_to_vk_filter(op.filter),
            );
        }
    }

    fn image_barrier(&mut self, op: &ImageBarrierOp) {
        let Some(view) = self.backend.image_views.get_ref(retag(op.view)) else {
            warn!("stale image view in command stream; op skipped");
            return;
        };
        let image = view.image;
        let (src_stage, src_access, _) = convert_barrier_point_vk(op.src);
        let (dst_stage, dst_access, dst_layout) = convert_barrier_point_vk(op.dst);
        self.backend.transition_image(
            self.cmd,
            image,
            dst_layout,
            (src_stage, src_access),
            (dst_stage, dst_access),
        );
    }
}
