use log::{trace, warn};

use crate::gpu::command::*;
use crate::gpu::types::*;
use crate::gpu::Result;

use super::conversions::*;
use super::{retag, WgImageView, WgpuBackend};

/// Replay a recorded submission against the driver: every execute builds a
/// fresh encoder, walks the intermediate list, and submits once. This is the
/// "recorded list, replayed later" half of the command-buffer contract.
pub(crate) fn replay_submission(
    backend: &mut WgpuBackend,
    submission: &Submission,
) -> Result<wgpu::SubmissionIndex> {
    let mut encoder = backend
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("sumi-replay"),
        });

    let ops: &[RenderOp] = &submission.ops;
    let mut i = 0;
    while i < ops.len() {
        match &ops[i] {
            RenderOp::BeginRenderPass(begin) => {
                let end = pass_end(ops, i);
                encode_pass(backend, &mut encoder, begin, &ops[i + 1..end])?;
                i = end + 1;
            }
            op => {
                encode_transfer(backend, &mut encoder, op);
                i += 1;
            }
        }
    }

    Ok(backend.queue.submit(Some(encoder.finish())))
}

fn pass_end(ops: &[RenderOp], begin: usize) -> usize {
    ops[begin..]
        .iter()
        .position(|op| matches!(op, RenderOp::EndRenderPass))
        .map(|p| begin + p)
        .unwrap_or(ops.len())
}

/// Encode one recorded render pass. WebGPU has no subpasses, so each
/// `NextSubpass` closes the current native pass and opens a new one on the
/// same attachments with `Load` ops, keeping attachment contents intact.
fn encode_pass(
    backend: &WgpuBackend,
    encoder: &mut wgpu::CommandEncoder,
    begin: &BeginRenderPassOp,
    ops: &[RenderOp],
) -> Result<()> {
    let Some(rp) = backend.render_passes.get_ref(retag(begin.render_pass)) else {
        warn!("stale render pass in command stream; pass skipped");
        return Ok(());
    };
    let Some(fb) = backend.framebuffers.get_ref(retag(begin.framebuffer)) else {
        warn!("stale framebuffer in command stream; pass skipped");
        return Ok(());
    };

    let swap_view = backend.current_swap_view();

    // Resolve every attachment once; segments borrow from here.
    let mut resolved: Vec<Option<&wgpu::TextureView>> = Vec::with_capacity(fb.attachments.len());
    for handle in &fb.attachments {
        match backend.image_views.get_ref(retag(*handle)) {
            Some(WgImageView::Texture { view, .. }) => resolved.push(Some(view)),
            Some(WgImageView::Swapchain) => resolved.push(swap_view.as_ref()),
            None => {
                warn!("stale image view in framebuffer; pass skipped");
                return Ok(());
            }
        }
    }

    let segments = ops.split(|op| matches!(op, RenderOp::NextSubpass));
    for (subpass, segment) in segments.enumerate() {
        let Some(colors) = rp.subpass_colors.get(subpass) else {
            warn!("recorded subpass {subpass} exceeds render pass shape; skipped");
            continue;
        };
        let depth = rp.subpass_depth.get(subpass).copied().flatten();
        let first = subpass == 0;

        let mut color_attachments = Vec::with_capacity(colors.len());
        for &idx in colors {
            let Some(view) = resolved.get(idx as usize).and_then(|v| *v) else {
                trace!("pass without a live target (headless); skipped");
                return Ok(());
            };
            let load = if first {
                match rp.attachments[idx as usize].load_op {
                    LoadOp::Clear => {
                        let c = match begin.clear_values.get(idx as usize) {
                            Some(ClearValue::Color(c)) => wgpu::Color {
                                r: c[0] as f64,
                                g: c[1] as f64,
                                b: c[2] as f64,
                                a: c[3] as f64,
                            },
                            _ => wgpu::Color::BLACK,
                        };
                        wgpu::LoadOp::Clear(c)
                    }
                    _ => wgpu::LoadOp::Load,
                }
            } else {
                wgpu::LoadOp::Load
            };
            color_attachments.push(Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            }));
        }

        let depth_stencil_attachment = match depth {
            Some(idx) => {
                let Some(view) = resolved.get(idx as usize).and_then(|v| *v) else {
                    trace!("pass without a live depth target; skipped");
                    return Ok(());
                };
                let load = if first && rp.attachments[idx as usize].load_op == LoadOp::Clear {
                    let d = match begin.clear_values.get(idx as usize) {
                        Some(ClearValue::DepthStencil { depth, .. }) => *depth,
                        _ => 1.0,
                    };
                    wgpu::LoadOp::Clear(d)
                } else {
                    wgpu::LoadOp::Load
                };
                Some(wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                })
            }
            None => None,
        };

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("sumi-pass"),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        for op in segment {
            encode_draw_op(backend, &mut pass, op);
        }
    }

    Ok(())
}

fn encode_draw_op<'a>(
    backend: &'a WgpuBackend,
    pass: &mut wgpu::RenderPass<'a>,
    op: &RenderOp,
) {
    match op {
        RenderOp::BindPipeline(pipeline) => {
            match backend.pipelines.get_ref(retag(*pipeline)) {
                Some(p) => pass.set_pipeline(&p.raw),
                None => warn!("stale pipeline in command stream; op skipped"),
            }
        }
        RenderOp::BindBindGroup(bind) => {
            match backend.bind_groups.get_ref(retag(bind.group)) {
                Some(g) => {
                    let offsets: &[u32] = match &bind.dynamic_offset {
                        Some(o) => std::slice::from_ref(o),
                        None => &[],
                    };
                    pass.set_bind_group(bind.slot, &g.raw, offsets);
                }
                None => warn!("stale bind group in command stream; op skipped"),
            }
        }
        RenderOp::BindVertexBuffer(slice) => {
            match backend.buffers.get_ref(retag(slice.buffer)) {
                Some(b) => pass.set_vertex_buffer(0, b.raw.slice(slice.offset as u64..)),
                None => warn!("stale vertex buffer in command stream; op skipped"),
            }
        }
        RenderOp::BindIndexBuffer(slice, ty) => {
            match backend.buffers.get_ref(retag(slice.buffer)) {
                Some(b) => pass.set_index_buffer(
                    b.raw.slice(slice.offset as u64..),
                    lib_to_wgpu_index_format(*ty),
                ),
                None => warn!("stale index buffer in command stream; op skipped"),
            }
        }
        RenderOp::SetViewport(v) => {
            pass.set_viewport(v.x, v.y, v.w, v.h, v.min_depth, v.max_depth);
        }
        RenderOp::SetScissor(r) => {
            pass.set_scissor_rect(r.x.max(0) as u32, r.y.max(0) as u32, r.w, r.h);
        }
        RenderOp::Draw(d) => {
            pass.draw(
                d.first_vertex..d.first_vertex + d.vertex_count,
                d.first_instance..d.first_instance + d.instance_count,
            );
        }
        RenderOp::DrawIndexed(d) => {
            pass.draw_indexed(
                d.first_index..d.first_index + d.index_count,
                d.vertex_offset,
                d.first_instance..d.first_instance + d.instance_count,
            );
        }
        RenderOp::DrawIndirect(d) => {
            if let Some(b) = backend.buffers.get_ref(retag(d.buffer.buffer)) {
                for n in 0..d.draw_count {
                    let offset = d.buffer.offset as u64 + (n * d.stride) as u64;
                    pass.draw_indirect(&b.raw, offset);
                }
            }
        }
        RenderOp::DrawIndexedIndirect(d) => {
            if let Some(b) = backend.buffers.get_ref(retag(d.buffer.buffer)) {
                for n in 0..d.draw_count {
                    let offset = d.buffer.offset as u64 + (n * d.stride) as u64;
                    pass.draw_indexed_indirect(&b.raw, offset);
                }
            }
        }
        other => {
            debug_assert!(false, "transfer op {other:?} inside a render pass");
        }
    }
}

fn encode_transfer(backend: &WgpuBackend, encoder: &mut wgpu::CommandEncoder, op: &RenderOp) {
    match op {
        RenderOp::UpdateBuffer { dst, data } => {
            let Some(b) = backend.buffers.get_ref(retag(dst.buffer)) else {
                warn!("stale buffer in command stream; update skipped");
                return;
            };
            // Staged through a transient buffer so the write keeps its
            // recorded position relative to surrounding ops.
            let tmp = backend.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("sumi-update-staging"),
                size: data.len() as u64,
                usage: wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: true,
            });
            tmp.slice(..)
                .get_mapped_range_mut()
                .copy_from_slice(data);
            tmp.unmap();
            encoder.copy_buffer_to_buffer(&tmp, 0, &b.raw, dst.offset as u64, data.len() as u64);
        }
        RenderOp::CopyBuffer(c) => {
            let (Some(src), Some(dst)) = (
                backend.buffers.get_ref(retag(c.src.buffer)),
                backend.buffers.get_ref(retag(c.dst.buffer)),
            ) else {
                warn!("stale buffer in command stream; copy skipped");
                return;
            };
            encoder.copy_buffer_to_buffer(
                &src.raw,
                c.src.offset as u64,
                &dst.raw,
                c.dst.offset as u64,
                c.src.size.min(c.dst.size) as u64,
            );
        }
        RenderOp::CopyBufferToImage(c) => {
            let Some(src) = backend.buffers.get_ref(retag(c.src.buffer)) else {
                warn!("stale buffer in command stream; copy skipped");
                return;
            };
            let Some(img) = backend.images.get_ref(retag(c.dst)) else {
                warn!("stale image in command stream; copy skipped");
                return;
            };
            encoder.copy_buffer_to_texture(
                wgpu::ImageCopyBuffer {
                    buffer: &src.raw,
                    layout: wgpu::ImageDataLayout {
                        offset: c.src.offset as u64,
                        bytes_per_row: Some(bytes_per_pixel(img.format) * img.dim[0]),
                        rows_per_image: Some(img.dim[1]),
                    },
                },
                wgpu::ImageCopyTexture {
                    texture: &img.tex,
                    mip_level: c.range.base_mip,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::Extent3d {
                    width: img.dim[0],
                    height: img.dim[1],
                    depth_or_array_layers: c.range.layer_count,
                },
            );
        }
        RenderOp::Blit(blit) => {
            // No blit primitive in the implicit API: a 1:1 texture copy is
            // the supported shape; scaling would need a shader pass.
            let src_img = match backend.image_views.get_ref(retag(blit.src)) {
                Some(WgImageView::Texture { image, .. }) => *image,
                _ => {
                    warn!("blit source is not a plain texture; skipped");
                    return;
                }
            };
            let dst_img = match backend.image_views.get_ref(retag(blit.dst)) {
                Some(WgImageView::Texture { image, .. }) => *image,
                _ => {
                    warn!("blit destination is not a plain texture; skipped");
                    return;
                }
            };
            let (Some(src), Some(dst)) = (
                backend.images.get_ref(retag(src_img)),
                backend.images.get_ref(retag(dst_img)),
            ) else {
                warn!("stale image in command stream; blit skipped");
                return;
            };
            if src.dim != dst.dim {
                warn!("scaling blit unsupported on the wgpu backend; skipped");
                return;
            }
            encoder.copy_texture_to_texture(
                wgpu::ImageCopyTexture {
                    texture: &src.tex,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::ImageCopyTexture {
                    texture: &dst.tex,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::Extent3d {
                    width: src.dim[0],
                    height: src.dim[1],
                    depth_or_array_layers: 1,
                },
            );
        }
        RenderOp::ImageBarrier(_) => {
            // Driver-managed synchronization; ordering is implied by the
            // single queue.
        }
        other => {
            debug_assert!(false, "draw op {other:?} outside a render pass");
        }
    }
}
