pub mod batching;
pub mod config;
pub mod console;
pub mod frame;
pub mod instances;

use std::time::Instant;

use glam::Mat4;
use log::{debug, warn};

use crate::gpu::*;
use crate::utils::{Handle, PerFrame, Pool};

pub use batching::{BatchBuilder, BatchDraw, DrawRecord, MeshBatch, PendingDraw, SubmeshKey};
pub use config::{BackendKind, RendererConfig};
pub use console::{parse_command, ConsoleCommand, ConsoleError};
pub use frame::{FrameInfo, FrameState};
pub use instances::*;

/// Uniform slices are rounded to this so every offset handed to a bind group
/// satisfies the device's uniform-offset alignment.
const UBO_ALIGN: u32 = 256;
/// Per-frame indirect-record capacity in bytes.
const INDIRECT_CAPACITY: u32 = 64 * 1024;

fn align_ubo(size: usize) -> u32 {
    (size as u32).next_multiple_of(UBO_ALIGN)
}

fn sub_slice(slice: BufferSlice, size: usize) -> BufferSlice {
    debug_assert!(size as u32 <= slice.size);
    BufferSlice {
        buffer: slice.buffer,
        offset: slice.offset,
        size: size as u32,
    }
}

/// Scene-facing pipelines, created by the caller against the orchestrator's
/// render passes and layouts (shader artifacts are external input). Any unset
/// pipeline simply skips its draws; the frame pipeline itself always runs.
#[derive(Default, Clone)]
pub struct ScenePipelines {
    pub prepass: Option<Handle<GraphicsPipeline>>,
    pub prepass_skinned: Option<Handle<GraphicsPipeline>>,
    pub opaque: Option<Handle<GraphicsPipeline>>,
    pub opaque_skinned: Option<Handle<GraphicsPipeline>>,
    pub transparent: Option<Handle<GraphicsPipeline>>,
    pub overlay: Option<OverlayDraw>,
}

/// Overlay content composited during post-processing (UI layers and similar,
/// rendered by an external system into this one draw).
#[derive(Clone)]
pub struct OverlayDraw {
    pub pipeline: Handle<GraphicsPipeline>,
    pub bind_group: Handle<BindGroup>,
    pub vertex_count: u32,
}

struct SceneStore {
    cameras: Pool<CameraInstance>,
    sprites: Pool<SpriteInstance>,
    static_meshes: Pool<StaticMeshInstance>,
    skeletal_meshes: Pool<SkeletalMeshInstance>,
    lights: Pool<LightInstance>,
    allocator: BufferAllocator,
}

enum DeferredKind {
    /// User-facing `destroy_resources`: runs against the factory.
    Factory(Box<dyn FnOnce(&mut dyn ResourceFactory) + Send>),
    /// Internal instance teardown: frees CPU records + allocator ranges and
    /// enqueues GPU destruction.
    Scene(Box<dyn FnOnce(&mut SceneStore, &RenderDevice)>),
}

struct DeferredDestroy {
    frames_left: u32,
    kind: DeferredKind,
}

/// The frame-pipeline orchestrator. Owns N frame-in-flight slots and drives
/// Acquire → PreRender → Main (prepass + opaque + transparent) → PostProcess
/// → Present over whichever backend sits behind the [`RenderDevice`].
pub struct RenderSystem {
    device: RenderDevice,
    scene: SceneStore,
    frames: PerFrame<FrameInfo>,

    geometry_pass: Handle<RenderPass>,
    post_pass: Handle<RenderPass>,
    camera_layout: Handle<BindGroupLayout>,
    instance_layout: Handle<BindGroupLayout>,
    skeletal_layout: Handle<BindGroupLayout>,
    pipelines: ScenePipelines,

    extent: Extent2D,
    swap_views: Vec<Handle<ImageView>>,
    config: RendererConfig,
    pending_config: Option<RendererConfig>,
    debug_override: Option<Handle<ImageView>>,
    deferred: Vec<DeferredDestroy>,

    time: f64,
    last_start: Option<Instant>,
    frame_counter: u64,
}

impl RenderSystem {
    pub fn new(device: RenderDevice, config: RendererConfig) -> Result<Self> {
        let extent = device.swapchain_extent()?;
        let frame_count = device.frame_count();
        if config.frames_in_flight as usize != frame_count {
            warn!(
                "config requests {} frames in flight, backend swapchain has {}; using {}",
                config.frames_in_flight, frame_count, frame_count
            );
        }

        let (geometry_pass, post_pass, camera_layout, instance_layout, skeletal_layout) =
            device.create_resources(|f| {
                let geometry_pass = f.make_render_pass(&RenderPassInfo {
                    debug_name: "geometry pass",
                    attachments: &[
                        AttachmentDescription {
                            format: Format::BGRA8Unorm,
                            samples: SampleCount::S1,
                            load_op: LoadOp::Clear,
                            store_op: StoreOp::Store,
                        },
                        AttachmentDescription {
                            format: Format::D32F,
                            samples: SampleCount::S1,
                            load_op: LoadOp::Clear,
                            store_op: StoreOp::DontCare,
                        },
                    ],
                    subpasses: &[
                        // Depth prepass: no color writes.
                        SubpassDescription {
                            color_attachments: &[],
                            depth_attachment: Some(1),
                        },
                        // Main color pass.
                        SubpassDescription {
                            color_attachments: &[0],
                            depth_attachment: Some(1),
                        },
                    ],
                })?;

                let post_pass = f.make_render_pass(&RenderPassInfo {
                    debug_name: "post pass",
                    attachments: &[AttachmentDescription {
                        format: Format::BGRA8Unorm,
                        samples: SampleCount::S1,
                        load_op: LoadOp::Load,
                        store_op: StoreOp::Store,
                    }],
                    subpasses: &[SubpassDescription {
                        color_attachments: &[0],
                        depth_attachment: None,
                    }],
                })?;

                let camera_layout = f.make_bind_group_layout(&BindGroupLayoutInfo {
                    debug_name: "camera layout",
                    bindings: &[BindingDesc {
                        binding: 0,
                        ty: BindingType::UniformBuffer,
                        count: 1,
                        stages: ShaderStages::VERTEX | ShaderStages::FRAGMENT,
                    }],
                })?;
                let instance_layout = f.make_bind_group_layout(&BindGroupLayoutInfo {
                    debug_name: "instance layout",
                    bindings: &[BindingDesc {
                        binding: 0,
                        ty: BindingType::UniformBuffer,
                        count: 1,
                        stages: ShaderStages::VERTEX,
                    }],
                })?;
                let skeletal_layout = f.make_bind_group_layout(&BindGroupLayoutInfo {
                    debug_name: "skeletal instance layout",
                    bindings: &[
                        BindingDesc {
                            binding: 0,
                            ty: BindingType::UniformBuffer,
                            count: 1,
                            stages: ShaderStages::VERTEX,
                        },
                        BindingDesc {
                            binding: 1,
                            ty: BindingType::UniformBuffer,
                            count: 1,
                            stages: ShaderStages::VERTEX,
                        },
                    ],
                })?;

                Ok((
                    geometry_pass,
                    post_pass,
                    camera_layout,
                    instance_layout,
                    skeletal_layout,
                ))
            })?;

        let mut scene = SceneStore {
            cameras: Pool::new(64),
            sprites: Pool::new(1024),
            static_meshes: Pool::new(1024),
            skeletal_meshes: Pool::new(256),
            lights: Pool::new(256),
            allocator: BufferAllocator::new(),
        };

        let swap_views = device.swapchain_views()?;
        let mut frames = Vec::with_capacity(frame_count);
        for i in 0..frame_count {
            frames.push(Self::create_frame(
                &device,
                &mut scene.allocator,
                geometry_pass,
                post_pass,
                extent,
                swap_views.get(i).copied(),
                i,
            )?);
        }

        Ok(Self {
            device,
            scene,
            frames: PerFrame::from_frames(frames),
            geometry_pass,
            post_pass,
            camera_layout,
            instance_layout,
            skeletal_layout,
            pipelines: ScenePipelines::default(),
            extent,
            swap_views,
            config,
            pending_config: None,
            debug_override: None,
            deferred: Vec::new(),
            time: 0.0,
            last_start: None,
            frame_counter: 0,
        })
    }

    fn create_frame(
        device: &RenderDevice,
        allocator: &mut BufferAllocator,
        geometry_pass: Handle<RenderPass>,
        post_pass: Handle<RenderPass>,
        extent: Extent2D,
        swap_view: Option<Handle<ImageView>>,
        index: usize,
    ) -> Result<FrameInfo> {
        let indirect = allocator.allocate(
            device,
            INDIRECT_CAPACITY,
            BufferUsage::INDIRECT | BufferUsage::COPY_DST,
            MemoryProps::DEVICE_LOCAL,
        )?;

        let (
            color_image,
            color_view,
            depth_image,
            depth_view,
            geometry_fb,
            post_fb,
            pre_render_cmds,
            main_cmds,
            post_cmds,
            pre_render_finished,
            main_render_finished,
            postprocess_finished,
            fence,
        ) = device.create_resources(move |f| {
            let (color_image, color_view, depth_image, depth_view, geometry_fb, post_fb) =
                make_frame_targets(f, geometry_pass, post_pass, extent, swap_view)?;

            let pre_render_cmds = f.make_command_list(&CommandListInfo {
                debug_name: "pre-render",
                queue_type: QueueType::Graphics,
            })?;
            let main_cmds = f.make_command_list(&CommandListInfo {
                debug_name: "main",
                queue_type: QueueType::Graphics,
            })?;
            let post_cmds = f.make_command_list(&CommandListInfo {
                debug_name: "post-process",
                queue_type: QueueType::Graphics,
            })?;

            Ok((
                color_image,
                color_view,
                depth_image,
                depth_view,
                geometry_fb,
                post_fb,
                pre_render_cmds,
                main_cmds,
                post_cmds,
                f.make_semaphore()?,
                f.make_semaphore()?,
                f.make_semaphore()?,
                f.make_fence()?,
            ))
        })?;

        Ok(FrameInfo {
            state: FrameState::Idle,
            image_index: index as u32,
            framebuffer_ready: Handle::default(),
            pre_render_finished,
            main_render_finished,
            postprocess_finished,
            fence,
            fence_submitted: false,
            pre_render_cmds,
            main_cmds,
            post_cmds,
            indirect,
            color_image,
            color_view,
            depth_image,
            depth_view,
            geometry_fb,
            post_fb,
        })
    }

    pub fn device(&self) -> &RenderDevice {
        &self.device
    }

    pub fn geometry_pass(&self) -> Handle<RenderPass> {
        self.geometry_pass
    }

    pub fn post_pass(&self) -> Handle<RenderPass> {
        self.post_pass
    }

    pub fn camera_layout(&self) -> Handle<BindGroupLayout> {
        self.camera_layout
    }

    pub fn instance_layout(&self) -> Handle<BindGroupLayout> {
        self.instance_layout
    }

    pub fn skeletal_layout(&self) -> Handle<BindGroupLayout> {
        self.skeletal_layout
    }

    pub fn set_scene_pipelines(&mut self, pipelines: ScenePipelines) {
        self.pipelines = pipelines;
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// Queue a config change for the next safe point (start of frame).
    pub fn queue_config(&mut self, config: RendererConfig) {
        self.pending_config = Some(config);
    }

    pub fn exec_console(&mut self, line: &str) -> Result<(), ConsoleError> {
        match parse_command(line)? {
            ConsoleCommand::RtOverride(None) => self.debug_override = None,
            ConsoleCommand::RtOverride(Some(key)) => {
                let handle = Handle::new((key >> 16) as u16, (key & 0xffff) as u16);
                self.debug_override = Some(handle);
            }
            ConsoleCommand::Resize { width, height } => {
                let mut cfg = self.config.clone();
                cfg.width = width;
                cfg.height = height;
                self.queue_config(cfg);
            }
            ConsoleCommand::PresentMode(mode) => {
                let mut cfg = self.config.clone();
                cfg.present_mode = mode;
                self.queue_config(cfg);
            }
        }
        Ok(())
    }

    /// Run `f` once on the render thread with exclusive factory access.
    pub fn create_resources<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn ResourceFactory) -> Result<T> + Send + 'static,
    {
        self.device.create_resources(f)
    }

    /// Schedule `f` to run after every frame currently in flight has retired.
    /// Never runs synchronously, even if nothing is in flight.
    pub fn destroy_resources<F>(&mut self, f: F)
    where
        F: FnOnce(&mut dyn ResourceFactory) + Send + 'static,
    {
        self.deferred.push(DeferredDestroy {
            frames_left: self.frames.frame_count() as u32,
            kind: DeferredKind::Factory(Box::new(f)),
        });
    }

    fn defer_scene<F>(&mut self, f: F)
    where
        F: FnOnce(&mut SceneStore, &RenderDevice) + 'static,
    {
        self.deferred.push(DeferredDestroy {
            frames_left: self.frames.frame_count() as u32,
            kind: DeferredKind::Scene(Box::new(f)),
        });
    }

    /// Begin a frame: run due deferred destroyers, advance time, apply any
    /// queued config, then acquire a swap image, rebuilding swapchain
    /// resources and retrying whenever acquisition reports stale.
    pub fn start_frame(&mut self) -> Result<()> {
        // Deferred destruction countdown.
        let mut pending = std::mem::take(&mut self.deferred);
        let mut due = Vec::new();
        pending.retain_mut(|d| {
            if d.frames_left <= 1 {
                due.push(std::mem::replace(
                    &mut d.kind,
                    DeferredKind::Factory(Box::new(|_| {})),
                ));
                false
            } else {
                d.frames_left -= 1;
                true
            }
        });
        self.deferred = pending;
        for kind in due {
            match kind {
                DeferredKind::Factory(job) => {
                    if let Err(e) = self.device.run_resource_job(job) {
                        warn!("deferred destroy dropped: {e}");
                    }
                }
                DeferredKind::Scene(job) => job(&mut self.scene, &self.device),
            }
        }

        // Time/UI state.
        let now = Instant::now();
        if let Some(last) = self.last_start {
            self.time += now.duration_since(last).as_secs_f64();
        }
        self.last_start = Some(now);
        self.frame_counter += 1;

        // Apply queued config at the safe point.
        if let Some(cfg) = self.pending_config.take() {
            debug!("applying queued renderer config {cfg:?}");
            self.wait_all_in_flight()?;
            self.device.rebuild_swapchain(cfg.swapchain())?;
            self.extent = self.device.swapchain_extent()?;
            self.recreate_swapchain_resources()?;
            self.config = cfg;
        }

        // Acquire, rebuilding on stale.
        loop {
            match self.device.acquire_next_image()? {
                AcquiredImage::Valid { index, ready } => {
                    let slot = (index as usize) % self.frames.frame_count();
                    self.frames.advance_to_frame(slot);
                    let frame = self.frames.curr_mut();
                    debug_assert!(
                        matches!(frame.state, FrameState::Idle | FrameState::Presented),
                        "start_frame on a slot still mid-pipeline ({:?})",
                        frame.state
                    );
                    if frame.fence_submitted {
                        self.device.wait_fence(frame.fence)?;
                        frame.fence_submitted = false;
                    }
                    frame.pre_render_cmds.reset();
                    frame.main_cmds.reset();
                    frame.post_cmds.reset();
                    frame.image_index = index;
                    frame.framebuffer_ready = ready;
                    frame.state = FrameState::Acquired;
                    return Ok(());
                }
                AcquiredImage::Stale => {
                    debug!("stale swapchain at acquire; rebuilding");
                    self.wait_all_in_flight()?;
                    self.device.rebuild_swapchain(self.config.swapchain())?;
                    self.extent = self.device.swapchain_extent()?;
                    self.recreate_swapchain_resources()?;
                }
            }
        }
    }

    fn wait_all_in_flight(&mut self) -> Result<()> {
        let mut fences = Vec::new();
        self.frames.for_each_mut(|f| {
            if f.fence_submitted {
                fences.push(f.fence);
                f.fence_submitted = false;
            }
        });
        if !fences.is_empty() {
            self.device.wait_fences(fences)?;
        }
        Ok(())
    }

    /// Tear down and rebuild everything derived from the swapchain:
    /// per-frame render targets and framebuffers. Command lists, semaphores,
    /// fences, and the indirect buffers survive.
    fn recreate_swapchain_resources(&mut self) -> Result<()> {
        let swap_views = self.device.swapchain_views()?;
        self.swap_views = swap_views.clone();
        let extent = self.extent;
        let geometry_pass = self.geometry_pass;
        let post_pass = self.post_pass;

        for i in 0..self.frames.frame_count() {
            let frame = self.frames.get_mut(i);
            let old = (
                frame.geometry_fb,
                frame.post_fb,
                frame.color_view,
                frame.color_image,
                frame.depth_view,
                frame.depth_image,
            );
            let swap_view = swap_views.get(i).copied();

            let (color_image, color_view, depth_image, depth_view, geometry_fb, post_fb) =
                self.device.create_resources(move |f| {
                    f.destroy_framebuffer(old.0);
                    f.destroy_framebuffer(old.1);
                    f.destroy_image_view(old.2);
                    f.destroy_image(old.3);
                    f.destroy_image_view(old.4);
                    f.destroy_image(old.5);
                    make_frame_targets(f, geometry_pass, post_pass, extent, swap_view)
                })?;

            let frame = self.frames.get_mut(i);
            frame.color_image = color_image;
            frame.color_view = color_view;
            frame.depth_image = depth_image;
            frame.depth_view = depth_view;
            frame.geometry_fb = geometry_fb;
            frame.post_fb = post_fb;
            frame.state = FrameState::Idle;
            frame.fence_submitted = false;
        }
        Ok(())
    }

    /// Record and submit per-instance GPU-buffer updates for this frame.
    /// Missing instances are warned about and skipped; the frame continues.
    pub fn pre_render_frame(&mut self, updates: &FrameUpdates) -> Result<()> {
        let frame = self.frames.curr_mut();
        frame.state.expect(FrameState::Acquired, "pre_render_frame");

        let cmds = &mut frame.pre_render_cmds;
        cmds.begin_recording();

        for (handle, view, proj) in &updates.cameras {
            match self.scene.cameras.get_mut_ref(*handle) {
                Some(cam) if cam.active => {
                    cam.view = *view;
                    cam.proj = *proj;
                    let data = CameraUniform::new(*view, *proj);
                    cmds.update_buffer(
                        sub_slice(cam.ubo, std::mem::size_of::<CameraUniform>()),
                        bytemuck::bytes_of(&data),
                    );
                }
                _ => warn!("camera update for missing instance {handle:?}; skipped"),
            }
        }

        for (handle, model) in &updates.mesh_transforms {
            match self.scene.static_meshes.get_ref(*handle) {
                Some(mesh) if mesh.active => {
                    let data = ModelUniform {
                        model: model.to_cols_array_2d(),
                    };
                    cmds.update_buffer(
                        sub_slice(mesh.ubo, std::mem::size_of::<ModelUniform>()),
                        bytemuck::bytes_of(&data),
                    );
                }
                _ => warn!("mesh transform for missing instance {handle:?}; skipped"),
            }
        }

        for (handle, model) in &updates.sprite_transforms {
            match self.scene.sprites.get_ref(*handle) {
                Some(sprite) if sprite.active => {
                    let data = ModelUniform {
                        model: model.to_cols_array_2d(),
                    };
                    cmds.update_buffer(
                        sub_slice(sprite.ubo, std::mem::size_of::<ModelUniform>()),
                        bytemuck::bytes_of(&data),
                    );
                }
                _ => warn!("sprite transform for missing instance {handle:?}; skipped"),
            }
        }

        for (handle, model, bones) in &updates.skeletal_transforms {
            match self.scene.skeletal_meshes.get_ref(*handle) {
                Some(mesh) if mesh.active => {
                    let data = ModelUniform {
                        model: model.to_cols_array_2d(),
                    };
                    cmds.update_buffer(
                        sub_slice(mesh.ubo, std::mem::size_of::<ModelUniform>()),
                        bytemuck::bytes_of(&data),
                    );

                    let count = bones.len().min(MAX_BONES);
                    if bones.len() > MAX_BONES {
                        warn!(
                            "skeletal instance {handle:?} has {} bones; clamped to {MAX_BONES}",
                            bones.len()
                        );
                    }
                    let mut palette = vec![[[0.0f32; 4]; 4]; MAX_BONES];
                    for (dst, src) in palette.iter_mut().zip(bones.iter().take(count)) {
                        *dst = src.to_cols_array_2d();
                    }
                    cmds.update_buffer(
                        sub_slice(mesh.bone_ubo, MAX_BONES * 64),
                        bytemuck::cast_slice(&palette),
                    );
                }
                _ => warn!("skeletal update for missing instance {handle:?}; skipped"),
            }
        }

        for (handle, params) in &updates.lights {
            match self.scene.lights.get_mut_ref(*handle) {
                Some(light) if light.active => {
                    light.params = *params;
                    cmds.update_buffer(
                        sub_slice(light.ubo, std::mem::size_of::<LightParams>()),
                        bytemuck::bytes_of(params),
                    );
                }
                _ => warn!("light update for missing instance {handle:?}; skipped"),
            }
        }

        cmds.end_recording();

        let submission = Submission::new(
            cmds,
            &SubmitInfo {
                wait_sems: vec![],
                signal_sems: vec![frame.pre_render_finished],
                fence: None,
            },
        );
        self.device.execute(submission)?;
        frame.state = FrameState::PreRendered;
        Ok(())
    }

    /// Build batches, record the depth prepass and main color pass, then run
    /// post-processing and present. Transparent draws keep submission order
    /// (not depth-sorted).
    pub fn render_frame(&mut self, submitted: &SubmittedFrame) -> Result<()> {
        self.record_main_pass(submitted)?;
        self.post_process_frame()?;
        self.submit_swap()
    }

    fn record_main_pass(&mut self, submitted: &SubmittedFrame) -> Result<()> {
        // Batch construction from the scene store (immutable) before frame
        // recording (mutable).
        let mut static_batchset = BatchBuilder::new();
        let mut skinned_batchset = BatchBuilder::new();
        let mut transparent: Vec<(Handle<BindGroup>, TransparentDraw)> = Vec::new();

        for handle in &submitted.static_meshes {
            let Some(mesh) = self.scene.static_meshes.get_ref(*handle) else {
                warn!("submitted static mesh {handle:?} missing; skipped");
                continue;
            };
            if !mesh.active {
                continue;
            }
            collect_submeshes(
                &mesh.mesh,
                mesh.bind_group,
                handle.key(),
                &mut static_batchset,
                &mut transparent,
            );
        }
        for handle in &submitted.skeletal_meshes {
            let Some(mesh) = self.scene.skeletal_meshes.get_ref(*handle) else {
                warn!("submitted skeletal mesh {handle:?} missing; skipped");
                continue;
            };
            if !mesh.active {
                continue;
            }
            collect_submeshes(
                &mesh.mesh,
                mesh.bind_group,
                handle.key(),
                &mut skinned_batchset,
                &mut transparent,
            );
        }
        for handle in &submitted.sprites {
            let Some(sprite) = self.scene.sprites.get_ref(*handle) else {
                warn!("submitted sprite {handle:?} missing; skipped");
                continue;
            };
            if !sprite.active {
                continue;
            }
            let record = DrawRecord::NonIndexed(IndirectCommand {
                vertex_count: sprite.vertex_count,
                instance_count: 1,
                first_vertex: 0,
                first_instance: 0,
            });
            if sprite.transparent {
                transparent.push((
                    sprite.material,
                    TransparentDraw {
                        mesh_bind_group: sprite.bind_group,
                        vertex_buffer: sprite.vertex_buffer,
                        index_buffer: None,
                        record,
                    },
                ));
            } else {
                static_batchset.push(
                    SubmeshKey {
                        material: sprite.material.key(),
                        vertex_buffer: sprite.vertex_buffer.buffer.key(),
                        index_buffer: None,
                        offset: sprite.vertex_buffer.offset,
                        instance: handle.key(),
                        size: sprite.vertex_count,
                    },
                    PendingDraw {
                        material: sprite.material,
                        vertex_buffer: sprite.vertex_buffer,
                        index_buffer: None,
                        draw: BatchDraw {
                            mesh_bind_group: sprite.bind_group,
                            record,
                        },
                    },
                );
            }
        }

        let static_batches = static_batchset.build();
        let skinned_batches = skinned_batchset.build();

        let camera_bind = match self.scene.cameras.get_ref(submitted.camera) {
            Some(cam) if cam.active => Some(cam.bind_group),
            _ => {
                warn!("submitted camera {:?} missing; frame draws skipped", submitted.camera);
                None
            }
        };

        // Serialize indirect records in batch order; each draw references its
        // own record (one descriptor per submesh).
        let frame_extent = self.extent;
        let frame = self.frames.curr_mut();
        frame.state.expect(FrameState::PreRendered, "render_frame");

        let mut indirect_bytes: Vec<u8> = Vec::new();
        let mut record_offsets: Vec<Vec<u32>> = Vec::new();
        for batches in [&static_batches, &skinned_batches] {
            for batch in batches.iter() {
                let mut offsets = Vec::with_capacity(batch.draws.len());
                for draw in &batch.draws {
                    offsets.push(indirect_bytes.len() as u32);
                    draw.record.write_bytes(&mut indirect_bytes);
                }
                record_offsets.push(offsets);
            }
        }
        debug_assert!(
            indirect_bytes.len() as u32 <= frame.indirect.size,
            "indirect records exceed per-frame capacity"
        );

        let cmds = &mut frame.main_cmds;
        cmds.begin_recording();

        if !indirect_bytes.is_empty() {
            cmds.update_buffer(sub_slice(frame.indirect, indirect_bytes.len()), &indirect_bytes);
        }

        let viewport = Viewport {
            x: 0.0,
            y: 0.0,
            w: frame_extent.width as f32,
            h: frame_extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = Rect2D {
            x: 0,
            y: 0,
            w: frame_extent.width,
            h: frame_extent.height,
        };

        cmds.begin_render_pass(BeginRenderPassOp {
            render_pass: self.geometry_pass,
            framebuffer: frame.geometry_fb,
            render_area: scissor,
            clear_values: vec![
                ClearValue::Color([0.0, 0.0, 0.0, 1.0]),
                ClearValue::DepthStencil {
                    depth: 1.0,
                    stencil: 0,
                },
            ],
        });

        // Subpass 0: depth prepass, opaque geometry only, no color writes,
        // position + descriptor binding only.
        if let Some(camera) = camera_bind {
            let mut batch_idx = 0;
            for (pipeline, batches) in [
                (self.pipelines.prepass, &static_batches),
                (self.pipelines.prepass_skinned, &skinned_batches),
            ] {
                if let Some(pipeline) = pipeline {
                    cmds.bind_pipeline(pipeline);
                    cmds.set_viewport(viewport);
                    cmds.set_scissor(scissor);
                    cmds.bind_bind_group(BindBindGroupOp {
                        slot: 0,
                        group: camera,
                        dynamic_offset: None,
                    });
                    record_batches(cmds, batches, &record_offsets[batch_idx..], frame.indirect, 1);
                } else if !batches.is_empty() {
                    warn!("no prepass pipeline set; depth prepass skipped");
                }
                batch_idx += batches.len();
            }
        }

        cmds.next_subpass();

        // Subpass 1: opaque batches, then transparents in submission order.
        if let Some(camera) = camera_bind {
            let mut batch_idx = 0;
            for (pipeline, batches) in [
                (self.pipelines.opaque, &static_batches),
                (self.pipelines.opaque_skinned, &skinned_batches),
            ] {
                if let Some(pipeline) = pipeline {
                    cmds.bind_pipeline(pipeline);
                    cmds.set_viewport(viewport);
                    cmds.set_scissor(scissor);
                    cmds.bind_bind_group(BindBindGroupOp {
                        slot: 0,
                        group: camera,
                        dynamic_offset: None,
                    });
                    record_batches_with_materials(
                        cmds,
                        batches,
                        &record_offsets[batch_idx..],
                        frame.indirect,
                    );
                } else if !batches.is_empty() {
                    warn!("no opaque pipeline set; main draws skipped");
                }
                batch_idx += batches.len();
            }

            if self.pipelines.transparent.is_none() && !transparent.is_empty() {
                warn!("no transparent pipeline set; transparent draws skipped");
            }
            if let Some(pipeline) = self.pipelines.transparent {
                if !transparent.is_empty() {
                    cmds.bind_pipeline(pipeline);
                    cmds.set_viewport(viewport);
                    cmds.set_scissor(scissor);
                    cmds.bind_bind_group(BindBindGroupOp {
                        slot: 0,
                        group: camera,
                        dynamic_offset: None,
                    });
                    // Submission order, not depth-sorted.
                    for (material, draw) in &transparent {
                        cmds.bind_bind_group(BindBindGroupOp {
                            slot: 1,
                            group: *material,
                            dynamic_offset: None,
                        });
                        cmds.bind_bind_group(BindBindGroupOp {
                            slot: 2,
                            group: draw.mesh_bind_group,
                            dynamic_offset: None,
                        });
                        cmds.bind_vertex_buffer(draw.vertex_buffer);
                        match (&draw.record, draw.index_buffer) {
                            (DrawRecord::Indexed(cmd), Some((slice, ty))) => {
                                cmds.bind_index_buffer(slice, ty);
                                cmds.draw_indexed(DrawIndexedOp {
                                    index_count: cmd.index_count,
                                    instance_count: cmd.instance_count,
                                    first_index: cmd.first_index,
                                    vertex_offset: cmd.vertex_offset,
                                    first_instance: cmd.first_instance,
                                });
                            }
                            (DrawRecord::NonIndexed(cmd), _) => {
                                cmds.draw(DrawOp {
                                    vertex_count: cmd.vertex_count,
                                    instance_count: cmd.instance_count,
                                    first_vertex: cmd.first_vertex,
                                    first_instance: cmd.first_instance,
                                });
                            }
                            (DrawRecord::Indexed(_), None) => {
                                warn!("indexed transparent draw without index buffer; skipped");
                            }
                        }
                    }
                }
            }
        }

        cmds.end_render_pass();
        cmds.end_recording();

        // Waits: the swap image must be writable (previous frame's
        // "framebuffer ready") and this frame's pre-render updates complete.
        let submission = Submission::new(
            cmds,
            &SubmitInfo {
                wait_sems: vec![frame.framebuffer_ready, frame.pre_render_finished],
                signal_sems: vec![frame.main_render_finished],
                fence: None,
            },
        );
        self.device.execute(submission)?;
        frame.state = FrameState::MainRendered;
        Ok(())
    }

    /// Composite the offscreen color target (or a debug-override image) into
    /// the backbuffer plus any overlay content; signals the slot's reuse
    /// fence.
    fn post_process_frame(&mut self) -> Result<()> {
        let debug_override = self.debug_override;
        let overlay = self.pipelines.overlay.clone();
        let swap_views = &self.swap_views;
        let extent = self.extent;

        let frame = self.frames.curr_mut();
        frame.state.expect(FrameState::MainRendered, "post_process_frame");

        let source = debug_override.unwrap_or(frame.color_view);
        let target = swap_views.get(frame.image_index as usize).copied();

        let cmds = &mut frame.post_cmds;
        cmds.begin_recording();

        if let Some(target) = target {
            cmds.blit(BlitOp {
                src: source,
                dst: target,
                src_region: Rect2D::default(),
                dst_region: Rect2D::default(),
                filter: Filter::Linear,
            });
            cmds.image_barrier(ImageBarrierOp {
                view: target,
                src: BarrierPoint::Transfer,
                dst: BarrierPoint::ColorWrite,
            });
        }

        if let Some(overlay) = &overlay {
            cmds.begin_render_pass(BeginRenderPassOp {
                render_pass: self.post_pass,
                framebuffer: frame.post_fb,
                render_area: Rect2D {
                    x: 0,
                    y: 0,
                    w: extent.width,
                    h: extent.height,
                },
                clear_values: vec![],
            });
            cmds.bind_pipeline(overlay.pipeline);
            cmds.set_viewport(Viewport {
                x: 0.0,
                y: 0.0,
                w: extent.width as f32,
                h: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            });
            cmds.set_scissor(Rect2D {
                x: 0,
                y: 0,
                w: extent.width,
                h: extent.height,
            });
            cmds.bind_bind_group(BindBindGroupOp {
                slot: 0,
                group: overlay.bind_group,
                dynamic_offset: None,
            });
            cmds.draw(DrawOp {
                vertex_count: overlay.vertex_count,
                instance_count: 1,
                first_vertex: 0,
                first_instance: 0,
            });
            cmds.end_render_pass();
        }

        if let Some(target) = target {
            cmds.image_barrier(ImageBarrierOp {
                view: target,
                src: BarrierPoint::ColorWrite,
                dst: BarrierPoint::Present,
            });
        }

        cmds.end_recording();

        let submission = Submission::new(
            cmds,
            &SubmitInfo {
                wait_sems: vec![frame.main_render_finished],
                signal_sems: vec![frame.postprocess_finished],
                fence: Some(frame.fence),
            },
        );
        self.device.execute(submission)?;
        frame.fence_submitted = true;
        frame.state = FrameState::PostProcessed;
        Ok(())
    }

    /// Present the frame's swap image once post-processing has finished.
    fn submit_swap(&mut self) -> Result<()> {
        let frame = self.frames.curr_mut();
        frame.state.expect(FrameState::PostProcessed, "submit_swap");

        self.device.swap(PresentInfo {
            image_index: frame.image_index,
            wait_sems: vec![frame.postprocess_finished],
        })?;

        // Slot reuse is gated by the fence, not the present.
        frame.state = FrameState::Presented;
        Ok(())
    }

    //===------------------------------------------------------------------===//
    // Instance lifecycle
    //===------------------------------------------------------------------===//

    fn alloc_ubo(&mut self, byte_size: usize) -> Result<BufferSlice> {
        self.scene.allocator.allocate(
            &self.device,
            align_ubo(byte_size),
            BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            MemoryProps::DEVICE_LOCAL,
        )
    }

    fn make_ubo_bind_group(
        &self,
        debug_name: String,
        layout: Handle<BindGroupLayout>,
        slices: Vec<BufferSlice>,
    ) -> Result<Handle<BindGroup>> {
        self.device.create_resources(move |f| {
            let bindings: Vec<BindingResource> = slices
                .iter()
                .enumerate()
                .map(|(i, s)| BindingResource {
                    binding: i as u32,
                    resource: ShaderResource::Buffer(*s),
                })
                .collect();
            f.make_bind_group(&BindGroupInfo {
                debug_name: &debug_name,
                layout,
                bindings: &bindings,
            })
        })
    }

    pub fn create_camera(&mut self, info: &CameraInfo) -> Result<Handle<CameraInstance>> {
        let ubo = self.alloc_ubo(std::mem::size_of::<CameraUniform>())?;
        let bind_group = self.make_ubo_bind_group(
            format!("{} bind group", info.debug_name),
            self.camera_layout,
            vec![sub_slice(ubo, std::mem::size_of::<CameraUniform>())],
        )?;
        self.scene
            .cameras
            .insert(CameraInstance {
                ubo,
                bind_group,
                view: Mat4::IDENTITY,
                proj: Mat4::IDENTITY,
                active: true,
            })
            .ok_or(GPUError::SlotError("camera instance"))
    }

    pub fn destroy_camera(&mut self, handle: Handle<CameraInstance>) {
        let Some(cam) = self.scene.cameras.get_mut_ref(handle) else {
            warn!("destroy of unknown camera {handle:?}; skipped");
            return;
        };
        cam.active = false;
        self.defer_scene(move |scene, device| {
            if let Some(cam) = scene.cameras.release(handle) {
                scene.allocator.free(cam.ubo);
                let bind_group = cam.bind_group;
                let _ = device.run_resource_job(move |f| f.destroy_bind_group(bind_group));
            }
        });
    }

    pub fn create_sprite_instance(
        &mut self,
        info: &SpriteInstanceInfo,
    ) -> Result<Handle<SpriteInstance>> {
        let ubo = self.alloc_ubo(std::mem::size_of::<ModelUniform>())?;
        let bind_group = self.make_ubo_bind_group(
            format!("{} bind group", info.debug_name),
            self.instance_layout,
            vec![sub_slice(ubo, std::mem::size_of::<ModelUniform>())],
        )?;
        self.scene
            .sprites
            .insert(SpriteInstance {
                ubo,
                bind_group,
                material: info.material,
                vertex_buffer: info.vertex_buffer,
                vertex_count: info.vertex_count,
                transparent: info.transparent,
                active: true,
            })
            .ok_or(GPUError::SlotError("sprite instance"))
    }

    pub fn destroy_sprite_instance(&mut self, handle: Handle<SpriteInstance>) {
        let Some(sprite) = self.scene.sprites.get_mut_ref(handle) else {
            warn!("destroy of unknown sprite {handle:?}; skipped");
            return;
        };
        sprite.active = false;
        self.defer_scene(move |scene, device| {
            if let Some(sprite) = scene.sprites.release(handle) {
                scene.allocator.free(sprite.ubo);
                let bind_group = sprite.bind_group;
                let _ = device.run_resource_job(move |f| f.destroy_bind_group(bind_group));
            }
        });
    }

    pub fn create_static_mesh_instance(
        &mut self,
        info: &StaticMeshInstanceInfo,
    ) -> Result<Handle<StaticMeshInstance>> {
        let ubo = self.alloc_ubo(std::mem::size_of::<ModelUniform>())?;
        let bind_group = self.make_ubo_bind_group(
            format!("{} bind group", info.debug_name),
            self.instance_layout,
            vec![sub_slice(ubo, std::mem::size_of::<ModelUniform>())],
        )?;
        self.scene
            .static_meshes
            .insert(StaticMeshInstance {
                ubo,
                bind_group,
                mesh: info.mesh.clone(),
                active: true,
            })
            .ok_or(GPUError::SlotError("static mesh instance"))
    }

    pub fn destroy_static_mesh_instance(&mut self, handle: Handle<StaticMeshInstance>) {
        let Some(mesh) = self.scene.static_meshes.get_mut_ref(handle) else {
            warn!("destroy of unknown static mesh {handle:?}; skipped");
            return;
        };
        mesh.active = false;
        self.defer_scene(move |scene, device| {
            if let Some(mesh) = scene.static_meshes.release(handle) {
                scene.allocator.free(mesh.ubo);
                let bind_group = mesh.bind_group;
                let _ = device.run_resource_job(move |f| f.destroy_bind_group(bind_group));
            }
        });
    }

    pub fn create_skeletal_mesh_instance(
        &mut self,
        info: &SkeletalMeshInstanceInfo,
    ) -> Result<Handle<SkeletalMeshInstance>> {
        let ubo = self.alloc_ubo(std::mem::size_of::<ModelUniform>())?;
        let bone_ubo = self.alloc_ubo(MAX_BONES * 64)?;
        let bind_group = self.make_ubo_bind_group(
            format!("{} bind group", info.debug_name),
            self.skeletal_layout,
            vec![
                sub_slice(ubo, std::mem::size_of::<ModelUniform>()),
                sub_slice(bone_ubo, MAX_BONES * 64),
            ],
        )?;
        self.scene
            .skeletal_meshes
            .insert(SkeletalMeshInstance {
                ubo,
                bone_ubo,
                bind_group,
                mesh: info.mesh.clone(),
                active: true,
            })
            .ok_or(GPUError::SlotError("skeletal mesh instance"))
    }

    pub fn destroy_skeletal_mesh_instance(&mut self, handle: Handle<SkeletalMeshInstance>) {
        let Some(mesh) = self.scene.skeletal_meshes.get_mut_ref(handle) else {
            warn!("destroy of unknown skeletal mesh {handle:?}; skipped");
            return;
        };
        mesh.active = false;
        self.defer_scene(move |scene, device| {
            if let Some(mesh) = scene.skeletal_meshes.release(handle) {
                scene.allocator.free(mesh.ubo);
                scene.allocator.free(mesh.bone_ubo);
                let bind_group = mesh.bind_group;
                let _ = device.run_resource_job(move |f| f.destroy_bind_group(bind_group));
            }
        });
    }

    pub fn create_point_light_instance(
        &mut self,
        info: &PointLightInfo,
    ) -> Result<Handle<LightInstance>> {
        let ubo = self.alloc_ubo(std::mem::size_of::<LightParams>())?;
        let bind_group = self.make_ubo_bind_group(
            format!("{} bind group", info.debug_name),
            self.instance_layout,
            vec![sub_slice(ubo, std::mem::size_of::<LightParams>())],
        )?;
        self.scene
            .lights
            .insert(LightInstance {
                ubo,
                bind_group,
                params: info.params,
                active: true,
            })
            .ok_or(GPUError::SlotError("light instance"))
    }

    pub fn destroy_light_instance(&mut self, handle: Handle<LightInstance>) {
        let Some(light) = self.scene.lights.get_mut_ref(handle) else {
            warn!("destroy of unknown light {handle:?}; skipped");
            return;
        };
        light.active = false;
        self.defer_scene(move |scene, device| {
            if let Some(light) = scene.lights.release(handle) {
                scene.allocator.free(light.ubo);
                let bind_group = light.bind_group;
                let _ = device.run_resource_job(move |f| f.destroy_bind_group(bind_group));
            }
        });
    }

    /// Whether an instance still holds GPU resources (inactive-but-pending
    /// counts). Exposed for tests and tooling.
    pub fn sprite_resources_live(&self, handle: Handle<SpriteInstance>) -> bool {
        self.scene.sprites.get_ref(handle).is_some()
    }

    pub fn pending_destroys(&self) -> usize {
        self.deferred.len()
    }

    /// Drain the pipeline and tear everything down.
    pub fn shutdown(mut self) -> Result<()> {
        self.wait_all_in_flight()?;
        self.device.wait_idle()?;

        // Flush any still-counting deferred destroyers.
        for d in std::mem::take(&mut self.deferred) {
            match d.kind {
                DeferredKind::Factory(job) => {
                    let _ = self.device.run_resource_job(job);
                }
                DeferredKind::Scene(job) => job(&mut self.scene, &self.device),
            }
        }

        self.scene.allocator.destroy(&self.device)?;
        self.device.wait_idle()?;
        self.device.shutdown();
        Ok(())
    }
}

/// Resolve `config.backend` once, build that backend headless, and stand the
/// render system up on it. Windowed setups construct the backend themselves
/// (attach the window before the device spawns the render thread) and call
/// [`RenderSystem::new`] directly.
pub fn create_render_system(config: RendererConfig) -> Result<RenderSystem> {
    let backend: Box<dyn RenderBackend> = match config.backend {
        #[cfg(feature = "sumi-vulkan")]
        BackendKind::Vulkan => Box::new(crate::gpu::vulkan::VulkanBackend::new(
            &crate::gpu::vulkan::VulkanBackendInfo {
                swapchain: config.swapchain(),
                ..Default::default()
            },
        )?),
        #[cfg(feature = "sumi-wgpu")]
        BackendKind::Wgpu => Box::new(crate::gpu::wgpu::WgpuBackend::new(
            &crate::gpu::wgpu::WgpuBackendInfo {
                swapchain: config.swapchain(),
            },
        )?),
        #[allow(unreachable_patterns)]
        other => {
            warn!("backend {other:?} not compiled into this build");
            return Err(GPUError::Unimplemented("requested backend feature"));
        }
    };
    let device = RenderDevice::new(backend);
    RenderSystem::new(device, config)
}

struct TransparentDraw {
    mesh_bind_group: Handle<BindGroup>,
    vertex_buffer: BufferSlice,
    index_buffer: Option<(BufferSlice, IndexType)>,
    record: DrawRecord,
}

fn collect_submeshes(
    mesh: &MeshData,
    mesh_bind_group: Handle<BindGroup>,
    instance_key: u32,
    batchset: &mut BatchBuilder,
    transparent: &mut Vec<(Handle<BindGroup>, TransparentDraw)>,
) {
    for submesh in &mesh.submeshes {
        let record = match mesh.index_buffer {
            Some(_) => DrawRecord::Indexed(IndexedIndirectCommand {
                index_count: submesh.index_count,
                instance_count: 1,
                first_index: submesh.first_index,
                vertex_offset: submesh.first_vertex as i32,
                first_instance: 0,
            }),
            None => DrawRecord::NonIndexed(IndirectCommand {
                vertex_count: submesh.vertex_count,
                instance_count: 1,
                first_vertex: submesh.first_vertex,
                first_instance: 0,
            }),
        };

        if submesh.transparent {
            transparent.push((
                submesh.material,
                TransparentDraw {
                    mesh_bind_group,
                    vertex_buffer: mesh.vertex_buffer,
                    index_buffer: mesh.index_buffer.map(|b| (b, mesh.index_type)),
                    record,
                },
            ));
            continue;
        }

        batchset.push(
            SubmeshKey {
                material: submesh.material.key(),
                vertex_buffer: mesh.vertex_buffer.buffer.key(),
                index_buffer: mesh.index_buffer.map(|b| b.buffer.key()),
                offset: mesh.vertex_buffer.offset,
                instance: instance_key,
                size: if mesh.index_buffer.is_some() {
                    submesh.index_count
                } else {
                    submesh.vertex_count
                },
            },
            PendingDraw {
                material: submesh.material,
                vertex_buffer: mesh.vertex_buffer,
                index_buffer: mesh.index_buffer.map(|b| (b, mesh.index_type)),
                draw: BatchDraw {
                    mesh_bind_group,
                    record,
                },
            },
        );
    }
}

/// Prepass recording: position + per-draw descriptor only; the instance bind
/// group sits at `instance_slot` because the prepass layout has no material
/// set.
fn record_batches(
    cmds: &mut CommandList,
    batches: &[MeshBatch],
    record_offsets: &[Vec<u32>],
    indirect: BufferSlice,
    instance_slot: u32,
) {
    for (batch, offsets) in batches.iter().zip(record_offsets) {
        cmds.bind_vertex_buffer(batch.vertex_buffer);
        if let Some((slice, ty)) = batch.index_buffer {
            cmds.bind_index_buffer(slice, ty);
        }
        for (draw, offset) in batch.draws.iter().zip(offsets) {
            cmds.bind_bind_group(BindBindGroupOp {
                slot: instance_slot,
                group: draw.mesh_bind_group,
                dynamic_offset: None,
            });
            emit_indirect(cmds, draw, indirect, *offset);
        }
    }
}

/// Main-pass recording: material bind group per batch, mesh descriptor per
/// draw.
fn record_batches_with_materials(
    cmds: &mut CommandList,
    batches: &[MeshBatch],
    record_offsets: &[Vec<u32>],
    indirect: BufferSlice,
) {
    for (batch, offsets) in batches.iter().zip(record_offsets) {
        cmds.bind_bind_group(BindBindGroupOp {
            slot: 1,
            group: batch.material,
            dynamic_offset: None,
        });
        cmds.bind_vertex_buffer(batch.vertex_buffer);
        if let Some((slice, ty)) = batch.index_buffer {
            cmds.bind_index_buffer(slice, ty);
        }
        for (draw, offset) in batch.draws.iter().zip(offsets) {
            cmds.bind_bind_group(BindBindGroupOp {
                slot: 2,
                group: draw.mesh_bind_group,
                dynamic_offset: None,
            });
            emit_indirect(cmds, draw, indirect, *offset);
        }
    }
}

fn emit_indirect(cmds: &mut CommandList, draw: &BatchDraw, indirect: BufferSlice, offset: u32) {
    let op = DrawIndirectOp {
        buffer: BufferSlice {
            buffer: indirect.buffer,
            offset: indirect.offset + offset,
            size: draw.record.byte_len() as u32,
        },
        draw_count: 1,
        stride: draw.record.byte_len() as u32,
    };
    match draw.record {
        DrawRecord::Indexed(_) => cmds.draw_indexed_indirect(op),
        DrawRecord::NonIndexed(_) => cmds.draw_indirect(op),
    }
}

fn make_frame_targets(
    f: &mut dyn ResourceFactory,
    geometry_pass: Handle<RenderPass>,
    post_pass: Handle<RenderPass>,
    extent: Extent2D,
    swap_view: Option<Handle<ImageView>>,
) -> Result<(
    Handle<Image>,
    Handle<ImageView>,
    Handle<Image>,
    Handle<ImageView>,
    Handle<Framebuffer>,
    Handle<Framebuffer>,
)> {
    let color_image = f.make_image(&ImageInfo {
        debug_name: "frame color",
        dim: [extent.width, extent.height, 1],
        format: Format::BGRA8Unorm,
        usage: ImageUsage::COLOR_TARGET | ImageUsage::SAMPLED | ImageUsage::COPY_SRC,
        ..Default::default()
    })?;
    let color_view = f.make_image_view(&ImageViewInfo {
        debug_name: "frame color view",
        image: color_image,
        range: Default::default(),
    })?;
    let depth_image = f.make_image(&ImageInfo {
        debug_name: "frame depth",
        dim: [extent.width, extent.height, 1],
        format: Format::D32F,
        usage: ImageUsage::DEPTH_TARGET,
        ..Default::default()
    })?;
    let depth_view = f.make_image_view(&ImageViewInfo {
        debug_name: "frame depth view",
        image: depth_image,
        range: Default::default(),
    })?;

    let geometry_fb = f.make_framebuffer(&FramebufferInfo {
        debug_name: "geometry fb",
        render_pass: geometry_pass,
        attachments: &[color_view, depth_view],
        extent,
    })?;

    // Headless runs have no swap views; overlay then composites onto the
    // frame's own color target.
    let post_target = swap_view.unwrap_or(color_view);
    let post_fb = f.make_framebuffer(&FramebufferInfo {
        debug_name: "post fb",
        render_pass: post_pass,
        attachments: &[post_target],
        extent,
    })?;

    Ok((
        color_image,
        color_view,
        depth_image,
        depth_view,
        geometry_fb,
        post_fb,
    ))
}
