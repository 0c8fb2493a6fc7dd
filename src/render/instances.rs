use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::gpu::{BindGroup, BufferSlice, IndexType};
use crate::utils::Handle;

pub const MAX_BONES: usize = 128;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraUniform {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub view_proj: [[f32; 4]; 4],
}

impl CameraUniform {
    pub fn new(view: Mat4, proj: Mat4) -> Self {
        Self {
            view: view.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
            view_proj: (proj * view).to_cols_array_2d(),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ModelUniform {
    pub model: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, Default)]
pub struct LightParams {
    pub position: [f32; 4],
    pub color: [f32; 4],
    /// x = radius, y = intensity, z/w unused.
    pub attenuation: [f32; 4],
}

/// One submesh of a mesh asset: a material reference plus the index/vertex
/// range it draws.
#[derive(Debug, Clone, Copy)]
pub struct SubmeshDesc {
    pub material: Handle<BindGroup>,
    pub first_index: u32,
    pub index_count: u32,
    pub first_vertex: u32,
    pub vertex_count: u32,
    pub transparent: bool,
}

/// Geometry buffers resolved by the asset layer; the orchestrator never loads
/// or decodes anything itself.
#[derive(Debug, Clone)]
pub struct MeshData {
    pub vertex_buffer: BufferSlice,
    pub index_buffer: Option<BufferSlice>,
    pub index_type: IndexType,
    pub submeshes: Vec<SubmeshDesc>,
}

pub struct CameraInstance {
    pub(crate) ubo: BufferSlice,
    pub(crate) bind_group: Handle<BindGroup>,
    pub(crate) view: Mat4,
    pub(crate) proj: Mat4,
    pub(crate) active: bool,
}

pub struct SpriteInstance {
    pub(crate) ubo: BufferSlice,
    pub(crate) bind_group: Handle<BindGroup>,
    pub(crate) material: Handle<BindGroup>,
    pub(crate) vertex_buffer: BufferSlice,
    pub(crate) vertex_count: u32,
    pub(crate) transparent: bool,
    pub(crate) active: bool,
}

pub struct StaticMeshInstance {
    pub(crate) ubo: BufferSlice,
    pub(crate) bind_group: Handle<BindGroup>,
    pub(crate) mesh: MeshData,
    pub(crate) active: bool,
}

pub struct SkeletalMeshInstance {
    pub(crate) ubo: BufferSlice,
    pub(crate) bone_ubo: BufferSlice,
    pub(crate) bind_group: Handle<BindGroup>,
    pub(crate) mesh: MeshData,
    pub(crate) active: bool,
}

pub struct LightInstance {
    pub(crate) ubo: BufferSlice,
    pub(crate) bind_group: Handle<BindGroup>,
    pub(crate) params: LightParams,
    pub(crate) active: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CameraInfo {
    pub debug_name: String,
}

#[derive(Debug, Clone)]
pub struct SpriteInstanceInfo {
    pub debug_name: String,
    pub material: Handle<BindGroup>,
    pub vertex_buffer: BufferSlice,
    pub vertex_count: u32,
    pub transparent: bool,
}

#[derive(Debug, Clone)]
pub struct StaticMeshInstanceInfo {
    pub debug_name: String,
    pub mesh: MeshData,
}

#[derive(Debug, Clone)]
pub struct SkeletalMeshInstanceInfo {
    pub debug_name: String,
    pub mesh: MeshData,
}

#[derive(Debug, Clone, Default)]
pub struct PointLightInfo {
    pub debug_name: String,
    pub params: LightParams,
}

/// Per-frame instance updates fed into `pre_render_frame`. Produced by the
/// entity/component layer; the orchestrator only consumes the list.
#[derive(Default)]
pub struct FrameUpdates {
    pub cameras: Vec<(Handle<CameraInstance>, Mat4, Mat4)>,
    pub mesh_transforms: Vec<(Handle<StaticMeshInstance>, Mat4)>,
    pub sprite_transforms: Vec<(Handle<SpriteInstance>, Mat4)>,
    pub skeletal_transforms: Vec<(Handle<SkeletalMeshInstance>, Mat4, Vec<Mat4>)>,
    pub lights: Vec<(Handle<LightInstance>, LightParams)>,
}

/// What to draw this frame.
#[derive(Default, Clone)]
pub struct SubmittedFrame {
    pub camera: Handle<CameraInstance>,
    pub static_meshes: Vec<Handle<StaticMeshInstance>>,
    pub skeletal_meshes: Vec<Handle<SkeletalMeshInstance>>,
    pub sprites: Vec<Handle<SpriteInstance>>,
}
