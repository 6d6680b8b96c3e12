//! Per-frame upload buffers
//!
//! One [`FrameResource`] lives in each slot of the frame ring. The CPU only
//! writes a slot after the ring has waited for the GPU to release it, so the
//! buffers here are never double-buffered internally. wgpu encoders are
//! transient, so there is no per-slot command allocator to keep.

use bytemuck::{Pod, Zeroable};
use nalgebra::Matrix4;

use super::upload::UploadBuffer;
use crate::error::Result;

/// Per-pass camera and timing constants.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct PassConstants {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub view_proj: [[f32; 4]; 4],
    pub eye_pos_w: [f32; 3],
    pub _pad0: f32,
    pub render_target_size: [f32; 2],
    pub inv_render_target_size: [f32; 2],
    pub near_z: f32,
    pub far_z: f32,
    pub total_time: f32,
    pub delta_time: f32,
}

/// Per-object transform constants.
///
/// The displacement fields are read by the GPU-waves vertex stage to sample
/// the height map and rebuild normals with the grid spacing.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct ObjectConstants {
    pub world: [[f32; 4]; 4],
    pub tex_transform: [[f32; 4]; 4],
    pub displacement_map_texel_size: [f32; 2],
    pub grid_spatial_step: f32,
    pub _pad0: f32,
}

impl Default for ObjectConstants {
    fn default() -> Self {
        let identity: [[f32; 4]; 4] = Matrix4::<f32>::identity().into();
        Self {
            world: identity,
            tex_transform: identity,
            displacement_map_texel_size: [1.0, 1.0],
            grid_spatial_step: 1.0,
            _pad0: 0.0,
        }
    }
}

/// Surface constants.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct MaterialConstants {
    pub diffuse_albedo: [f32; 4],
    pub fresnel_r0: [f32; 3],
    pub roughness: f32,
    pub mat_transform: [[f32; 4]; 4],
}

/// Per-instance data for instanced draws.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct InstanceData {
    pub world: [[f32; 4]; 4],
    pub tex_transform: [[f32; 4]; 4],
    pub material_index: u32,
    pub _pad: [u32; 3],
}

/// Vertex of the CPU-simulated wave mesh.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct WaveVertex {
    pub pos: [f32; 3],
    pub normal: [f32; 3],
    pub tex_c: [f32; 2],
}

/// Element counts of one frame resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameResourceCounts {
    pub pass_count: usize,
    pub object_count: usize,
    pub material_count: usize,
    pub instance_count: usize,
    /// Vertices of the dynamic wave mesh, if the scene streams one
    pub wave_vertex_count: Option<usize>,
}

impl Default for FrameResourceCounts {
    fn default() -> Self {
        Self {
            pass_count: 1,
            object_count: 1,
            material_count: 1,
            instance_count: 1,
            wave_vertex_count: None,
        }
    }
}

/// Buffers the CPU fills for one in-flight frame.
pub struct FrameResource {
    pub pass: UploadBuffer<PassConstants>,
    pub objects: UploadBuffer<ObjectConstants>,
    pub materials: UploadBuffer<MaterialConstants>,
    pub instances: UploadBuffer<InstanceData>,
    pub waves_vb: Option<UploadBuffer<WaveVertex>>,
}

impl FrameResource {
    /// Allocate every buffer at the given counts.
    ///
    /// # Errors
    /// `InvalidParameter` if any count is zero.
    pub fn new(device: &wgpu::Device, counts: &FrameResourceCounts) -> Result<Self> {
        let waves_vb = counts
            .wave_vertex_count
            .map(|count| UploadBuffer::new(device, "Wave Vertices", count, false))
            .transpose()?;

        Ok(Self {
            pass: UploadBuffer::new(device, "Pass Constants", counts.pass_count, true)?,
            objects: UploadBuffer::new(device, "Object Constants", counts.object_count, true)?,
            materials: UploadBuffer::new(
                device,
                "Material Constants",
                counts.material_count,
                true,
            )?,
            instances: UploadBuffer::new(
                device,
                "Instance Data",
                counts.instance_count,
                false,
            )?,
            waves_vb,
        })
    }
}
