//! GPU executors
//!
//! wgpu implementations of the wave simulator, the compute blur, the
//! compute-add readback demo and the per-frame upload buffers, all driven
//! through one injected [`GpuContext`].
//!
//! Every pass records into a [`CommandStream`], which checks each declared
//! resource-state transition against the context's ledger before the work
//! is encoded. Submitting a stream returns a [`FenceToken`](crate::FenceToken);
//! anything that reads GPU-written memory back takes that token.

pub mod blur;
pub mod context;
pub mod fence;
pub mod frame_resource;
pub mod render_loop;
pub mod stream;
pub mod upload;
pub mod vec_add;
pub mod waves;

pub use blur::{ComputeBlurFilter, BLUR_FORMAT};
pub use context::{create_gpu_context_blocking, GpuContext, GpuInitResult, ResourceId};
pub use fence::GpuFence;
pub use frame_resource::{
    FrameResource, FrameResourceCounts, InstanceData, MaterialConstants, ObjectConstants,
    PassConstants, WaveVertex,
};
pub use render_loop::{BlurPass, Camera, CpuWavesPass, FrameLoop, GpuWavesPass, RenderPass};
pub use stream::CommandStream;
pub use upload::{constant_buffer_byte_size, UploadBuffer};
pub use vec_add::{
    vec_add_inputs, vec_add_reference, VecAddData, VecAddDemo, VEC_ADD_ELEMENTS,
};
pub use waves::GpuWaveSimulator;
