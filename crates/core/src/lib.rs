//! Wave Simulation Core Library
//!
//! Height-field water simulation on the CPU and GPU, a separable compute
//! blur, and the frame-resource model that lets the CPU record frames ahead
//! of the GPU without racing it.
//!
//! ## Layout
//!
//! - [`waves`] - CPU integrator, coefficients, role rotation, grid topology
//! - [`blur`] - Gaussian weights and the ping-pong pass schedule
//! - [`barrier`] - resource-state ledger checked by every GPU pass
//! - [`sync`] - fence abstraction and the fence-gated frame ring
//! - [`config`] - serde configuration with named presets
//! - [`timer`] - frame timing and scoped profiling
//! - `gpu` - wgpu executors for all of the above (feature `gpu`)
//!
//! Everything outside `gpu` builds and tests without a device.

pub mod barrier;
pub mod blur;
pub mod config;
pub mod error;
pub mod sync;
pub mod timer;
pub mod waves;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use barrier::{ResourceState, StateTracker, Transition};
pub use blur::{blur_schedule, gauss_weights, BlurOp, BlurResource, MAX_BLUR_RADIUS};
pub use config::{BlurConfig, DemoConfig, FrameConfig, WaveConfig, WAVE_THREAD_GROUP};
pub use error::{Result, WaveError};
pub use sync::{CpuFence, Fence, FenceToken, FrameResourceRing, SlotState};
pub use timer::{GameTimer, ProfilerScope};
pub use waves::{
    Disturbance, GridMesh, RandomDisturber, Role, RoleRing, WaveCoefficients, WaveField,
    WaveOp,
};

#[cfg(feature = "gpu")]
pub use gpu::{
    create_gpu_context_blocking, BlurPass, CommandStream, ComputeBlurFilter, CpuWavesPass,
    FrameLoop, FrameResource, GpuContext, GpuFence, GpuInitResult, GpuWaveSimulator,
    GpuWavesPass, RenderPass, ResourceId, UploadBuffer, VecAddDemo,
};
