//! CPU/GPU hand-off primitives
//!
//! A [`Fence`] is a monotonically increasing counter the GPU advances as work
//! retires; every submission returns a [`FenceToken`] naming the value that
//! marks it complete. The [`FrameResourceRing`] uses those tokens to decide
//! when a per-frame slot may be overwritten by the CPU again.
//!
//! Nothing here depends on wgpu: the GPU-backed fence lives in
//! `gpu::GpuFence`, while [`CpuFence`] is advanced by hand and backs the
//! tests and CPU-only loops.

mod fence;
mod frame_ring;

pub use fence::{CpuFence, Fence, FenceToken};
pub use frame_ring::{FrameResourceRing, SlotState};
