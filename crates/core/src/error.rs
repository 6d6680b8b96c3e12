//! Error type shared by every wave-simulation component.
//!
//! Variants follow three families:
//! - construction-time preconditions (grid geometry, blur radius, ring size),
//!   reported before any GPU object exists;
//! - usage preconditions (disturb coordinates, buffer indices), which are
//!   programmer errors the caller is expected to clamp away;
//! - device and synchronization failures, which abort the operation and are
//!   never retried internally.

use std::time::Duration;

use thiserror::Error;

use crate::sync::SlotState;

/// Result alias used throughout the crate.
pub type Result<T, E = WaveError> = std::result::Result<T, E>;

/// Everything that can go wrong while building or driving a simulator.
#[derive(Debug, Error)]
pub enum WaveError {
    /// Grid too small for the finite-difference stencil.
    #[error("grid {rows}x{cols} is too small (minimum {min}x{min})")]
    InvalidGridSize {
        /// Requested row count
        rows: usize,
        /// Requested column count
        cols: usize,
        /// Minimum accepted extent in both directions
        min: usize,
    },

    /// GPU grid extents do not tile the compute thread group.
    #[error("grid {rows}x{cols} is not divisible by the {group}x{group} thread group")]
    GridNotDivisible {
        /// Requested row count
        rows: u32,
        /// Requested column count
        cols: u32,
        /// Thread-group edge length
        group: u32,
    },

    /// Blur kernel wider than the shader's constant layout can encode.
    #[error("blur radius {radius} exceeds the maximum of {max}")]
    BlurRadiusTooLarge {
        /// Radius derived from sigma
        radius: usize,
        /// Largest supported radius
        max: usize,
    },

    /// A render or blur target with a zero extent.
    #[error("target size {width}x{height} is empty")]
    InvalidDimensions {
        /// Requested width
        width: u32,
        /// Requested height
        height: u32,
    },

    /// A scalar parameter is outside its valid domain.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        /// Parameter name
        name: &'static str,
        /// Human-readable reason
        reason: String,
    },

    /// Frame ring needs at least two slots.
    #[error("frame ring needs at least 2 slots, got {0}")]
    InvalidRingSize(usize),

    /// Disturb coordinates fall inside the protected boundary margin.
    #[error("disturb at ({row}, {col}) is outside the valid range rows {row_range:?}, cols {col_range:?}")]
    DisturbOutOfBounds {
        /// Requested row
        row: usize,
        /// Requested column
        col: usize,
        /// Inclusive valid row range
        row_range: (usize, usize),
        /// Inclusive valid column range
        col_range: (usize, usize),
    },

    /// Element index past the end of an upload buffer.
    #[error("index {index} out of range for buffer `{buffer}` with {len} elements")]
    IndexOutOfRange {
        /// Buffer label
        buffer: &'static str,
        /// Requested element
        index: usize,
        /// Element count
        len: usize,
    },

    /// No compatible adapter was found.
    #[error("no compatible GPU adapter found")]
    NoAdapter,

    /// Adapter found but device creation failed.
    #[error("failed to create GPU device on `{adapter}`: {message}")]
    DeviceCreation {
        /// Adapter name
        adapter: String,
        /// Driver message
        message: String,
    },

    /// Mapping a readback buffer failed.
    #[error("buffer mapping failed: {0}")]
    BufferMapping(String),

    /// Bounded fence wait expired before the GPU reached the value.
    #[error("fence did not reach {value} within {timeout:?} (completed {completed})")]
    FenceTimeout {
        /// Awaited fence value
        value: u64,
        /// Last observed completed value
        completed: u64,
        /// Wait budget
        timeout: Duration,
    },

    /// `advance` called while the current slot has not been submitted.
    #[error("frame slot {0} is still recording; submit it before advancing")]
    SlotStillRecording(usize),

    /// A submission was stamped on a slot that is not recording.
    #[error("frame slot {slot} is {state:?}, expected Recording")]
    SlotNotRecording {
        /// Slot index
        slot: usize,
        /// Observed state
        state: SlotState,
    },

    /// Declared `before` state does not match the tracked state.
    #[error("resource `{resource}` is in {actual:?}, transition expected {expected:?}")]
    StateMismatch {
        /// Resource label
        resource: String,
        /// State the transition claimed
        expected: crate::ResourceState,
        /// State the ledger holds
        actual: crate::ResourceState,
    },

    /// Transition on a resource the ledger never saw.
    #[error("resource `{0}` is not tracked")]
    UnknownResource(String),

    /// Resource registered twice.
    #[error("resource `{0}` is already tracked")]
    DuplicateResource(String),

    /// A mutex was poisoned by a panic on another thread.
    #[error("lock `{0}` was poisoned by a panic in another thread")]
    LockPoisoned(&'static str),

    /// File output failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WaveError {
    /// Shorthand for [`WaveError::InvalidParameter`].
    pub fn invalid_parameter(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    /// Whether the error is a bounded-wait expiry the caller may retry.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::FenceTimeout { .. })
    }
}
