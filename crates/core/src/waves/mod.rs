//! Height-field wave simulation
//!
//! Both the CPU integrator ([`WaveField`]) and the GPU simulator solve the
//! damped 2D wave equation with the same explicit finite-difference scheme:
//!
//! ```text
//! z[n+1] = k0·z[n-1] + k1·z[n] + k2·(z_l + z_r + z_t + z_b)[n]
//! ```
//!
//! with coefficients derived once from damping, time step, wave speed and
//! grid spacing (see [`WaveCoefficients`]).

mod cpu;
mod grid;
mod roles;

pub use cpu::{WaveField, MAX_CATCH_UP_STEPS, MIN_GRID_EXTENT};
pub use grid::GridMesh;
pub use roles::{
    dispatch_states, Role, RoleRing, WaveOp, DISTURB_OPS, RESTING_STATES, UPDATE_OPS,
};

use std::ops::RangeInclusive;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WaveError};

/// Finite-difference coefficients of the wave update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaveCoefficients {
    /// Weight of the previous height
    pub k0: f32,
    /// Weight of the current height
    pub k1: f32,
    /// Weight of the sum of the four current neighbours
    pub k2: f32,
}

impl WaveCoefficients {
    /// Derive the coefficients from the physical parameters.
    ///
    /// `d = damping·dt + 2`, `e = speed²·dt²/dx²`,
    /// `k0 = (damping·dt − 2)/d`, `k1 = (4 − 8e)/d`, `k2 = 2e/d`.
    ///
    /// # Errors
    /// `InvalidParameter` when `dx` is not positive or `d` is zero.
    pub fn new(damping: f32, dt: f32, speed: f32, dx: f32) -> Result<Self> {
        if dx <= 0.0 || !dx.is_finite() {
            return Err(WaveError::invalid_parameter(
                "spatial_step",
                format!("must be positive and finite, got {dx}"),
            ));
        }

        let d = damping * dt + 2.0;
        if d == 0.0 || !d.is_finite() {
            return Err(WaveError::invalid_parameter(
                "damping",
                format!("damping·dt + 2 must be non-zero, got {d}"),
            ));
        }
        let e = (speed * speed) * (dt * dt) / (dx * dx);

        Ok(Self {
            k0: (damping * dt - 2.0) / d,
            k1: (4.0 - 8.0 * e) / d,
            k2: (2.0 * e) / d,
        })
    }

    /// Apply the stencil to one cell.
    #[inline]
    #[must_use]
    pub fn step(&self, prev: f32, curr: f32, neighbour_sum: f32) -> f32 {
        self.k0 * prev + self.k1 * curr + self.k2 * neighbour_sum
    }
}

/// A single randomized disturbance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Disturbance {
    /// Target row
    pub row: usize,
    /// Target column
    pub col: usize,
    /// Height added to the target cell
    pub magnitude: f32,
}

/// Row/column margin kept clear by randomized disturbances.
pub const RANDOM_DISTURB_MARGIN: usize = 4;

/// Drops a random disturbance every fixed wall-clock interval.
///
/// Samples rows in `[4, rows-5]`, columns in `[4, cols-5]`.
#[derive(Debug, Clone)]
pub struct RandomDisturber {
    interval: f32,
    base_time: f32,
    magnitude: RangeInclusive<f32>,
    rng: StdRng,
}

impl RandomDisturber {
    /// Create a disturber firing every `interval` seconds.
    ///
    /// # Errors
    /// `InvalidParameter` for a non-positive interval or an empty magnitude
    /// range.
    pub fn new(interval: f32, magnitude: RangeInclusive<f32>, seed: u64) -> Result<Self> {
        if interval <= 0.0 || !interval.is_finite() {
            return Err(WaveError::invalid_parameter(
                "disturb_interval",
                format!("must be positive, got {interval}"),
            ));
        }
        if magnitude.is_empty() {
            return Err(WaveError::invalid_parameter(
                "disturb_magnitude",
                format!("empty range {magnitude:?}"),
            ));
        }
        Ok(Self {
            interval,
            base_time: 0.0,
            magnitude,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Disturbance due at `total_time`, if the interval has elapsed.
    ///
    /// Returns `None` while the interval has not elapsed or when the grid has
    /// no interior cells beyond the margin.
    pub fn poll(&mut self, total_time: f32, rows: usize, cols: usize) -> Option<Disturbance> {
        if total_time - self.base_time < self.interval {
            return None;
        }
        self.base_time += self.interval;
        self.sample(rows, cols)
    }

    /// Draw a disturbance without consulting the clock.
    pub fn sample(&mut self, rows: usize, cols: usize) -> Option<Disturbance> {
        let margin = RANDOM_DISTURB_MARGIN;
        if rows < 2 * margin + 1 || cols < 2 * margin + 1 {
            return None;
        }
        Some(Disturbance {
            row: self.rng.random_range(margin..=rows - margin - 1),
            col: self.rng.random_range(margin..=cols - margin - 1),
            magnitude: self.rng.random_range(self.magnitude.clone()),
        })
    }
}
