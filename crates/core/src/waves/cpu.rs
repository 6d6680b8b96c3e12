//! CPU wave integrator
//!
//! Two full height buffers are kept: the step reads `curr` and writes the
//! new heights over `prev`, then the two vectors are swapped. Writing in
//! place would let already-updated neighbours leak into the stencil.
//!
//! Rows are independent once `prev` and `curr` are distinct buffers, so both
//! the update and the normal pass fan out per row with rayon; the join at
//! the end of the update is the barrier before normals are recomputed.

use nalgebra::Vector3;
use rayon::prelude::*;
use tracing::{debug, warn};

use super::WaveCoefficients;
use crate::config::WaveConfig;
use crate::error::{Result, WaveError};

/// Smallest grid the 4-neighbour stencil plus boundary margin accepts.
pub const MIN_GRID_EXTENT: usize = 4;

/// Cells kept clear of direct disturbance at each edge.
const DISTURB_MARGIN: usize = 2;

/// Most fixed steps one [`WaveField::update`] integrates; time beyond that
/// is dropped.
pub const MAX_CATCH_UP_STEPS: usize = 8;

/// Height field integrated on the CPU.
///
/// Positions are laid out row-major, centred on the origin in the XZ plane,
/// with height along +Y.
#[derive(Debug, Clone)]
pub struct WaveField {
    rows: usize,
    cols: usize,
    spatial_step: f32,
    time_step: f32,
    coefficients: WaveCoefficients,

    prev: Vec<Vector3<f32>>,
    curr: Vec<Vector3<f32>>,
    normals: Vec<Vector3<f32>>,
    tangents: Vec<Vector3<f32>>,

    accumulator: f32,
}

impl WaveField {
    /// Create a flat field.
    ///
    /// # Arguments
    /// * `rows`, `cols` - Grid extent in vertices (both at least 4)
    /// * `dx` - Spacing between vertices
    /// * `dt` - Fixed integration step in seconds
    /// * `speed` - Wave propagation speed
    /// * `damping` - Damping factor
    ///
    /// # Errors
    /// `InvalidGridSize` for grids smaller than 4×4, `InvalidParameter` for a
    /// non-positive step or spacing.
    pub fn new(
        rows: usize,
        cols: usize,
        dx: f32,
        dt: f32,
        speed: f32,
        damping: f32,
    ) -> Result<Self> {
        if rows < MIN_GRID_EXTENT || cols < MIN_GRID_EXTENT {
            return Err(WaveError::InvalidGridSize {
                rows,
                cols,
                min: MIN_GRID_EXTENT,
            });
        }
        if dt <= 0.0 || !dt.is_finite() {
            return Err(WaveError::invalid_parameter(
                "time_step",
                format!("must be positive, got {dt}"),
            ));
        }
        let coefficients = WaveCoefficients::new(damping, dt, speed, dx)?;

        let flat = Self::flat_grid(rows, cols, dx);
        let count = rows * cols;

        debug!(rows, cols, dx, dt, ?coefficients, "created CPU wave field");

        Ok(Self {
            rows,
            cols,
            spatial_step: dx,
            time_step: dt,
            coefficients,
            prev: flat.clone(),
            curr: flat,
            normals: vec![Vector3::y(); count],
            tangents: vec![Vector3::x(); count],
            accumulator: 0.0,
        })
    }

    /// Create a field from a [`WaveConfig`].
    ///
    /// # Errors
    /// Same as [`WaveField::new`].
    pub fn from_config(config: &WaveConfig) -> Result<Self> {
        Self::new(
            config.rows as usize,
            config.cols as usize,
            config.spatial_step,
            config.time_step,
            config.speed,
            config.damping,
        )
    }

    fn flat_grid(rows: usize, cols: usize, dx: f32) -> Vec<Vector3<f32>> {
        let half_width = (cols - 1) as f32 * dx * 0.5;
        let half_depth = (rows - 1) as f32 * dx * 0.5;

        (0..rows)
            .flat_map(|i| {
                let z = half_depth - i as f32 * dx;
                (0..cols).map(move |j| Vector3::new(-half_width + j as f32 * dx, 0.0, z))
            })
            .collect()
    }

    /// Discard all motion and return to the flat initial grid.
    pub fn reset(&mut self) {
        let flat = Self::flat_grid(self.rows, self.cols, self.spatial_step);
        self.prev.clone_from(&flat);
        self.curr = flat;
        self.normals.fill(Vector3::y());
        self.tangents.fill(Vector3::x());
        self.accumulator = 0.0;
    }

    /// Advance by `elapsed` seconds of wall-clock time.
    ///
    /// Time accumulates until it covers a whole fixed step; each covered
    /// step is integrated, so a long frame catches up by at most
    /// [`MAX_CATCH_UP_STEPS`]. Negative or non-finite `elapsed` is ignored.
    /// Returns the number of steps taken.
    pub fn update(&mut self, elapsed: f32) -> usize {
        if !elapsed.is_finite() || elapsed < 0.0 {
            warn!(elapsed, "ignoring invalid elapsed time");
            return 0;
        }
        self.accumulator += elapsed;

        let mut steps = 0;
        while self.accumulator >= self.time_step && steps < MAX_CATCH_UP_STEPS {
            self.step();
            self.accumulator -= self.time_step;
            steps += 1;
        }
        if self.accumulator >= self.time_step {
            debug!(
                dropped = self.accumulator,
                "wave field fell behind; dropping accumulated time"
            );
            self.accumulator %= self.time_step;
        }

        if steps > 0 {
            self.compute_normals();
        }
        steps
    }

    /// One discrete step: write the new heights into `prev`, then swap.
    fn step(&mut self) {
        let rows = self.rows;
        let cols = self.cols;
        let k = self.coefficients;
        let curr = &self.curr;

        self.prev
            .par_chunks_mut(cols)
            .enumerate()
            .for_each(|(i, row)| {
                // Boundary rows are fixed
                if i == 0 || i == rows - 1 {
                    return;
                }
                for j in 1..cols - 1 {
                    let idx = i * cols + j;
                    let neighbours = curr[idx - 1].y
                        + curr[idx + 1].y
                        + curr[idx - cols].y
                        + curr[idx + cols].y;
                    row[j].y = k.step(row[j].y, curr[idx].y, neighbours);
                }
            });

        std::mem::swap(&mut self.prev, &mut self.curr);
    }

    /// Recompute interior normals and tangents from `curr` by central
    /// differences.
    fn compute_normals(&mut self) {
        let rows = self.rows;
        let cols = self.cols;
        let two_dx = 2.0 * self.spatial_step;
        let curr = &self.curr;

        self.normals
            .par_chunks_mut(cols)
            .zip(self.tangents.par_chunks_mut(cols))
            .enumerate()
            .for_each(|(i, (normal_row, tangent_row))| {
                if i == 0 || i == rows - 1 {
                    return;
                }
                for j in 1..cols - 1 {
                    let idx = i * cols + j;
                    let l = curr[idx - 1].y;
                    let r = curr[idx + 1].y;
                    let t = curr[idx - cols].y;
                    let b = curr[idx + cols].y;

                    normal_row[j] = Vector3::new(l - r, two_dx, b - t).normalize();
                    tangent_row[j] = Vector3::new(two_dx, r - l, 0.0).normalize();
                }
            });
    }

    /// Inclusive range of rows accepted by [`WaveField::disturb`].
    #[must_use]
    pub fn disturb_row_range(&self) -> (usize, usize) {
        (DISTURB_MARGIN, self.rows - 1 - DISTURB_MARGIN)
    }

    /// Inclusive range of columns accepted by [`WaveField::disturb`].
    #[must_use]
    pub fn disturb_col_range(&self) -> (usize, usize) {
        (DISTURB_MARGIN, self.cols - 1 - DISTURB_MARGIN)
    }

    /// Raise cell `(row, col)` by `magnitude` and its four neighbours by
    /// half of it.
    ///
    /// # Errors
    /// `DisturbOutOfBounds` within two cells of any edge.
    pub fn disturb(&mut self, row: usize, col: usize, magnitude: f32) -> Result<()> {
        let row_range = self.disturb_row_range();
        let col_range = self.disturb_col_range();
        if row < row_range.0 || row > row_range.1 || col < col_range.0 || col > col_range.1 {
            return Err(WaveError::DisturbOutOfBounds {
                row,
                col,
                row_range,
                col_range,
            });
        }

        let half = 0.5 * magnitude;
        let idx = row * self.cols + col;
        self.curr[idx].y += magnitude;
        self.curr[idx - 1].y += half;
        self.curr[idx + 1].y += half;
        self.curr[idx - self.cols].y += half;
        self.curr[idx + self.cols].y += half;
        Ok(())
    }

    /// Number of rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Vertex count (`rows × cols`).
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.rows * self.cols
    }

    /// Triangle count of the matching grid mesh.
    #[must_use]
    pub fn triangle_count(&self) -> usize {
        2 * (self.rows - 1) * (self.cols - 1)
    }

    /// Extent along X.
    #[must_use]
    pub fn width(&self) -> f32 {
        self.cols as f32 * self.spatial_step
    }

    /// Extent along Z.
    #[must_use]
    pub fn depth(&self) -> f32 {
        self.rows as f32 * self.spatial_step
    }

    /// Spacing between vertices.
    #[must_use]
    pub fn spatial_step(&self) -> f32 {
        self.spatial_step
    }

    /// Fixed integration step.
    #[must_use]
    pub fn time_step(&self) -> f32 {
        self.time_step
    }

    /// Coefficients derived at construction.
    #[must_use]
    pub fn coefficients(&self) -> WaveCoefficients {
        self.coefficients
    }

    /// Position of vertex `i`.
    #[must_use]
    pub fn position(&self, i: usize) -> Vector3<f32> {
        self.curr[i]
    }

    /// Height of cell `(row, col)`.
    #[must_use]
    pub fn height(&self, row: usize, col: usize) -> f32 {
        self.curr[row * self.cols + col].y
    }

    /// Unit normal of vertex `i`.
    #[must_use]
    pub fn normal(&self, i: usize) -> Vector3<f32> {
        self.normals[i]
    }

    /// Unit tangent (along +X) of vertex `i`.
    #[must_use]
    pub fn tangent(&self, i: usize) -> Vector3<f32> {
        self.tangents[i]
    }

    /// Current positions, row-major.
    #[must_use]
    pub fn positions(&self) -> &[Vector3<f32>] {
        &self.curr
    }

    /// Current normals, row-major.
    #[must_use]
    pub fn normals(&self) -> &[Vector3<f32>] {
        &self.normals
    }

    /// Largest absolute height in the field.
    #[must_use]
    pub fn max_amplitude(&self) -> f32 {
        self.curr
            .par_iter()
            .map(|p| p.y.abs())
            .reduce(|| 0.0, f32::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn demo_field() -> WaveField {
        WaveField::new(128, 128, 1.0, 0.03, 4.0, 0.2).unwrap()
    }

    #[test]
    fn test_rejects_tiny_grid() {
        assert!(matches!(
            WaveField::new(3, 10, 1.0, 0.03, 4.0, 0.2),
            Err(WaveError::InvalidGridSize { .. })
        ));
        assert!(WaveField::new(4, 4, 1.0, 0.03, 4.0, 0.2).is_ok());
    }

    #[test]
    fn test_initial_grid_is_centred() {
        let field = WaveField::new(5, 9, 0.5, 0.03, 4.0, 0.2).unwrap();
        let first = field.position(0);
        let last = field.position(field.vertex_count() - 1);

        assert_relative_eq!(first.x, -2.0);
        assert_relative_eq!(first.z, 1.0);
        assert_relative_eq!(last.x, 2.0);
        assert_relative_eq!(last.z, -1.0);
        assert!(field.positions().iter().all(|p| p.y == 0.0));
        assert_eq!(field.triangle_count(), 2 * 4 * 8);
    }

    #[test]
    fn test_disturb_rejects_boundary_band() {
        let mut field = WaveField::new(16, 20, 1.0, 0.03, 4.0, 0.2).unwrap();
        let (rows, cols) = (field.rows(), field.cols());

        for i in 0..rows {
            for j in 0..cols {
                let near_edge = i <= 1 || i >= rows - 2 || j <= 1 || j >= cols - 2;
                let result = field.disturb(i, j, 0.1);
                assert_eq!(result.is_err(), near_edge, "cell ({i}, {j})");
            }
        }
    }

    #[test]
    fn test_disturb_shape() {
        let mut field = demo_field();
        field.disturb(10, 20, 0.8).unwrap();

        assert_eq!(field.height(10, 20), 0.8);
        assert_eq!(field.height(9, 20), 0.4);
        assert_eq!(field.height(11, 20), 0.4);
        assert_eq!(field.height(10, 19), 0.4);
        assert_eq!(field.height(10, 21), 0.4);
        assert_eq!(field.height(9, 19), 0.0);
    }

    #[test]
    fn test_flat_field_stays_flat() {
        let mut field = demo_field();
        for _ in 0..50 {
            field.update(0.03);
        }
        assert_eq!(field.max_amplitude(), 0.0);
        assert!(field.normals().iter().all(|n| *n == Vector3::y()));
    }

    #[test]
    fn test_accumulator_steps() {
        let mut field = demo_field();
        assert_eq!(field.update(0.01), 0);
        assert_eq!(field.update(0.01), 0);
        // 0.07 accumulated covers two steps of 0.03
        assert_eq!(field.update(0.05), 2);
        assert_eq!(field.update(0.0), 0);
    }

    #[test]
    fn test_single_step_after_disturb() {
        let mut field = demo_field();
        let k = field.coefficients();
        field.disturb(64, 64, 0.5).unwrap();

        assert_eq!(field.update(0.03), 1);

        // prev was flat, so the centre is k1·0.5 + k2·(4·0.25)
        let expected = k.step(0.0, 0.5, 1.0);
        assert_relative_eq!(field.height(64, 64), expected, epsilon = 1e-6);

        for i in 0..field.rows() {
            for j in 0..field.cols() {
                let distance = i.abs_diff(64) + j.abs_diff(64);
                if distance > 2 {
                    assert_eq!(field.height(i, j), 0.0, "cell ({i}, {j})");
                }
            }
        }
    }

    #[test]
    fn test_normals_tilt_away_from_bump() {
        let mut field = demo_field();
        field.disturb(64, 64, 0.5).unwrap();
        field.update(0.03);

        let cols = field.cols();
        // West of a raised centre, the surface rises toward +X
        let west = field.normal(64 * cols + 62);
        assert!(west.x < 0.0);
        assert_relative_eq!(west.norm(), 1.0, epsilon = 1e-5);
        assert_relative_eq!(field.tangent(64 * cols + 62).norm(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_long_pause_is_capped() {
        let mut field = demo_field();
        field.disturb(64, 64, 0.5).unwrap();

        assert_eq!(field.update(1.0e7), MAX_CATCH_UP_STEPS);
        assert_eq!(field.update(4_000_000.0), MAX_CATCH_UP_STEPS);
        // Leftover time is below one step, so the next tiny frame does nothing
        assert_eq!(field.update(0.0), 0);
        assert!(field.max_amplitude().is_finite());
    }

    #[test]
    fn test_invalid_elapsed_is_ignored() {
        let mut field = demo_field();
        assert_eq!(field.update(f32::INFINITY), 0);
        assert_eq!(field.update(f32::NAN), 0);
        assert_eq!(field.update(-1.0), 0);

        // The accumulator is untouched, so normal stepping resumes
        assert_eq!(field.update(0.03), 1);
    }

    #[test]
    fn test_reset() {
        let mut field = demo_field();
        field.disturb(30, 30, 1.0).unwrap();
        field.update(0.1);
        field.reset();
        assert_eq!(field.max_amplitude(), 0.0);
    }
}
