//! Grid topology for height-field consumers.
//!
//! The GPU simulator never reads heights back; a vertex shader displaces a
//! flat grid with the height texture instead. This builds that flat grid
//! with one vertex per texel, so texture coordinates land on texel centres
//! of a `rows × cols` displacement map.

use nalgebra::{Vector2, Vector3};

/// Flat triangle-list grid in the XZ plane.
#[derive(Debug, Clone)]
pub struct GridMesh {
    /// Vertex positions, row-major
    pub positions: Vec<Vector3<f32>>,
    /// Texture coordinates in `[0, 1]`, row-major
    pub tex_coords: Vec<Vector2<f32>>,
    /// Triangle-list indices
    pub indices: Vec<u32>,
    rows: usize,
    cols: usize,
}

impl GridMesh {
    /// Build a `rows × cols` vertex grid spaced by `spatial_step`, centred
    /// on the origin.
    #[must_use]
    pub fn new(rows: usize, cols: usize, spatial_step: f32) -> Self {
        let rows = rows.max(2);
        let cols = cols.max(2);
        let half_width = (cols - 1) as f32 * spatial_step * 0.5;
        let half_depth = (rows - 1) as f32 * spatial_step * 0.5;
        let du = 1.0 / (cols - 1) as f32;
        let dv = 1.0 / (rows - 1) as f32;

        let mut positions = Vec::with_capacity(rows * cols);
        let mut tex_coords = Vec::with_capacity(rows * cols);
        for i in 0..rows {
            let z = half_depth - i as f32 * spatial_step;
            for j in 0..cols {
                let x = -half_width + j as f32 * spatial_step;
                positions.push(Vector3::new(x, 0.0, z));
                tex_coords.push(Vector2::new(j as f32 * du, i as f32 * dv));
            }
        }

        let mut indices = Vec::with_capacity(6 * (rows - 1) * (cols - 1));
        let stride = cols as u32;
        for i in 0..rows as u32 - 1 {
            for j in 0..stride - 1 {
                let top = i * stride + j;
                let bottom = (i + 1) * stride + j;
                indices.extend_from_slice(&[top, top + 1, bottom, bottom, top + 1, bottom + 1]);
            }
        }

        Self {
            positions,
            tex_coords,
            indices,
            rows,
            cols,
        }
    }

    /// Number of vertex rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of vertex columns.
    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of triangles.
    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}
