//! Homogeneous affine transforms and the two compositions the pyramid needs.
//!
//! Matrices are `(ndim + 1) x (ndim + 1)`, row-major, acting on column vectors `[p, 1]`.
//! Every transform produced here maps an *output* pixel index to a *source* pixel index, which is
//! what pull-resampling consumes.

use crate::foundation::error::{PyramidError, PyramidResult};
use crate::geometry::aabb::BoundingBox;

/// Number of leading axes treated as spatial (x, y, z).
pub const SPATIAL_AXES: usize = 3;

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Transform {
    ndim: usize,
    m: Vec<f64>,
}

impl Transform {
    pub fn identity(ndim: usize) -> Self {
        let n = ndim + 1;
        let mut m = vec![0.0; n * n];
        for i in 0..n {
            m[i * n + i] = 1.0;
        }
        Self { ndim, m }
    }

    /// Wrap a row-major `(ndim + 1)^2` matrix.
    pub fn from_row_major(ndim: usize, values: Vec<f64>) -> PyramidResult<Self> {
        let n = ndim + 1;
        if values.len() != n * n {
            return Err(PyramidError::shape(format!(
                "a {ndim}-d transform needs {} values, got {}",
                n * n,
                values.len()
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(PyramidError::validation("transform values must be finite"));
        }
        Ok(Self { ndim, m: values })
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    pub fn as_row_major(&self) -> &[f64] {
        &self.m
    }

    #[inline]
    fn n(&self) -> usize {
        self.ndim + 1
    }

    #[inline]
    pub fn get(&self, r: usize, c: usize) -> f64 {
        self.m[r * self.n() + c]
    }

    #[inline]
    pub fn set(&mut self, r: usize, c: usize, v: f64) {
        let n = self.n();
        self.m[r * n + c] = v;
    }

    /// Diagonal entry `i`: the scale of axis `i` when the transform has no shear.
    pub fn diagonal(&self, i: usize) -> f64 {
        self.get(i, i)
    }

    /// Entry `i` of the translation column.
    pub fn translation(&self, i: usize) -> f64 {
        self.get(i, self.ndim)
    }

    /// Add `k * column(col)` to the translation column, i.e. pre-shift the input by `k` along
    /// axis `col`.
    pub fn shift_input(&mut self, col: usize, k: f64) {
        let n = self.n();
        for r in 0..n {
            self.m[r * n + self.ndim] += k * self.m[r * n + col];
        }
    }

    /// `self * rhs`.
    pub fn mul(&self, rhs: &Transform) -> PyramidResult<Transform> {
        if self.ndim != rhs.ndim {
            return Err(PyramidError::shape(format!(
                "cannot multiply a {}-d transform by a {}-d transform",
                self.ndim, rhs.ndim
            )));
        }
        let n = self.n();
        let mut m = vec![0.0; n * n];
        for r in 0..n {
            for c in 0..n {
                m[r * n + c] = (0..n).map(|k| self.m[r * n + k] * rhs.m[k * n + c]).sum();
            }
        }
        Ok(Transform { ndim: self.ndim, m })
    }

    /// Gauss-Jordan inverse with partial pivoting.
    pub fn inverse(&self) -> PyramidResult<Transform> {
        let n = self.n();
        let mut a = self.m.clone();
        let mut inv = Transform::identity(self.ndim).m;
        for col in 0..n {
            let pivot = (col..n)
                .max_by(|&i, &j| a[i * n + col].abs().total_cmp(&a[j * n + col].abs()))
                .unwrap_or(col);
            let p = a[pivot * n + col];
            if p.abs() < 1e-300 {
                return Err(PyramidError::shape("transform is singular"));
            }
            if pivot != col {
                for c in 0..n {
                    a.swap(pivot * n + c, col * n + c);
                    inv.swap(pivot * n + c, col * n + c);
                }
            }
            for c in 0..n {
                a[col * n + c] /= p;
                inv[col * n + c] /= p;
            }
            for r in 0..n {
                if r == col {
                    continue;
                }
                let f = a[r * n + col];
                if f == 0.0 {
                    continue;
                }
                for c in 0..n {
                    a[r * n + c] -= f * a[col * n + c];
                    inv[r * n + c] -= f * inv[col * n + c];
                }
            }
        }
        Ok(Transform {
            ndim: self.ndim,
            m: inv,
        })
    }

    /// Apply to a point (implicit homogeneous coordinate 1).
    pub fn apply_point(&self, p: &[f64]) -> Vec<f64> {
        let n = self.n();
        (0..self.ndim)
            .map(|r| {
                let row = &self.m[r * n..(r + 1) * n];
                row[..self.ndim]
                    .iter()
                    .zip(p)
                    .map(|(a, b)| a * b)
                    .sum::<f64>()
                    + row[self.ndim]
            })
            .collect()
    }

    /// Pixel to physical map of a box sampled at `scale` physical units per pixel on the spatial
    /// axes. Non-spatial axes map 1:1.
    fn box_to_world(ndim: usize, bbox: &BoundingBox, scale: [f64; 3]) -> Transform {
        let mut t = Transform::identity(ndim);
        for i in 0..ndim.min(SPATIAL_AXES).min(bbox.ndim()) {
            t.set(i, i, scale[i]);
            t.set(i, ndim, bbox.ori()[i] as f64);
        }
        t
    }

    /// Output pixel index -> tile pixel index.
    ///
    /// `inverse(tile) * (translate(output_box.ori) * scale(output_scale))`, where `output_scale`
    /// is the physical size of one output pixel per spatial axis.
    pub fn compose(
        output_box: &BoundingBox,
        output_scale: [f64; 3],
        tile_transform: &Transform,
    ) -> PyramidResult<Transform> {
        let dst2world = Self::box_to_world(tile_transform.ndim, output_box, output_scale);
        tile_transform.inverse()?.mul(&dst2world)
    }

    /// Destination node pixel index -> source node pixel index, for two nodes that have already
    /// been rendered over `dst_box` and `src_box`.
    ///
    /// Each side's pixel size is `box extent / node pixel count` per spatial axis.
    pub fn box_to_box(
        dst_shape: &[usize],
        dst_box: &BoundingBox,
        src_shape: &[usize],
        src_box: &BoundingBox,
    ) -> PyramidResult<Transform> {
        if dst_shape.len() != src_shape.len() {
            return Err(PyramidError::shape(format!(
                "node dimensionality differs: {} vs {}",
                dst_shape.len(),
                src_shape.len()
            )));
        }
        let ndim = src_shape.len();
        let pixel_size = |shape: &[usize], bbox: &BoundingBox| -> PyramidResult<[f64; 3]> {
            let mut s = [1.0; 3];
            for i in 0..ndim.min(SPATIAL_AXES).min(bbox.ndim()) {
                if shape[i] == 0 {
                    return Err(PyramidError::shape("node has an empty spatial axis"));
                }
                s[i] = bbox.shape()[i] as f64 / shape[i] as f64;
            }
            Ok(s)
        };
        let src2world = Self::box_to_world(ndim, src_box, pixel_size(src_shape, src_box)?);
        let dst2world = Self::box_to_world(ndim, dst_box, pixel_size(dst_shape, dst_box)?);
        src2world.inverse()?.mul(&dst2world)
    }
}
