//! N-dimensional axis-aligned bounding boxes in integer physical units (nm).

use crate::foundation::error::{PyramidError, PyramidResult};

/// Axis-aligned box: an origin and a non-negative extent per axis.
///
/// Coordinates are integers, so box arithmetic is exact.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct BoundingBox {
    ori: Vec<i64>,
    shape: Vec<i64>,
}

impl BoundingBox {
    /// Create a validated box. `ori` and `shape` must have the same length and every extent must
    /// be non-negative.
    pub fn new(ori: Vec<i64>, shape: Vec<i64>) -> PyramidResult<Self> {
        if ori.len() != shape.len() {
            return Err(PyramidError::validation(format!(
                "bounding box origin has {} axes but extent has {}",
                ori.len(),
                shape.len()
            )));
        }
        if let Some(e) = shape.iter().find(|&&e| e < 0) {
            return Err(PyramidError::validation(format!(
                "bounding box extent must be >= 0, got {e}"
            )));
        }
        Ok(Self { ori, shape })
    }

    /// A box at the origin with zero extent.
    pub fn zeros(ndim: usize) -> Self {
        Self {
            ori: vec![0; ndim],
            shape: vec![0; ndim],
        }
    }

    pub fn ndim(&self) -> usize {
        self.ori.len()
    }

    pub fn ori(&self) -> &[i64] {
        &self.ori
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    /// Exclusive upper corner on axis `i`.
    pub fn end(&self, i: usize) -> i64 {
        self.ori[i] + self.shape[i]
    }

    /// Overwrite origin and/or extent. A `None` argument leaves that part untouched.
    ///
    /// Changing dimensionality resizes both parts; axes without a new value are zeroed.
    pub fn set(&mut self, ori: Option<&[i64]>, shape: Option<&[i64]>) -> PyramidResult<()> {
        let ndim = ori.or(shape).map_or(self.ndim(), <[i64]>::len);
        if let (Some(o), Some(s)) = (ori, shape)
            && o.len() != s.len()
        {
            return Err(PyramidError::validation(
                "bounding box origin and extent lengths differ",
            ));
        }
        if let Some(s) = shape
            && s.iter().any(|&e| e < 0)
        {
            return Err(PyramidError::validation("bounding box extent must be >= 0"));
        }
        self.ori.resize(ndim, 0);
        self.shape.resize(ndim, 0);
        if let Some(o) = ori {
            self.ori.copy_from_slice(o);
        }
        if let Some(s) = shape {
            self.shape.copy_from_slice(s);
        }
        Ok(())
    }

    pub fn copy_from(&mut self, other: &BoundingBox) {
        self.ori.clone_from(&other.ori);
        self.shape.clone_from(&other.shape);
    }

    /// `true` when both boxes have the same dimensionality, origin and extent.
    pub fn same(&self, other: &BoundingBox) -> bool {
        self == other
    }

    /// Product of the extents.
    pub fn volume(&self) -> f64 {
        self.shape.iter().map(|&e| e as f64).product()
    }

    /// Grow `self` into the smallest box covering both boxes.
    pub fn union_in_place(&mut self, other: &BoundingBox) -> PyramidResult<()> {
        if self.ndim() != other.ndim() {
            return Err(PyramidError::shape(format!(
                "cannot union a {}-d box with a {}-d box",
                self.ndim(),
                other.ndim()
            )));
        }
        for i in 0..self.ndim() {
            let lo = self.ori[i].min(other.ori[i]);
            let hi = self.end(i).max(other.end(i));
            self.ori[i] = lo;
            self.shape[i] = hi - lo;
        }
        Ok(())
    }

    /// Half-open intersection test over the axes both boxes share.
    ///
    /// Boxes that only touch along a face do not hit.
    pub fn hit(&self, other: &BoundingBox) -> bool {
        let n = self.ndim().min(other.ndim());
        (0..n).all(|i| self.ori[i] < other.end(i) && other.ori[i] < self.end(i))
    }

    /// Split into `n` children, `n` a power of two.
    ///
    /// Bit `k` of `n - 1` marks axis `k` as split; child `i` takes the high half of a split axis
    /// when bit `k` of `i` is set. Only the lowest `log2(n)` axes are split, so trailing axes
    /// (e.g. z for a quadtree) keep their full extent. Odd extents put the extra unit in the high
    /// half so the children always tile the parent.
    pub fn subdivide(&self, n: usize) -> PyramidResult<Vec<BoundingBox>> {
        if n == 0 || !n.is_power_of_two() {
            return Err(PyramidError::validation(format!(
                "subdivision factor must be a power of two, got {n}"
            )));
        }
        let nsplit = n.trailing_zeros() as usize;
        if nsplit > self.ndim() {
            return Err(PyramidError::validation(format!(
                "cannot split {nsplit} axes of a {}-d box",
                self.ndim()
            )));
        }
        let mut out = Vec::with_capacity(n);
        for child in 0..n {
            let mut b = self.clone();
            for k in 0..nsplit {
                let lo = self.shape[k] / 2;
                if (child >> k) & 1 == 1 {
                    b.ori[k] = self.ori[k] + lo;
                    b.shape[k] = self.shape[k] - lo;
                } else {
                    b.shape[k] = lo;
                }
            }
            out.push(b);
        }
        Ok(out)
    }

    /// Sub-box selected with fractional coordinates on the first three axes.
    ///
    /// `ori` and `size` are fractions of this box's extent, typically in `[0, 1]`. Results are
    /// rounded to the nearest unit.
    pub fn select_fraction(&self, ori: [f64; 3], size: [f64; 3]) -> BoundingBox {
        let mut out = self.clone();
        for i in 0..self.ndim().min(3) {
            let e = self.shape[i] as f64;
            out.ori[i] = self.ori[i] + (ori[i] * e).round() as i64;
            out.shape[i] = ((size[i] * e).round() as i64).max(0);
        }
        out
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ori={:?} shape={:?}", self.ori, self.shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bb(ori: &[i64], shape: &[i64]) -> BoundingBox {
        BoundingBox::new(ori.to_vec(), shape.to_vec()).unwrap()
    }

    #[test]
    fn new_rejects_negative_extent_and_length_mismatch() {
        assert!(BoundingBox::new(vec![0, 0], vec![1, -1]).is_err());
        assert!(BoundingBox::new(vec![0, 0], vec![1]).is_err());
    }

    #[test]
    fn copy_makes_same() {
        let a = bb(&[10, 20, 30], &[100, 200, 300]);
        let mut b = bb(&[1, 2], &[1000, 2000]);
        b.copy_from(&a);
        assert!(a.same(&b));
    }

    #[test]
    fn subdivide_quad_matches_known_layout() {
        let a = bb(&[10, 20, 30], &[100, 200, 300]);
        let quad = a.subdivide(4).unwrap();
        let expected = [[10, 20, 30], [60, 20, 30], [10, 120, 30], [60, 120, 30]];
        for (child, o) in quad.iter().zip(expected) {
            assert_eq!(child.ori(), &o);
            assert_eq!(child.shape(), &[50, 100, 300]);
        }
    }

    #[test]
    fn subdivide_children_tile_parent() {
        let boxes = [
            bb(&[10, 20, 30], &[100, 200, 300]),
            bb(&[-7, 3, 0], &[11, 5, 9]),
            bb(&[0, 0, 0, 0], &[1, 1, 1, 3]),
        ];
        for b in &boxes {
            for n in [4usize, 8] {
                let children = b.subdivide(n).unwrap();
                let total: f64 = children.iter().map(BoundingBox::volume).sum();
                assert_eq!(total, b.volume());
                for (i, ci) in children.iter().enumerate() {
                    for cj in children.iter().skip(i + 1) {
                        if ci.volume() > 0.0 && cj.volume() > 0.0 {
                            assert!(!ci.hit(cj), "{ci} overlaps {cj}");
                        }
                    }
                    let mut u = ci.clone();
                    u.union_in_place(b).unwrap();
                    assert!(u.same(b), "{ci} escapes {b}");
                }
            }
        }
    }

    #[test]
    fn subdivide_leaves_unsplit_axes_alone() {
        let b = bb(&[0, 0, 0, 0], &[8, 8, 8, 3]);
        for child in b.subdivide(8).unwrap() {
            assert_eq!(child.shape()[3], 3);
            assert_eq!(child.ori()[3], 0);
        }
    }

    #[test]
    fn subdivide_rejects_non_power_of_two() {
        let b = bb(&[0, 0, 0], &[8, 8, 8]);
        assert!(b.subdivide(3).is_err());
        assert!(b.subdivide(0).is_err());
        assert!(b.subdivide(16).is_err());
    }

    #[test]
    fn union_covers_both() {
        let mut a = bb(&[10, 20, 30], &[100, 200, 300]);
        let c = bb(&[-11, 21, -13], &[50, 60, 70]);
        a.union_in_place(&c).unwrap();
        assert!(a.same(&bb(&[-11, 20, -13], &[121, 200, 343])));
    }

    #[test]
    fn hit_is_symmetric_and_excludes_touching() {
        let a = bb(&[10, 20, 30], &[100, 200, 300]);
        let c = bb(&[-11, 21, -13], &[50, 60, 70]);
        let far = bb(&[1000, 2000], &[1, 1]);
        assert!(a.hit(&c));
        assert!(c.hit(&a));
        assert!(!a.hit(&far));
        assert!(!far.hit(&a));

        let left = bb(&[0, 0, 0], &[10, 10, 10]);
        let right = bb(&[10, 0, 0], &[10, 10, 10]);
        assert!(!left.hit(&right));
        assert!(!right.hit(&left));

        let moved = bb(&[38, 81, 56], &[100, 200, 300]);
        assert!(!moved.hit(&c));
    }

    #[test]
    fn select_fraction_scales_first_three_axes() {
        let b = bb(&[100, 0, 0, 0], &[1000, 200, 40, 2]);
        let s = b.select_fraction([0.5, 0.0, 0.25], [0.5, 1.0, 0.5]);
        assert_eq!(s.ori(), &[600, 0, 10, 0]);
        assert_eq!(s.shape(), &[500, 200, 20, 2]);
    }

    #[test]
    fn select_fraction_rounds_to_nearest_unit() {
        let b = bb(&[0, 0, 0], &[3000, 1000, 100]);
        // 4/3 of 3000 is 3999.99.. in floating point.
        let s = b.select_fraction([-1.0 / 6.0, 0.0, 0.0], [4.0 / 3.0, 2.0 / 3.0, 1.0]);
        assert_eq!(s.ori()[0], -500);
        assert_eq!(s.shape()[0], 4000);
        assert_eq!(s.shape()[1], 667);
    }

    #[test]
    fn set_resizes_dimensionality() {
        let mut b = BoundingBox::zeros(2);
        b.set(Some(&[1, 2, 3]), Some(&[4, 5, 6])).unwrap();
        assert_eq!(b.ndim(), 3);
        b.set(Some(&[7, 8, 9]), None).unwrap();
        assert_eq!(b.shape(), &[4, 5, 6]);
        assert!(b.set(None, Some(&[1, -1, 1])).is_err());
    }
}
