//! Z-slab splitting for tiles that do not fit the working memory budget.

use crate::foundation::error::{PyramidError, PyramidResult};
use crate::geometry::transform::Transform;
use crate::volume::array::VolumeShape;

/// Axis the tile is split along.
const SLAB_AXIS: usize = 2;

/// One contiguous range of planes and the pixel-to-physical transform of its first plane.
#[derive(Debug, Clone, PartialEq)]
pub struct Slab {
    pub z0: usize,
    pub nz: usize,
    pub transform: Transform,
}

/// Plan for processing a tile in slabs.
///
/// Filtering needs the source and a same-sized buffer, so a tile needs twice its size in
/// working memory.
#[derive(Debug, Clone)]
pub struct SlabPlan {
    z: usize,
    dz: usize,
    count: usize,
    transform: Transform,
}

impl SlabPlan {
    pub fn new(
        shape: &VolumeShape,
        transform: &Transform,
        available_bytes: Option<u64>,
    ) -> PyramidResult<Self> {
        if shape.ndim() < 3 {
            return Err(PyramidError::shape(format!(
                "slab splitting needs a z axis, tile is {}-d",
                shape.ndim()
            )));
        }
        let z = shape.dims[SLAB_AXIS];
        let need = 2u64.saturating_mul(shape.nbytes() as u64);
        let n = match available_bytes {
            Some(avail) if avail > 0 => need.div_ceil(avail) as usize,
            Some(_) => usize::MAX,
            None => 1,
        };
        if n <= 1 {
            return Ok(Self {
                z,
                dz: z,
                count: 1,
                transform: transform.clone(),
            });
        }
        if n > z {
            return Err(PyramidError::resource(format!(
                "tile needs {n} slabs but has only {z} planes"
            )));
        }
        let dz = z.div_ceil(n);
        Ok(Self {
            z,
            dz,
            count: z.div_ceil(dz),
            transform: transform.clone(),
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_split(&self) -> bool {
        self.count > 1
    }

    /// Planes per slab; the last slab may be shorter.
    pub fn dz(&self) -> usize {
        self.dz
    }

    pub fn iter(&self) -> impl Iterator<Item = Slab> + '_ {
        (0..self.count).map(move |i| {
            let z0 = i * self.dz;
            let mut transform = self.transform.clone();
            transform.shift_input(SLAB_AXIS, z0 as f64);
            Slab {
                z0,
                nz: self.dz.min(self.z - z0),
                transform,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::array::PixelType;

    fn shape(z: usize) -> VolumeShape {
        VolumeShape::new(vec![10, 10, z], PixelType::U16)
    }

    #[test]
    fn unlimited_or_ample_budget_is_one_slab() {
        let t = Transform::identity(3);
        let p = SlabPlan::new(&shape(7), &t, None).unwrap();
        assert_eq!(p.count(), 1);
        let p = SlabPlan::new(&shape(7), &t, Some(1 << 20)).unwrap();
        assert!(!p.is_split());
        let only: Vec<_> = p.iter().collect();
        assert_eq!((only[0].z0, only[0].nz), (0, 7));
        assert_eq!(only[0].transform, t);
    }

    #[test]
    fn slabs_cover_z_exactly() {
        let t = Transform::identity(3);
        for z in [3usize, 10, 17, 64] {
            let bytes = shape(z).nbytes() as u64;
            for divisor in [1u64, 2, 3, 5] {
                let budget = (2 * bytes).div_ceil(divisor + 1);
                let Ok(p) = SlabPlan::new(&shape(z), &t, Some(budget)) else {
                    continue;
                };
                assert!(p.count() > 1, "z={z} budget={budget}");
                let slabs: Vec<_> = p.iter().collect();
                assert_eq!(slabs.iter().map(|s| s.nz).sum::<usize>(), z);
                let last = slabs.last().unwrap();
                assert_eq!(last.nz, z - (p.count() - 1) * p.dz());
                assert!(last.nz > 0);
                for w in slabs.windows(2) {
                    assert_eq!(w[0].z0 + w[0].nz, w[1].z0);
                }
            }
        }
    }

    #[test]
    fn slab_transform_accumulates_z_offset() {
        let mut t = Transform::identity(3);
        t.set(2, 2, 50.0);
        t.set(2, 3, 1000.0);
        let bytes = shape(10).nbytes() as u64;
        let p = SlabPlan::new(&shape(10), &t, Some(bytes / 2)).unwrap();
        assert_eq!(p.count(), 4);
        assert_eq!(p.dz(), 3);
        let slabs: Vec<_> = p.iter().collect();
        assert_eq!(slabs[3].nz, 1);
        assert_eq!(slabs[2].transform.translation(2), 1000.0 + 6.0 * 50.0);
        assert_eq!(slabs[0].transform.translation(2), 1000.0);
    }

    #[test]
    fn too_small_budget_or_too_few_axes_fail() {
        let t = Transform::identity(3);
        assert!(SlabPlan::new(&shape(2), &t, Some(1)).is_err());
        let flat = VolumeShape::new(vec![10, 10], PixelType::U8);
        assert!(SlabPlan::new(&flat, &Transform::identity(2), None).is_err());
    }
}
