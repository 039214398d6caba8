use crate::foundation::error::{PyramidError, PyramidResult};
use crate::geometry::aabb::BoundingBox;
use crate::geometry::transform::SPATIAL_AXES;
use crate::volume::array::{Volume, VolumeShape};

/// A rendered node: either a slot borrowed from a [`WorkspacePool`] or a volume owned outright
/// (e.g. one produced by a loader). Both kinds go back through [`WorkspacePool::release`].
#[derive(Debug)]
pub enum Node {
    Pooled(usize),
    Owned(Volume),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkspacePoolStats {
    pub allocations: u64,
    /// Allocations served by an idle slot that already had the requested shape.
    pub reuses: u64,
    pub reshapes: u64,
    pub peak_in_use: usize,
}

/// Fixed set of reusable node buffers.
///
/// Capacity is decided up front (one slot per level on a root-to-leaf path for a full build), so
/// an exhausted pool is a resource error rather than a reason to grow.
#[derive(Debug)]
pub struct WorkspacePool {
    slots: Vec<Volume>,
    in_use: Vec<bool>,
    reference: Option<VolumeShape>,
    stats: WorkspacePoolStats,
}

impl WorkspacePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            in_use: vec![false; capacity],
            reference: None,
            stats: WorkspacePoolStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.in_use.len()
    }

    pub fn in_use(&self) -> usize {
        self.in_use.iter().filter(|&&b| b).count()
    }

    pub fn stats(&self) -> WorkspacePoolStats {
        self.stats.clone()
    }

    pub fn reference(&self) -> Option<&VolumeShape> {
        self.reference.as_ref()
    }

    /// Record the shape non-spatial axes and the pixel type are taken from.
    ///
    /// The first call also readies every slot with the reference pixel type.
    pub fn set_reference(&mut self, shape: &VolumeShape) {
        if self.reference.is_none() {
            let empty = VolumeShape::new(vec![0; shape.ndim()], shape.pixel_type);
            self.slots = (0..self.capacity()).map(|_| Volume::from_shape(&empty)).collect();
        }
        self.reference = Some(shape.clone());
    }

    /// Node dimensions for `bbox` sampled at `res` physical units per voxel.
    fn dims_for(&self, bbox: &BoundingBox, res: [f64; 3]) -> PyramidResult<VolumeShape> {
        let reference = self
            .reference
            .as_ref()
            .ok_or_else(|| PyramidError::shape("pool has no reference shape"))?;
        let mut dims = reference.dims.clone();
        let nspatial = dims.len().min(SPATIAL_AXES).min(bbox.ndim());
        for (i, d) in dims.iter_mut().enumerate().take(nspatial) {
            if !(res[i].is_finite() && res[i] > 0.0) {
                return Err(PyramidError::shape(format!(
                    "invalid resolution {} on axis {i}",
                    res[i]
                )));
            }
            let n = (bbox.shape()[i] as f64 / res[i] + 1e-6).floor();
            if n < 1.0 {
                return Err(PyramidError::shape(format!(
                    "box {bbox} is smaller than one voxel on axis {i}"
                )));
            }
            *d = n as usize;
        }
        Ok(VolumeShape::new(dims, reference.pixel_type))
    }

    /// Borrow an idle slot shaped for `bbox` at `res`, filled with the reference fill value.
    ///
    /// An idle slot that already has the right shape is preferred over the first idle slot.
    pub fn allocate(&mut self, bbox: &BoundingBox, res: [f64; 3]) -> PyramidResult<Node> {
        let shape = self.dims_for(bbox, res)?;
        let first_idle = self
            .in_use
            .iter()
            .position(|&b| !b)
            .ok_or_else(|| PyramidError::resource("pool exhausted"))?;
        let matching = (first_idle..self.capacity())
            .find(|&i| !self.in_use[i] && *self.slots[i].shape() == shape);

        let i = matching.unwrap_or(first_idle);
        if matching.is_some() {
            self.stats.reuses = self.stats.reuses.saturating_add(1);
        } else {
            self.stats.reshapes = self.stats.reshapes.saturating_add(1);
            self.slots[i].reshape(&shape);
        }
        self.slots[i].fill(shape.pixel_type.fill_value());
        self.in_use[i] = true;
        self.stats.allocations = self.stats.allocations.saturating_add(1);
        self.stats.peak_in_use = self.stats.peak_in_use.max(self.in_use());
        tracing::debug!(slot = i, in_use = self.in_use(), dims = ?shape.dims, "pool allocate");
        Ok(Node::Pooled(i))
    }

    pub fn release(&mut self, node: Node) -> PyramidResult<()> {
        match node {
            Node::Pooled(i) => {
                if !self.in_use.get(i).copied().unwrap_or(false) {
                    return Err(PyramidError::validation(format!(
                        "released pool slot {i} was not in use"
                    )));
                }
                self.in_use[i] = false;
                tracing::debug!(slot = i, in_use = self.in_use(), "pool release");
                Ok(())
            }
            Node::Owned(_) => Ok(()),
        }
    }

    pub fn volume<'a>(&'a self, node: &'a Node) -> &'a Volume {
        match node {
            Node::Pooled(i) => &self.slots[*i],
            Node::Owned(v) => v,
        }
    }

    pub fn volume_mut<'a>(&'a mut self, node: &'a mut Node) -> &'a mut Volume {
        match node {
            Node::Pooled(i) => &mut self.slots[*i],
            Node::Owned(v) => v,
        }
    }

    /// Borrow `dst` for writing and `src` for reading at the same time.
    pub fn pair_mut<'a>(
        &'a mut self,
        dst: &'a mut Node,
        src: &'a Node,
    ) -> PyramidResult<(&'a mut Volume, &'a Volume)> {
        match (dst, src) {
            (Node::Pooled(d), Node::Pooled(s)) => {
                let (d, s) = (*d, *s);
                if d == s {
                    return Err(PyramidError::validation(format!(
                        "pool slot {d} used as both source and destination"
                    )));
                }
                if d < s {
                    let (lo, hi) = self.slots.split_at_mut(s);
                    Ok((&mut lo[d], &hi[0]))
                } else {
                    let (lo, hi) = self.slots.split_at_mut(d);
                    Ok((&mut hi[0], &lo[s]))
                }
            }
            (Node::Pooled(d), Node::Owned(v)) => Ok((&mut self.slots[*d], v)),
            (Node::Owned(dv), s) => Ok((dv, self.volume(s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::array::PixelType;

    fn bb(shape: &[i64]) -> BoundingBox {
        BoundingBox::new(vec![0; shape.len()], shape.to_vec()).unwrap()
    }

    fn pool(capacity: usize, pt: PixelType) -> WorkspacePool {
        let mut p = WorkspacePool::new(capacity);
        p.set_reference(&VolumeShape::new(vec![10, 10, 10, 2], pt));
        p
    }

    fn slot(n: &Node) -> usize {
        match n {
            Node::Pooled(i) => *i,
            Node::Owned(_) => panic!("expected a pooled node"),
        }
    }

    #[test]
    fn allocate_never_returns_a_busy_slot() {
        let mut p = pool(3, PixelType::U16);
        let a = p.allocate(&bb(&[100, 100, 100, 2]), [10.0; 3]).unwrap();
        let b = p.allocate(&bb(&[100, 100, 100, 2]), [10.0; 3]).unwrap();
        let c = p.allocate(&bb(&[50, 50, 50, 2]), [10.0; 3]).unwrap();
        let mut seen = vec![slot(&a), slot(&b), slot(&c)];
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 3);
        let err = p.allocate(&bb(&[10, 10, 10, 2]), [10.0; 3]).unwrap_err();
        assert!(err.is_subtree_local());
        assert_eq!(p.stats().peak_in_use, 3);
    }

    #[test]
    fn release_then_allocate_reuses_without_reshape() {
        let mut p = pool(2, PixelType::U16);
        let box_a = bb(&[80, 40, 20, 2]);
        let a = p.allocate(&box_a, [10.0; 3]).unwrap();
        let ia = slot(&a);
        p.release(a).unwrap();
        let before = p.stats();

        let again = p.allocate(&box_a, [10.0; 3]).unwrap();
        assert_eq!(slot(&again), ia);
        let after = p.stats();
        assert_eq!(after.reuses, before.reuses + 1);
        assert_eq!(after.reshapes, before.reshapes);
    }

    #[test]
    fn matching_idle_slot_is_preferred_over_first_idle() {
        let mut p = pool(2, PixelType::U8);
        let small = p.allocate(&bb(&[20, 20, 20, 2]), [10.0; 3]).unwrap();
        let big = p.allocate(&bb(&[40, 40, 40, 2]), [10.0; 3]).unwrap();
        let ibig = slot(&big);
        p.release(small).unwrap();
        p.release(big).unwrap();
        let again = p.allocate(&bb(&[40, 40, 40, 2]), [10.0; 3]).unwrap();
        assert_eq!(slot(&again), ibig);
    }

    #[test]
    fn allocation_shape_and_fill_follow_reference() {
        let mut p = pool(1, PixelType::I16);
        let n = p.allocate(&bb(&[100, 60, 35, 2]), [10.0, 20.0, 10.0]).unwrap();
        let v = p.volume(&n);
        assert_eq!(v.dims(), &[10, 3, 3, 2]);
        assert_eq!(v.pixel_type(), PixelType::I16);
        assert!(v.data().iter().all(|&s| s == -32768.0));
    }

    #[test]
    fn allocation_errors() {
        let mut fresh = WorkspacePool::new(1);
        assert!(fresh.allocate(&bb(&[10, 10, 10]), [1.0; 3]).is_err());

        let mut p = pool(1, PixelType::U16);
        assert!(p.allocate(&bb(&[5, 100, 100, 2]), [10.0; 3]).is_err());
        assert_eq!(p.in_use(), 0);
    }

    #[test]
    fn pair_mut_splits_distinct_slots() {
        let mut p = pool(2, PixelType::U16);
        let mut a = p.allocate(&bb(&[20, 20, 20, 2]), [10.0; 3]).unwrap();
        let b = p.allocate(&bb(&[40, 40, 40, 2]), [10.0; 3]).unwrap();
        {
            let (dst, src) = p.pair_mut(&mut a, &b).unwrap();
            assert_eq!(dst.dims(), &[2, 2, 2, 2]);
            assert_eq!(src.dims(), &[4, 4, 4, 2]);
        }
        let same = Node::Pooled(slot(&a));
        assert!(p.pair_mut(&mut a, &same).is_err());
    }

    #[test]
    fn double_release_is_rejected_and_owned_nodes_just_drop() {
        let mut p = pool(1, PixelType::U16);
        let n = p.allocate(&bb(&[10, 10, 10, 2]), [1.0; 3]).unwrap();
        let i = slot(&n);
        p.release(n).unwrap();
        assert!(p.release(Node::Pooled(i)).is_err());
        p.release(Node::Owned(Volume::new(vec![1, 1, 1], PixelType::U8)))
            .unwrap();
    }
}
