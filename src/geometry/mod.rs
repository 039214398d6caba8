//! Integer boxes, tree addresses and affine transforms.

/// Integer-valued axis-aligned boxes.
pub mod aabb;
/// Child-index paths from the root of the tree.
pub mod address;
/// Homogeneous affine transforms between pixel and physical space.
pub mod transform;
