//! tilepyramid builds multi-resolution spatial pyramids from large tiled volumes.
//!
//! Tiles are independently placed source volumes, each with its own pixel-to-physical affine
//! transform. The output is a quadtree (`nchildren = 4`) or octree (`nchildren = 8`) of resampled
//! nodes:
//!
//! - leaves are rendered straight from the tiles they overlap
//! - every parent is composed from its children at half the resolution on split axes
//! - finished nodes go to a [`NodeSink`] strictly after all of their descendants
//!
//! Three entry points share one traversal: [`render`] builds everything, [`addresses`] lists the
//! node addresses a build would produce in the same order, and [`render_target`] rebuilds a
//! single node from a [`NodeLoader`].
#![forbid(unsafe_code)]

pub mod foundation;
pub mod geometry;
/// Node directory layout and address printing.
pub mod persist;
pub mod render;
/// Tile abstractions and the tile cache document.
pub mod tiles;
pub mod volume;

pub use crate::foundation::error::{PyramidError, PyramidResult};
pub use crate::geometry::aabb::BoundingBox;
pub use crate::geometry::address::TreePath;
pub use crate::geometry::transform::Transform;
pub use crate::persist::{AddressPrinter, DirectoryLoader, DirectorySink, NodeTransform};
pub use crate::render::engine::{
    BuildSummary, addresses, output_box, render, render_target, tree_depth,
};
pub use crate::render::opts::{RenderOpts, pad_to_pow2, parse_human_size};
pub use crate::render::sink::{InMemorySink, NodeLoader, NodeSink, SunkNode};
pub use crate::tiles::{InMemoryTile, SeriesTile, Tile, TileCache, TileMeta, TileSet};
pub use crate::volume::array::{PixelType, Volume, VolumeShape};
