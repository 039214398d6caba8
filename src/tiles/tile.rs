use crate::foundation::error::{PyramidError, PyramidResult};
use crate::geometry::aabb::BoundingBox;
use crate::geometry::transform::Transform;
use crate::volume::array::{Volume, VolumeShape};

/// Placement of a tile: its physical footprint, its pixel shape and its pixel-to-physical
/// transform.
#[derive(Clone, Debug, PartialEq)]
pub struct TileMeta {
    pub aabb: BoundingBox,
    pub shape: VolumeShape,
    pub transform: Transform,
}

impl TileMeta {
    pub fn new(aabb: BoundingBox, shape: VolumeShape, transform: Transform) -> PyramidResult<Self> {
        if transform.ndim() != shape.ndim() {
            return Err(PyramidError::validation(format!(
                "tile transform is {}-d but its shape is {}-d",
                transform.ndim(),
                shape.ndim()
            )));
        }
        if aabb.ndim() == 0 {
            return Err(PyramidError::validation("tile bounding box has no axes"));
        }
        Ok(Self {
            aabb,
            shape,
            transform,
        })
    }

    /// Axis-aligned placement: origin `ori` (nm) and `pixel_nm` per spatial axis.
    ///
    /// Non-spatial axes get unit scale, zero origin and an extent equal to their length.
    pub fn axis_aligned(shape: VolumeShape, ori: &[i64], pixel_nm: [f64; 3]) -> PyramidResult<Self> {
        let nd = shape.ndim();
        let mut t = Transform::identity(nd);
        let mut box_ori = vec![0i64; nd];
        let mut box_shape = vec![0i64; nd];
        for i in 0..nd {
            if i < 3 {
                let o = ori.get(i).copied().unwrap_or(0);
                t.set(i, i, pixel_nm[i]);
                t.set(i, nd, o as f64);
                box_ori[i] = o;
                box_shape[i] = (shape.dims[i] as f64 * pixel_nm[i]).round() as i64;
            } else {
                box_shape[i] = shape.dims[i] as i64;
            }
        }
        Self::new(BoundingBox::new(box_ori, box_shape)?, shape, t)
    }
}

/// A source volume placed in physical space. The engine never mutates tiles; it reads them at
/// leaves.
pub trait Tile: std::fmt::Debug {
    fn meta(&self) -> &TileMeta;

    fn meta_mut(&mut self) -> &mut TileMeta;

    /// Fill `out`, already shaped like [`Tile::shape`], with the tile's samples.
    fn read_into(&self, out: &mut Volume) -> PyramidResult<()>;

    fn aabb(&self) -> &BoundingBox {
        &self.meta().aabb
    }

    fn shape(&self) -> &VolumeShape {
        &self.meta().shape
    }

    fn transform(&self) -> &Transform {
        &self.meta().transform
    }
}

/// Tile whose samples are already in memory.
#[derive(Debug, Clone)]
pub struct InMemoryTile {
    meta: TileMeta,
    volume: Volume,
}

impl InMemoryTile {
    pub fn new(volume: Volume, aabb: BoundingBox, transform: Transform) -> PyramidResult<Self> {
        let meta = TileMeta::new(aabb, volume.shape().clone(), transform)?;
        Ok(Self { meta, volume })
    }

    pub fn axis_aligned(volume: Volume, ori: &[i64], pixel_nm: [f64; 3]) -> PyramidResult<Self> {
        let meta = TileMeta::axis_aligned(volume.shape().clone(), ori, pixel_nm)?;
        Ok(Self { meta, volume })
    }

    pub fn volume(&self) -> &Volume {
        &self.volume
    }
}

impl Tile for InMemoryTile {
    fn meta(&self) -> &TileMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut TileMeta {
        &mut self.meta
    }

    fn read_into(&self, out: &mut Volume) -> PyramidResult<()> {
        out.copy_from(&self.volume)
    }
}

/// The collection of tiles a pyramid is built from.
#[derive(Debug, Default)]
pub struct TileSet {
    tiles: Vec<Box<dyn Tile>>,
}

impl TileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tiles(tiles: Vec<Box<dyn Tile>>) -> Self {
        Self { tiles }
    }

    pub fn push(&mut self, tile: impl Tile + 'static) {
        self.tiles.push(Box::new(tile));
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Tile> + '_ {
        self.tiles.iter().map(|t| t.as_ref())
    }

    /// Union of all tile boxes.
    pub fn aabb(&self) -> PyramidResult<BoundingBox> {
        let mut it = self.tiles.iter();
        let first = it
            .next()
            .ok_or_else(|| PyramidError::validation("tile set is empty"))?;
        let mut out = first.aabb().clone();
        for t in it {
            out.union_in_place(t.aabb())?;
        }
        Ok(out)
    }

    /// Output box selected with fractional coordinates of [`TileSet::aabb`].
    pub fn select(&self, ori: [f64; 3], size: [f64; 3]) -> PyramidResult<BoundingBox> {
        Ok(self.aabb()?.select_fraction(ori, size))
    }

    pub fn any_hit(&self, bbox: &BoundingBox) -> bool {
        self.tiles.iter().any(|t| bbox.hit(t.aabb()))
    }

    /// Positions, in set order, of the tiles whose boxes overlap `bbox`.
    pub fn hitting(&self, bbox: &BoundingBox) -> Vec<usize> {
        self.tiles
            .iter()
            .enumerate()
            .filter(|(_, t)| bbox.hit(t.aabb()))
            .map(|(i, _)| i)
            .collect()
    }

    /// Force every tile's field of view (nm) along x and/or y. Non-positive values leave that
    /// axis alone.
    ///
    /// The box extent is replaced and the transform's scale on that axis becomes
    /// `fov / pixels`, keeping its sign. Tiles are assumed to have no rotation or shear in x/y.
    pub fn override_fov(&mut self, x_nm: f64, y_nm: f64) -> PyramidResult<()> {
        for tile in &mut self.tiles {
            let meta = tile.meta_mut();
            for (axis, fov) in [(0usize, x_nm), (1, y_nm)] {
                let in_range = axis < meta.shape.ndim() && axis < meta.aabb.ndim();
                if fov.is_nan() || fov <= 0.0 || !in_range {
                    continue;
                }
                let px = meta.shape.dims[axis];
                if px == 0 {
                    return Err(PyramidError::shape("tile has an empty spatial axis"));
                }
                let old = meta.transform.diagonal(axis);
                let sign = if old < 0.0 { -1.0 } else { 1.0 };
                meta.transform.set(axis, axis, sign * fov / px as f64);
                let mut extent = meta.aabb.shape().to_vec();
                extent[axis] = fov.round() as i64;
                meta.aabb.set(None, Some(&extent))?;
            }
        }
        Ok(())
    }
}
