//! The tile cache document: every tile's location, footprint, pixel shape and transform.
//!
//! ```json
//! { "path": "/data/run1",
//!   "tiles": [ { "path": "00/0001",
//!                "aabb": { "ori": [0, 0, 0, 0], "shape": [400000, 400000, 100000, 2] },
//!                "shape": { "type": "u16", "dims": [1024, 1024, 100, 2] },
//!                "transform": [ ... 25 row-major values ... ] } ] }
//! ```
//!
//! Relative `path` roots resolve against the directory holding the cache file.

use std::path::{Path, PathBuf};

use crate::foundation::error::{PyramidError, PyramidResult};
use crate::geometry::aabb::BoundingBox;
use crate::geometry::transform::Transform;
use crate::tiles::series_tile::SeriesTile;
use crate::tiles::tile::{TileMeta, TileSet};
use crate::volume::array::{PixelType, Volume, VolumeShape};
use crate::volume::series::{self, DEFAULT_STEM};

pub const DEFAULT_CACHE_NAME: &str = "tilebase.cache.json";

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AabbEntry {
    pub ori: Vec<i64>,
    pub shape: Vec<i64>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ShapeEntry {
    #[serde(rename = "type")]
    pub pixel_type: PixelType,
    pub dims: Vec<usize>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TileEntry {
    pub path: PathBuf,
    pub aabb: AabbEntry,
    pub shape: ShapeEntry,
    pub transform: Vec<f64>,
}

impl TileEntry {
    pub fn from_meta(path: impl Into<PathBuf>, meta: &TileMeta) -> Self {
        Self {
            path: path.into(),
            aabb: AabbEntry {
                ori: meta.aabb.ori().to_vec(),
                shape: meta.aabb.shape().to_vec(),
            },
            shape: ShapeEntry {
                pixel_type: meta.shape.pixel_type,
                dims: meta.shape.dims.clone(),
            },
            transform: meta.transform.as_row_major().to_vec(),
        }
    }

    pub fn to_meta(&self) -> PyramidResult<TileMeta> {
        let ndim = self.shape.dims.len();
        let aabb = BoundingBox::new(self.aabb.ori.clone(), self.aabb.shape.clone())?;
        let transform = Transform::from_row_major(ndim, self.transform.clone()).map_err(|_| {
            PyramidError::validation(format!(
                "tile '{}': transform needs {} values for a {ndim}-d shape, got {}",
                self.path.display(),
                (ndim + 1) * (ndim + 1),
                self.transform.len()
            ))
        })?;
        TileMeta::new(
            aabb,
            VolumeShape::new(self.shape.dims.clone(), self.shape.pixel_type),
            transform,
        )
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TileCache {
    pub path: PathBuf,
    pub tiles: Vec<TileEntry>,
    #[serde(skip)]
    origin: Option<PathBuf>,
}

impl TileCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tiles: Vec::new(),
            origin: None,
        }
    }

    /// Load a cache file, or `DEFAULT_CACHE_NAME` inside `path` when `path` is a directory.
    #[tracing::instrument(level = "debug")]
    pub fn load(path: &Path) -> PyramidResult<Self> {
        let file = if path.is_dir() {
            path.join(DEFAULT_CACHE_NAME)
        } else {
            path.to_path_buf()
        };
        let text = std::fs::read_to_string(&file)
            .map_err(|e| PyramidError::io(format!("read tile cache '{}': {e}", file.display())))?;
        let mut cache: TileCache = serde_json::from_str(&text)?;
        cache.validate()?;
        cache.origin = file.parent().map(Path::to_path_buf);
        tracing::info!(tiles = cache.tiles.len(), file = %file.display(), "loaded tile cache");
        Ok(cache)
    }

    pub fn save(&self, path: &Path) -> PyramidResult<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)
            .map_err(|e| PyramidError::io(format!("write tile cache '{}': {e}", path.display())))
    }

    pub fn validate(&self) -> PyramidResult<()> {
        for t in &self.tiles {
            t.to_meta()?;
        }
        Ok(())
    }

    /// Directory that tile paths are relative to.
    pub fn root(&self) -> PathBuf {
        match &self.origin {
            Some(dir) if self.path.is_relative() => dir.join(&self.path),
            _ => self.path.clone(),
        }
    }

    /// Write `volume` as a slice series under the root and record it.
    pub fn store(
        &mut self,
        rel: impl Into<PathBuf>,
        meta: &TileMeta,
        volume: &Volume,
    ) -> PyramidResult<()> {
        let rel = rel.into();
        if volume.shape() != &meta.shape {
            return Err(PyramidError::shape(format!(
                "tile '{}' volume {:?} does not match its declared shape {:?}",
                rel.display(),
                volume.dims(),
                meta.shape.dims
            )));
        }
        series::write_series(&self.root().join(&rel), DEFAULT_STEM, volume)?;
        self.tiles.push(TileEntry::from_meta(rel, meta));
        Ok(())
    }

    /// File-backed tiles for every entry.
    pub fn to_tile_set(&self) -> PyramidResult<TileSet> {
        let root = self.root();
        let mut set = TileSet::new();
        for t in &self.tiles {
            set.push(SeriesTile::new(t.to_meta()?, root.join(&t.path), DEFAULT_STEM));
        }
        Ok(set)
    }
}
