use std::path::{Path, PathBuf};

use crate::foundation::error::PyramidResult;
use crate::tiles::tile::{Tile, TileMeta};
use crate::volume::array::Volume;
use crate::volume::series;

/// Tile backed by a PNG slice series on disk. The series is re-read on every
/// [`Tile::read_into`].
#[derive(Debug, Clone)]
pub struct SeriesTile {
    meta: TileMeta,
    dir: PathBuf,
    stem: String,
}

impl SeriesTile {
    pub fn new(meta: TileMeta, dir: impl Into<PathBuf>, stem: impl Into<String>) -> Self {
        Self {
            meta,
            dir: dir.into(),
            stem: stem.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }
}

impl Tile for SeriesTile {
    fn meta(&self) -> &TileMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut TileMeta {
        &mut self.meta
    }

    fn read_into(&self, out: &mut Volume) -> PyramidResult<()> {
        tracing::debug!(dir = %self.dir.display(), "read tile");
        series::read_series_into(&self.dir, &self.stem, out)
    }
}
