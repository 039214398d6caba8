pub mod cache;
pub mod series_tile;
pub mod tile;

pub use cache::{DEFAULT_CACHE_NAME, TileCache, TileEntry};
pub use series_tile::SeriesTile;
pub use tile::{InMemoryTile, Tile, TileMeta, TileSet};
