use std::path::PathBuf;

use tilepyramid::{
    InMemorySink, InMemoryTile, PixelType, RenderOpts, TileCache, TileMeta, TileSet, Volume,
};

mod support;

fn volume(seed: u32) -> Volume {
    let dims = vec![12, 8, 3];
    let data = (0..12 * 8 * 3).map(|i| ((i * 13 + seed * 500) % 3000) as f32).collect();
    Volume::from_data(dims, PixelType::U16, data).unwrap()
}

fn opts() -> RenderOpts {
    RenderOpts {
        voxel_um: [0.2; 3],
        nchildren: 4,
        countof_leaf: 100,
        ..RenderOpts::default()
    }
}

fn write_cache(dir: &std::path::Path) -> (TileCache, TileSet) {
    let mut cache = TileCache::new(dir);
    let mut memory = TileSet::new();
    for (i, ox) in [0i64, 2400].into_iter().enumerate() {
        let v = volume(i as u32);
        let meta = TileMeta::axis_aligned(v.shape().clone(), &[ox, 0, 0], [200.0; 3]).unwrap();
        cache.store(format!("tile{i}"), &meta, &v).unwrap();
        memory.push(InMemoryTile::axis_aligned(v, &[ox, 0, 0], [200.0; 3]).unwrap());
    }
    cache.save(&dir.join(tilepyramid::tiles::DEFAULT_CACHE_NAME)).unwrap();
    (cache, memory)
}

#[test]
fn cached_tiles_render_like_in_memory_tiles() {
    let dir = support::scratch_dir("cache_render");
    let (_, memory) = write_cache(&dir);

    let loaded = TileCache::load(&dir).unwrap();
    assert_eq!(loaded.tiles.len(), 2);
    let files = loaded.to_tile_set().unwrap();
    assert_eq!(files.aabb().unwrap(), memory.aabb().unwrap());

    let mut a = InMemorySink::new();
    let mut b = InMemorySink::new();
    tilepyramid::render(&opts(), &files, &mut a).unwrap();
    tilepyramid::render(&opts(), &memory, &mut b).unwrap();
    assert_eq!(a.paths(), b.paths());
    for (x, y) in a.nodes().iter().zip(b.nodes()) {
        assert_eq!(x.volume, y.volume, "node {}", x.path);
    }
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn relative_root_resolves_next_to_the_cache_file() {
    let dir = support::scratch_dir("cache_relative");
    let (mut cache, _) = write_cache(&dir);
    cache.path = PathBuf::from(".");
    let file = dir.join("relative.json");
    cache.save(&file).unwrap();

    let loaded = TileCache::load(&file).unwrap();
    let tiles = loaded.to_tile_set().unwrap();
    let first = tiles.iter().next().unwrap();
    let mut v = Volume::from_shape(first.shape());
    first.read_into(&mut v).unwrap();
    assert_eq!(v, volume(0));
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn malformed_cache_is_rejected() {
    let dir = support::scratch_dir("cache_bad");
    let file = dir.join("bad.json");
    std::fs::write(
        &file,
        r#"{"path": ".", "tiles": [{"path": "t", "aabb": {"ori": [0, 0, 0], "shape": [1, 1, 1]},
            "shape": {"type": "u16", "dims": [1, 1, 1]}, "transform": [1, 0, 0]}]}"#,
    )
    .unwrap();
    assert!(TileCache::load(&file).is_err());
    assert!(TileCache::load(&dir.join("missing.json")).is_err());
    std::fs::remove_dir_all(&dir).ok();
}
