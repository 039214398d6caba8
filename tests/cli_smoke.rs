use std::path::{Path, PathBuf};
use std::process::Command;

use tilepyramid::{PixelType, TileCache, TileMeta, Volume};

mod support;

fn exe() -> PathBuf {
    std::env::var_os("CARGO_BIN_EXE_tilepyramid")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let mut p = PathBuf::from("target").join("debug");
            p.push(if cfg!(windows) {
                "tilepyramid.exe"
            } else {
                "tilepyramid"
            });
            p
        })
}

/// Two 8x8x2 u8 tiles side by side in x, 250 nm pixels.
fn write_tiles(dir: &Path) {
    let mut cache = TileCache::new(dir);
    for (i, ox) in [0i64, 2000].into_iter().enumerate() {
        let data = (0..128).map(|k| ((k + i * 50) % 250) as f32).collect();
        let v = Volume::from_data(vec![8, 8, 2], PixelType::U8, data).unwrap();
        let meta = TileMeta::axis_aligned(v.shape().clone(), &[ox, 0, 0], [250.0; 3]).unwrap();
        cache.store(format!("t{i}"), &meta, &v).unwrap();
    }
    cache
        .save(&dir.join(tilepyramid::tiles::DEFAULT_CACHE_NAME))
        .unwrap();
}

fn common_args(tiles: &Path) -> Vec<String> {
    let mut args = vec!["--tiles".to_string(), tiles.to_string_lossy().to_string()];
    for a in [
        "--x-um",
        "0.25",
        "--y-um",
        "0.25",
        "--z-um",
        "0.25",
        "--nchildren",
        "4",
        "--count-of-leaf",
        "100",
    ] {
        args.push(a.to_string());
    }
    args
}

#[test]
fn cli_render_addresses_target_and_info() {
    let tiles = support::scratch_dir("cli_tiles");
    write_tiles(&tiles);
    let out = support::scratch_dir("cli_out");
    let out_arg = out.to_string_lossy().to_string();

    let status = Command::new(exe())
        .arg("render")
        .args(common_args(&tiles))
        .args(["--out", out_arg.as_str(), "--ortho"])
        .status()
        .unwrap();
    assert!(status.success());
    assert!(out.join("default.00000.png").is_file());
    assert!(out.join("0").join("transform.txt").is_file());
    assert!(out.join("YZ.00000.png").is_file());
    assert!(out.join("2").join("ZX.00000.png").is_file());

    let listed = Command::new(exe())
        .arg("addresses")
        .args(common_args(&tiles))
        .output()
        .unwrap();
    assert!(listed.status.success());
    let text = String::from_utf8(listed.stdout).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    // 4000x2000x500 nm at 250 nm is 256 voxels: four 64-voxel leaves under the root.
    assert_eq!(lines, vec!["1", "2", "3", "4", "0"]);

    std::fs::remove_file(out.join("default.00000.png")).unwrap();
    let status = Command::new(exe())
        .arg("target")
        .args(common_args(&tiles))
        .args(["--address", "/", "--out", out_arg.as_str()])
        .status()
        .unwrap();
    assert!(status.success());
    assert!(out.join("default.00000.png").is_file());

    let info = Command::new(exe())
        .arg("info")
        .args(common_args(&tiles))
        .args(["--address", "3"])
        .output()
        .unwrap();
    assert!(info.status.success());
    let text = String::from_utf8(info.stdout).unwrap();
    assert!(text.contains("tiles: 2"), "{text}");
    assert!(text.contains("depth: 2"), "{text}");

    std::fs::remove_dir_all(&tiles).ok();
    std::fs::remove_dir_all(&out).ok();
}

#[test]
fn cli_query_lists_tiles_in_box() {
    let tiles = support::scratch_dir("cli_query");
    write_tiles(&tiles);
    let tiles_arg = tiles.to_string_lossy().to_string();

    let run = |extra: &[&str]| -> Vec<String> {
        let out = Command::new(exe())
            .args(["query", "--tiles", tiles_arg.as_str()])
            .args(extra)
            .output()
            .unwrap();
        assert!(out.status.success());
        String::from_utf8(out.stdout)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    };

    let all = run(&[]);
    assert_eq!(all.len(), 2);
    assert!(all[0].ends_with("t0") && all[1].ends_with("t1"), "{all:?}");
    // x in 2400..4000 only overlaps the second tile.
    let right = run(&["--ox", "0.6", "--lx", "0.4"]);
    assert_eq!(right.len(), 1);
    assert_eq!(PathBuf::from(&right[0]), tiles.join("t1"));

    std::fs::remove_dir_all(&tiles).ok();
}
