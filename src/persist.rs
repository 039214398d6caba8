//! Node persistence: one directory per tree address.
//!
//! Node `p` lives in `<root>/<p.to_path_string()>/` as a PNG slice series plus a `transform.txt`
//! side-car giving its physical origin and pixel size. The root node is written to `<root>`
//! itself. With orthogonal views enabled, `YZ.*.png` and `ZX.*.png` series hold the same node
//! resliced along x and y.

use std::fmt::Write as _;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::foundation::error::{PyramidError, PyramidResult};
use crate::geometry::aabb::BoundingBox;
use crate::geometry::address::TreePath;
use crate::render::sink::{NodeLoader, NodeSink};
use crate::volume::array::{Volume, VolumeShape};
use crate::volume::series::{self, DEFAULT_STEM};

pub const TRANSFORM_FILE: &str = "transform.txt";
/// Series stem of the view whose planes are y-z images stacked along x.
pub const YZ_STEM: &str = "YZ";
/// Series stem of the view whose planes are z-x images stacked along y.
pub const ZX_STEM: &str = "ZX";

const AXES: [char; 3] = ['x', 'y', 'z'];

/// Placement of a persisted node: origin (nm) and pixel size (nm) per spatial axis.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeTransform {
    pub ori: [i64; 3],
    pub pixel_nm: [f64; 3],
}

impl NodeTransform {
    pub fn from_node(bbox: &BoundingBox, vol: &Volume) -> Self {
        let mut ori = [0i64; 3];
        let mut pixel_nm = [1.0f64; 3];
        for i in 0..3.min(bbox.ndim()).min(vol.ndim()) {
            ori[i] = bbox.ori()[i];
            if vol.dims()[i] > 0 {
                pixel_nm[i] = bbox.shape()[i] as f64 / vol.dims()[i] as f64;
            }
        }
        Self { ori, pixel_nm }
    }

    pub fn to_text(&self) -> String {
        let mut s = String::new();
        for (axis, o) in AXES.iter().zip(self.ori) {
            let _ = writeln!(s, "o{axis}: {o}");
        }
        for (axis, p) in AXES.iter().zip(self.pixel_nm) {
            let _ = writeln!(s, "s{axis}: {p}");
        }
        s
    }

    /// Parse `key: value` lines. Unknown keys are ignored; all six keys are required.
    pub fn parse(text: &str) -> PyramidResult<Self> {
        let mut ori = [None; 3];
        let mut pixel_nm = [None; 3];
        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            let Some(i) = AXES.iter().position(|a| key.len() == 2 && key.ends_with(*a)) else {
                continue;
            };
            let bad = || PyramidError::validation(format!("invalid {key} value '{value}'"));
            match key.as_bytes()[0] {
                b'o' => ori[i] = Some(value.parse::<i64>().map_err(|_| bad())?),
                b's' => pixel_nm[i] = Some(value.parse::<f64>().map_err(|_| bad())?),
                _ => {}
            }
        }
        let missing = |k: &str| PyramidError::validation(format!("{TRANSFORM_FILE} lacks '{k}'"));
        let mut out = Self {
            ori: [0; 3],
            pixel_nm: [0.0; 3],
        };
        for i in 0..3 {
            out.ori[i] = ori[i].ok_or_else(|| missing(&format!("o{}", AXES[i])))?;
            out.pixel_nm[i] = pixel_nm[i].ok_or_else(|| missing(&format!("s{}", AXES[i])))?;
        }
        Ok(out)
    }

    pub fn read(dir: &Path) -> PyramidResult<Self> {
        let file = dir.join(TRANSFORM_FILE);
        let text = std::fs::read_to_string(&file)
            .map_err(|e| PyramidError::io(format!("read '{}': {e}", file.display())))?;
        Self::parse(&text)
    }

    pub fn write(&self, dir: &Path) -> PyramidResult<()> {
        let file = dir.join(TRANSFORM_FILE);
        std::fs::write(&file, self.to_text())
            .map_err(|e| PyramidError::io(format!("write '{}': {e}", file.display())))
    }
}

/// Directory of `path` under `root`.
pub fn node_dir(root: &Path, path: &TreePath) -> PathBuf {
    if path.is_empty() {
        root.to_path_buf()
    } else {
        root.join(path.to_path_string())
    }
}

/// Writes every rendered node into the directory layout. Address-only nodes are skipped.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
    ortho: bool,
    written: u64,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ortho: false,
            written: 0,
        }
    }

    /// Also write the YZ and ZX views of every node.
    pub fn with_ortho(mut self, ortho: bool) -> Self {
        self.ortho = ortho;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl NodeSink for DirectorySink {
    fn accept(
        &mut self,
        node: Option<&Volume>,
        path: &TreePath,
        bbox: &BoundingBox,
    ) -> PyramidResult<()> {
        let Some(vol) = node else {
            return Ok(());
        };
        let dir = node_dir(&self.root, path);
        series::write_series(&dir, DEFAULT_STEM, vol)?;
        NodeTransform::from_node(bbox, vol).write(&dir)?;
        if self.ortho {
            series::write_series(&dir, YZ_STEM, &vol.rotate_spatial(1)?)?;
            series::write_series(&dir, ZX_STEM, &vol.rotate_spatial(2)?)?;
        }
        self.written += 1;
        tracing::debug!(address = %path, dir = %dir.display(), "node written");
        Ok(())
    }
}

/// Reads nodes written by [`DirectorySink`]. A node without planes on disk does not exist.
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    root: PathBuf,
    ndim: usize,
}

impl DirectoryLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ndim: 4,
        }
    }

    /// Drop a trailing single-channel axis so loaded nodes match 3-d tiles.
    pub fn with_ndim(mut self, ndim: usize) -> Self {
        self.ndim = ndim;
        self
    }
}

impl NodeLoader for DirectoryLoader {
    fn load(&mut self, path: &TreePath) -> PyramidResult<Option<Volume>> {
        let dir = node_dir(&self.root, path);
        if !series::plane_path(&dir, DEFAULT_STEM, 0).is_file() {
            tracing::debug!(address = %path, "no persisted node");
            return Ok(None);
        }
        let mut vol = series::read_series(&dir, DEFAULT_STEM)?;
        if self.ndim == 3 && vol.ndim() == 4 && vol.dims()[3] == 1 {
            let shape = VolumeShape::new(vol.dims()[..3].to_vec(), vol.pixel_type());
            vol.reshape(&shape);
        }
        Ok(Some(vol))
    }
}

/// Prints one base-10 integer address per line.
#[derive(Debug)]
pub struct AddressPrinter<W: Write> {
    out: W,
}

impl<W: Write> AddressPrinter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> NodeSink for AddressPrinter<W> {
    fn accept(&mut self, _: Option<&Volume>, path: &TreePath, _: &BoundingBox) -> PyramidResult<()> {
        writeln!(self.out, "{}", path.to_int(10)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::test_support::scratch_dir;
    use crate::volume::array::PixelType;

    #[test]
    fn transform_text_round_trips() {
        let t = NodeTransform {
            ori: [-400, 1200, 0],
            pixel_nm: [250.0, 250.0, 125.5],
        };
        let text = t.to_text();
        assert!(text.starts_with("ox: -400\noy: 1200\noz: 0\nsx: 250\n"));
        assert_eq!(NodeTransform::parse(&text).unwrap(), t);
        assert!(NodeTransform::parse("ox: 1\noy: 2\n").is_err());
        assert!(NodeTransform::parse("ox: a\n").is_err());
    }

    #[test]
    fn sink_writes_and_loader_reads_back() {
        let root = scratch_dir("persist_sink");
        let mut v = Volume::new(vec![4, 3, 2], PixelType::U16);
        v.set_at(&[1, 2, 1], 4242.0);
        let bbox = BoundingBox::new(vec![100, 200, 0], vec![400, 600, 200]).unwrap();
        let path = TreePath::from_ids(vec![3, 1]);

        let mut sink = DirectorySink::new(&root);
        sink.accept(Some(&v), &path, &bbox).unwrap();
        sink.accept(None, &TreePath::root(), &bbox).unwrap();
        assert_eq!(sink.written(), 1);

        let dir = root.join("3/1");
        let t = NodeTransform::read(&dir).unwrap();
        assert_eq!(t.ori, [100, 200, 0]);
        assert_eq!(t.pixel_nm, [100.0, 200.0, 100.0]);

        let mut loader = DirectoryLoader::new(&root).with_ndim(3);
        let back = loader.load(&path).unwrap().unwrap();
        assert_eq!(back.dims(), &[4, 3, 2]);
        assert_eq!(back.at(&[1, 2, 1]), 4242.0);
        assert!(loader.load(&TreePath::from_ids(vec![0])).unwrap().is_none());

        let mut four = DirectoryLoader::new(&root);
        assert_eq!(four.load(&path).unwrap().unwrap().dims(), &[4, 3, 2, 1]);
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn ortho_views_are_resliced_copies() {
        let root = scratch_dir("persist_ortho");
        let mut v = Volume::new(vec![4, 3, 2], PixelType::U8);
        v.set_at(&[1, 2, 1], 200.0);
        let bbox = BoundingBox::new(vec![0, 0, 0], vec![400, 300, 200]).unwrap();
        let mut sink = DirectorySink::new(&root).with_ortho(true);
        sink.accept(Some(&v), &TreePath::root(), &bbox).unwrap();

        let yz = series::read_series(&root, YZ_STEM).unwrap();
        assert_eq!(yz.dims(), &[3, 2, 4, 1]);
        assert_eq!(yz.at(&[2, 1, 1, 0]), 200.0);
        let zx = series::read_series(&root, ZX_STEM).unwrap();
        assert_eq!(zx.dims(), &[2, 4, 3, 1]);
        assert_eq!(zx.at(&[1, 1, 2, 0]), 200.0);

        let plain = scratch_dir("persist_no_ortho");
        DirectorySink::new(&plain)
            .accept(Some(&v), &TreePath::root(), &bbox)
            .unwrap();
        assert!(!series::plane_path(&plain, YZ_STEM, 0).exists());
        std::fs::remove_dir_all(&root).ok();
        std::fs::remove_dir_all(&plain).ok();
    }

    #[test]
    fn printer_writes_integer_addresses() {
        let mut p = AddressPrinter::new(Vec::new());
        let bbox = BoundingBox::zeros(3);
        p.accept(None, &TreePath::from_ids(vec![0, 2]), &bbox).unwrap();
        p.accept(None, &TreePath::from_ids(vec![7]), &bbox).unwrap();
        p.accept(None, &TreePath::root(), &bbox).unwrap();
        let text = String::from_utf8(p.into_inner()).unwrap();
        assert_eq!(text, "13\n8\n0\n");
    }
}
