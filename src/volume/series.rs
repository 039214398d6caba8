//! Volumes stored as a series of PNG planes, one file per z index.
//!
//! A volume `[x, y, z, c]` with `c` in `1..=4` and an 8- or 16-bit unsigned pixel type is written
//! as `<stem>.<z:05>.png`; channels are interleaved into gray, gray+alpha, RGB or RGBA planes.

use std::path::{Path, PathBuf};

use image::{ImageBuffer, Luma, LumaA, Pixel, PixelWithColorType, Rgb, Rgba};

use crate::foundation::error::{PyramidError, PyramidResult};
use crate::volume::array::{PixelType, Volume};

pub const DEFAULT_STEM: &str = "default";

pub fn plane_path(dir: &Path, stem: &str, z: usize) -> PathBuf {
    dir.join(format!("{stem}.{z:05}.png"))
}

struct PlaneLayout {
    w: usize,
    h: usize,
    z: usize,
    c: usize,
}

impl PlaneLayout {
    fn of(vol: &Volume) -> PyramidResult<Self> {
        let d = vol.dims();
        if !(3..=4).contains(&d.len()) {
            return Err(PyramidError::unsupported(format!(
                "series volumes are 3-d or 4-d, got {}-d",
                d.len()
            )));
        }
        let c = d.get(3).copied().unwrap_or(1);
        if !(1..=4).contains(&c) {
            return Err(PyramidError::unsupported(format!(
                "series volumes hold 1 to 4 channels, got {c}"
            )));
        }
        Ok(Self {
            w: d[0],
            h: d[1],
            z: d[2],
            c,
        })
    }

    fn interleave<T>(&self, vol: &Volume, z: usize, cast: impl Fn(f32) -> T) -> Vec<T> {
        let plane = self.w * self.h;
        let mut out = Vec::with_capacity(plane * self.c);
        let data = vol.data();
        for i in 0..plane {
            for ch in 0..self.c {
                out.push(cast(data[i + z * plane + ch * plane * self.z]));
            }
        }
        out
    }
}

fn save_plane<P>(path: &Path, w: usize, h: usize, raw: Vec<P::Subpixel>) -> PyramidResult<()>
where
    P: Pixel + PixelWithColorType,
    [P::Subpixel]: image::EncodableLayout,
{
    let (w, h) = (to_u32(w)?, to_u32(h)?);
    let buf = ImageBuffer::<P, Vec<P::Subpixel>>::from_raw(w, h, raw)
        .ok_or_else(|| PyramidError::shape("plane buffer does not match its dimensions"))?;
    buf.save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| PyramidError::io(format!("write '{}': {e}", path.display())))
}

fn to_u32(v: usize) -> PyramidResult<u32> {
    u32::try_from(v).map_err(|_| PyramidError::unsupported("plane dimension exceeds u32"))
}

/// Write `vol` as a PNG series under `dir`, creating the directory.
pub fn write_series(dir: &Path, stem: &str, vol: &Volume) -> PyramidResult<()> {
    let layout = PlaneLayout::of(vol)?;
    std::fs::create_dir_all(dir)?;
    let pt = vol.pixel_type();
    for z in 0..layout.z {
        let path = plane_path(dir, stem, z);
        let (w, h) = (layout.w, layout.h);
        match pt {
            PixelType::U8 => {
                let raw = layout.interleave(vol, z, |v| pt.quantize(v) as u8);
                match layout.c {
                    1 => save_plane::<Luma<u8>>(&path, w, h, raw)?,
                    2 => save_plane::<LumaA<u8>>(&path, w, h, raw)?,
                    3 => save_plane::<Rgb<u8>>(&path, w, h, raw)?,
                    _ => save_plane::<Rgba<u8>>(&path, w, h, raw)?,
                }
            }
            PixelType::U16 => {
                let raw = layout.interleave(vol, z, |v| pt.quantize(v) as u16);
                match layout.c {
                    1 => save_plane::<Luma<u16>>(&path, w, h, raw)?,
                    2 => save_plane::<LumaA<u16>>(&path, w, h, raw)?,
                    3 => save_plane::<Rgb<u16>>(&path, w, h, raw)?,
                    _ => save_plane::<Rgba<u16>>(&path, w, h, raw)?,
                }
            }
            other => {
                return Err(PyramidError::unsupported(format!(
                    "series output supports u8 and u16, got {other}"
                )));
            }
        }
    }
    Ok(())
}

/// Number of contiguous planes `<stem>.00000.png, <stem>.00001.png, ...` present in `dir`.
pub fn count_planes(dir: &Path, stem: &str) -> PyramidResult<usize> {
    let prefix = format!("{stem}.");
    let mut zs = Vec::new();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| PyramidError::io(format!("read dir '{}': {e}", dir.display())))?;
    for entry in entries {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(mid) = name
            .strip_prefix(&prefix)
            .and_then(|s| s.strip_suffix(".png"))
        else {
            continue;
        };
        if let Ok(z) = mid.parse::<usize>() {
            zs.push(z);
        }
    }
    zs.sort_unstable();
    for (i, &z) in zs.iter().enumerate() {
        if i != z {
            return Err(PyramidError::io(format!(
                "series '{stem}' in '{}' is missing plane {i}",
                dir.display()
            )));
        }
    }
    Ok(zs.len())
}

struct Plane {
    w: usize,
    h: usize,
    c: usize,
    pixel_type: PixelType,
    samples: Vec<f32>,
}

fn read_plane(path: &Path) -> PyramidResult<Plane> {
    let img = image::open(path)
        .map_err(|e| PyramidError::io(format!("read '{}': {e}", path.display())))?;
    let (w, h) = (img.width() as usize, img.height() as usize);
    fn widen<T: Copy + Into<f32>>(raw: &[T]) -> Vec<f32> {
        raw.iter().map(|&v| v.into()).collect()
    }
    let (c, pixel_type, samples) = match &img {
        image::DynamicImage::ImageLuma8(b) => (1, PixelType::U8, widen(b.as_raw())),
        image::DynamicImage::ImageLumaA8(b) => (2, PixelType::U8, widen(b.as_raw())),
        image::DynamicImage::ImageRgb8(b) => (3, PixelType::U8, widen(b.as_raw())),
        image::DynamicImage::ImageRgba8(b) => (4, PixelType::U8, widen(b.as_raw())),
        image::DynamicImage::ImageLuma16(b) => (1, PixelType::U16, widen(b.as_raw())),
        image::DynamicImage::ImageLumaA16(b) => (2, PixelType::U16, widen(b.as_raw())),
        image::DynamicImage::ImageRgb16(b) => (3, PixelType::U16, widen(b.as_raw())),
        image::DynamicImage::ImageRgba16(b) => (4, PixelType::U16, widen(b.as_raw())),
        _ => {
            return Err(PyramidError::unsupported(format!(
                "'{}' has an unsupported color type {:?}",
                path.display(),
                img.color()
            )));
        }
    };
    Ok(Plane {
        w,
        h,
        c,
        pixel_type,
        samples,
    })
}

/// Read a series written by [`write_series`] as a `[x, y, z, c]` volume.
pub fn read_series(dir: &Path, stem: &str) -> PyramidResult<Volume> {
    let nz = count_planes(dir, stem)?;
    if nz == 0 {
        return Err(PyramidError::io(format!(
            "no '{stem}' planes in '{}'",
            dir.display()
        )));
    }
    let mut out: Option<Volume> = None;
    for z in 0..nz {
        let plane = read_plane(&plane_path(dir, stem, z))?;
        let vol = out.get_or_insert_with(|| {
            Volume::new(vec![plane.w, plane.h, nz, plane.c], plane.pixel_type)
        });
        let d = vol.dims();
        if (d[0], d[1], d[3], vol.pixel_type()) != (plane.w, plane.h, plane.c, plane.pixel_type) {
            return Err(PyramidError::shape(format!(
                "plane {z} of '{}' differs from plane 0",
                dir.display()
            )));
        }
        let area = plane.w * plane.h;
        let data = vol.data_mut();
        for i in 0..area {
            for ch in 0..plane.c {
                data[i + z * area + ch * area * nz] = plane.samples[i * plane.c + ch];
            }
        }
    }
    out.ok_or_else(|| PyramidError::io("empty series"))
}

/// Read a series into `out`, keeping `out`'s declared dimensions.
///
/// The series must have the same x, y, z extents and sample count as `out`.
pub fn read_series_into(dir: &Path, stem: &str, out: &mut Volume) -> PyramidResult<()> {
    let vol = read_series(dir, stem)?;
    let (a, b) = (vol.dims(), out.dims());
    if b.len() < 3 || a[..3] != b[..3] || vol.nelem() != out.nelem() {
        return Err(PyramidError::shape(format!(
            "series in '{}' has shape {:?}, expected {:?}",
            dir.display(),
            a,
            b
        )));
    }
    out.data_mut().copy_from_slice(vol.data());
    Ok(())
}
