use crate::foundation::error::{PyramidError, PyramidResult};
use crate::geometry::aabb::BoundingBox;

const UM_TO_NM: f64 = 1e3;

/// Options for one pyramid build.
///
/// `ori` and `size` select the output box as fractions of the union of all tile boxes.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RenderOpts {
    /// Leaf voxel size (µm) per spatial axis.
    pub voxel_um: [f64; 3],
    /// Output box origin, as a fraction of the tile bounding box.
    pub ori: [f64; 3],
    /// Output box extent, as a fraction of the tile bounding box.
    pub size: [f64; 3],
    /// Subdivision factor: 4 splits x and y, 8 splits x, y and z.
    pub nchildren: usize,
    /// A box is a leaf when it holds fewer than this many voxels.
    pub countof_leaf: u64,
    /// Input anti-aliasing is skipped on axes whose downsampling ratio is below this.
    pub input_filter_scale_thresh: f32,
    /// Output anti-aliasing is skipped on axes whose filter size (in voxels) is below this.
    pub output_filter_scale_thresh: f32,
    /// Width (nm) of the anti-aliasing pass applied to every finished leaf. Zero disables it.
    pub output_filter_size_nm: [f32; 3],
    /// Working memory available for one tile slab and its filter copy. `None` is unlimited.
    pub device_free_bytes: Option<u64>,
}

impl Default for RenderOpts {
    fn default() -> Self {
        Self {
            voxel_um: [0.5; 3],
            ori: [0.0; 3],
            size: [1.0; 3],
            nchildren: 8,
            countof_leaf: 64_000_000,
            input_filter_scale_thresh: 0.5,
            output_filter_scale_thresh: 0.5,
            output_filter_size_nm: [0.0; 3],
            device_free_bytes: None,
        }
    }
}

impl RenderOpts {
    pub fn validate(&self) -> PyramidResult<()> {
        if self.voxel_um.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(PyramidError::validation("voxel size must be > 0 on every axis"));
        }
        if !(self.nchildren == 4 || self.nchildren == 8) {
            return Err(PyramidError::validation(format!(
                "nchildren must be 4 or 8, got {}",
                self.nchildren
            )));
        }
        if self.countof_leaf == 0 {
            return Err(PyramidError::validation("countof_leaf must be non-zero"));
        }
        for i in 0..3 {
            let (o, s) = (self.ori[i], self.size[i]);
            if !o.is_finite() || !s.is_finite() || s <= 0.0 {
                return Err(PyramidError::validation(format!(
                    "output box fraction on axis {i} is invalid (ori={o}, size={s})"
                )));
            }
        }
        if self.output_filter_size_nm.iter().any(|v| !v.is_finite()) {
            return Err(PyramidError::validation("output filter size must be finite"));
        }
        if self.device_free_bytes == Some(0) {
            return Err(PyramidError::validation("device memory budget must be non-zero"));
        }
        Ok(())
    }

    /// Leaf voxel size in nm, as used for box arithmetic.
    pub fn voxel_nm(&self) -> [f64; 3] {
        self.voxel_um.map(|v| v * UM_TO_NM)
    }

    pub fn voxel_volume_nm3(&self) -> f64 {
        self.voxel_nm().iter().product()
    }

    /// Output filter widths converted to leaf voxels.
    pub fn output_filter_voxels(&self) -> [f32; 3] {
        let nm = self.voxel_nm();
        [0, 1, 2].map(|i| self.output_filter_size_nm[i] / nm[i] as f32)
    }
}

/// Parse a count with an optional decimal suffix: `k`, `M`, `G`, `T`, `P` or `E`
/// (10^3 through 10^18). Fractions are allowed, e.g. `0.5G`.
pub fn parse_human_size(s: &str) -> PyramidResult<u64> {
    let s = s.trim();
    let (num, exp) = match s.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => {
            let exp = match c {
                'k' => 3,
                'M' => 6,
                'G' => 9,
                'T' => 12,
                'P' => 15,
                'E' => 18,
                _ => {
                    return Err(PyramidError::validation(format!(
                        "unknown size suffix '{c}' in '{s}'"
                    )));
                }
            };
            (&s[..s.len() - 1], exp)
        }
        _ => (s, 0),
    };
    let v: f64 = num
        .parse()
        .map_err(|_| PyramidError::validation(format!("invalid size '{s}'")))?;
    let v = v * 10f64.powi(exp);
    if !v.is_finite() || v < 1.0 || v > u64::MAX as f64 {
        return Err(PyramidError::validation(format!("size '{s}' is out of range")));
    }
    Ok(v.round() as u64)
}

/// Grow the fractional output box so x and y span the same power-of-two number of voxels,
/// keeping it centered.
///
/// `full` is the union of the tile boxes. x and y voxel sizes must be equal.
pub fn pad_to_pow2(
    ori: [f64; 3],
    size: [f64; 3],
    full: &BoundingBox,
    voxel_nm: [f64; 3],
) -> PyramidResult<([f64; 3], [f64; 3])> {
    if voxel_nm[0] != voxel_nm[1] {
        return Err(PyramidError::validation(
            "power-of-two padding needs equal x and y voxel sizes",
        ));
    }
    if full.ndim() < 2 {
        return Err(PyramidError::shape("power-of-two padding needs at least 2 axes"));
    }
    let bbox = full.select_fraction(ori, size);
    let extent = [bbox.shape()[0] as f64, bbox.shape()[1] as f64];
    if extent.iter().any(|&e| e <= 0.0) {
        return Err(PyramidError::validation("output box is empty in x or y"));
    }
    let px = extent[0].max(extent[1]) / voxel_nm[0];
    let target = (px.ceil().max(1.0) as u64).next_power_of_two() as f64;
    let (mut ori, mut size) = (ori, size);
    for i in 0..2 {
        let f = target / (extent[i] / voxel_nm[0]);
        ori[i] += 0.5 * size[i] * (1.0 - f);
        size[i] *= f;
    }
    Ok((ori, size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let o = RenderOpts::default();
        o.validate().unwrap();
        assert_eq!(o.voxel_nm(), [500.0; 3]);
        assert_eq!(o.countof_leaf, 64_000_000);
    }

    #[test]
    fn validate_rejects_bad_inputs() {
        let bad = [
            RenderOpts {
                nchildren: 3,
                ..RenderOpts::default()
            },
            RenderOpts {
                voxel_um: [0.5, 0.0, 0.5],
                ..RenderOpts::default()
            },
            RenderOpts {
                countof_leaf: 0,
                ..RenderOpts::default()
            },
            RenderOpts {
                size: [1.0, -1.0, 1.0],
                ..RenderOpts::default()
            },
        ];
        for o in bad {
            assert!(o.validate().is_err(), "{o:?}");
        }
    }

    #[test]
    fn human_sizes() {
        assert_eq!(parse_human_size("64M").unwrap(), 64_000_000);
        assert_eq!(parse_human_size("128k").unwrap(), 128_000);
        assert_eq!(parse_human_size("0.5G").unwrap(), 500_000_000);
        assert_eq!(parse_human_size("1000").unwrap(), 1000);
        assert!(parse_human_size("12Q").is_err());
        assert!(parse_human_size("M").is_err());
        assert!(parse_human_size("-3k").is_err());
    }

    #[test]
    fn serde_fills_missing_fields_with_defaults() {
        let o: RenderOpts = serde_json::from_str(r#"{"nchildren": 4}"#).unwrap();
        assert_eq!(o.nchildren, 4);
        assert_eq!(o.voxel_um, [0.5; 3]);
    }

    #[test]
    fn pad_to_pow2_centers_square_box() {
        let full = BoundingBox::new(vec![0, 0, 0], vec![3000, 1500, 100]).unwrap();
        let (ori, size) = pad_to_pow2([0.0; 3], [1.0; 3], &full, [500.0; 3]).unwrap();
        let padded = full.select_fraction(ori, size);
        // 6 x 3 voxels grow to 8 x 8.
        assert_eq!(padded.shape()[0], 4000);
        assert_eq!(padded.shape()[1], 4000);
        assert_eq!(padded.ori()[0], -500);
        assert_eq!(padded.ori()[1], -1250);
        assert_eq!(size[2], 1.0);
    }

    #[test]
    fn pad_to_pow2_needs_square_voxels() {
        let full = BoundingBox::new(vec![0, 0, 0], vec![10, 10, 10]).unwrap();
        assert!(pad_to_pow2([0.0; 3], [1.0; 3], &full, [1.0, 2.0, 1.0]).is_err());
    }
}
