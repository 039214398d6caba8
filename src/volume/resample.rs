//! Affine pull-resampling.

use crate::foundation::error::{PyramidError, PyramidResult};
use crate::geometry::transform::{SPATIAL_AXES, Transform};
use crate::volume::array::Volume;

/// Resample `src` into `dst` through `t`, which maps a `dst` index to a `src` index.
///
/// Spatial axes (the first three) are interpolated linearly; remaining axes (channels) use the
/// nearest index. A destination sample whose source position falls outside `src` (each source
/// pixel covers `[i - 0.5, i + 0.5)`) keeps its current value, so repeated calls into the same
/// destination composite with the last write winning.
///
/// Returns the number of destination samples written.
pub fn affine_resample(dst: &mut Volume, src: &Volume, t: &Transform) -> PyramidResult<usize> {
    let nd = dst.ndim();
    if src.ndim() != nd || t.ndim() != nd {
        return Err(PyramidError::shape(format!(
            "resample dimensionality mismatch: dst {nd}-d, src {}-d, transform {}-d",
            src.ndim(),
            t.ndim()
        )));
    }
    let dd = dst.dims().to_vec();
    let sd = src.dims().to_vec();
    if nd == 0 || dd.contains(&0) || sd.contains(&0) {
        return Ok(0);
    }
    let sstr = src.strides();
    let nspatial = nd.min(SPATIAL_AXES);
    let nx = dd[0];
    let rows = dst.nelem() / nx;

    let col0: Vec<f64> = (0..nd).map(|r| t.get(r, 0)).collect();
    let mut q = vec![0usize; nd];
    let mut base = vec![0.0f64; nd];
    let mut axes = [(0usize, 0usize, 0.0f64); SPATIAL_AXES];
    let mut written = 0usize;
    let src_data = src.data();
    let out = dst.data_mut();

    for row in 0..rows {
        for (r, b) in base.iter_mut().enumerate() {
            *b = t.translation(r)
                + (1..nd)
                    .map(|c| t.get(r, c) * q[c] as f64)
                    .sum::<f64>();
        }
        'px: for x in 0..nx {
            let mut fixed = 0usize;
            for r in 0..nd {
                let c = base[r] + col0[r] * x as f64;
                let n = sd[r];
                if !(c >= -0.5 && c < n as f64 - 0.5) {
                    continue 'px;
                }
                if r < nspatial {
                    let f = c.floor();
                    let (i0, w1) = if f < 0.0 { (0, 0.0) } else { (f as usize, c - f) };
                    let i1 = (i0 + 1).min(n - 1);
                    axes[r] = (i0 * sstr[r], i1 * sstr[r], w1);
                } else {
                    let i = (c.round() as usize).min(n - 1);
                    fixed += i * sstr[r];
                }
            }
            let mut acc = 0.0f64;
            for corner in 0..(1usize << nspatial) {
                let mut w = 1.0f64;
                let mut off = fixed;
                for (k, &(o0, o1, w1)) in axes.iter().enumerate().take(nspatial) {
                    if (corner >> k) & 1 == 1 {
                        w *= w1;
                        off += o1;
                    } else {
                        w *= 1.0 - w1;
                        off += o0;
                    }
                }
                if w != 0.0 {
                    acc += w * f64::from(src_data[off]);
                }
            }
            out[row * nx + x] = acc as f32;
            written += 1;
        }
        for c in 1..nd {
            q[c] += 1;
            if q[c] < dd[c] {
                break;
            }
            q[c] = 0;
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::array::PixelType;

    fn ramp(dims: Vec<usize>) -> Volume {
        let n: usize = dims.iter().product();
        let data = (0..n).map(|i| i as f32).collect();
        Volume::from_data(dims, PixelType::U16, data).unwrap()
    }

    #[test]
    fn identity_copies() {
        let src = ramp(vec![4, 3, 2]);
        let mut dst = Volume::new(vec![4, 3, 2], PixelType::U16);
        let n = affine_resample(&mut dst, &src, &Transform::identity(3)).unwrap();
        assert_eq!(n, 24);
        assert_eq!(dst.data(), src.data());
    }

    #[test]
    fn half_pixel_shift_interpolates() {
        let src = Volume::from_data(vec![2, 1, 1], PixelType::F32, vec![0.0, 10.0]).unwrap();
        let mut dst = Volume::new(vec![1, 1, 1], PixelType::F32);
        let mut t = Transform::identity(3);
        t.set(0, 3, 0.5);
        affine_resample(&mut dst, &src, &t).unwrap();
        assert!((dst.data()[0] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn out_of_bounds_keeps_destination() {
        let src = ramp(vec![2, 2, 1]);
        let mut dst = Volume::new(vec![4, 2, 1], PixelType::U16);
        dst.fill(-1.0);
        let written = affine_resample(&mut dst, &src, &Transform::identity(3)).unwrap();
        assert_eq!(written, 4);
        assert_eq!(dst.at(&[0, 1, 0]), 2.0);
        assert_eq!(dst.at(&[3, 0, 0]), -1.0);
    }

    #[test]
    fn downsample_by_two_takes_every_other_sample() {
        let src = ramp(vec![4, 4, 1]);
        let mut dst = Volume::new(vec![2, 2, 1], PixelType::U16);
        let mut t = Transform::identity(3);
        t.set(0, 0, 2.0);
        t.set(1, 1, 2.0);
        affine_resample(&mut dst, &src, &t).unwrap();
        assert_eq!(dst.data(), &[0.0, 2.0, 8.0, 10.0]);
    }

    #[test]
    fn channels_resample_independently() {
        let src = ramp(vec![2, 1, 1, 3]);
        let mut dst = Volume::new(vec![2, 1, 1, 3], PixelType::U16);
        affine_resample(&mut dst, &src, &Transform::identity(4)).unwrap();
        assert_eq!(dst.data(), src.data());
    }

    #[test]
    fn dimensionality_mismatch_is_an_error() {
        let src = ramp(vec![2, 2, 2]);
        let mut dst = Volume::new(vec![2, 2], PixelType::U16);
        assert!(affine_resample(&mut dst, &src, &Transform::identity(2)).is_err());
    }
}
