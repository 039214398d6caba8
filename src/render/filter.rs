//! Separable Gaussian anti-aliasing applied before downsampling.

use crate::foundation::error::{PyramidError, PyramidResult};
use crate::geometry::transform::{SPATIAL_AXES, Transform};
use crate::volume::array::{PixelType, Volume};

/// Density at which the kernel support is cut off.
const SUPPORT_DENSITY: f64 = 0.01;
const SQRT_2PI: f64 = 2.506_628_274_631_000_5;

/// Scale applied to the downsampling ratio of an input-to-output transform.
pub const INPUT_FILTER_SCALE: f32 = 0.5;
/// Scale applied to explicit output filter widths.
pub const OUTPUT_FILTER_SCALE: f32 = 1.0;

/// Positive abscissa where a zero-mean Gaussian of `sigma` falls to `density`.
fn gaussian_radius(sigma: f64, density: f64) -> usize {
    let peak_scaled = density * sigma * SQRT_2PI;
    if peak_scaled >= 1.0 {
        // The density never gets that high; keep three standard deviations.
        return (3.0 * sigma).ceil() as usize;
    }
    (-2.0 * sigma * sigma * peak_scaled.ln()).sqrt().ceil() as usize
}

/// Normalized Gaussian kernel for downsampling by `size` voxels per output voxel.
///
/// Returns `None` (no filtering needed) when `|size|` is below `size_thresh` or not finite.
/// Otherwise `sigma = scale * |size| / 2` and the kernel has odd length `2r + 1`.
pub fn make_aa_filter(size: f32, scale: f32, size_thresh: f32) -> Option<Vec<f32>> {
    if !size.is_finite() || !scale.is_finite() {
        return None;
    }
    let size = size.abs();
    if size < size_thresh {
        return None;
    }
    let sigma = f64::from(scale.abs()) * f64::from(size) / 2.0;
    if sigma <= 0.0 {
        return None;
    }
    let r = gaussian_radius(sigma, SUPPORT_DENSITY) as i64;
    let denom = 2.0 * sigma * sigma;
    let weights: Vec<f64> = (-r..=r)
        .map(|i| {
            let x = i as f64;
            (-x * x / denom).exp()
        })
        .collect();
    let sum: f64 = weights.iter().sum();
    if sum <= 0.0 {
        return None;
    }
    Some(weights.iter().map(|w| (w / sum) as f32).collect())
}

/// Per-axis kernels plus two ping-pong buffers.
#[derive(Debug)]
pub struct SeparableFilter {
    size_thresh: f32,
    kernels: [Option<Vec<f32>>; SPATIAL_AXES],
    bufs: [Volume; 2],
}

impl SeparableFilter {
    pub fn new(size_thresh: f32) -> Self {
        Self {
            size_thresh,
            kernels: [None, None, None],
            bufs: [
                Volume::new(Vec::new(), PixelType::default()),
                Volume::new(Vec::new(), PixelType::default()),
            ],
        }
    }

    /// Size kernels from the downsampling ratios on the diagonal of an output-to-input
    /// transform.
    pub fn set_from_transform(&mut self, t: &Transform) {
        for (i, k) in self.kernels.iter_mut().enumerate() {
            *k = if i < t.ndim() {
                make_aa_filter(t.diagonal(i) as f32, INPUT_FILTER_SCALE, self.size_thresh)
            } else {
                None
            };
        }
    }

    /// Size kernels from explicit widths in voxels.
    pub fn set_output_sizes(&mut self, sizes: [f32; 3]) {
        for (k, s) in self.kernels.iter_mut().zip(sizes) {
            *k = make_aa_filter(s, OUTPUT_FILTER_SCALE, self.size_thresh);
        }
    }

    pub fn enabled(&self, axis: usize) -> bool {
        self.kernels.get(axis).is_some_and(Option::is_some)
    }

    pub fn any_enabled(&self) -> bool {
        self.kernels.iter().any(Option::is_some)
    }

    pub fn kernel(&self, axis: usize) -> Option<&[f32]> {
        self.kernels.get(axis).and_then(|k| k.as_deref())
    }

    /// Filter `vol` along every enabled axis.
    ///
    /// The result lives in this filter's buffers and stays valid until the next call.
    pub fn apply(&mut self, vol: &Volume) -> PyramidResult<&Volume> {
        if vol.nelem() == 0 {
            return Err(PyramidError::shape("cannot filter an empty volume"));
        }
        self.bufs[0].reshape(vol.shape());
        self.bufs[0].copy_from(vol)?;
        let dims = vol.dims().to_vec();
        let mut j = 0usize;
        for (axis, kernel) in self.kernels.iter().enumerate() {
            let Some(kernel) = kernel else { continue };
            if axis >= dims.len() {
                continue;
            }
            let (a, b) = self.bufs.split_at_mut(1);
            let (src, dst) = if j & 1 == 0 {
                (&a[0], &mut b[0])
            } else {
                (&b[0], &mut a[0])
            };
            dst.reshape(src.shape());
            convolve_axis(src.data(), dst.data_mut(), &dims, axis, kernel);
            j += 1;
        }
        Ok(&self.bufs[j & 1])
    }
}

/// 1-d convolution along `axis` with replicated edges.
fn convolve_axis(src: &[f32], dst: &mut [f32], dims: &[usize], axis: usize, kernel: &[f32]) {
    let stride: usize = dims[..axis].iter().product();
    let n = dims[axis];
    let outer: usize = dims[axis + 1..].iter().product();
    let radius = (kernel.len() / 2) as i64;
    let last = n as i64 - 1;
    for o in 0..outer {
        let base = o * n * stride;
        for k in 0..n {
            for inner in 0..stride {
                let mut acc = 0.0f32;
                for (ki, &w) in kernel.iter().enumerate() {
                    let sk = (k as i64 + ki as i64 - radius).clamp(0, last) as usize;
                    acc += w * src[base + sk * stride + inner];
                }
                dst[base + k * stride + inner] = acc;
            }
        }
    }
}
