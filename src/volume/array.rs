use crate::foundation::error::{PyramidError, PyramidResult};

/// Sample type of a tile or node as stored on disk.
///
/// Samples are processed as `f32`, which holds integers exactly only up to 2^24. `U32`, `I32`,
/// `U64`, `I64` and `F64` data keep their type tag but lose precision beyond that.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum PixelType {
    U8,
    #[default]
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl PixelType {
    pub const ALL: [PixelType; 10] = [
        PixelType::U8,
        PixelType::U16,
        PixelType::U32,
        PixelType::U64,
        PixelType::I8,
        PixelType::I16,
        PixelType::I32,
        PixelType::I64,
        PixelType::F32,
        PixelType::F64,
    ];

    pub fn bytes(self) -> usize {
        match self {
            PixelType::U8 | PixelType::I8 => 1,
            PixelType::U16 | PixelType::I16 => 2,
            PixelType::U32 | PixelType::I32 | PixelType::F32 => 4,
            PixelType::U64 | PixelType::I64 | PixelType::F64 => 8,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            PixelType::U8 => "u8",
            PixelType::U16 => "u16",
            PixelType::U32 => "u32",
            PixelType::U64 => "u64",
            PixelType::I8 => "i8",
            PixelType::I16 => "i16",
            PixelType::I32 => "i32",
            PixelType::I64 => "i64",
            PixelType::F32 => "f32",
            PixelType::F64 => "f64",
        }
    }

    pub fn from_tag(tag: &str) -> PyramidResult<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.tag() == tag)
            .ok_or_else(|| PyramidError::validation(format!("unknown pixel type '{tag}'")))
    }

    /// "No data" value written before compositing and left wherever no tile contributes.
    ///
    /// Unsigned and floating point types use zero; signed integer types use their minimum
    /// (the `0x80...` bit pattern).
    pub fn fill_value(self) -> f32 {
        match self {
            PixelType::I8 => f32::from(i8::MIN),
            PixelType::I16 => f32::from(i16::MIN),
            PixelType::I32 => i32::MIN as f32,
            PixelType::I64 => i64::MIN as f32,
            _ => 0.0,
        }
    }

    /// Clamp and round a working sample into this type's range.
    pub fn quantize(self, v: f32) -> f64 {
        let v = f64::from(v);
        let (lo, hi) = match self {
            PixelType::U8 => (0.0, f64::from(u8::MAX)),
            PixelType::U16 => (0.0, f64::from(u16::MAX)),
            PixelType::U32 => (0.0, f64::from(u32::MAX)),
            PixelType::U64 => (0.0, u64::MAX as f64),
            PixelType::I8 => (f64::from(i8::MIN), f64::from(i8::MAX)),
            PixelType::I16 => (f64::from(i16::MIN), f64::from(i16::MAX)),
            PixelType::I32 => (f64::from(i32::MIN), f64::from(i32::MAX)),
            PixelType::I64 => (i64::MIN as f64, i64::MAX as f64),
            PixelType::F32 | PixelType::F64 => return v,
        };
        if v.is_nan() {
            return lo;
        }
        v.round().clamp(lo, hi)
    }
}

impl std::fmt::Display for PixelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Dimensions plus sample type, without any data.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct VolumeShape {
    pub dims: Vec<usize>,
    pub pixel_type: PixelType,
}

impl VolumeShape {
    pub fn new(dims: Vec<usize>, pixel_type: PixelType) -> Self {
        Self { dims, pixel_type }
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn nelem(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn nbytes(&self) -> usize {
        self.nelem().saturating_mul(self.pixel_type.bytes())
    }
}

/// Dense n-d sample array, axis 0 varying fastest (x, y, z, then channels).
///
/// Samples are kept as `f32` regardless of [`PixelType`]; the pixel type records what the data
/// represents and is used for byte budgets, fill values and quantization on write.
#[derive(Clone, Debug, PartialEq)]
pub struct Volume {
    shape: VolumeShape,
    data: Vec<f32>,
}

impl Volume {
    pub fn new(dims: Vec<usize>, pixel_type: PixelType) -> Self {
        let shape = VolumeShape::new(dims, pixel_type);
        let data = vec![0.0; shape.nelem()];
        Self { shape, data }
    }

    pub fn from_shape(shape: &VolumeShape) -> Self {
        Self::new(shape.dims.clone(), shape.pixel_type)
    }

    pub fn from_data(dims: Vec<usize>, pixel_type: PixelType, data: Vec<f32>) -> PyramidResult<Self> {
        let shape = VolumeShape::new(dims, pixel_type);
        if shape.nelem() != data.len() {
            return Err(PyramidError::shape(format!(
                "volume of shape {:?} needs {} samples, got {}",
                shape.dims,
                shape.nelem(),
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &VolumeShape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        &self.shape.dims
    }

    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    pub fn pixel_type(&self) -> PixelType {
        self.shape.pixel_type
    }

    pub fn nelem(&self) -> usize {
        self.data.len()
    }

    pub fn nbytes(&self) -> usize {
        self.shape.nbytes()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Element strides (in samples) for each axis.
    pub fn strides(&self) -> Vec<usize> {
        let mut s = Vec::with_capacity(self.ndim());
        let mut acc = 1usize;
        for &d in self.dims() {
            s.push(acc);
            acc = acc.saturating_mul(d);
        }
        s
    }

    /// Change shape and pixel type. Existing samples are kept in linear order; new samples are
    /// zero. The backing allocation is reused when large enough.
    pub fn reshape(&mut self, shape: &VolumeShape) {
        self.shape.clone_from(shape);
        self.data.resize(shape.nelem(), 0.0);
    }

    pub fn fill(&mut self, v: f32) {
        self.data.fill(v);
    }

    /// Copy samples from a volume of identical dimensions.
    pub fn copy_from(&mut self, src: &Volume) -> PyramidResult<()> {
        if self.dims() != src.dims() {
            return Err(PyramidError::shape(format!(
                "copy between shapes {:?} and {:?}",
                src.dims(),
                self.dims()
            )));
        }
        self.data.copy_from_slice(&src.data);
        Ok(())
    }

    pub fn at(&self, idx: &[usize]) -> f32 {
        self.data[self.linear(idx)]
    }

    pub fn set_at(&mut self, idx: &[usize], v: f32) {
        let i = self.linear(idx);
        self.data[i] = v;
    }

    fn linear(&self, idx: &[usize]) -> usize {
        let mut i = 0usize;
        let mut stride = 1usize;
        for (&x, &d) in idx.iter().zip(self.dims()) {
            i += x * stride;
            stride *= d;
        }
        i
    }

    /// Copy the planes `z0 .. z0 + nz` along axis 2 into a new volume.
    pub fn slab(&self, z0: usize, nz: usize) -> PyramidResult<Volume> {
        if self.ndim() < 3 {
            return Err(PyramidError::shape(format!(
                "slab needs at least 3 axes, volume has {}",
                self.ndim()
            )));
        }
        let z = self.dims()[2];
        if nz == 0 || z0 + nz > z {
            return Err(PyramidError::shape(format!(
                "slab {z0}..{} outside z extent {z}",
                z0 + nz
            )));
        }
        let plane = self.dims()[0] * self.dims()[1];
        let outer: usize = self.dims()[3..].iter().product();
        let mut dims = self.dims().to_vec();
        dims[2] = nz;
        let mut data = Vec::with_capacity(plane * nz * outer);
        for o in 0..outer {
            let base = o * plane * z + z0 * plane;
            data.extend_from_slice(&self.data[base..base + plane * nz]);
        }
        Volume::from_data(dims, self.pixel_type(), data)
    }

    /// Copy with the spatial axes cycled: output axis `j` is input axis `(j + shift) % 3`.
    /// Axes after the third keep their place.
    pub fn rotate_spatial(&self, shift: usize) -> PyramidResult<Volume> {
        if self.ndim() < 3 {
            return Err(PyramidError::shape(format!(
                "rotating axes needs at least 3 axes, volume has {}",
                self.ndim()
            )));
        }
        let src_dims = self.dims();
        let strides = self.strides();
        let mut dims = src_dims.to_vec();
        for (j, d) in dims.iter_mut().enumerate().take(3) {
            *d = src_dims[(j + shift) % 3];
        }
        let block: usize = src_dims[..3].iter().product();
        let outer: usize = src_dims[3..].iter().product();
        let mut data = Vec::with_capacity(self.nelem());
        for o in 0..outer {
            for k in 0..dims[2] {
                for j in 0..dims[1] {
                    for i in 0..dims[0] {
                        let src = [i, j, k]
                            .iter()
                            .enumerate()
                            .map(|(a, &x)| x * strides[(a + shift) % 3])
                            .sum::<usize>();
                        data.push(self.data[o * block + src]);
                    }
                }
            }
        }
        Volume::from_data(dims, self.pixel_type(), data)
    }
}
