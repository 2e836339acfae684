//! Dense row-major tensors holding buffer contents.

use loopcraft_ir::ScalarType;

/// Contents of one buffer.
///
/// Elements are kept as `f64` and rounded to the element type on every
/// store, so `f32` buffers see `f32` rounding and integer buffers see
/// truncation.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    pub ty: ScalarType,
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl Tensor {
    pub fn zeros(ty: ScalarType, shape: Vec<usize>) -> Self {
        Self::filled(ty, shape, 0.0)
    }

    pub fn filled(ty: ScalarType, shape: Vec<usize>, value: f64) -> Self {
        let len = shape.iter().product();
        Tensor {
            ty,
            shape,
            data: vec![round_to(ty, value); len],
        }
    }

    /// Build a tensor from a function of the flat element offset.
    pub fn from_fn(ty: ScalarType, shape: Vec<usize>, mut f: impl FnMut(usize) -> f64) -> Self {
        let len = shape.iter().product();
        Tensor {
            ty,
            shape,
            data: (0..len).map(|i| round_to(ty, f(i))).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row-major offset of `index`, or `None` if it is out of bounds.
    pub fn offset(&self, index: &[i64]) -> Option<usize> {
        if index.len() != self.shape.len() {
            return None;
        }
        let mut flat = 0usize;
        for (&i, &extent) in index.iter().zip(&self.shape) {
            let i = usize::try_from(i).ok().filter(|&i| i < extent)?;
            flat = flat * extent + i;
        }
        Some(flat)
    }

    pub fn get(&self, index: &[i64]) -> Option<f64> {
        self.offset(index).map(|o| self.data[o])
    }

    pub fn set(&mut self, index: &[i64], value: f64) -> bool {
        match self.offset(index) {
            Some(o) => {
                self.data[o] = round_to(self.ty, value);
                true
            }
            None => false,
        }
    }

    /// Largest absolute elementwise difference, `None` when the shapes
    /// differ. Two NaNs at the same position count as equal.
    pub fn max_abs_diff(&self, other: &Tensor) -> Option<f64> {
        if self.shape != other.shape {
            return None;
        }
        let diff = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| if a.is_nan() && b.is_nan() { 0.0 } else { (a - b).abs() })
            .fold(0.0, f64::max);
        Some(diff)
    }
}

/// Round `value` as a store into a buffer of type `ty` would.
pub fn round_to(ty: ScalarType, value: f64) -> f64 {
    match ty {
        ScalarType::F32 => value as f32 as f64,
        ScalarType::F64 => value,
        ScalarType::I32 => value.trunc() as i32 as f64,
        ScalarType::I8 => value.trunc() as i8 as f64,
    }
}
