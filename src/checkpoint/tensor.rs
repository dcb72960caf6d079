//! Host-side weight tensors decoded from a checkpoint

use std::collections::BTreeMap;

use crate::utils::error::{Error, Result};

/// A dense `f32` tensor in row-major order
#[derive(Debug, Clone, PartialEq)]
pub struct WeightTensor {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl WeightTensor {
    /// Create a tensor, checking that the value count matches the shape
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != values.len() {
            return Err(Error::Format(format!(
                "tensor of shape {:?} needs {} values, got {}",
                shape,
                expected,
                values.len()
            )));
        }
        Ok(Self { shape, values })
    }

    /// Tensor of the given shape filled with `value`
    pub fn filled(shape: &[usize], value: f32) -> Self {
        let len = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            values: vec![value; len],
        }
    }

    /// Size of the leading dimension (output channels / rows)
    pub fn leading_dim(&self) -> Option<usize> {
        self.shape.first().copied()
    }

    pub fn num_elements(&self) -> usize {
        self.values.len()
    }

    pub fn size_bytes(&self) -> usize {
        self.values.len() * std::mem::size_of::<f32>()
    }
}

/// Parameter name → tensor
pub type WeightMap = BTreeMap<String, WeightTensor>;

/// Total number of scalar parameters in a weights mapping
pub fn count_parameters(weights: &WeightMap) -> usize {
    weights.values().map(WeightTensor::num_elements).sum()
}

/// Host memory held by a weights mapping
pub fn total_size_bytes(weights: &WeightMap) -> usize {
    weights.values().map(WeightTensor::size_bytes).sum()
}
