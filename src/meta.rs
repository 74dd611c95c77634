use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::Cachable;
use crate::compress::SampleCompression;
use crate::data_type::DataType;
use crate::encode::DecodeError;
use crate::CoordVec;

/// Per-dimension pattern every sample shape must match; `None` is a
/// wildcard produced by widening.
pub type ShapeConstraint = CoordVec<Option<u64>>;

#[derive(Error, Debug)]
pub enum MetaError {
    #[error("sample dtype {got} does not match tensor dtype {expected}")]
    Dtype { expected: DataType, got: DataType },
    #[error("sample shape {got:?} is incompatible with tensor shape {expected}")]
    Shape { expected: String, got: Vec<u64> },
}

/// Tensor-wide invariants: dtype, element shape constraint, compression
/// tag and global sample count.
///
/// Serialized as JSON under `tensor_meta/<key>`. `length` must equal the
/// chunk id encoder's sample count after every successful write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorMeta {
    pub dtype: Option<DataType>,
    pub sample_compression: SampleCompression,
    pub length: u64,
    /// `None` until the first sample fixes the arity.
    #[serde(default)]
    pub sample_shape: Option<ShapeConstraint>,
}

impl TensorMeta {
    pub fn new(sample_compression: SampleCompression) -> Self {
        Self {
            dtype: None,
            sample_compression,
            length: 0,
            sample_shape: None,
        }
    }

    /// Reject samples that disagree with what the tensor already holds.
    pub fn check_compatibility(&self, shape: &[u64], dtype: DataType) -> Result<(), MetaError> {
        if let Some(expected) = self.dtype {
            if expected != dtype {
                return Err(MetaError::Dtype {
                    expected,
                    got: dtype,
                });
            }
        }
        if let Some(constraint) = &self.sample_shape {
            let arity_ok = constraint.len() == shape.len();
            let dims_ok = arity_ok
                && constraint
                    .iter()
                    .zip(shape.iter())
                    .all(|(c, d)| c.map(|fixed| fixed == *d).unwrap_or(true));
            if !dims_ok {
                return Err(MetaError::Shape {
                    expected: render_constraint(constraint),
                    got: shape.to_vec(),
                });
            }
        }
        Ok(())
    }

    /// Fold `n` samples of the given shape and dtype into the tensor,
    /// widening the shape constraint where dimensions disagree.
    pub fn update(&mut self, shape: &[u64], dtype: DataType, n: u64) {
        self.dtype.get_or_insert(dtype);
        match &mut self.sample_shape {
            None => {
                self.sample_shape = Some(shape.iter().map(|d| Some(*d)).collect());
            }
            Some(constraint) => {
                for (c, d) in constraint.iter_mut().zip(shape.iter()) {
                    if *c != Some(*d) {
                        *c = None;
                    }
                }
            }
        }
        self.length += n;
    }
}

fn render_constraint(constraint: &ShapeConstraint) -> String {
    let dims: Vec<String> = constraint
        .iter()
        .map(|c| match c {
            Some(d) => d.to_string(),
            None => "*".to_string(),
        })
        .collect();
    format!("({})", dims.join(", "))
}

impl Cachable for TensorMeta {
    fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("tensor meta serializes")
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn nbytes(&self) -> usize {
        // JSON has no closed-form size; the blob is a few dozen bytes
        self.to_bytes().len()
    }
}
