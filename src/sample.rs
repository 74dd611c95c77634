use bytes::Bytes;

use crate::compress::{self, CompressError, SampleCompression};
use crate::data_type::{DataType, NBytes, ReflectedType};
use crate::{ArcArrayD, SampleShape};

/// Canonical form of a sample: its dtype, shape and (possibly compressed)
/// payload bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuf {
    pub dtype: DataType,
    pub shape: SampleShape,
    pub data: Bytes,
}

impl SampleBuf {
    pub fn new(dtype: DataType, shape: SampleShape, data: Bytes) -> Self {
        Self { dtype, shape, data }
    }

    pub fn nbytes(&self) -> u64 {
        self.data.len() as u64
    }
}

/// A sample on its way into a tensor: a scalar, an array, or an already
/// serialized buffer.
#[derive(Debug, Clone)]
pub enum Sample<T: ReflectedType> {
    Scalar(T),
    Array(ArcArrayD<T>),
    Raw(SampleBuf),
}

impl<T: ReflectedType> Sample<T> {
    /// Reduce to the canonical [SampleBuf], serializing typed variants
    /// little-endian and applying the tensor's compression. `Raw` buffers
    /// pass through untouched.
    pub fn normalize(self, compression: SampleCompression) -> Result<SampleBuf, CompressError> {
        match self {
            Sample::Raw(buf) => Ok(buf),
            Sample::Scalar(v) => {
                let mut raw = Vec::with_capacity(T::DATA_TYPE.nbytes());
                T::extend_le_bytes(&[v], &mut raw);
                finish(raw, T::DATA_TYPE, SampleShape::new(), compression)
            }
            Sample::Array(arr) => {
                let shape: SampleShape = arr.shape().iter().map(|s| *s as u64).collect();
                let standard = arr.as_standard_layout();
                let values = standard.as_slice().expect("standard layout is contiguous");
                let mut raw = Vec::new();
                T::extend_le_bytes(values, &mut raw);
                finish(raw, T::DATA_TYPE, shape, compression)
            }
        }
    }
}

fn finish(
    raw: Vec<u8>,
    dtype: DataType,
    shape: SampleShape,
    compression: SampleCompression,
) -> Result<SampleBuf, CompressError> {
    let data = match compression {
        SampleCompression::Uncompressed => raw,
        other => compress::compress(&raw, other)?,
    };
    Ok(SampleBuf::new(dtype, shape, Bytes::from(data)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn scalars_have_the_empty_shape() {
        let buf = Sample::Scalar(7u16)
            .normalize(SampleCompression::Uncompressed)
            .unwrap();
        assert!(buf.shape.is_empty());
        assert_eq!(buf.data.as_ref(), &[7, 0]);
        assert_eq!(buf.dtype, <u16 as ReflectedType>::DATA_TYPE);
    }

    #[test]
    fn arrays_serialize_in_row_major_order() {
        let arr = array![[1u8, 2], [3, 4]].into_dyn().into_shared();
        let buf = Sample::Array(arr)
            .normalize(SampleCompression::Uncompressed)
            .unwrap();
        assert_eq!(buf.shape.as_slice(), &[2, 2]);
        assert_eq!(buf.data.as_ref(), &[1, 2, 3, 4]);
    }

    #[test]
    fn raw_buffers_pass_through() {
        let original = SampleBuf::new(
            <u8 as ReflectedType>::DATA_TYPE,
            SampleShape::new(),
            Bytes::from_static(b"\xff"),
        );
        let buf = Sample::<u8>::Raw(original.clone())
            .normalize(SampleCompression::Gzip)
            .unwrap();
        assert_eq!(buf, original);
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn compression_applies_to_typed_variants() {
        let arr = ArcArrayD::from_elem(ndarray::IxDyn(&[64, 64]), 0f32);
        let buf = Sample::Array(arr)
            .normalize(SampleCompression::Gzip)
            .unwrap();
        // 16KiB of zeros squeezes well
        assert!(buf.nbytes() < 64 * 64 * 4);
    }
}
