use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::{eof, DecodeError};
use crate::SampleShape;

#[derive(Debug, Clone, PartialEq, Eq)]
struct ShapeRow {
    shape: SampleShape,
    last_index: u64,
}

/// Maps local sample index → shape tuple within one chunk.
///
/// Consecutive samples of equal shape share a row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShapeEncoder {
    rows: Vec<ShapeRow>,
}

impl ShapeEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_samples(&self) -> u64 {
        self.rows.last().map(|r| r.last_index + 1).unwrap_or(0)
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Record `n` more samples of the given shape.
    ///
    /// All shapes within one chunk have the same arity.
    pub fn append(&mut self, shape: &[u64], n: u64) {
        if n == 0 {
            return;
        }
        if let Some(last) = self.rows.last_mut() {
            debug_assert_eq!(last.shape.len(), shape.len());
            if last.shape.as_slice() == shape {
                last.last_index += n;
                return;
            }
        }
        self.rows.push(ShapeRow {
            shape: shape.iter().copied().collect(),
            last_index: self.num_samples() + n - 1,
        });
    }

    /// Shape of the sample at a local index.
    pub fn shape(&self, i: u64) -> Option<&SampleShape> {
        let row = self.rows.partition_point(|r| r.last_index < i);
        self.rows.get(row).map(|r| &r.shape)
    }

    /// Size of the encoded blob in bytes.
    pub(crate) fn encoded_nbytes(&self) -> usize {
        let ndim = self.rows.first().map(|r| r.shape.len()).unwrap_or(0);
        1 + 4 + self.rows.len() * (ndim + 1) * 8
    }

    pub(crate) fn to_bytes(&self, buf: &mut Vec<u8>) {
        let ndim = self.rows.first().map(|r| r.shape.len()).unwrap_or(0);
        buf.push(ndim as u8);
        buf.write_u32::<LittleEndian>(self.rows.len() as u32)
            .expect("write to vec");
        for row in &self.rows {
            for d in &row.shape {
                buf.write_u64::<LittleEndian>(*d).expect("write to vec");
            }
            buf.write_u64::<LittleEndian>(row.last_index)
                .expect("write to vec");
        }
    }

    pub(crate) fn from_bytes(mut bytes: &[u8]) -> Result<Self, DecodeError> {
        let r = &mut bytes;
        let ndim = r.read_u8().map_err(eof)? as usize;
        let num_rows = r.read_u32::<LittleEndian>().map_err(eof)? as usize;
        let mut rows = Vec::with_capacity(num_rows);
        for _ in 0..num_rows {
            let mut shape = SampleShape::with_capacity(ndim);
            for _ in 0..ndim {
                shape.push(r.read_u64::<LittleEndian>().map_err(eof)?);
            }
            let last_index = r.read_u64::<LittleEndian>().map_err(eof)?;
            rows.push(ShapeRow { shape, last_index });
        }
        Ok(Self { rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn fresh_is_empty() {
        let e = ShapeEncoder::new();
        assert_eq!(e.num_samples(), 0);
        assert_eq!(e.num_rows(), 0);
        assert!(e.shape(0).is_none());
    }

    #[test]
    fn equal_shapes_share_a_row() {
        let mut e = ShapeEncoder::new();
        e.append(&[28, 28], 10);
        e.append(&[28, 28], 5);
        assert_eq!(e.num_rows(), 1);
        assert_eq!(e.num_samples(), 15);

        e.append(&[32, 28], 1);
        assert_eq!(e.num_rows(), 2);
        assert_eq!(e.num_samples(), 16);
    }

    #[test]
    fn lookup_crosses_runs() {
        let mut e = ShapeEncoder::new();
        e.append(&[4], 3);
        e.append(&[7], 2);
        let four: SampleShape = smallvec![4];
        let seven: SampleShape = smallvec![7];
        assert_eq!(e.shape(0), Some(&four));
        assert_eq!(e.shape(2), Some(&four));
        assert_eq!(e.shape(3), Some(&seven));
        assert_eq!(e.shape(4), Some(&seven));
        assert!(e.shape(5).is_none());
    }

    #[test]
    fn scalar_shapes() {
        let mut e = ShapeEncoder::new();
        e.append(&[], 4);
        assert_eq!(e.num_samples(), 4);
        assert_eq!(e.shape(3).map(|s| s.len()), Some(0));
    }

    #[test]
    fn blob_roundtrip() {
        let mut e = ShapeEncoder::new();
        e.append(&[100, 100, 3], 7);
        e.append(&[120, 80, 3], 2);
        let mut buf = Vec::new();
        e.to_bytes(&mut buf);
        let back = ShapeEncoder::from_bytes(&buf).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn truncated_blob_rejected() {
        let mut e = ShapeEncoder::new();
        e.append(&[4, 4], 1);
        let mut buf = Vec::new();
        e.to_bytes(&mut buf);
        assert!(ShapeEncoder::from_bytes(&buf[..buf.len() - 2]).is_err());
    }
}
