use std::ops::Range;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::{eof, DecodeError};

#[derive(Debug, Clone, PartialEq, Eq)]
struct ByteRangeRow {
    /// Bytes per sample within the run.
    sample_nbytes: u64,
    /// Byte offset of the run's first sample.
    start: u64,
    last_index: u64,
}

/// Maps local sample index → half-open byte interval into a chunk's data.
///
/// Consecutive samples of equal byte size share a row; each row carries the
/// run's starting offset so lookups stay `O(log runs)` without a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteRangeEncoder {
    rows: Vec<ByteRangeRow>,
}

impl ByteRangeEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_samples(&self) -> u64 {
        self.rows.last().map(|r| r.last_index + 1).unwrap_or(0)
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Total bytes covered by all recorded samples.
    pub fn num_data_bytes(&self) -> u64 {
        match self.rows.last() {
            None => 0,
            Some(row) => {
                let first = self.run_start_index(self.rows.len() - 1);
                row.start + row.sample_nbytes * (row.last_index - first + 1)
            }
        }
    }

    /// Record `n` more samples occupying `num_new_bytes` in total, evenly.
    pub fn append(&mut self, num_new_bytes: u64, n: u64) {
        if n == 0 {
            return;
        }
        debug_assert_eq!(num_new_bytes % n, 0);
        let sample_nbytes = num_new_bytes / n;
        if let Some(last) = self.rows.last_mut() {
            if last.sample_nbytes == sample_nbytes {
                last.last_index += n;
                return;
            }
        }
        self.rows.push(ByteRangeRow {
            sample_nbytes,
            start: self.num_data_bytes(),
            last_index: self.num_samples() + n - 1,
        });
    }

    /// Byte interval of the sample at a local index.
    pub fn byte_range(&self, i: u64) -> Option<Range<u64>> {
        let idx = self.rows.partition_point(|r| r.last_index < i);
        let row = self.rows.get(idx)?;
        let first = self.run_start_index(idx);
        let start = row.start + (i - first) * row.sample_nbytes;
        Some(start..start + row.sample_nbytes)
    }

    fn run_start_index(&self, row_idx: usize) -> u64 {
        if row_idx == 0 {
            0
        } else {
            self.rows[row_idx - 1].last_index + 1
        }
    }

    /// Size of the encoded blob in bytes.
    pub(crate) fn encoded_nbytes(&self) -> usize {
        4 + self.rows.len() * 24
    }

    pub(crate) fn to_bytes(&self, buf: &mut Vec<u8>) {
        buf.write_u32::<LittleEndian>(self.rows.len() as u32)
            .expect("write to vec");
        for row in &self.rows {
            buf.write_u64::<LittleEndian>(row.sample_nbytes)
                .expect("write to vec");
            buf.write_u64::<LittleEndian>(row.start).expect("write to vec");
            buf.write_u64::<LittleEndian>(row.last_index)
                .expect("write to vec");
        }
    }

    pub(crate) fn from_bytes(mut bytes: &[u8]) -> Result<Self, DecodeError> {
        let r = &mut bytes;
        let num_rows = r.read_u32::<LittleEndian>().map_err(eof)? as usize;
        let mut rows = Vec::with_capacity(num_rows);
        for _ in 0..num_rows {
            rows.push(ByteRangeRow {
                sample_nbytes: r.read_u64::<LittleEndian>().map_err(eof)?,
                start: r.read_u64::<LittleEndian>().map_err(eof)?,
                last_index: r.read_u64::<LittleEndian>().map_err(eof)?,
            });
        }
        Ok(Self { rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_is_empty() {
        let e = ByteRangeEncoder::new();
        assert_eq!(e.num_samples(), 0);
        assert_eq!(e.num_data_bytes(), 0);
        assert!(e.byte_range(0).is_none());
    }

    #[test]
    fn even_sizes_share_a_row() {
        let mut e = ByteRangeEncoder::new();
        e.append(40, 10);
        e.append(8, 2);
        assert_eq!(e.num_rows(), 1);
        assert_eq!(e.num_samples(), 12);
        assert_eq!(e.num_data_bytes(), 48);
    }

    #[test]
    fn ranges_are_contiguous() {
        let mut e = ByteRangeEncoder::new();
        e.append(40, 10);
        for i in 0..10 {
            assert_eq!(e.byte_range(i), Some(i * 4..i * 4 + 4));
        }
        assert!(e.byte_range(10).is_none());
    }

    #[test]
    fn lookup_crosses_runs() {
        let mut e = ByteRangeEncoder::new();
        e.append(12, 3); // 4 bytes each
        e.append(20, 2); // 10 bytes each
        assert_eq!(e.byte_range(2), Some(8..12));
        assert_eq!(e.byte_range(3), Some(12..22));
        assert_eq!(e.byte_range(4), Some(22..32));
        assert_eq!(e.num_data_bytes(), 32);
    }

    #[test]
    fn zero_byte_samples() {
        let mut e = ByteRangeEncoder::new();
        e.append(0, 3);
        assert_eq!(e.num_samples(), 3);
        assert_eq!(e.num_data_bytes(), 0);
        assert_eq!(e.byte_range(1), Some(0..0));
    }

    #[test]
    fn blob_roundtrip() {
        let mut e = ByteRangeEncoder::new();
        e.append(100, 4);
        e.append(9, 3);
        let mut buf = Vec::new();
        e.to_bytes(&mut buf);
        assert_eq!(ByteRangeEncoder::from_bytes(&buf).unwrap(), e);
    }
}
