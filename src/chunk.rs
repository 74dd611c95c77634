use std::ops::Range;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::{BufMut, BytesMut};
use thiserror::Error;

use crate::cache::Cachable;
use crate::encode::{eof, ByteRangeEncoder, DecodeError, ShapeEncoder};
use crate::SampleShape;

const CHUNK_FORMAT_VERSION: u8 = 1;

#[derive(Error, Debug)]
#[error("appending {extra} bytes to a chunk holding {held} would exceed the {max} byte budget")]
pub struct ChunkFull {
    pub extra: u64,
    pub held: u64,
    pub max: u64,
}

/// Bounded, append-only container of serialized sample bytes plus
/// per-sample headers.
///
/// `data` holds the concatenated sample payloads; `shapes` and `ranges`
/// locate each sample's shape and byte interval by local index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chunk {
    data: BytesMut,
    shapes: ShapeEncoder,
    ranges: ByteRangeEncoder,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_data_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    /// Count of samples whose head lives in this chunk.
    pub fn num_samples(&self) -> u64 {
        self.shapes.num_samples()
    }

    /// Whether the chunk is still a candidate for further appends.
    pub fn is_under_min_space(&self, threshold: u64) -> bool {
        self.num_data_bytes() < threshold
    }

    /// Copy one sample's payload onto `data`.
    ///
    /// Headers are untouched; callers follow up with [Chunk::update_headers].
    pub fn append_sample(&mut self, bytes: &[u8], max_chunk_size: u64) -> Result<(), ChunkFull> {
        let extra = bytes.len() as u64;
        if self.num_data_bytes() + extra > max_chunk_size {
            return Err(ChunkFull {
                extra,
                held: self.num_data_bytes(),
                max: max_chunk_size,
            });
        }
        self.data.put_slice(bytes);
        Ok(())
    }

    /// Record `num_new_samples` samples of equal shape occupying the last
    /// `num_new_bytes` of `data`, split evenly.
    ///
    /// The caller guarantees the inputs match the payload it just appended.
    pub fn update_headers(&mut self, num_new_bytes: u64, num_new_samples: u64, shape: &[u64]) {
        self.shapes.append(shape, num_new_samples);
        self.ranges.append(num_new_bytes, num_new_samples);
    }

    /// Zero-copy view of the payload buffer.
    ///
    /// Slices taken from it must not outlive the chunk reference.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn shape(&self, i: u64) -> Option<&SampleShape> {
        self.shapes.shape(i)
    }

    pub fn byte_range(&self, i: u64) -> Option<Range<u64>> {
        self.ranges.byte_range(i)
    }
}

impl Cachable for Chunk {
    fn to_bytes(&self) -> Vec<u8> {
        let mut shapes_blob = Vec::new();
        self.shapes.to_bytes(&mut shapes_blob);
        let mut ranges_blob = Vec::new();
        self.ranges.to_bytes(&mut ranges_blob);

        let mut buf = Vec::with_capacity(self.nbytes());
        buf.push(CHUNK_FORMAT_VERSION);
        buf.write_u32::<LittleEndian>(shapes_blob.len() as u32)
            .expect("write to vec");
        buf.extend_from_slice(&shapes_blob);
        buf.write_u32::<LittleEndian>(ranges_blob.len() as u32)
            .expect("write to vec");
        buf.extend_from_slice(&ranges_blob);
        buf.extend_from_slice(&self.data);
        buf
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = bytes;
        let version = r.read_u8().map_err(eof)?;
        if version != CHUNK_FORMAT_VERSION {
            return Err(DecodeError::Version(version));
        }
        let shapes_len = r.read_u32::<LittleEndian>().map_err(eof)? as usize;
        if r.len() < shapes_len {
            return Err(DecodeError::Truncated("shape header section"));
        }
        let (shapes_blob, rest) = r.split_at(shapes_len);
        let shapes = ShapeEncoder::from_bytes(shapes_blob)?;

        let mut r = rest;
        let ranges_len = r.read_u32::<LittleEndian>().map_err(eof)? as usize;
        if r.len() < ranges_len {
            return Err(DecodeError::Truncated("byte range header section"));
        }
        let (ranges_blob, data) = r.split_at(ranges_len);
        let ranges = ByteRangeEncoder::from_bytes(ranges_blob)?;

        Ok(Self {
            data: BytesMut::from(data),
            shapes,
            ranges,
        })
    }

    fn nbytes(&self) -> usize {
        // version byte, two length prefixes, both header blobs, payload
        1 + 4 + self.shapes.encoded_nbytes() + 4 + self.ranges.encoded_nbytes() + self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn append_respects_the_budget() {
        let mut c = Chunk::new();
        c.append_sample(&[0; 40], 64).unwrap();
        assert_eq!(c.num_data_bytes(), 40);

        let err = c.append_sample(&[0; 30], 64).unwrap_err();
        assert_eq!(err.held, 40);
        assert_eq!(err.extra, 30);
        // the failed append must not have grown the buffer
        assert_eq!(c.num_data_bytes(), 40);

        c.append_sample(&[0; 24], 64).unwrap();
        assert_eq!(c.num_data_bytes(), 64);
    }

    #[test]
    fn headers_track_appends() {
        let mut c = Chunk::new();
        c.append_sample(&[1; 8], 1024).unwrap();
        c.update_headers(8, 2, &[2]);
        c.append_sample(&[2; 6], 1024).unwrap();
        c.update_headers(6, 1, &[6]);

        assert_eq!(c.num_samples(), 3);
        let two: SampleShape = smallvec![2];
        let six: SampleShape = smallvec![6];
        assert_eq!(c.shape(0), Some(&two));
        assert_eq!(c.shape(1), Some(&two));
        assert_eq!(c.shape(2), Some(&six));
        assert_eq!(c.byte_range(0), Some(0..4));
        assert_eq!(c.byte_range(1), Some(4..8));
        assert_eq!(c.byte_range(2), Some(8..14));
    }

    #[test]
    fn header_coverage_matches_data() {
        let mut c = Chunk::new();
        for i in 0..5u64 {
            let payload = vec![i as u8; 10];
            c.append_sample(&payload, 1024).unwrap();
            c.update_headers(10, 1, &[10]);
        }
        let covered: u64 = (0..c.num_samples())
            .map(|i| {
                let r = c.byte_range(i).unwrap();
                r.end - r.start
            })
            .sum();
        assert_eq!(covered, c.num_data_bytes());
        assert_eq!(c.num_samples(), 5);
    }

    #[test]
    fn is_under_min_space() {
        let mut c = Chunk::new();
        assert!(c.is_under_min_space(32));
        c.append_sample(&[0; 32], 64).unwrap();
        assert!(!c.is_under_min_space(32));
    }

    #[test]
    fn blob_roundtrip() {
        let mut c = Chunk::new();
        c.append_sample(b"abcdefgh", 1024).unwrap();
        c.update_headers(8, 2, &[4]);
        c.append_sample(b"xyz", 1024).unwrap();
        c.update_headers(3, 1, &[3]);

        let blob = c.to_bytes();
        assert_eq!(c.nbytes(), blob.len());
        let back = Chunk::from_bytes(&blob).unwrap();
        assert_eq!(back, c);
        assert_eq!(back.data(), b"abcdefghxyz");
    }

    #[test]
    fn empty_blob_roundtrip() {
        let c = Chunk::new();
        let back = Chunk::from_bytes(&c.to_bytes()).unwrap();
        assert_eq!(back.num_samples(), 0);
        assert_eq!(back.num_data_bytes(), 0);
    }

    #[test]
    fn bad_version_rejected() {
        let mut blob = Chunk::new().to_bytes();
        blob[0] = 7;
        assert!(matches!(
            Chunk::from_bytes(&blob),
            Err(DecodeError::Version(7))
        ));
    }
}
