use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "gzip")]
use std::io::{Read, Write};

#[cfg(feature = "gzip")]
use flate2::{read::GzDecoder, write::GzEncoder, Compression as GzCompression};

/// Per-sample compression tag stored in the tensor metadata.
///
/// `Uncompressed` is the sentinel for raw-dtype serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleCompression {
    Uncompressed,
    Gzip,
}

impl Default for SampleCompression {
    fn default() -> Self {
        Self::Uncompressed
    }
}

impl Display for SampleCompression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uncompressed => write!(f, "uncompressed"),
            Self::Gzip => write!(f, "gzip"),
        }
    }
}

impl FromStr for SampleCompression {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uncompressed" => Ok(Self::Uncompressed),
            "gzip" => Ok(Self::Gzip),
            _ => Err("unknown compression tag"),
        }
    }
}

#[derive(Error, Debug)]
pub enum CompressError {
    #[error("compression `{0}` is not available in this build")]
    Unavailable(SampleCompression),
    #[error("could not decode compressed sample: {0}")]
    Codec(#[from] std::io::Error),
}

/// Encode one sample's raw bytes under the given tag.
pub fn compress(raw: &[u8], tag: SampleCompression) -> Result<Vec<u8>, CompressError> {
    match tag {
        SampleCompression::Uncompressed => Ok(raw.to_vec()),
        #[cfg(feature = "gzip")]
        SampleCompression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::default(), GzCompression::default());
            encoder.write_all(raw)?;
            Ok(encoder.finish()?)
        }
        #[cfg(not(feature = "gzip"))]
        SampleCompression::Gzip => Err(CompressError::Unavailable(tag)),
    }
}

/// Invert [compress].
pub fn decompress(encoded: &[u8], tag: SampleCompression) -> Result<Vec<u8>, CompressError> {
    match tag {
        SampleCompression::Uncompressed => Ok(encoded.to_vec()),
        #[cfg(feature = "gzip")]
        SampleCompression::Gzip => {
            let mut decoder = GzDecoder::new(encoded);
            let mut out = Vec::default();
            decoder.read_to_end(&mut out)?;
            Ok(out)
        }
        #[cfg(not(feature = "gzip"))]
        SampleCompression::Gzip => Err(CompressError::Unavailable(tag)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_as_json_strings() {
        let c: SampleCompression = serde_json::from_str(r#""uncompressed""#).unwrap();
        assert_eq!(c, SampleCompression::Uncompressed);
        assert_eq!(
            serde_json::to_string(&SampleCompression::Gzip).unwrap(),
            r#""gzip""#
        );
    }

    #[test]
    fn uncompressed_is_identity() {
        let raw = b"some sample bytes";
        let enc = compress(raw, SampleCompression::Uncompressed).unwrap();
        assert_eq!(enc, raw);
        assert_eq!(decompress(&enc, SampleCompression::Uncompressed).unwrap(), raw);
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn gzip_roundtrip() {
        let raw: Vec<u8> = (0..200u8).cycle().take(4096).collect();
        let enc = compress(&raw, SampleCompression::Gzip).unwrap();
        assert!(enc.len() < raw.len());
        assert_eq!(decompress(&enc, SampleCompression::Gzip).unwrap(), raw);
    }
}
