use std::fmt::{Debug, Display};
use std::str::FromStr;

use byteorder::{ByteOrder, LittleEndian};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

pub trait NBytes {
    /// Number of bytes in one element of the data type.
    fn nbytes(&self) -> usize;

    fn nbits(&self) -> usize {
        self.nbytes() * 8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum IntSize {
    b8,
    b16,
    b32,
    b64,
}

impl TryFrom<usize> for IntSize {
    type Error = &'static str;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            8 => Ok(Self::b8),
            16 => Ok(Self::b16),
            32 => Ok(Self::b32),
            64 => Ok(Self::b64),
            _ => Err("not a valid integer size"),
        }
    }
}

impl NBytes for IntSize {
    fn nbytes(&self) -> usize {
        match self {
            Self::b8 => 1,
            Self::b16 => 2,
            Self::b32 => 4,
            Self::b64 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum FloatSize {
    b32,
    b64,
}

impl TryFrom<usize> for FloatSize {
    type Error = &'static str;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            32 => Ok(Self::b32),
            64 => Ok(Self::b64),
            _ => Err("not a valid float size"),
        }
    }
}

impl NBytes for FloatSize {
    fn nbytes(&self) -> usize {
        match self {
            Self::b32 => 4,
            Self::b64 => 8,
        }
    }
}

/// Element type of a tensor, named by its textual tag (`"uint8"`, `"float32"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Bool,
    Int(IntSize),
    UInt(IntSize),
    Float(FloatSize),
}

impl NBytes for DataType {
    fn nbytes(&self) -> usize {
        match self {
            Self::Bool => 1,
            Self::Int(s) | Self::UInt(s) => s.nbytes(),
            Self::Float(s) => s.nbytes(),
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let nbits = self.nbits();
        let s = match self {
            Self::Bool => "bool".into(),
            Self::Int(_) => format!("int{nbits}"),
            Self::UInt(_) => format!("uint{nbits}"),
            Self::Float(_) => format!("float{nbits}"),
        };
        write!(f, "{}", s)
    }
}

fn split_str_num(s: &str) -> (&str, Option<usize>) {
    if let Some(idx) = s.find(|c: char| c.is_ascii_digit()) {
        (&s[0..idx], s[idx..].parse().ok())
    } else {
        (s, None)
    }
}

impl FromStr for DataType {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, nbits) = split_str_num(s);
        if let Some(n) = nbits {
            match name {
                "int" => Ok(Self::Int(n.try_into()?)),
                "uint" => Ok(Self::UInt(n.try_into()?)),
                "float" => Ok(Self::Float(n.try_into()?)),
                _ => Err("unknown data type"),
            }
        } else if name == "bool" {
            Ok(Self::Bool)
        } else {
            Err("could not parse data type")
        }
    }
}

impl Serialize for DataType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DataType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FromStr::from_str(&s).map_err(de::Error::custom)
    }
}

/// Trait implemented by primitive types that can live in a tensor.
///
/// Values are serialized little-endian regardless of host order, so blobs
/// written on one machine read back identically on another.
pub trait ReflectedType:
    Send + Sync + Clone + Copy + Default + PartialEq + Debug + 'static
{
    const DATA_TYPE: DataType;

    /// Append the little-endian bytes of each value to the buffer.
    fn extend_le_bytes(values: &[Self], buf: &mut Vec<u8>);

    /// Decode a little-endian byte buffer.
    ///
    /// The buffer length must be a multiple of the element size; callers
    /// validate against the recorded sample shape first.
    fn from_le_bytes(bytes: &[u8]) -> Vec<Self>;
}

macro_rules! reflected_primitive {
    ($d_type:ty, $d_name:expr, $bo_read_fn:ident, $bo_write_fn:ident) => {
        impl ReflectedType for $d_type {
            const DATA_TYPE: DataType = $d_name;

            fn extend_le_bytes(values: &[Self], buf: &mut Vec<u8>) {
                let start = buf.len();
                buf.resize(start + values.len() * Self::DATA_TYPE.nbytes(), 0);
                LittleEndian::$bo_write_fn(values, &mut buf[start..]);
            }

            fn from_le_bytes(bytes: &[u8]) -> Vec<Self> {
                let mut out = vec![Self::default(); bytes.len() / Self::DATA_TYPE.nbytes()];
                LittleEndian::$bo_read_fn(bytes, &mut out);
                out
            }
        }
    };
}

reflected_primitive!(u16, DataType::UInt(IntSize::b16), read_u16_into, write_u16_into);
reflected_primitive!(u32, DataType::UInt(IntSize::b32), read_u32_into, write_u32_into);
reflected_primitive!(u64, DataType::UInt(IntSize::b64), read_u64_into, write_u64_into);
reflected_primitive!(i16, DataType::Int(IntSize::b16), read_i16_into, write_i16_into);
reflected_primitive!(i32, DataType::Int(IntSize::b32), read_i32_into, write_i32_into);
reflected_primitive!(i64, DataType::Int(IntSize::b64), read_i64_into, write_i64_into);
reflected_primitive!(f32, DataType::Float(FloatSize::b32), read_f32_into, write_f32_into);
reflected_primitive!(f64, DataType::Float(FloatSize::b64), read_f64_into, write_f64_into);

impl ReflectedType for u8 {
    const DATA_TYPE: DataType = DataType::UInt(IntSize::b8);

    fn extend_le_bytes(values: &[Self], buf: &mut Vec<u8>) {
        buf.extend_from_slice(values);
    }

    fn from_le_bytes(bytes: &[u8]) -> Vec<Self> {
        bytes.to_vec()
    }
}

impl ReflectedType for i8 {
    const DATA_TYPE: DataType = DataType::Int(IntSize::b8);

    fn extend_le_bytes(values: &[Self], buf: &mut Vec<u8>) {
        buf.extend(values.iter().map(|v| *v as u8));
    }

    fn from_le_bytes(bytes: &[u8]) -> Vec<Self> {
        bytes.iter().map(|b| *b as i8).collect()
    }
}

impl ReflectedType for bool {
    const DATA_TYPE: DataType = DataType::Bool;

    fn extend_le_bytes(values: &[Self], buf: &mut Vec<u8>) {
        buf.extend(values.iter().map(|v| *v as u8));
    }

    fn from_le_bytes(bytes: &[u8]) -> Vec<Self> {
        bytes.iter().map(|b| *b != 0).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_tags() {
        for s in ["bool", "int8", "int64", "uint8", "uint32", "float32", "float64"] {
            let d: DataType = s.parse().expect(s);
            assert_eq!(d.to_string(), s);
        }
        assert!("complex64".parse::<DataType>().is_err());
        assert!("uint7".parse::<DataType>().is_err());
    }

    #[test]
    fn tags_as_json_strings() {
        let d: DataType = serde_json::from_str(r#""uint8""#).unwrap();
        assert_eq!(d, DataType::UInt(IntSize::b8));
        assert_eq!(serde_json::to_string(&d).unwrap(), r#""uint8""#);
    }

    #[test]
    fn le_bytes_roundtrip() {
        let vals = vec![1.5f32, -2.0, 0.0, f32::MAX];
        let mut buf = Vec::new();
        f32::extend_le_bytes(&vals, &mut buf);
        assert_eq!(buf.len(), 16);
        assert_eq!(<f32 as ReflectedType>::from_le_bytes(&buf), vals);

        let vals = vec![-5i8, 0, 127];
        let mut buf = Vec::new();
        i8::extend_le_bytes(&vals, &mut buf);
        assert_eq!(<i8 as ReflectedType>::from_le_bytes(&buf), vals);
    }

    #[test]
    fn element_sizes() {
        assert_eq!(DataType::Bool.nbytes(), 1);
        assert_eq!(DataType::UInt(IntSize::b8).nbytes(), 1);
        assert_eq!(DataType::Float(FloatSize::b64).nbytes(), 8);
    }
}
