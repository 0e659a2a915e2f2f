//! Typed value model and codec.
//!
//! A dsv value is one of: a string, an array of `i32`, or a numeric scalar.
//! This module owns the four conversions the rest of the system is built on:
//! string→value, value→string, f64→value (JSON numbers), and value↔wire.

use std::fmt;

use crate::error::{DsvError, Result};

/// The type of a dsv. Discriminants are stable and travel on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DsvType {
    /// Reserved for errors; never a valid entry type.
    Invalid = 0,
    Str = 1,
    IntArray = 2,
    U16 = 3,
    S16 = 4,
    U32 = 5,
    S32 = 6,
    F32 = 7,
    U64 = 8,
    S64 = 9,
    F64 = 10,
    U8 = 11,
    S8 = 12,
}

impl DsvType {
    /// Decode a wire discriminant.
    pub fn from_wire(raw: i32) -> Result<DsvType> {
        use DsvType::*;
        Ok(match raw {
            1 => Str,
            2 => IntArray,
            3 => U16,
            4 => S16,
            5 => U32,
            6 => S32,
            7 => F32,
            8 => U64,
            9 => S64,
            10 => F64,
            11 => U8,
            12 => S8,
            other => return Err(DsvError::Invalid(format!("unknown dsv type {other}"))),
        })
    }

    /// Look up a type from its lowercase name, e.g. `u32` or `int_array`.
    pub fn from_name(name: &str) -> Result<DsvType> {
        use DsvType::*;
        Ok(match name {
            "string" => Str,
            "int_array" => IntArray,
            "u8" => U8,
            "s8" => S8,
            "u16" => U16,
            "s16" => S16,
            "u32" => U32,
            "s32" => S32,
            "u64" => U64,
            "s64" => S64,
            "f32" => F32,
            "f64" => F64,
            other => return Err(DsvError::Invalid(format!("unsupported type name {other:?}"))),
        })
    }

    /// The lowercase type name.
    pub fn name(&self) -> &'static str {
        use DsvType::*;
        match self {
            Invalid => "invalid",
            Str => "string",
            IntArray => "int_array",
            U8 => "u8",
            S8 => "s8",
            U16 => "u16",
            S16 => "s16",
            U32 => "u32",
            S32 => "s32",
            U64 => "u64",
            S64 => "s64",
            F32 => "f32",
            F64 => "f64",
        }
    }

    /// Width in bytes for scalars; 1 for string and 0 for int-array as
    /// placeholders until the first value is set.
    pub fn size(&self) -> usize {
        use DsvType::*;
        match self {
            Invalid => 0,
            Str => 1,
            IntArray => 0,
            U8 | S8 => 1,
            U16 | S16 => 2,
            U32 | S32 | F32 => 4,
            U64 | S64 | F64 => 8,
        }
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(self, DsvType::Invalid | DsvType::Str | DsvType::IntArray)
    }
}

impl fmt::Display for DsvType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A dsv value: a tagged sum over the supported types.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    IntArray(Vec<i32>),
    U8(u8),
    S8(i8),
    U16(u16),
    S16(i16),
    U32(u32),
    S32(i32),
    U64(u64),
    S64(i64),
    F32(f32),
    F64(f64),
}

impl Value {
    /// The type tag of this value.
    pub fn dsv_type(&self) -> DsvType {
        match self {
            Value::Str(_) => DsvType::Str,
            Value::IntArray(_) => DsvType::IntArray,
            Value::U8(_) => DsvType::U8,
            Value::S8(_) => DsvType::S8,
            Value::U16(_) => DsvType::U16,
            Value::S16(_) => DsvType::S16,
            Value::U32(_) => DsvType::U32,
            Value::S32(_) => DsvType::S32,
            Value::U64(_) => DsvType::U64,
            Value::S64(_) => DsvType::S64,
            Value::F32(_) => DsvType::F32,
            Value::F64(_) => DsvType::F64,
        }
    }

    /// Payload length in bytes: string length including the trailing NUL,
    /// `4 * count` for arrays, the scalar width otherwise.
    pub fn byte_len(&self) -> usize {
        match self {
            Value::Str(s) => s.len() + 1,
            Value::IntArray(a) => a.len() * 4,
            other => other.dsv_type().size(),
        }
    }

    /// The zero value of a type; used when a create carries no initial value.
    pub fn default_for(ty: DsvType) -> Result<Value> {
        use DsvType::*;
        Ok(match ty {
            Str => Value::Str(String::new()),
            IntArray => Value::IntArray(Vec::new()),
            U8 => Value::U8(0),
            S8 => Value::S8(0),
            U16 => Value::U16(0),
            S16 => Value::S16(0),
            U32 => Value::U32(0),
            S32 => Value::S32(0),
            U64 => Value::U64(0),
            S64 => Value::S64(0),
            F32 => Value::F32(0.0),
            F64 => Value::F64(0.0),
            Invalid => return Err(DsvError::Invalid("no default for invalid type".into())),
        })
    }

    /// Parse a string into a value of the given type.
    ///
    /// Unsigned types accept a leading `0x` for hex; signed types are
    /// base-10; int-array input is comma-separated signed decimals with no
    /// whitespace.
    pub fn parse(ty: DsvType, input: &str) -> Result<Value> {
        use DsvType::*;
        Ok(match ty {
            Str => Value::Str(input.to_string()),
            IntArray => Value::IntArray(parse_int_array(input)?),
            U8 => Value::U8(narrow_unsigned(parse_unsigned(input)?, u8::MAX as u64)? as u8),
            U16 => Value::U16(narrow_unsigned(parse_unsigned(input)?, u16::MAX as u64)? as u16),
            U32 => Value::U32(narrow_unsigned(parse_unsigned(input)?, u32::MAX as u64)? as u32),
            U64 => Value::U64(parse_unsigned(input)?),
            S8 => Value::S8(parse_str(input)?),
            S16 => Value::S16(parse_str(input)?),
            S32 => Value::S32(parse_str(input)?),
            S64 => Value::S64(parse_str(input)?),
            F32 => Value::F32(parse_str(input)?),
            F64 => Value::F64(parse_str(input)?),
            Invalid => return Err(DsvError::Invalid("cannot parse invalid type".into())),
        })
    }

    /// Narrowing assignment from a double; the form numbers take in JSON
    /// batch input. Fails for string and int-array.
    pub fn from_f64(ty: DsvType, df: f64) -> Result<Value> {
        use DsvType::*;
        Ok(match ty {
            U8 => Value::U8(df as u8),
            S8 => Value::S8(df as i8),
            U16 => Value::U16(df as u16),
            S16 => Value::S16(df as i16),
            U32 => Value::U32(df as u32),
            S32 => Value::S32(df as i32),
            U64 => Value::U64(df as u64),
            S64 => Value::S64(df as i64),
            F32 => Value::F32(df as f32),
            F64 => Value::F64(df),
            other => {
                return Err(DsvError::Invalid(format!(
                    "numeric value does not match type {other}"
                )))
            }
        })
    }

    /// Encode for the wire: string bytes plus trailing NUL; arrays as a
    /// `u64` byte-length prefix followed by raw little-endian elements;
    /// scalars as their native little-endian bytes.
    pub fn to_wire(&self) -> Vec<u8> {
        match self {
            Value::Str(s) => {
                let mut buf = Vec::with_capacity(s.len() + 1);
                buf.extend_from_slice(s.as_bytes());
                buf.push(0);
                buf
            }
            Value::IntArray(a) => {
                let mut buf = Vec::with_capacity(8 + a.len() * 4);
                buf.extend_from_slice(&((a.len() * 4) as u64).to_le_bytes());
                for v in a {
                    buf.extend_from_slice(&v.to_le_bytes());
                }
                buf
            }
            Value::U8(v) => v.to_le_bytes().to_vec(),
            Value::S8(v) => v.to_le_bytes().to_vec(),
            Value::U16(v) => v.to_le_bytes().to_vec(),
            Value::S16(v) => v.to_le_bytes().to_vec(),
            Value::U32(v) => v.to_le_bytes().to_vec(),
            Value::S32(v) => v.to_le_bytes().to_vec(),
            Value::U64(v) => v.to_le_bytes().to_vec(),
            Value::S64(v) => v.to_le_bytes().to_vec(),
            Value::F32(v) => v.to_le_bytes().to_vec(),
            Value::F64(v) => v.to_le_bytes().to_vec(),
        }
    }

    /// Decode a wire payload whose type is known out of band (from the
    /// entry, or from a `get-type` round trip).
    pub fn from_wire(ty: DsvType, bytes: &[u8]) -> Result<Value> {
        use DsvType::*;
        match ty {
            Str => {
                let nul = bytes
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or_else(|| DsvError::Invalid("string payload missing NUL".into()))?;
                let s = std::str::from_utf8(&bytes[..nul])
                    .map_err(|e| DsvError::Invalid(format!("string payload not UTF-8: {e}")))?;
                Ok(Value::Str(s.to_string()))
            }
            IntArray => {
                if bytes.len() < 8 {
                    return Err(DsvError::Invalid("array payload missing length".into()));
                }
                let len = u64::from_le_bytes(bytes[..8].try_into().unwrap()) as usize;
                let body = &bytes[8..];
                if len != body.len() || len % 4 != 0 {
                    return Err(DsvError::Invalid(format!(
                        "array payload length mismatch: prefix {len}, body {}",
                        body.len()
                    )));
                }
                let items = body
                    .chunks_exact(4)
                    .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
                    .collect();
                Ok(Value::IntArray(items))
            }
            scalar => {
                let width = scalar.size();
                if bytes.len() < width {
                    return Err(DsvError::Invalid(format!(
                        "scalar payload too short: want {width}, got {}",
                        bytes.len()
                    )));
                }
                let b = &bytes[..width];
                Ok(match scalar {
                    U8 => Value::U8(b[0]),
                    S8 => Value::S8(b[0] as i8),
                    U16 => Value::U16(u16::from_le_bytes(b.try_into().unwrap())),
                    S16 => Value::S16(i16::from_le_bytes(b.try_into().unwrap())),
                    U32 => Value::U32(u32::from_le_bytes(b.try_into().unwrap())),
                    S32 => Value::S32(i32::from_le_bytes(b.try_into().unwrap())),
                    U64 => Value::U64(u64::from_le_bytes(b.try_into().unwrap())),
                    S64 => Value::S64(i64::from_le_bytes(b.try_into().unwrap())),
                    F32 => Value::F32(f32::from_le_bytes(b.try_into().unwrap())),
                    F64 => Value::F64(f64::from_le_bytes(b.try_into().unwrap())),
                    Invalid | Str | IntArray => unreachable!(),
                })
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::IntArray(a) => {
                for (i, v) in a.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{v}")?;
                }
                Ok(())
            }
            Value::U8(v) => write!(f, "{v}"),
            Value::S8(v) => write!(f, "{v}"),
            Value::U16(v) => write!(f, "{v}"),
            Value::S16(v) => write!(f, "{v}"),
            Value::U32(v) => write!(f, "{v}"),
            Value::S32(v) => write!(f, "{v}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::S64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
        }
    }
}

fn parse_unsigned(input: &str) -> Result<u64> {
    let input = input.trim();
    let parsed = if let Some(hex) = input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        input.parse()
    };
    parsed.map_err(|e| DsvError::Invalid(format!("bad unsigned value {input:?}: {e}")))
}

fn narrow_unsigned(v: u64, max: u64) -> Result<u64> {
    if v > max {
        return Err(DsvError::Invalid(format!("value {v} out of range (max {max})")));
    }
    Ok(v)
}

fn parse_str<T: std::str::FromStr>(input: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    input
        .trim()
        .parse()
        .map_err(|e| DsvError::Invalid(format!("bad value {input:?}: {e}")))
}

fn parse_int_array(input: &str) -> Result<Vec<i32>> {
    if input.is_empty() {
        return Ok(Vec::new());
    }
    input
        .split(',')
        .map(|item| {
            item.parse()
                .map_err(|e| DsvError::Invalid(format!("bad array element {item:?}: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_round_trip() {
        for name in [
            "string", "int_array", "u8", "s8", "u16", "s16", "u32", "s32", "u64", "s64", "f32",
            "f64",
        ] {
            let ty = DsvType::from_name(name).unwrap();
            assert_eq!(ty.name(), name);
            assert_eq!(DsvType::from_wire(ty as i32).unwrap(), ty);
        }
        assert!(DsvType::from_name("blob").is_err());
        assert!(DsvType::from_wire(0).is_err());
    }

    #[test]
    fn sizes() {
        assert_eq!(DsvType::Str.size(), 1);
        assert_eq!(DsvType::IntArray.size(), 0);
        assert_eq!(DsvType::U8.size(), 1);
        assert_eq!(DsvType::S16.size(), 2);
        assert_eq!(DsvType::F32.size(), 4);
        assert_eq!(DsvType::F64.size(), 8);
    }

    #[test]
    fn parse_scalars() {
        assert_eq!(Value::parse(DsvType::U32, "42").unwrap(), Value::U32(42));
        assert_eq!(Value::parse(DsvType::U32, "0x10").unwrap(), Value::U32(16));
        assert_eq!(Value::parse(DsvType::S16, "-7").unwrap(), Value::S16(-7));
        assert_eq!(Value::parse(DsvType::F64, "1.5").unwrap(), Value::F64(1.5));
        assert!(Value::parse(DsvType::U8, "256").is_err());
        assert!(Value::parse(DsvType::S32, "abc").is_err());
    }

    #[test]
    fn parse_arrays() {
        assert_eq!(
            Value::parse(DsvType::IntArray, "1,2,3").unwrap(),
            Value::IntArray(vec![1, 2, 3])
        );
        assert_eq!(
            Value::parse(DsvType::IntArray, "-5").unwrap(),
            Value::IntArray(vec![-5])
        );
        assert_eq!(
            Value::parse(DsvType::IntArray, "").unwrap(),
            Value::IntArray(vec![])
        );
        assert!(Value::parse(DsvType::IntArray, "1,,3").is_err());
    }

    #[test]
    fn display_round_trips() {
        let cases = [
            Value::Str("hello".into()),
            Value::IntArray(vec![1, -2, 3]),
            Value::U8(255),
            Value::S8(-128),
            Value::U64(u64::MAX),
            Value::S64(i64::MIN),
            Value::F32(1.25),
            Value::F64(-0.5),
        ];
        for v in cases {
            let text = v.to_string();
            assert_eq!(Value::parse(v.dsv_type(), &text).unwrap(), v);
        }
    }

    #[test]
    fn array_display_has_no_trailing_comma() {
        assert_eq!(Value::IntArray(vec![1, 2, 3]).to_string(), "1,2,3");
        assert_eq!(Value::IntArray(vec![]).to_string(), "");
    }

    #[test]
    fn byte_lengths() {
        assert_eq!(Value::Str("abc".into()).byte_len(), 4);
        assert_eq!(Value::Str(String::new()).byte_len(), 1);
        assert_eq!(Value::IntArray(vec![]).byte_len(), 0);
        assert_eq!(Value::IntArray(vec![1, 2]).byte_len(), 8);
        assert_eq!(Value::U16(0).byte_len(), 2);
    }

    #[test]
    fn wire_round_trips() {
        let cases = [
            Value::Str("abc".into()),
            Value::Str(String::new()),
            Value::IntArray(vec![0, -1, i32::MAX]),
            Value::IntArray(vec![]),
            Value::U8(7),
            Value::S32(-42),
            Value::U64(u64::MAX),
            Value::F32(2.5),
            Value::F64(-1.25),
        ];
        for v in cases {
            let wire = v.to_wire();
            assert_eq!(wire.len(), v.byte_len() + if matches!(v, Value::IntArray(_)) { 8 } else { 0 });
            assert_eq!(Value::from_wire(v.dsv_type(), &wire).unwrap(), v);
        }
    }

    #[test]
    fn wire_rejects_malformed() {
        assert!(Value::from_wire(DsvType::Str, b"no nul").is_err());
        assert!(Value::from_wire(DsvType::IntArray, &[1, 2]).is_err());
        // prefix says 8 bytes, body has 4
        let mut bad = 8u64.to_le_bytes().to_vec();
        bad.extend_from_slice(&1i32.to_le_bytes());
        assert!(Value::from_wire(DsvType::IntArray, &bad).is_err());
        assert!(Value::from_wire(DsvType::U32, &[1, 2]).is_err());
    }

    #[test]
    fn from_f64_narrows() {
        assert_eq!(Value::from_f64(DsvType::U8, 200.0).unwrap(), Value::U8(200));
        assert_eq!(Value::from_f64(DsvType::S32, -3.9).unwrap(), Value::S32(-3));
        assert_eq!(Value::from_f64(DsvType::F32, 0.5).unwrap(), Value::F32(0.5));
        assert!(Value::from_f64(DsvType::Str, 1.0).is_err());
        assert!(Value::from_f64(DsvType::IntArray, 1.0).is_err());
    }
}
