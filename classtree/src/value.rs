// value.rs - Typed operand values and their hex encoding
//
// A leaf's base tag names its kind; the kind fixes how the payload bytes are
// read back. Integers are always stored in 8 bytes regardless of the JVM
// width, so `int 42` prints as `00 00 00 00 00 00 00 2A`.

use crate::error::{Error, Result};
use crate::hex::Hex;
use std::fmt;

/// Kind of a tree leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Int,
    Long,
    Float,
    Double,
    Bool,
    Str,
    Bytes,
    Type,
    Label,
}

impl Kind {
    pub const ALL: [Kind; 9] = [
        Kind::Int,
        Kind::Long,
        Kind::Float,
        Kind::Double,
        Kind::Bool,
        Kind::Str,
        Kind::Bytes,
        Kind::Type,
        Kind::Label,
    ];

    /// Base tag used for leaves of this kind
    pub fn tag(self) -> &'static str {
        match self {
            Kind::Int => "int",
            Kind::Long => "long",
            Kind::Float => "float",
            Kind::Double => "double",
            Kind::Bool => "bool",
            Kind::Str => "string",
            Kind::Bytes => "bytes",
            Kind::Type => "type",
            Kind::Label => "label",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Kind> {
        Kind::ALL.into_iter().find(|k| k.tag() == tag)
    }

    /// Fixed payload width in bytes, `None` for variable-length kinds
    pub fn width(self) -> Option<usize> {
        match self {
            Kind::Int | Kind::Long | Kind::Double => Some(8),
            Kind::Float => Some(4),
            Kind::Bool => Some(1),
            Kind::Str | Kind::Bytes | Kind::Type | Kind::Label => None,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A decoded leaf value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Long(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    Type(String),
    Label(String),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Int(_) => Kind::Int,
            Value::Long(_) => Kind::Long,
            Value::Float(_) => Kind::Float,
            Value::Double(_) => Kind::Double,
            Value::Bool(_) => Kind::Bool,
            Value::Str(_) => Kind::Str,
            Value::Bytes(_) => Kind::Bytes,
            Value::Type(_) => Kind::Type,
            Value::Label(_) => Kind::Label,
        }
    }

    pub fn encode(&self) -> Hex {
        let bytes = match self {
            Value::Int(v) | Value::Long(v) => v.to_be_bytes().to_vec(),
            Value::Float(v) => v.to_bits().to_be_bytes().to_vec(),
            Value::Double(v) => v.to_bits().to_be_bytes().to_vec(),
            Value::Bool(v) => vec![u8::from(*v)],
            Value::Str(s) | Value::Type(s) | Value::Label(s) => s.as_bytes().to_vec(),
            Value::Bytes(b) => b.clone(),
        };
        Hex::new(bytes)
    }

    pub fn decode(hex: &Hex, kind: Kind) -> Result<Value> {
        let bytes = hex.as_bytes();
        if let Some(width) = kind.width() {
            if bytes.len() != width {
                return Err(Error::payload(
                    hex.to_string(),
                    format!("{} needs {} bytes, got {}", kind, width, bytes.len()),
                ));
            }
        }
        let value = match kind {
            Kind::Int => Value::Int(i64::from_be_bytes(eight(bytes))),
            Kind::Long => Value::Long(i64::from_be_bytes(eight(bytes))),
            Kind::Double => Value::Double(f64::from_bits(u64::from_be_bytes(eight(bytes)))),
            Kind::Float => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(bytes);
                Value::Float(f32::from_bits(u32::from_be_bytes(buf)))
            }
            Kind::Bool => match bytes[0] {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => {
                    return Err(Error::payload(
                        hex.to_string(),
                        format!("bool must be 00 or 01, got {:02X}", other),
                    ))
                }
            },
            Kind::Str | Kind::Type | Kind::Label => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| Error::payload(hex.to_string(), e.to_string()))?
                    .to_string();
                match kind {
                    Kind::Str => Value::Str(text),
                    Kind::Type => Value::Type(text),
                    _ => Value::Label(text),
                }
            }
            Kind::Bytes => Value::Bytes(bytes.to_vec()),
        };
        Ok(value)
    }

    /// Decode hex text straight into a value of the given kind
    pub fn parse(text: &str, kind: Kind) -> Result<Value> {
        Value::decode(&Hex::parse(text)?, kind)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Type(s) | Value::Label(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }
}

// Callers have checked the width already.
fn eight(bytes: &[u8]) -> [u8; 8] {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_is_eight_bytes() {
        assert_eq!(Value::Int(42).encode().to_string(), "00 00 00 00 00 00 00 2A");
        assert_eq!(
            Value::parse("00 00 00 00 00 00 00 2A", Kind::Int).unwrap(),
            Value::Int(42)
        );
        assert_eq!(
            Value::parse("FF FF FF FF FF FF FF FF", Kind::Int).unwrap(),
            Value::Int(-1)
        );
    }

    #[test]
    fn test_string_payload() {
        let hex = Value::Str("java/lang/Object".into()).encode();
        assert_eq!(Value::decode(&hex, Kind::Str).unwrap().as_str(), Some("java/lang/Object"));
        assert_eq!(Value::Str(String::new()).encode().to_string(), "");
    }

    #[test]
    fn test_width_mismatch() {
        assert!(matches!(
            Value::parse("00 2A", Kind::Int),
            Err(Error::MalformedPayload { .. })
        ));
        assert!(matches!(
            Value::parse("02", Kind::Bool),
            Err(Error::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        assert!(matches!(
            Value::parse("FF FE", Kind::Str),
            Err(Error::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_float_bits_survive() {
        let v = Value::Double(-0.0);
        let back = Value::decode(&v.encode(), Kind::Double).unwrap();
        match back {
            Value::Double(d) => assert!(d == 0.0 && d.is_sign_negative()),
            other => panic!("unexpected {:?}", other),
        }
    }
}
