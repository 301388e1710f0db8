//! Decoded payload values and the wire data types they come from.

use std::fmt;

/// The data type advertised for an object in the [`registry`](crate::registry).
///
/// Mirrors `rctclient.types.DataType` from the original Python client: every
/// object in the registry has exactly one of these, which determines how its
/// payload bytes are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    Float,
    String,
    /// Event table / time series entries the daemon does not decode.
    Unsupported,
}

/// A decoded value, tagged by the [`DataType`] it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    Float(f32),
    String(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::U8(v) => write!(f, "{v}"),
            Value::I8(v) => write!(f, "{v}"),
            Value::U16(v) => write!(f, "{v}"),
            Value::I16(v) => write!(f, "{v}"),
            Value::U32(v) => write!(f, "{v}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v}"),
        }
    }
}

/// Error raised when a handler expects a different type than what arrived.
#[derive(Debug, thiserror::Error)]
#[error("unexpected value type: wanted {wanted}, got {got:?}")]
pub struct TypeMismatch {
    pub wanted: &'static str,
    pub got: Value,
}

impl Value {
    pub fn as_bool(&self) -> Result<bool, TypeMismatch> {
        match self {
            Value::Bool(v) => Ok(*v),
            other => Err(TypeMismatch { wanted: "bool", got: other.clone() }),
        }
    }

    pub fn as_f32(&self) -> Result<f32, TypeMismatch> {
        match self {
            Value::Float(v) => Ok(*v),
            other => Err(TypeMismatch { wanted: "float", got: other.clone() }),
        }
    }

    pub fn as_i32(&self) -> Result<i32, TypeMismatch> {
        match self {
            Value::I32(v) => Ok(*v),
            Value::U32(v) => Ok(*v as i32),
            Value::U16(v) => Ok(*v as i32),
            Value::I16(v) => Ok(*v as i32),
            Value::U8(v) => Ok(*v as i32),
            Value::I8(v) => Ok(*v as i32),
            other => Err(TypeMismatch { wanted: "int", got: other.clone() }),
        }
    }

    pub fn as_str(&self) -> Result<&str, TypeMismatch> {
        match self {
            Value::String(v) => Ok(v.as_str()),
            other => Err(TypeMismatch { wanted: "string", got: other.clone() }),
        }
    }
}

/// Error raised when decoding a payload for a known [`DataType`] fails, e.g. the
/// payload is shorter than the type requires. Mirrors `struct.error` from
/// `rctclient.utils.decode_value`.
#[derive(Debug, thiserror::Error)]
#[error("payload of {len} bytes too short to decode as {data_type:?}")]
pub struct DecodeError {
    pub data_type: DataType,
    pub len: usize,
}

/// Decodes a raw payload according to the object's declared data type.
///
/// Grounded in `rctclient.utils.decode_value`: numeric types are big-endian,
/// strings are NUL-padded ASCII with the terminator and trailing padding
/// stripped.
pub fn decode_value(data_type: DataType, payload: &[u8]) -> Result<Value, DecodeError> {
    let need = |n: usize| -> Result<(), DecodeError> {
        if payload.len() < n {
            Err(DecodeError { data_type, len: payload.len() })
        } else {
            Ok(())
        }
    };
    match data_type {
        DataType::Bool => {
            need(1)?;
            Ok(Value::Bool(payload[0] != 0))
        }
        DataType::U8 => {
            need(1)?;
            Ok(Value::U8(payload[0]))
        }
        DataType::I8 => {
            need(1)?;
            Ok(Value::I8(payload[0] as i8))
        }
        DataType::U16 => {
            need(2)?;
            Ok(Value::U16(u16::from_be_bytes([payload[0], payload[1]])))
        }
        DataType::I16 => {
            need(2)?;
            Ok(Value::I16(i16::from_be_bytes([payload[0], payload[1]])))
        }
        DataType::U32 => {
            need(4)?;
            Ok(Value::U32(u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])))
        }
        DataType::I32 => {
            need(4)?;
            Ok(Value::I32(i32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])))
        }
        DataType::Float => {
            need(4)?;
            Ok(Value::Float(f32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])))
        }
        DataType::String => {
            let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
            Ok(Value::String(String::from_utf8_lossy(&payload[..end]).into_owned()))
        }
        DataType::Unsupported => Ok(Value::String(String::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_float_big_endian() {
        let bytes = 3.5f32.to_be_bytes();
        assert_eq!(decode_value(DataType::Float, &bytes).unwrap(), Value::Float(3.5));
    }

    #[test]
    fn decodes_string_strips_nul() {
        let bytes = b"RCT-Power-Storage\0\0\0";
        match decode_value(DataType::String, bytes).unwrap() {
            Value::String(s) => assert_eq!(s, "RCT-Power-Storage"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn too_short_payload_errors() {
        assert!(decode_value(DataType::Float, &[0, 1]).is_err());
    }
}
