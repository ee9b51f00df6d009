//! Primitive wire types and their byte-level codec.
//!
//! Variable-size primitives (`str`, `bytes`) carry a 4-byte unsigned length
//! prefix in the enclosing partial's byte order.

use crate::error::{DecodeError, EncodeError};
use crate::value::Value;

/// Length-prefix width for variable-size primitives and arrays.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Byte order of a partial's wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ByteOrder {
    /// Most significant byte first
    Big,
    /// Least significant byte first
    Little,
}

impl ByteOrder {
    /// Returns the conventional name of the byte order.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Big => "big-endian",
            Self::Little => "little-endian",
        }
    }
}

impl Default for ByteOrder {
    fn default() -> Self {
        Self::Big
    }
}

/// The fixed table of primitive wire types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScalarType {
    /// 8-bit signed integer
    I8,
    /// 16-bit signed integer
    I16,
    /// 32-bit signed integer
    I32,
    /// 64-bit signed integer
    I64,
    /// 8-bit unsigned integer
    U8,
    /// 16-bit unsigned integer
    U16,
    /// 32-bit unsigned integer
    U32,
    /// 64-bit unsigned integer
    U64,
    /// IEEE-754 single (4 bytes)
    F32,
    /// IEEE-754 double (8 bytes)
    F64,
    /// One byte, 0 or 1
    Bool,
    /// 4-byte length prefix, then UTF-8 payload
    Str,
    /// 4-byte length prefix, then raw payload
    Bytes,
}

impl ScalarType {
    /// Wire size when statically known; `None` for length-prefixed types.
    pub const fn fixed_size(&self) -> Option<usize> {
        match self {
            Self::I8 | Self::U8 => Some(1),
            Self::I16 | Self::U16 => Some(2),
            Self::I32 | Self::U32 | Self::F32 => Some(4),
            Self::I64 | Self::U64 | Self::F64 => Some(8),
            Self::Bool => Some(1),
            Self::Str | Self::Bytes => None,
        }
    }

    /// Short type name for error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::I8 => "int(8)",
            Self::I16 => "int(16)",
            Self::I32 => "int(32)",
            Self::I64 => "int(64)",
            Self::U8 => "uint(8)",
            Self::U16 => "uint(16)",
            Self::U32 => "uint(32)",
            Self::U64 => "uint(64)",
            Self::F32 => "float",
            Self::F64 => "double",
            Self::Bool => "bool",
            Self::Str => "str",
            Self::Bytes => "bytes",
        }
    }

    const fn int_width(&self) -> Option<(usize, bool)> {
        match self {
            Self::I8 => Some((1, true)),
            Self::I16 => Some((2, true)),
            Self::I32 => Some((4, true)),
            Self::I64 => Some((8, true)),
            Self::U8 => Some((1, false)),
            Self::U16 => Some((2, false)),
            Self::U32 => Some((4, false)),
            Self::U64 => Some((8, false)),
            _ => None,
        }
    }
}

/// Appends `size` bytes of `value` in the given byte order.
pub(crate) fn put_uint(out: &mut Vec<u8>, value: u64, size: usize, order: ByteOrder) {
    match order {
        ByteOrder::Big => out.extend_from_slice(&value.to_be_bytes()[8 - size..]),
        ByteOrder::Little => out.extend_from_slice(&value.to_le_bytes()[..size]),
    }
}

/// Reads `size` bytes as an unsigned integer. The caller checks bounds.
pub(crate) fn get_uint(data: &[u8], size: usize, order: ByteOrder) -> u64 {
    let mut value = 0u64;
    match order {
        ByteOrder::Big => {
            for &byte in &data[..size] {
                value = (value << 8) | u64::from(byte);
            }
        }
        ByteOrder::Little => {
            for &byte in data[..size].iter().rev() {
                value = (value << 8) | u64::from(byte);
            }
        }
    }
    value
}

fn type_mismatch(ty: ScalarType, value: &Value) -> EncodeError {
    EncodeError::Type {
        field: "".into(),
        detail: format!("expected {}, got {}", ty.name(), value.kind_name()),
    }
}

fn need(data: &[u8], wanted: usize) -> Result<(), DecodeError> {
    if data.len() < wanted {
        Err(DecodeError::Incomplete {
            offset: data.len(),
            needed: wanted - data.len(),
        })
    } else {
        Ok(())
    }
}

/// Encodes one primitive value onto `out`.
pub(crate) fn encode_scalar(
    ty: ScalarType,
    value: &Value,
    order: ByteOrder,
    out: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    if let Some((size, signed)) = ty.int_width() {
        let bits = (size * 8) as u32;
        if signed {
            let v = value.as_i64().ok_or_else(|| type_mismatch(ty, value))?;
            if !crate::bits::signed_in_range(v, bits) {
                return Err(EncodeError::Range {
                    field: "".into(),
                    detail: format!("value {v} out of range for {}", ty.name()),
                });
            }
            put_uint(out, crate::bits::to_twos_complement(v, bits), size, order);
        } else {
            let v = value.as_u64().ok_or_else(|| type_mismatch(ty, value))?;
            if !crate::bits::unsigned_in_range(v, bits) {
                return Err(EncodeError::Range {
                    field: "".into(),
                    detail: format!("value {v} out of range for {}", ty.name()),
                });
            }
            put_uint(out, v, size, order);
        }
        return Ok(());
    }

    match ty {
        ScalarType::F32 => {
            let v = value.as_f64().ok_or_else(|| type_mismatch(ty, value))? as f32;
            let bytes = match order {
                ByteOrder::Big => v.to_be_bytes(),
                ByteOrder::Little => v.to_le_bytes(),
            };
            out.extend_from_slice(&bytes);
        }
        ScalarType::F64 => {
            let v = value.as_f64().ok_or_else(|| type_mismatch(ty, value))?;
            let bytes = match order {
                ByteOrder::Big => v.to_be_bytes(),
                ByteOrder::Little => v.to_le_bytes(),
            };
            out.extend_from_slice(&bytes);
        }
        ScalarType::Bool => {
            let v = value.as_bool().ok_or_else(|| type_mismatch(ty, value))?;
            out.push(u8::from(v));
        }
        ScalarType::Str => {
            let v = value.as_str().ok_or_else(|| type_mismatch(ty, value))?;
            let payload = v.as_bytes();
            let len = u32::try_from(payload.len()).map_err(|_| EncodeError::Range {
                field: "".into(),
                detail: format!("string of {} bytes exceeds the u32 length prefix", payload.len()),
            })?;
            put_uint(out, u64::from(len), LENGTH_PREFIX_SIZE, order);
            out.extend_from_slice(payload);
        }
        ScalarType::Bytes => {
            let v = value.as_bytes().ok_or_else(|| type_mismatch(ty, value))?;
            let len = u32::try_from(v.len()).map_err(|_| EncodeError::Range {
                field: "".into(),
                detail: format!("payload of {} bytes exceeds the u32 length prefix", v.len()),
            })?;
            put_uint(out, u64::from(len), LENGTH_PREFIX_SIZE, order);
            out.extend_from_slice(v);
        }
        _ => {}
    }
    Ok(())
}

/// Decodes one primitive value from the front of `data`.
pub(crate) fn decode_scalar(
    ty: ScalarType,
    data: &[u8],
    order: ByteOrder,
) -> Result<(Value, usize), DecodeError> {
    if let Some((size, signed)) = ty.int_width() {
        need(data, size)?;
        let raw = get_uint(data, size, order);
        let value = if signed {
            Value::Int(crate::bits::sign_extend(raw, (size * 8) as u32))
        } else {
            Value::UInt(raw)
        };
        return Ok((value, size));
    }

    match ty {
        ScalarType::F32 => {
            need(data, 4)?;
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&data[..4]);
            let v = match order {
                ByteOrder::Big => f32::from_be_bytes(raw),
                ByteOrder::Little => f32::from_le_bytes(raw),
            };
            Ok((Value::F32(v), 4))
        }
        ScalarType::F64 => {
            need(data, 8)?;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&data[..8]);
            let v = match order {
                ByteOrder::Big => f64::from_be_bytes(raw),
                ByteOrder::Little => f64::from_le_bytes(raw),
            };
            Ok((Value::F64(v), 8))
        }
        ScalarType::Bool => {
            need(data, 1)?;
            Ok((Value::Bool(data[0] != 0), 1))
        }
        ScalarType::Str => {
            need(data, LENGTH_PREFIX_SIZE)?;
            let len = get_uint(data, LENGTH_PREFIX_SIZE, order) as usize;
            need(data, LENGTH_PREFIX_SIZE + len)?;
            let payload = &data[LENGTH_PREFIX_SIZE..LENGTH_PREFIX_SIZE + len];
            let text = std::str::from_utf8(payload)
                .map_err(|_| DecodeError::Utf8 { field: "".into() })?;
            Ok((Value::Str(text.to_string()), LENGTH_PREFIX_SIZE + len))
        }
        ScalarType::Bytes => {
            need(data, LENGTH_PREFIX_SIZE)?;
            let len = get_uint(data, LENGTH_PREFIX_SIZE, order) as usize;
            need(data, LENGTH_PREFIX_SIZE + len)?;
            Ok((
                Value::Bytes(data[LENGTH_PREFIX_SIZE..LENGTH_PREFIX_SIZE + len].to_vec()),
                LENGTH_PREFIX_SIZE + len,
            ))
        }
        _ => unreachable!("integer widths handled above"),
    }
}
