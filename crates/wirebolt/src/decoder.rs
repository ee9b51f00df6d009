//! Message and composite deserialization.
//!
//! Decoding mirrors the encode pass structurally: fields are read in
//! declaration order, conditional fields consult the fields decoded so
//! far, count references resolve against the decode context, and static
//! fields are verified against their declared constants. Bit-packed
//! partials run a single [`BitReader`] session instead.

use crate::bits::{BitReader, sign_extend};
use crate::encoders::FieldEncoder;
use crate::error::{DecodeError, FieldContext};
use crate::scalar::{ByteOrder, LENGTH_PREFIX_SIZE, decode_scalar, get_uint};
use crate::schema::{ArrayShape, Count, FieldKind, FieldSpec, Schema, ValueSource};
use crate::value::{Record, Value};
use std::sync::Arc;

/// Deserializes a message or partial body, returning the instance and the
/// number of bytes consumed.
pub fn decode_body(schema: &Arc<Schema>, data: &[u8]) -> Result<(Record, usize), DecodeError> {
    let mut record = Record::new(schema);
    let consumed = decode_body_into(&mut record, data)?;
    Ok((record, consumed))
}

/// Deserializes into an existing instance so the envelope can quarantine
/// whatever was decoded before a failure.
pub(crate) fn decode_body_into(record: &mut Record, data: &[u8]) -> Result<usize, DecodeError> {
    let schema = Arc::clone(record.schema());
    if schema.bit_packed() {
        return decode_bits(&schema, record, data);
    }

    let order = schema.byte_order();
    let mut offset = 0;
    for (name, spec) in schema.fields() {
        if let Some(condition) = &spec.condition {
            if !(condition.as_ref())(record) {
                // The attribute must not be materialized at all.
                record.remove(name);
                continue;
            }
        }

        let (value, consumed) = decode_field_value(name, spec, &data[offset..], order, record)?;
        offset += consumed;
        store_decoded(record, name, spec, value)?;
    }
    Ok(offset)
}

fn store_decoded(
    record: &mut Record,
    name: &str,
    spec: &FieldSpec,
    value: Value,
) -> Result<(), DecodeError> {
    if let Some(ValueSource::Static(expected)) = &spec.source {
        if &value != expected {
            return Err(DecodeError::StaticMismatch {
                field: name.into(),
                expected: format!("{expected:?}"),
                got: format!("{value:?}"),
            });
        }
        // Store the declared constant, not the wire echo.
        record.set(name, expected.clone());
    } else {
        record.set(name, value);
    }
    Ok(())
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

fn decode_field_value(
    name: &str,
    spec: &FieldSpec,
    data: &[u8],
    order: ByteOrder,
    ctx: &Record,
) -> Result<(Value, usize), DecodeError> {
    match &spec.array {
        None => decode_single(name, spec, data, order),
        Some(ArrayShape::Fixed(count)) => {
            let expected = resolve_count(name, count, ctx)?;
            let mut items = Vec::with_capacity(expected.min(1024));
            let mut offset = 0;
            for _ in 0..expected {
                let (value, used) = decode_single(name, spec, &data[offset..], order)?;
                items.push(value);
                offset += used;
            }
            Ok((Value::List(items), offset))
        }
        Some(ArrayShape::LengthPrefixed) => {
            need(data, LENGTH_PREFIX_SIZE)?;
            let expected = get_uint(data, LENGTH_PREFIX_SIZE, order) as usize;
            let mut items = Vec::with_capacity(expected.min(1024));
            let mut offset = LENGTH_PREFIX_SIZE;
            for _ in 0..expected {
                let (value, used) = decode_single(name, spec, &data[offset..], order)?;
                items.push(value);
                offset += used;
            }
            Ok((Value::List(items), offset))
        }
        Some(ArrayShape::Delimited(delimiter)) => {
            decode_delimited(name, spec, data, order, delimiter)
        }
    }
}

fn resolve_count(name: &str, count: &Count, ctx: &Record) -> Result<usize, DecodeError> {
    match count {
        Count::Literal(n) => Ok(*n),
        Count::Field(path) => {
            let value = ctx.resolve(path).map_err(DecodeError::from)?;
            value.as_usize().ok_or_else(|| DecodeError::Type {
                field: name.into(),
                detail: format!("count reference '{path}' is not an unsigned integer"),
            })
        }
    }
}

fn decode_delimited(
    name: &str,
    spec: &FieldSpec,
    data: &[u8],
    order: ByteOrder,
    delimiter: &[u8],
) -> Result<(Value, usize), DecodeError> {
    let dl = delimiter.len();
    let mut items = Vec::new();
    let mut offset = 0;
    loop {
        let (value, used) = decode_single(name, spec, &data[offset..], order)?;
        offset += used;

        if offset + dl > data.len() {
            return Err(DecodeError::Incomplete {
                offset,
                needed: offset + dl - data.len(),
            });
        }
        if &data[offset..offset + dl] != delimiter {
            return Err(DecodeError::Type {
                field: name.into(),
                detail: format!("expected delimiter at offset {offset}"),
            });
        }
        offset += dl;
        items.push(value);

        if offset >= data.len() {
            break;
        }
        // One-element lookahead: only continue when another element
        // followed by a delimiter parses; anything else was the final
        // delimiter and the remaining bytes belong to later fields.
        match decode_single(name, spec, &data[offset..], order) {
            Ok((_, peek))
                if offset + peek + dl <= data.len()
                    && &data[offset + peek..offset + peek + dl] == delimiter => {}
            _ => break,
        }
    }
    Ok((Value::List(items), offset))
}

pub(crate) fn decode_single(
    name: &str,
    spec: &FieldSpec,
    data: &[u8],
    order: ByteOrder,
) -> Result<(Value, usize), DecodeError> {
    if spec.format.is_some() {
        need(data, LENGTH_PREFIX_SIZE)?;
        let len = get_uint(data, LENGTH_PREFIX_SIZE, order) as usize;
        need(data, LENGTH_PREFIX_SIZE + len)?;
        let payload = &data[LENGTH_PREFIX_SIZE..LENGTH_PREFIX_SIZE + len];
        let value = crate::json::decode_json_field(payload, spec).map_err(|e| e.in_field(name))?;
        return Ok((value, LENGTH_PREFIX_SIZE + len));
    }

    match &spec.kind {
        FieldKind::Scalar(ty) => decode_scalar(*ty, data, order).map_err(|e| e.in_field(name)),
        FieldKind::Composite(sub) => {
            let (nested, used) = decode_body(sub, data)?;
            Ok((Value::Record(nested), used))
        }
        FieldKind::Custom(codec) => codec.decode(data, order).map_err(|e| e.in_field(name)),
        FieldKind::Enum(codec) => codec.decode(data, order).map_err(|e| e.in_field(name)),
        FieldKind::Bit { .. } => Err(DecodeError::Type {
            field: name.into(),
            detail: "bit field outside a bit-packed partial".to_string(),
        }),
    }
}

fn decode_bits(
    schema: &Arc<Schema>,
    record: &mut Record,
    data: &[u8],
) -> Result<usize, DecodeError> {
    let mut reader = BitReader::new(data);
    for (name, spec) in schema.fields() {
        let &FieldKind::Bit { width, signed } = &spec.kind else {
            return Err(DecodeError::Type {
                field: name.into(),
                detail: "byte-aligned field in bit-packed partial".to_string(),
            });
        };

        let value = match &spec.array {
            None => unpack_bit(&mut reader, width, signed)?,
            Some(ArrayShape::Fixed(Count::Literal(count))) => {
                let mut items = Vec::with_capacity(*count);
                for _ in 0..*count {
                    items.push(unpack_bit(&mut reader, width, signed)?);
                }
                Value::List(items)
            }
            Some(_) => {
                return Err(DecodeError::Type {
                    field: name.into(),
                    detail: "unsupported array shape in bit-packed partial".to_string(),
                });
            }
        };
        store_decoded(record, name, spec, value)?;
    }
    Ok(reader.bytes_consumed())
}

fn unpack_bit(reader: &mut BitReader<'_>, width: u32, signed: bool) -> Result<Value, DecodeError> {
    let raw = reader.unpack(width)?;
    Ok(if signed {
        Value::Int(sign_extend(raw, width))
    } else {
        Value::UInt(raw)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::encoder::encode_body;
    use crate::schema::FieldSpec;

    fn round_trip(record: &mut Record) -> Record {
        let bytes = encode_body(record).unwrap();
        let (decoded, used) = decode_body(record.schema(), &bytes).unwrap();
        assert_eq!(used, bytes.len());
        decoded
    }

    #[test]
    fn test_round_trip_scalars() {
        let schema = Schema::builder("Mixed")
            .byte_order(ByteOrder::Little)
            .field("id", FieldSpec::u32())
            .field("delta", FieldSpec::i16())
            .field("ratio", FieldSpec::f64())
            .field("name", FieldSpec::string())
            .field("blob", FieldSpec::bytes())
            .field("live", FieldSpec::boolean())
            .build()
            .unwrap();
        let mut record = Record::new(&schema)
            .with("id", 42u32)
            .with("delta", -7i16)
            .with("ratio", 0.5f64)
            .with("name", "sensor-1")
            .with("blob", vec![1u8, 2, 3])
            .with("live", true);
        assert_eq!(round_trip(&mut record), record);
    }

    #[test]
    fn test_static_mismatch_detected() {
        let schema = Schema::builder("Magic")
            .field("magic", FieldSpec::u16().static_value(0x1234u16))
            .build()
            .unwrap();
        let err = decode_body(&schema, &[0x12, 0x35]);
        assert!(matches!(err, Err(DecodeError::StaticMismatch { .. })));

        let (decoded, _) = decode_body(&schema, &[0x12, 0x34]).unwrap();
        assert_eq!(decoded.get("magic"), Some(&Value::UInt(0x1234)));
    }

    #[test]
    fn test_conditional_field_not_materialized() {
        let schema = Schema::builder("Cond")
            .field("flags", FieldSpec::u8())
            .field(
                "extra",
                FieldSpec::u16().when(|r| r.get("flags").and_then(Value::as_u64) == Some(1)),
            )
            .build()
            .unwrap();

        let (decoded, used) = decode_body(&schema, &[0]).unwrap();
        assert_eq!(used, 1);
        assert!(!decoded.contains("extra"));

        let (decoded, used) = decode_body(&schema, &[1, 0, 9]).unwrap();
        assert_eq!(used, 3);
        assert_eq!(decoded.get("extra"), Some(&Value::UInt(9)));
    }

    #[test]
    fn test_counted_by_resolves_against_decode_context() {
        let schema = Schema::builder("Counted")
            .field("count", FieldSpec::u8().length_of("items"))
            .field("items", FieldSpec::u16().counted_by("count"))
            .build()
            .unwrap();
        let (decoded, used) = decode_body(&schema, &[2, 0, 10, 0, 20]).unwrap();
        assert_eq!(used, 5);
        assert_eq!(
            decoded.get("items"),
            Some(&Value::List(vec![Value::UInt(10), Value::UInt(20)]))
        );
    }

    #[test]
    fn test_counted_by_through_nested_composite() {
        let header = Schema::builder("CountHdr")
            .field("n", FieldSpec::u8())
            .build()
            .unwrap();
        let schema = Schema::builder("Nested")
            .field("header", FieldSpec::composite(&header))
            .field("items", FieldSpec::u8().counted_by("header.n"))
            .build()
            .unwrap();
        let (decoded, _) = decode_body(&schema, &[3, 7, 8, 9]).unwrap();
        assert_eq!(decoded.list_len("items"), 3);
    }

    #[test]
    fn test_length_prefixed_array_round_trip() {
        let schema = Schema::builder("Dyn")
            .field("items", FieldSpec::i32().length_prefixed())
            .build()
            .unwrap();
        let mut record = Record::new(&schema).with(
            "items",
            vec![Value::Int(-1), Value::Int(2), Value::Int(-3)],
        );
        assert_eq!(round_trip(&mut record), record);
    }

    #[test]
    fn test_delimited_array_followed_by_another_field() {
        let schema = Schema::builder("DelimTail")
            .field("items", FieldSpec::u8().delimited(b"\xFF"))
            .field("tail", FieldSpec::u16())
            .build()
            .unwrap();
        // Two elements, then a u16 that the lookahead must not swallow.
        let data = [1, 0xFF, 2, 0xFF, 0x00, 0x07];
        let (decoded, used) = decode_body(&schema, &data).unwrap();
        assert_eq!(used, 6);
        assert_eq!(decoded.list_len("items"), 2);
        assert_eq!(decoded.get("tail"), Some(&Value::UInt(7)));
    }

    #[test]
    fn test_delimited_array_missing_delimiter() {
        let schema = Schema::builder("DelimBad")
            .field("items", FieldSpec::u16().delimited(b"||"))
            .build()
            .unwrap();
        // Element then garbage instead of the delimiter.
        let err = decode_body(&schema, &[0, 1, b'x', b'x']);
        assert!(matches!(err, Err(DecodeError::Type { .. })));
    }

    #[test]
    fn test_delimited_string_elements() {
        let schema = Schema::builder("Names")
            .field("names", FieldSpec::string().delimited(b";"))
            .build()
            .unwrap();
        let mut record = Record::new(&schema).with(
            "names",
            vec![Value::Str("ada".into()), Value::Str("grace".into())],
        );
        assert_eq!(round_trip(&mut record), record);
    }

    #[test]
    fn test_incomplete_surfaces_incomplete() {
        let schema = Schema::builder("Short")
            .field("name", FieldSpec::string())
            .build()
            .unwrap();
        // Length prefix promises 100 bytes.
        let err = decode_body(&schema, &[0, 0, 0, 100, b'a']);
        assert!(matches!(err, Err(DecodeError::Incomplete { .. })));
    }

    #[test]
    fn test_bit_round_trip_with_padding() {
        let schema = Schema::builder("Bits")
            .field("a", FieldSpec::bit(3))
            .field("b", FieldSpec::bit_signed(5))
            .field("c", FieldSpec::bit(4))
            .build()
            .unwrap();
        let mut record = Record::new(&schema)
            .with("a", 5u8)
            .with("b", -9i8)
            .with("c", 12u8);
        let bytes = encode_body(&mut record).unwrap();
        // 12 bits pad to 2 bytes.
        assert_eq!(bytes.len(), 2);
        let (decoded, used) = decode_body(&schema, &bytes).unwrap();
        assert_eq!(used, 2);
        assert_eq!(decoded.get("a"), Some(&Value::UInt(5)));
        assert_eq!(decoded.get("b"), Some(&Value::Int(-9)));
        assert_eq!(decoded.get("c"), Some(&Value::UInt(12)));
    }

    #[test]
    fn test_bit_static_verified() {
        let schema = Schema::builder("BitMagic")
            .field("version", FieldSpec::bit(4).static_value(2u8))
            .field("flags", FieldSpec::bit(4))
            .build()
            .unwrap();
        let (decoded, _) = decode_body(&schema, &[0x2F]).unwrap();
        assert_eq!(decoded.get("flags"), Some(&Value::UInt(0xF)));

        let err = decode_body(&schema, &[0x3F]);
        assert!(matches!(err, Err(DecodeError::StaticMismatch { .. })));
    }

    #[test]
    fn test_nested_composite_round_trip() {
        let inner = Schema::builder("Pair")
            .field("x", FieldSpec::i8())
            .field("y", FieldSpec::i8())
            .build()
            .unwrap();
        let outer = Schema::builder("Shape")
            .field("points", FieldSpec::composite(&inner).fixed_count(2))
            .build()
            .unwrap();
        let mut record = Record::new(&outer).with(
            "points",
            vec![
                Value::Record(Record::new(&inner).with("x", 1i8).with("y", -1i8)),
                Value::Record(Record::new(&inner).with("x", 3i8).with("y", -3i8)),
            ],
        );
        assert_eq!(round_trip(&mut record), record);
    }

    #[test]
    fn test_custom_codec_round_trip() {
        use crate::encoders::FixedPointCodec;
        let schema = Schema::builder("Priced")
            .field("price", FieldSpec::custom(FixedPointCodec::new(16, 16, true)))
            .build()
            .unwrap();
        let mut record = Record::new(&schema).with("price", Value::F64(99.5));
        assert_eq!(round_trip(&mut record), record);
    }

    #[test]
    fn test_enum_round_trip() {
        use crate::encoders::EnumCodec;
        let schema = Schema::builder("Status")
            .field(
                "state",
                FieldSpec::enumeration(EnumCodec::new(1, [("IDLE", 0), ("ACTIVE", 1)])),
            )
            .build()
            .unwrap();
        let mut record = Record::new(&schema).with("state", 1u8);
        assert_eq!(round_trip(&mut record), record);

        let err = decode_body(&schema, &[9]);
        assert!(matches!(err, Err(DecodeError::Range { .. })));
    }
}
