//! Message and composite serialization.
//!
//! Encoding walks the schema's fields in declaration order. For each field
//! the engine first settles the value (conditional fields may be skipped,
//! static fields always emit their declared constant, and derived values
//! are evaluated against the current instance and written back onto it),
//! then serializes it according to its kind and array shape. Bit-packed
//! partials serialize through a single [`BitWriter`] session instead.

use crate::bits::{BitWriter, signed_in_range, to_twos_complement, unsigned_in_range};
use crate::encoders::FieldEncoder;
use crate::error::{EncodeError, FieldContext};
use crate::scalar::{ByteOrder, LENGTH_PREFIX_SIZE, encode_scalar, put_uint};
use crate::schema::{
    ArrayShape, ComputeContext, Count, FieldKind, FieldSpec, Schema, SizeTarget, ValueSource,
    WireFormat,
};
use crate::value::{Path, Record, Value};
use std::sync::Arc;

/// Serializes a message or partial instance to its body bytes.
///
/// Derived field values are materialized onto `record` as a side effect,
/// so the instance observed after encoding carries every computed value.
pub fn encode_body(record: &mut Record) -> Result<Vec<u8>, EncodeError> {
    let schema = Arc::clone(record.schema());
    if schema.bit_packed() {
        return encode_bits(&schema, record);
    }

    let order = schema.byte_order();
    let mut out = Vec::new();
    for (name, spec) in schema.fields() {
        encode_field(name, spec, record, order, &mut out)?;
    }
    Ok(out)
}

fn encode_field(
    name: &str,
    spec: &FieldSpec,
    record: &mut Record,
    order: ByteOrder,
    out: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    if let Some(condition) = &spec.condition {
        if !(condition.as_ref())(record) {
            return Ok(());
        }
    }

    // Deep assignments fire before the field itself is read, so a nested
    // composite sees its assigned values.
    for (path, source) in &spec.assigns {
        let value = eval_source(source, record, None).map_err(|e| e.in_field(name))?;
        record.set_path(path, value)?;
    }

    match &spec.source {
        Some(ValueSource::Static(constant)) => {
            let constant = constant.clone();
            record.set(name, constant);
        }
        Some(source) => {
            let value = eval_source(source, record, None).map_err(|e| e.in_field(name))?;
            record.set(name, value);
        }
        None => {}
    }

    let value = record
        .get(name)
        .ok_or_else(|| EncodeError::Missing { field: name.into() })?;
    write_field_value(name, spec, value, order, record, out)
}

/// Serializes one field's value, honoring its array shape and serializer
/// override. `ctx` is the record owning the field, used to resolve count
/// references.
pub(crate) fn write_field_value(
    name: &str,
    spec: &FieldSpec,
    value: &Value,
    order: ByteOrder,
    ctx: &Record,
    out: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    match &spec.array {
        None => encode_single(name, spec, value, order, out),
        Some(ArrayShape::Fixed(count)) => {
            let expected = resolve_count(count, ctx)?;
            let items = expect_list(name, value)?;
            if items.len() != expected {
                return Err(EncodeError::Type {
                    field: name.into(),
                    detail: format!("must have {expected} elements, got {}", items.len()),
                });
            }
            for item in items {
                encode_single(name, spec, item, order, out)?;
            }
            Ok(())
        }
        Some(ArrayShape::LengthPrefixed) => {
            let items = expect_list(name, value)?;
            let len = u32::try_from(items.len()).map_err(|_| EncodeError::Range {
                field: name.into(),
                detail: format!("array of {} elements exceeds the u32 prefix", items.len()),
            })?;
            put_uint(out, u64::from(len), LENGTH_PREFIX_SIZE, order);
            for item in items {
                encode_single(name, spec, item, order, out)?;
            }
            Ok(())
        }
        Some(ArrayShape::Delimited(delimiter)) => {
            let items = expect_list(name, value)?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.extend_from_slice(delimiter);
                }
                encode_single(name, spec, item, order, out)?;
            }
            // Trailing delimiter marks end-of-list.
            out.extend_from_slice(delimiter);
            Ok(())
        }
    }
}

fn expect_list<'a>(name: &str, value: &'a Value) -> Result<&'a [Value], EncodeError> {
    value.as_list().ok_or_else(|| EncodeError::Type {
        field: name.into(),
        detail: format!("expected list, got {}", value.kind_name()),
    })
}

fn resolve_count(count: &Count, ctx: &Record) -> Result<usize, EncodeError> {
    match count {
        Count::Literal(n) => Ok(*n),
        Count::Field(path) => {
            let value = ctx.resolve(path)?;
            value.as_usize().ok_or_else(|| EncodeError::Type {
                field: "".into(),
                detail: format!("count reference '{path}' is not an unsigned integer"),
            })
        }
    }
}

fn encode_single(
    name: &str,
    spec: &FieldSpec,
    value: &Value,
    order: ByteOrder,
    out: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    if let Some(WireFormat::Json) = spec.format {
        let payload = crate::json::encode_json_field(value).map_err(|e| e.in_field(name))?;
        let len = u32::try_from(payload.len()).map_err(|_| EncodeError::Range {
            field: name.into(),
            detail: format!("JSON payload of {} bytes exceeds the u32 prefix", payload.len()),
        })?;
        put_uint(out, u64::from(len), LENGTH_PREFIX_SIZE, order);
        out.extend_from_slice(&payload);
        return Ok(());
    }

    match &spec.kind {
        FieldKind::Scalar(ty) => {
            encode_scalar(*ty, value, order, out).map_err(|e| e.in_field(name))
        }
        FieldKind::Composite(sub) => {
            let nested = value.as_record().ok_or_else(|| EncodeError::Type {
                field: name.into(),
                detail: format!("expected {} composite, got {}", sub.name(), value.kind_name()),
            })?;
            if nested.schema().name() != sub.name() {
                return Err(EncodeError::Type {
                    field: name.into(),
                    detail: format!(
                        "expected {} composite, got {}",
                        sub.name(),
                        nested.schema().name()
                    ),
                });
            }
            let mut nested = nested.clone();
            let bytes = encode_body(&mut nested)?;
            out.extend_from_slice(&bytes);
            Ok(())
        }
        FieldKind::Custom(codec) => {
            let bytes = codec.encode(value, order).map_err(|e| e.in_field(name))?;
            out.extend_from_slice(&bytes);
            Ok(())
        }
        FieldKind::Enum(codec) => {
            let bytes = codec.encode(value, order).map_err(|e| e.in_field(name))?;
            out.extend_from_slice(&bytes);
            Ok(())
        }
        FieldKind::Bit { .. } => Err(EncodeError::Type {
            field: name.into(),
            detail: "bit field outside a bit-packed partial".to_string(),
        }),
    }
}

/// Evaluates a value source against `record`. `body` carries the
/// pre-serialized message bytes when evaluating automatic headers/footers.
pub(crate) fn eval_source(
    source: &ValueSource,
    record: &Record,
    body: Option<&[u8]>,
) -> Result<Value, EncodeError> {
    match source {
        ValueSource::Static(v) => Ok(v.clone()),
        ValueSource::LengthOf(path) => {
            let value = record.resolve(path)?;
            if let Some(len) = value.length() {
                return Ok(Value::UInt(len as u64));
            }
            // A composite's length is its serialized byte size.
            if let Value::Record(nested) = value {
                let mut nested = nested.clone();
                return Ok(Value::UInt(encode_body(&mut nested)?.len() as u64));
            }
            Err(EncodeError::Type {
                field: "".into(),
                detail: format!(
                    "length_of target '{path}' must be a list, str, bytes or composite, got {}",
                    value.kind_name()
                ),
            })
        }
        ValueSource::SizeOf(SizeTarget::Body) => match body {
            Some(body) => Ok(Value::UInt(body.len() as u64)),
            None => Err(EncodeError::Reference {
                path: "body".to_string(),
            }),
        },
        ValueSource::SizeOf(SizeTarget::Field(path)) => {
            let (spec, value, owner) = locate(record, path)?;
            let mut scratch = Vec::new();
            write_field_value(
                path.segments().last().map_or("", |s| s.as_str()),
                spec,
                value,
                owner.schema().byte_order(),
                owner,
                &mut scratch,
            )?;
            Ok(Value::UInt(scratch.len() as u64))
        }
        ValueSource::ValueFrom(path) => Ok(record.resolve(path)?.clone()),
        ValueSource::Compute(f) => (f.as_ref())(&ComputeContext::new(record, body)),
    }
}

/// Walks a dotted path and returns the leaf's spec and value together with
/// the record that owns the leaf field.
fn locate<'a>(
    record: &'a Record,
    path: &Path,
) -> Result<(&'a FieldSpec, &'a Value, &'a Record), EncodeError> {
    let segments = path.segments();
    let mut current = record;
    for (i, segment) in segments.iter().enumerate() {
        let spec = current
            .schema()
            .field(segment)
            .ok_or_else(|| EncodeError::Reference { path: path.to_string() })?;
        let value = current
            .get(segment)
            .ok_or_else(|| EncodeError::Reference { path: path.to_string() })?;
        if i + 1 == segments.len() {
            return Ok((spec, value, current));
        }
        current = value.as_record().ok_or_else(|| EncodeError::Path {
            path: path.to_string(),
            through: segment.to_string(),
        })?;
    }
    Err(EncodeError::Reference { path: path.to_string() })
}

fn encode_bits(schema: &Arc<Schema>, record: &mut Record) -> Result<Vec<u8>, EncodeError> {
    let mut writer = BitWriter::new();
    for (name, spec) in schema.fields() {
        if let Some(ValueSource::Static(constant)) = &spec.source {
            let constant = constant.clone();
            record.set(name, constant);
        }
        let value = record
            .get(name)
            .ok_or_else(|| EncodeError::Missing { field: name.into() })?;
        let &FieldKind::Bit { width, signed } = &spec.kind else {
            // Schema construction rejects byte-aligned fields in bit mode.
            return Err(EncodeError::Type {
                field: name.into(),
                detail: "byte-aligned field in bit-packed partial".to_string(),
            });
        };

        match &spec.array {
            None => pack_bit(name, value, width, signed, &mut writer)?,
            Some(ArrayShape::Fixed(Count::Literal(expected))) => {
                let items = expect_list(name, value)?;
                if items.len() != *expected {
                    return Err(EncodeError::Type {
                        field: name.into(),
                        detail: format!("must have {expected} elements, got {}", items.len()),
                    });
                }
                for item in items {
                    pack_bit(name, item, width, signed, &mut writer)?;
                }
            }
            Some(_) => {
                return Err(EncodeError::Type {
                    field: name.into(),
                    detail: "unsupported array shape in bit-packed partial".to_string(),
                });
            }
        }
    }
    Ok(writer.finish())
}

fn pack_bit(
    name: &str,
    value: &Value,
    width: u32,
    signed: bool,
    writer: &mut BitWriter,
) -> Result<(), EncodeError> {
    if signed {
        let v = value.as_i64().ok_or_else(|| EncodeError::Type {
            field: name.into(),
            detail: format!("expected integer, got {}", value.kind_name()),
        })?;
        if !signed_in_range(v, width) {
            return Err(EncodeError::Range {
                field: name.into(),
                detail: format!("value {v} out of range for {width}-bit signed field"),
            });
        }
        writer.pack(to_twos_complement(v, width), width);
    } else {
        let v = value.as_u64().ok_or_else(|| EncodeError::Type {
            field: name.into(),
            detail: format!("expected unsigned integer, got {}", value.kind_name()),
        })?;
        if !unsigned_in_range(v, width) {
            return Err(EncodeError::Range {
                field: name.into(),
                detail: format!("value {v} out of range for {width}-bit field"),
            });
        }
        writer.pack(v, width);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::FieldSpec;

    #[test]
    fn test_plain_fields_concatenate_in_declaration_order() {
        let schema = Schema::builder("Plain")
            .field("a", FieldSpec::u16())
            .field("b", FieldSpec::boolean())
            .build()
            .unwrap();
        let mut record = Record::new(&schema).with("a", 0x0102u16).with("b", true);
        assert_eq!(encode_body(&mut record).unwrap(), vec![1, 2, 1]);
    }

    #[test]
    fn test_little_endian_partial() {
        let schema = Schema::builder("LE")
            .byte_order(ByteOrder::Little)
            .field("a", FieldSpec::u32())
            .build()
            .unwrap();
        let mut record = Record::new(&schema).with("a", 7u32);
        assert_eq!(encode_body(&mut record).unwrap(), vec![7, 0, 0, 0]);
    }

    #[test]
    fn test_static_value_overrides_caller() {
        let schema = Schema::builder("Magic")
            .field("magic", FieldSpec::u16().static_value(0xBEEFu16))
            .build()
            .unwrap();
        let mut record = Record::new(&schema);
        record.set("magic", 0u16);
        assert_eq!(encode_body(&mut record).unwrap(), vec![0xBE, 0xEF]);
        assert_eq!(record.get("magic"), Some(&Value::UInt(0xBEEF)));
    }

    #[test]
    fn test_length_of_writes_back() {
        let schema = Schema::builder("Framed")
            .field("len", FieldSpec::u16().length_of("data"))
            .field("data", FieldSpec::bytes())
            .build()
            .unwrap();
        let mut record = Record::new(&schema).with("data", b"xyz".to_vec());
        let bytes = encode_body(&mut record).unwrap();
        assert_eq!(bytes, vec![0, 3, 0, 0, 0, 3, b'x', b'y', b'z']);
        assert_eq!(record.get("len"), Some(&Value::UInt(3)));
    }

    #[test]
    fn test_size_of_includes_length_prefix() {
        let schema = Schema::builder("Sized")
            .field("size", FieldSpec::u8().size_of("data"))
            .field("data", FieldSpec::bytes())
            .build()
            .unwrap();
        let mut record = Record::new(&schema).with("data", b"ab".to_vec());
        let bytes = encode_body(&mut record).unwrap();
        // size = 4-byte prefix + 2 payload bytes.
        assert_eq!(bytes[0], 6);
    }

    #[test]
    fn test_value_from_copies() {
        let schema = Schema::builder("Copy")
            .field("id", FieldSpec::u16())
            .field("id_copy", FieldSpec::u16().value_from("id"))
            .build()
            .unwrap();
        let mut record = Record::new(&schema).with("id", 0x1234u16);
        assert_eq!(encode_body(&mut record).unwrap(), vec![0x12, 0x34, 0x12, 0x34]);
    }

    #[test]
    fn test_compute_closure() {
        let schema = Schema::builder("Summed")
            .field("a", FieldSpec::u8())
            .field("b", FieldSpec::u8())
            .field(
                "sum",
                FieldSpec::u16().compute(|ctx| {
                    let a = ctx.get("a")?.as_u64().unwrap_or(0);
                    let b = ctx.get("b")?.as_u64().unwrap_or(0);
                    Ok(Value::UInt(a + b))
                }),
            )
            .build()
            .unwrap();
        let mut record = Record::new(&schema).with("a", 200u8).with("b", 100u8);
        assert_eq!(encode_body(&mut record).unwrap(), vec![200, 100, 1, 44]);
    }

    #[test]
    fn test_conditional_field_skipped() {
        let schema = Schema::builder("Cond")
            .field("flags", FieldSpec::u8())
            .field(
                "extra",
                FieldSpec::u16().when(|r| r.get("flags").and_then(Value::as_u64) == Some(1)),
            )
            .build()
            .unwrap();

        let mut with_extra = Record::new(&schema).with("flags", 1u8).with("extra", 7u16);
        assert_eq!(encode_body(&mut with_extra).unwrap(), vec![1, 0, 7]);

        let mut without = Record::new(&schema).with("flags", 0u8).with("extra", 7u16);
        assert_eq!(encode_body(&mut without).unwrap(), vec![0]);
    }

    #[test]
    fn test_fixed_array_checks_count() {
        let schema = Schema::builder("Arr")
            .field("items", FieldSpec::u8().fixed_count(3))
            .build()
            .unwrap();
        let mut record = Record::new(&schema).with(
            "items",
            vec![Value::UInt(1), Value::UInt(2), Value::UInt(3)],
        );
        assert_eq!(encode_body(&mut record).unwrap(), vec![1, 2, 3]);

        let mut short = Record::new(&schema).with("items", vec![Value::UInt(1)]);
        assert!(matches!(encode_body(&mut short), Err(EncodeError::Type { .. })));
    }

    #[test]
    fn test_counted_by_resolves_against_instance() {
        let schema = Schema::builder("Counted")
            .field("count", FieldSpec::u8().length_of("items"))
            .field("items", FieldSpec::u16().counted_by("count"))
            .build()
            .unwrap();
        let mut record =
            Record::new(&schema).with("items", vec![Value::UInt(10), Value::UInt(20)]);
        assert_eq!(encode_body(&mut record).unwrap(), vec![2, 0, 10, 0, 20]);
    }

    #[test]
    fn test_length_prefixed_array() {
        let schema = Schema::builder("Dyn")
            .field("items", FieldSpec::u8().length_prefixed())
            .build()
            .unwrap();
        let mut record = Record::new(&schema).with("items", vec![Value::UInt(9)]);
        assert_eq!(encode_body(&mut record).unwrap(), vec![0, 0, 0, 1, 9]);
    }

    #[test]
    fn test_delimited_array_trailing_delimiter() {
        let schema = Schema::builder("Delim")
            .field("items", FieldSpec::u8().delimited(b"|"))
            .build()
            .unwrap();
        let mut record =
            Record::new(&schema).with("items", vec![Value::UInt(1), Value::UInt(2)]);
        assert_eq!(encode_body(&mut record).unwrap(), vec![1, b'|', 2, b'|']);
    }

    #[test]
    fn test_nested_composite() {
        let inner = Schema::builder("Inner")
            .field("x", FieldSpec::u8())
            .build()
            .unwrap();
        let outer = Schema::builder("OuterMsg")
            .field("head", FieldSpec::u8())
            .field("inner", FieldSpec::composite(&inner))
            .build()
            .unwrap();
        let mut record = Record::new(&outer)
            .with("head", 1u8)
            .with("inner", Record::new(&inner).with("x", 2u8));
        assert_eq!(encode_body(&mut record).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_deep_assignment_populates_nested_field() {
        let header = Schema::builder("Hdr")
            .field("len", FieldSpec::u32())
            .build()
            .unwrap();
        let schema = Schema::builder("DeepMsg")
            .field(
                "header",
                FieldSpec::composite(&header).assign("header.len", ValueSource::length_of("payload")),
            )
            .field("payload", FieldSpec::bytes())
            .build()
            .unwrap();
        let mut record = Record::new(&schema)
            .with("header", Record::new(&header))
            .with("payload", b"Test Data".to_vec());
        let bytes = encode_body(&mut record).unwrap();
        assert_eq!(&bytes[..4], &[0, 0, 0, 9]);
        assert_eq!(record.resolve_str("header.len").unwrap(), &Value::UInt(9));
    }

    #[test]
    fn test_missing_field_error() {
        let schema = Schema::builder("Sparse")
            .field("a", FieldSpec::u8())
            .build()
            .unwrap();
        let mut record = Record::new(&schema);
        assert!(matches!(encode_body(&mut record), Err(EncodeError::Missing { .. })));
    }

    #[test]
    fn test_bit_packed_body() {
        let schema = Schema::builder("Bits")
            .field("a", FieldSpec::bit(1))
            .field("b", FieldSpec::bit(1))
            .field("c", FieldSpec::bit(6))
            .build()
            .unwrap();
        let mut record = Record::new(&schema)
            .with("a", 1u8)
            .with("b", 0u8)
            .with("c", 62u8);
        assert_eq!(encode_body(&mut record).unwrap(), vec![0xBE]);
    }

    #[test]
    fn test_bit_array_packs_back_to_back() {
        let schema = Schema::builder("BitArr")
            .field("nibbles", FieldSpec::bit(4).fixed_count(3))
            .build()
            .unwrap();
        let mut record = Record::new(&schema).with(
            "nibbles",
            vec![Value::UInt(0xA), Value::UInt(0xB), Value::UInt(0xC)],
        );
        assert_eq!(encode_body(&mut record).unwrap(), vec![0xAB, 0xC0]);
    }

    #[test]
    fn test_bit_range_violation() {
        let schema = Schema::builder("Tight")
            .field("v", FieldSpec::bit(3))
            .build()
            .unwrap();
        let mut record = Record::new(&schema).with("v", 8u8);
        assert!(matches!(encode_body(&mut record), Err(EncodeError::Range { .. })));
    }

    #[test]
    fn test_signed_bit_field() {
        let schema = Schema::builder("SignedBits")
            .field("v", FieldSpec::bit_signed(4))
            .build()
            .unwrap();
        let mut record = Record::new(&schema).with("v", -3i8);
        // -3 in 4-bit two's complement is 1101, left-aligned.
        assert_eq!(encode_body(&mut record).unwrap(), vec![0b1101_0000]);
    }
}
