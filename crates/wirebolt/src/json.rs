//! Structural JSON projection of messages and partials.
//!
//! The projection tags every record with its schema name under a `"type"`
//! key and renders byte payloads as arrays of numbers, so any message can
//! be inspected, logged or rebuilt from text. A [`WireFormat::Json`]
//! override on a field spec emits the same projection on the wire behind a
//! 4-byte length prefix, letting one message mix binary and JSON fields.
//!
//! [`WireFormat::Json`]: crate::schema::WireFormat::Json

use crate::error::{DecodeError, EncodeError};
use crate::scalar::ScalarType;
use crate::schema::{FieldKind, FieldSpec, Schema};
use crate::value::{Record, Value};
use serde_json::{Map, Number, Value as JsonValue};
use std::sync::Arc;

/// Projects a record into a JSON tree.
pub fn to_json(record: &Record) -> JsonValue {
    let mut obj = Map::new();
    obj.insert(
        "type".to_string(),
        JsonValue::String(record.type_name().to_string()),
    );
    for (name, _) in record.schema().fields() {
        if let Some(value) = record.get(name) {
            obj.insert(name.to_string(), value_to_json(value));
        }
    }
    JsonValue::Object(obj)
}

/// Projects a record into compact JSON text.
pub fn to_json_string(record: &Record) -> Result<String, EncodeError> {
    serde_json::to_string(&to_json(record)).map_err(|e| EncodeError::Json {
        field: "".into(),
        reason: e.to_string(),
    })
}

/// Projects a record into pretty-printed JSON text, convenient for logs.
pub fn to_json_string_pretty(record: &Record) -> Result<String, EncodeError> {
    serde_json::to_string_pretty(&to_json(record)).map_err(|e| EncodeError::Json {
        field: "".into(),
        reason: e.to_string(),
    })
}

/// Rebuilds a record of `schema` from its JSON projection.
///
/// Fields absent from the JSON object are left unset; static fields keep
/// their declared constants.
pub fn from_json(value: &JsonValue, schema: &Arc<Schema>) -> Result<Record, DecodeError> {
    let obj = value.as_object().ok_or_else(|| DecodeError::Json {
        field: "".into(),
        reason: format!("expected object, got {value}"),
    })?;

    let mut record = Record::new(schema);
    for (name, spec) in schema.fields() {
        let Some(jv) = obj.get(name) else { continue };
        let value = json_to_value(name, spec, jv)?;
        record.set(name, value);
    }
    Ok(record)
}

/// Rebuilds a record from JSON text.
pub fn from_json_str(text: &str, schema: &Arc<Schema>) -> Result<Record, DecodeError> {
    let value: JsonValue = serde_json::from_str(text).map_err(|e| DecodeError::Json {
        field: "".into(),
        reason: e.to_string(),
    })?;
    from_json(&value, schema)
}

/// Projects a single value; composites become tagged objects.
pub fn value_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Int(i) => JsonValue::Number(Number::from(*i)),
        Value::UInt(u) => JsonValue::Number(Number::from(*u)),
        Value::F32(f) => Number::from_f64(f64::from(*f)).map_or(JsonValue::Null, JsonValue::Number),
        Value::F64(f) => Number::from_f64(*f).map_or(JsonValue::Null, JsonValue::Number),
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Str(s) => JsonValue::String(s.clone()),
        Value::Bytes(bytes) => JsonValue::Array(
            bytes
                .iter()
                .map(|&b| JsonValue::Number(Number::from(b)))
                .collect(),
        ),
        Value::List(items) => JsonValue::Array(items.iter().map(value_to_json).collect()),
        Value::Record(record) => to_json(record),
    }
}

fn json_to_value(name: &str, spec: &FieldSpec, jv: &JsonValue) -> Result<Value, DecodeError> {
    if spec.array.is_some() {
        let items = jv.as_array().ok_or_else(|| DecodeError::Json {
            field: name.into(),
            reason: format!("expected array, got {jv}"),
        })?;
        let items = items
            .iter()
            .map(|element| json_element(name, spec.kind(), element))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Value::List(items));
    }
    json_element(name, spec.kind(), jv)
}

fn json_element(name: &str, kind: &FieldKind, jv: &JsonValue) -> Result<Value, DecodeError> {
    let mismatch = |expected: &str| DecodeError::Json {
        field: name.into(),
        reason: format!("expected {expected}, got {jv}"),
    };

    match kind {
        FieldKind::Scalar(ty) => scalar_from_json(name, *ty, jv),
        FieldKind::Composite(sub) => from_json(jv, sub).map(Value::Record),
        FieldKind::Enum(_) => jv.as_u64().map(Value::UInt).ok_or_else(|| mismatch("enum value")),
        FieldKind::Custom(_) => plain_from_json(name, jv),
        FieldKind::Bit { signed, .. } => {
            if *signed {
                jv.as_i64().map(Value::Int).ok_or_else(|| mismatch("integer"))
            } else {
                jv.as_u64().map(Value::UInt).ok_or_else(|| mismatch("unsigned integer"))
            }
        }
    }
}

fn scalar_from_json(name: &str, ty: ScalarType, jv: &JsonValue) -> Result<Value, DecodeError> {
    let mismatch = || DecodeError::Json {
        field: name.into(),
        reason: format!("expected {}, got {jv}", ty.name()),
    };

    match ty {
        ScalarType::I8 | ScalarType::I16 | ScalarType::I32 | ScalarType::I64 => {
            jv.as_i64().map(Value::Int).ok_or_else(mismatch)
        }
        ScalarType::U8 | ScalarType::U16 | ScalarType::U32 | ScalarType::U64 => {
            jv.as_u64().map(Value::UInt).ok_or_else(mismatch)
        }
        ScalarType::F32 => jv.as_f64().map(|f| Value::F32(f as f32)).ok_or_else(mismatch),
        ScalarType::F64 => jv.as_f64().map(Value::F64).ok_or_else(mismatch),
        ScalarType::Bool => jv.as_bool().map(Value::Bool).ok_or_else(mismatch),
        ScalarType::Str => jv.as_str().map(|s| Value::Str(s.to_string())).ok_or_else(mismatch),
        ScalarType::Bytes => {
            let items = jv.as_array().ok_or_else(mismatch)?;
            let bytes = items
                .iter()
                .map(|item| {
                    item.as_u64()
                        .and_then(|v| u8::try_from(v).ok())
                        .ok_or_else(mismatch)
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Bytes(bytes))
        }
    }
}

fn plain_from_json(name: &str, jv: &JsonValue) -> Result<Value, DecodeError> {
    match jv {
        JsonValue::Bool(b) => Ok(Value::Bool(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(i))
            } else if let Some(u) = n.as_u64() {
                Ok(Value::UInt(u))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::F64(f))
            } else {
                Err(DecodeError::Json {
                    field: name.into(),
                    reason: format!("unrepresentable number {n}"),
                })
            }
        }
        JsonValue::String(s) => Ok(Value::Str(s.clone())),
        JsonValue::Array(items) => items
            .iter()
            .map(|item| plain_from_json(name, item))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        _ => Err(DecodeError::Json {
            field: name.into(),
            reason: format!("cannot rebuild field value from {jv}"),
        }),
    }
}

/// Serializes a field value for the JSON wire override.
pub(crate) fn encode_json_field(value: &Value) -> Result<Vec<u8>, EncodeError> {
    let projected = match value {
        Value::Record(record) => to_json(record),
        other => value_to_json(other),
    };
    serde_json::to_vec(&projected).map_err(|e| EncodeError::Json {
        field: "".into(),
        reason: e.to_string(),
    })
}

/// Parses a JSON wire override payload back into a field value.
pub(crate) fn decode_json_field(data: &[u8], spec: &FieldSpec) -> Result<Value, DecodeError> {
    let jv: JsonValue = serde_json::from_slice(data).map_err(|e| DecodeError::Json {
        field: "".into(),
        reason: e.to_string(),
    })?;
    match spec.kind() {
        FieldKind::Composite(sub) => from_json(&jv, sub).map(Value::Record),
        kind => json_element("", kind, &jv),
    }
}
