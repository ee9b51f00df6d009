//! Runtime values, message instances and dotted-path navigation.

use crate::error::ResolveError;
use crate::schema::{Schema, ValueSource};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use smartstring::{LazyCompact, SmartString};
use std::fmt;
use std::sync::Arc;

type FieldStr = SmartString<LazyCompact>;

/// A runtime field value.
///
/// Instances of messages and partials are property bags of these; the
/// declaration schema decides how each one reaches the wire.
#[derive(Debug, Clone)]
pub enum Value {
    /// Signed integer (any declared width)
    Int(i64),
    /// Unsigned integer (any declared width)
    UInt(u64),
    /// IEEE-754 single
    F32(f32),
    /// IEEE-754 double
    F64(f64),
    /// Boolean
    Bool(bool),
    /// UTF-8 string
    Str(String),
    /// Raw byte payload
    Bytes(Vec<u8>),
    /// Array-shaped field contents
    List(Vec<Value>),
    /// Nested composite instance
    Record(Record),
}

impl Value {
    /// Short name of the value's shape, for error messages.
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::F32(_) => "float",
            Self::F64(_) => "double",
            Self::Bool(_) => "bool",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Record(_) => "record",
        }
    }

    /// Unsigned view of an integer value, if representable.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt(u) => Some(*u),
            Self::Int(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }

    /// Signed view of an integer value, if representable.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    /// Integer value as a count/index, if representable.
    pub fn as_usize(&self) -> Option<usize> {
        self.as_u64().and_then(|u| usize::try_from(u).ok())
    }

    /// Floating-point view, widening from integers and singles.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::F64(f) => Some(*f),
            Self::F32(f) => Some(f64::from(*f)),
            Self::Int(i) => Some(*i as f64),
            Self::UInt(u) => Some(*u as f64),
            _ => None,
        }
    }

    /// Boolean view.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// String view.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Byte-payload view.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// List view.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Composite view.
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Mutable composite view.
    pub fn as_record_mut(&mut self) -> Option<&mut Record> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Element count of a list, character count of a string, byte count of
    /// a payload. `None` for shapes without an intrinsic length.
    pub fn length(&self) -> Option<usize> {
        match self {
            Self::List(items) => Some(items.len()),
            Self::Str(s) => Some(s.chars().count()),
            Self::Bytes(b) => Some(b.len()),
            _ => None,
        }
    }
}

/// Equality is wire-oriented: floats compare by bit pattern, and signed /
/// unsigned integers compare numerically so that round-tripped instances
/// match whichever representation the caller originally used.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::UInt(a), Self::UInt(b)) => a == b,
            (Self::Int(a), Self::UInt(b)) | (Self::UInt(b), Self::Int(a)) => {
                u64::try_from(*a).is_ok_and(|a| a == *b)
            }
            (Self::F32(a), Self::F32(b)) => a.to_bits() == b.to_bits(),
            (Self::F64(a), Self::F64(b)) => a.to_bits() == b.to_bits(),
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Record(a), Self::Record(b)) => a == b,
            _ => false,
        }
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Self::UInt(u64::from(v))
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Self::UInt(u64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::UInt(u64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Self::UInt(v as u64)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Self {
        Self::Record(v)
    }
}

/// A message or partial instance: one attribute slot per declared field.
///
/// Static fields are populated at construction; computed and conditional
/// fields are materialized by the codec. A conditional field skipped during
/// decode has no entry, so [`Record::get`] returning `None` is the absence
/// sentinel callers can test.
#[derive(Clone)]
pub struct Record {
    schema: Arc<Schema>,
    values: FxHashMap<FieldStr, Value>,
}

impl Record {
    /// Creates an instance of `schema` with its static fields pre-set.
    pub fn new(schema: &Arc<Schema>) -> Self {
        let mut values = FxHashMap::default();
        for (name, spec) in schema.fields() {
            if let Some(ValueSource::Static(constant)) = spec.source() {
                values.insert(FieldStr::from(name), constant.clone());
            }
        }
        Self { schema: Arc::clone(schema), values }
    }

    /// Sets a field value.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.values.insert(FieldStr::from(name), value.into());
        self
    }

    /// Builder-style [`Record::set`].
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Looks up a field value. `None` means the attribute was never set or
    /// was skipped by a false condition.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Mutable field lookup.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.values.get_mut(name)
    }

    /// True when the attribute is materialized.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Removes an attribute, returning its previous value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }

    /// The declaration this instance was built from.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The schema's type name, used by the envelope registry.
    pub fn type_name(&self) -> &str {
        self.schema.name()
    }

    /// Resolves a dotted path against this record.
    pub fn resolve(&self, path: &Path) -> Result<&Value, ResolveError> {
        let mut record = self;
        let segments = path.segments();
        for (i, segment) in segments.iter().enumerate() {
            let value = record.get(segment).ok_or_else(|| ResolveError::Missing {
                path: path.to_string(),
            })?;
            if i + 1 == segments.len() {
                return Ok(value);
            }
            record = value.as_record().ok_or_else(|| ResolveError::Traverse {
                path: path.to_string(),
                through: segment.to_string(),
            })?;
        }
        Err(ResolveError::Missing { path: path.to_string() })
    }

    /// Parses and resolves a dotted path in one step.
    pub fn resolve_str(&self, path: &str) -> Result<&Value, ResolveError> {
        self.resolve(&Path::parse(path))
    }

    /// Writes `value` at a dotted path, navigating nested composites.
    pub fn set_path(&mut self, path: &Path, value: Value) -> Result<(), ResolveError> {
        let segments = path.segments();
        let mut record = self;
        for segment in &segments[..segments.len() - 1] {
            let next = record.get_mut(segment).ok_or_else(|| ResolveError::Missing {
                path: path.to_string(),
            })?;
            record = next.as_record_mut().ok_or_else(|| ResolveError::Traverse {
                path: path.to_string(),
                through: segment.to_string(),
            })?;
        }
        let leaf = &segments[segments.len() - 1];
        record.values.insert(leaf.clone(), value);
        Ok(())
    }

    /// True when every field that is neither computed, static nor
    /// conditional has a value.
    pub fn validate(&self) -> bool {
        self.missing_field().is_none()
    }

    /// First required-but-unset field, if any.
    pub fn missing_field(&self) -> Option<&str> {
        for (name, spec) in self.schema.fields() {
            if spec.is_computed() || spec.is_static() || spec.is_conditional() {
                continue;
            }
            if !self.values.contains_key(name) {
                return Some(name);
            }
        }
        None
    }

    /// Number of materialized attributes; convenient for computed
    /// header/footer closures that count populated fields.
    pub fn populated_len(&self) -> usize {
        self.values.len()
    }

    /// Length of a list-valued field, or 0 when absent or not a list.
    pub fn list_len(&self, name: &str) -> usize {
        self.get(name).and_then(Value::as_list).map_or(0, <[Value]>::len)
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.schema.name() == other.schema.name() && self.values == other.values
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct(self.schema.name());
        for (name, _) in self.schema.fields() {
            if let Some(value) = self.values.get(name) {
                s.field(name, value);
            }
        }
        s.finish()
    }
}

/// An immutable dotted path of field-name tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    segments: SmallVec<[FieldStr; 4]>,
}

impl Path {
    /// Splits `path` on `.` into tokens.
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path.split('.').map(FieldStr::from).collect(),
        }
    }

    /// The path's tokens, in navigation order.
    pub fn segments(&self) -> &[FieldStr] {
        &self.segments
    }

    /// The single token of a dot-free path, if that is what this is.
    pub fn as_single(&self) -> Option<&str> {
        match self.segments.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    /// First token of the path.
    pub fn head(&self) -> &str {
        self.segments.first().map_or("", |s| s.as_str())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

impl From<&str> for Path {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::FieldSpec;

    fn inner_schema() -> Arc<Schema> {
        Schema::builder("Inner")
            .field("count", FieldSpec::u16())
            .build()
            .expect("schema should build")
    }

    fn outer_schema() -> Arc<Schema> {
        let inner = inner_schema();
        Schema::builder("Outer")
            .field("id", FieldSpec::u32())
            .field("inner", FieldSpec::composite(&inner))
            .build()
            .expect("schema should build")
    }

    #[test]
    fn test_value_equality_across_integer_shapes() {
        assert_eq!(Value::Int(5), Value::UInt(5));
        assert_ne!(Value::Int(-1), Value::UInt(u64::MAX));
        assert_eq!(Value::F32(1.5), Value::F32(1.5));
        assert_ne!(Value::F32(1.5), Value::F64(1.5));
    }

    #[test]
    fn test_record_set_get() {
        let schema = outer_schema();
        let mut record = Record::new(&schema);
        record.set("id", 9u32);
        assert_eq!(record.get("id"), Some(&Value::UInt(9)));
        assert!(record.get("missing").is_none());
        assert!(record.contains("id"));
    }

    #[test]
    fn test_path_resolution() {
        let outer = outer_schema();
        let inner = inner_schema();

        let nested = Record::new(&inner).with("count", 3u16);
        let record = Record::new(&outer).with("id", 1u32).with("inner", nested);

        let value = record.resolve(&Path::parse("inner.count")).unwrap();
        assert_eq!(value, &Value::UInt(3));

        assert!(matches!(
            record.resolve(&Path::parse("inner.nope")),
            Err(ResolveError::Missing { .. })
        ));
        assert!(matches!(
            record.resolve(&Path::parse("id.count")),
            Err(ResolveError::Traverse { .. })
        ));
    }

    #[test]
    fn test_set_path_writes_into_nested_record() {
        let outer = outer_schema();
        let inner = inner_schema();

        let mut record = Record::new(&outer).with("inner", Record::new(&inner));
        record
            .set_path(&Path::parse("inner.count"), Value::UInt(12))
            .unwrap();
        assert_eq!(record.resolve_str("inner.count").unwrap(), &Value::UInt(12));
    }

    #[test]
    fn test_validate_reports_missing_fields() {
        let schema = outer_schema();
        let inner = inner_schema();
        let mut record = Record::new(&schema);
        assert_eq!(record.missing_field(), Some("id"));
        record.set("id", 1u32);
        record.set("inner", Record::new(&inner));
        assert!(record.validate());
    }

    #[test]
    fn test_list_len_helper() {
        let schema = inner_schema();
        let mut record = Record::new(&schema);
        assert_eq!(record.list_len("count"), 0);
        record.set("count", vec![Value::UInt(1), Value::UInt(2)]);
        assert_eq!(record.list_len("count"), 2);
    }
}
