//! Declarative message and partial descriptions.
//!
//! A [`Schema`] is an ordered field list plus a byte-order choice and a
//! byte-aligned/bit-packed mode flag. Schemas are built once through
//! [`SchemaBuilder`], validated at build time, and shared immutably behind
//! an [`Arc`], the runtime analogue of a class definition.

use crate::encoders::{EnumCodec, FieldEncoder};
use crate::error::{EncodeError, SchemaError};
use crate::scalar::{ByteOrder, ScalarType};
use crate::value::{Path, Record, Value};
use smartstring::{LazyCompact, SmartString};
use std::fmt;
use std::sync::Arc;

type FieldStr = SmartString<LazyCompact>;

/// A pure function from the (partially built) message to a field value.
///
/// Inside automatic headers and footers the context also exposes the
/// pre-serialized body via [`ComputeContext::payload`]. Cyclic dependencies
/// between compute closures are undefined; declaration order must resolve
/// every dependency by the time a closure fires.
pub type ComputeFn = Arc<dyn Fn(&ComputeContext<'_>) -> Result<Value, EncodeError> + Send + Sync>;

/// A predicate over the partially built message deciding a conditional
/// field's presence. It must only read fields that precede the conditional
/// field in declaration order.
pub type Predicate = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Context handed to compute closures.
pub struct ComputeContext<'a> {
    record: &'a Record,
    body: Option<&'a [u8]>,
}

impl<'a> ComputeContext<'a> {
    pub(crate) fn new(record: &'a Record, body: Option<&'a [u8]>) -> Self {
        Self { record, body }
    }

    /// The message being encoded or validated.
    pub fn record(&self) -> &Record {
        self.record
    }

    /// Resolves a dotted path against the message.
    pub fn get(&self, path: &str) -> Result<&Value, EncodeError> {
        self.record.resolve_str(path).map_err(EncodeError::from)
    }

    /// The serialized message body. Empty outside header/footer context.
    pub fn payload(&self) -> &[u8] {
        self.body.unwrap_or(&[])
    }

    /// True when [`ComputeContext::payload`] carries the real body bytes,
    /// i.e. the closure runs for an automatic header or footer.
    pub fn has_payload(&self) -> bool {
        self.body.is_some()
    }
}

/// The type of a field: what one element looks like on the wire.
#[derive(Clone)]
pub enum FieldKind {
    /// A primitive from the fixed scalar table
    Scalar(ScalarType),
    /// A nested composite; encoding and decoding recurse
    Composite(Arc<Schema>),
    /// A user-supplied codec
    Custom(Arc<dyn FieldEncoder>),
    /// A named-constant set over an unsigned integer
    Enum(Arc<EnumCodec>),
    /// A bit-resolution integer; only valid inside bit-packed partials
    Bit {
        /// Width in bits, 1..=64
        width: u32,
        /// Two's-complement interpretation
        signed: bool,
    },
}

impl FieldKind {
    /// Short name for error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Composite(_) => "composite",
            Self::Custom(_) => "custom",
            Self::Enum(_) => "enum",
            Self::Bit { .. } => "bit",
        }
    }
}

impl fmt::Debug for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(ty) => write!(f, "Scalar({})", ty.name()),
            Self::Composite(schema) => write!(f, "Composite({})", schema.name()),
            Self::Custom(_) => f.write_str("Custom"),
            Self::Enum(codec) => write!(f, "Enum(size={})", codec.size()),
            Self::Bit { width, signed } => write!(f, "Bit(width={width}, signed={signed})"),
        }
    }
}

/// Element count of a fixed-size array.
#[derive(Debug, Clone)]
pub enum Count {
    /// Literal element count
    Literal(usize),
    /// Count read from an earlier field, navigated by dotted path
    Field(Path),
}

/// Array shape of a field.
#[derive(Debug, Clone)]
pub enum ArrayShape {
    /// Exactly `Count` elements back-to-back
    Fixed(Count),
    /// 4-byte element count, then the elements
    LengthPrefixed,
    /// Elements separated by a delimiter pattern, with a trailing
    /// delimiter marking end-of-list
    Delimited(Vec<u8>),
}

/// Target of a `size_of` value source.
#[derive(Debug, Clone)]
pub enum SizeTarget {
    /// The serialized message body; only available in automatic
    /// headers/footers where the body has already been serialized
    Body,
    /// The serialized wire size of the field at a dotted path
    Field(Path),
}

/// Where a field's wire value comes from when not set by the caller.
#[derive(Clone)]
pub enum ValueSource {
    /// A declared constant, always emitted and verified on decode
    Static(Value),
    /// Element/character/byte count of the referenced field
    LengthOf(Path),
    /// Serialized byte size of the referenced field or message body
    SizeOf(SizeTarget),
    /// Copy of the referenced field's value
    ValueFrom(Path),
    /// Arbitrary pure function of the message
    Compute(ComputeFn),
}

impl ValueSource {
    /// Constant value source.
    pub fn static_value(value: impl Into<Value>) -> Self {
        Self::Static(value.into())
    }

    /// `length_of` source over a dotted path.
    pub fn length_of(path: &str) -> Self {
        Self::LengthOf(Path::parse(path))
    }

    /// `size_of` source; `"body"`, `"message"` and `"payload"` are the
    /// reserved names for the serialized message body.
    pub fn size_of(target: &str) -> Self {
        match target {
            "body" | "message" | "payload" => Self::SizeOf(SizeTarget::Body),
            path => Self::SizeOf(SizeTarget::Field(Path::parse(path))),
        }
    }

    /// `value_from` source over a dotted path.
    pub fn value_from(path: &str) -> Self {
        Self::ValueFrom(Path::parse(path))
    }

    /// Computed source.
    pub fn compute(
        f: impl Fn(&ComputeContext<'_>) -> Result<Value, EncodeError> + Send + Sync + 'static,
    ) -> Self {
        Self::Compute(Arc::new(f))
    }

    /// True for the [`ValueSource::Static`] variant.
    pub fn is_static(&self) -> bool {
        matches!(self, Self::Static(_))
    }
}

impl fmt::Debug for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(v) => write!(f, "Static({v:?})"),
            Self::LengthOf(p) => write!(f, "LengthOf({p})"),
            Self::SizeOf(SizeTarget::Body) => f.write_str("SizeOf(body)"),
            Self::SizeOf(SizeTarget::Field(p)) => write!(f, "SizeOf({p})"),
            Self::ValueFrom(p) => write!(f, "ValueFrom({p})"),
            Self::Compute(_) => f.write_str("Compute"),
        }
    }
}

/// Alternate whole-field wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// 4-byte length prefix, then the structural JSON projection
    Json,
}

/// Description of one field inside a message or partial.
#[derive(Clone)]
pub struct FieldSpec {
    pub(crate) kind: FieldKind,
    pub(crate) array: Option<ArrayShape>,
    pub(crate) source: Option<ValueSource>,
    pub(crate) condition: Option<Predicate>,
    pub(crate) format: Option<WireFormat>,
    pub(crate) assigns: Vec<(Path, ValueSource)>,
}

impl FieldSpec {
    fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            array: None,
            source: None,
            condition: None,
            format: None,
            assigns: Vec::new(),
        }
    }

    /// 8-bit signed integer field.
    pub fn i8() -> Self {
        Self::new(FieldKind::Scalar(ScalarType::I8))
    }

    /// 16-bit signed integer field.
    pub fn i16() -> Self {
        Self::new(FieldKind::Scalar(ScalarType::I16))
    }

    /// 32-bit signed integer field.
    pub fn i32() -> Self {
        Self::new(FieldKind::Scalar(ScalarType::I32))
    }

    /// 64-bit signed integer field.
    pub fn i64() -> Self {
        Self::new(FieldKind::Scalar(ScalarType::I64))
    }

    /// 8-bit unsigned integer field.
    pub fn u8() -> Self {
        Self::new(FieldKind::Scalar(ScalarType::U8))
    }

    /// 16-bit unsigned integer field.
    pub fn u16() -> Self {
        Self::new(FieldKind::Scalar(ScalarType::U16))
    }

    /// 32-bit unsigned integer field.
    pub fn u32() -> Self {
        Self::new(FieldKind::Scalar(ScalarType::U32))
    }

    /// 64-bit unsigned integer field.
    pub fn u64() -> Self {
        Self::new(FieldKind::Scalar(ScalarType::U64))
    }

    /// IEEE-754 single field.
    pub fn f32() -> Self {
        Self::new(FieldKind::Scalar(ScalarType::F32))
    }

    /// IEEE-754 double field.
    pub fn f64() -> Self {
        Self::new(FieldKind::Scalar(ScalarType::F64))
    }

    /// One-byte boolean field.
    pub fn boolean() -> Self {
        Self::new(FieldKind::Scalar(ScalarType::Bool))
    }

    /// Length-prefixed UTF-8 string field.
    pub fn string() -> Self {
        Self::new(FieldKind::Scalar(ScalarType::Str))
    }

    /// Length-prefixed raw byte field.
    pub fn bytes() -> Self {
        Self::new(FieldKind::Scalar(ScalarType::Bytes))
    }

    /// Nested composite field.
    pub fn composite(schema: &Arc<Schema>) -> Self {
        Self::new(FieldKind::Composite(Arc::clone(schema)))
    }

    /// Field served entirely by a user-supplied codec.
    pub fn custom(encoder: impl FieldEncoder + 'static) -> Self {
        Self::new(FieldKind::Custom(Arc::new(encoder)))
    }

    /// Named-constant field.
    pub fn enumeration(codec: EnumCodec) -> Self {
        Self::new(FieldKind::Enum(Arc::new(codec)))
    }

    /// Unsigned bit-resolution field of `width` bits.
    pub fn bit(width: u32) -> Self {
        Self::new(FieldKind::Bit { width, signed: false })
    }

    /// Signed (two's-complement) bit-resolution field of `width` bits.
    pub fn bit_signed(width: u32) -> Self {
        Self::new(FieldKind::Bit { width, signed: true })
    }

    /// Fixed-count array of this field's element type.
    #[must_use]
    pub fn fixed_count(mut self, count: usize) -> Self {
        self.array = Some(ArrayShape::Fixed(Count::Literal(count)));
        self
    }

    /// Array whose element count is read from an earlier field.
    #[must_use]
    pub fn counted_by(mut self, path: &str) -> Self {
        self.array = Some(ArrayShape::Fixed(Count::Field(Path::parse(path))));
        self
    }

    /// Array preceded by a 4-byte element count.
    #[must_use]
    pub fn length_prefixed(mut self) -> Self {
        self.array = Some(ArrayShape::LengthPrefixed);
        self
    }

    /// Array with elements separated (and terminated) by a byte pattern.
    #[must_use]
    pub fn delimited(mut self, delimiter: &[u8]) -> Self {
        self.array = Some(ArrayShape::Delimited(delimiter.to_vec()));
        self
    }

    /// Declares a constant wire value; caller-supplied values are ignored.
    #[must_use]
    pub fn static_value(mut self, value: impl Into<Value>) -> Self {
        self.source = Some(ValueSource::Static(value.into()));
        self
    }

    /// Wire value is the length of the field at `path`.
    #[must_use]
    pub fn length_of(mut self, path: &str) -> Self {
        self.source = Some(ValueSource::length_of(path));
        self
    }

    /// Wire value is the serialized size of the field at `path` (or of the
    /// message body, for the reserved `"body"`/`"message"`/`"payload"`).
    #[must_use]
    pub fn size_of(mut self, target: &str) -> Self {
        self.source = Some(ValueSource::size_of(target));
        self
    }

    /// Wire value is a copy of the field at `path`.
    #[must_use]
    pub fn value_from(mut self, path: &str) -> Self {
        self.source = Some(ValueSource::value_from(path));
        self
    }

    /// Wire value is computed by `f` during encode.
    #[must_use]
    pub fn compute(
        mut self,
        f: impl Fn(&ComputeContext<'_>) -> Result<Value, EncodeError> + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(ValueSource::compute(f));
        self
    }

    /// Includes the field only when `predicate` holds over the fields that
    /// precede it in declaration order.
    #[must_use]
    pub fn when(mut self, predicate: impl Fn(&Record) -> bool + Send + Sync + 'static) -> Self {
        self.condition = Some(Arc::new(predicate));
        self
    }

    /// Emits the field as a length-prefixed JSON projection instead of its
    /// native binary form.
    #[must_use]
    pub fn json(mut self) -> Self {
        self.format = Some(WireFormat::Json);
        self
    }

    /// Deep assignment: before this composite field is serialized, resolve
    /// `source` in the enclosing message's context and write the result at
    /// `path` (a dotted path rooted at the message, e.g. `"header.len"`).
    #[must_use]
    pub fn assign(mut self, path: &str, source: ValueSource) -> Self {
        self.assigns.push((Path::parse(path), source));
        self
    }

    /// The field's element type.
    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// The declared value source, if any.
    pub fn source(&self) -> Option<&ValueSource> {
        self.source.as_ref()
    }

    /// True when the wire value is derived rather than caller-supplied.
    pub fn is_computed(&self) -> bool {
        matches!(
            &self.source,
            Some(
                ValueSource::LengthOf(_)
                    | ValueSource::SizeOf(_)
                    | ValueSource::ValueFrom(_)
                    | ValueSource::Compute(_)
            )
        )
    }

    /// True when the field always serializes a declared constant.
    pub fn is_static(&self) -> bool {
        matches!(&self.source, Some(ValueSource::Static(_)))
    }

    /// True when presence depends on a predicate.
    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }

    /// Wire size when statically computable: required of automatic
    /// header/footer fields so decode can skip them at known offsets.
    pub fn fixed_wire_size(&self) -> Option<usize> {
        if self.array.is_some() || self.format.is_some() {
            return None;
        }
        match &self.kind {
            FieldKind::Scalar(ty) => ty.fixed_size(),
            FieldKind::Enum(codec) => Some(codec.size()),
            FieldKind::Custom(codec) => codec.fixed_size(),
            FieldKind::Composite(_) | FieldKind::Bit { .. } => None,
        }
    }
}

impl fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec")
            .field("kind", &self.kind)
            .field("array", &self.array)
            .field("source", &self.source)
            .field("conditional", &self.condition.is_some())
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// An immutable message/partial declaration.
pub struct Schema {
    name: FieldStr,
    byte_order: ByteOrder,
    bit_packed: bool,
    fields: Vec<(FieldStr, FieldSpec)>,
}

impl Schema {
    /// Starts building a schema with the given type name.
    pub fn builder(name: &str) -> SchemaBuilder {
        SchemaBuilder {
            name: FieldStr::from(name),
            byte_order: ByteOrder::Big,
            bit_packed: false,
            fields: Vec::new(),
        }
    }

    /// The type name, unique within a protocol's registry.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Byte order of every multi-byte value in this partial.
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// True when the partial serializes as one contiguous bit stream.
    pub fn bit_packed(&self) -> bool {
        self.bit_packed
    }

    /// Iterates `(name, spec)` pairs in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    /// Number of declared fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when no fields are declared.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Looks up a field spec by name.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .map(|(_, spec)| spec)
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name.as_str())
            .field("byte_order", &self.byte_order)
            .field("bit_packed", &self.bit_packed)
            .field(
                "fields",
                &self.fields.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Builder for [`Schema`]; validation happens in [`SchemaBuilder::build`].
pub struct SchemaBuilder {
    name: FieldStr,
    byte_order: ByteOrder,
    bit_packed: bool,
    fields: Vec<(FieldStr, FieldSpec)>,
}

impl SchemaBuilder {
    /// Selects the byte order (big-endian is the default).
    #[must_use]
    pub fn byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = order;
        self
    }

    /// Forces bit-packed mode. Declaring any bit-typed field enables the
    /// mode implicitly.
    #[must_use]
    pub fn bit_packed(mut self) -> Self {
        self.bit_packed = true;
        self
    }

    /// Appends a field. Declaration order is wire order.
    #[must_use]
    pub fn field(mut self, name: &str, spec: FieldSpec) -> Self {
        self.fields.push((FieldStr::from(name), spec));
        self
    }

    /// Validates the declaration and freezes it into a shared [`Schema`].
    pub fn build(self) -> Result<Arc<Schema>, SchemaError> {
        let bit_mode = self.bit_packed
            || self
                .fields
                .iter()
                .any(|(_, spec)| matches!(&spec.kind, FieldKind::Bit { .. }));

        for (i, (name, spec)) in self.fields.iter().enumerate() {
            if self.fields[..i].iter().any(|(n, _)| n == name) {
                return Err(SchemaError::DuplicateField {
                    partial: self.name.clone(),
                    field: name.clone(),
                });
            }

            if let &FieldKind::Bit { width, .. } = &spec.kind {
                if !(1..=64).contains(&width) {
                    return Err(SchemaError::BitWidth { field: name.clone(), width });
                }
            }

            if bit_mode {
                Self::check_bit_mode_field(&self.name, name, spec)?;
            } else if matches!(&spec.kind, FieldKind::Bit { .. }) {
                // Unreachable given the bit_mode computation above; kept for
                // symmetry if the mode derivation ever changes.
                return Err(SchemaError::MixedModes {
                    partial: self.name.clone(),
                    field: name.clone(),
                });
            }

            if let Some(ArrayShape::Fixed(Count::Field(path))) = &spec.array {
                let head = path.head();
                let declared_earlier = self.fields[..i].iter().any(|(n, _)| n.as_str() == head);
                if !declared_earlier {
                    return Err(SchemaError::ForwardCount {
                        field: name.clone(),
                        reference: FieldStr::from(head),
                    });
                }
            }
        }

        Ok(Arc::new(Schema {
            name: self.name,
            byte_order: self.byte_order,
            bit_packed: bit_mode,
            fields: self.fields,
        }))
    }

    fn check_bit_mode_field(
        partial: &FieldStr,
        name: &FieldStr,
        spec: &FieldSpec,
    ) -> Result<(), SchemaError> {
        if !matches!(&spec.kind, FieldKind::Bit { .. }) {
            return Err(SchemaError::MixedModes {
                partial: partial.clone(),
                field: name.clone(),
            });
        }
        if let Some(source) = &spec.source {
            if !source.is_static() {
                return Err(SchemaError::UnsupportedInBitMode {
                    field: name.clone(),
                    feature: "computed value sources",
                });
            }
        }
        if spec.condition.is_some() {
            return Err(SchemaError::UnsupportedInBitMode {
                field: name.clone(),
                feature: "conditional fields",
            });
        }
        if spec.format.is_some() {
            return Err(SchemaError::UnsupportedInBitMode {
                field: name.clone(),
                feature: "serializer overrides",
            });
        }
        if !spec.assigns.is_empty() {
            return Err(SchemaError::UnsupportedInBitMode {
                field: name.clone(),
                feature: "deep assignments",
            });
        }
        match &spec.array {
            None | Some(ArrayShape::Fixed(Count::Literal(_))) => Ok(()),
            Some(_) => Err(SchemaError::UnsupportedInBitMode {
                field: name.clone(),
                feature: "non-literal array shapes",
            }),
        }
    }
}
