//! Error types for schema definition, encoding and decoding.

use smartstring::{LazyCompact, SmartString};
use thiserror::Error;

type FieldStr = SmartString<LazyCompact>;

/// Result type alias for wirebolt operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for protocol operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Encoding error occurred
    #[error("encoding error: {0}")]
    Encode(#[from] EncodeError),

    /// Decoding error occurred
    #[error("decoding error: {0}")]
    Decode(#[from] DecodeError),

    /// Schema definition or registration error
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
}

/// Errors raised while defining schemas or mutating a protocol's tables.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// A message type with the same name is already registered
    #[error("message type '{name}' already registered in this protocol")]
    DuplicateMessage {
        /// Conflicting type name
        name: FieldStr,
    },

    /// The same field name appears twice in one partial
    #[error("duplicate field '{field}' in partial '{partial}'")]
    DuplicateField {
        /// Owning partial name
        partial: FieldStr,
        /// Repeated field name
        field: FieldStr,
    },

    /// A byte-aligned field appeared in a bit-packed partial
    #[error("partial '{partial}' mixes bit-packed and byte-aligned fields (field '{field}')")]
    MixedModes {
        /// Owning partial name
        partial: FieldStr,
        /// Offending field name
        field: FieldStr,
    },

    /// A feature unsupported in bit-packed mode was requested
    #[error("field '{field}': {feature} is not supported in bit-packed mode")]
    UnsupportedInBitMode {
        /// Offending field name
        field: FieldStr,
        /// Human-readable feature name
        feature: &'static str,
    },

    /// Bit width outside the 1..=64 range
    #[error("field '{field}': bit width {width} outside 1..=64")]
    BitWidth {
        /// Offending field name
        field: FieldStr,
        /// Declared width
        width: u32,
    },

    /// An array count reference points at a field declared later
    #[error("field '{field}': count reference '{reference}' must name an earlier field")]
    ForwardCount {
        /// Offending field name
        field: FieldStr,
        /// Referenced field name
        reference: FieldStr,
    },

    /// A header/footer spec is unusable as an automatic field
    #[error("auto field '{field}' rejected: {reason}")]
    UnsupportedAutoField {
        /// Offending field name
        field: FieldStr,
        /// Why the spec was rejected
        reason: &'static str,
    },

    /// Scheduling interval was zero
    #[error("scheduling interval must be positive")]
    InvalidInterval,

    /// Registered type name cannot be framed in a u16 length prefix
    #[error("message type name '{name}' exceeds the 65535-byte framing limit")]
    TypeNameTooLong {
        /// Offending type name
        name: FieldStr,
    },
}

/// Errors that can occur during encoding.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Value outside the declared bit width or numeric range
    #[error("field '{field}': {detail}")]
    Range {
        /// Field being encoded
        field: FieldStr,
        /// Range violation description
        detail: String,
    },

    /// Value has the wrong shape for its field spec
    #[error("field '{field}': {detail}")]
    Type {
        /// Field being encoded
        field: FieldStr,
        /// Shape mismatch description
        detail: String,
    },

    /// Dotted path resolved to a missing attribute
    #[error("reference '{path}' does not exist")]
    Reference {
        /// The unresolved path
        path: String,
    },

    /// Dotted path descended through a non-composite value
    #[error("path '{path}' descends through non-composite '{through}'")]
    Path {
        /// The full path
        path: String,
        /// Segment that was not a composite
        through: String,
    },

    /// A required field was never set on the record
    #[error("field '{field}' is not set")]
    Missing {
        /// Unset field name
        field: FieldStr,
    },

    /// Message type not present in the protocol registry
    #[error("message type '{name}' not registered with this protocol")]
    Unregistered {
        /// Offending type name
        name: FieldStr,
    },

    /// JSON projection of a field payload failed
    #[error("field '{field}': JSON serialization failed: {reason}")]
    Json {
        /// Field being projected
        field: FieldStr,
        /// Underlying serializer error
        reason: String,
    },

    /// Encoded message exceeds the configured maximum
    #[error("message size {size} exceeds maximum {max_size}")]
    TooLarge {
        /// Actual encoded size
        size: usize,
        /// Configured maximum
        max_size: usize,
    },
}

/// Errors that can occur during decoding.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Input too short to decide; drives the reassembly cache, never
    /// surfaced to callers of [`crate::Protocol::decode`]
    #[error("insufficient data: need {needed} more bytes at offset {offset}")]
    Incomplete {
        /// Offset at which data ran out
        offset: usize,
        /// Additional bytes needed
        needed: usize,
    },

    /// Decoded value outside the declared range
    #[error("field '{field}': {detail}")]
    Range {
        /// Field being decoded
        field: FieldStr,
        /// Range violation description
        detail: String,
    },

    /// Wire content has the wrong shape for its field spec
    #[error("field '{field}': {detail}")]
    Type {
        /// Field being decoded
        field: FieldStr,
        /// Shape mismatch description
        detail: String,
    },

    /// Dotted path resolved to an attribute not yet decoded
    #[error("reference '{path}' does not exist")]
    Reference {
        /// The unresolved path
        path: String,
    },

    /// Dotted path descended through a non-composite value
    #[error("path '{path}' descends through non-composite '{through}'")]
    Path {
        /// The full path
        path: String,
        /// Segment that was not a composite
        through: String,
    },

    /// Decoded value differs from the declared static constant
    #[error("field '{field}': expected static value {expected}, got {got}")]
    StaticMismatch {
        /// Static field name
        field: FieldStr,
        /// Declared constant
        expected: String,
        /// Value read off the wire
        got: String,
    },

    /// Recomputed header/footer value differs from the decoded value
    #[error("auto field '{field}' validation failed: expected {expected}, got {got}")]
    Validation {
        /// Header/footer field name
        field: FieldStr,
        /// Recomputed value
        expected: String,
        /// Value read off the wire
        got: String,
    },

    /// Envelope type name not present in the protocol registry
    #[error("unknown message type '{name}'")]
    UnknownType {
        /// Unregistered type name
        name: FieldStr,
    },

    /// Invalid UTF-8 in a string field
    #[error("invalid UTF-8 in field '{field}'")]
    Utf8 {
        /// Field containing the bad bytes
        field: FieldStr,
    },

    /// JSON payload of a serializer-override field failed to parse
    #[error("field '{field}': JSON payload invalid: {reason}")]
    Json {
        /// Field being parsed
        field: FieldStr,
        /// Underlying parser error
        reason: String,
    },

    /// Input (or accumulated reassembly buffer) exceeds the configured maximum
    #[error("message size {size} exceeds maximum {max_size}")]
    TooLarge {
        /// Observed size
        size: usize,
        /// Configured maximum
        max_size: usize,
    },
}

/// Failure modes of dotted-path resolution, shared by both codec directions.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// No attribute at the path
    #[error("reference '{path}' does not exist")]
    Missing {
        /// The unresolved path
        path: String,
    },

    /// An intermediate segment was not a composite
    #[error("path '{path}' descends through non-composite '{through}'")]
    Traverse {
        /// The full path
        path: String,
        /// Segment that was not a composite
        through: String,
    },
}

impl From<ResolveError> for EncodeError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Missing { path } => Self::Reference { path },
            ResolveError::Traverse { path, through } => Self::Path { path, through },
        }
    }
}

impl From<ResolveError> for DecodeError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Missing { path } => Self::Reference { path },
            ResolveError::Traverse { path, through } => Self::Path { path, through },
        }
    }
}

/// Extension trait that stamps a field name onto context-free errors.
///
/// Scalar and custom codecs do not know which field they are serving; the
/// composite codec fills the blank in afterwards.
pub(crate) trait FieldContext {
    /// Attaches `field` to the error if no field name was recorded yet.
    fn in_field(self, field: &str) -> Self;
}

impl FieldContext for EncodeError {
    fn in_field(mut self, field: &str) -> Self {
        match &mut self {
            Self::Range { field: f, .. }
            | Self::Type { field: f, .. }
            | Self::Missing { field: f }
            | Self::Json { field: f, .. } => {
                if f.is_empty() {
                    *f = field.into();
                }
            }
            _ => {}
        }
        self
    }
}

impl FieldContext for DecodeError {
    fn in_field(mut self, field: &str) -> Self {
        match &mut self {
            Self::Range { field: f, .. }
            | Self::Type { field: f, .. }
            | Self::StaticMismatch { field: f, .. }
            | Self::Validation { field: f, .. }
            | Self::Utf8 { field: f }
            | Self::Json { field: f, .. } => {
                if f.is_empty() {
                    *f = field.into();
                }
            }
            _ => {}
        }
        self
    }
}

impl DecodeError {
    /// True for the buffering-only error kind.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Incomplete { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DecodeError::StaticMismatch {
            field: "magic".into(),
            expected: "UInt(4660)".to_string(),
            got: "UInt(4661)".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "field 'magic': expected static value UInt(4660), got UInt(4661)"
        );
    }

    #[test]
    fn test_error_conversion() {
        let decode_err = DecodeError::UnknownType { name: "Ping".into() };
        let main_error: Error = decode_err.into();
        assert!(matches!(main_error, Error::Decode(_)));
    }

    #[test]
    fn test_field_context_fills_blank_names() {
        let err = EncodeError::Type {
            field: "".into(),
            detail: "expected list".to_string(),
        }
        .in_field("items");
        assert!(matches!(err, EncodeError::Type { ref field, .. } if field == "items"));

        // An already-attributed error keeps its original field.
        let err = EncodeError::Type {
            field: "inner".into(),
            detail: "expected list".to_string(),
        }
        .in_field("outer");
        assert!(matches!(err, EncodeError::Type { ref field, .. } if field == "inner"));
    }

    #[test]
    fn test_resolve_error_mapping() {
        let missing = ResolveError::Missing { path: "a.b".to_string() };
        assert!(matches!(
            EncodeError::from(missing.clone()),
            EncodeError::Reference { .. }
        ));
        assert!(matches!(DecodeError::from(missing), DecodeError::Reference { .. }));
    }
}
