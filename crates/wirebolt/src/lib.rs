//! # Wirebolt - Declarative Binary Protocols
//!
//! This crate turns structured message descriptions into wire bytes and
//! back. A message shape is declared once as a [`Schema`]: fields with
//! types, arrays, conditional inclusion, bit-packed layouts and nested
//! composites. The engine encodes instances to byte sequences and decodes
//! byte sequences back to instances.
//!
//! ## Features
//!
//! - Byte-aligned and bit-packed serialization with explicit byte order
//! - Derived fields: lengths, sizes, copies and arbitrary checksums are
//!   computed during encode and verified during decode
//! - Conditional fields, cross-field references navigated by dotted paths,
//!   and deep assignments into nested composites
//! - A protocol envelope with type-discriminated framing, automatic
//!   headers/footers and per-source reassembly of fragmented input
//! - Tamper detection: garbage is quarantined as an [`InvalidMessage`]
//!   instead of erroring the transport loop
//! - A reactive layer: interval schedulers and condition-triggered
//!   auto-replies on top of the codec
//! - Structural JSON projection of any message, usable per-field as an
//!   alternate wire format
//! - An optional `serde` feature adding derives to the configuration and
//!   wire-type descriptors
//!
//! ## Usage
//!
//! ```rust,no_run
//! use wirebolt::{FieldSpec, Protocol, Record, Schema, ValueSource};
//!
//! fn example() -> wirebolt::Result<()> {
//!     // A header whose length field is filled in from the payload.
//!     let header = Schema::builder("Header")
//!         .field("len", FieldSpec::u32())
//!         .build()?;
//!     let frame = Schema::builder("Frame")
//!         .field(
//!             "header",
//!             FieldSpec::composite(&header)
//!                 .assign("header.len", ValueSource::length_of("payload")),
//!         )
//!         .field("payload", FieldSpec::bytes())
//!         .build()?;
//!
//!     let protocol = Protocol::new();
//!     protocol.register(&frame)?;
//!
//!     let mut msg = Record::new(&frame)
//!         .with("header", Record::new(&header))
//!         .with("payload", b"hello".to_vec());
//!     let wire = protocol.encode(&mut msg)?;
//!
//!     // Fragments return None and are reassembled per source id.
//!     if let Some((decoded, _rest)) = protocol.decode(&wire, "peer:1") {
//!         println!("{:?}", decoded.into_message());
//!     }
//!     Ok(())
//! }
//! ```

#![deny(
    rust_2024_incompatible_pat,
    unsafe_op_in_unsafe_fn,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![warn(missing_docs, clippy::all, clippy::pedantic, rust_2024_compatibility)]
#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]

pub mod bits;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod encoders;
pub mod error;
pub mod json;
pub mod protocol;
pub mod reactive;
pub mod scalar;
pub mod schema;
pub mod value;

pub use config::Config;
pub use decoder::decode_body;
pub use encoder::encode_body;
pub use encoders::{EnumCodec, FieldEncoder, FixedPointCodec, RunLengthCodec, SevenBitAsciiCodec};
pub use error::{DecodeError, EncodeError, Error, Result, SchemaError};
pub use protocol::{Decoded, InvalidMessage, Protocol, TYPE_PREFIX_SIZE, crc32};
pub use scalar::{ByteOrder, LENGTH_PREFIX_SIZE, ScalarType};
pub use schema::{
    ArrayShape, ComputeContext, Count, FieldKind, FieldSpec, Schema, SchemaBuilder, SizeTarget,
    ValueSource, WireFormat,
};
pub use value::{Path, Record, Value};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
