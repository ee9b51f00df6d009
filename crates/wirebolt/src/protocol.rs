//! Protocol envelope: type registry, framing, automatic headers/footers,
//! incomplete-message reassembly and invalid-message quarantine.
//!
//! Every wire message is framed as a big-endian `u16` type-name length,
//! the UTF-8 type name, the automatic headers, the body, and the automatic
//! footers. The type-length prefix is always big-endian regardless of any
//! message's byte order; it is the envelope's wire invariant.
//!
//! Decoding is transport-friendly: fragments are buffered per source and
//! yield `None`, garbage is wrapped in an [`InvalidMessage`] and returned
//! normally, so a read loop never has to handle codec errors.

use crate::config::Config;
use crate::decoder;
use crate::encoder;
use crate::error::{DecodeError, EncodeError, Error, FieldContext, SchemaError};
use crate::reactive::{ConditionFn, ReplyTable, ReplyUpdateFn, Scheduler, SendFn, UpdateFn};
use crate::scalar::ByteOrder;
use crate::schema::{FieldSpec, Schema, ValueSource};
use crate::value::Record;
use bytes::{Bytes, BytesMut};
use log::debug;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use smartstring::{LazyCompact, SmartString};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

type FieldStr = SmartString<LazyCompact>;

/// Inline capacity of the header/footer spec lists.
const AUTO_FIELD_CAPACITY: usize = 8;

type AutoFields = SmallVec<[(FieldStr, FieldSpec); AUTO_FIELD_CAPACITY]>;

/// Width of the envelope's type-name length prefix.
pub const TYPE_PREFIX_SIZE: usize = 2;

/// CRC-32 (IEEE) checksum helper for computed header/footer closures.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// A wire message that failed to parse, preserved for inspection.
///
/// Carries the raw input, the error, and whatever was recovered before the
/// failure: the extracted type name and any body fields already decoded.
#[derive(Debug)]
pub struct InvalidMessage {
    raw: Bytes,
    error: DecodeError,
    type_name: Option<FieldStr>,
    partial: Option<Record>,
}

impl InvalidMessage {
    /// The raw bytes that failed to parse.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// The error that stopped the decode.
    pub fn error(&self) -> &DecodeError {
        &self.error
    }

    /// The envelope type name, when it was extracted before the failure.
    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    /// Body fields decoded before the failure, when any were.
    pub fn partial_fields(&self) -> Option<&Record> {
        self.partial.as_ref()
    }
}

impl fmt::Display for InvalidMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InvalidMessage(type={}, error={}, raw_bytes={})",
            self.type_name.as_deref().unwrap_or("unknown"),
            self.error,
            self.raw.len()
        )
    }
}

/// Outcome of a successful [`Protocol::decode`] call.
#[derive(Debug)]
pub enum Decoded {
    /// A fully decoded and validated message
    Message(Record),
    /// Quarantined garbage; the source produced bytes that cannot become
    /// a valid message no matter what arrives next
    Invalid(InvalidMessage),
}

impl Decoded {
    /// The decoded message, if valid.
    pub fn into_message(self) -> Option<Record> {
        match self {
            Self::Message(record) => Some(record),
            Self::Invalid(_) => None,
        }
    }

    /// The quarantined record, if invalid.
    pub fn into_invalid(self) -> Option<InvalidMessage> {
        match self {
            Self::Message(_) => None,
            Self::Invalid(invalid) => Some(invalid),
        }
    }

    /// True for the quarantined variant.
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }
}

struct Inner {
    config: Config,
    registry: RwLock<FxHashMap<FieldStr, Arc<Schema>>>,
    headers: RwLock<AutoFields>,
    footers: RwLock<AutoFields>,
    pending: Mutex<FxHashMap<String, BytesMut>>,
    scheduler: Scheduler,
    replies: ReplyTable,
}

/// Protocol encoder/decoder with a message type registry.
///
/// Cheap to clone; clones share the registry, header/footer specs,
/// reassembly cache, scheduler and auto-reply tables.
#[derive(Clone)]
pub struct Protocol {
    inner: Arc<Inner>,
}

impl Default for Protocol {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol {
    /// Creates a protocol with default [`Config`].
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a protocol with explicit limits.
    pub fn with_config(config: Config) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                registry: RwLock::new(FxHashMap::default()),
                headers: RwLock::new(AutoFields::new()),
                footers: RwLock::new(AutoFields::new()),
                pending: Mutex::new(FxHashMap::default()),
                scheduler: Scheduler::new(),
                replies: ReplyTable::new(),
            }),
        }
    }

    /// Registers a message schema under its type name.
    ///
    /// Names are unique per protocol; registering the same schema with two
    /// different protocols is fine.
    pub fn register(&self, schema: &Arc<Schema>) -> Result<(), SchemaError> {
        let name = FieldStr::from(schema.name());
        if name.len() > usize::from(u16::MAX) {
            return Err(SchemaError::TypeNameTooLong { name });
        }
        let mut registry = self.inner.registry.write();
        if registry.contains_key(&name) {
            return Err(SchemaError::DuplicateMessage { name });
        }
        registry.insert(name, Arc::clone(schema));
        Ok(())
    }

    /// True when a type name is registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.registry.read().contains_key(name)
    }

    /// Looks up a registered schema.
    pub fn schema(&self, name: &str) -> Option<Arc<Schema>> {
        self.inner.registry.read().get(name).cloned()
    }

    /// Installs automatic header fields, replacing any previous set.
    ///
    /// Header specs must have a statically known size and a value source;
    /// they are computed against every outgoing message (and its
    /// serialized body) and validated on every decode.
    pub fn set_headers(&self, fields: Vec<(&str, FieldSpec)>) -> Result<(), SchemaError> {
        let fields = Self::check_auto_fields(fields)?;
        *self.inner.headers.write() = fields;
        Ok(())
    }

    /// Installs automatic footer fields, replacing any previous set.
    pub fn set_footers(&self, fields: Vec<(&str, FieldSpec)>) -> Result<(), SchemaError> {
        let fields = Self::check_auto_fields(fields)?;
        *self.inner.footers.write() = fields;
        Ok(())
    }

    /// Removes all automatic headers.
    pub fn clear_headers(&self) {
        self.inner.headers.write().clear();
    }

    /// Removes all automatic footers.
    pub fn clear_footers(&self) {
        self.inner.footers.write().clear();
    }

    fn check_auto_fields(fields: Vec<(&str, FieldSpec)>) -> Result<AutoFields, SchemaError> {
        let mut checked = AutoFields::new();
        for (name, spec) in fields {
            if spec.fixed_wire_size().is_none() {
                return Err(SchemaError::UnsupportedAutoField {
                    field: name.into(),
                    reason: "size is not statically known",
                });
            }
            if spec.source().is_none() {
                return Err(SchemaError::UnsupportedAutoField {
                    field: name.into(),
                    reason: "needs a value source (static, length_of, size_of, value_from or compute)",
                });
            }
            if spec.is_conditional() {
                return Err(SchemaError::UnsupportedAutoField {
                    field: name.into(),
                    reason: "conditional fields are not supported here",
                });
            }
            checked.push((FieldStr::from(name), spec));
        }
        Ok(checked)
    }

    fn auto_size(fields: &AutoFields) -> usize {
        fields
            .iter()
            .map(|(_, spec)| spec.fixed_wire_size().unwrap_or(0))
            .sum()
    }

    /// Encodes a message for transmission: type prefix, automatic headers,
    /// body, automatic footers.
    ///
    /// Computed values (body fields and auto fields alike) are evaluated
    /// here; body-level results are written back onto `record`.
    pub fn encode(&self, record: &mut Record) -> Result<Vec<u8>, Error> {
        let name: FieldStr = record.type_name().into();
        if !self.is_registered(&name) {
            return Err(EncodeError::Unregistered { name }.into());
        }
        if let Some(missing) = record.missing_field() {
            let field: FieldStr = missing.into();
            return Err(EncodeError::Missing { field }.into());
        }

        let body = encoder::encode_body(record)?;
        let order = record.schema().byte_order();

        let headers = self.inner.headers.read().clone();
        let footers = self.inner.footers.read().clone();
        let header_bytes = Self::serialize_auto(&headers, record, &body, order)?;
        let footer_bytes = Self::serialize_auto(&footers, record, &body, order)?;

        let name_bytes = name.as_bytes();
        let mut out = Vec::with_capacity(
            TYPE_PREFIX_SIZE + name_bytes.len() + header_bytes.len() + body.len() + footer_bytes.len(),
        );
        out.extend_from_slice(&(name_bytes.len() as u16).to_be_bytes());
        out.extend_from_slice(name_bytes);
        out.extend_from_slice(&header_bytes);
        out.extend_from_slice(&body);
        out.extend_from_slice(&footer_bytes);

        if out.len() > self.inner.config.max_message_size {
            return Err(EncodeError::TooLarge {
                size: out.len(),
                max_size: self.inner.config.max_message_size,
            }
            .into());
        }
        Ok(out)
    }

    fn serialize_auto(
        fields: &AutoFields,
        record: &Record,
        body: &[u8],
        order: ByteOrder,
    ) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::new();
        for (name, spec) in fields {
            let value = match spec.source() {
                Some(ValueSource::Static(constant)) => constant.clone(),
                Some(source) => {
                    encoder::eval_source(source, record, Some(body)).map_err(|e| e.in_field(name))?
                }
                None => continue,
            };
            encoder::write_field_value(name, spec, &value, order, record, &mut out)?;
        }
        Ok(out)
    }

    /// Decodes one message from `data`, reassembling fragments per source.
    ///
    /// Any bytes previously buffered for `source_id` are prepended first.
    /// Returns `None` when the input is still a plausible fragment (the
    /// accumulated bytes are cached; call again with the next read).
    /// Otherwise returns the decoded message, or the quarantined
    /// [`InvalidMessage`], together with the unconsumed remainder.
    pub fn decode(&self, data: &[u8], source_id: &str) -> Option<(Decoded, Vec<u8>)> {
        let mut buf = self
            .inner
            .pending
            .lock()
            .remove(source_id)
            .unwrap_or_default();
        buf.extend_from_slice(data);

        if buf.len() > self.inner.config.max_message_size {
            let size = buf.len();
            let max_size = self.inner.config.max_message_size;
            return Some(self.quarantine(buf, DecodeError::TooLarge { size, max_size }, None, None));
        }

        if buf.len() < TYPE_PREFIX_SIZE {
            return self.stash(source_id, buf);
        }
        let type_len = usize::from(u16::from_be_bytes([buf[0], buf[1]]));
        if buf.len() < TYPE_PREFIX_SIZE + type_len {
            return self.stash(source_id, buf);
        }

        let type_name = match std::str::from_utf8(&buf[TYPE_PREFIX_SIZE..TYPE_PREFIX_SIZE + type_len]) {
            Ok(name) => FieldStr::from(name),
            Err(_) => {
                let error = DecodeError::Utf8 { field: "type".into() };
                return Some(self.quarantine(buf, error, None, None));
            }
        };

        let Some(schema) = self.schema(&type_name) else {
            let error = DecodeError::UnknownType { name: type_name.clone() };
            return Some(self.quarantine(buf, error, Some(type_name), None));
        };

        let headers = self.inner.headers.read().clone();
        let footers = self.inner.footers.read().clone();
        let header_size = Self::auto_size(&headers);
        let footer_size = Self::auto_size(&footers);
        let msg_start = TYPE_PREFIX_SIZE + type_len;

        if buf.len() < msg_start + header_size {
            return self.stash(source_id, buf);
        }

        let body_len = buf.len() - msg_start - header_size;
        let mut record = Record::new(&schema);
        let body_used = match decoder::decode_body_into(&mut record, &buf[msg_start + header_size..])
        {
            Ok(used) => used,
            Err(error) => {
                if error.is_incomplete() || body_len < self.inner.config.incomplete_threshold {
                    return self.stash(source_id, buf);
                }
                return Some(self.quarantine(buf, error, Some(type_name), Some(record)));
            }
        };

        let footer_start = msg_start + header_size + body_used;
        if buf.len() < footer_start + footer_size {
            return self.stash(source_id, buf);
        }

        if header_size + footer_size > 0 {
            // Recompute every auto field from the freshly decoded message
            // and require bit-equality with the wire values.
            let mut reencoded = record.clone();
            let recomputed_body = match encoder::encode_body(&mut reencoded) {
                Ok(body) => body,
                Err(e) => {
                    let error = DecodeError::Validation {
                        field: "body".into(),
                        expected: "re-encodable message".to_string(),
                        got: e.to_string(),
                    };
                    return Some(self.quarantine(buf, error, Some(type_name), Some(record)));
                }
            };

            let order = schema.byte_order();
            let header_slice = &buf[msg_start..msg_start + header_size];
            let footer_slice = &buf[footer_start..footer_start + footer_size];
            if let Err(error) = Self::validate_auto(&headers, header_slice, &record, &recomputed_body, order)
                .and_then(|()| {
                    Self::validate_auto(&footers, footer_slice, &record, &recomputed_body, order)
                })
            {
                return Some(self.quarantine(buf, error, Some(type_name), Some(record)));
            }
        }

        let remainder = buf[footer_start + footer_size..].to_vec();
        Some((Decoded::Message(record), remainder))
    }

    fn validate_auto(
        fields: &AutoFields,
        data: &[u8],
        record: &Record,
        body: &[u8],
        order: ByteOrder,
    ) -> Result<(), DecodeError> {
        let mut offset = 0;
        for (name, spec) in fields {
            let (wire_value, used) = decoder::decode_single(name, spec, &data[offset..], order)?;
            offset += used;

            let expected = match spec.source() {
                Some(ValueSource::Static(constant)) => constant.clone(),
                Some(source) => {
                    encoder::eval_source(source, record, Some(body)).map_err(|e| {
                        DecodeError::Validation {
                            field: name.clone(),
                            expected: format!("<uncomputable: {e}>"),
                            got: format!("{wire_value:?}"),
                        }
                    })?
                }
                None => continue,
            };

            if wire_value != expected {
                return Err(DecodeError::Validation {
                    field: name.clone(),
                    expected: format!("{expected:?}"),
                    got: format!("{wire_value:?}"),
                });
            }
        }
        Ok(())
    }

    fn stash(&self, source_id: &str, buf: BytesMut) -> Option<(Decoded, Vec<u8>)> {
        debug!("buffering {} incomplete bytes from '{source_id}'", buf.len());
        self.inner.pending.lock().insert(source_id.to_string(), buf);
        None
    }

    fn quarantine(
        &self,
        buf: BytesMut,
        error: DecodeError,
        type_name: Option<FieldStr>,
        partial: Option<Record>,
    ) -> (Decoded, Vec<u8>) {
        debug!("quarantining {} bytes: {error}", buf.len());
        (
            Decoded::Invalid(InvalidMessage {
                raw: buf.freeze(),
                error,
                type_name,
                partial,
            }),
            Vec::new(),
        )
    }

    /// Drops any buffered fragment for one source. True when one existed.
    pub fn clear_pending(&self, source_id: &str) -> bool {
        self.inner.pending.lock().remove(source_id).is_some()
    }

    /// Drops every buffered fragment, returning how many were held.
    pub fn clear_all_pending(&self) -> usize {
        let mut pending = self.inner.pending.lock();
        let count = pending.len();
        pending.clear();
        count
    }

    /// Bytes currently buffered for a source.
    pub fn pending_len(&self, source_id: &str) -> usize {
        self.inner
            .pending
            .lock()
            .get(source_id)
            .map_or(0, BytesMut::len)
    }

    fn ensure_sendable(&self, record: &Record) -> Result<(), Error> {
        if !self.is_registered(record.type_name()) {
            let name: FieldStr = record.type_name().into();
            return Err(EncodeError::Unregistered { name }.into());
        }
        if let Some(missing) = record.missing_field() {
            let field: FieldStr = missing.into();
            return Err(EncodeError::Missing { field }.into());
        }
        Ok(())
    }

    /// Schedules `record` to be encoded and handed to `send` every
    /// `interval` until cancelled. Returns the schedule handle.
    pub fn schedule_message(
        &self,
        record: Record,
        interval: Duration,
        send: impl FnMut(&[u8]) + Send + 'static,
    ) -> Result<u64, Error> {
        self.schedule_inner(record, interval, Box::new(send), None)
    }

    /// Like [`Protocol::schedule_message`], with an update hook run before
    /// each tick (refresh a timestamp, bump a counter).
    pub fn schedule_message_with(
        &self,
        record: Record,
        interval: Duration,
        send: impl FnMut(&[u8]) + Send + 'static,
        update: impl FnMut(&mut Record) + Send + 'static,
    ) -> Result<u64, Error> {
        self.schedule_inner(record, interval, Box::new(send), Some(Box::new(update)))
    }

    fn schedule_inner(
        &self,
        record: Record,
        interval: Duration,
        send: SendFn,
        update: Option<UpdateFn>,
    ) -> Result<u64, Error> {
        if interval.is_zero() {
            return Err(SchemaError::InvalidInterval.into());
        }
        self.ensure_sendable(&record)?;
        Ok(self
            .inner
            .scheduler
            .spawn(self.clone(), record, interval, send, update))
    }

    /// Cancels one scheduled message. True when the handle existed.
    pub fn cancel_scheduled(&self, id: u64) -> bool {
        self.inner.scheduler.cancel(id)
    }

    /// Cancels every scheduled message.
    pub fn cancel_all_scheduled(&self) {
        self.inner.scheduler.cancel_all();
    }

    /// Number of live scheduled messages.
    pub fn scheduled_count(&self) -> usize {
        self.inner.scheduler.len()
    }

    /// Registers an auto-reply: when [`Protocol::check_auto_replies`] sees
    /// an incoming message for which `condition` holds, `template` is
    /// encoded and handed to `send`.
    pub fn register_auto_reply(
        &self,
        condition: impl Fn(&Record) -> bool + Send + Sync + 'static,
        template: Record,
        send: impl FnMut(&[u8]) + Send + 'static,
    ) -> Result<u64, Error> {
        self.register_reply_inner(Box::new(condition), template, Box::new(send), None)
    }

    /// Like [`Protocol::register_auto_reply`], with an update hook called
    /// as `(incoming, reply)` before each send.
    pub fn register_auto_reply_with(
        &self,
        condition: impl Fn(&Record) -> bool + Send + Sync + 'static,
        template: Record,
        send: impl FnMut(&[u8]) + Send + 'static,
        update: impl Fn(&Record, &mut Record) + Send + Sync + 'static,
    ) -> Result<u64, Error> {
        self.register_reply_inner(
            Box::new(condition),
            template,
            Box::new(send),
            Some(Box::new(update)),
        )
    }

    fn register_reply_inner(
        &self,
        condition: ConditionFn,
        template: Record,
        send: SendFn,
        update: Option<ReplyUpdateFn>,
    ) -> Result<u64, Error> {
        self.ensure_sendable(&template)?;
        Ok(self.inner.replies.register(condition, template, send, update))
    }

    /// Removes one auto-reply registration. True when it existed.
    pub fn unregister_auto_reply(&self, id: u64) -> bool {
        self.inner.replies.unregister(id)
    }

    /// Removes every auto-reply registration.
    pub fn unregister_all_auto_replies(&self) {
        self.inner.replies.clear();
    }

    /// Number of live auto-reply registrations.
    pub fn auto_reply_count(&self) -> usize {
        self.inner.replies.len()
    }

    /// Runs every registration against `incoming`, in insertion order, and
    /// returns how many replies were sent. Per-registration failures are
    /// logged and do not stop the rest.
    pub fn check_auto_replies(&self, incoming: &Record) -> usize {
        self.inner.replies.check(self, incoming)
    }
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protocol")
            .field("registered", &self.inner.registry.read().len())
            .field("headers", &self.inner.headers.read().len())
            .field("footers", &self.inner.footers.read().len())
            .field("pending_sources", &self.inner.pending.lock().len())
            .field("scheduled", &self.inner.scheduler.len())
            .field("auto_replies", &self.inner.replies.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn ping_schema() -> Arc<Schema> {
        Schema::builder("Ping")
            .field("seq", FieldSpec::u32())
            .build()
            .unwrap()
    }

    #[test]
    fn test_envelope_wire_form() {
        let protocol = Protocol::new();
        let ping = ping_schema();
        protocol.register(&ping).unwrap();

        let mut msg = Record::new(&ping).with("seq", 7u32);
        let wire = protocol.encode(&mut msg).unwrap();
        assert_eq!(wire, b"\x00\x04Ping\x00\x00\x00\x07");
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let protocol = Protocol::new();
        let ping = ping_schema();
        protocol.register(&ping).unwrap();
        assert!(matches!(
            protocol.register(&ping),
            Err(SchemaError::DuplicateMessage { .. })
        ));

        // The same schema registers fine with a second protocol.
        let other = Protocol::new();
        other.register(&ping).unwrap();
    }

    #[test]
    fn test_encode_requires_registration() {
        let protocol = Protocol::new();
        let ping = ping_schema();
        let mut msg = Record::new(&ping).with("seq", 1u32);
        assert!(matches!(
            protocol.encode(&mut msg),
            Err(Error::Encode(EncodeError::Unregistered { .. }))
        ));
    }

    #[test]
    fn test_encode_requires_complete_message() {
        let protocol = Protocol::new();
        let ping = ping_schema();
        protocol.register(&ping).unwrap();
        let mut msg = Record::new(&ping);
        assert!(matches!(
            protocol.encode(&mut msg),
            Err(Error::Encode(EncodeError::Missing { .. }))
        ));
    }

    #[test]
    fn test_round_trip_through_envelope() {
        let protocol = Protocol::new();
        let ping = ping_schema();
        protocol.register(&ping).unwrap();

        let mut msg = Record::new(&ping).with("seq", 99u32);
        let wire = protocol.encode(&mut msg).unwrap();
        let (decoded, remainder) = protocol.decode(&wire, "peer").unwrap();
        let decoded = decoded.into_message().unwrap();
        assert_eq!(decoded, msg);
        assert!(remainder.is_empty());
    }

    #[test]
    fn test_unknown_type_quarantined() {
        let protocol = Protocol::new();
        let (decoded, remainder) = protocol.decode(b"\x00\x04Pong\x00\x00\x00\x07", "peer").unwrap();
        let invalid = decoded.into_invalid().unwrap();
        assert!(matches!(invalid.error(), DecodeError::UnknownType { .. }));
        assert_eq!(invalid.type_name(), Some("Pong"));
        assert!(remainder.is_empty());
        // Quarantine also drops any buffered fragment state.
        assert_eq!(protocol.pending_len("peer"), 0);
    }

    #[test]
    fn test_fragment_reassembly() {
        let protocol = Protocol::new();
        let ping = ping_schema();
        protocol.register(&ping).unwrap();

        let mut msg = Record::new(&ping).with("seq", 7u32);
        let wire = protocol.encode(&mut msg).unwrap();

        assert!(protocol.decode(&wire[..1], "s1").is_none());
        assert_eq!(protocol.pending_len("s1"), 1);
        let (decoded, remainder) = protocol.decode(&wire[1..], "s1").unwrap();
        assert_eq!(decoded.into_message().unwrap(), msg);
        assert!(remainder.is_empty());
        assert_eq!(protocol.pending_len("s1"), 0);
    }

    #[test]
    fn test_distinct_sources_do_not_interfere() {
        let protocol = Protocol::new();
        let ping = ping_schema();
        protocol.register(&ping).unwrap();

        let mut msg = Record::new(&ping).with("seq", 1u32);
        let wire = protocol.encode(&mut msg).unwrap();

        assert!(protocol.decode(&wire[..3], "a").is_none());
        // A whole message from another source decodes independently.
        let (decoded, _) = protocol.decode(&wire, "b").unwrap();
        assert!(!decoded.is_invalid());
        assert_eq!(protocol.pending_len("a"), 3);
        assert!(protocol.clear_pending("a"));
        assert!(!protocol.clear_pending("a"));
    }

    #[test]
    fn test_two_messages_in_one_buffer() {
        let protocol = Protocol::new();
        let ping = ping_schema();
        protocol.register(&ping).unwrap();

        let mut first = Record::new(&ping).with("seq", 1u32);
        let mut second = Record::new(&ping).with("seq", 2u32);
        let mut wire = protocol.encode(&mut first).unwrap();
        wire.extend(protocol.encode(&mut second).unwrap());

        let (decoded, remainder) = protocol.decode(&wire, "peer").unwrap();
        assert_eq!(decoded.into_message().unwrap(), first);
        let (decoded, remainder) = protocol.decode(&remainder, "peer").unwrap();
        assert_eq!(decoded.into_message().unwrap(), second);
        assert!(remainder.is_empty());
    }

    #[test]
    fn test_size_of_body_header() {
        let protocol = Protocol::new();
        let frame = Schema::builder("Frame")
            .field("data", FieldSpec::bytes())
            .build()
            .unwrap();
        protocol.register(&frame).unwrap();
        protocol
            .set_headers(vec![("size", FieldSpec::u32().size_of("body"))])
            .unwrap();

        let mut msg = Record::new(&frame).with("data", b"ABC".to_vec());
        let wire = protocol.encode(&mut msg).unwrap();
        assert_eq!(wire, b"\x00\x05Frame\x00\x00\x00\x07\x00\x00\x00\x03ABC");

        let (decoded, _) = protocol.decode(&wire, "peer").unwrap();
        assert_eq!(decoded.into_message().unwrap(), msg);
    }

    #[test]
    fn test_crc_footer_detects_tamper() {
        let protocol = Protocol::new();
        let frame = Schema::builder("Frame")
            .field("data", FieldSpec::bytes())
            .build()
            .unwrap();
        protocol.register(&frame).unwrap();
        protocol
            .set_footers(vec![(
                "crc",
                FieldSpec::u32().compute(|ctx| Ok(Value::UInt(u64::from(crc32(ctx.payload()))))),
            )])
            .unwrap();

        let mut msg = Record::new(&frame).with("data", b"payload-bytes-here".to_vec());
        let wire = protocol.encode(&mut msg).unwrap();

        let (decoded, _) = protocol.decode(&wire, "ok").unwrap();
        assert!(!decoded.is_invalid());

        // Flip one payload byte; the recomputed CRC must disagree.
        let mut tampered = wire.clone();
        let last = tampered.len() - 5;
        tampered[last] ^= 0x01;
        let (decoded, _) = protocol.decode(&tampered, "bad").unwrap();
        let invalid = decoded.into_invalid().unwrap();
        assert!(matches!(invalid.error(), DecodeError::Validation { .. }));
        assert_eq!(invalid.type_name(), Some("Frame"));
    }

    #[test]
    fn test_static_footer_marker() {
        let protocol = Protocol::new();
        let ping = ping_schema();
        protocol.register(&ping).unwrap();
        protocol
            .set_footers(vec![("end", FieldSpec::u16().static_value(0xFFFFu16))])
            .unwrap();

        let mut msg = Record::new(&ping).with("seq", 5u32);
        let wire = protocol.encode(&mut msg).unwrap();
        assert_eq!(&wire[wire.len() - 2..], &[0xFF, 0xFF]);

        let mut tampered = wire.clone();
        let last = tampered.len() - 1;
        tampered[last] = 0xFE;
        let (decoded, _) = protocol.decode(&tampered, "peer").unwrap();
        assert!(decoded.is_invalid());
    }

    #[test]
    fn test_variable_size_auto_field_rejected() {
        let protocol = Protocol::new();
        assert!(matches!(
            protocol.set_headers(vec![("bad", FieldSpec::string().length_of("x"))]),
            Err(SchemaError::UnsupportedAutoField { .. })
        ));
        assert!(matches!(
            protocol.set_headers(vec![("bad", FieldSpec::u32())]),
            Err(SchemaError::UnsupportedAutoField { .. })
        ));
    }

    #[test]
    fn test_oversized_input_quarantined() {
        let protocol = Protocol::with_config(Config {
            max_message_size: 16,
            ..Config::default()
        });
        let (decoded, _) = protocol.decode(&[0u8; 32], "peer").unwrap();
        let invalid = decoded.into_invalid().unwrap();
        assert!(matches!(invalid.error(), DecodeError::TooLarge { .. }));
    }

    #[test]
    fn test_partial_fields_preserved_in_quarantine() {
        let protocol = Protocol::new();
        let pair = Schema::builder("Pair")
            .field("a", FieldSpec::u32())
            .field("magic", FieldSpec::u64().static_value(7u64))
            .build()
            .unwrap();
        protocol.register(&pair).unwrap();

        // Valid first field, wrong static: long enough not to buffer.
        let mut wire = b"\x00\x04Pair".to_vec();
        wire.extend_from_slice(&[0, 0, 0, 9]);
        wire.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 8]);
        let (decoded, _) = protocol.decode(&wire, "peer").unwrap();
        let invalid = decoded.into_invalid().unwrap();
        assert!(matches!(invalid.error(), DecodeError::StaticMismatch { .. }));
        let partial = invalid.partial_fields().unwrap();
        assert_eq!(partial.get("a"), Some(&Value::UInt(9)));
    }
}
