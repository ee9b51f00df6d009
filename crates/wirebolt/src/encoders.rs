//! Pluggable field codecs for user-supplied encodings.
//!
//! A field whose spec names one of these takes its wire form entirely from
//! the codec; the framework adds no extra length prefix. Codecs that report
//! a [`FieldEncoder::fixed_size`] may also be used in automatic protocol
//! headers and footers.

use crate::bits::{BitReader, BitWriter, sign_extend, signed_in_range, to_twos_complement, unsigned_in_range};
use crate::error::{DecodeError, EncodeError};
use crate::scalar::{ByteOrder, LENGTH_PREFIX_SIZE, get_uint, put_uint};
use crate::value::Value;
use smallvec::SmallVec;
use smartstring::{LazyCompact, SmartString};

type FieldStr = SmartString<LazyCompact>;

/// A user-supplied field codec: a matched encode/decode pair.
pub trait FieldEncoder: Send + Sync {
    /// Encodes `value` to its wire form.
    fn encode(&self, value: &Value, order: ByteOrder) -> Result<Vec<u8>, EncodeError>;

    /// Decodes one value from the front of `data`, returning it together
    /// with the number of bytes consumed.
    fn decode(&self, data: &[u8], order: ByteOrder) -> Result<(Value, usize), DecodeError>;

    /// Wire size when statically known. Required for use in automatic
    /// headers and footers.
    fn fixed_size(&self) -> Option<usize> {
        None
    }
}

fn shape_error(expected: &str, value: &Value) -> EncodeError {
    EncodeError::Type {
        field: "".into(),
        detail: format!("expected {expected}, got {}", value.kind_name()),
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

/// Fixed-point number codec: multiplies by `2^frac_bits` and stores the
/// result as an `(int_bits + frac_bits)`-bit integer.
#[derive(Debug, Clone, Copy)]
pub struct FixedPointCodec {
    int_bits: u32,
    frac_bits: u32,
    signed: bool,
}

impl FixedPointCodec {
    /// Creates a codec with the given integer/fraction split.
    pub fn new(int_bits: u32, frac_bits: u32, signed: bool) -> Self {
        Self { int_bits, frac_bits, signed }
    }

    fn total_bits(&self) -> u32 {
        self.int_bits + self.frac_bits
    }

    fn byte_size(&self) -> usize {
        (self.total_bits() as usize).div_ceil(8)
    }

    fn scale(&self) -> f64 {
        f64::from(2u32).powi(self.frac_bits as i32)
    }
}

impl FieldEncoder for FixedPointCodec {
    fn encode(&self, value: &Value, order: ByteOrder) -> Result<Vec<u8>, EncodeError> {
        let v = value.as_f64().ok_or_else(|| shape_error("number", value))?;
        let fixed = (v * self.scale()) as i64;

        let in_range = if self.signed {
            signed_in_range(fixed, self.total_bits())
        } else {
            fixed >= 0 && unsigned_in_range(fixed as u64, self.total_bits())
        };
        if !in_range {
            return Err(EncodeError::Range {
                field: "".into(),
                detail: format!(
                    "value {v} out of range for {}.{} fixed point",
                    self.int_bits, self.frac_bits
                ),
            });
        }

        let mut out = Vec::with_capacity(self.byte_size());
        let pattern = to_twos_complement(fixed, (self.byte_size() * 8) as u32);
        put_uint(&mut out, pattern, self.byte_size(), order);
        Ok(out)
    }

    fn decode(&self, data: &[u8], order: ByteOrder) -> Result<(Value, usize), DecodeError> {
        let size = self.byte_size();
        need(data, size)?;
        let raw = get_uint(data, size, order);
        let fixed = if self.signed {
            sign_extend(raw, (size * 8) as u32) as f64
        } else {
            raw as f64
        };
        Ok((Value::F64(fixed / self.scale()), size))
    }

    fn fixed_size(&self) -> Option<usize> {
        Some(self.byte_size())
    }
}

/// Named-constant codec: an unsigned integer of `size` bytes restricted to
/// a declared variant set.
///
/// Encoding accepts either the numeric value or a variant name; decoding
/// validates membership and yields the numeric value.
#[derive(Debug, Clone)]
pub struct EnumCodec {
    size: usize,
    variants: SmallVec<[(FieldStr, u64); 8]>,
}

impl EnumCodec {
    /// Creates a codec over the given `(name, value)` constants.
    pub fn new<'a>(size: usize, variants: impl IntoIterator<Item = (&'a str, u64)>) -> Self {
        Self {
            size,
            variants: variants
                .into_iter()
                .map(|(name, value)| (FieldStr::from(name), value))
                .collect(),
        }
    }

    /// Wire size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Numeric value of a named variant.
    pub fn value_of(&self, name: &str) -> Option<u64> {
        self.variants
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    /// Name of a numeric value, when declared.
    pub fn name_of(&self, value: u64) -> Option<&str> {
        self.variants
            .iter()
            .find(|(_, v)| *v == value)
            .map(|(n, _)| n.as_str())
    }

    fn contains(&self, value: u64) -> bool {
        self.variants.iter().any(|(_, v)| *v == value)
    }
}

impl FieldEncoder for EnumCodec {
    fn encode(&self, value: &Value, order: ByteOrder) -> Result<Vec<u8>, EncodeError> {
        let numeric = match value {
            Value::Str(name) => self.value_of(name).ok_or_else(|| EncodeError::Range {
                field: "".into(),
                detail: format!("'{name}' is not a declared enum variant"),
            })?,
            other => other.as_u64().ok_or_else(|| shape_error("enum value", other))?,
        };
        if !self.contains(numeric) {
            return Err(EncodeError::Range {
                field: "".into(),
                detail: format!("{numeric} is not a declared enum value"),
            });
        }
        if !unsigned_in_range(numeric, (self.size * 8) as u32) {
            return Err(EncodeError::Range {
                field: "".into(),
                detail: format!("enum value {numeric} does not fit {} bytes", self.size),
            });
        }
        let mut out = Vec::with_capacity(self.size);
        put_uint(&mut out, numeric, self.size, order);
        Ok(out)
    }

    fn decode(&self, data: &[u8], order: ByteOrder) -> Result<(Value, usize), DecodeError> {
        need(data, self.size)?;
        let raw = get_uint(data, self.size, order);
        if !self.contains(raw) {
            return Err(DecodeError::Range {
                field: "".into(),
                detail: format!("{raw} is not a declared enum value"),
            });
        }
        Ok((Value::UInt(raw), self.size))
    }

    fn fixed_size(&self) -> Option<usize> {
        Some(self.size)
    }
}

/// Run-length codec: a 4-byte length prefix, then `(count, value)` byte
/// pairs. Decoding expands the runs back into the original payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunLengthCodec;

impl RunLengthCodec {
    /// Creates the codec.
    pub fn new() -> Self {
        Self
    }
}

impl FieldEncoder for RunLengthCodec {
    fn encode(&self, value: &Value, order: ByteOrder) -> Result<Vec<u8>, EncodeError> {
        let payload = value.as_bytes().ok_or_else(|| shape_error("bytes", value))?;

        let mut runs = Vec::new();
        let mut i = 0;
        while i < payload.len() {
            let current = payload[i];
            let mut count = 1usize;
            while i + count < payload.len() && payload[i + count] == current && count < 255 {
                count += 1;
            }
            runs.push(count as u8);
            runs.push(current);
            i += count;
        }

        let len = u32::try_from(runs.len()).map_err(|_| EncodeError::Range {
            field: "".into(),
            detail: format!("run-length payload of {} bytes exceeds the u32 prefix", runs.len()),
        })?;
        let mut out = Vec::with_capacity(LENGTH_PREFIX_SIZE + runs.len());
        put_uint(&mut out, u64::from(len), LENGTH_PREFIX_SIZE, order);
        out.extend_from_slice(&runs);
        Ok(out)
    }

    fn decode(&self, data: &[u8], order: ByteOrder) -> Result<(Value, usize), DecodeError> {
        need(data, LENGTH_PREFIX_SIZE)?;
        let len = get_uint(data, LENGTH_PREFIX_SIZE, order) as usize;
        need(data, LENGTH_PREFIX_SIZE + len)?;

        let runs = &data[LENGTH_PREFIX_SIZE..LENGTH_PREFIX_SIZE + len];
        let mut payload = Vec::new();
        let mut i = 0;
        while i + 1 < runs.len() {
            let count = runs[i] as usize;
            let value = runs[i + 1];
            payload.extend(std::iter::repeat_n(value, count));
            i += 2;
        }
        Ok((Value::Bytes(payload), LENGTH_PREFIX_SIZE + len))
    }
}

/// Packed 7-bit ASCII codec: a 2-byte character count, then the characters
/// at seven bits each. Eight characters fit in seven bytes.
///
/// Characters are masked to their low seven bits, matching the wire format
/// this codec interoperates with; feed it ASCII.
#[derive(Debug, Clone, Copy, Default)]
pub struct SevenBitAsciiCodec;

impl SevenBitAsciiCodec {
    /// Creates the codec.
    pub fn new() -> Self {
        Self
    }
}

impl FieldEncoder for SevenBitAsciiCodec {
    fn encode(&self, value: &Value, order: ByteOrder) -> Result<Vec<u8>, EncodeError> {
        let text = value.as_str().ok_or_else(|| shape_error("str", value))?;
        let count = text.chars().count();
        let count = u16::try_from(count).map_err(|_| EncodeError::Range {
            field: "".into(),
            detail: format!("string of {count} characters exceeds the u16 count prefix"),
        })?;

        let mut out = Vec::new();
        put_uint(&mut out, u64::from(count), 2, order);

        let mut writer = BitWriter::new();
        for c in text.chars() {
            writer.pack(u64::from(c as u32 & 0x7F), 7);
        }
        out.extend_from_slice(&writer.finish());
        Ok(out)
    }

    fn decode(&self, data: &[u8], order: ByteOrder) -> Result<(Value, usize), DecodeError> {
        need(data, 2)?;
        let count = get_uint(data, 2, order) as usize;
        let packed_len = (count * 7).div_ceil(8);
        need(data, 2 + packed_len)?;

        let mut reader = BitReader::new(&data[2..2 + packed_len]);
        let mut text = String::with_capacity(count);
        for _ in 0..count {
            let raw = reader.unpack(7)?;
            // 7-bit values are always valid scalar codepoints.
            if let Some(c) = char::from_u32(raw as u32) {
                text.push(c);
            }
        }
        Ok((Value::Str(text), 2 + packed_len))
    }
}
