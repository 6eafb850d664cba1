//! Argument codec for the codec region.
//!
//! Layout: one count byte, one tag byte per value, then every value in order. Numbers
//! and integers take 8 bytes, booleans 4, text a 4-byte byte length followed by the raw
//! UTF-8 bytes. Multi-byte fields follow the negotiated [`ByteOrder`].

use crate::error::ChannelError;
use crate::region::IoRegion;
use std::fmt;
use std::sync::Arc;

const TAG_NUMBER: u8 = 1;
const TAG_BIGINT: u8 = 2;
const TAG_BOOL: u8 = 3;
const TAG_TEXT: u8 = 4;

/// Largest argument list the one-byte count can describe.
pub const MAX_VALUES: usize = u8::MAX as usize;

/// One argument or return value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    BigInt(i64),
    Bool(bool),
    Text(String),
}

impl Value {
    const fn tag(&self) -> u8 {
        match self {
            Self::Number(_) => TAG_NUMBER,
            Self::BigInt(_) => TAG_BIGINT,
            Self::Bool(_) => TAG_BOOL,
            Self::Text(_) => TAG_TEXT,
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            Self::Number(_) | Self::BigInt(_) => 8,
            Self::Bool(_) => 4,
            Self::Text(text) => 4 + text.len(),
        }
    }

    /// Integral view; whole-valued numbers count as integers.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::BigInt(v) => Some(*v),
            Self::Number(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::BigInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Booleans, or numbers treated as truthy when non-zero.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            Self::Number(_) | Self::BigInt(_) => self.as_i64().map(|v| v != 0),
            Self::Text(_) => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(v) => write!(f, "{v}"),
            Self::BigInt(v) => write!(f, "{v}n"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::BigInt(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::BigInt(i64::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Byte order of multi-byte codec fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl ByteOrder {
    #[must_use]
    pub const fn from_little_endian(little_endian: bool) -> Self {
        if little_endian { Self::Little } else { Self::Big }
    }

    /// The byte order of the machine running this code.
    #[must_use]
    pub const fn native() -> Self {
        Self::from_little_endian(cfg!(target_endian = "little"))
    }

    const fn i32_bytes(self, v: i32) -> [u8; 4] {
        match self {
            Self::Little => v.to_le_bytes(),
            Self::Big => v.to_be_bytes(),
        }
    }

    const fn i64_bytes(self, v: i64) -> [u8; 8] {
        match self {
            Self::Little => v.to_le_bytes(),
            Self::Big => v.to_be_bytes(),
        }
    }

    const fn read_i32(self, b: [u8; 4]) -> i32 {
        match self {
            Self::Little => i32::from_le_bytes(b),
            Self::Big => i32::from_be_bytes(b),
        }
    }

    const fn read_i64(self, b: [u8; 8]) -> i64 {
        match self {
            Self::Little => i64::from_le_bytes(b),
            Self::Big => i64::from_be_bytes(b),
        }
    }
}

/// Writes `values` into `buf`, returning the number of bytes used.
///
/// # Errors
/// [`ChannelError::Overflow`] when the list has more than [`MAX_VALUES`] entries or does
/// not fit in `buf`. Nothing is written in that case.
pub fn encode(buf: &mut [u8], order: ByteOrder, values: &[Value]) -> Result<usize, ChannelError> {
    if values.len() > MAX_VALUES {
        return Err(ChannelError::overflow(format!(
            "{} values exceed the one-byte count",
            values.len()
        )));
    }
    let needed = 1 + values.len() + values.iter().map(Value::encoded_len).sum::<usize>();
    if needed > buf.len() {
        return Err(ChannelError::overflow(format!(
            "payload needs {needed} bytes, region holds {}",
            buf.len()
        )));
    }

    buf[0] = values.len() as u8;
    for (slot, value) in buf[1..=values.len()].iter_mut().zip(values) {
        *slot = value.tag();
    }

    let mut at = 1 + values.len();
    let mut put = |bytes: &[u8]| {
        buf[at..at + bytes.len()].copy_from_slice(bytes);
        at += bytes.len();
    };
    for value in values {
        match value {
            Value::Number(v) => put(&order.i64_bytes(v.to_bits() as i64)),
            Value::BigInt(v) => put(&order.i64_bytes(*v)),
            Value::Bool(v) => put(&order.i32_bytes(i32::from(*v))),
            Value::Text(text) => {
                put(&order.i32_bytes(text.len() as i32));
                put(text.as_bytes());
            },
        }
    }
    Ok(needed)
}

/// Reads the value list stored at the start of `buf`.
///
/// # Errors
/// [`ChannelError::UnknownTag`] for a tag outside `1..=4`, [`ChannelError::Malformed`]
/// when the layout runs past `buf` or text is not UTF-8.
pub fn decode(buf: &[u8], order: ByteOrder) -> Result<Vec<Value>, ChannelError> {
    let Some(&count) = buf.first() else {
        return Ok(Vec::new());
    };
    let count = usize::from(count);
    let tags = buf
        .get(1..=count)
        .ok_or_else(|| ChannelError::malformed(format!("{count} tags announced")))?;

    let mut cursor = Cursor { buf, at: 1 + count };
    let mut values = Vec::with_capacity(count);
    for (index, &tag) in tags.iter().enumerate() {
        let value = match tag {
            TAG_NUMBER => Value::Number(f64::from_bits(order.read_i64(cursor.take()?) as u64)),
            TAG_BIGINT => Value::BigInt(order.read_i64(cursor.take()?)),
            TAG_BOOL => Value::Bool(order.read_i32(cursor.take()?) != 0),
            TAG_TEXT => {
                let len = order.read_i32(cursor.take()?);
                let len = usize::try_from(len)
                    .map_err(|_| ChannelError::malformed(format!("negative text length {len}")))?;
                let bytes = cursor.slice(len)?;
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| ChannelError::malformed(format!("text argument {index}: {e}")))?;
                Value::Text(text.to_owned())
            },
            tag => return Err(ChannelError::UnknownTag { tag, index, context: None }),
        };
        values.push(value);
    }
    Ok(values)
}

struct Cursor<'a> {
    buf: &'a [u8],
    at: usize,
}

impl<'a> Cursor<'a> {
    fn slice(&mut self, len: usize) -> Result<&'a [u8], ChannelError> {
        let end = self.at.checked_add(len).filter(|end| *end <= self.buf.len()).ok_or_else(|| {
            ChannelError::malformed(format!("{len} bytes wanted at offset {}", self.at))
        })?;
        let bytes = &self.buf[self.at..end];
        self.at = end;
        Ok(bytes)
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], ChannelError> {
        let mut out = [0; N];
        out.copy_from_slice(self.slice(N)?);
        Ok(out)
    }
}

/// The codec bound to one [`IoRegion`] and byte order.
#[derive(Debug, Clone)]
pub struct Codec {
    region: Arc<IoRegion>,
    order: ByteOrder,
}

impl Codec {
    #[must_use]
    pub const fn new(region: Arc<IoRegion>, order: ByteOrder) -> Self {
        Self { region, order }
    }

    #[must_use]
    pub const fn byte_order(&self) -> ByteOrder {
        self.order
    }

    #[must_use]
    pub const fn region(&self) -> &Arc<IoRegion> {
        &self.region
    }

    /// Replaces the codec region's content; an empty list writes a zero count.
    ///
    /// # Errors
    /// See [`encode`].
    pub fn serialize(&self, values: &[Value]) -> Result<(), ChannelError> {
        self.region.with_s11n(|buf| encode(buf, self.order, values)).map(|_| ())
    }

    /// Reads the codec region; `clear` zeroes the count byte afterwards.
    ///
    /// # Errors
    /// See [`decode`]. The count byte is cleared even when decoding fails.
    pub fn deserialize(&self, clear: bool) -> Result<Vec<Value>, ChannelError> {
        self.region.with_s11n(|buf| {
            let values = decode(buf, self.order);
            if clear && let Some(count) = buf.first_mut() {
                *count = 0;
            }
            values
        })
    }
}
