//! CBOR encoding and decoding for the CTAP2 wire format
//!
//! CTAP2 only needs a small, definite-length subset of CBOR: unsigned and
//! negative integers, byte and text strings, booleans, null, arrays and
//! maps. Both halves of the codec are cursors over caller-owned buffers:
//!
//! - [`Encoder`] appends to a fixed `&mut [u8]`. A write that does not fit
//!   fails with [`CborError::Overflow`] before touching the buffer, so
//!   earlier items stay intact but the message as a whole must be dropped.
//! - [`Decoder`] reads from a `&[u8]` and hands out borrowed slices for
//!   byte and text strings. Declared lengths are checked against the
//!   remaining input before any slice is taken.
//!
//! Unknown map entries are consumed with [`Decoder::skip`], whose recursion
//! is bounded by [`MAX_NESTING_DEPTH`].
//!
//! Map keys are written in the order the caller emits them; callers emit
//! them in CTAP2 canonical order (integers ascending, positive before
//! negative, text keys shortest first).

use core::fmt;

use crate::status::StatusCode;

/// Deepest container nesting accepted by [`Decoder::skip`]
pub const MAX_NESTING_DEPTH: usize = 16;

const ADDITIONAL_U8: u8 = 24;
const ADDITIONAL_U16: u8 = 25;
const ADDITIONAL_U32: u8 = 26;
const ADDITIONAL_U64: u8 = 27;

const SIMPLE_FALSE: u8 = 20;
const SIMPLE_TRUE: u8 = 21;
const SIMPLE_NULL: u8 = 22;

/// Codec failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CborError {
    /// Output buffer too small, or a declared length runs past the input
    Overflow,
    /// Wrong major type, reserved additional info, or malformed UTF-8
    Invalid,
    /// Containers nested deeper than [`MAX_NESTING_DEPTH`]
    DepthExceeded,
}

impl fmt::Display for CborError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overflow => write!(f, "CBOR buffer overflow"),
            Self::Invalid => write!(f, "Invalid CBOR"),
            Self::DepthExceeded => write!(f, "CBOR nesting exceeds {}", MAX_NESTING_DEPTH),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CborError {}

/// Any decode failure aborts the command as malformed input
impl From<CborError> for StatusCode {
    fn from(_: CborError) -> Self {
        StatusCode::InvalidCbor
    }
}

/// Result type for codec operations
pub type Result<T> = core::result::Result<T, CborError>;

/// CBOR major types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MajorType {
    Unsigned = 0,
    Negative = 1,
    Bytes = 2,
    Text = 3,
    Array = 4,
    Map = 5,
    Tag = 6,
    Simple = 7,
}

impl MajorType {
    fn from_initial(initial: u8) -> Self {
        match initial >> 5 {
            0 => Self::Unsigned,
            1 => Self::Negative,
            2 => Self::Bytes,
            3 => Self::Text,
            4 => Self::Array,
            5 => Self::Map,
            6 => Self::Tag,
            _ => Self::Simple,
        }
    }
}

/// Append-only CBOR writer over a fixed buffer
pub struct Encoder<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> Encoder<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, len: 0 }
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The encoded message
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Write a head plus `payload` only if both fit
    fn item(&mut self, major: MajorType, value: u64, payload: &[u8]) -> Result<&mut Self> {
        let mut head = [0u8; 9];
        let major = (major as u8) << 5;
        let head_len = if value < u64::from(ADDITIONAL_U8) {
            head[0] = major | value as u8;
            1
        } else if value <= 0xFF {
            head[0] = major | ADDITIONAL_U8;
            head[1] = value as u8;
            2
        } else if value <= 0xFFFF {
            head[0] = major | ADDITIONAL_U16;
            head[1..3].copy_from_slice(&(value as u16).to_be_bytes());
            3
        } else if value <= 0xFFFF_FFFF {
            head[0] = major | ADDITIONAL_U32;
            head[1..5].copy_from_slice(&(value as u32).to_be_bytes());
            5
        } else {
            head[0] = major | ADDITIONAL_U64;
            head[1..9].copy_from_slice(&value.to_be_bytes());
            9
        };

        let total = head_len + payload.len();
        if self.buf.len() - self.len < total {
            return Err(CborError::Overflow);
        }
        self.buf[self.len..self.len + head_len].copy_from_slice(&head[..head_len]);
        self.len += head_len;
        self.buf[self.len..self.len + payload.len()].copy_from_slice(payload);
        self.len += payload.len();
        Ok(self)
    }

    pub fn unsigned(&mut self, value: u64) -> Result<&mut Self> {
        self.item(MajorType::Unsigned, value, &[])
    }

    /// Signed integer, picking the unsigned or negative major type
    pub fn int(&mut self, value: i64) -> Result<&mut Self> {
        if value >= 0 {
            self.item(MajorType::Unsigned, value as u64, &[])
        } else {
            // -1 - n without overflowing at i64::MIN
            self.item(MajorType::Negative, !(value as u64), &[])
        }
    }

    pub fn bytes(&mut self, value: &[u8]) -> Result<&mut Self> {
        self.item(MajorType::Bytes, value.len() as u64, value)
    }

    pub fn text(&mut self, value: &str) -> Result<&mut Self> {
        self.item(MajorType::Text, value.len() as u64, value.as_bytes())
    }

    pub fn bool(&mut self, value: bool) -> Result<&mut Self> {
        let simple = if value { SIMPLE_TRUE } else { SIMPLE_FALSE };
        self.item(MajorType::Simple, u64::from(simple), &[])
    }

    pub fn null(&mut self) -> Result<&mut Self> {
        self.item(MajorType::Simple, u64::from(SIMPLE_NULL), &[])
    }

    /// Array header; the caller writes `len` items next
    pub fn array(&mut self, len: usize) -> Result<&mut Self> {
        self.item(MajorType::Array, len as u64, &[])
    }

    /// Map header; the caller writes `len` key/value pairs next
    pub fn map(&mut self, len: usize) -> Result<&mut Self> {
        self.item(MajorType::Map, len as u64, &[])
    }

    /// Splice an already encoded item
    pub fn raw(&mut self, encoded: &[u8]) -> Result<&mut Self> {
        if self.buf.len() - self.len < encoded.len() {
            return Err(CborError::Overflow);
        }
        self.buf[self.len..self.len + encoded.len()].copy_from_slice(encoded);
        self.len += encoded.len();
        Ok(self)
    }
}

/// Read-only CBOR cursor
#[derive(Clone)]
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Input bytes not consumed yet
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Major type of the next item, without consuming it
    pub fn peek(&self) -> Result<MajorType> {
        self.data
            .get(self.pos)
            .map(|&initial| MajorType::from_initial(initial))
            .ok_or(CborError::Overflow)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(CborError::Overflow);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Decode one head: `(major type, additional info, argument)`
    fn head(&mut self) -> Result<(MajorType, u8, u64)> {
        let initial = self.take(1)?[0];
        let major = MajorType::from_initial(initial);
        let additional = initial & 0x1F;
        let value = match additional {
            0..=23 => u64::from(additional),
            ADDITIONAL_U8 => u64::from(self.take(1)?[0]),
            ADDITIONAL_U16 => {
                let b = self.take(2)?;
                u64::from(u16::from_be_bytes([b[0], b[1]]))
            }
            ADDITIONAL_U32 => {
                let b = self.take(4)?;
                u64::from(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            }
            ADDITIONAL_U64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(self.take(8)?);
                u64::from_be_bytes(raw)
            }
            // reserved values and indefinite lengths
            _ => return Err(CborError::Invalid),
        };
        Ok((major, additional, value))
    }

    /// Decode a head of the `expected` major type; the cursor does not move on mismatch
    fn expect(&mut self, expected: MajorType) -> Result<u64> {
        let start = self.pos;
        let (major, _, value) = self.head()?;
        if major != expected {
            self.pos = start;
            return Err(CborError::Invalid);
        }
        Ok(value)
    }

    pub fn unsigned(&mut self) -> Result<u64> {
        self.expect(MajorType::Unsigned)
    }

    /// Signed integer from either integer major type
    pub fn int(&mut self) -> Result<i64> {
        let start = self.pos;
        let (major, _, value) = self.head()?;
        let result = match major {
            MajorType::Unsigned => i64::try_from(value).map_err(|_| CborError::Invalid),
            MajorType::Negative => i64::try_from(value)
                .map(|n| -1 - n)
                .map_err(|_| CborError::Invalid),
            _ => Err(CborError::Invalid),
        };
        if result.is_err() {
            self.pos = start;
        }
        result
    }

    /// Byte string borrowed from the input
    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.expect(MajorType::Bytes)?;
        self.take(usize::try_from(len).map_err(|_| CborError::Overflow)?)
    }

    /// Byte string no longer than `capacity`
    pub fn bytes_max(&mut self, capacity: usize) -> Result<&'a [u8]> {
        let value = self.bytes()?;
        if value.len() > capacity {
            return Err(CborError::Overflow);
        }
        Ok(value)
    }

    /// Text string borrowed from the input
    pub fn text(&mut self) -> Result<&'a str> {
        let len = self.expect(MajorType::Text)?;
        let raw = self.take(usize::try_from(len).map_err(|_| CborError::Overflow)?)?;
        core::str::from_utf8(raw).map_err(|_| CborError::Invalid)
    }

    /// Text string no longer than `capacity` bytes
    pub fn text_max(&mut self, capacity: usize) -> Result<&'a str> {
        let value = self.text()?;
        if value.len() > capacity {
            return Err(CborError::Overflow);
        }
        Ok(value)
    }

    pub fn bool(&mut self) -> Result<bool> {
        match self.expect(MajorType::Simple)? {
            v if v == u64::from(SIMPLE_TRUE) => Ok(true),
            v if v == u64::from(SIMPLE_FALSE) => Ok(false),
            _ => Err(CborError::Invalid),
        }
    }

    /// Consume a `null`
    pub fn null(&mut self) -> Result<()> {
        match self.expect(MajorType::Simple)? {
            v if v == u64::from(SIMPLE_NULL) => Ok(()),
            _ => Err(CborError::Invalid),
        }
    }

    /// Array header, returning the item count
    pub fn array(&mut self) -> Result<usize> {
        let count = self.expect(MajorType::Array)?;
        self.check_count(count, 1)
    }

    /// Map header, returning the number of key/value pairs
    pub fn map(&mut self) -> Result<usize> {
        let count = self.expect(MajorType::Map)?;
        self.check_count(count, 2)
    }

    // every item needs at least one byte, so a count past the input is truncated
    fn check_count(&self, count: u64, items_per_entry: u64) -> Result<usize> {
        let needed = count.checked_mul(items_per_entry).ok_or(CborError::Overflow)?;
        if needed > self.remaining() as u64 {
            return Err(CborError::Overflow);
        }
        usize::try_from(count).map_err(|_| CborError::Overflow)
    }

    /// Consume one complete item of any type
    pub fn skip(&mut self) -> Result<()> {
        self.skip_nested(1)
    }

    fn skip_nested(&mut self, depth: usize) -> Result<()> {
        if depth > MAX_NESTING_DEPTH {
            return Err(CborError::DepthExceeded);
        }
        let (major, additional, value) = self.head()?;
        match major {
            MajorType::Unsigned | MajorType::Negative => Ok(()),
            MajorType::Bytes | MajorType::Text => {
                self.take(usize::try_from(value).map_err(|_| CborError::Overflow)?)?;
                Ok(())
            }
            MajorType::Array | MajorType::Map => {
                let per_entry = if major == MajorType::Map { 2 } else { 1 };
                let count = self.check_count(value, per_entry)?;
                for _ in 0..count * per_entry as usize {
                    self.skip_nested(depth + 1)?;
                }
                Ok(())
            }
            // tags are not part of the CTAP2 canonical subset
            MajorType::Tag => Err(CborError::Invalid),
            // simple values and floats carry no payload beyond the head
            MajorType::Simple if additional <= ADDITIONAL_U64 => Ok(()),
            MajorType::Simple => Err(CborError::Invalid),
        }
    }

    /// Consume one item and return its encoded bytes
    pub fn raw_item(&mut self) -> Result<&'a [u8]> {
        let start = self.pos;
        self.skip()?;
        Ok(&self.data[start..self.pos])
    }
}
