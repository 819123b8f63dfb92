//! # Fetchpack
//!
//! A small, bounded byte codec for the RPC stack.
//!
//! ## Philosophy
//!
//! - **Ordered**: An `Encoder` is an append-only byte sink; a `Decoder` is a
//!   sequential, bounds-checked byte source. Nothing is ever overwritten.
//! - **Schema-free**: The wire carries no tags. Both peers agree on the order
//!   and types of values through the `Pack`/`Unpack` traits.
//! - **Portable**: Peers may differ in native endianness, so every multi-byte
//!   value crosses the wire in a single canonical order.
//!
//! ## Format
//!
//! - **Scalars**: `[Data: N]`
//! - **Blobs**: `[Len: u32][Data: Len]`
//! - **Sequences**: `[Count: u32][Item]*`
//!
//! All integers are Big-Endian.

mod pack;

#[cfg(test)]
mod tests;

pub use pack::Bytes;
pub use pack::Pack;
pub use pack::Unpack;

/// Fetchpack serialization and deserialization errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Buffer exhausted while reading.
    UnexpectedEnd { wanted: usize, remaining: usize },
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// A `char` was decoded from an invalid scalar value.
    InvalidChar(u32),
    /// A `bool` byte other than 0 or 1.
    InvalidBool(u8),
    /// An `Option` discriminant other than 0 or 1.
    InvalidOption(u8),
    /// Blob or sequence length exceeds `u32::MAX`.
    TooLarge(usize),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::UnexpectedEnd { wanted, remaining } => {
                write!(f, "Unexpected end of buffer: wanted {} bytes, {} remaining", wanted, remaining)
            }
            Error::InvalidChar(v) => write!(f, "Invalid char scalar: {:#x}", v),
            Error::InvalidBool(b) => write!(f, "Invalid bool byte: {:#04x}", b),
            Error::InvalidOption(b) => write!(f, "Invalid option discriminant: {:#04x}", b),
            Error::TooLarge(n) => write!(f, "Length {} exceeds u32::MAX", n),
            Error::InvalidUtf8 => write!(f, "String data is not valid UTF-8"),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for Fetchpack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An append-only byte sink.
///
/// Values are written in call order. `size()` always equals the number of
/// bytes appended so far.
#[derive(Debug, Clone, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    /// Creates a new encoder with default capacity.
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(256) }
    }

    /// Creates an encoder with room for `n` bytes.
    pub fn with_capacity(n: usize) -> Self {
        Self { buf: Vec::with_capacity(n) }
    }

    /// Reserves room for `n` more bytes without writing anything.
    pub fn allocate(&mut self, n: usize) {
        self.buf.reserve(n);
    }

    /// Appends raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Total bytes written so far.
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    /// Returns a view of the written bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the encoder and returns the final byte vector.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Encodes any `Pack` value.
    pub fn pack<T: Pack + ?Sized>(&mut self, value: &T) -> Result<()> {
        value.pack(self)
    }

    /// Encodes a boolean as a single `0`/`1` byte.
    pub fn bool(&mut self, v: bool) { self.buf.push(v as u8); }

    /// Encodes an unsigned 8-bit integer.
    pub fn u8(&mut self, v: u8) { self.buf.push(v); }
    /// Encodes a signed 8-bit integer.
    pub fn i8(&mut self, v: i8) { self.buf.push(v as u8); }

    /// Encodes an unsigned 16-bit integer (BE).
    pub fn u16(&mut self, v: u16) { self.buf.extend_from_slice(&v.to_be_bytes()); }
    /// Encodes a signed 16-bit integer (BE).
    pub fn i16(&mut self, v: i16) { self.buf.extend_from_slice(&v.to_be_bytes()); }

    /// Encodes an unsigned 32-bit integer (BE).
    pub fn u32(&mut self, v: u32) { self.buf.extend_from_slice(&v.to_be_bytes()); }
    /// Encodes a signed 32-bit integer (BE).
    pub fn i32(&mut self, v: i32) { self.buf.extend_from_slice(&v.to_be_bytes()); }

    /// Encodes an unsigned 64-bit integer (BE).
    pub fn u64(&mut self, v: u64) { self.buf.extend_from_slice(&v.to_be_bytes()); }
    /// Encodes a signed 64-bit integer (BE).
    pub fn i64(&mut self, v: i64) { self.buf.extend_from_slice(&v.to_be_bytes()); }

    /// Encodes a 32-bit float (BE).
    pub fn f32(&mut self, v: f32) { self.buf.extend_from_slice(&v.to_be_bytes()); }
    /// Encodes a 64-bit float (BE).
    pub fn f64(&mut self, v: f64) { self.buf.extend_from_slice(&v.to_be_bytes()); }

    /// Encodes a char as its u32 scalar value (BE).
    pub fn char(&mut self, v: char) { self.u32(v as u32); }

    /// Encodes a `u32` length prefix.
    pub fn length(&mut self, n: usize) -> Result<()> {
        if n > u32::MAX as usize {
            return Err(Error::TooLarge(n));
        }
        self.u32(n as u32);
        Ok(())
    }

    /// Encodes a UTF-8 string blob.
    pub fn str(&mut self, v: &str) -> Result<()> {
        self.length(v.len())?;
        self.buf.extend_from_slice(v.as_bytes());
        Ok(())
    }

    /// Encodes a length-prefixed byte blob.
    pub fn bytes(&mut self, v: &[u8]) -> Result<()> {
        self.length(v.len())?;
        self.buf.extend_from_slice(v);
        Ok(())
    }
}

/// A zero-copy, bounds-checked cursor over a byte slice.
///
/// Reading advances the internal cursor. Reading past the end never panics;
/// it returns `Error::UnexpectedEnd` and leaves the cursor where it was.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    /// Creates a decoder over the slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn tell(&self) -> usize {
        self.pos
    }

    /// Bytes left in the view.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// The unread tail of the buffer, without consuming it.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// Consumes and returns the unread tail of the buffer.
    pub fn take_rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    /// Consumes exactly `n` bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let remaining = self.remaining();
        if n > remaining {
            return Err(Error::UnexpectedEnd { wanted: n, remaining });
        }
        let head = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(head)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Decodes any `Unpack` value.
    pub fn unpack<T: Unpack>(&mut self) -> Result<T> {
        T::unpack(self)
    }

    /// Decodes a bool.
    pub fn bool(&mut self) -> Result<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(Error::InvalidBool(b)),
        }
    }

    /// Decodes u8.
    pub fn u8(&mut self) -> Result<u8> { Ok(self.read_array::<1>()?[0]) }
    /// Decodes i8.
    pub fn i8(&mut self) -> Result<i8> { Ok(self.read_array::<1>()?[0] as i8) }

    /// Decodes u16 (BE).
    pub fn u16(&mut self) -> Result<u16> { Ok(u16::from_be_bytes(self.read_array()?)) }
    /// Decodes i16 (BE).
    pub fn i16(&mut self) -> Result<i16> { Ok(i16::from_be_bytes(self.read_array()?)) }

    /// Decodes u32 (BE).
    pub fn u32(&mut self) -> Result<u32> { Ok(u32::from_be_bytes(self.read_array()?)) }
    /// Decodes i32 (BE).
    pub fn i32(&mut self) -> Result<i32> { Ok(i32::from_be_bytes(self.read_array()?)) }

    /// Decodes u64 (BE).
    pub fn u64(&mut self) -> Result<u64> { Ok(u64::from_be_bytes(self.read_array()?)) }
    /// Decodes i64 (BE).
    pub fn i64(&mut self) -> Result<i64> { Ok(i64::from_be_bytes(self.read_array()?)) }

    /// Decodes f32 (BE).
    pub fn f32(&mut self) -> Result<f32> { Ok(f32::from_be_bytes(self.read_array()?)) }
    /// Decodes f64 (BE).
    pub fn f64(&mut self) -> Result<f64> { Ok(f64::from_be_bytes(self.read_array()?)) }

    /// Decodes char (u32 BE).
    pub fn char(&mut self) -> Result<char> {
        let val = self.u32()?;
        char::from_u32(val).ok_or(Error::InvalidChar(val))
    }

    /// Decodes a `u32` length prefix.
    pub fn length(&mut self) -> Result<usize> {
        Ok(self.u32()? as usize)
    }

    /// Decodes a string slice (UTF-8).
    pub fn str(&mut self) -> Result<&'a str> {
        let start = self.pos;
        let len = self.length()?;
        let bytes = match self.read_bytes(len) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.pos = start;
                return Err(e);
            }
        };
        std::str::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)
    }

    /// Decodes a length-prefixed byte slice.
    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        let start = self.pos;
        let len = self.length()?;
        self.read_bytes(len).inspect_err(|_| self.pos = start)
    }
}
