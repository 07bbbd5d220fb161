//! The [`Deserializable`] trait, the [`Cursor`] it reads from, and primitive impls.

use std::fmt;

use crate::serialize::{BOOL_FALSE_ID, BOOL_TRUE_ID, VECTOR_ID};

// ─── Error ───────────────────────────────────────────────────────────────────

/// Errors that can occur during deserialization.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Ran out of bytes before the value was fully read.
    UnexpectedEof,
    /// Read a constructor ID that does not belong to the expected type.
    UnexpectedConstructor {
        /// The offending constructor ID.
        id: u32,
    },
    /// A `string` field did not hold valid UTF-8.
    InvalidUtf8,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected end of buffer"),
            Self::UnexpectedConstructor { id } => write!(f, "unexpected constructor id: {id:#010x}"),
            Self::InvalidUtf8 => write!(f, "string is not valid utf-8"),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for deserialization.
pub type Result<T> = std::result::Result<T, Error>;

// ─── Cursor ──────────────────────────────────────────────────────────────────

/// A read position over a borrowed byte slice.
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Create a cursor positioned at the start of `buf`.
    pub fn from_slice(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current byte offset.
    pub fn pos(&self) -> usize { self.pos }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize { self.buf.len() - self.pos }

    /// Read a single byte.
    pub fn read_byte(&mut self) -> Result<u8> {
        Ok(self.read_slice(1)?[0])
    }

    /// Borrow the next `len` bytes and advance past them.
    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(Error::UnexpectedEof)?;
        let slice = self.buf.get(self.pos..end).ok_or(Error::UnexpectedEof)?;
        self.pos = end;
        Ok(slice)
    }

    /// Fill `out` from the buffer.
    pub fn read_exact(&mut self, out: &mut [u8]) -> Result<()> {
        out.copy_from_slice(self.read_slice(out.len())?);
        Ok(())
    }

    /// Look at the next constructor ID without consuming it.
    pub fn peek_id(&self) -> Result<u32> {
        let bytes = self.buf.get(self.pos..self.pos + 4).ok_or(Error::UnexpectedEof)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Consume all remaining bytes into `out`, returning how many were read.
    pub fn read_to_end(&mut self, out: &mut Vec<u8>) -> usize {
        let rest = &self.buf[self.pos..];
        out.extend_from_slice(rest);
        self.pos = self.buf.len();
        rest.len()
    }
}

/// Argument type of [`Deserializable::deserialize`].
pub type Buffer<'a, 'b> = &'a mut Cursor<'b>;

// ─── Deserializable ──────────────────────────────────────────────────────────

/// Deserialize a value from TL binary format.
pub trait Deserializable: Sized {
    /// Read `Self` from `buf`, advancing its position.
    fn deserialize(buf: Buffer) -> Result<Self>;

    /// Deserialize from a byte slice, ignoring trailing bytes.
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::deserialize(&mut Cursor::from_slice(bytes))
    }
}

/// Consume a constructor ID and check it equals `expected`.
pub fn expect_id(buf: Buffer, expected: u32) -> Result<()> {
    match u32::deserialize(buf)? {
        id if id == expected => Ok(()),
        id => Err(Error::UnexpectedConstructor { id }),
    }
}

// ─── Primitives ──────────────────────────────────────────────────────────────

macro_rules! le_number {
    ( $( $t:ty ),+ ) => {$(
        impl Deserializable for $t {
            fn deserialize(buf: Buffer) -> Result<Self> {
                let mut b = [0u8; std::mem::size_of::<$t>()];
                buf.read_exact(&mut b)?;
                Ok(<$t>::from_le_bytes(b))
            }
        }
    )+};
}

le_number!(i32, u32, i64, f64);

impl Deserializable for bool {
    fn deserialize(buf: Buffer) -> Result<Self> {
        match u32::deserialize(buf)? {
            BOOL_TRUE_ID => Ok(true),
            BOOL_FALSE_ID => Ok(false),
            id => Err(Error::UnexpectedConstructor { id }),
        }
    }
}

impl<const N: usize> Deserializable for [u8; N] {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let mut b = [0u8; N];
        buf.read_exact(&mut b)?;
        Ok(b)
    }
}

// ─── Bytes / String ──────────────────────────────────────────────────────────

impl Deserializable for Vec<u8> {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let (len, header_len) = match buf.read_byte()? {
            0xfe => {
                let b = buf.read_slice(3)?;
                (b[0] as usize | (b[1] as usize) << 8 | (b[2] as usize) << 16, 4)
            }
            short => (short as usize, 1),
        };
        let data = buf.read_slice(len)?.to_vec();
        buf.read_slice((4 - (header_len + len) % 4) % 4)?;
        Ok(data)
    }
}

impl Deserializable for String {
    fn deserialize(buf: Buffer) -> Result<Self> {
        String::from_utf8(Vec::<u8>::deserialize(buf)?).map_err(|_| Error::InvalidUtf8)
    }
}

// ─── Vectors ─────────────────────────────────────────────────────────────────

fn read_items<T: Deserializable>(buf: Buffer) -> Result<Vec<T>> {
    let len = i32::deserialize(buf)?;
    let len = usize::try_from(len).map_err(|_| Error::UnexpectedEof)?;
    // Each item occupies at least four bytes.
    if len > buf.remaining() / 4 {
        return Err(Error::UnexpectedEof);
    }
    (0..len).map(|_| T::deserialize(buf)).collect()
}

impl<T: Deserializable> Deserializable for Vec<T> {
    fn deserialize(buf: Buffer) -> Result<Self> {
        expect_id(buf, VECTOR_ID)?;
        read_items(buf)
    }
}

impl<T: Deserializable> Deserializable for crate::RawVec<T> {
    fn deserialize(buf: Buffer) -> Result<Self> {
        read_items(buf).map(crate::RawVec)
    }
}

/// A [`crate::Blob`] swallows whatever is left in the buffer.
impl Deserializable for crate::Blob {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let mut out = Vec::with_capacity(buf.remaining());
        buf.read_to_end(&mut out);
        Ok(crate::Blob(out))
    }
}
