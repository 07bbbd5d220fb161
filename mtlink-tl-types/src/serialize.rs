//! The [`Serializable`] trait and its implementations for TL primitives.
//!
//! Encoding follows the [MTProto Binary Serialization] rules: little-endian
//! integers, 4-byte aligned byte strings, boxed `Vector` with a constructor
//! header and bare `vector` without one.
//!
//! [MTProto Binary Serialization]: https://core.telegram.org/mtproto/serialize

/// Serialize `self` into TL binary format.
pub trait Serializable {
    /// Appends the serialized form of `self` to `buf`.
    fn serialize(&self, buf: &mut impl Extend<u8>);

    /// Serialize into a freshly allocated buffer.
    fn to_bytes(&self) -> Vec<u8> {
        let mut v = Vec::new();
        self.serialize(&mut v);
        v
    }
}

/// Constructor of the boxed `Vector` type.
pub(crate) const VECTOR_ID: u32 = 0x1cb5c415;

/// Constructor of `boolTrue`.
pub(crate) const BOOL_TRUE_ID: u32 = 0x997275b5;

/// Constructor of `boolFalse`.
pub(crate) const BOOL_FALSE_ID: u32 = 0xbc799737;

// ─── numbers ─────────────────────────────────────────────────────────────────

macro_rules! le_number {
    ( $( $t:ty ),+ ) => {$(
        impl Serializable for $t {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                buf.extend(self.to_le_bytes());
            }
        }
    )+};
}

le_number!(i32, u32, i64, f64);

impl Serializable for bool {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        let id = if *self { BOOL_TRUE_ID } else { BOOL_FALSE_ID };
        id.serialize(buf);
    }
}

// `int128` / `int256` are written raw.
impl<const N: usize> Serializable for [u8; N] {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        buf.extend(self.iter().copied());
    }
}

// ─── byte strings ────────────────────────────────────────────────────────────

/// Writes the TL `bytes` header for a payload of `len` bytes and returns the
/// number of zero bytes that must follow the payload.
fn write_bytes_header(len: usize, buf: &mut impl Extend<u8>) -> usize {
    let header_len = if len <= 253 {
        buf.extend([len as u8]);
        1
    } else {
        buf.extend([0xfe, len as u8, (len >> 8) as u8, (len >> 16) as u8]);
        4
    };
    (4 - (header_len + len) % 4) % 4
}

impl Serializable for [u8] {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        let padding = write_bytes_header(self.len(), buf);
        buf.extend(self.iter().copied());
        buf.extend(std::iter::repeat_n(0u8, padding));
    }
}

impl Serializable for &[u8] {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        (**self).serialize(buf);
    }
}

impl Serializable for Vec<u8> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.as_slice().serialize(buf);
    }
}

impl Serializable for String {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.as_bytes().serialize(buf);
    }
}

impl Serializable for str {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.as_bytes().serialize(buf);
    }
}

// ─── vectors ─────────────────────────────────────────────────────────────────

impl<T: Serializable> Serializable for Vec<T> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        VECTOR_ID.serialize(buf);
        crate::RawVec::serialize_items(self, buf);
    }
}

impl<T: Serializable> Serializable for crate::RawVec<T> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::serialize_items(&self.0, buf);
    }
}

impl<T: Serializable> crate::RawVec<T> {
    fn serialize_items(items: &[T], buf: &mut impl Extend<u8>) {
        (items.len() as i32).serialize(buf);
        items.iter().for_each(|item| item.serialize(buf));
    }
}

// ─── pass-through ────────────────────────────────────────────────────────────

/// A [`crate::Blob`] is already serialized; it is written verbatim.
impl Serializable for crate::Blob {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        buf.extend(self.0.iter().copied());
    }
}

/// Flag-guarded fields write nothing when absent.
impl<T: Serializable> Serializable for Option<T> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        if let Some(v) = self {
            v.serialize(buf);
        }
    }
}
