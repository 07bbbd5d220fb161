//! The 256-byte authorization key shared with the server.

use crate::sha1;

/// An authorization key plus its precomputed identifier.
///
/// The key itself comes from a previous Diffie-Hellman exchange; this crate
/// only consumes it.
#[derive(Clone)]
pub struct AuthKey {
    pub(crate) data: [u8; 256],
    pub(crate) key_id: [u8; 8],
}

impl AuthKey {
    /// Wrap raw key material.
    pub fn from_bytes(data: [u8; 256]) -> Self {
        let digest = sha1(&[&data]);
        let mut key_id = [0u8; 8];
        key_id.copy_from_slice(&digest[12..20]);
        Self { data, key_id }
    }

    /// Raw key material.
    pub fn to_bytes(&self) -> [u8; 256] { self.data }

    /// `auth_key_id`: the low 64 bits of SHA-1(key), as sent on the wire.
    pub fn key_id(&self) -> [u8; 8] { self.key_id }
}

impl std::fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuthKey(id={:#018x})", u64::from_le_bytes(self.key_id))
    }
}

impl PartialEq for AuthKey {
    fn eq(&self, other: &Self) -> bool { self.key_id == other.key_id }
}

impl Eq for AuthKey {}
