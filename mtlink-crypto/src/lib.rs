//! Cryptographic primitives for MTProto 2.0.
//!
//! Provides:
//! - AES-256-IGE encryption/decryption
//! - `AuthKey`, the 256-byte session key
//! - MTProto 2.0 message encryption / decryption for either side of a connection
//! - Obfuscated2 AES-256-CTR transport streams

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod aes;
mod auth_key;
pub mod obfuscated;

use std::io;

use sha1::Sha1;
use sha2::{Digest, Sha256};

pub use auth_key::AuthKey;
pub use obfuscated::{CtrStream, Obfuscation};

// ─── Hashing ─────────────────────────────────────────────────────────────────

/// SHA-1 over the concatenation of `parts`.
pub(crate) fn sha1(parts: &[&[u8]]) -> [u8; 20] {
    let mut h = Sha1::new();
    parts.iter().for_each(|p| h.update(p));
    h.finalize().into()
}

/// SHA-256 over the concatenation of `parts`.
pub(crate) fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut h = Sha256::new();
    parts.iter().for_each(|p| h.update(p));
    h.finalize().into()
}

/// Fill `buf` from the operating system's CSPRNG.
pub fn random_fill(buf: &mut [u8]) -> io::Result<()> {
    getrandom::getrandom(buf).map_err(|e| io::Error::other(e.to_string()))
}

// ─── MTProto 2.0 encrypt / decrypt ───────────────────────────────────────────

/// Errors from [`decrypt_data_v2`].
#[derive(Clone, Debug, PartialEq)]
pub enum DecryptError {
    /// Ciphertext too short or not block-aligned.
    InvalidBuffer,
    /// The `auth_key_id` in the ciphertext does not match our key.
    AuthKeyMismatch,
    /// The `msg_key` in the ciphertext does not match our computed value.
    MessageKeyMismatch,
}

impl std::fmt::Display for DecryptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidBuffer => write!(f, "invalid ciphertext buffer length"),
            Self::AuthKeyMismatch => write!(f, "auth_key_id mismatch"),
            Self::MessageKeyMismatch => write!(f, "msg_key mismatch"),
        }
    }
}

impl std::error::Error for DecryptError {}

/// Which end of the connection produced a message.
///
/// Client and server derive their keys from different regions of the auth
/// key, so both ends must agree on who sent what.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Side {
    /// Messages sent by the client.
    Client,
    /// Messages sent by the server.
    Server,
}

impl Side {
    fn x(self) -> usize {
        match self {
            Side::Client => 0,
            Side::Server => 8,
        }
    }
}

fn calc_key(auth_key: &AuthKey, msg_key: &[u8; 16], side: Side) -> ([u8; 32], [u8; 32]) {
    let x = side.x();
    let sha_a = sha256(&[msg_key, &auth_key.data[x..x + 36]]);
    let sha_b = sha256(&[&auth_key.data[40 + x..40 + x + 36], msg_key]);

    let mut aes_key = [0u8; 32];
    aes_key[..8].copy_from_slice(&sha_a[..8]);
    aes_key[8..24].copy_from_slice(&sha_b[8..24]);
    aes_key[24..].copy_from_slice(&sha_a[24..]);

    let mut aes_iv = [0u8; 32];
    aes_iv[..8].copy_from_slice(&sha_b[..8]);
    aes_iv[8..24].copy_from_slice(&sha_a[8..24]);
    aes_iv[24..].copy_from_slice(&sha_b[24..]);

    (aes_key, aes_iv)
}

fn msg_key_for(auth_key: &AuthKey, padded: &[u8], side: Side) -> [u8; 16] {
    let x = side.x();
    let large = sha256(&[&auth_key.data[88 + x..88 + x + 32], padded]);
    let mut msg_key = [0u8; 16];
    msg_key.copy_from_slice(&large[8..24]);
    msg_key
}

/// Padding length for a plaintext of `len` bytes: 17..=32 bytes, bringing the
/// total to a multiple of 16.
fn padding_len(len: usize) -> usize {
    16 + (16 - (len % 16))
}

/// Encrypt `plaintext` as sent by `sender`.
///
/// Returns `auth_key_id ‖ msg_key ‖ ciphertext`.
pub fn encrypt_data_v2(plaintext: &[u8], auth_key: &AuthKey, sender: Side) -> io::Result<Vec<u8>> {
    let mut rnd = [0u8; 32];
    random_fill(&mut rnd)?;
    Ok(encrypt_with_padding(plaintext, auth_key, sender, &rnd))
}

fn encrypt_with_padding(plaintext: &[u8], auth_key: &AuthKey, sender: Side, rnd: &[u8; 32]) -> Vec<u8> {
    let pad = padding_len(plaintext.len());
    let mut out = Vec::with_capacity(24 + plaintext.len() + pad);
    out.extend_from_slice(&auth_key.key_id);
    out.extend_from_slice(&[0u8; 16]);
    out.extend_from_slice(plaintext);
    out.extend_from_slice(&rnd[..pad]);

    let msg_key = msg_key_for(auth_key, &out[24..], sender);
    let (key, iv) = calc_key(auth_key, &msg_key, sender);
    crate::aes::ige_encrypt(&mut out[24..], &key, &iv);
    out[8..24].copy_from_slice(&msg_key);
    out
}

/// Decrypt a message produced by `sender`.
///
/// `buffer` must start with `auth_key_id ‖ msg_key ‖ ciphertext`. On success
/// the returned slice of `buffer` holds the plaintext, padding included.
pub fn decrypt_data_v2<'a>(buffer: &'a mut [u8], auth_key: &AuthKey, sender: Side) -> Result<&'a mut [u8], DecryptError> {
    if buffer.len() < 24 || (buffer.len() - 24) % 16 != 0 {
        return Err(DecryptError::InvalidBuffer);
    }
    if auth_key.key_id != buffer[..8] {
        return Err(DecryptError::AuthKeyMismatch);
    }
    let mut msg_key = [0u8; 16];
    msg_key.copy_from_slice(&buffer[8..24]);

    let (key, iv) = calc_key(auth_key, &msg_key, sender);
    crate::aes::ige_decrypt(&mut buffer[24..], &key, &iv);

    if msg_key != msg_key_for(auth_key, &buffer[24..], sender) {
        return Err(DecryptError::MessageKeyMismatch);
    }
    Ok(&mut buffer[24..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> AuthKey {
        let mut data = [0u8; 256];
        data.iter_mut().enumerate().for_each(|(i, b)| *b = i as u8);
        AuthKey::from_bytes(data)
    }

    #[test]
    fn padding_keeps_blocks_aligned() {
        for len in 0..64 {
            let pad = padding_len(len);
            assert!((12..=1024).contains(&pad));
            assert_eq!((len + pad) % 16, 0);
        }
    }

    #[test]
    fn client_message_decrypts_on_server_side_only() {
        let key = key();
        let plain = b"0123456789abcdef-payload".to_vec();
        let mut wire = encrypt_with_padding(&plain, &key, Side::Client, &[3u8; 32]);
        assert_eq!(&wire[..8], &key.key_id());

        let mut copy = wire.clone();
        assert_eq!(
            decrypt_data_v2(&mut copy, &key, Side::Server),
            Err(DecryptError::MessageKeyMismatch)
        );

        let decrypted = decrypt_data_v2(&mut wire, &key, Side::Client).unwrap();
        assert_eq!(&decrypted[..plain.len()], &plain[..]);
    }

    #[test]
    fn foreign_key_is_rejected() {
        let key = key();
        let other = AuthKey::from_bytes([1u8; 256]);
        let mut wire = encrypt_data_v2(b"abcd", &key, Side::Server).unwrap();
        assert_eq!(decrypt_data_v2(&mut wire, &other, Side::Server), Err(DecryptError::AuthKeyMismatch));
    }

    #[test]
    fn misaligned_buffer_is_rejected() {
        let mut wire = vec![0u8; 30];
        assert_eq!(decrypt_data_v2(&mut wire, &key(), Side::Server), Err(DecryptError::InvalidBuffer));
    }
}
