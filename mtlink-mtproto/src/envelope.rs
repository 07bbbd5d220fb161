//! The MTProto 2.0 encrypted envelope.
//!
//! Plaintext layout before encryption:
//!
//! ```text
//! salt:       i64
//! session_id: i64
//! msg_id:     i64
//! seq_no:     i32
//! length:     i32
//! body:       [u8; length]
//! padding:    12..=1024 random bytes
//! ```
//!
//! On the wire this becomes `auth_key_id ‖ msg_key ‖ AES-IGE(plaintext)`.

use std::io;

use mtlink_crypto::{AuthKey, DecryptError, Side, decrypt_data_v2, encrypt_data_v2};

use crate::message::{Message, MessageId};

const HEADER_LEN: usize = 32;
const MIN_PADDING: usize = 12;
const MAX_PADDING: usize = 1024;

/// A decrypted envelope.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    /// Server salt the sender used.
    pub salt: i64,
    /// Session the message belongs to.
    pub session_id: i64,
    /// The carried message.
    pub message: Message,
}

/// Why an inbound envelope was rejected.
#[derive(Clone, Debug, PartialEq)]
pub enum UnpackError {
    /// Decryption or integrity check failed.
    Crypto(DecryptError),
    /// Plaintext too short to hold the header.
    TooShort,
    /// The envelope belongs to another session.
    SessionMismatch {
        /// Our session.
        expected: i64,
        /// The envelope's session.
        got: i64,
    },
    /// The declared body length does not fit the plaintext.
    BodyLength {
        /// Declared length.
        declared: i32,
        /// Bytes available after the header.
        available: usize,
    },
    /// Padding shorter than 12 or longer than 1024 bytes.
    Padding {
        /// Padding length found.
        len: usize,
    },
    /// The message id has the wrong parity for its sender.
    BadMsgId {
        /// The offending id.
        msg_id: i64,
    },
}

impl std::fmt::Display for UnpackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Crypto(e) => write!(f, "crypto: {e}"),
            Self::TooShort => write!(f, "plaintext too short"),
            Self::SessionMismatch { expected, got } => {
                write!(f, "session_id mismatch (expected {expected}, got {got})")
            }
            Self::BodyLength { declared, available } => {
                write!(f, "declared body length {declared} exceeds {available} available bytes")
            }
            Self::Padding { len } => write!(f, "invalid padding length {len}"),
            Self::BadMsgId { msg_id } => write!(f, "msg_id {msg_id} has the wrong parity"),
        }
    }
}

impl std::error::Error for UnpackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Crypto(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DecryptError> for UnpackError {
    fn from(e: DecryptError) -> Self { Self::Crypto(e) }
}

fn seal(message: &Message, salt: i64, session_id: i64, auth_key: &AuthKey, sender: Side) -> io::Result<Vec<u8>> {
    let mut plain = Vec::with_capacity(HEADER_LEN + message.body.len());
    plain.extend(salt.to_le_bytes());
    plain.extend(session_id.to_le_bytes());
    plain.extend(message.msg_id.0.to_le_bytes());
    plain.extend(message.seq_no.to_le_bytes());
    plain.extend((message.body.len() as i32).to_le_bytes());
    plain.extend_from_slice(&message.body);
    encrypt_data_v2(&plain, auth_key, sender)
}

fn open(frame: &[u8], session_id: Option<i64>, auth_key: &AuthKey, sender: Side) -> Result<Envelope, UnpackError> {
    let mut buffer = frame.to_vec();
    let plain = decrypt_data_v2(&mut buffer, auth_key, sender)?;
    if plain.len() < HEADER_LEN {
        return Err(UnpackError::TooShort);
    }

    let le_i64 = |at: usize| {
        let mut b = [0u8; 8];
        b.copy_from_slice(&plain[at..at + 8]);
        i64::from_le_bytes(b)
    };
    let le_i32 = |at: usize| {
        let mut b = [0u8; 4];
        b.copy_from_slice(&plain[at..at + 4]);
        i32::from_le_bytes(b)
    };

    let salt = le_i64(0);
    let got_session = le_i64(8);
    let msg_id = le_i64(16);
    let seq_no = le_i32(24);
    let declared = le_i32(28);

    if let Some(expected) = session_id {
        if got_session != expected {
            return Err(UnpackError::SessionMismatch { expected, got: got_session });
        }
    }

    let available = plain.len() - HEADER_LEN;
    let body_len = usize::try_from(declared)
        .ok()
        .filter(|len| *len <= available && len % 4 == 0)
        .ok_or(UnpackError::BodyLength { declared, available })?;

    let padding = available - body_len;
    if !(MIN_PADDING..=MAX_PADDING).contains(&padding) {
        return Err(UnpackError::Padding { len: padding });
    }

    let valid_id = match sender {
        Side::Server => msg_id & 1 == 1,
        Side::Client => msg_id & 3 == 0,
    };
    if !valid_id {
        return Err(UnpackError::BadMsgId { msg_id });
    }

    let body = plain[HEADER_LEN..HEADER_LEN + body_len].to_vec();
    Ok(Envelope {
        salt,
        session_id: got_session,
        message: Message::new(MessageId(msg_id), seq_no, body),
    })
}

/// Encrypt an outbound client message.
pub fn pack(message: &Message, salt: i64, session_id: i64, auth_key: &AuthKey) -> io::Result<Vec<u8>> {
    seal(message, salt, session_id, auth_key, Side::Client)
}

/// Decrypt and validate an inbound server envelope.
pub fn unpack(frame: &[u8], session_id: i64, auth_key: &AuthKey) -> Result<Envelope, UnpackError> {
    open(frame, Some(session_id), auth_key, Side::Server)
}

/// The same envelope, seen from the data center.
///
/// Lets in-process peers (mock data centers, test harnesses) speak the
/// protocol without a real server.
pub mod server {
    use super::*;

    /// Encrypt a message sent by the server.
    pub fn pack(message: &Message, salt: i64, session_id: i64, auth_key: &AuthKey) -> io::Result<Vec<u8>> {
        seal(message, salt, session_id, auth_key, Side::Server)
    }

    /// Decrypt a client envelope. Any session id is accepted: the server
    /// learns it from the first message.
    pub fn unpack(frame: &[u8], auth_key: &AuthKey) -> Result<Envelope, UnpackError> {
        open(frame, None, auth_key, Side::Client)
    }
}
