//! Sans-IO MTProto 2.0 protocol core.
//!
//! This crate handles:
//! * Message identity and sequencing ([`MsgFactory`], [`ServerClock`])
//! * The encrypted envelope ([`envelope::pack`] / [`envelope::unpack`])
//! * Service objects: containers, `gzip_packed`, `rpc_result` ([`service`])
//! * Admission of inbound message ids ([`MsgIdValidator`])
//! * Transport framing codecs ([`transport`])
//!
//! It performs no I/O: bring your own socket and scheduler.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod factory;
pub mod message;
pub mod msg_id;
pub mod service;
pub mod transport;
pub mod validator;

pub use envelope::{Envelope, UnpackError};
pub use factory::{MsgFactory, SeqNoAllocator};
pub use message::{Message, MessageId};
pub use msg_id::{MsgIdGenerator, ServerClock};
pub use validator::{Admission, MsgIdValidator};

/// Generate a random session id.
pub fn new_session_id() -> std::io::Result<i64> {
    let mut rnd = [0u8; 8];
    mtlink_crypto::random_fill(&mut rnd)?;
    Ok(i64::from_le_bytes(rnd))
}
