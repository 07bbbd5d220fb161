//! MTProto message framing types.

use mtlink_tl_types::{Cursor, Identifiable, functions, types};

/// A 64-bit MTProto message identifier.
///
/// The upper 32 bits approximate server unix time; the lower 32 bits hold the
/// fractional part. Client ids are divisible by 4, server ids are odd.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MessageId(pub i64);

impl MessageId {
    /// Server time encoded in the id, in seconds.
    pub fn unix_time(self) -> f64 {
        self.0 as f64 / 2f64.powi(32)
    }

    /// Whether the id was minted by the server.
    pub fn is_server(self) -> bool {
        self.0 & 1 == 1
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A message inside an encrypted envelope or a container.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// Unique identifier for this message.
    pub msg_id: MessageId,
    /// Session-scoped sequence number (odd for content-related messages).
    pub seq_no: i32,
    /// The serialized TL body (constructor ID + fields).
    pub body: Vec<u8>,
}

impl Message {
    /// Assemble a message from its parts.
    pub fn new(msg_id: MessageId, seq_no: i32, body: Vec<u8>) -> Self {
        Self { msg_id, seq_no, body }
    }

    /// Body length in bytes, as written in the envelope.
    pub fn length(&self) -> usize {
        self.body.len()
    }

    /// Constructor ID of the body, if it is at least four bytes long.
    pub fn constructor_id(&self) -> Option<u32> {
        Cursor::from_slice(&self.body).peek_id().ok()
    }

    /// Odd sequence numbers mark messages that require an acknowledgement.
    pub fn is_content_related(&self) -> bool {
        self.seq_no & 1 == 1
    }
}

/// Whether a body of this constructor occupies a content-related sequence slot.
///
/// Everything is, except bare pings, `http_wait`, acknowledgements and
/// containers.
pub fn is_content_related(body: &[u8]) -> bool {
    !matches!(
        Cursor::from_slice(body).peek_id(),
        Ok(functions::Ping::CONSTRUCTOR_ID
            | types::HttpWait::CONSTRUCTOR_ID
            | types::MsgsAck::CONSTRUCTOR_ID
            | types::MsgContainer::CONSTRUCTOR_ID)
    )
}
