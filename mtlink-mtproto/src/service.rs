//! Decoding of MTProto service objects.
//!
//! A decrypted message body is either one of the service constructors the
//! session reacts to, or an opaque API object (an update) passed upward.

use std::io::Read;

use flate2::read::GzDecoder;
use mtlink_tl_types::deserialize::Error as TlError;
use mtlink_tl_types::types::{
    BadMsgNotification, BadServerSalt, FutureSalts, GzipPacked, MsgContainer, MsgDetailedInfo,
    MsgNewDetailedInfo, MsgsAck, NewSessionCreated, Pong, RpcError, RpcResult,
};
use mtlink_tl_types::{Cursor, Deserializable, Identifiable};

use crate::message::{Message, MessageId};

/// Errors from [`decode`] and [`flatten`].
#[derive(Debug)]
pub enum DecodeError {
    /// The TL data was malformed.
    Tl(TlError),
    /// A `gzip_packed` payload failed to inflate.
    Gzip(std::io::Error),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tl(e) => write!(f, "tl: {e}"),
            Self::Gzip(e) => write!(f, "gzip: {e}"),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Tl(e) => Some(e),
            Self::Gzip(e) => Some(e),
        }
    }
}

impl From<TlError> for DecodeError {
    fn from(e: TlError) -> Self { Self::Tl(e) }
}

/// The answer carried by an `rpc_result`.
#[derive(Clone, Debug, PartialEq)]
pub enum RpcAnswer {
    /// Serialized result object, already inflated.
    Payload(Vec<u8>),
    /// The request failed.
    Error(RpcError),
}

/// A decoded message body.
#[derive(Clone, Debug, PartialEq)]
pub enum Object {
    /// Answer to a request.
    RpcResult {
        /// The request being answered.
        req_msg_id: i64,
        /// Its outcome.
        answer: RpcAnswer,
    },
    /// Answer to `ping` / `ping_delay_disconnect`.
    Pong(Pong),
    /// The server refused a message.
    BadMsgNotification(BadMsgNotification),
    /// The server refused a message because of a stale salt.
    BadServerSalt(BadServerSalt),
    /// Answer to `get_future_salts`.
    FutureSalts(FutureSalts),
    /// The server already answered; acknowledge `answer_msg_id`.
    MsgDetailedInfo(MsgDetailedInfo),
    /// The server has an answer to resend; acknowledge `answer_msg_id`.
    MsgNewDetailedInfo(MsgNewDetailedInfo),
    /// The server created a new session for us.
    NewSessionCreated(NewSessionCreated),
    /// The server acknowledged our messages.
    MsgsAck(MsgsAck),
    /// Anything else: updates and other API objects.
    Other {
        /// Constructor ID of `body`.
        constructor_id: u32,
        /// The serialized object, inflated.
        body: Vec<u8>,
    },
}

impl Object {
    /// The client message this object answers, if any.
    pub fn answers(&self) -> Option<i64> {
        match self {
            Self::RpcResult { req_msg_id, .. } => Some(*req_msg_id),
            Self::Pong(p) => Some(p.msg_id),
            Self::BadMsgNotification(b) => Some(b.bad_msg_id),
            Self::BadServerSalt(b) => Some(b.bad_msg_id),
            Self::FutureSalts(f) => Some(f.req_msg_id),
            _ => None,
        }
    }
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::new();
    GzDecoder::new(data).read_to_end(&mut out).map_err(DecodeError::Gzip)?;
    Ok(out)
}

/// Inflate `body` if it is a `gzip_packed` object, repeatedly.
pub fn inflate(body: Vec<u8>) -> Result<Vec<u8>, DecodeError> {
    let mut body = body;
    while Cursor::from_slice(&body).peek_id() == Ok(GzipPacked::CONSTRUCTOR_ID) {
        let packed = GzipPacked::from_bytes(&body)?;
        body = gunzip(&packed.packed_data)?;
    }
    Ok(body)
}

/// Split a `msg_container` into its messages; any other message is returned
/// alone. A gzipped container is inflated first.
pub fn flatten(message: Message) -> Result<Vec<Message>, DecodeError> {
    let body = inflate(message.body)?;
    if Cursor::from_slice(&body).peek_id() != Ok(MsgContainer::CONSTRUCTOR_ID) {
        return Ok(vec![Message { body, ..message }]);
    }
    let container = MsgContainer::from_bytes(&body)?;
    Ok(container
        .messages
        .into_iter()
        .map(|m| Message::new(MessageId(m.msg_id), m.seq_no, m.body.0))
        .collect())
}

/// Decode a single (non-container) message body.
pub fn decode(body: &[u8]) -> Result<Object, DecodeError> {
    let id = Cursor::from_slice(body).peek_id()?;
    let object = match id {
        RpcResult::CONSTRUCTOR_ID => {
            let r = RpcResult::from_bytes(body)?;
            let result = inflate(r.result.0)?;
            let answer = if Cursor::from_slice(&result).peek_id() == Ok(RpcError::CONSTRUCTOR_ID) {
                RpcAnswer::Error(RpcError::from_bytes(&result)?)
            } else {
                RpcAnswer::Payload(result)
            };
            Object::RpcResult { req_msg_id: r.req_msg_id, answer }
        }
        Pong::CONSTRUCTOR_ID => Object::Pong(Pong::from_bytes(body)?),
        BadMsgNotification::CONSTRUCTOR_ID => Object::BadMsgNotification(BadMsgNotification::from_bytes(body)?),
        BadServerSalt::CONSTRUCTOR_ID => Object::BadServerSalt(BadServerSalt::from_bytes(body)?),
        FutureSalts::CONSTRUCTOR_ID => Object::FutureSalts(FutureSalts::from_bytes(body)?),
        MsgDetailedInfo::CONSTRUCTOR_ID => Object::MsgDetailedInfo(MsgDetailedInfo::from_bytes(body)?),
        MsgNewDetailedInfo::CONSTRUCTOR_ID => Object::MsgNewDetailedInfo(MsgNewDetailedInfo::from_bytes(body)?),
        NewSessionCreated::CONSTRUCTOR_ID => Object::NewSessionCreated(NewSessionCreated::from_bytes(body)?),
        MsgsAck::CONSTRUCTOR_ID => Object::MsgsAck(MsgsAck::from_bytes(body)?),
        GzipPacked::CONSTRUCTOR_ID => return decode(&inflate(body.to_vec())?),
        constructor_id => Object::Other { constructor_id, body: body.to_vec() },
    };
    Ok(object)
}

/// Human-readable meaning of a `bad_msg_notification` error code.
pub fn bad_msg_description(code: i32) -> &'static str {
    match code {
        16 => "msg_id too low, the client time has to be synchronized",
        17 => "msg_id too high, the client time has to be synchronized",
        18 => "incorrect two lower order msg_id bits, the server expects client message msg_id to be divisible by 4",
        19 => "container msg_id is the same as msg_id of a previously received message",
        20 => "message too old, it cannot be verified by the server",
        32 => "msg_seqno too low",
        33 => "msg_seqno too high",
        34 => "an even msg_seqno expected, but odd received",
        35 => "odd msg_seqno expected, but even received",
        48 => "incorrect server salt",
        64 => "invalid container",
        _ => "unknown error code",
    }
}
