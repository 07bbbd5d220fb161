//! Service constructors of the MTProto schema.
//!
//! These are the objects the server sends to manage a session (results,
//! acknowledgements, salts, notifications) plus the few the client sends
//! back (`msgs_ack`, `http_wait`).

use crate::deserialize::{Buffer, Result, expect_id};
use crate::{Blob, Deserializable, Identifiable, RawVec, Serializable};

// ─── RPC results ─────────────────────────────────────────────────────────────

/// `rpc_result#f35c6d01 req_msg_id:long result:Object = RpcResult`
///
/// `result` holds the raw answer; it may itself be an `rpc_error` or a
/// `gzip_packed` object.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcResult {
    /// `msg_id` of the request being answered.
    pub req_msg_id: i64,
    /// The serialized answer.
    pub result: Blob,
}

impl Identifiable for RpcResult {
    const CONSTRUCTOR_ID: u32 = 0xf35c6d01;
}

impl Serializable for RpcResult {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.req_msg_id.serialize(buf);
        self.result.serialize(buf);
    }
}

impl Deserializable for RpcResult {
    fn deserialize(buf: Buffer) -> Result<Self> {
        expect_id(buf, Self::CONSTRUCTOR_ID)?;
        let req_msg_id = i64::deserialize(buf)?;
        let result = Blob::deserialize(buf)?;
        Ok(Self { req_msg_id, result })
    }
}

tl_object! {
    /// `rpc_error#2144ca19 error_code:int error_message:string = RpcError`
    RpcError = 0x2144ca19 {
        /// HTTP-like status code (`420`, `500`, …).
        error_code: i32,
        /// Error name such as `FLOOD_WAIT_30`.
        error_message: String,
    }
}

// ─── Keep-alive ──────────────────────────────────────────────────────────────

tl_object! {
    /// `pong#347773c5 msg_id:long ping_id:long = Pong`
    Pong = 0x347773c5 {
        /// `msg_id` of the ping being answered.
        msg_id: i64,
        /// Echo of the ping's `ping_id`.
        ping_id: i64,
    }
}

tl_object! {
    /// `http_wait#9299359f max_delay:int wait_after:int max_wait:int = HttpWait`
    HttpWait = 0x9299359f {
        /// Maximum delay in milliseconds before the server answers.
        max_delay: i32,
        /// Wait after the last message, in milliseconds.
        wait_after: i32,
        /// Upper bound of the long poll, in milliseconds.
        max_wait: i32,
    }
}

// ─── Acknowledgement & delivery notices ──────────────────────────────────────

tl_object! {
    /// `msgs_ack#62d6b459 msg_ids:Vector<long> = MsgsAck`
    MsgsAck = 0x62d6b459 {
        /// Acknowledged message ids.
        msg_ids: Vec<i64>,
    }
}

tl_object! {
    /// `msg_detailed_info#276d3ec6 msg_id:long answer_msg_id:long bytes:int status:int`
    MsgDetailedInfo = 0x276d3ec6 {
        /// The request the answer belongs to.
        msg_id: i64,
        /// Id of the answer the server already sent.
        answer_msg_id: i64,
        /// Size of the answer.
        bytes: i32,
        /// Status bits.
        status: i32,
    }
}

tl_object! {
    /// `msg_new_detailed_info#809db6df answer_msg_id:long bytes:int status:int`
    MsgNewDetailedInfo = 0x809db6df {
        /// Id of the answer the server already sent.
        answer_msg_id: i64,
        /// Size of the answer.
        bytes: i32,
        /// Status bits.
        status: i32,
    }
}

tl_object! {
    /// `new_session_created#9ec20908 first_msg_id:long unique_id:long server_salt:long`
    NewSessionCreated = 0x9ec20908 {
        /// First client message the new server session saw.
        first_msg_id: i64,
        /// Random id of the server session.
        unique_id: i64,
        /// Salt valid for the new session.
        server_salt: i64,
    }
}

// ─── Errors about a specific message ─────────────────────────────────────────

tl_object! {
    /// `bad_msg_notification#a7eff811 bad_msg_id:long bad_msg_seqno:int error_code:int`
    BadMsgNotification = 0xa7eff811 {
        /// The rejected message.
        bad_msg_id: i64,
        /// Its sequence number.
        bad_msg_seqno: i32,
        /// Reason code (`16`, `17`, `32`, …).
        error_code: i32,
    }
}

tl_object! {
    /// `bad_server_salt#edab447b bad_msg_id:long bad_msg_seqno:int error_code:int new_server_salt:long`
    BadServerSalt = 0xedab447b {
        /// The rejected message.
        bad_msg_id: i64,
        /// Its sequence number.
        bad_msg_seqno: i32,
        /// Always `48`.
        error_code: i32,
        /// The salt to use from now on.
        new_server_salt: i64,
    }
}

// ─── Salts ───────────────────────────────────────────────────────────────────

tl_object! {
    /// `future_salt#0949d9dc valid_since:int valid_until:int salt:long = FutureSalt`
    FutureSalt = 0x0949d9dc {
        /// Unix time the salt becomes valid.
        valid_since: i32,
        /// Unix time the salt expires.
        valid_until: i32,
        /// The salt.
        salt: i64,
    }
}

/// `future_salts#ae500895 req_msg_id:long now:int salts:vector<future_salt> = FutureSalts`
///
/// `salts` is a bare vector of bare `future_salt`.
#[derive(Clone, Debug, PartialEq)]
pub struct FutureSalts {
    /// `msg_id` of the `get_future_salts` request.
    pub req_msg_id: i64,
    /// Server time.
    pub now: i32,
    /// Upcoming salts.
    pub salts: Vec<FutureSalt>,
}

impl Identifiable for FutureSalts {
    const CONSTRUCTOR_ID: u32 = 0xae500895;
}

impl Serializable for FutureSalts {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.req_msg_id.serialize(buf);
        self.now.serialize(buf);
        (self.salts.len() as i32).serialize(buf);
        for s in &self.salts {
            s.valid_since.serialize(buf);
            s.valid_until.serialize(buf);
            s.salt.serialize(buf);
        }
    }
}

impl Deserializable for FutureSalts {
    fn deserialize(buf: Buffer) -> Result<Self> {
        expect_id(buf, Self::CONSTRUCTOR_ID)?;
        let req_msg_id = i64::deserialize(buf)?;
        let now = i32::deserialize(buf)?;
        let count = i32::deserialize(buf)?.max(0) as usize;
        let mut salts = Vec::with_capacity(count.min(buf.remaining() / 16));
        for _ in 0..count {
            salts.push(FutureSalt {
                valid_since: i32::deserialize(buf)?,
                valid_until: i32::deserialize(buf)?,
                salt: i64::deserialize(buf)?,
            });
        }
        Ok(Self { req_msg_id, now, salts })
    }
}

// ─── Envelopes ───────────────────────────────────────────────────────────────

tl_object! {
    /// `gzip_packed#3072cfa1 packed_data:bytes = Object`
    GzipPacked = 0x3072cfa1 {
        /// gzip-compressed serialized object.
        packed_data: Vec<u8>,
    }
}

/// Bare `message msg_id:long seqno:int bytes:int body:Object = Message`, the
/// element of a [`MsgContainer`].
#[derive(Clone, Debug, PartialEq)]
pub struct ContainerMessage {
    /// Message identifier.
    pub msg_id: i64,
    /// Sequence number.
    pub seq_no: i32,
    /// Serialized body, `bytes` long.
    pub body: Blob,
}

impl Serializable for ContainerMessage {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.msg_id.serialize(buf);
        self.seq_no.serialize(buf);
        (self.body.0.len() as i32).serialize(buf);
        self.body.serialize(buf);
    }
}

impl Deserializable for ContainerMessage {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let msg_id = i64::deserialize(buf)?;
        let seq_no = i32::deserialize(buf)?;
        let len = i32::deserialize(buf)?.max(0) as usize;
        let body = Blob(buf.read_slice(len)?.to_vec());
        Ok(Self { msg_id, seq_no, body })
    }
}

/// `msg_container#73f1f8dc messages:vector<message> = MessageContainer`
#[derive(Clone, Debug, PartialEq)]
pub struct MsgContainer {
    /// The bundled messages, in server order.
    pub messages: Vec<ContainerMessage>,
}

impl Identifiable for MsgContainer {
    const CONSTRUCTOR_ID: u32 = 0x73f1f8dc;
}

impl Serializable for MsgContainer {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        (self.messages.len() as i32).serialize(buf);
        self.messages.iter().for_each(|m| m.serialize(buf));
    }
}

impl Deserializable for MsgContainer {
    fn deserialize(buf: Buffer) -> Result<Self> {
        expect_id(buf, Self::CONSTRUCTOR_ID)?;
        let RawVec(messages) = RawVec::<ContainerMessage>::deserialize(buf)?;
        Ok(Self { messages })
    }
}
