//! TL serialization core and the MTProto service schema.
//!
//! The session layer only ever needs a small, stable slice of the schema:
//! the service constructors of `mtproto.tl` plus the wrapper functions used
//! during connection setup. They are written out by hand in this crate; any
//! other API object passes through as an opaque [`Blob`].
//!
//! | Module        | Contents                                                   |
//! |---------------|------------------------------------------------------------|
//! | [`types`]     | Service constructors (`pong`, `rpc_result`, `msg_container`, …) |
//! | [`functions`] | RPC functions as `struct`s implementing [`RemoteCall`]     |
//!
//! # Example
//!
//! ```rust
//! use mtlink_tl_types::{functions, Serializable, Deserializable};
//!
//! let ping = functions::Ping { ping_id: 7 };
//! let bytes = ping.to_bytes();
//! assert_eq!(functions::Ping::from_bytes(&bytes).unwrap(), ping);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

#[macro_use]
mod macros;

pub mod deserialize;
pub mod functions;
pub mod serialize;
pub mod types;

pub use deserialize::{Cursor, Deserializable};
pub use serialize::Serializable;

/// API layer announced through `invokeWithLayer`.
pub const LAYER: i32 = 224;

/// Bare vector: `vector` (lowercase) as opposed to the boxed `Vector`.
///
/// Serialized as a count followed by the items, without the `0x1cb5c415`
/// constructor header.
#[derive(Clone, Debug, PartialEq)]
pub struct RawVec<T>(pub Vec<T>);

/// Already-serialized TL data passed through without interpretation.
///
/// Used for the generic `X` / `Object` positions of the schema: the result of
/// an RPC, the body of a container message, the `Config` returned by
/// `help.getConfig`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Blob(pub Vec<u8>);

impl Blob {
    /// Constructor ID of the wrapped object, if it holds at least four bytes.
    pub fn constructor_id(&self) -> Option<u32> {
        Cursor::from_slice(&self.0).peek_id().ok()
    }
}

impl From<Vec<u8>> for Blob {
    fn from(v: Vec<u8>) -> Self { Self(v) }
}

// ─── Core traits ─────────────────────────────────────────────────────────────

/// Every schema type has a unique 32-bit constructor ID.
pub trait Identifiable {
    /// The constructor ID as specified in the TL schema.
    const CONSTRUCTOR_ID: u32;
}

/// Marks a function type that can be sent to the server as an RPC call.
///
/// `Return` is the type the server will respond with.
pub trait RemoteCall: Serializable {
    /// The deserialized response type.
    type Return: Deserializable;
}

/// Human-readable schema name for a constructor ID of this crate.
///
/// Used for logging and for naming the request an RPC error belongs to.
pub fn name_for_id(id: u32) -> Option<&'static str> {
    use functions as f;
    use types as t;

    let name = match id {
        t::RpcResult::CONSTRUCTOR_ID => "rpc_result",
        t::RpcError::CONSTRUCTOR_ID => "rpc_error",
        t::Pong::CONSTRUCTOR_ID => "pong",
        t::BadMsgNotification::CONSTRUCTOR_ID => "bad_msg_notification",
        t::BadServerSalt::CONSTRUCTOR_ID => "bad_server_salt",
        t::FutureSalts::CONSTRUCTOR_ID => "future_salts",
        t::NewSessionCreated::CONSTRUCTOR_ID => "new_session_created",
        t::MsgDetailedInfo::CONSTRUCTOR_ID => "msg_detailed_info",
        t::MsgNewDetailedInfo::CONSTRUCTOR_ID => "msg_new_detailed_info",
        t::MsgsAck::CONSTRUCTOR_ID => "msgs_ack",
        t::MsgContainer::CONSTRUCTOR_ID => "msg_container",
        t::GzipPacked::CONSTRUCTOR_ID => "gzip_packed",
        t::HttpWait::CONSTRUCTOR_ID => "http_wait",
        f::Ping::CONSTRUCTOR_ID => "ping",
        f::PingDelayDisconnect::CONSTRUCTOR_ID => "ping_delay_disconnect",
        f::GetFutureSalts::CONSTRUCTOR_ID => "get_future_salts",
        f::INVOKE_WITH_LAYER_ID => "invokeWithLayer",
        f::INIT_CONNECTION_ID => "initConnection",
        f::INVOKE_WITHOUT_UPDATES_ID => "invokeWithoutUpdates",
        f::INVOKE_WITH_TAKEOUT_ID => "invokeWithTakeout",
        f::help::GetConfig::CONSTRUCTOR_ID => "help.getConfig",
        _ => return None,
    };
    Some(name)
}
