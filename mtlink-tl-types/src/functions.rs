//! RPC functions used by the session layer.
//!
//! The wrapper functions (`invokeWithLayer`, `initConnection`, …) are generic
//! over the wrapped query and answer with the query's own return type.

use crate::types::{FutureSalts, Pong};
use crate::{Deserializable, Identifiable, RemoteCall, Serializable};

/// Constructor of `invokeWithLayer`.
pub const INVOKE_WITH_LAYER_ID: u32 = 0xda9b0d0d;
/// Constructor of `initConnection`.
pub const INIT_CONNECTION_ID: u32 = 0xc1cd5ea9;
/// Constructor of `invokeWithoutUpdates`.
pub const INVOKE_WITHOUT_UPDATES_ID: u32 = 0xbf9459b7;
/// Constructor of `invokeWithTakeout`.
pub const INVOKE_WITH_TAKEOUT_ID: u32 = 0xaca9fd2e;

// ─── Service functions ───────────────────────────────────────────────────────

tl_object! {
    /// `ping#7abe77ec ping_id:long = Pong`
    Ping = 0x7abe77ec {
        /// Arbitrary value echoed back in [`Pong::ping_id`].
        ping_id: i64,
    }
}

impl RemoteCall for Ping {
    type Return = Pong;
}

tl_object! {
    /// `ping_delay_disconnect#f3427b8c ping_id:long disconnect_delay:int = Pong`
    ///
    /// Asks the server to close the connection if nothing else arrives within
    /// `disconnect_delay` seconds.
    PingDelayDisconnect = 0xf3427b8c {
        /// Arbitrary value echoed back in [`Pong::ping_id`].
        ping_id: i64,
        /// Seconds of silence after which the server disconnects.
        disconnect_delay: i32,
    }
}

impl RemoteCall for PingDelayDisconnect {
    type Return = Pong;
}

tl_object! {
    /// `get_future_salts#b921bd04 num:int = FutureSalts`
    GetFutureSalts = 0xb921bd04 {
        /// Number of salts requested.
        num: i32,
    }
}

impl RemoteCall for GetFutureSalts {
    type Return = FutureSalts;
}

// ─── Wrappers ────────────────────────────────────────────────────────────────

/// `invokeWithLayer#da9b0d0d {X:Type} layer:int query:!X = X`
#[derive(Clone, Debug, PartialEq)]
pub struct InvokeWithLayer<Q> {
    /// API layer the client speaks, normally [`crate::LAYER`].
    pub layer: i32,
    /// The wrapped query.
    pub query: Q,
}

impl<Q> Identifiable for InvokeWithLayer<Q> {
    const CONSTRUCTOR_ID: u32 = INVOKE_WITH_LAYER_ID;
}

impl<Q: Serializable> Serializable for InvokeWithLayer<Q> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        INVOKE_WITH_LAYER_ID.serialize(buf);
        self.layer.serialize(buf);
        self.query.serialize(buf);
    }
}

impl<Q: RemoteCall> RemoteCall for InvokeWithLayer<Q> {
    type Return = Q::Return;
}

/// `initConnection#c1cd5ea9 {X:Type} flags:# api_id:int device_model:string
/// system_version:string app_version:string system_lang_code:string
/// lang_pack:string lang_code:string proxy:flags.0?InputClientProxy
/// params:flags.1?JSONValue query:!X = X`
///
/// `params` carries an already-serialized `JSONValue` when present.
#[derive(Clone, Debug, PartialEq)]
pub struct InitConnection<Q> {
    /// Application identifier.
    pub api_id: i32,
    /// Device model reported to the server.
    pub device_model: String,
    /// Operating system version.
    pub system_version: String,
    /// Application version.
    pub app_version: String,
    /// System language code.
    pub system_lang_code: String,
    /// Language pack name.
    pub lang_pack: String,
    /// Language code.
    pub lang_code: String,
    /// Optional `JSONValue` with extra client parameters.
    pub params: Option<crate::Blob>,
    /// The wrapped query.
    pub query: Q,
}

impl<Q> Identifiable for InitConnection<Q> {
    const CONSTRUCTOR_ID: u32 = INIT_CONNECTION_ID;
}

impl<Q: Serializable> Serializable for InitConnection<Q> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        INIT_CONNECTION_ID.serialize(buf);
        let flags: u32 = if self.params.is_some() { 1 << 1 } else { 0 };
        flags.serialize(buf);
        self.api_id.serialize(buf);
        self.device_model.serialize(buf);
        self.system_version.serialize(buf);
        self.app_version.serialize(buf);
        self.system_lang_code.serialize(buf);
        self.lang_pack.serialize(buf);
        self.lang_code.serialize(buf);
        self.params.serialize(buf);
        self.query.serialize(buf);
    }
}

impl<Q: RemoteCall> RemoteCall for InitConnection<Q> {
    type Return = Q::Return;
}

/// `invokeWithoutUpdates#bf9459b7 {X:Type} query:!X = X`
#[derive(Clone, Debug, PartialEq)]
pub struct InvokeWithoutUpdates<Q> {
    /// The wrapped query.
    pub query: Q,
}

impl<Q> Identifiable for InvokeWithoutUpdates<Q> {
    const CONSTRUCTOR_ID: u32 = INVOKE_WITHOUT_UPDATES_ID;
}

impl<Q: Serializable> Serializable for InvokeWithoutUpdates<Q> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        INVOKE_WITHOUT_UPDATES_ID.serialize(buf);
        self.query.serialize(buf);
    }
}

impl<Q: RemoteCall> RemoteCall for InvokeWithoutUpdates<Q> {
    type Return = Q::Return;
}

/// `invokeWithTakeout#aca9fd2e {X:Type} takeout_id:long query:!X = X`
#[derive(Clone, Debug, PartialEq)]
pub struct InvokeWithTakeout<Q> {
    /// Takeout session id.
    pub takeout_id: i64,
    /// The wrapped query.
    pub query: Q,
}

impl<Q> Identifiable for InvokeWithTakeout<Q> {
    const CONSTRUCTOR_ID: u32 = INVOKE_WITH_TAKEOUT_ID;
}

impl<Q: Serializable> Serializable for InvokeWithTakeout<Q> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        INVOKE_WITH_TAKEOUT_ID.serialize(buf);
        self.takeout_id.serialize(buf);
        self.query.serialize(buf);
    }
}

impl<Q: RemoteCall> RemoteCall for InvokeWithTakeout<Q> {
    type Return = Q::Return;
}

/// Constructor ID of the query inside a serialized request.
///
/// Looks through `invokeWithoutUpdates` and `invokeWithTakeout`, which only
/// change how a request is processed, not what it asks for.
pub fn inner_query_id(request: &[u8]) -> Option<u32> {
    let mut cursor = crate::Cursor::from_slice(request);
    match u32::deserialize(&mut cursor).ok()? {
        INVOKE_WITHOUT_UPDATES_ID => cursor.peek_id().ok(),
        INVOKE_WITH_TAKEOUT_ID => {
            i64::deserialize(&mut cursor).ok()?;
            cursor.peek_id().ok()
        }
        id => Some(id),
    }
}

// ─── help ────────────────────────────────────────────────────────────────────

/// Functions of the `help` namespace.
pub mod help {
    use crate::{Blob, RemoteCall};

    tl_object! {
        /// `help.getConfig#c4f9186b = Config`
        ///
        /// The `Config` answer is returned undecoded.
        GetConfig = 0xc4f9186b {}
    }

    impl RemoteCall for GetConfig {
        type Return = Blob;
    }
}
