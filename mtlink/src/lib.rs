//! # mtlink: MTProto 2.0 client sessions
//!
//! `mtlink` keeps one encrypted MTProto session alive against a Telegram
//! data center. It is split into four crates wired together here:
//!
//! | Sub-crate         | Role                                                   |
//! |-------------------|--------------------------------------------------------|
//! | `mtlink-tl-types` | TL serialization and the service/bootstrap schema      |
//! | `mtlink-crypto`   | `AuthKey`, MTProto 2.0 encryption, Obfuscated2 streams |
//! | `mtlink-mtproto`  | Message ids, envelopes, framing codecs, id validation  |
//! | `mtlink-client`   | Async transport, connection retries and the session    |
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use mtlink::{AuthKey, Config, Session};
//! use mtlink::tl::functions::help::GetConfig;
//!
//! # async fn run(key: [u8; 256]) -> Result<(), mtlink::InvocationError> {
//! let session = Session::new(Config { api_id: 12345, ..Config::default() }, AuthKey::from_bytes(key))?;
//! session.start().await?;
//!
//! let config = session.invoke(&GetConfig {}).await?;
//! println!("config is {} bytes", config.0.len());
//!
//! session.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! The auth key comes from a previous key exchange; `mtlink` only consumes it.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Re-export of [`mtlink_tl_types`]: serialization traits and schema types.
pub use mtlink_tl_types as tl;

/// Re-export of [`mtlink_mtproto`]: message ids, envelopes and framing.
pub use mtlink_mtproto as mtproto;

/// Re-export of [`mtlink_crypto`]: AES-IGE, Obfuscated2 and `AuthKey`.
pub use mtlink_crypto as crypto;

/// Re-export of [`mtlink_client`]: the async session runtime.
pub use mtlink_client as client;

pub use mtlink_client::{
    AuthKey, ClientInfo, Config, InvocationError, InvokeOptions, ProxyConfig, RpcError, Session, SessionState,
    Timeouts, TransportKind, UpdateStream,
};
