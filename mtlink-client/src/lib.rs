//! # mtlink-client
//!
//! Async MTProto 2.0 session runtime.
//!
//! ## Features
//! - Abridged, intermediate, full and obfuscated (MTProxy) transports
//! - SOCKS4 / SOCKS5 / HTTP `CONNECT` proxies
//! - Reconnects with bounded attempts; background restarts on network loss
//! - Replay and clock-skew filtering of inbound messages
//! - Batched acknowledgements and `ping_delay_disconnect` keep-alive
//! - Transparent salt refresh, `FLOOD_WAIT` sleeping and transient retries
//! - Raw update stream for everything the server pushes unprompted
//!
//! The auth key is an input: key generation happens elsewhere.
//!
//! ```rust,no_run
//! use mtlink_client::{AuthKey, Config, Session};
//! use mtlink_tl_types::functions::help;
//!
//! # async fn f(key: [u8; 256]) -> Result<(), mtlink_client::InvocationError> {
//! let session = Session::new(Config { api_id: 12345, ..Default::default() }, AuthKey::from_bytes(key))?;
//! session.start().await?;
//! let config = session.invoke(&help::GetConfig {}).await?;
//! println!("{} bytes of config", config.0.len());
//! session.stop().await;
//! # Ok(()) }
//! ```

#![deny(unsafe_code)]

mod connection;
mod errors;
mod retry;
mod session;
mod tasks;

pub mod dialer;
pub mod proxy;
pub mod transport;
pub mod worker_pool;

pub use connection::{Connection, ConnectionParams, MAX_CONNECTION_ATTEMPTS};
pub use dialer::{Dialer, RawStream, Target, TcpDialer};
pub use errors::{InvocationError, RpcError, TransportError};
pub use mtlink_crypto::AuthKey;
pub use proxy::{ProxyConfig, ProxyScheme};
pub use retry::{InvokeOptions, MAX_RETRIES, RETRY_DELAY, RetryAction, SLEEP_THRESHOLD, WAIT_TIMEOUT};
pub use session::{ACKS_THRESHOLD, BoxError, Hook, Session, SessionBuilder, SessionState, START_TIMEOUT};
pub use worker_pool::{CRYPTO_EXECUTOR_WORKERS, WorkerPool};

use std::fmt;
use std::time::Duration;

use mtlink_mtproto::transport::Framing;
use tokio::sync::mpsc;

// ─── TransportKind ────────────────────────────────────────────────────────────

/// Which MTProto transport framing to use for all connections.
///
/// | Variant | Init bytes | Notes |
/// |---------|-----------|-------|
/// | `Abridged` | `0xef` | Default, smallest overhead |
/// | `Intermediate` | `0xeeeeeeee` | Better proxy compat |
/// | `Full` | none | Adds seqno + CRC32 |
/// | `Obfuscated` | random 64B | Bypasses DPI / MTProxy |
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransportKind {
    /// MTProto [Abridged] transport: length prefix is 1 or 4 bytes.
    ///
    /// [Abridged]: https://core.telegram.org/mtproto/mtproto-transports#abridged
    #[default]
    Abridged,
    /// MTProto [Intermediate] transport: 4-byte LE length prefix.
    ///
    /// [Intermediate]: https://core.telegram.org/mtproto/mtproto-transports#intermediate
    Intermediate,
    /// MTProto [Full] transport: 4-byte length + seqno + CRC32.
    ///
    /// [Full]: https://core.telegram.org/mtproto/mtproto-transports#full
    Full,
    /// [Obfuscated2] transport: AES-CTR stream cipher over Abridged framing.
    /// Required for MTProxy and networks with deep-packet inspection.
    ///
    /// [Obfuscated2]: https://core.telegram.org/mtproto/mtproto-transports#obfuscated-2
    Obfuscated {
        /// The 16-byte proxy secret, or `None` for keyless obfuscation.
        secret: Option<[u8; 16]>,
    },
}

impl TransportKind {
    /// The framing spoken inside the (possibly obfuscated) stream.
    pub fn framing(&self) -> Framing {
        match self {
            Self::Abridged | Self::Obfuscated { .. } => Framing::Abridged,
            Self::Intermediate => Framing::Intermediate,
            Self::Full => Framing::Full,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Abridged => "abridged",
            Self::Intermediate => "intermediate",
            Self::Full => "full",
            Self::Obfuscated { secret: None } => "obfuscated",
            Self::Obfuscated { secret: Some(_) } => "obfuscated, mtproxy",
        })
    }
}

// ─── Config ───────────────────────────────────────────────────────────────────

/// What the client tells the server about itself in `initConnection`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClientInfo {
    pub device_model:     String,
    pub system_version:   String,
    pub app_version:      String,
    pub system_lang_code: String,
    pub lang_pack:        String,
    pub lang_code:        String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            device_model:     "mtlink".into(),
            system_version:   std::env::consts::OS.into(),
            app_version:      env!("CARGO_PKG_VERSION").into(),
            system_lang_code: "en".into(),
            lang_pack:        String::new(),
            lang_code:        "en".into(),
        }
    }
}

/// Timing knobs of a session.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Timeouts {
    /// Wait for each handshake request during start (default 2 s).
    pub start:         Duration,
    /// How long `invoke` waits for the session to be started (default 15 s).
    /// Also sets the keep-alive `disconnect_delay` to this plus 10 s.
    pub wait:          Duration,
    /// Bound for connecting, each read and closing (default 10 s).
    pub io:            Duration,
    /// Keep-alive period (default 5 s).
    pub ping_interval: Duration,
    /// Pause after a failed connect attempt (default 1 s).
    pub connect_retry: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            start:         START_TIMEOUT,
            wait:          WAIT_TIMEOUT,
            io:            transport::TRANSPORT_TIMEOUT,
            ping_interval: session::PING_INTERVAL,
            connect_retry: Duration::from_secs(1),
        }
    }
}

/// Configuration for [`Session`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    pub api_id:      i32,
    pub dc_id:       i32,
    /// Data center address; an address containing `:` is dialed over IPv6.
    pub address:     String,
    pub port:        u16,
    pub test_mode:   bool,
    /// Media data center.
    pub media:       bool,
    /// CDN data center: no `initConnection` on start.
    pub cdn:         bool,
    /// Which MTProto transport framing to use (default: Abridged).
    pub transport:   TransportKind,
    /// Optional proxy every connection is tunnelled through.
    pub proxy:       Option<ProxyConfig>,
    pub client_info: ClientInfo,
    pub timeouts:    Timeouts,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_id:      0,
            dc_id:       2,
            address:     "149.154.167.51".into(),
            port:        443,
            test_mode:   false,
            media:       false,
            cdn:         false,
            transport:   TransportKind::Abridged,
            proxy:       None,
            client_info: ClientInfo::default(),
            timeouts:    Timeouts::default(),
        }
    }
}

impl Config {
    /// Connection parameters derived from this configuration.
    pub fn connection_params(&self) -> ConnectionParams {
        let mut params = ConnectionParams::new(self.dc_id, self.address.clone(), self.port);
        params.test_mode = self.test_mode;
        params.media = self.media;
        params.transport = self.transport.clone();
        params.retry_delay = self.timeouts.connect_retry;
        params.io_timeout = self.timeouts.io;
        params
    }
}

// ─── UpdateStream ─────────────────────────────────────────────────────────────

/// An object the server sent without being asked: an update, or any other
/// API object nobody was waiting for.
#[derive(Clone, Debug, PartialEq)]
pub struct RawUpdate {
    /// Server message id that carried it.
    pub msg_id:         i64,
    /// Constructor ID of `body`.
    pub constructor_id: u32,
    /// The serialized object, inflated.
    pub body:           Vec<u8>,
}

/// Sending half of an update channel, handed to [`SessionBuilder::updates`].
pub type UpdateSender = mpsc::UnboundedSender<RawUpdate>;

/// Asynchronous stream of [`RawUpdate`]s.
pub struct UpdateStream {
    rx: mpsc::UnboundedReceiver<RawUpdate>,
}

impl UpdateStream {
    /// A connected sender / stream pair.
    pub fn channel() -> (UpdateSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Wait for the next update. Returns `None` once every sender is gone.
    pub async fn next(&mut self) -> Option<RawUpdate> {
        self.rx.recv().await
    }
}
