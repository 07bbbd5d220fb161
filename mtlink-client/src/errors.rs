//! Error types for mtlink-client.

use std::{fmt, io};

use mtlink_mtproto::service::DecodeError;

// ─── RpcError ─────────────────────────────────────────────────────────────────

/// An error returned by the server in response to an RPC call.
///
/// Numeric values are stripped from the name and placed in [`RpcError::value`].
///
/// # Example
/// `FLOOD_WAIT_30` → `RpcError { code: 420, name: "FLOOD_WAIT", value: Some(30), .. }`
#[derive(Clone, Debug, PartialEq)]
pub struct RpcError {
    /// HTTP-like status code.
    pub code: i32,
    /// Error name in SCREAMING_SNAKE_CASE with digits removed.
    pub name: String,
    /// Numeric suffix extracted from the name, if any.
    pub value: Option<u32>,
    /// Schema name of the request that failed, when known.
    pub caused_by: Option<&'static str>,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RPC {}: {}", self.code, self.name)?;
        if let Some(v) = self.value {
            write!(f, " (value: {v})")?;
        }
        if let Some(req) = self.caused_by {
            write!(f, " (caused by \"{req}\")")?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}

impl RpcError {
    /// Parse a raw error message like `"FLOOD_WAIT_30"` into an `RpcError`.
    pub fn from_server(code: i32, message: &str) -> Self {
        if let Some(idx) = message.rfind('_') {
            let suffix = &message[idx + 1..];
            if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
                if let Ok(v) = suffix.parse::<u32>() {
                    let name = message[..idx].to_string();
                    return Self { code, name, value: Some(v), caused_by: None };
                }
            }
        }
        Self { code, name: message.to_string(), value: None, caused_by: None }
    }

    /// Attach the name of the originating request.
    pub fn caused_by(mut self, request: Option<&'static str>) -> Self {
        self.caused_by = request;
        self
    }

    /// Match on the error name, with optional wildcard prefix/suffix `'*'`.
    ///
    /// # Examples
    /// - `err.is("FLOOD_WAIT")`: exact match
    /// - `err.is("PHONE_CODE_*")`: starts-with match
    /// - `err.is("*_INVALID")`: ends-with match
    pub fn is(&self, pattern: &str) -> bool {
        if let Some(prefix) = pattern.strip_suffix('*') {
            self.name.starts_with(prefix)
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            self.name.ends_with(suffix)
        } else {
            self.name == pattern
        }
    }

    /// Seconds to wait, if this is a `FLOOD_WAIT_X` or `FLOOD_PREMIUM_WAIT_X`.
    pub fn flood_wait_seconds(&self) -> Option<u64> {
        if self.code == 420 && (self.name == "FLOOD_WAIT" || self.name == "FLOOD_PREMIUM_WAIT") {
            self.value.map(u64::from)
        } else {
            None
        }
    }
}

// ─── TransportError ───────────────────────────────────────────────────────────

/// A transport-level error frame sent by the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportError {
    /// `-404`: the server does not know our auth key.
    AuthKeyNotFound,
    /// `-429`: too many connections or requests.
    Flood,
    /// `-444`: the data center id is wrong.
    InvalidDc,
    /// Any other code.
    Unknown(i32),
}

impl TransportError {
    /// Classify a (positive) transport error code.
    pub fn from_code(code: i32) -> Self {
        match code {
            404 => Self::AuthKeyNotFound,
            429 => Self::Flood,
            444 => Self::InvalidDc,
            other => Self::Unknown(other),
        }
    }

    /// Whether the session cannot recover by reconnecting.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::AuthKeyNotFound)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthKeyNotFound => write!(f, "auth key not found in the system"),
            Self::Flood => write!(f, "transport flood, slow down your requests"),
            Self::InvalidDc => write!(f, "invalid data center"),
            Self::Unknown(code) => write!(f, "unknown transport error {code}"),
        }
    }
}

impl std::error::Error for TransportError {}

// ─── InvocationError ──────────────────────────────────────────────────────────

/// The error type returned from any operation that talks to the server.
#[derive(Debug)]
pub enum InvocationError {
    /// The server rejected the request.
    Rpc(RpcError),
    /// Network / I/O failure.
    Io(io::Error),
    /// Response deserialization failed.
    Deserialize(String),
    /// The server closed the transport with an error code.
    Transport(TransportError),
    /// Invalid configuration (e.g. unknown proxy scheme). Never retried.
    Config(String),
    /// No response arrived within the wait window.
    RequestTimeout,
    /// `invoke` gave up.
    RetriesExhausted {
        /// Schema name of the request.
        method: String,
        /// Attempts made.
        retries: u32,
    },
    /// Every connection attempt failed.
    ConnectFailed {
        /// Attempts made.
        attempts: u32,
    },
    /// The server refused the message itself (`bad_msg_notification`).
    BadMessage {
        /// The notification's error code.
        code: i32,
    },
    /// The request was abandoned because the session stopped.
    Dropped,
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rpc(e)          => write!(f, "{e}"),
            Self::Io(e)           => write!(f, "I/O error: {e}"),
            Self::Deserialize(s)  => write!(f, "deserialize error: {s}"),
            Self::Transport(e)    => write!(f, "transport error: {e}"),
            Self::Config(s)       => write!(f, "configuration error: {s}"),
            Self::RequestTimeout  => write!(f, "request timed out"),
            Self::RetriesExhausted { method, retries } => {
                write!(f, "failed to invoke \"{method}\" after {retries} retries")
            }
            Self::ConnectFailed { attempts } => write!(f, "connection failed after {attempts} attempts"),
            Self::BadMessage { code } => {
                write!(f, "bad message ({code}): {}", mtlink_mtproto::service::bad_msg_description(*code))
            }
            Self::Dropped         => write!(f, "request dropped"),
        }
    }
}

impl std::error::Error for InvocationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Rpc(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for InvocationError {
    fn from(e: io::Error) -> Self { Self::Io(e) }
}

impl From<mtlink_tl_types::deserialize::Error> for InvocationError {
    fn from(e: mtlink_tl_types::deserialize::Error) -> Self { Self::Deserialize(e.to_string()) }
}

impl From<DecodeError> for InvocationError {
    fn from(e: DecodeError) -> Self { Self::Deserialize(e.to_string()) }
}

impl From<RpcError> for InvocationError {
    fn from(e: RpcError) -> Self { Self::Rpc(e) }
}

impl From<TransportError> for InvocationError {
    fn from(e: TransportError) -> Self { Self::Transport(e) }
}

impl InvocationError {
    /// Returns `true` if this is the named RPC error (supports `'*'` wildcards).
    pub fn is(&self, pattern: &str) -> bool {
        match self {
            Self::Rpc(e) => e.is(pattern),
            _            => false,
        }
    }

    /// If this is a flood wait, returns how many seconds to wait.
    pub fn flood_wait_seconds(&self) -> Option<u64> {
        match self {
            Self::Rpc(e) => e.flood_wait_seconds(),
            _            => None,
        }
    }

    /// Failures worth retrying after a short delay: network trouble, lost or
    /// refused messages, and internal server errors.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(_) | Self::Dropped | Self::RequestTimeout | Self::BadMessage { .. } => true,
            Self::Rpc(e) => matches!(e.code, 500 | 503 | -503),
            _ => false,
        }
    }

    /// `AUTH_KEY_DUPLICATED` or any `401`: the key cannot be used, reconnecting
    /// will not help.
    pub fn is_fatal_auth(&self) -> bool {
        match self {
            Self::Rpc(e) => e.code == 401 || (e.code == 406 && e.name == "AUTH_KEY_DUPLICATED"),
            _ => false,
        }
    }

    /// Failures a background restart may cure.
    pub(crate) fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Rpc(_) | Self::RequestTimeout | Self::ConnectFailed { .. } | Self::BadMessage { .. }
        )
    }
}
