//! Proxy settings: SOCKS4, SOCKS5 and HTTP `CONNECT`.
//!
//! # Example
//! ```rust
//! use mtlink_client::{ProxyConfig, ProxyScheme};
//!
//! let proxy = ProxyConfig::new("socks5", "127.0.0.1", 1080).with_auth("user", "pass");
//! assert_eq!(proxy.scheme().unwrap(), ProxyScheme::Socks5);
//! ```

use std::fmt;
use std::str::FromStr;

use crate::errors::InvocationError;

/// Supported proxy protocols.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProxyScheme {
    /// SOCKS4; the username, if any, is sent as the user id.
    Socks4,
    /// SOCKS5 with optional username/password authentication.
    Socks5,
    /// HTTP `CONNECT` tunnel with optional basic authentication.
    Http,
}

impl FromStr for ProxyScheme {
    type Err = InvocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SOCKS4" => Ok(Self::Socks4),
            "SOCKS5" => Ok(Self::Socks5),
            "HTTP" => Ok(Self::Http),
            _ => Err(InvocationError::Config(format!("unknown proxy scheme {s:?}"))),
        }
    }
}

impl fmt::Display for ProxyScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Socks4 => "socks4",
            Self::Socks5 => "socks5",
            Self::Http => "http",
        })
    }
}

/// Where and how to reach the proxy.
///
/// The scheme is kept as written and validated when a connection is
/// attempted, so a typo surfaces as [`InvocationError::Config`] on the first
/// connect instead of being silently replaced.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProxyConfig {
    /// `socks4`, `socks5` or `http` (case-insensitive).
    pub scheme: String,
    /// Proxy host name or IP literal.
    pub hostname: String,
    /// Proxy port.
    pub port: u16,
    /// Optional user name.
    pub username: Option<String>,
    /// Optional password.
    pub password: Option<String>,
}

impl ProxyConfig {
    /// An unauthenticated proxy.
    pub fn new(scheme: impl Into<String>, hostname: impl Into<String>, port: u16) -> Self {
        Self { scheme: scheme.into(), hostname: hostname.into(), port, username: None, password: None }
    }

    /// Attach credentials.
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// The parsed scheme.
    pub fn scheme(&self) -> Result<ProxyScheme, InvocationError> {
        self.scheme.parse()
    }

    /// Whether the proxy itself must be reached over IPv6.
    pub fn is_ipv6(&self) -> bool {
        self.hostname.trim_matches(['[', ']']).parse::<std::net::Ipv6Addr>().is_ok()
    }
}
