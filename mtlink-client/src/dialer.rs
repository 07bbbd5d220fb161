//! Opening the raw byte stream to a data center, directly or through a proxy.
//!
//! [`Dialer`] is the seam between the session machinery and the network:
//! [`TcpDialer`] is the real implementation, tests may plug in their own.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use base64::prelude::*;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_socks::tcp::{Socks4Stream, Socks5Stream};

use crate::errors::InvocationError;
use crate::proxy::{ProxyConfig, ProxyScheme};

/// Longest HTTP `CONNECT` response header accepted from a proxy.
const MAX_PROXY_RESPONSE: usize = 8 * 1024;

/// A connected byte stream a transport can run over.
pub trait RawStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Make the eventual close drop the connection without a graceful FIN.
    fn set_abortive_close(&self) -> io::Result<()> {
        Ok(())
    }
}

impl RawStream for TcpStream {
    fn set_abortive_close(&self) -> io::Result<()> {
        socket2::SockRef::from(self).set_linger(Some(Duration::ZERO))
    }
}

/// The endpoint a connection wants to reach.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    /// Host name or IP literal.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Whether the data center is reached over IPv6.
    pub ipv6: bool,
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.ipv6 && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Opens streams to data centers.
///
/// Errors are classified by the caller: [`InvocationError::Io`] is retried,
/// anything else (typically [`InvocationError::Config`]) fails the connect at
/// once.
pub trait Dialer: Send + Sync + 'static {
    /// Stream type produced.
    type Stream: RawStream;

    /// Open a stream to `target`.
    fn dial(&self, target: &Target) -> impl Future<Output = Result<Self::Stream, InvocationError>> + Send;
}

/// Plain TCP, optionally tunnelled through a [`ProxyConfig`].
#[derive(Clone, Debug, Default)]
pub struct TcpDialer {
    proxy: Option<ProxyConfig>,
}

impl TcpDialer {
    /// Dial every target directly.
    pub fn direct() -> Self {
        Self { proxy: None }
    }

    /// Dial through `proxy` when given.
    pub fn new(proxy: Option<ProxyConfig>) -> Self {
        Self { proxy }
    }

    /// The proxy in use.
    pub fn proxy(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref()
    }
}

impl Dialer for TcpDialer {
    type Stream = TcpStream;

    async fn dial(&self, target: &Target) -> Result<TcpStream, InvocationError> {
        let Some(proxy) = &self.proxy else {
            return Ok(connect_tcp(&target.host, target.port, target.ipv6).await?);
        };

        let scheme = proxy.scheme()?;
        let socks5_auth = match scheme {
            ProxyScheme::Socks5 => socks5_credentials(proxy)?,
            _ => None,
        };
        tracing::debug!("[mtlink] Dialing {target} via {scheme} proxy {}:{}", proxy.hostname, proxy.port);
        let socket = connect_tcp(&proxy.hostname, proxy.port, proxy.is_ipv6()).await?;
        let host = target.host.trim_matches(['[', ']']);

        let stream = match scheme {
            ProxyScheme::Socks4 => match proxy.username.as_deref() {
                Some(user) => Socks4Stream::connect_with_userid_and_socket(socket, (host, target.port), user)
                    .await
                    .map_err(socks_error)?
                    .into_inner(),
                None => Socks4Stream::connect_with_socket(socket, (host, target.port))
                    .await
                    .map_err(socks_error)?
                    .into_inner(),
            },
            ProxyScheme::Socks5 => match socks5_auth {
                Some((user, pass)) => {
                    Socks5Stream::connect_with_password_and_socket(socket, (host, target.port), user, pass)
                        .await
                        .map_err(socks_error)?
                        .into_inner()
                }
                None => Socks5Stream::connect_with_socket(socket, (host, target.port))
                    .await
                    .map_err(socks_error)?
                    .into_inner(),
            },
            ProxyScheme::Http => {
                let mut socket = socket;
                http_connect(&mut socket, target, proxy).await?;
                socket
            }
        };
        Ok(stream)
    }
}

/// SOCKS5 username/password pair; half a pair is a configuration error.
fn socks5_credentials(proxy: &ProxyConfig) -> Result<Option<(&str, &str)>, InvocationError> {
    match (proxy.username.as_deref(), proxy.password.as_deref()) {
        (Some(user), Some(pass)) => Ok(Some((user, pass))),
        (None, None) => Ok(None),
        (Some(_), None) => Err(InvocationError::Config("SOCKS5 proxy username given without a password".into())),
        (None, Some(_)) => Err(InvocationError::Config("SOCKS5 proxy password given without a username".into())),
    }
}

fn socks_error(e: tokio_socks::Error) -> io::Error {
    io::Error::other(e)
}

/// Resolve `host` and connect to the first reachable address of the wanted
/// family.
async fn connect_tcp(host: &str, port: u16, ipv6: bool) -> io::Result<TcpStream> {
    let host = host.trim_matches(['[', ']']);
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await?
        .filter(|a| a.is_ipv6() == ipv6)
        .collect();

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        let family = if ipv6 { "IPv6" } else { "IPv4" };
        io::Error::new(io::ErrorKind::AddrNotAvailable, format!("{host} has no {family} address"))
    }))
}

/// Open an HTTP `CONNECT` tunnel over `stream`.
async fn http_connect<S>(stream: &mut S, target: &Target, proxy: &ProxyConfig) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
    if let (Some(user), Some(pass)) = (&proxy.username, &proxy.password) {
        let auth = BASE64_STANDARD.encode(format!("{user}:{pass}"));
        request.push_str(&format!("Proxy-Authorization: Basic {auth}\r\n"));
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    // Byte by byte, so no tunnelled data is consumed past the header.
    let mut response = Vec::with_capacity(128);
    while !response.ends_with(b"\r\n\r\n") {
        if response.len() >= MAX_PROXY_RESPONSE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "proxy response header too long"));
        }
        response.push(stream.read_u8().await?);
    }

    let status = response.split(|&b| b == b'\n').next().unwrap_or_default();
    let status = String::from_utf8_lossy(status);
    let code = status.split_whitespace().nth(1);
    if code != Some("200") {
        return Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            format!("proxy refused CONNECT: {}", status.trim_end()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Target {
        Target { host: "149.154.167.51".into(), port: 443, ipv6: false }
    }

    #[tokio::test]
    async fn http_connect_sends_credentials_and_accepts_200() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let proxy = ProxyConfig::new("http", "proxy", 3128).with_auth("alice", "secret");

        let proxy_side = tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            let n = server.read(&mut buf).await.unwrap();
            let request = String::from_utf8(buf[..n].to_vec()).unwrap();
            server.write_all(b"HTTP/1.1 200 Connection established\r\n\r\nmtproto").await.unwrap();
            request
        });

        http_connect(&mut client, &target(), &proxy).await.unwrap();
        let request = proxy_side.await.unwrap();
        assert!(request.starts_with("CONNECT 149.154.167.51:443 HTTP/1.1\r\n"));
        assert!(request.contains(&format!("Proxy-Authorization: Basic {}", BASE64_STANDARD.encode("alice:secret"))));

        let mut rest = [0u8; 7];
        client.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"mtproto");
    }

    #[tokio::test]
    async fn http_connect_rejection_is_an_io_error() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            let _ = server.read(&mut buf).await;
            let _ = server.write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n").await;
        });
        let err = http_connect(&mut client, &target(), &ProxyConfig::new("http", "p", 1)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }

    #[test]
    fn ipv6_targets_are_bracketed() {
        let t = Target { host: "2001:b28:f23d:f001::a".into(), port: 443, ipv6: true };
        assert_eq!(t.to_string(), "[2001:b28:f23d:f001::a]:443");
    }

    #[tokio::test]
    async fn unknown_scheme_fails_before_dialing() {
        let dialer = TcpDialer::new(Some(ProxyConfig::new("gopher", "127.0.0.1", 1)));
        let err = dialer.dial(&target()).await.unwrap_err();
        assert!(matches!(err, InvocationError::Config(_)));
    }

    #[tokio::test]
    async fn socks5_username_without_password_fails_before_dialing() {
        let mut proxy = ProxyConfig::new("socks5", "127.0.0.1", 1);
        proxy.username = Some("alice".into());
        let err = TcpDialer::new(Some(proxy)).dial(&target()).await.unwrap_err();
        assert!(matches!(err, InvocationError::Config(_)), "{err}");

        let mut proxy = ProxyConfig::new("socks5", "127.0.0.1", 1);
        proxy.password = Some("secret".into());
        let err = TcpDialer::new(Some(proxy)).dial(&target()).await.unwrap_err();
        assert!(matches!(err, InvocationError::Config(_)), "{err}");
    }

    #[test]
    fn socks5_credentials_come_in_pairs() {
        let proxy = ProxyConfig::new("socks5", "p", 1080);
        assert_eq!(socks5_credentials(&proxy).unwrap(), None);
        let proxy = proxy.with_auth("alice", "secret");
        assert_eq!(socks5_credentials(&proxy).unwrap(), Some(("alice", "secret")));
    }
}
