//! A reconnectable link to one data center.
//!
//! [`Connection`] owns the parameters of the link and builds a brand-new
//! [`Transport`] on every connect attempt, so a half-open stream from a
//! failed attempt is never reused.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::TransportKind;
use crate::dialer::{Dialer, Target};
use crate::errors::InvocationError;
use crate::transport::Transport;
use crate::worker_pool::WorkerPool;

/// Connect attempts made by [`Connection::connect`] before giving up.
pub const MAX_CONNECTION_ATTEMPTS: u32 = 3;

/// Everything needed to reach a data center.
#[derive(Clone, Debug)]
pub struct ConnectionParams {
    /// Data center id.
    pub dc_id: i32,
    /// Address and port; IPv6 is inferred from the address.
    pub target: Target,
    /// Connect to the test servers.
    pub test_mode: bool,
    /// Connect to a media data center.
    pub media: bool,
    /// Framing and obfuscation.
    pub transport: TransportKind,
    /// Pause after a failed attempt.
    pub retry_delay: Duration,
    /// Bound for connecting and for each read.
    pub io_timeout: Duration,
}

impl ConnectionParams {
    /// Parameters for `address:port`; the address family follows the address.
    pub fn new(dc_id: i32, address: impl Into<String>, port: u16) -> Self {
        let host = address.into();
        let ipv6 = host.contains(':');
        Self {
            dc_id,
            target: Target { host, port, ipv6 },
            test_mode: false,
            media: false,
            transport: TransportKind::default(),
            retry_delay: Duration::from_secs(1),
            io_timeout: crate::transport::TRANSPORT_TIMEOUT,
        }
    }

    /// The dc id as embedded in an MTProxy obfuscation header.
    fn header_dc_id(&self) -> i16 {
        let id = if self.test_mode { self.dc_id + 10_000 } else { self.dc_id };
        let id = if self.media { -id } else { id };
        i16::try_from(id).unwrap_or_default()
    }
}

/// One data-center link, reconnectable.
pub struct Connection<D: Dialer> {
    dialer: Arc<D>,
    params: ConnectionParams,
    pool: WorkerPool,
    transport: Mutex<Option<Arc<Transport<D::Stream>>>>,
}

impl<D: Dialer> Connection<D> {
    /// A connection that is not connected yet.
    pub fn new(dialer: Arc<D>, params: ConnectionParams, pool: WorkerPool) -> Self {
        Self { dialer, params, pool, transport: Mutex::new(None) }
    }

    /// The link parameters.
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    fn current(&self) -> Option<Arc<Transport<D::Stream>>> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Connect, retrying network failures up to [`MAX_CONNECTION_ATTEMPTS`]
    /// times. Configuration errors are returned at once.
    pub async fn connect(&self) -> Result<(), InvocationError> {
        let p = &self.params;
        for _ in 0..MAX_CONNECTION_ATTEMPTS {
            tracing::info!("[mtlink] Connecting...");
            let attempt = Transport::connect(
                &*self.dialer,
                &p.target,
                &p.transport,
                p.header_dc_id(),
                self.pool.clone(),
                p.io_timeout,
            )
            .await;

            match attempt {
                Ok(transport) => {
                    let previous = self
                        .transport
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .replace(Arc::new(transport));
                    if let Some(previous) = previous {
                        previous.close().await;
                    }
                    tracing::info!(
                        "[mtlink] Connected! {} DC{}{} - IPv{} ({})",
                        if p.test_mode { "Test" } else { "Production" },
                        p.dc_id,
                        if p.media { " (media)" } else { "" },
                        if p.target.ipv6 { 6 } else { 4 },
                        p.transport,
                    );
                    return Ok(());
                }
                Err(InvocationError::Io(e)) => {
                    tracing::warn!("[mtlink] Unable to connect due to network issues: {e}");
                    tokio::time::sleep(p.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::warn!("[mtlink] Connection failed! Trying again...");
        Err(InvocationError::ConnectFailed { attempts: MAX_CONNECTION_ATTEMPTS })
    }

    /// Close the current transport, if any.
    pub async fn close(&self) {
        let transport = self.transport.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(transport) = transport {
            transport.close().await;
            tracing::info!("[mtlink] Disconnected");
        }
    }

    /// Send one packet. Fails with `NotConnected` before a successful connect.
    pub async fn send(&self, packet: &[u8]) -> io::Result<()> {
        match self.current() {
            Some(transport) => transport.send(packet, true).await,
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "not connected")),
        }
    }

    /// Receive one packet; `None` once the connection has ended.
    pub async fn recv(&self) -> Option<Vec<u8>> {
        self.current()?.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv6_follows_the_address() {
        assert!(ConnectionParams::new(2, "2001:67c:4e8:f002::a", 443).target.ipv6);
        assert!(!ConnectionParams::new(2, "149.154.167.51", 443).target.ipv6);
    }

    #[test]
    fn header_dc_id_marks_test_and_media() {
        let mut p = ConnectionParams::new(2, "127.0.0.1", 443);
        assert_eq!(p.header_dc_id(), 2);
        p.media = true;
        assert_eq!(p.header_dc_id(), -2);
        p.test_mode = true;
        assert_eq!(p.header_dc_id(), -10_002);
    }
}
