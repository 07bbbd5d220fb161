//! Async transport: framing, optional obfuscation and timeouts over a
//! [`RawStream`].
//!
//! The stream is split once; each half lives behind its own async lock so a
//! pending read never blocks a write. Every read and the connect itself are
//! bounded by the I/O timeout, and every operation gives way as soon as the
//! transport is closed.

use std::io;
use std::time::Duration;

use mtlink_crypto::{CtrStream, Obfuscation};
use mtlink_mtproto::transport::{Codec, Framing};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;

use crate::TransportKind;
use crate::dialer::{Dialer, RawStream, Target};
use crate::errors::InvocationError;
use crate::worker_pool::WorkerPool;

/// Default bound for connecting, each read, marker waits and closing.
pub const TRANSPORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest inbound packet accepted.
const MAX_PACKET_LEN: usize = 16 * 1024 * 1024;

struct ReadSide<S> {
    half: Option<ReadHalf<S>>,
    codec: Codec,
    cipher: Option<CtrStream>,
}

struct WriteSide<S> {
    half: Option<WriteHalf<S>>,
    codec: Codec,
    cipher: Option<CtrStream>,
}

/// One connected, framed byte stream.
pub struct Transport<S> {
    read: Mutex<ReadSide<S>>,
    write: Mutex<WriteSide<S>>,
    /// Raised once the handshake bytes are out; ordinary sends wait for it.
    marker: watch::Sender<bool>,
    closed: CancellationToken,
    framing: Framing,
    pool: WorkerPool,
    io_timeout: Duration,
}

/// XOR `data` with `cipher` on the worker pool.
///
/// The cipher is moved to the pool and back; if the job fails it is lost and
/// the caller must close the transport.
async fn keystream(pool: &WorkerPool, cipher: &mut Option<CtrStream>, data: Vec<u8>) -> io::Result<Vec<u8>> {
    let Some(mut c) = cipher.take() else {
        return Ok(data);
    };
    let (c, data) = pool
        .run(move || {
            let mut data = data;
            c.apply(&mut data);
            (c, data)
        })
        .await?;
    *cipher = Some(c);
    Ok(data)
}

fn timed_out(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, what.to_string())
}

impl<S: RawStream> Transport<S> {
    /// Dial `target` and perform the transport handshake, all within
    /// `io_timeout`.
    pub async fn connect<D>(
        dialer: &D,
        target: &Target,
        kind: &TransportKind,
        dc_id: i16,
        pool: WorkerPool,
        io_timeout: Duration,
    ) -> Result<Self, InvocationError>
    where
        D: Dialer<Stream = S>,
    {
        let open = async {
            let stream = dialer.dial(target).await?;
            if let Err(e) = stream.set_abortive_close() {
                tracing::debug!("[mtlink] Could not disable lingering close: {e}");
            }
            Self::handshake(stream, kind, dc_id, pool, io_timeout).await
        };
        match tokio::time::timeout(io_timeout, open).await {
            Ok(result) => result,
            Err(_) => Err(timed_out("Connection timed out").into()),
        }
    }

    async fn handshake(
        stream: S,
        kind: &TransportKind,
        dc_id: i16,
        pool: WorkerPool,
        io_timeout: Duration,
    ) -> Result<Self, InvocationError> {
        let framing = kind.framing();
        let (r, w) = tokio::io::split(stream);
        let transport = Self {
            read: Mutex::new(ReadSide { half: Some(r), codec: Codec::new(framing), cipher: None }),
            write: Mutex::new(WriteSide { half: Some(w), codec: Codec::new(framing), cipher: None }),
            marker: watch::Sender::new(false),
            closed: CancellationToken::new(),
            framing,
            pool,
            io_timeout,
        };

        let header = match kind {
            TransportKind::Obfuscated { secret } => {
                let tag = framing.obfuscation_tag().ok_or_else(|| {
                    InvocationError::Config(format!("{framing:?} framing cannot be obfuscated"))
                })?;
                let secret = *secret;
                let obf = transport.pool.run(move || Obfuscation::new(tag, secret.as_ref(), dc_id)).await??;
                transport.read.lock().await.cipher = Some(obf.decryptor);
                transport.write.lock().await.cipher = Some(obf.encryptor);
                obf.header.to_vec()
            }
            _ => framing.init_bytes().to_vec(),
        };

        if !header.is_empty() {
            transport.write_raw(&header).await?;
        }
        transport.marker.send_replace(true);
        Ok(transport)
    }

    async fn write_raw(&self, bytes: &[u8]) -> io::Result<()> {
        let mut side = self.write.lock().await;
        let half = side.half.as_mut().ok_or_else(not_connected)?;
        tokio::select! {
            _ = self.closed.cancelled() => Err(not_connected()),
            r = async { half.write_all(bytes).await?; half.flush().await } => r,
        }
    }

    /// Frame and transmit one packet.
    ///
    /// With `wait_for_marker`, waits (bounded) until the handshake is out.
    /// Any error leaves the transport unusable.
    pub async fn send(&self, packet: &[u8], wait_for_marker: bool) -> io::Result<()> {
        if self.closed.is_cancelled() {
            return Err(not_connected());
        }
        if wait_for_marker {
            let mut ready = self.marker.subscribe();
            match tokio::time::timeout(self.io_timeout, ready.wait_for(|ready| *ready)).await {
                Ok(Ok(_)) => {}
                Ok(Err(_)) => return Err(not_connected()),
                Err(_) => return Err(timed_out("transport handshake not sent in time")),
            }
        }

        let result = self.send_framed(packet).await;
        if result.is_err() {
            self.closed.cancel();
        }
        result
    }

    async fn send_framed(&self, packet: &[u8]) -> io::Result<()> {
        let mut guard = self.write.lock().await;
        let side = &mut *guard;
        let frame = side.codec.encode(packet);
        let frame = keystream(&self.pool, &mut side.cipher, frame).await?;
        let half = side.half.as_mut().ok_or_else(not_connected)?;
        tokio::select! {
            _ = self.closed.cancelled() => Err(not_connected()),
            r = async { half.write_all(&frame).await?; half.flush().await } => r,
        }
    }

    /// Read exactly `len` bytes, each read bounded by the I/O timeout.
    ///
    /// `None` means the connection ended: error, timeout, EOF or close.
    async fn read_exact(&self, side: &mut ReadSide<S>, len: usize) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        {
            let half = side.half.as_mut()?;
            while filled < len {
                let read = tokio::select! {
                    _ = self.closed.cancelled() => return None,
                    r = tokio::time::timeout(self.io_timeout, half.read(&mut buf[filled..])) => r,
                };
                match read {
                    Ok(Ok(0)) => {
                        tracing::debug!("[mtlink] Connection closed by peer");
                        return None;
                    }
                    Ok(Ok(n)) => filled += n,
                    Ok(Err(e)) => {
                        tracing::debug!("[mtlink] Read failed: {e}");
                        return None;
                    }
                    Err(_) => {
                        tracing::debug!("[mtlink] Read timed out");
                        return None;
                    }
                }
            }
        }
        match keystream(&self.pool, &mut side.cipher, buf).await {
            Ok(buf) => Some(buf),
            Err(e) => {
                tracing::warn!("[mtlink] Deobfuscation failed: {e}");
                None
            }
        }
    }

    /// Receive one packet, unframed.
    pub async fn recv(&self) -> Option<Vec<u8>> {
        let packet = self.recv_inner().await;
        if packet.is_none() {
            self.closed.cancel();
        }
        packet
    }

    async fn recv_inner(&self) -> Option<Vec<u8>> {
        let mut guard = self.read.lock().await;
        let side = &mut *guard;

        let header_len = side.codec.header_len();
        let mut header = self.read_exact(side, header_len).await?;
        let extra = side.codec.extended_header_len(&header);
        if extra > 0 {
            header.extend(self.read_exact(side, extra).await?);
        }

        let body_len = match side.codec.body_len(&header) {
            Ok(n) if n <= MAX_PACKET_LEN => n,
            Ok(n) => {
                tracing::warn!("[mtlink] Refusing {n}-byte packet");
                return None;
            }
            Err(e) => {
                tracing::warn!("[mtlink] Bad frame: {e}");
                return None;
            }
        };
        let body = self.read_exact(side, body_len).await?;
        match side.codec.decode(&header, body) {
            Ok(packet) => Some(packet),
            Err(e) => {
                tracing::warn!("[mtlink] Bad frame: {e}");
                None
            }
        }
    }

    /// Close the transport. Idempotent.
    ///
    /// Pending reads and writes are interrupted; the stream is dropped once
    /// they let go of it, or left behind with a warning after the I/O timeout.
    pub async fn close(&self) {
        if self.closed.is_cancelled() && self.released() {
            return;
        }
        self.closed.cancel();
        let release = async {
            let mut w = self.write.lock().await;
            let mut r = self.read.lock().await;
            w.half.take();
            r.half.take();
        };
        if tokio::time::timeout(self.io_timeout, release).await.is_err() {
            tracing::warn!("[mtlink] Disconnect timed out");
        }
    }

    /// Whether both halves have already been dropped.
    fn released(&self) -> bool {
        match (self.write.try_lock(), self.read.try_lock()) {
            (Ok(w), Ok(r)) => w.half.is_none() && r.half.is_none(),
            _ => false,
        }
    }

    /// Whether [`Transport::close`] was called or the stream failed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// The framing in use.
    pub fn framing(&self) -> Framing {
        self.framing
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport is closed")
}
