use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use mtlink_client::{
    Connection, ConnectionParams, Dialer, InvocationError, MAX_CONNECTION_ATTEMPTS, Target, TransportKind, WorkerPool,
};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};

/// Fails the first `failures` dials with `error`, then connects for real.
struct FlakyDialer {
    failures: usize,
    error: fn() -> InvocationError,
    dials: AtomicUsize,
}

impl FlakyDialer {
    fn new(failures: usize, error: fn() -> InvocationError) -> Self {
        Self { failures, error, dials: AtomicUsize::new(0) }
    }
}

impl Dialer for FlakyDialer {
    type Stream = TcpStream;

    async fn dial(&self, target: &Target) -> Result<TcpStream, InvocationError> {
        if self.dials.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err((self.error)());
        }
        Ok(TcpStream::connect((target.host.as_str(), target.port)).await?)
    }
}

fn refused() -> InvocationError {
    InvocationError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
}

async fn listener() -> (TcpListener, ConnectionParams) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut params = ConnectionParams::new(2, "127.0.0.1", listener.local_addr().unwrap().port());
    params.retry_delay = Duration::from_millis(10);
    (listener, params)
}

#[tokio::test]
async fn connect_survives_two_network_failures() {
    let (listener, params) = listener().await;
    let dialer = Arc::new(FlakyDialer::new(2, refused));
    let conn = Connection::new(Arc::clone(&dialer), params, WorkerPool::default());

    conn.connect().await.unwrap();
    assert_eq!(dialer.dials.load(Ordering::SeqCst), 3);

    let (mut peer, _) = listener.accept().await.unwrap();
    let mut init = [0u8; 1];
    peer.read_exact(&mut init).await.unwrap();
    assert_eq!(init, [0xef]);
    conn.close().await;
}

#[tokio::test]
async fn connect_gives_up_after_max_attempts() {
    let (_listener, params) = listener().await;
    let dialer = Arc::new(FlakyDialer::new(usize::MAX, refused));
    let conn = Connection::new(Arc::clone(&dialer), params, WorkerPool::default());

    match conn.connect().await {
        Err(InvocationError::ConnectFailed { attempts }) => assert_eq!(attempts, MAX_CONNECTION_ATTEMPTS),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(dialer.dials.load(Ordering::SeqCst), MAX_CONNECTION_ATTEMPTS as usize);
}

#[tokio::test]
async fn configuration_errors_are_not_retried() {
    let (_listener, params) = listener().await;
    let dialer = Arc::new(FlakyDialer::new(usize::MAX, || InvocationError::Config("bad proxy".into())));
    let conn = Connection::new(Arc::clone(&dialer), params, WorkerPool::default());

    assert!(matches!(conn.connect().await, Err(InvocationError::Config(_))));
    assert_eq!(dialer.dials.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unconnected_connection_is_harmless() {
    let (_listener, params) = listener().await;
    let conn = Connection::new(Arc::new(FlakyDialer::new(0, refused)), params, WorkerPool::default());

    let err = conn.send(b"abcd").await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    assert_eq!(conn.recv().await, None);
    conn.close().await;
}

#[tokio::test]
async fn send_after_close_is_not_connected() {
    let (listener, mut params) = listener().await;
    params.transport = TransportKind::Intermediate;
    let conn = Connection::new(Arc::new(FlakyDialer::new(0, refused)), params, WorkerPool::default());
    conn.connect().await.unwrap();
    let (_peer, _) = listener.accept().await.unwrap();

    conn.close().await;
    conn.close().await;
    let err = conn.send(&[0u8; 8]).await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotConnected);
}
