use std::io;
use std::time::Duration;

use mtlink_client::transport::Transport;
use mtlink_client::{Target, TcpDialer, TransportKind, WorkerPool};
use mtlink_crypto::{CtrStream, Obfuscation};
use mtlink_mtproto::transport::{Codec, Framing};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const TIMEOUT: Duration = Duration::from_secs(2);

/// The accepting end of a framed connection, without any MTProto on top.
struct Peer {
    stream: TcpStream,
    codec: Codec,
    decryptor: Option<CtrStream>,
    encryptor: Option<CtrStream>,
}

impl Peer {
    async fn accept(listener: &TcpListener, kind: &TransportKind) -> Self {
        let (mut stream, _) = listener.accept().await.unwrap();
        let framing = kind.framing();
        let (decryptor, encryptor) = match kind {
            TransportKind::Obfuscated { secret } => {
                let mut header = [0u8; 64];
                stream.read_exact(&mut header).await.unwrap();
                let (tag, obf) = Obfuscation::accept(&header, secret.as_ref());
                assert_eq!(Some(tag), framing.obfuscation_tag());
                (Some(obf.decryptor), Some(obf.encryptor))
            }
            _ => {
                let mut init = vec![0u8; framing.init_bytes().len()];
                stream.read_exact(&mut init).await.unwrap();
                assert_eq!(init, framing.init_bytes());
                (None, None)
            }
        };
        Self { stream, codec: Codec::new(framing), decryptor, encryptor }
    }

    async fn read(&mut self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        self.stream.read_exact(&mut buf).await.unwrap();
        if let Some(c) = self.decryptor.as_mut() {
            c.apply(&mut buf);
        }
        buf
    }

    async fn recv(&mut self) -> Vec<u8> {
        let mut header = self.read(self.codec.header_len()).await;
        let extra = self.codec.extended_header_len(&header);
        if extra > 0 {
            let more = self.read(extra).await;
            header.extend(more);
        }
        let len = self.codec.body_len(&header).unwrap();
        let body = self.read(len).await;
        self.codec.decode(&header, body).unwrap()
    }

    async fn send(&mut self, packet: &[u8]) {
        let mut frame = self.codec.encode(packet);
        if let Some(c) = self.encryptor.as_mut() {
            c.apply(&mut frame);
        }
        self.stream.write_all(&frame).await.unwrap();
    }
}

async fn pair(kind: TransportKind) -> (Transport<TcpStream>, Peer) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = local(&listener);
    let dialer = TcpDialer::direct();
    let (transport, peer) = tokio::join!(
        Transport::connect(&dialer, &target, &kind, 2, WorkerPool::default(), TIMEOUT),
        Peer::accept(&listener, &kind),
    );
    (transport.unwrap(), peer)
}

fn local(listener: &TcpListener) -> Target {
    Target { host: "127.0.0.1".into(), port: listener.local_addr().unwrap().port(), ipv6: false }
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7) as u8).collect()
}

#[tokio::test]
async fn packets_survive_every_framing() {
    let kinds = [
        TransportKind::Abridged,
        TransportKind::Intermediate,
        TransportKind::Full,
        TransportKind::Obfuscated { secret: None },
        TransportKind::Obfuscated { secret: Some([9u8; 16]) },
    ];
    for kind in kinds {
        let (transport, mut peer) = pair(kind.clone()).await;

        // Short and long abridged length forms.
        for len in [8, 1024] {
            transport.send(&payload(len), true).await.unwrap();
            assert_eq!(peer.recv().await, payload(len), "{kind}");

            peer.send(&payload(len)).await;
            assert_eq!(transport.recv().await, Some(payload(len)), "{kind}");
        }
        transport.close().await;
    }
}

#[tokio::test]
async fn peer_hangup_closes_the_transport() {
    let (transport, peer) = pair(TransportKind::Intermediate).await;
    drop(peer);

    assert_eq!(transport.recv().await, None);
    assert!(transport.is_closed());
}

#[tokio::test]
async fn close_is_idempotent_and_final() {
    let (transport, _peer) = pair(TransportKind::Abridged).await;
    assert_eq!(transport.framing(), Framing::Abridged);

    transport.close().await;
    transport.close().await;
    assert!(transport.is_closed());

    let err = transport.send(&payload(8), true).await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    assert_eq!(transport.recv().await, None);
}

#[tokio::test]
async fn silent_peer_times_out_reads() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = local(&listener);
    let dialer = TcpDialer::direct();
    let kind = TransportKind::Abridged;
    let (transport, _peer) = tokio::join!(
        Transport::connect(&dialer, &target, &kind, 2, WorkerPool::default(), Duration::from_millis(100)),
        Peer::accept(&listener, &kind),
    );
    let transport = transport.unwrap();

    assert_eq!(transport.recv().await, None);
    assert!(transport.is_closed());
}
