//! An in-process data center for session tests.
//!
//! Speaks abridged framing and the server side of the envelope. Handshake
//! traffic (`ping`, `ping_delay_disconnect`, `invokeWithLayer`) and `msgs_ack`
//! are answered or recorded automatically; every other request goes to the
//! test's handler.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use mtlink_client::{AuthKey, Config, Dialer, InvocationError, RawStream, Target, Timeouts};
use mtlink_mtproto::envelope::server;
use mtlink_mtproto::transport::{Codec, Framing};
use mtlink_mtproto::{Message, MessageId};
use mtlink_tl_types::functions::{INVOKE_WITH_LAYER_ID, Ping, PingDelayDisconnect};
use mtlink_tl_types::types::{BadServerSalt, MsgsAck, Pong, RpcError, RpcResult};
use mtlink_tl_types::{Blob, Cursor, Deserializable, Identifiable, Serializable};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Payload answered to `invokeWithLayer(initConnection(help.getConfig))`.
pub const CONFIG_BLOB: [u8; 8] = [0x6b, 0x18, 0xf9, 0xc4, 1, 2, 3, 4];

pub fn auth_key() -> AuthKey {
    let mut data = [0u8; 256];
    data.iter_mut().enumerate().for_each(|(i, b)| *b = (i * 13 + 5) as u8);
    AuthKey::from_bytes(data)
}

/// A client request as seen by the data center.
#[derive(Clone, Debug)]
pub struct Request {
    pub msg_id: i64,
    pub salt: i64,
    pub constructor_id: u32,
    pub body: Vec<u8>,
}

/// What the data center does with a request.
#[derive(Clone, Debug)]
pub enum Answer {
    /// `rpc_result` carrying this payload.
    Result(Vec<u8>),
    /// `rpc_result` carrying an `rpc_error`.
    Error(i32, &'static str),
    /// `bad_server_salt` with this new salt.
    BadSalt(i64),
    /// A 4-byte transport error frame with the negated code.
    TransportError(i32),
    /// Drop the connection.
    Close,
}

/// Something the data center sends without being asked.
enum Push {
    Message { msg_id: i64, body: Vec<u8>, content_related: bool },
    Raw(Vec<u8>),
}

type Handler = dyn Fn(&Request) -> Vec<Answer> + Send + Sync;

struct DcState {
    key: AuthKey,
    handler: Box<Handler>,
    connections: AtomicUsize,
    requests: Mutex<Vec<Request>>,
    acked: Mutex<Vec<i64>>,
    push: Mutex<Option<mpsc::UnboundedSender<Push>>>,
    next_id: AtomicI64,
}

/// A running fake data center.
pub struct FakeDc {
    pub addr: SocketAddr,
    state: Arc<DcState>,
}

impl FakeDc {
    pub async fn start(handler: impl Fn(&Request) -> Vec<Answer> + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(DcState {
            key: auth_key(),
            handler: Box::new(handler),
            connections: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            acked: Mutex::new(Vec::new()),
            push: Mutex::new(None),
            next_id: AtomicI64::new(0),
        });
        let st = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                st.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, Arc::clone(&st)));
            }
        });
        Self { addr, state }
    }

    /// Client configuration pointing at this data center.
    pub fn config(&self) -> Config {
        Config {
            api_id: 1,
            dc_id: 2,
            address: "127.0.0.1".into(),
            port: self.addr.port(),
            timeouts: Timeouts { connect_retry: Duration::from_millis(50), ..Default::default() },
            ..Default::default()
        }
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Requests that reached the handler.
    pub fn requests(&self) -> Vec<Request> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Every message id acknowledged by the client so far.
    pub fn acked(&self) -> Vec<i64> {
        self.state.acked.lock().unwrap().clone()
    }

    /// Push an unsolicited content-related object; returns its msg_id.
    pub fn push(&self, body: Vec<u8>) -> i64 {
        let msg_id = next_server_id(&self.state);
        self.send_push(Push::Message { msg_id, body, content_related: true });
        msg_id
    }

    /// Push a non-content object under `msg_id`, reused ids included.
    pub fn push_service_as(&self, msg_id: i64, body: Vec<u8>) {
        self.send_push(Push::Message { msg_id, body, content_related: false });
    }

    /// Push a frame carrying `packet` as is, without any encryption.
    pub fn push_raw(&self, packet: Vec<u8>) {
        self.send_push(Push::Raw(packet));
    }

    fn send_push(&self, push: Push) {
        let tx = self.state.push.lock().unwrap().clone().expect("no live connection");
        tx.send(push).unwrap_or_else(|_| panic!("connection gone"));
    }
}

/// Poll `cond` until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

fn next_server_id(state: &DcState) -> i64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
    let n = state.next_id.fetch_add(1, Ordering::SeqCst);
    (now << 32) | (n * 4 + 1)
}

async fn read_frame(rd: &mut OwnedReadHalf, codec: &mut Codec) -> Option<Vec<u8>> {
    let mut header = vec![0u8; codec.header_len()];
    rd.read_exact(&mut header).await.ok()?;
    let extra = codec.extended_header_len(&header);
    if extra > 0 {
        let mut more = vec![0u8; extra];
        rd.read_exact(&mut more).await.ok()?;
        header.extend(more);
    }
    let mut body = vec![0u8; codec.body_len(&header).ok()?];
    rd.read_exact(&mut body).await.ok()?;
    codec.decode(&header, body).ok()
}

struct Outbox {
    wr: OwnedWriteHalf,
    codec: Codec,
    state: Arc<DcState>,
    session_id: i64,
    salt: i64,
    content: i32,
}

impl Outbox {
    async fn send_as(&mut self, msg_id: i64, body: Vec<u8>, content_related: bool) {
        let seq_no = if content_related {
            self.content += 1;
            self.content * 2 - 1
        } else {
            self.content * 2
        };
        let message = Message::new(MessageId(msg_id), seq_no, body);
        let packet = server::pack(&message, self.salt, self.session_id, &self.state.key).unwrap();
        let frame = self.codec.encode(&packet);
        let _ = self.wr.write_all(&frame).await;
    }

    async fn send(&mut self, body: Vec<u8>, content_related: bool) {
        let msg_id = next_server_id(&self.state);
        self.send_as(msg_id, body, content_related).await;
    }

    async fn raw(&mut self, packet: &[u8]) {
        let frame = self.codec.encode(packet);
        let _ = self.wr.write_all(&frame).await;
    }
}

fn rpc_result(req_msg_id: i64, payload: Vec<u8>) -> Vec<u8> {
    RpcResult { req_msg_id, result: Blob(payload) }.to_bytes()
}

async fn serve(stream: TcpStream, state: Arc<DcState>) {
    let (mut rd, wr) = stream.into_split();
    let mut init = [0u8; 1];
    if rd.read_exact(&mut init).await.is_err() || init[0] != 0xef {
        return;
    }

    let (frames_tx, mut frames) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut codec = Codec::new(Framing::Abridged);
        while let Some(frame) = read_frame(&mut rd, &mut codec).await {
            if frames_tx.send(frame).is_err() {
                break;
            }
        }
    });
    let (push_tx, mut pushes) = mpsc::unbounded_channel::<Push>();
    *state.push.lock().unwrap() = Some(push_tx);

    let mut out = Outbox { wr, codec: Codec::new(Framing::Abridged), state: Arc::clone(&state), session_id: 0, salt: 0, content: 0 };
    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                let Ok(env) = server::unpack(&frame, &state.key) else { break };
                out.session_id = env.session_id;
                out.salt = env.salt;
                if !answer(&mut out, &state, env.salt, env.message).await {
                    break;
                }
            }
            Some(pushed) = pushes.recv() => match pushed {
                Push::Message { msg_id, body, content_related } => out.send_as(msg_id, body, content_related).await,
                Push::Raw(packet) => out.raw(&packet).await,
            },
        }
    }
}

/// Returns `false` to drop the connection.
async fn answer(out: &mut Outbox, state: &DcState, salt: i64, message: Message) -> bool {
    let msg_id = message.msg_id.0;
    let Ok(constructor_id) = Cursor::from_slice(&message.body).peek_id() else { return false };

    match constructor_id {
        Ping::CONSTRUCTOR_ID => {
            let ping = Ping::from_bytes(&message.body).unwrap();
            out.send(Pong { msg_id, ping_id: ping.ping_id }.to_bytes(), false).await;
            return true;
        }
        PingDelayDisconnect::CONSTRUCTOR_ID => {
            let ping = PingDelayDisconnect::from_bytes(&message.body).unwrap();
            out.send(Pong { msg_id, ping_id: ping.ping_id }.to_bytes(), false).await;
            return true;
        }
        INVOKE_WITH_LAYER_ID => {
            out.send(rpc_result(msg_id, CONFIG_BLOB.to_vec()), true).await;
            return true;
        }
        MsgsAck::CONSTRUCTOR_ID => {
            let ack = MsgsAck::from_bytes(&message.body).unwrap();
            state.acked.lock().unwrap().extend(ack.msg_ids);
            return true;
        }
        _ => {}
    }

    let request = Request { msg_id, salt, constructor_id, body: message.body };
    state.requests.lock().unwrap().push(request.clone());
    for reply in (state.handler)(&request) {
        match reply {
            Answer::Result(payload) => out.send(rpc_result(msg_id, payload), true).await,
            Answer::Error(code, name) => {
                let err = RpcError { error_code: code, error_message: name.into() }.to_bytes();
                out.send(rpc_result(msg_id, err), true).await;
            }
            Answer::BadSalt(new_server_salt) => {
                let bad = BadServerSalt { bad_msg_id: msg_id, bad_msg_seqno: message.seq_no, error_code: 48, new_server_salt };
                out.send(bad.to_bytes(), false).await;
            }
            Answer::TransportError(code) => out.raw(&(-code).to_le_bytes()).await,
            Answer::Close => return false,
        }
    }
    true
}

// ── A dialer whose writes can be made to fail ────────────────────────────────

/// Dials plain TCP; while `broken` is set every write fails.
#[derive(Clone, Default)]
pub struct FlakyWrites {
    pub broken: Arc<AtomicBool>,
    pub failed_writes: Arc<AtomicUsize>,
}

pub struct FlakyStream {
    inner: TcpStream,
    gate: FlakyWrites,
}

impl Dialer for FlakyWrites {
    type Stream = FlakyStream;

    async fn dial(&self, target: &Target) -> Result<FlakyStream, InvocationError> {
        let inner = TcpStream::connect((target.host.as_str(), target.port)).await?;
        Ok(FlakyStream { inner, gate: self.clone() })
    }
}

impl RawStream for FlakyStream {
    fn set_abortive_close(&self) -> io::Result<()> {
        self.inner.set_abortive_close()
    }
}

impl AsyncRead for FlakyStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for FlakyStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.gate.broken.load(Ordering::SeqCst) {
            this.gate.failed_writes.fetch_add(1, Ordering::SeqCst);
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "writes disabled")));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
