//! The session: lifecycle, receive loop, keep-alive and the RPC engine.
//!
//! A [`Session`] owns one [`Connection`] to one data center plus all state
//! that must survive reconnects: message counters, the server salt, the
//! replay filter. Its lifecycle is
//! `Stopped → Starting → Started → Stopping → Stopped`; network trouble is
//! handled by restarting in the background while callers keep invoking.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use mtlink_crypto::AuthKey;
use mtlink_mtproto::service::{self, Object, RpcAnswer};
use mtlink_mtproto::transport::transport_error_code;
use mtlink_mtproto::{Admission, Message, MsgFactory, MsgIdValidator, ServerClock, envelope};
use mtlink_tl_types::functions::{InitConnection, InvokeWithLayer, Ping, PingDelayDisconnect, help, inner_query_id};
use mtlink_tl_types::types::{self as tl, MsgsAck};
use mtlink_tl_types::{Deserializable, LAYER, RemoteCall, Serializable, name_for_id};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connection::Connection;
use crate::dialer::{Dialer, TcpDialer};
use crate::errors::{InvocationError, RpcError, TransportError};
use crate::retry::{InvokeOptions, RetryAction};
use crate::tasks::Supervisor;
use crate::worker_pool::WorkerPool;
use crate::{Config, RawUpdate, UpdateSender};

/// Wait for each handshake request during start.
pub const START_TIMEOUT: Duration = Duration::from_secs(2);
/// Pending acknowledgements that trigger a `msgs_ack` batch.
pub const ACKS_THRESHOLD: usize = 10;
/// Keep-alive period.
pub const PING_INTERVAL: Duration = Duration::from_secs(5);

/// Error type accepted from lifecycle hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Called with the dc id after the session started or stopped.
pub type Hook = Arc<dyn Fn(i32) -> Result<(), BoxError> + Send + Sync>;

/// Lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Starting,
    Started,
    Stopping,
}

/// What the receive side hands to a waiting request.
#[derive(Debug)]
enum Reply {
    Payload(Vec<u8>),
    RpcError(tl::RpcError),
    BadMsg(i32),
    BadSalt(i64),
}

type PendingTx = oneshot::Sender<Result<Reply, InvocationError>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Schema name of the query inside `body`, for errors and logs.
fn query_name(body: &[u8]) -> Option<&'static str> {
    inner_query_id(body).and_then(name_for_id)
}

fn method_name(body: &[u8]) -> String {
    match query_name(body) {
        Some(name) => name.to_string(),
        None => match inner_query_id(body) {
            Some(id) => format!("{id:#010x}"),
            None => "unknown".to_string(),
        },
    }
}

// ─── Builder ──────────────────────────────────────────────────────────────────

/// Builder for [`Session`].
pub struct SessionBuilder<D: Dialer = TcpDialer> {
    config: Config,
    auth_key: AuthKey,
    dialer: D,
    clock: Option<Arc<ServerClock>>,
    pool: Option<WorkerPool>,
    updates: Option<UpdateSender>,
    on_connect: Option<Hook>,
    on_disconnect: Option<Hook>,
}

impl<D: Dialer> SessionBuilder<D> {
    /// Open streams with `dialer` instead.
    pub fn dialer<D2: Dialer>(self, dialer: D2) -> SessionBuilder<D2> {
        SessionBuilder {
            config: self.config,
            auth_key: self.auth_key,
            dialer,
            clock: self.clock,
            pool: self.pool,
            updates: self.updates,
            on_connect: self.on_connect,
            on_disconnect: self.on_disconnect,
        }
    }

    /// Share a server clock with other sessions of the same client.
    pub fn clock(mut self, clock: Arc<ServerClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Run cryptography on `pool` instead of a private one.
    pub fn worker_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Deliver unsolicited objects to `sink`. Without one they are dropped.
    pub fn updates(mut self, sink: UpdateSender) -> Self {
        self.updates = Some(sink);
        self
    }

    /// Call `hook` every time the session has started.
    pub fn on_connect(mut self, hook: impl Fn(i32) -> Result<(), BoxError> + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(hook));
        self
    }

    /// Call `hook` every time the session has stopped.
    pub fn on_disconnect(mut self, hook: impl Fn(i32) -> Result<(), BoxError> + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(hook));
        self
    }

    /// Create the session. Nothing is dialed until [`Session::start`].
    pub fn build(self) -> Result<Session<D>, InvocationError> {
        let session_id = mtlink_mtproto::new_session_id()?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(ServerClock::new()));
        let pool = self.pool.unwrap_or_default();
        let params = self.config.connection_params();
        let (started, _) = watch::channel(false);

        let inner = Inner {
            connection: Connection::new(Arc::new(self.dialer), params, pool.clone()),
            config: self.config,
            auth_key: Arc::new(self.auth_key),
            session_id,
            factory: MsgFactory::new(clock),
            pool,
            state: Mutex::new(SessionState::Stopped),
            pending: Mutex::new(HashMap::new()),
            pending_acks: Mutex::new(HashSet::new()),
            validator: Mutex::new(MsgIdValidator::new()),
            salt: AtomicI64::new(0),
            started,
            fatal: Mutex::new(None),
            restart_lock: tokio::sync::Mutex::new(()),
            ping_stop: Mutex::new(CancellationToken::new()),
            ping_task: Mutex::new(None),
            recv_task: Mutex::new(None),
            supervisor: Supervisor::new(),
            updates: self.updates,
            on_connect: self.on_connect,
            on_disconnect: self.on_disconnect,
        };
        Ok(Session { inner: Arc::new(inner) })
    }
}

// ─── Session ──────────────────────────────────────────────────────────────────

/// An MTProto session with one data center.
///
/// Cheap to clone; clones share the same session.
pub struct Session<D: Dialer = TcpDialer> {
    inner: Arc<Inner<D>>,
}

impl<D: Dialer> Clone for Session<D> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

struct Inner<D: Dialer> {
    config: Config,
    auth_key: Arc<AuthKey>,
    session_id: i64,
    connection: Connection<D>,
    factory: MsgFactory,
    pool: WorkerPool,
    state: Mutex<SessionState>,
    pending: Mutex<HashMap<i64, PendingTx>>,
    pending_acks: Mutex<HashSet<i64>>,
    validator: Mutex<MsgIdValidator>,
    salt: AtomicI64,
    started: watch::Sender<bool>,
    /// Set when the server reported an error no restart can cure.
    fatal: Mutex<Option<TransportError>>,
    restart_lock: tokio::sync::Mutex<()>,
    ping_stop: Mutex<CancellationToken>,
    ping_task: Mutex<Option<JoinHandle<()>>>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
    supervisor: Supervisor,
    updates: Option<UpdateSender>,
    on_connect: Option<Hook>,
    on_disconnect: Option<Hook>,
}

impl Session<TcpDialer> {
    /// A session dialing over TCP, through `config.proxy` when set.
    pub fn new(config: Config, auth_key: AuthKey) -> Result<Self, InvocationError> {
        Self::builder(config, auth_key).build()
    }

    /// Start configuring a session.
    pub fn builder(config: Config, auth_key: AuthKey) -> SessionBuilder<TcpDialer> {
        let dialer = TcpDialer::new(config.proxy.clone());
        SessionBuilder {
            config,
            auth_key,
            dialer,
            clock: None,
            pool: None,
            updates: None,
            on_connect: None,
            on_disconnect: None,
        }
    }
}

impl<D: Dialer> Session<D> {
    /// Connect and perform the session handshake.
    ///
    /// A no-op unless the session is stopped. Network and RPC failures are
    /// logged and answered with a background restart; `Ok(())` is returned
    /// and [`Session::invoke`] waits for the restart. An unusable auth key,
    /// a configuration error or anything unexpected stops the session and is
    /// returned.
    pub async fn start(&self) -> Result<(), InvocationError> {
        self.inner.start().await
    }

    /// Tear the session down. A no-op when already stopping or stopped.
    ///
    /// Requests still waiting for an answer fail with
    /// [`InvocationError::Dropped`].
    pub async fn stop(&self) {
        self.inner.stop().await
    }

    /// Stop and start again, keeping the newest accepted message ids so
    /// stragglers from the old connection are refused.
    ///
    /// Concurrent restarts run one after another.
    pub fn restart(&self) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>> {
        Inner::restart(Arc::clone(&self.inner))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *lock(&self.inner.state)
    }

    /// Whether the handshake has completed on the current connection.
    pub fn is_started(&self) -> bool {
        *self.inner.started.borrow()
    }

    /// Session id sent in every message.
    pub fn session_id(&self) -> i64 {
        self.inner.session_id
    }

    /// Server salt currently in use.
    pub fn salt(&self) -> i64 {
        self.inner.salt.load(Ordering::Acquire)
    }

    /// The server clock this session syncs and allocates ids from.
    pub fn clock(&self) -> &Arc<ServerClock> {
        self.inner.factory.clock()
    }

    /// The configuration the session was built with.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Send a serialized request and wait up to `timeout` for its answer.
    ///
    /// A stale salt is corrected and the request resent once; no retries
    /// beyond that.
    pub async fn send(&self, body: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, InvocationError> {
        self.inner.send(body, timeout).await
    }

    /// Send a serialized object without waiting for any answer.
    pub async fn send_nowait(&self, body: Vec<u8>) -> Result<(), InvocationError> {
        self.inner.send_nowait(body).await
    }

    /// Invoke `request` with the default [`InvokeOptions`].
    pub async fn invoke<R: RemoteCall>(&self, request: &R) -> Result<R::Return, InvocationError> {
        self.invoke_with(request, &InvokeOptions::default()).await
    }

    /// Invoke `request`, sleeping through short flood waits and retrying
    /// transient failures as `options` allow.
    ///
    /// Once the server has reported the auth key unknown, every call fails
    /// with [`InvocationError::Transport`] until the session is started again.
    pub async fn invoke_with<R: RemoteCall>(
        &self,
        request: &R,
        options: &InvokeOptions,
    ) -> Result<R::Return, InvocationError> {
        let payload = self.invoke_raw(request.to_bytes(), options).await?;
        Ok(R::Return::from_bytes(&payload)?)
    }

    /// [`Session::invoke_with`] over an already serialized request.
    pub async fn invoke_raw(&self, body: Vec<u8>, options: &InvokeOptions) -> Result<Vec<u8>, InvocationError> {
        self.inner.check_fatal()?;
        let mut started = self.inner.started.subscribe();
        let wait = self.inner.config.timeouts.wait;
        if tokio::time::timeout(wait, started.wait_for(|s| *s)).await.is_err() {
            tracing::debug!("[mtlink] Session not started after {wait:?}, sending anyway");
        }

        let method = method_name(&body);
        // Sends that failed transiently; flood waits are not counted.
        let mut attempt = 0u32;
        loop {
            let err = match self.inner.send(body.clone(), options.timeout).await {
                Ok(payload) => return Ok(payload),
                Err(e) => e,
            };
            match options.classify(&err) {
                RetryAction::FloodWait(delay) => {
                    tracing::warn!(
                        "[mtlink] Waiting for {} seconds before continuing (required by \"{method}\")",
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryAction::Retry(delay) => {
                    attempt += 1;
                    if attempt >= options.retries {
                        return Err(InvocationError::RetriesExhausted { method, retries: options.retries });
                    }
                    tracing::warn!("[mtlink] [{attempt}] Retrying \"{method}\" due to: {err}");
                    tokio::time::sleep(delay).await;
                }
                RetryAction::Fail => return Err(err),
            }
        }
    }
}

// ─── Lifecycle ────────────────────────────────────────────────────────────────

impl<D: Dialer> Inner<D> {
    /// Move to `to` if the current state is one of `from`.
    fn transition(&self, from: &[SessionState], to: SessionState) -> bool {
        let mut state = lock(&self.state);
        if from.contains(&*state) {
            *state = to;
            true
        } else {
            false
        }
    }

    fn is_started(&self) -> bool {
        *self.started.borrow()
    }

    fn check_fatal(&self) -> Result<(), InvocationError> {
        match *lock(&self.fatal) {
            Some(err) => Err(InvocationError::Transport(err)),
            None => Ok(()),
        }
    }

    async fn start(self: &Arc<Self>) -> Result<(), InvocationError> {
        if !self.transition(&[SessionState::Stopped], SessionState::Starting) {
            return Ok(());
        }
        lock(&self.fatal).take();
        match self.handshake().await {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal_auth() => {
                tracing::error!("[mtlink] Session start failed: {e}");
                self.stop().await;
                Err(e)
            }
            Err(e) if e.is_network() => {
                tracing::warn!("[mtlink] Session start failed, restarting: {e}");
                self.spawn_restart();
                Ok(())
            }
            Err(e) => {
                tracing::error!("[mtlink] Session start failed: {e}");
                self.stop().await;
                Err(e)
            }
        }
    }

    async fn handshake(self: &Arc<Self>) -> Result<(), InvocationError> {
        self.connection.connect().await?;

        let recv = tokio::spawn(Arc::clone(self).recv_worker());
        let previous = lock(&self.recv_task).replace(recv);
        if let Some(previous) = previous {
            previous.abort();
        }

        let start_timeout = self.config.timeouts.start;
        self.send(Ping { ping_id: 0 }.to_bytes(), start_timeout).await?;

        if !self.config.cdn {
            let info = &self.config.client_info;
            let init = InvokeWithLayer {
                layer: LAYER,
                query: InitConnection {
                    api_id: self.config.api_id,
                    device_model: info.device_model.clone(),
                    system_version: info.system_version.clone(),
                    app_version: info.app_version.clone(),
                    system_lang_code: info.system_lang_code.clone(),
                    lang_pack: info.lang_pack.clone(),
                    lang_code: info.lang_code.clone(),
                    params: None,
                    query: help::GetConfig {},
                },
            };
            self.send(init.to_bytes(), start_timeout).await?;
        }

        let stop = CancellationToken::new();
        *lock(&self.ping_stop) = stop.clone();
        let ping = tokio::spawn(Arc::clone(self).ping_worker(stop));
        let previous = lock(&self.ping_task).replace(ping);
        if let Some(previous) = previous {
            previous.abort();
        }

        self.transition(&[SessionState::Starting], SessionState::Started);
        self.started.send_replace(true);
        tracing::info!("[mtlink] Session started");
        self.fire_hook(self.on_connect.as_ref(), "connect");
        Ok(())
    }

    async fn stop(self: &Arc<Self>) {
        if !self.transition(&[SessionState::Starting, SessionState::Started], SessionState::Stopping) {
            return;
        }
        {
            let mut validator = lock(&self.validator);
            validator.reset_ignored();
            validator.clear_stored();
        }
        self.started.send_replace(false);

        lock(&self.ping_stop).cancel();
        let ping = lock(&self.ping_task).take();
        if let Some(ping) = ping {
            let _ = ping.await;
        }

        self.connection.close().await;

        let recv = lock(&self.recv_task).take();
        if let Some(recv) = recv {
            let _ = recv.await;
        }

        self.fail_pending(|| InvocationError::Dropped);
        self.transition(&[SessionState::Stopping], SessionState::Stopped);
        tracing::info!("[mtlink] Session stopped");
        self.fire_hook(self.on_disconnect.as_ref(), "disconnect");
    }

    fn restart(self: Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>> {
        Box::pin(async move {
            let _serial = self.restart_lock.lock().await;
            lock(&self.validator).carry_over();
            self.stop().await;
            if let Err(e) = self.start().await {
                tracing::error!("[mtlink] Restart failed: {e}");
            }
        })
    }

    fn spawn_restart(self: &Arc<Self>) {
        let restart = Inner::restart(Arc::clone(self));
        self.supervisor.spawn("restart", async move {
            restart.await;
            Ok(())
        });
    }

    fn fail_pending(&self, err: impl Fn() -> InvocationError) {
        let pending: Vec<PendingTx> = lock(&self.pending).drain().map(|(_, tx)| tx).collect();
        if !pending.is_empty() {
            tracing::debug!("[mtlink] Failing {} pending requests", pending.len());
        }
        for tx in pending {
            let _ = tx.send(Err(err()));
        }
    }

    fn fire_hook(&self, hook: Option<&Hook>, what: &str) {
        let Some(hook) = hook else { return };
        match std::panic::catch_unwind(AssertUnwindSafe(|| hook(self.config.dc_id))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("[mtlink] {what} handler failed: {e}"),
            Err(_) => tracing::error!("[mtlink] {what} handler panicked"),
        }
    }
}

// ─── Workers ──────────────────────────────────────────────────────────────────

impl<D: Dialer> Inner<D> {
    async fn recv_worker(self: Arc<Self>) {
        tracing::info!("[mtlink] NetworkTask started");
        loop {
            match self.connection.recv().await {
                Some(packet) if packet.len() != 4 => {
                    let me = Arc::clone(&self);
                    self.supervisor.spawn("handle_packet", me.handle_packet(packet));
                }
                packet => {
                    if let Some(code) = packet.as_deref().and_then(transport_error_code) {
                        let err = TransportError::from_code(code);
                        tracing::warn!("[mtlink] Server sent transport error: {code} ({err})");
                        if err.is_fatal() {
                            *lock(&self.fatal) = Some(err);
                            self.started.send_replace(false);
                            self.fail_pending(|| InvocationError::Transport(err));
                            let me = Arc::clone(&self);
                            self.supervisor.spawn("stop", async move {
                                me.stop().await;
                                Ok(())
                            });
                            break;
                        }
                    }
                    if self.is_started() {
                        self.spawn_restart();
                    }
                    break;
                }
            }
        }
        tracing::info!("[mtlink] NetworkTask stopped");
    }

    async fn ping_worker(self: Arc<Self>, stop: CancellationToken) {
        tracing::info!("[mtlink] PingTask started");
        let interval = self.config.timeouts.ping_interval;
        let disconnect_delay = i32::try_from((self.config.timeouts.wait + Duration::from_secs(10)).as_secs())
            .unwrap_or(i32::MAX);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            let ping = PingDelayDisconnect { ping_id: self.factory.next_msg_id(), disconnect_delay };
            match self.send_nowait(ping.to_bytes()).await {
                Ok(()) => {}
                Err(InvocationError::Io(e)) => {
                    tracing::warn!("[mtlink] Ping failed: {e}");
                    self.spawn_restart();
                    break;
                }
                Err(e) => tracing::debug!("[mtlink] Ping failed: {e}"),
            }
        }
        tracing::info!("[mtlink] PingTask stopped");
    }

    async fn handle_packet(self: Arc<Self>, packet: Vec<u8>) -> Result<(), InvocationError> {
        let key = Arc::clone(&self.auth_key);
        let session_id = self.session_id;
        let envelope = match self.pool.run(move || envelope::unpack(&packet, session_id, &key)).await? {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("[mtlink] Unable to unpack packet: {e}");
                if self.is_started() {
                    self.spawn_restart();
                }
                return Ok(());
            }
        };

        for message in service::flatten(envelope.message)? {
            self.handle_message(message);
        }

        let batch: Option<Vec<i64>> = {
            let mut acks = lock(&self.pending_acks);
            (acks.len() >= ACKS_THRESHOLD).then(|| acks.drain().collect())
        };
        if let Some(msg_ids) = batch {
            tracing::debug!("[mtlink] Sending {} acks", msg_ids.len());
            let body = MsgsAck { msg_ids: msg_ids.clone() }.to_bytes();
            if let Err(e) = self.send_nowait(body).await {
                tracing::debug!("[mtlink] Ack batch not sent, keeping it: {e}");
                lock(&self.pending_acks).extend(msg_ids);
            }
        }
        Ok(())
    }

    fn handle_message(self: &Arc<Self>, message: Message) {
        let msg_id = message.msg_id.0;
        if message.seq_no == 0 {
            self.factory.clock().sync(msg_id);
        }
        if message.seq_no % 2 != 0 && !lock(&self.pending_acks).insert(msg_id) {
            return;
        }

        let admission = lock(&self.validator).admit(msg_id, || self.factory.next_msg_id());
        if let Admission::Rejected { reason, escalate } = admission {
            tracing::debug!("[mtlink] Ignoring message {msg_id}: {reason}");
            if escalate {
                tracing::warn!("[mtlink] Too many ignored messages, restarting");
                lock(&self.validator).reset_ignored();
                self.spawn_restart();
            }
            return;
        }

        let object = match service::decode(&message.body) {
            Ok(object) => object,
            Err(e) => {
                tracing::warn!("[mtlink] Undecodable message {msg_id}: {e}");
                return;
            }
        };

        let answers = object.answers();
        let reply = match object {
            Object::MsgDetailedInfo(info) => {
                lock(&self.pending_acks).insert(info.answer_msg_id);
                return;
            }
            Object::MsgNewDetailedInfo(info) => {
                lock(&self.pending_acks).insert(info.answer_msg_id);
                return;
            }
            Object::NewSessionCreated(_) => return,
            Object::RpcResult { answer, .. } => match answer {
                RpcAnswer::Payload(payload) => Reply::Payload(payload),
                RpcAnswer::Error(e) => Reply::RpcError(e),
            },
            Object::Pong(_) | Object::FutureSalts(_) => Reply::Payload(message.body),
            Object::BadMsgNotification(bad) => Reply::BadMsg(bad.error_code),
            Object::BadServerSalt(bad) => Reply::BadSalt(bad.new_server_salt),
            Object::Other { constructor_id, body } => {
                self.dispatch_update(RawUpdate { msg_id, constructor_id, body });
                return;
            }
            Object::MsgsAck(_) => {
                let constructor_id = <MsgsAck as mtlink_tl_types::Identifiable>::CONSTRUCTOR_ID;
                self.dispatch_update(RawUpdate { msg_id, constructor_id, body: message.body });
                return;
            }
        };

        let Some(req_msg_id) = answers else { return };
        let waiter = lock(&self.pending).remove(&req_msg_id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(Ok(reply));
            }
            None => tracing::debug!("[mtlink] No request waiting for {req_msg_id}"),
        }
    }

    fn dispatch_update(&self, update: RawUpdate) {
        match &self.updates {
            Some(sink) => {
                if sink.send(update).is_err() {
                    tracing::debug!("[mtlink] Update stream closed, dropping update");
                }
            }
            None => tracing::debug!("[mtlink] No update sink, dropping {:#010x}", update.constructor_id),
        }
    }
}

// ─── Sending ──────────────────────────────────────────────────────────────────

impl<D: Dialer> Inner<D> {
    async fn transmit(&self, message: Message) -> Result<(), InvocationError> {
        let key = Arc::clone(&self.auth_key);
        let salt = self.salt.load(Ordering::Acquire);
        let session_id = self.session_id;
        let msg_id = message.msg_id;
        let packet = self.pool.run(move || envelope::pack(&message, salt, session_id, &key)).await??;
        self.connection.send(&packet).await?;
        tracing::debug!("[mtlink] Sent message {msg_id}");
        Ok(())
    }

    async fn send_nowait(&self, body: Vec<u8>) -> Result<(), InvocationError> {
        self.transmit(self.factory.create(body)).await
    }

    async fn send(&self, body: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, InvocationError> {
        self.check_fatal()?;
        let mut resalted = false;
        loop {
            let message = self.factory.create(body.clone());
            let msg_id = message.msg_id.0;
            let (tx, mut rx) = oneshot::channel();
            lock(&self.pending).insert(msg_id, tx);

            if let Err(e) = self.transmit(message).await {
                lock(&self.pending).remove(&msg_id);
                return Err(e);
            }

            let outcome = match tokio::time::timeout(timeout, &mut rx).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => Err(InvocationError::Dropped),
                Err(_) => {
                    lock(&self.pending).remove(&msg_id);
                    match rx.try_recv() {
                        Ok(outcome) => outcome,
                        Err(_) => Err(InvocationError::RequestTimeout),
                    }
                }
            };

            match outcome? {
                Reply::Payload(payload) => return Ok(payload),
                Reply::RpcError(e) => {
                    let err = RpcError::from_server(e.error_code, &e.error_message).caused_by(query_name(&body));
                    return Err(err.into());
                }
                Reply::BadMsg(code) => {
                    let err = InvocationError::BadMessage { code };
                    tracing::warn!("[mtlink] {err}");
                    return Err(err);
                }
                Reply::BadSalt(salt) => {
                    self.salt.store(salt, Ordering::Release);
                    if resalted {
                        return Err(InvocationError::BadMessage { code: 48 });
                    }
                    resalted = true;
                    tracing::debug!("[mtlink] Server salt changed, resending");
                }
            }
        }
    }
}
