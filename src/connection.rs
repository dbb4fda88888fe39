use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, SinkExt, StreamExt};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use crate::codec::StompItem;
use crate::config::Config;
use crate::error::StompError;
use crate::frame::Frame;
use crate::heartbeat::{self, HeartbeatClock, HeartbeatTasks, SharedWriter};
use crate::hosts::{HostPool, HostSpec};
use crate::listener::{self, ConnectionListener, NullListener};
use crate::protocol::Version;
use crate::session::{self, SessionState};
use crate::transport::{self, FrameReader};

/// Subscription acknowledgement modes defined by STOMP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    Auto,
    Client,
    ClientIndividual,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }
}

/// Lock a std mutex, recovering the guard if a panicking holder poisoned it.
fn lock<T>(m: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// A stateful STOMP client connection.
///
/// One `Connection` owns one transport to a broker, negotiates the
/// protocol version, exchanges frames, keeps heartbeats alive, and (in
/// reliable mode) reconnects across the configured host pool with
/// subscription replay.
///
/// The handle is cheaply cloneable and safe to share between a producer
/// task, a listener task and the internal heartbeat timers. Three
/// independent locks keep them honest:
///
/// - the transmit lock serializes whole outbound frames (heartbeat bytes
///   included),
/// - the read lock serializes whole inbound frames,
/// - the socket lock is held only while the transport handle is swapped.
///
/// When more than one is needed they are taken socket, then transmit,
/// then read.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    listener: Arc<dyn ConnectionListener>,
    /// socket lock
    socket: Mutex<()>,
    /// transmit lock around the writer half
    writer: SharedWriter,
    /// read lock around the reader half
    reader: Mutex<Option<FrameReader>>,
    session: std::sync::Mutex<SessionState>,
    /// insertion-ordered subscription store: (id, SUBSCRIBE headers).
    /// Mutated only while the transmit lock is held.
    subscriptions: std::sync::Mutex<Vec<(String, Vec<(String, String)>)>>,
    hosts: std::sync::Mutex<HostPool>,
    clock: Arc<HeartbeatClock>,
    hb_tasks: Mutex<Option<HeartbeatTasks>>,
    closed: AtomicBool,
    /// Incremented on every successful transport install.
    generation: AtomicU64,
    /// Set while a reset is waiting for the locks; blocked readers bail
    /// out so the swap can proceed.
    reset_pending: AtomicBool,
    interrupt: Notify,
}

impl Connection {
    /// Connect to the first reachable host and negotiate the session.
    pub async fn open(config: Config) -> Result<Connection, StompError> {
        Self::open_with_listener(config, Arc::new(NullListener)).await
    }

    /// As [`open`](Connection::open), reporting lifecycle events into the
    /// given listener.
    pub async fn open_with_listener(
        config: Config,
        listener: Arc<dyn ConnectionListener>,
    ) -> Result<Connection, StompError> {
        if config.hosts.is_empty() {
            return Err(StompError::Protocol("no hosts configured".to_string()));
        }
        let pool = HostPool::new(config.hosts.clone(), config.backoff_policy(), config.randomize);
        let inner = Arc::new(Inner {
            config,
            listener,
            socket: Mutex::new(()),
            writer: Arc::new(Mutex::new(None)),
            reader: Mutex::new(None),
            session: std::sync::Mutex::new(SessionState::default()),
            subscriptions: std::sync::Mutex::new(Vec::new()),
            hosts: std::sync::Mutex::new(pool),
            clock: Arc::new(HeartbeatClock::new()),
            hb_tasks: Mutex::new(None),
            closed: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            reset_pending: AtomicBool::new(false),
            interrupt: Notify::new(),
        });
        let conn = Connection { inner };
        {
            let _sock = conn.inner.socket.lock().await;
            conn.establish_locked(true).await?;
        }
        Ok(conn)
    }

    // ------------------------------------------------------------------
    // outbound operations
    // ------------------------------------------------------------------

    /// Send a message body to a destination (SEND frame).
    pub async fn publish(
        &self,
        destination: &str,
        body: impl Into<Vec<u8>>,
        headers: Vec<(String, String)>,
    ) -> Result<(), StompError> {
        let hdrs = merge_headers(
            vec![("destination".to_string(), destination.to_string())],
            headers,
        );
        listener::notify(|| self.inner.listener.on_publish(&hdrs));
        let frame = Frame::new("SEND").with_headers(hdrs).set_body(body);
        self.transmit(frame).await
    }

    /// Transmit a caller-built frame as-is (after header validation).
    pub async fn send_frame(&self, frame: Frame) -> Result<(), StompError> {
        self.transmit(frame).await
    }

    /// Register a subscription.
    ///
    /// The subscription id comes from an `id` header or the explicit
    /// `sub_id`; STOMP 1.1+ requires one. Under reliable mode a second
    /// subscription with the same id is rejected, otherwise the headers
    /// are stored under the id and replayed verbatim after a reconnect.
    pub async fn subscribe(
        &self,
        destination: &str,
        headers: Vec<(String, String)>,
        sub_id: Option<&str>,
    ) -> Result<(), StompError> {
        self.check_open()?;
        let version = lock(&self.inner.session).protocol;

        let id = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("id"))
            .map(|(_, v)| v.clone())
            .or_else(|| sub_id.map(str::to_string));
        if version.requires_subscription_id() && id.is_none() {
            return Err(StompError::SubscriptionRequired);
        }
        if let Some(ref id) = id {
            if self.inner.config.reliable
                && lock(&self.inner.subscriptions)
                    .iter()
                    .any(|(sid, _)| sid == id)
            {
                return Err(StompError::DuplicateSubscription(id.clone()));
            }
        }

        let mut required = vec![("destination".to_string(), destination.to_string())];
        if let Some(ref id) = id {
            required.push(("id".to_string(), id.clone()));
        }
        let hdrs = merge_headers(required, headers);

        listener::notify(|| self.inner.listener.on_subscribe(&hdrs));
        let frame = Frame::new("SUBSCRIBE").with_headers(hdrs.clone());
        let subscriptions = &self.inner.subscriptions;
        self.transmit_with(frame, move || {
            if let Some(id) = id {
                lock(subscriptions).push((id, hdrs));
            }
        })
        .await
    }

    /// [`subscribe`](Connection::subscribe) with a typed ack mode.
    pub async fn subscribe_with_ack(
        &self,
        destination: &str,
        ack: AckMode,
        sub_id: Option<&str>,
    ) -> Result<(), StompError> {
        self.subscribe(
            destination,
            vec![("ack".to_string(), ack.as_str().to_string())],
            sub_id,
        )
        .await
    }

    /// Drop a subscription, by the same id rules as subscribe.
    pub async fn unsubscribe(
        &self,
        destination: &str,
        headers: Vec<(String, String)>,
        sub_id: Option<&str>,
    ) -> Result<(), StompError> {
        self.check_open()?;
        let version = lock(&self.inner.session).protocol;

        let id = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("id"))
            .map(|(_, v)| v.clone())
            .or_else(|| sub_id.map(str::to_string));
        if version.requires_subscription_id() && id.is_none() {
            return Err(StompError::SubscriptionRequired);
        }

        let mut required = vec![("destination".to_string(), destination.to_string())];
        if let Some(ref id) = id {
            required.push(("id".to_string(), id.clone()));
        }
        let hdrs = merge_headers(required, headers);

        listener::notify(|| self.inner.listener.on_unsubscribe(&hdrs));
        let frame = Frame::new("UNSUBSCRIBE").with_headers(hdrs);
        let subscriptions = &self.inner.subscriptions;
        self.transmit_with(frame, move || {
            if let Some(id) = id {
                lock(subscriptions).retain(|(sid, _)| sid != &id);
            }
        })
        .await
    }

    /// Acknowledge a message.
    ///
    /// `id` is the `message-id` header under 1.0/1.1 and the `ack` header
    /// under 1.2. 1.1 additionally requires a `subscription` header.
    pub async fn ack(&self, id: &str, headers: Vec<(String, String)>) -> Result<(), StompError> {
        self.check_open()?;
        let hdrs = self.ack_headers("ACK", id, headers)?;
        listener::notify(|| self.inner.listener.on_ack(&hdrs));
        self.transmit(Frame::new("ACK").with_headers(hdrs)).await
    }

    /// Reject a message. Unavailable under STOMP 1.0.
    pub async fn nack(&self, id: &str, headers: Vec<(String, String)>) -> Result<(), StompError> {
        self.check_open()?;
        let version = lock(&self.inner.session).protocol;
        if !version.supports_nack() {
            return Err(StompError::UnsupportedProtocol(version));
        }
        let hdrs = self.ack_headers("NACK", id, headers)?;
        listener::notify(|| self.inner.listener.on_nack(&hdrs));
        self.transmit(Frame::new("NACK").with_headers(hdrs)).await
    }

    /// Per-version ACK/NACK header shape. No bytes are written when the
    /// preconditions fail.
    fn ack_headers(
        &self,
        op: &'static str,
        id: &str,
        headers: Vec<(String, String)>,
    ) -> Result<Vec<(String, String)>, StompError> {
        if id.is_empty() {
            return Err(StompError::MessageIdRequired(op));
        }
        let version = lock(&self.inner.session).protocol;
        let required = match version {
            Version::V1_0 => vec![("message-id".to_string(), id.to_string())],
            Version::V1_1 => {
                let subscription = headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case("subscription"))
                    .map(|(_, v)| v.clone())
                    .ok_or(StompError::SubscriptionRequired)?;
                vec![
                    ("message-id".to_string(), id.to_string()),
                    ("subscription".to_string(), subscription),
                ]
            }
            Version::V1_2 => vec![("id".to_string(), id.to_string())],
        };
        Ok(merge_headers(required, headers))
    }

    /// Open a broker transaction.
    pub async fn begin(
        &self,
        transaction: &str,
        headers: Vec<(String, String)>,
    ) -> Result<(), StompError> {
        self.transaction_op("BEGIN", transaction, headers).await
    }

    /// Commit a broker transaction.
    pub async fn commit(
        &self,
        transaction: &str,
        headers: Vec<(String, String)>,
    ) -> Result<(), StompError> {
        self.transaction_op("COMMIT", transaction, headers).await
    }

    /// Abort a broker transaction.
    pub async fn abort(
        &self,
        transaction: &str,
        headers: Vec<(String, String)>,
    ) -> Result<(), StompError> {
        self.transaction_op("ABORT", transaction, headers).await
    }

    async fn transaction_op(
        &self,
        command: &'static str,
        transaction: &str,
        headers: Vec<(String, String)>,
    ) -> Result<(), StompError> {
        self.check_open()?;
        if transaction.is_empty() {
            return Err(StompError::Protocol(format!(
                "{} requires a transaction name",
                command
            )));
        }
        listener::notify(|| match command {
            "BEGIN" => self.inner.listener.on_begin(transaction),
            "COMMIT" => self.inner.listener.on_commit(transaction),
            _ => self.inner.listener.on_abort(transaction),
        });
        let hdrs = merge_headers(
            vec![("transaction".to_string(), transaction.to_string())],
            headers,
        );
        self.transmit(Frame::new(command).with_headers(hdrs)).await
    }

    /// Send DISCONNECT and close.
    ///
    /// Heartbeat timers are stopped first. When the headers carry a
    /// `receipt`, one more frame is read synchronously and stored as the
    /// disconnect receipt. The connection is closed afterwards either way.
    pub async fn disconnect(&self, headers: Vec<(String, String)>) -> Result<(), StompError> {
        self.check_open()?;
        let frame = Frame::new("DISCONNECT").with_headers(headers);
        validate_headers(&frame)?;
        let wants_receipt = frame.has_header("receipt");

        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.interrupt.notify_waiters();
        self.stop_heartbeats().await;

        {
            let mut guard = self.inner.writer.lock().await;
            if let Some(w) = guard.as_mut() {
                if let Err(e) = w.send(StompItem::Frame(frame)).await {
                    warn!(error = %e, "DISCONNECT write failed");
                }
            }
        }

        if wants_receipt {
            let receipt = {
                let mut guard = self.inner.reader.lock().await;
                match guard.as_mut() {
                    Some(r) => read_reply(r, self.inner.config.parse_timeout).await.ok(),
                    None => None,
                }
            };
            lock(&self.inner.session).disconnect_receipt = receipt;
        }

        let _sock = self.inner.socket.lock().await;
        *self.inner.writer.lock().await = None;
        *self.inner.reader.lock().await = None;
        listener::notify(|| self.inner.listener.on_disconnect());
        Ok(())
    }

    // ------------------------------------------------------------------
    // inbound operations
    // ------------------------------------------------------------------

    /// Read the next frame, blocking until one arrives.
    ///
    /// Heartbeat pulses are consumed internally. On EOF a reliable
    /// connection reconnects (replaying subscriptions) and retries the
    /// read exactly once; a second EOF within the same call, or any EOF on
    /// a non-reliable connection, surfaces as `ConnectionClosed`.
    pub async fn receive(&self) -> Result<Frame, StompError> {
        self.check_open()?;
        if self.inner.clock.take_recv_fault() {
            return Err(StompError::HeartbeatRecv);
        }
        let frame = self.read_frame().await?;
        listener::notify(|| self.inner.listener.on_receive(&frame));
        Ok(frame)
    }

    /// Non-blocking receive: `Ok(None)` when no complete frame can be
    /// decoded without waiting, otherwise the same contract as
    /// [`receive`](Connection::receive).
    pub async fn poll(&self) -> Result<Option<Frame>, StompError> {
        self.check_open()?;
        if self.inner.clock.take_recv_fault() {
            return Err(StompError::HeartbeatRecv);
        }
        let outcome = {
            let mut guard = self.inner.reader.lock().await;
            let r = guard.as_mut().ok_or(StompError::NoCurrentConnection)?;
            loop {
                match r.next().now_or_never() {
                    None => break Ok(None),
                    Some(Some(Ok(StompItem::Heartbeat))) => {
                        self.inner.clock.note_heartbeat_received();
                        continue;
                    }
                    Some(Some(Ok(StompItem::Frame(f)))) => {
                        self.inner.clock.note_recv();
                        break Ok(Some(f));
                    }
                    Some(Some(Err(e))) => break Err(e),
                    Some(None) => break Err(StompError::ConnectionClosed),
                }
            }
        };
        match outcome {
            Ok(Some(frame)) => {
                listener::notify(|| self.inner.listener.on_receive(&frame));
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                if self.inner.config.reliable && !self.inner.closed.load(Ordering::SeqCst) {
                    warn!(error = %e, "poll observed a dead transport; reconnecting");
                    self.reconnect().await?;
                    Ok(None)
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn read_frame(&self) -> Result<Frame, StompError> {
        let mut retried = false;
        loop {
            match self.read_frame_once().await {
                Ok(frame) => return Ok(frame),
                Err(e) => {
                    if self.inner.closed.load(Ordering::SeqCst) {
                        return Err(StompError::ConnectionClosed);
                    }
                    if self.inner.config.reliable && !retried {
                        retried = true;
                        warn!(error = %e, "read failed; resetting connection");
                        self.reconnect().await?;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// One frame under the read lock. Bails out with `Interrupted` when a
    /// transport reset is waiting for this lock.
    async fn read_frame_once(&self) -> Result<Frame, StompError> {
        let mut guard = self.inner.reader.lock().await;
        let r = guard.as_mut().ok_or(StompError::NoCurrentConnection)?;
        loop {
            if self.inner.reset_pending.load(Ordering::SeqCst)
                || self.inner.closed.load(Ordering::SeqCst)
            {
                return Err(StompError::Io(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "transport reset in progress",
                )));
            }
            tokio::select! {
                _ = self.inner.interrupt.notified() => continue,
                item = r.next() => match item {
                    Some(Ok(StompItem::Heartbeat)) => {
                        self.inner.clock.note_heartbeat_received();
                        continue;
                    }
                    Some(Ok(StompItem::Frame(frame))) => {
                        self.inner.clock.note_recv();
                        return Ok(frame);
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Err(StompError::ConnectionClosed),
                },
            }
        }
    }

    // ------------------------------------------------------------------
    // transmit plumbing
    // ------------------------------------------------------------------

    async fn transmit(&self, frame: Frame) -> Result<(), StompError> {
        self.transmit_with(frame, || {}).await
    }

    /// Serialize and write one frame under the transmit lock, running
    /// `on_success` before the lock is released. On a write failure a
    /// reliable connection re-establishes the transport, then re-raises
    /// the original error so the caller can re-drive its protocol.
    async fn transmit_with(
        &self,
        frame: Frame,
        on_success: impl FnOnce(),
    ) -> Result<(), StompError> {
        self.check_open()?;
        if self.inner.config.hbser && self.inner.clock.take_send_fault() {
            return Err(StompError::HeartbeatSend);
        }
        validate_headers(&frame)?;

        let err = {
            let mut guard = self.inner.writer.lock().await;
            let w = guard.as_mut().ok_or(StompError::NoCurrentConnection)?;
            match w.send(StompItem::Frame(frame)).await {
                Ok(()) => {
                    if self.inner.config.autoflush {
                        w.flush().await?;
                    }
                    self.inner.clock.note_send();
                    on_success();
                    return Ok(());
                }
                Err(e) => e,
            }
        };

        if self.inner.config.reliable && !self.inner.closed.load(Ordering::SeqCst) {
            warn!(error = %err, "transmit failed; resetting connection");
            self.reconnect().await?;
        }
        Err(err)
    }

    // ------------------------------------------------------------------
    // connect / reconnect
    // ------------------------------------------------------------------

    /// Re-establish the transport after a failure.
    ///
    /// Serialized by the socket lock; a caller that lost the race to a
    /// concurrent reset returns once that reset has finished.
    pub(crate) fn reconnect(
        &self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), StompError>> + Send + '_>>
    {
        Box::pin(async move {
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(StompError::ConnectionClosed);
            }
            let seen_generation = self.inner.generation.load(Ordering::SeqCst);
            self.inner.reset_pending.store(true, Ordering::SeqCst);
            self.inner.interrupt.notify_waiters();
            self.stop_heartbeats().await;

            let _sock = self.inner.socket.lock().await;
            if self.inner.generation.load(Ordering::SeqCst) != seen_generation {
                self.inner.reset_pending.store(false, Ordering::SeqCst);
                return Ok(());
            }
            let result = self.establish_locked(false).await;
            self.inner.reset_pending.store(false, Ordering::SeqCst);
            result
        })
    }

    /// Connect-attempt loop. Caller holds the socket lock; this takes the
    /// transmit and read locks for the duration of the swap.
    ///
    /// `initial` tries the current host immediately; reconnects advance
    /// the host first and sleep the pool's current backoff before dialing.
    async fn establish_locked(&self, initial: bool) -> Result<(), StompError> {
        let mut w_guard = self.inner.writer.lock().await;
        let mut r_guard = self.inner.reader.lock().await;
        *w_guard = None;
        *r_guard = None;

        let mut first = initial;
        loop {
            let (host, delay) = {
                let mut pool = lock(&self.inner.hosts);
                if first {
                    (pool.current().clone(), Duration::ZERO)
                } else {
                    let host = pool.change_host();
                    (host, pool.current_delay())
                }
            };
            first = false;

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            listener::notify(|| self.inner.listener.on_connecting(&host));
            match self.open_and_negotiate(&host).await {
                Ok((fw, fr)) => {
                    *w_guard = Some(fw);
                    *r_guard = Some(fr);
                    lock(&self.inner.hosts).reset();
                    self.inner.generation.fetch_add(1, Ordering::SeqCst);
                    let session_id = lock(&self.inner.session).session_id.clone();
                    listener::notify(|| self.inner.listener.on_connected(session_id.as_deref()));
                    drop(r_guard);
                    drop(w_guard);
                    self.start_heartbeats().await;
                    return Ok(());
                }
                Err(e) => {
                    listener::notify(|| self.inner.listener.on_connectfail(&host));
                    warn!(host = %host.host, error = %e, "connect attempt failed");
                    if !self.inner.config.reliable {
                        return Err(e);
                    }
                    if let Err(exhausted) = lock(&self.inner.hosts).register_attempt() {
                        self.inner.closed.store(true, Ordering::SeqCst);
                        return Err(exhausted);
                    }
                }
            }
        }
    }

    /// Dial one host, run the CONNECT handshake, switch the codecs to the
    /// negotiated version and replay stored subscriptions — all before the
    /// new transport is handed to user code.
    async fn open_and_negotiate(
        &self,
        host: &HostSpec,
    ) -> Result<(crate::transport::FrameWriter, FrameReader), StompError> {
        let cfg = &self.inner.config;
        let (mut fw, mut fr) = transport::open(host, cfg.connect_timeout).await?;

        let connect = session::build_connect_frame(host, cfg);
        validate_headers(&connect)?;
        fw.send(StompItem::Frame(connect)).await?;

        let reply = read_reply(&mut fr, cfg.parse_timeout).await?;
        let version = {
            let mut session = lock(&self.inner.session);
            session.apply_connected(&reply)?;
            let (sx, sy) = session.server_heartbeats;
            let version = session.protocol;
            drop(session);

            let (cx, cy) = cfg.requested_heartbeats();
            let intervals = if version.supports_heartbeats() {
                session::negotiate_heartbeats(cx, cy, sx, sy)
            } else {
                (None, None)
            };
            self.inner.clock.set_intervals(intervals.0, intervals.1);
            version
        };
        fw.encoder_mut().set_version(version);
        fw.encoder_mut().set_crlf(cfg.usecrlf);
        fr.decoder_mut().set_version(version);

        let subscriptions: Vec<(String, Vec<(String, String)>)> =
            lock(&self.inner.subscriptions).clone();
        for (id, headers) in subscriptions {
            debug!(id = %id, "replaying subscription");
            fw.send(StompItem::Frame(Frame::new("SUBSCRIBE").with_headers(headers)))
                .await?;
        }

        self.inner.clock.note_send();
        self.inner.clock.note_recv();
        Ok((fw, fr))
    }

    async fn start_heartbeats(&self) {
        let (send_interval, recv_interval) = self.inner.clock.intervals();
        if send_interval.is_none() && recv_interval.is_none() {
            return;
        }

        let on_lapse: Box<dyn Fn() + Send + Sync> = if self.inner.config.reliable {
            let weak = Arc::downgrade(&self.inner);
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    tokio::spawn(async move {
                        let conn = Connection { inner };
                        if let Err(e) = conn.reconnect().await {
                            warn!(error = %e, "reconnect after heartbeat lapse failed");
                        }
                    });
                }
            })
        } else {
            let clock = self.inner.clock.clone();
            Box::new(move || clock.latch_recv_fault())
        };

        let tasks = heartbeat::start(
            self.inner.clock.clone(),
            self.inner.writer.clone(),
            send_interval,
            recv_interval,
            self.inner.config.hbser,
            self.inner.listener.clone(),
            on_lapse,
        );
        *self.inner.hb_tasks.lock().await = Some(tasks);
    }

    async fn stop_heartbeats(&self) {
        let tasks = self.inner.hb_tasks.lock().await.take();
        if let Some(tasks) = tasks {
            tasks.stop().await;
        }
    }

    fn check_open(&self) -> Result<(), StompError> {
        if self.inner.config.closed_check && self.inner.closed.load(Ordering::SeqCst) {
            return Err(StompError::NoCurrentConnection);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // observables
    // ------------------------------------------------------------------

    /// Negotiated protocol version.
    pub fn protocol(&self) -> Version {
        lock(&self.inner.session).protocol
    }

    /// Broker-assigned session id, when the broker sent one.
    pub fn session(&self) -> Option<String> {
        lock(&self.inner.session).session_id.clone()
    }

    /// The CONNECTED frame of the current session.
    pub fn connection_frame(&self) -> Option<Frame> {
        lock(&self.inner.session).connect_frame.clone()
    }

    /// RECEIPT captured by a receipt-bearing disconnect.
    pub fn disconnect_receipt(&self) -> Option<Frame> {
        lock(&self.inner.session).disconnect_receipt.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        !self.is_closed()
    }

    /// Failed connect attempts since the last successful negotiation.
    pub fn connection_attempts(&self) -> u32 {
        lock(&self.inner.hosts).attempts()
    }

    pub fn hb_sent(&self) -> bool {
        self.inner.clock.hb_sent()
    }

    pub fn hb_received(&self) -> bool {
        self.inner.clock.hb_received()
    }

    pub fn hbsend_interval(&self) -> Option<Duration> {
        self.inner.clock.intervals().0
    }

    pub fn hbrecv_interval(&self) -> Option<Duration> {
        self.inner.clock.intervals().1
    }

    pub fn hbsend_count(&self) -> u64 {
        self.inner.clock.send_count()
    }

    pub fn hbrecv_count(&self) -> u64 {
        self.inner.clock.recv_count()
    }

    /// Stored headers of a live subscription, by id.
    pub(crate) fn subscription_headers(&self, id: &str) -> Option<Vec<(String, String)>> {
        lock(&self.inner.subscriptions)
            .iter()
            .find(|(sid, _)| sid == id)
            .map(|(_, headers)| headers.clone())
    }
}

/// Wait for the next full frame, skipping heartbeat pulses. Used where a
/// reply must arrive synchronously (CONNECTED, disconnect receipt); the
/// parse timeout bounds the wait, zero meaning unbounded.
async fn read_reply(r: &mut FrameReader, parse_timeout: Duration) -> Result<Frame, StompError> {
    let next_frame = async {
        loop {
            match r.next().await {
                Some(Ok(StompItem::Heartbeat)) => continue,
                Some(Ok(StompItem::Frame(frame))) => return Ok(frame),
                Some(Err(e)) => return Err(e),
                None => return Err(StompError::ConnectionClosed),
            }
        }
    };
    if parse_timeout.is_zero() {
        next_frame.await
    } else {
        tokio::time::timeout(parse_timeout, next_frame)
            .await
            .map_err(|_| {
                StompError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "timed out assembling broker reply",
                ))
            })?
    }
}

/// Operation-required headers first, then caller extras minus any key the
/// required set already pinned.
fn merge_headers(
    required: Vec<(String, String)>,
    extra: Vec<(String, String)>,
) -> Vec<(String, String)> {
    let mut out = required;
    for (k, v) in extra {
        if !out.iter().any(|(rk, _)| rk.eq_ignore_ascii_case(&k)) {
            out.push((k, v));
        }
    }
    out
}

/// Outbound header validation: no embedded NUL anywhere, no duplicate
/// keys (case-insensitive). Runs before any wire effect.
fn validate_headers(frame: &Frame) -> Result<(), StompError> {
    let mut seen: Vec<String> = Vec::with_capacity(frame.headers.len());
    for (k, v) in &frame.headers {
        if k.contains('\0') || v.contains('\0') {
            return Err(StompError::Protocol(format!(
                "NUL byte in header '{}'",
                k.replace('\0', "\\0")
            )));
        }
        let normalized = k.to_ascii_lowercase();
        if seen.contains(&normalized) {
            return Err(StompError::Protocol(format!(
                "duplicate header key '{}'",
                k
            )));
        }
        seen.push(normalized);
    }
    Ok(())
}
