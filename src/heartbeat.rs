use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::codec::StompItem;
use crate::listener::{notify, ConnectionListener};
use crate::transport::FrameWriter;

/// Writer half shared between user transmissions and the heartbeat
/// sender; the mutex IS the transmit lock.
pub(crate) type SharedWriter = Arc<Mutex<Option<FrameWriter>>>;

/// Receive-side lapse tolerance: traffic may be this many intervals late
/// before the peer is considered gone.
const RECV_TOLERANCE: u64 = 2;

/// Timestamps, counters and flags shared between the send/read paths and
/// the two heartbeat timer tasks. Everything is atomic; no path takes a
/// lock to report activity.
#[derive(Debug)]
pub struct HeartbeatClock {
    last_send_ms: AtomicU64,
    last_recv_ms: AtomicU64,
    hb_sent: AtomicBool,
    hb_received: AtomicBool,
    send_count: AtomicU64,
    recv_count: AtomicU64,
    send_interval_ms: AtomicU64,
    recv_interval_ms: AtomicU64,
    send_fault: AtomicBool,
    recv_fault: AtomicBool,
}

impl HeartbeatClock {
    pub fn new() -> Self {
        let now = current_millis();
        Self {
            last_send_ms: AtomicU64::new(now),
            last_recv_ms: AtomicU64::new(now),
            hb_sent: AtomicBool::new(true),
            hb_received: AtomicBool::new(true),
            send_count: AtomicU64::new(0),
            recv_count: AtomicU64::new(0),
            send_interval_ms: AtomicU64::new(0),
            recv_interval_ms: AtomicU64::new(0),
            send_fault: AtomicBool::new(false),
            recv_fault: AtomicBool::new(false),
        }
    }

    /// A full frame went out on the wire.
    pub(crate) fn note_send(&self) {
        self.last_send_ms.store(current_millis(), Ordering::SeqCst);
    }

    /// A frame came in off the wire.
    pub(crate) fn note_recv(&self) {
        self.last_recv_ms.store(current_millis(), Ordering::SeqCst);
    }

    pub(crate) fn note_heartbeat_sent(&self) {
        self.last_send_ms.store(current_millis(), Ordering::SeqCst);
        self.hb_sent.store(true, Ordering::SeqCst);
        self.send_count.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn note_heartbeat_received(&self) {
        self.last_recv_ms.store(current_millis(), Ordering::SeqCst);
        self.hb_received.store(true, Ordering::SeqCst);
        self.recv_count.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn millis_since_send(&self) -> u64 {
        current_millis().saturating_sub(self.last_send_ms.load(Ordering::SeqCst))
    }

    pub(crate) fn millis_since_recv(&self) -> u64 {
        current_millis().saturating_sub(self.last_recv_ms.load(Ordering::SeqCst))
    }

    pub(crate) fn set_intervals(&self, send: Option<Duration>, recv: Option<Duration>) {
        self.send_interval_ms
            .store(send.map(|d| d.as_millis() as u64).unwrap_or(0), Ordering::SeqCst);
        self.recv_interval_ms
            .store(recv.map(|d| d.as_millis() as u64).unwrap_or(0), Ordering::SeqCst);
    }

    pub(crate) fn intervals(&self) -> (Option<Duration>, Option<Duration>) {
        let to_opt = |ms: u64| {
            if ms == 0 {
                None
            } else {
                Some(Duration::from_millis(ms))
            }
        };
        (
            to_opt(self.send_interval_ms.load(Ordering::SeqCst)),
            to_opt(self.recv_interval_ms.load(Ordering::SeqCst)),
        )
    }

    pub(crate) fn mark_send_failed(&self, latch_fault: bool) {
        self.hb_sent.store(false, Ordering::SeqCst);
        if latch_fault {
            self.send_fault.store(true, Ordering::SeqCst);
        }
    }

    pub(crate) fn mark_recv_lapsed(&self) {
        self.hb_received.store(false, Ordering::SeqCst);
    }

    pub(crate) fn mark_recv_healthy(&self) {
        self.hb_received.store(true, Ordering::SeqCst);
    }

    pub(crate) fn latch_recv_fault(&self) {
        self.recv_fault.store(true, Ordering::SeqCst);
    }

    pub(crate) fn take_send_fault(&self) -> bool {
        self.send_fault.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn take_recv_fault(&self) -> bool {
        self.recv_fault.swap(false, Ordering::SeqCst)
    }

    pub fn hb_sent(&self) -> bool {
        self.hb_sent.load(Ordering::SeqCst)
    }

    pub fn hb_received(&self) -> bool {
        self.hb_received.load(Ordering::SeqCst)
    }

    pub fn send_count(&self) -> u64 {
        self.send_count.load(Ordering::SeqCst)
    }

    pub fn recv_count(&self) -> u64 {
        self.recv_count.load(Ordering::SeqCst)
    }
}

impl Default for HeartbeatClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Handles of the running timer tasks plus their shutdown signal.
pub(crate) struct HeartbeatTasks {
    shutdown: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl HeartbeatTasks {
    /// Signal both timers and wait for them to exit. Must be called before
    /// the transport is closed or swapped.
    pub(crate) async fn stop(mut self) {
        let _ = self.shutdown.send(());
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }
}

/// Spawn the sender and/or monitor tasks for the negotiated intervals.
pub(crate) fn start(
    clock: Arc<HeartbeatClock>,
    writer: SharedWriter,
    send_interval: Option<Duration>,
    recv_interval: Option<Duration>,
    hbser: bool,
    listener: Arc<dyn ConnectionListener>,
    on_lapse: Box<dyn Fn() + Send + Sync>,
) -> HeartbeatTasks {
    let (shutdown, _) = broadcast::channel::<()>(1);
    let mut handles = Vec::new();

    if let Some(interval) = send_interval {
        handles.push(tokio::spawn(sender_task(
            clock.clone(),
            writer,
            interval,
            hbser,
            listener.clone(),
            shutdown.subscribe(),
        )));
    }
    if let Some(interval) = recv_interval {
        handles.push(tokio::spawn(monitor_task(
            clock,
            interval,
            listener,
            on_lapse,
            shutdown.subscribe(),
        )));
    }

    HeartbeatTasks { shutdown, handles }
}

/// Emits one keep-alive line terminator per interval unless a full frame
/// already went out in the meantime. Shares the transmit lock with user
/// transmissions, so heartbeat bytes never split a frame.
async fn sender_task(
    clock: Arc<HeartbeatClock>,
    writer: SharedWriter,
    interval: Duration,
    hbser: bool,
    listener: Arc<dyn ConnectionListener>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let interval_ms = interval.as_millis() as u64;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                if clock.millis_since_send() < interval_ms {
                    continue;
                }
                let mut guard = writer.lock().await;
                let Some(w) = guard.as_mut() else { continue };
                match w.send(StompItem::Heartbeat).await {
                    Ok(()) => {
                        clock.note_heartbeat_sent();
                        notify(|| listener.on_hbfire());
                    }
                    Err(e) => {
                        debug!(error = %e, "heartbeat write failed");
                        clock.mark_send_failed(hbser);
                        notify(|| listener.on_hbwrite_fail());
                        if hbser {
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Watches the read-side timestamp. Traffic older than
/// `RECV_TOLERANCE x interval` flags the lapse and hands control to the
/// connection's lapse action (reconnect, or fault the next receive).
async fn monitor_task(
    clock: Arc<HeartbeatClock>,
    interval: Duration,
    listener: Arc<dyn ConnectionListener>,
    on_lapse: Box<dyn Fn() + Send + Sync>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let tolerance_ms = interval.as_millis() as u64 * RECV_TOLERANCE;

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = tokio::time::sleep(interval) => {
                if clock.millis_since_recv() > tolerance_ms {
                    debug!(tolerance_ms, "no inbound traffic within heartbeat tolerance");
                    clock.mark_recv_lapsed();
                    notify(|| listener.on_hbread_fail());
                    on_lapse();
                    break;
                }
                clock.mark_recv_healthy();
            }
        }
    }
}

fn current_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
