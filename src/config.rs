use std::time::Duration;

use crate::hosts::{BackoffPolicy, HostSpec};

/// Connection options.
///
/// Plain data; construct with [`Config::new`] and adjust fields or chain
/// the `with_*` helpers. Defaults mirror the classic STOMP client knobs.
#[derive(Debug, Clone)]
pub struct Config {
    /// Ordered list of candidate brokers. Required, must be non-empty.
    pub hosts: Vec<HostSpec>,
    /// Enable transparent reconnect with subscription replay.
    pub reliable: bool,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub use_exponential_back_off: bool,
    pub back_off_multiplier: f64,
    /// 0 means unlimited.
    pub max_reconnect_attempts: u32,
    /// Shuffle the host list once at construction.
    pub randomize: bool,
    /// Bound on establishing the TCP connection. Zero disables the bound.
    pub connect_timeout: Duration,
    /// Bound on assembling a synchronously awaited frame (CONNECTED reply,
    /// disconnect receipt).
    pub parse_timeout: Duration,
    /// Extra headers merged into the CONNECT frame (e.g. `heart-beat`,
    /// `host`, an `accept-version` subset).
    pub connect_headers: Vec<(String, String)>,
    /// Guard every operation with a closed-connection check.
    pub closed_check: bool,
    /// Surface heartbeat send failures as errors instead of flag updates.
    pub hbser: bool,
    /// Send `STOMP` rather than `CONNECT` when opening the session.
    pub stompconn: bool,
    /// Emit CRLF line terminators (honored on 1.2 sessions only).
    pub usecrlf: bool,
    /// Issue an explicit flush after every transmitted frame.
    pub autoflush: bool,
    /// Developer-mode vendor header passthrough. Accepted and stored;
    /// nothing at this layer interprets it.
    pub dmh: bool,
}

impl Config {
    pub fn new(hosts: Vec<HostSpec>) -> Self {
        Self {
            hosts,
            reliable: false,
            initial_reconnect_delay: Duration::from_millis(10),
            max_reconnect_delay: Duration::from_secs(30),
            use_exponential_back_off: true,
            back_off_multiplier: 2.0,
            max_reconnect_attempts: 0,
            randomize: false,
            connect_timeout: Duration::ZERO,
            parse_timeout: Duration::from_secs(5),
            connect_headers: Vec::new(),
            closed_check: true,
            hbser: false,
            stompconn: false,
            usecrlf: false,
            autoflush: false,
            dmh: false,
        }
    }

    pub fn with_reliable(mut self, reliable: bool) -> Self {
        self.reliable = reliable;
        self
    }

    pub fn with_connect_headers(
        mut self,
        headers: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        self.connect_headers = headers.into_iter().collect();
        self
    }

    pub fn with_connect_header(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.connect_headers.push((key.into(), value.into()));
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_parse_timeout(mut self, timeout: Duration) -> Self {
        self.parse_timeout = timeout;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_stompconn(mut self, stompconn: bool) -> Self {
        self.stompconn = stompconn;
        self
    }

    pub(crate) fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: self.initial_reconnect_delay,
            max_delay: self.max_reconnect_delay,
            multiplier: self.back_off_multiplier,
            exponential: self.use_exponential_back_off,
            max_attempts: self.max_reconnect_attempts,
        }
    }

    /// The client heart-beat request `(cx, cy)` taken from the
    /// `heart-beat` connect header, `(0, 0)` when absent.
    pub(crate) fn requested_heartbeats(&self) -> (u64, u64) {
        self.connect_headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("heart-beat"))
            .map(|(_, v)| crate::session::parse_heartbeat_header(v))
            .unwrap_or((0, 0))
    }
}
