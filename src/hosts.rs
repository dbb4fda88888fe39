use std::time::Duration;

use rand::seq::SliceRandom;
use tracing::warn;

use crate::error::StompError;

/// Default STOMP port for plain TCP.
pub const DEFAULT_PORT: u16 = 61613;
/// Default STOMP port when the broker end is TLS.
pub const DEFAULT_SSL_PORT: u16 = 61612;

/// One candidate broker endpoint with its credentials. Immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSpec {
    pub login: String,
    pub passcode: String,
    pub host: String,
    /// 0 selects the default port for the transport kind.
    pub port: u16,
    pub ssl: bool,
}

impl HostSpec {
    pub fn new(
        login: impl Into<String>,
        passcode: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        let login = login.into();
        if login.contains("://") {
            // A URL in the login slot almost always means the positional
            // arguments were shuffled.
            warn!(login = %login, "login looks like a URL; check argument order");
        }
        Self {
            login,
            passcode: passcode.into(),
            host: host.into(),
            port,
            ssl: false,
        }
    }

    pub fn with_ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    /// The port to dial: the explicit one, or the default for the
    /// transport kind.
    pub fn effective_port(&self) -> u16 {
        if self.port != 0 {
            self.port
        } else if self.ssl {
            DEFAULT_SSL_PORT
        } else {
            DEFAULT_PORT
        }
    }
}

/// Reconnect pacing parameters.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub exponential: bool,
    /// 0 means unlimited attempts.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            exponential: true,
            max_attempts: 0,
        }
    }
}

/// Ordered list of candidate hosts plus the retry/backoff state machine.
///
/// Hosts are tried in list order (post-shuffle when randomized); the delay
/// advances each time a full sweep of the list completes.
#[derive(Debug)]
pub struct HostPool {
    hosts: Vec<HostSpec>,
    policy: BackoffPolicy,
    index: usize,
    attempts: u32,
    delay: Duration,
}

impl HostPool {
    pub fn new(mut hosts: Vec<HostSpec>, policy: BackoffPolicy, randomize: bool) -> Self {
        if randomize {
            hosts.shuffle(&mut rand::thread_rng());
        }
        let delay = policy.initial_delay;
        Self {
            hosts,
            policy,
            index: 0,
            attempts: 0,
            delay,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// The host the pool currently points at.
    pub fn current(&self) -> &HostSpec {
        &self.hosts[self.index]
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    /// Total failed attempts since the last successful connect.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The delay to sleep before the next attempt.
    pub fn current_delay(&self) -> Duration {
        self.delay
    }

    /// Advance to the next host, bumping the backoff delay whenever a full
    /// sweep of the list wraps around.
    pub fn change_host(&mut self) -> HostSpec {
        self.index = (self.index + 1) % self.hosts.len();
        if self.index == 0 {
            self.advance_delay();
        }
        self.hosts[self.index].clone()
    }

    /// Record one failed attempt, failing once the budget is exhausted.
    pub fn register_attempt(&mut self) -> Result<(), StompError> {
        self.attempts += 1;
        if self.policy.max_attempts != 0 && self.attempts > self.policy.max_attempts {
            return Err(StompError::MaxReconnectAttempts(self.policy.max_attempts));
        }
        Ok(())
    }

    /// Reset attempts and delay after a successful connect.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.delay = self.policy.initial_delay;
    }

    fn advance_delay(&mut self) {
        if !self.policy.exponential {
            return;
        }
        let next = self.delay.as_secs_f64() * self.policy.multiplier;
        let capped = next.min(self.policy.max_delay.as_secs_f64());
        self.delay = Duration::from_secs_f64(capped);
    }
}
