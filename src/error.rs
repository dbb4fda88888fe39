use std::io;
use thiserror::Error;

use crate::protocol::Version;

/// Errors returned by connection and codec operations.
#[derive(Error, Debug)]
pub enum StompError {
    /// Operation attempted on a closed connection.
    #[error("no current connection")]
    NoCurrentConnection,
    /// ACK/NACK called without a message id.
    #[error("message id required for {0}")]
    MessageIdRequired(&'static str),
    /// STOMP 1.1+ requires a subscription id and none was supplied.
    #[error("subscription id required")]
    SubscriptionRequired,
    /// A reliable connection already holds a subscription under this id.
    #[error("duplicate subscription: {0}")]
    DuplicateSubscription(String),
    /// Operation not available at the negotiated protocol version.
    #[error("operation not supported under STOMP {0}")]
    UnsupportedProtocol(Version),
    /// Structurally invalid frame (no command, bad content-length, ...).
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    /// Protocol-level error (invalid escape, invalid UTF-8, bad reply).
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Broker sent an ERROR frame; headers and body attached.
    #[error("broker error: {message}")]
    Broker {
        message: String,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    },
    /// A heartbeat could not be written and `hbser` is enabled.
    #[error("heartbeat send failed")]
    HeartbeatSend,
    /// No inbound traffic within the heartbeat tolerance window.
    #[error("heartbeat receive lapsed")]
    HeartbeatRecv,
    /// The host pool retry budget is exhausted.
    #[error("exhausted {0} reconnect attempts")]
    MaxReconnectAttempts(u32),
    /// Underlying transport failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// The transport reached EOF and no reconnect is possible.
    #[error("connection closed")]
    ConnectionClosed,
}
