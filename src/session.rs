use std::time::Duration;

use crate::config::Config;
use crate::error::StompError;
use crate::frame::Frame;
use crate::hosts::HostSpec;
use crate::protocol::{Version, ACCEPT_VERSIONS};

/// Negotiated state of one broker session.
///
/// Written only by the connect path and by disconnect; the closed flag,
/// attempt counter and host index live beside this in the connection and
/// its host pool.
#[derive(Debug, Default)]
pub struct SessionState {
    /// Protocol version from the CONNECTED `version` header (1.0 when
    /// the broker sends none).
    pub protocol: Version,
    /// Broker-assigned session identifier, when present.
    pub session_id: Option<String>,
    /// Broker heart-beat capabilities `(sx, sy)` in milliseconds.
    pub server_heartbeats: (u64, u64),
    /// The CONNECTED frame the broker answered with.
    pub connect_frame: Option<Frame>,
    /// RECEIPT frame captured by a receipt-bearing DISCONNECT.
    pub disconnect_receipt: Option<Frame>,
}

impl SessionState {
    /// Digest the broker's reply to CONNECT/STOMP.
    ///
    /// An ERROR frame surfaces as [`StompError::Broker`] with its headers
    /// and body attached; anything other than CONNECTED is a protocol
    /// violation.
    pub fn apply_connected(&mut self, frame: &Frame) -> Result<(), StompError> {
        if frame.command == "ERROR" {
            return Err(broker_error(frame));
        }
        if frame.command != "CONNECTED" {
            return Err(StompError::Protocol(format!(
                "expected CONNECTED, got {}",
                frame.command
            )));
        }

        self.protocol = match frame.get_header("version") {
            Some(v) => Version::from_header(v)
                .ok_or_else(|| StompError::Protocol(format!("unknown protocol version {}", v)))?,
            None => Version::V1_0,
        };
        self.session_id = frame.get_header("session").map(str::to_string);
        self.server_heartbeats = frame
            .get_header("heart-beat")
            .map(parse_heartbeat_header)
            .unwrap_or((0, 0));
        self.connect_frame = Some(frame.clone());
        Ok(())
    }
}

/// Convert a broker ERROR frame into the error it signals.
pub fn broker_error(frame: &Frame) -> StompError {
    StompError::Broker {
        message: frame
            .get_header("message")
            .unwrap_or("broker sent ERROR")
            .to_string(),
        headers: frame.headers.clone(),
        body: frame.body.clone(),
    }
}

/// Build the CONNECT (or STOMP, under `stompconn`) frame for a host.
///
/// Header order: `accept-version`, `host`, `login`, `passcode`, then the
/// remaining caller-supplied connect headers (e.g. `heart-beat`).
/// Caller-supplied `accept-version` and `host` override the defaults;
/// credentials always come from the [`HostSpec`].
pub fn build_connect_frame(host: &HostSpec, config: &Config) -> Frame {
    let command = if config.stompconn { "STOMP" } else { "CONNECT" };
    let mut frame = Frame::new(command);

    let accept = config
        .connect_headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("accept-version"))
        .map(|(_, v)| v.as_str())
        .unwrap_or(ACCEPT_VERSIONS);
    frame = frame.header("accept-version", accept);

    let vhost = config
        .connect_headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("host"))
        .map(|(_, v)| v.as_str())
        .unwrap_or(host.host.as_str());
    frame = frame.header("host", vhost);

    if !host.login.is_empty() {
        frame = frame.header("login", host.login.as_str());
    }
    if !host.passcode.is_empty() {
        frame = frame.header("passcode", host.passcode.as_str());
    }

    for (k, v) in &config.connect_headers {
        if k.eq_ignore_ascii_case("accept-version")
            || k.eq_ignore_ascii_case("host")
            || k.eq_ignore_ascii_case("login")
            || k.eq_ignore_ascii_case("passcode")
        {
            continue;
        }
        frame = frame.header(k.as_str(), v.as_str());
    }

    frame
}

/// Parse the STOMP `heart-beat` header value (format: "cx,cy").
///
/// Missing or invalid fields default to `0`.
pub fn parse_heartbeat_header(header: &str) -> (u64, u64) {
    let mut parts = header.split(',');
    let cx = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let cy = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    (cx, cy)
}

/// Negotiate heartbeat intervals between client and server.
///
/// `(cx, cy)` is what the client offered, `(sx, sy)` what the broker
/// advertised. A direction is enabled only when BOTH ends quote a nonzero
/// interval, and then runs at the slower of the two; a zero on either
/// side disables it.
///
/// Returns `(send, receive)` intervals.
pub fn negotiate_heartbeats(
    cx: u64,
    cy: u64,
    sx: u64,
    sy: u64,
) -> (Option<Duration>, Option<Duration>) {
    let send = if cx > 0 && sy > 0 {
        Some(Duration::from_millis(cx.max(sy)))
    } else {
        None
    };
    let receive = if cy > 0 && sx > 0 {
        Some(Duration::from_millis(cy.max(sx)))
    } else {
        None
    };
    (send, receive)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_takes_slower_of_both() {
        let (send, recv) = negotiate_heartbeats(10_000, 10_000, 5_000, 20_000);
        assert_eq!(send, Some(Duration::from_millis(20_000)));
        assert_eq!(recv, Some(Duration::from_millis(10_000)));
    }

    #[test]
    fn zero_on_either_side_disables() {
        let (send, recv) = negotiate_heartbeats(10_000, 10_000, 0, 20_000);
        assert_eq!(send, Some(Duration::from_millis(20_000)));
        assert_eq!(recv, None);

        let (send, recv) = negotiate_heartbeats(0, 0, 10_000, 10_000);
        assert_eq!(send, None);
        assert_eq!(recv, None);
    }

    #[test]
    fn heartbeat_header_parsing_tolerates_junk() {
        assert_eq!(parse_heartbeat_header("10000,20000"), (10_000, 20_000));
        assert_eq!(parse_heartbeat_header(" 5, 6 "), (5, 6));
        assert_eq!(parse_heartbeat_header("x,7"), (0, 7));
        assert_eq!(parse_heartbeat_header(""), (0, 0));
    }

    #[test]
    fn connected_reply_populates_state() {
        let mut state = SessionState::default();
        let reply = Frame::new("CONNECTED")
            .header("version", "1.2")
            .header("session", "S-1")
            .header("heart-beat", "0,20000");
        state.apply_connected(&reply).unwrap();
        assert_eq!(state.protocol, Version::V1_2);
        assert_eq!(state.session_id.as_deref(), Some("S-1"));
        assert_eq!(state.server_heartbeats, (0, 20_000));
        assert!(state.connect_frame.is_some());
    }

    #[test]
    fn missing_version_defaults_to_10() {
        let mut state = SessionState::default();
        state.apply_connected(&Frame::new("CONNECTED")).unwrap();
        assert_eq!(state.protocol, Version::V1_0);
    }

    #[test]
    fn error_reply_becomes_broker_error() {
        let mut state = SessionState::default();
        let reply = Frame::new("ERROR")
            .header("message", "bad credentials")
            .set_body(b"denied".to_vec());
        match state.apply_connected(&reply) {
            Err(StompError::Broker { message, body, .. }) => {
                assert_eq!(message, "bad credentials");
                assert_eq!(body, b"denied");
            }
            other => panic!("expected broker error, got {:?}", other),
        }
    }
}
