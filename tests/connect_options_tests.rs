//! Config defaults, CONNECT frame construction and heart-beat
//! negotiation math.

use std::time::Duration;

use stomp_core::session::{build_connect_frame, negotiate_heartbeats, parse_heartbeat_header};
use stomp_core::{Config, HostSpec};

fn host() -> HostSpec {
    HostSpec::new("u", "p", "mq", 61613)
}

// ============================================================================
// Defaults
// ============================================================================

#[test]
fn config_defaults_match_documented_values() {
    let config = Config::new(vec![host()]);
    assert!(!config.reliable);
    assert_eq!(config.initial_reconnect_delay, Duration::from_millis(10));
    assert_eq!(config.max_reconnect_delay, Duration::from_secs(30));
    assert!(config.use_exponential_back_off);
    assert_eq!(config.back_off_multiplier, 2.0);
    assert_eq!(config.max_reconnect_attempts, 0);
    assert!(!config.randomize);
    assert_eq!(config.connect_timeout, Duration::ZERO);
    assert_eq!(config.parse_timeout, Duration::from_secs(5));
    assert!(config.connect_headers.is_empty());
    assert!(config.closed_check);
    assert!(!config.hbser);
    assert!(!config.stompconn);
    assert!(!config.usecrlf);
    assert!(!config.autoflush);
    assert!(!config.dmh);
}

// ============================================================================
// CONNECT frame construction
// ============================================================================

#[test]
fn connect_frame_has_standard_header_order() {
    let config = Config::new(vec![host()])
        .with_connect_header("heart-beat", "10000,10000");
    let frame = build_connect_frame(&host(), &config);

    assert_eq!(frame.command, "CONNECT");
    let keys: Vec<&str> = frame.headers.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(
        keys,
        vec!["accept-version", "host", "login", "passcode", "heart-beat"]
    );
    assert_eq!(frame.get_header("accept-version"), Some("1.0,1.1,1.2"));
    assert_eq!(frame.get_header("host"), Some("mq"));
    assert_eq!(frame.get_header("login"), Some("u"));
    assert_eq!(frame.get_header("passcode"), Some("p"));
    assert_eq!(frame.get_header("heart-beat"), Some("10000,10000"));
}

#[test]
fn stompconn_switches_the_command() {
    let config = Config::new(vec![host()]).with_stompconn(true);
    let frame = build_connect_frame(&host(), &config);
    assert_eq!(frame.command, "STOMP");
}

#[test]
fn caller_headers_override_accept_version_and_host() {
    let config = Config::new(vec![host()])
        .with_connect_header("accept-version", "1.2")
        .with_connect_header("host", "vhost-7");
    let frame = build_connect_frame(&host(), &config);
    assert_eq!(frame.get_header("accept-version"), Some("1.2"));
    assert_eq!(frame.get_header("host"), Some("vhost-7"));
    // not duplicated
    assert_eq!(frame.get_header_all("host").len(), 1);
}

#[test]
fn empty_credentials_are_omitted() {
    let anon = HostSpec::new("", "", "mq", 61613);
    let config = Config::new(vec![anon.clone()]);
    let frame = build_connect_frame(&anon, &config);
    assert!(!frame.has_header("login"));
    assert!(!frame.has_header("passcode"));
}

// ============================================================================
// Heart-beat negotiation (the 1.2 CONNECT scenario)
// ============================================================================

#[test]
fn negotiation_scenario_client_10s_broker_0_20s() {
    // client offers heart-beat:10000,10000; broker replies 0,20000
    let (cx, cy) = parse_heartbeat_header("10000,10000");
    let (sx, sy) = parse_heartbeat_header("0,20000");

    let (send, recv) = negotiate_heartbeats(cx, cy, sx, sy);
    assert_eq!(send, Some(Duration::from_millis(20_000)));
    // broker will not send (sx = 0), so no receive monitoring
    assert_eq!(recv, None);
}

#[test]
fn negotiation_disabled_when_either_side_declines() {
    assert_eq!(negotiate_heartbeats(0, 0, 0, 0), (None, None));
    assert_eq!(negotiate_heartbeats(5000, 5000, 0, 0), (None, None));
    assert_eq!(negotiate_heartbeats(0, 0, 5000, 5000), (None, None));
}

#[test]
fn negotiation_takes_the_maximum() {
    let (send, recv) = negotiate_heartbeats(1000, 2000, 3000, 4000);
    assert_eq!(send, Some(Duration::from_millis(4000)));
    assert_eq!(recv, Some(Duration::from_millis(3000)));
}
