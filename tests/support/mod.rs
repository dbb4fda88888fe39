//! Loopback mock broker used by the connection-level tests.
#![allow(dead_code)]

use std::net::SocketAddr;

use stomp_core::{Config, HostSpec};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const CONNECTED_10: &str = "CONNECTED\nsession:S-10\n\n\0";
pub const CONNECTED_11: &str = "CONNECTED\nversion:1.1\nsession:S-11\n\n\0";
pub const CONNECTED_12: &str = "CONNECTED\nversion:1.2\nsession:S-12\n\n\0";

pub async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// A config pointing a single host at the mock broker.
pub fn config_for(addr: SocketAddr) -> Config {
    Config::new(vec![HostSpec::new(
        "u",
        "p",
        addr.ip().to_string(),
        addr.port(),
    )])
}

/// Read one frame off the socket: skips inter-frame line terminators
/// (heartbeat pulses), returns everything up to the NUL as a lossy
/// string. `None` on EOF.
pub async fn read_frame(stream: &mut TcpStream) -> Option<String> {
    let mut buf: Vec<u8> = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match stream.read(&mut byte).await {
            Ok(0) | Err(_) => {
                return if buf.is_empty() {
                    None
                } else {
                    Some(String::from_utf8_lossy(&buf).into_owned())
                };
            }
            Ok(_) => {
                let b = byte[0];
                if b == 0 {
                    return Some(String::from_utf8_lossy(&buf).into_owned());
                }
                if buf.is_empty() && (b == b'\n' || b == b'\r') {
                    continue;
                }
                buf.push(b);
            }
        }
    }
}

/// Count heartbeat line feeds arriving within the given window.
pub async fn count_heartbeats(stream: &mut TcpStream, window: std::time::Duration) -> usize {
    let mut count = 0usize;
    let deadline = tokio::time::Instant::now() + window;
    let mut byte = [0u8; 1];
    loop {
        match tokio::time::timeout_at(deadline, stream.read(&mut byte)).await {
            Err(_) => return count,
            Ok(Ok(0)) | Ok(Err(_)) => return count,
            Ok(Ok(_)) => {
                if byte[0] == b'\n' {
                    count += 1;
                }
            }
        }
    }
}

pub async fn send_raw(stream: &mut TcpStream, bytes: &[u8]) {
    stream.write_all(bytes).await.unwrap();
    stream.flush().await.unwrap();
}

/// Accept one client and complete the CONNECT handshake with the given
/// reply. Returns the stream and the CONNECT frame the client sent.
pub async fn accept_and_connect(listener: &TcpListener, reply: &str) -> (TcpStream, String) {
    let (mut stream, _) = listener.accept().await.unwrap();
    let connect = read_frame(&mut stream).await.expect("no CONNECT frame");
    send_raw(&mut stream, reply.as_bytes()).await;
    (stream, connect)
}
