use std::io;
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::debug;

use crate::codec::StompCodec;
use crate::error::StompError;
use crate::hosts::HostSpec;

/// Outbound half of one broker transport. Writes happen only under the
/// connection's transmit lock.
pub type FrameWriter = FramedWrite<OwnedWriteHalf, StompCodec>;

/// Inbound half of one broker transport. Reads happen only under the
/// connection's read lock.
pub type FrameReader = FramedRead<OwnedReadHalf, StompCodec>;

/// Open a byte stream to one host and wrap it in framed halves.
///
/// Both codecs start at protocol 1.0; the connection installs the
/// negotiated version after the CONNECTED reply. A zero `connect_timeout`
/// leaves the dial unbounded.
///
/// TLS attaches here: a HostSpec with `ssl` set dials the TLS default
/// port, and a TLS stream would replace the plain `TcpStream` before the
/// split. Wiring the TLS parameters is the caller's concern.
pub async fn open(
    host: &HostSpec,
    connect_timeout: Duration,
) -> Result<(FrameWriter, FrameReader), StompError> {
    let addr = (host.host.as_str(), host.effective_port());
    debug!(host = %host.host, port = addr.1, "opening transport");

    let stream = if connect_timeout.is_zero() {
        TcpStream::connect(addr).await?
    } else {
        tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                StompError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {}:{} timed out", host.host, host.effective_port()),
                ))
            })??
    };
    // heartbeat bytes must not linger in Nagle buffers
    stream.set_nodelay(true).ok();

    let (read_half, write_half) = stream.into_split();
    Ok((
        FramedWrite::new(write_half, StompCodec::new()),
        FramedRead::new(read_half, StompCodec::new()),
    ))
}
