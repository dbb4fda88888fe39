use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::error::StompError;
use crate::frame::Frame;
use crate::parser::parse_frame_slice;
use crate::protocol::Version;

/// Items produced or consumed by the codec.
///
/// A `StompItem` is either a decoded `Frame` or a `Heartbeat` marker
/// representing a single line terminator received on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompItem {
    /// A decoded STOMP frame (command + headers + body)
    Frame(Frame),
    /// A single heartbeat pulse (line terminator)
    Heartbeat,
}

/// `StompCodec` implements `tokio_util::codec::{Decoder, Encoder}` for the
/// STOMP wire protocol.
///
/// The codec is version-aware: header escaping and UTF-8 validation follow
/// the negotiated protocol revision, which the connection installs after
/// the CONNECTED reply via [`set_version`](StompCodec::set_version). Until
/// then frames go out under 1.0 rules, which is what CONNECT/STOMP frames
/// require.
pub struct StompCodec {
    version: Version,
    crlf: bool,
}

impl StompCodec {
    pub fn new() -> Self {
        Self {
            version: Version::V1_0,
            crlf: false,
        }
    }

    pub fn with_version(version: Version) -> Self {
        Self {
            version,
            crlf: false,
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Emit CRLF line terminators on outbound frames. Only honored once
    /// the negotiated version is 1.2; inbound always accepts both.
    pub fn set_crlf(&mut self, on: bool) {
        self.crlf = on;
    }

    fn line_end(&self) -> &'static [u8] {
        if self.crlf && self.version == Version::V1_2 {
            b"\r\n"
        } else {
            b"\n"
        }
    }

    fn header_string(&self, raw: &[u8], what: &str) -> Result<String, StompError> {
        let unescaped = self
            .version
            .unescape_header(raw)
            .map_err(|e| StompError::Protocol(format!("{} in header {}", e, what)))?;
        if self.version >= Version::V1_1 {
            String::from_utf8(unescaped)
                .map_err(|e| StompError::Protocol(format!("invalid utf8 in header {}: {}", what, e)))
        } else {
            // 1.0 headers are uninterpreted bytes; lossy conversion keeps
            // the pass-through contract without failing the stream.
            Ok(String::from_utf8_lossy(&unescaped).into_owned())
        }
    }
}

impl Default for StompCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for StompCodec {
    type Item = StompItem;
    type Error = StompError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        // heartbeat: a lone LF or CRLF between frames
        match src[0] {
            b'\n' => {
                src.advance(1);
                return Ok(Some(StompItem::Heartbeat));
            }
            b'\r' => {
                if src.len() < 2 {
                    return Ok(None);
                }
                if src[1] != b'\n' {
                    return Err(StompError::MalformedFrame(
                        "carriage return not followed by line feed".to_string(),
                    ));
                }
                src.advance(2);
                return Ok(Some(StompItem::Heartbeat));
            }
            _ => {}
        }

        let raw = match parse_frame_slice(src.as_ref())? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        src.advance(raw.consumed);

        let command = String::from_utf8(raw.command)
            .map_err(|e| StompError::MalformedFrame(format!("invalid utf8 in command: {}", e)))?;

        let mut headers: Vec<(String, String)> = Vec::with_capacity(raw.headers.len());
        for (k, v) in &raw.headers {
            let key = self.header_string(k, "key")?;
            let value = self.header_string(v, "value")?;
            headers.push((key, value));
        }

        Ok(Some(StompItem::Frame(Frame {
            command,
            headers,
            body: raw.body,
            suppress_content_length: false,
        })))
    }
}

impl Encoder<StompItem> for StompCodec {
    type Error = StompError;

    fn encode(&mut self, item: StompItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            StompItem::Heartbeat => {
                dst.extend_from_slice(self.line_end());
            }
            StompItem::Frame(frame) => {
                let eol = self.line_end();

                dst.extend_from_slice(frame.command.as_bytes());
                dst.extend_from_slice(eol);

                let mut headers = frame.headers;
                let needs_cl = !frame.suppress_content_length
                    && !frame.body.is_empty()
                    && !headers
                        .iter()
                        .any(|(k, _)| k.eq_ignore_ascii_case("content-length"));
                if needs_cl {
                    headers.push(("content-length".to_string(), frame.body.len().to_string()));
                }

                for (k, v) in headers {
                    if self.version == Version::V1_0
                        && (k.contains(':') || k.contains('\n') || v.contains(':') || v.contains('\n'))
                    {
                        // 1.0 leaves these undefined; pass through verbatim.
                        warn!(key = %k, "unescapable character in STOMP 1.0 header");
                    }
                    dst.extend_from_slice(self.version.escape_header(&k).as_bytes());
                    dst.put_u8(b':');
                    dst.extend_from_slice(self.version.escape_header(&v).as_bytes());
                    dst.extend_from_slice(eol);
                }

                dst.extend_from_slice(eol);
                dst.extend_from_slice(&frame.body);
                dst.put_u8(0);
            }
        }

        Ok(())
    }
}
