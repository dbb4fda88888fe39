use crate::error::StompError;

/// A frame lifted out of the read buffer, still in raw bytes.
///
/// Header keys/values are unescaped and validated by the codec, which
/// knows the negotiated protocol version; the parser only finds frame
/// boundaries.
#[derive(Debug)]
pub struct RawFrame {
    pub command: Vec<u8>,
    pub headers: Vec<(Vec<u8>, Vec<u8>)>,
    pub body: Vec<u8>,
    /// Total bytes consumed from the input, including the NUL terminator.
    pub consumed: usize,
}

/// Extract an optional `content-length` value from raw header lines.
/// The first occurrence wins, mirroring the repeated-header rule.
fn get_content_length(headers: &[(Vec<u8>, Vec<u8>)]) -> Result<Option<usize>, StompError> {
    for (k, v) in headers {
        if k.eq_ignore_ascii_case(&b"content-length"[..]) {
            let s = std::str::from_utf8(v)
                .map_err(|e| StompError::MalformedFrame(format!("content-length not utf8: {}", e)))?;
            let trimmed = s.trim();
            return trimmed
                .parse::<usize>()
                .map(Some)
                .map_err(|_| {
                    StompError::MalformedFrame(format!("invalid content-length '{}'", trimmed))
                });
        }
    }
    Ok(None)
}

/// Parse a single STOMP frame from a raw byte slice.
///
/// Returns `Ok(Some(RawFrame))` when a full frame was parsed,
/// `Ok(None)` when more bytes are required, and `Err` on structural
/// errors. Line terminators may be LF or CRLF; a trailing CR is stripped
/// from the command and each header line.
pub fn parse_frame_slice(input: &[u8]) -> Result<Option<RawFrame>, StompError> {
    let len = input.len();

    // command line
    let cmd_end = match input.iter().position(|&b| b == b'\n') {
        Some(i) => i,
        None => return Ok(None),
    };
    let mut command = input[..cmd_end].to_vec();
    if command.last() == Some(&b'\r') {
        command.pop();
    }
    if command.is_empty() {
        return Err(StompError::MalformedFrame("missing command".to_string()));
    }
    let mut pos = cmd_end + 1;

    // header lines until a blank line
    let mut headers: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    loop {
        let line_end_rel = match input[pos..].iter().position(|&b| b == b'\n') {
            Some(i) => i,
            None => return Ok(None),
        };
        let mut line = &input[pos..pos + line_end_rel];
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        pos += line_end_rel + 1;
        if line.is_empty() {
            break;
        }
        match line.iter().position(|&b| b == b':') {
            Some(colon) => {
                headers.push((line[..colon].to_vec(), line[colon + 1..].to_vec()));
            }
            None => {
                return Err(StompError::MalformedFrame(format!(
                    "header line without separator: {:?}",
                    String::from_utf8_lossy(line)
                )));
            }
        }
    }

    // body: exact content-length read, or scan to NUL
    match get_content_length(&headers)? {
        Some(content_len) => {
            if pos + content_len + 1 > len {
                return Ok(None);
            }
            let body = input[pos..pos + content_len].to_vec();
            pos += content_len;
            if input[pos] != 0 {
                return Err(StompError::MalformedFrame(
                    "missing NUL after content-length body".to_string(),
                ));
            }
            pos += 1;
            Ok(Some(RawFrame {
                command,
                headers,
                body,
                consumed: pos,
            }))
        }
        None => match input[pos..].iter().position(|&b| b == 0) {
            Some(nul_rel) => {
                let body = input[pos..pos + nul_rel].to_vec();
                pos += nul_rel + 1;
                Ok(Some(RawFrame {
                    command,
                    headers,
                    body,
                    consumed: pos,
                }))
            }
            None => Ok(None),
        },
    }
}
