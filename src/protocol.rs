use std::fmt;

/// STOMP protocol revisions this client can negotiate.
///
/// Ordering follows the protocol timeline, so `>= V1_1` reads as
/// "1.1 or newer".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Version {
    /// STOMP 1.0: no header escaping, no NACK, no heartbeats.
    #[default]
    V1_0,
    /// STOMP 1.1: header escaping, NACK, heartbeats, mandatory sub ids.
    V1_1,
    /// STOMP 1.2: as 1.1 plus `\r` escaping and optional CRLF line ends.
    V1_2,
}

/// Default `accept-version` header value offered during connect.
pub const ACCEPT_VERSIONS: &str = "1.0,1.1,1.2";

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::V1_0 => "1.0",
            Version::V1_1 => "1.1",
            Version::V1_2 => "1.2",
        }
    }

    /// Parse the `version` header of a CONNECTED frame. Unknown values are
    /// rejected; an absent header defaults to 1.0 at the call site.
    pub fn from_header(value: &str) -> Option<Version> {
        match value.trim() {
            "1.0" => Some(Version::V1_0),
            "1.1" => Some(Version::V1_1),
            "1.2" => Some(Version::V1_2),
            _ => None,
        }
    }

    /// NACK exists from 1.1 on.
    pub fn supports_nack(&self) -> bool {
        *self >= Version::V1_1
    }

    /// Heartbeats exist from 1.1 on.
    pub fn supports_heartbeats(&self) -> bool {
        *self >= Version::V1_1
    }

    /// Subscription ids are mandatory from 1.1 on.
    pub fn requires_subscription_id(&self) -> bool {
        *self >= Version::V1_1
    }

    /// Escape a header key or value for wire transmission.
    ///
    /// - 1.0: verbatim; the protocol leaves `:` and newlines undefined.
    /// - 1.1: `\` → `\\`, LF → `\n`, `:` → `\c`.
    /// - 1.2: as 1.1 plus CR → `\r`.
    pub fn escape_header(&self, input: &str) -> String {
        if *self == Version::V1_0 {
            return input.to_string();
        }
        let mut result = String::with_capacity(input.len());
        for ch in input.chars() {
            match ch {
                '\\' => result.push_str("\\\\"),
                '\n' => result.push_str("\\n"),
                ':' => result.push_str("\\c"),
                '\r' if *self == Version::V1_2 => result.push_str("\\r"),
                _ => result.push(ch),
            }
        }
        result
    }

    /// Reverse of [`escape_header`](Self::escape_header) on raw wire bytes.
    ///
    /// Returns an error for escape sequences the version does not define
    /// (`\r` is only valid under 1.2, `\x` never is).
    pub fn unescape_header(&self, input: &[u8]) -> Result<Vec<u8>, String> {
        if *self == Version::V1_0 {
            return Ok(input.to_vec());
        }
        let mut out = Vec::with_capacity(input.len());
        let mut iter = input.iter();
        while let Some(&b) = iter.next() {
            if b != b'\\' {
                out.push(b);
                continue;
            }
            match iter.next() {
                Some(b'\\') => out.push(b'\\'),
                Some(b'n') => out.push(b'\n'),
                Some(b'c') => out.push(b':'),
                Some(b'r') if *self == Version::V1_2 => out.push(b'\r'),
                Some(&other) => {
                    return Err(format!("invalid escape sequence \\{}", other as char));
                }
                None => return Err("dangling escape at end of header".to_string()),
            }
        }
        Ok(out)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
