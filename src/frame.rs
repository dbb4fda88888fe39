use std::fmt;

/// A single STOMP frame.
///
/// `Frame` contains the command (e.g. "SEND", "MESSAGE"), an ordered list
/// of headers (key/value pairs) and the raw body bytes. Header iteration
/// order is preserved from construction; lookup is case-insensitive and
/// first-occurrence-wins, matching the STOMP 1.1/1.2 repeated-header rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// STOMP command (e.g. CONNECT, SEND, SUBSCRIBE)
    pub command: String,
    /// Ordered headers as (key, value) pairs
    pub headers: Vec<(String, String)>,
    /// Raw body bytes
    pub body: Vec<u8>,
    /// Encoder hint: do not auto-add a `content-length` header.
    pub suppress_content_length: bool,
}

impl Frame {
    /// Create a new frame with the given command and empty headers/body.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: Vec::new(),
            suppress_content_length: false,
        }
    }

    /// Add a header (builder style).
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Append a list of headers (builder style).
    pub fn with_headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Set the frame body (builder style).
    pub fn set_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Request a receipt for this frame (builder style).
    ///
    /// The broker answers with a RECEIPT frame carrying the same id.
    pub fn receipt(self, id: impl Into<String>) -> Self {
        self.header("receipt", id)
    }

    /// Omit the automatically-added `content-length` header when this frame
    /// is encoded. Used for text bodies that carry no NUL bytes.
    pub fn suppress_content_length(mut self) -> Self {
        self.suppress_content_length = true;
        self
    }

    /// Get the value of a header by name (case-insensitive).
    ///
    /// Returns the FIRST matching value; under STOMP 1.1/1.2 repeated
    /// headers the first occurrence is authoritative.
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// All values recorded for a header key, in wire order.
    ///
    /// The multi-valued view over repeated headers; the first element is
    /// what `get_header` returns.
    pub fn get_header_all(&self, key: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Whether a header key is present.
    pub fn has_header(&self, key: &str) -> bool {
        self.get_header(key).is_some()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Command: {}", self.command)?;
        for (k, v) in &self.headers {
            writeln!(f, "{}: {}", k, v)?;
        }
        writeln!(f, "Body ({} bytes)", self.body.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_occurrence_wins() {
        let f = Frame::new("MESSAGE")
            .header("foo", "first")
            .header("foo", "second");
        assert_eq!(f.get_header("foo"), Some("first"));
        assert_eq!(f.get_header_all("foo"), vec!["first", "second"]);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let f = Frame::new("MESSAGE").header("Content-Length", "4");
        assert_eq!(f.get_header("content-length"), Some("4"));
    }
}
