use std::time::Instant;

use base64::prelude::{BASE64_STANDARD, Engine as _};

use crate::error::{ParseErrorKind, Result, RtspClientError};

/// Protocol version this client speaks by default (RFC 2326).
pub const DEFAULT_VERSION: &str = "RTSP/1.0";

/// Client identification string sent in the `User-Agent` header
/// (RFC 2326 §12.41).
pub const CLIENT_AGENT: &str = "rtsp-client-rs/0.1";

/// Well-known status codes the transaction engine reacts to.
pub mod status {
    pub const OK: u16 = 200;
    pub const UNAUTHORIZED: u16 = 401;
    pub const NOT_IMPLEMENTED: u16 = 501;
    pub const VERSION_NOT_SUPPORTED: u16 = 505;
}

/// Classification of an RTSP message (RFC 2326 §6, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Has a `Method URI Version` request line. Servers may push these.
    Request,
    /// Has a `Version Status-Code Reason` status line.
    Response,
    /// Start line matched neither form; bytes were consumed but discarded.
    Invalid,
}

/// An RTSP message, request or response (RFC 2326 §6, §7).
///
/// Header lookup is case-insensitive per RFC 2326 §4.2; header order and
/// as-received spelling are preserved for serialization.
///
/// The `created`/`transferred` timestamps support round-trip measurement:
/// `transferred` is stamped exactly once per fully completed physical send,
/// and cleared again before a retransmission.
#[derive(Debug, Clone)]
pub struct RtspMessage {
    pub kind: MessageKind,
    /// RTSP method (OPTIONS, DESCRIBE, SETUP, ...). Empty for responses.
    pub method: String,
    /// Request-URI (e.g. `rtsp://host:port/stream`). Empty for responses.
    pub uri: String,
    /// Protocol version (expected: `RTSP/1.0`).
    pub version: String,
    /// Status code for responses; 0 for requests.
    pub status_code: u16,
    /// Reason phrase for responses.
    pub status_text: String,
    /// Headers as ordered (name, value) pairs.
    pub headers: Vec<(String, String)>,
    /// Message body (SDP, parameter text, ...).
    pub body: Vec<u8>,
    created: Instant,
    transferred: Option<Instant>,
}

impl RtspMessage {
    pub fn request(method: &str, uri: &str) -> Self {
        RtspMessage {
            kind: MessageKind::Request,
            method: method.to_string(),
            uri: uri.to_string(),
            version: DEFAULT_VERSION.to_string(),
            status_code: 0,
            status_text: String::new(),
            headers: Vec::new(),
            body: Vec::new(),
            created: Instant::now(),
            transferred: None,
        }
    }

    pub fn response(status_code: u16, status_text: &str) -> Self {
        RtspMessage {
            kind: MessageKind::Response,
            method: String::new(),
            uri: String::new(),
            version: DEFAULT_VERSION.to_string(),
            status_code,
            status_text: status_text.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
            created: Instant::now(),
            transferred: None,
        }
    }

    fn invalid() -> Self {
        let mut msg = Self::response(0, "");
        msg.kind = MessageKind::Invalid;
        msg
    }

    /// OPTIONS — capability discovery (RFC 2326 §10.1).
    pub fn options(uri: &str) -> Self {
        Self::request("OPTIONS", uri)
    }

    /// DESCRIBE — retrieve the SDP session description (RFC 2326 §10.2).
    pub fn describe(uri: &str) -> Self {
        let mut msg = Self::request("DESCRIBE", uri);
        msg.set_header("Accept", "application/sdp");
        msg
    }

    /// SETUP — negotiate transport for one track (RFC 2326 §10.4).
    pub fn setup(uri: &str, transport: &str) -> Self {
        let mut msg = Self::request("SETUP", uri);
        msg.set_header("Transport", transport);
        msg
    }

    /// PLAY — start media delivery (RFC 2326 §10.5).
    pub fn play(uri: &str) -> Self {
        let mut msg = Self::request("PLAY", uri);
        msg.set_header("Range", "npt=0.000-");
        msg
    }

    /// PAUSE — suspend media delivery (RFC 2326 §10.6).
    pub fn pause(uri: &str) -> Self {
        Self::request("PAUSE", uri)
    }

    /// TEARDOWN — destroy the session (RFC 2326 §10.7).
    pub fn teardown(uri: &str) -> Self {
        Self::request("TEARDOWN", uri)
    }

    /// GET_PARAMETER — keepalive / parameter query (RFC 2326 §10.8).
    pub fn get_parameter(uri: &str) -> Self {
        Self::request("GET_PARAMETER", uri)
    }

    pub fn is_request(&self) -> bool {
        self.kind == MessageKind::Request
    }

    pub fn is_response(&self) -> bool {
        self.kind == MessageKind::Response
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Set a header, replacing any existing value under the same
    /// (case-insensitive) name. Keys stay unique.
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let Some(slot) = self
            .headers
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            slot.1 = value.to_string();
        } else {
            self.headers.push((name.to_string(), value.to_string()));
        }
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
    }

    pub fn contains_header(&self, name: &str) -> bool {
        self.get_header(name).is_some()
    }

    /// Returns the CSeq header value, which numbers and orders RTSP
    /// request/response pairs (RFC 2326 §12.17).
    pub fn cseq(&self) -> Option<u32> {
        self.get_header("CSeq").and_then(|v| v.trim().parse().ok())
    }

    pub fn set_cseq(&mut self, cseq: u32) {
        self.set_header("CSeq", &cseq.to_string());
    }

    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    /// When this message object was built.
    pub fn created(&self) -> Instant {
        self.created
    }

    /// When the last fully completed physical send of this message finished,
    /// if any.
    pub fn transferred(&self) -> Option<Instant> {
        self.transferred
    }

    /// Stamp the transfer time. Called once per completed send.
    pub fn mark_transferred(&mut self) {
        self.transferred = Some(Instant::now());
    }

    /// Clear the transfer time ahead of a retransmission.
    pub fn clear_transferred(&mut self) {
        self.transferred = None;
    }

    /// Serialize to the RTSP text wire format.
    ///
    /// If a body is present, `Content-Length` is appended automatically
    /// (RFC 2326 §12.14).
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = match self.kind {
            MessageKind::Response => format!(
                "{} {} {}\r\n",
                self.version, self.status_code, self.status_text
            ),
            _ => format!("{} {} {}\r\n", self.method, self.uri, self.version),
        };

        for (name, value) in &self.headers {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }

        if self.body.is_empty() {
            out.push_str("\r\n");
            out.into_bytes()
        } else {
            out.push_str(&format!("Content-Length: {}\r\n\r\n", self.body.len()));
            let mut bytes = out.into_bytes();
            bytes.extend_from_slice(&self.body);
            bytes
        }
    }

    /// Serialize for RTSP-over-HTTP tunneling: the plain message,
    /// base64-encoded, wrapped in an HTTP POST envelope with the
    /// `application/x-rtsp-tunnelled` content type.
    pub fn serialize_tunneled(&self) -> Vec<u8> {
        let encoded = BASE64_STANDARD.encode(self.serialize());
        let path = if self.uri.is_empty() { "/" } else { &self.uri };
        format!(
            "POST {} HTTP/1.0\r\n\
             Content-Type: application/x-rtsp-tunnelled\r\n\
             Content-Length: {}\r\n\r\n{}",
            path,
            encoded.len(),
            encoded
        )
        .into_bytes()
    }

    /// Parse the start line and header block of a message (everything up to
    /// the blank line). The body, if any, is attached separately by the
    /// [`MessageAssembler`](super::MessageAssembler) once `Content-Length`
    /// bytes have arrived.
    ///
    /// An `HTTP/x.y` status line is accepted alongside `RTSP/x.y` so that
    /// tunneled envelopes classify as responses instead of garbage.
    pub fn parse_head(raw: &str) -> Result<Self> {
        let mut lines = raw.lines();

        let start_line = lines.next().ok_or(RtspClientError::Parse {
            kind: ParseErrorKind::EmptyMessage,
        })?;

        let parts: Vec<&str> = start_line.splitn(3, ' ').collect();
        if parts.len() != 3 {
            return Err(RtspClientError::Parse {
                kind: ParseErrorKind::InvalidStartLine,
            });
        }

        let mut msg = if parts[0].starts_with("RTSP/") || parts[0].starts_with("HTTP/") {
            let code = parts[1].parse().map_err(|_| RtspClientError::Parse {
                kind: ParseErrorKind::InvalidStartLine,
            })?;
            let mut msg = Self::response(code, parts[2].trim());
            msg.version = parts[0].to_string();
            msg
        } else {
            let mut msg = Self::request(parts[0], parts[1]);
            msg.version = parts[2].trim().to_string();
            msg
        };

        for line in lines {
            if line.is_empty() {
                break;
            }

            let colon_pos = line.find(':').ok_or(RtspClientError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;

            let name = line[..colon_pos].trim().to_string();
            let value = line[colon_pos + 1..].trim().to_string();
            msg.headers.push((name, value));
        }

        Ok(msg)
    }

    /// A message carrying [`MessageKind::Invalid`], standing in for bytes
    /// that could not be classified.
    pub(crate) fn unparsable() -> Self {
        Self::invalid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_request() {
        let mut msg = RtspMessage::options("rtsp://localhost:8554/test");
        msg.set_cseq(1);
        let s = String::from_utf8(msg.serialize()).unwrap();
        assert!(s.starts_with("OPTIONS rtsp://localhost:8554/test RTSP/1.0\r\n"));
        assert!(s.contains("CSeq: 1\r\n"));
        assert!(s.ends_with("\r\n\r\n"));
    }

    #[test]
    fn serialize_with_body_appends_content_length() {
        let mut msg = RtspMessage::request("SET_PARAMETER", "rtsp://h/s");
        msg.set_cseq(2);
        msg.set_body(b"rate: 1.0\r\n".to_vec());
        let s = String::from_utf8(msg.serialize()).unwrap();
        assert!(s.contains("Content-Length: 11\r\n"));
        assert!(s.ends_with("rate: 1.0\r\n"));
    }

    #[test]
    fn parse_response_head() {
        let raw = "RTSP/1.0 200 OK\r\nCSeq: 3\r\nSession: abc123;timeout=30\r\n\r\n";
        let msg = RtspMessage::parse_head(raw).unwrap();
        assert_eq!(msg.kind, MessageKind::Response);
        assert_eq!(msg.status_code, 200);
        assert_eq!(msg.status_text, "OK");
        assert_eq!(msg.cseq(), Some(3));
        assert_eq!(msg.get_header("Session"), Some("abc123;timeout=30"));
    }

    #[test]
    fn parse_pushed_request_head() {
        let raw = "ANNOUNCE rtsp://localhost/stream RTSP/1.0\r\nCSeq: 8\r\n\r\n";
        let msg = RtspMessage::parse_head(raw).unwrap();
        assert_eq!(msg.kind, MessageKind::Request);
        assert_eq!(msg.method, "ANNOUNCE");
        assert_eq!(msg.cseq(), Some(8));
    }

    #[test]
    fn parse_empty_message() {
        assert!(RtspMessage::parse_head("").is_err());
    }

    #[test]
    fn header_lookup_case_insensitive() {
        let raw = "RTSP/1.0 200 OK\r\ncseq: 42\r\n\r\n";
        let msg = RtspMessage::parse_head(raw).unwrap();
        assert_eq!(msg.get_header("CSeq"), Some("42"));
        assert_eq!(msg.get_header("CSEQ"), Some("42"));
    }

    #[test]
    fn set_header_replaces_existing() {
        let mut msg = RtspMessage::options("rtsp://h/s");
        msg.set_header("Session", "a");
        msg.set_header("session", "b");
        assert_eq!(msg.get_header("Session"), Some("b"));
        assert_eq!(msg.headers.len(), 1);
    }

    #[test]
    fn transferred_set_and_cleared() {
        let mut msg = RtspMessage::options("rtsp://h/s");
        assert!(msg.transferred().is_none());
        msg.mark_transferred();
        assert!(msg.transferred().is_some());
        msg.clear_transferred();
        assert!(msg.transferred().is_none());
    }

    #[test]
    fn tunneled_envelope() {
        let mut msg = RtspMessage::options("rtsp://h/s");
        msg.set_cseq(1);
        let s = String::from_utf8(msg.serialize_tunneled()).unwrap();
        assert!(s.starts_with("POST rtsp://h/s HTTP/1.0\r\n"));
        assert!(s.contains("Content-Type: application/x-rtsp-tunnelled\r\n"));
        let body = s.split("\r\n\r\n").nth(1).unwrap();
        let decoded = BASE64_STANDARD.decode(body).unwrap();
        assert_eq!(decoded, msg.serialize());
    }
}
