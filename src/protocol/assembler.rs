use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::message::RtspMessage;

/// Upper bound on buffered unparsed bytes. A peer that never produces a
/// blank line past this point is feeding us garbage, not RTSP.
const MAX_PENDING: usize = 256 * 1024;

/// Reassembles a byte stream into complete, classified RTSP messages.
///
/// Sockets deliver arbitrary chunks; this accumulates them until a full
/// header block (terminated by a blank line) plus `Content-Length` body
/// bytes are available, then yields one [`RtspMessage`]. Unparsable heads
/// yield a message classified [`MessageKind::Invalid`] so the caller can
/// log and keep waiting instead of stalling the stream.
///
/// In tunneled mode, an `HTTP/x.y` response envelope is unwrapped: its body
/// is base64-decoded and parsed as the inner RTSP message.
#[derive(Debug)]
pub struct MessageAssembler {
    buf: Vec<u8>,
    tunneled: bool,
}

impl MessageAssembler {
    pub fn new() -> Self {
        MessageAssembler {
            buf: Vec::new(),
            tunneled: false,
        }
    }

    /// An assembler that unwraps RTSP-over-HTTP envelopes.
    pub fn new_tunneled() -> Self {
        MessageAssembler {
            buf: Vec::new(),
            tunneled: true,
        }
    }

    /// Bytes buffered but not yet formed into a message.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Drop any partially accumulated message.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Feed a chunk of raw bytes. Returns a message once one is complete.
    ///
    /// At most one message is returned per call; if the chunk completed
    /// several, the rest stay buffered and pop out on subsequent calls
    /// (callers feed an empty chunk to drain).
    pub fn feed(&mut self, chunk: &[u8]) -> Option<RtspMessage> {
        self.buf.extend_from_slice(chunk);

        let head_end = find_blank_line(&self.buf)?;
        let head = String::from_utf8_lossy(&self.buf[..head_end]).into_owned();

        let parsed = RtspMessage::parse_head(&head);
        let content_length = parsed
            .as_ref()
            .ok()
            .and_then(|m| m.get_header("Content-Length"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);

        let total = head_end + 4 + content_length;
        if self.buf.len() < total {
            if self.buf.len() > MAX_PENDING {
                tracing::warn!(pending = self.buf.len(), "discarding oversized partial message");
                self.buf.clear();
            }
            return None;
        }

        let body = self.buf[head_end + 4..total].to_vec();
        self.buf.drain(..total);

        let mut msg = match parsed {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "unparsable message head");
                return Some(RtspMessage::unparsable());
            }
        };
        msg.set_body(body);

        if self.tunneled && msg.version.starts_with("HTTP/") {
            return Some(unwrap_tunneled(msg));
        }
        Some(msg)
    }
}

impl Default for MessageAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode the base64 body of an HTTP envelope and parse the RTSP message
/// inside it.
fn unwrap_tunneled(envelope: RtspMessage) -> RtspMessage {
    let decoded = match BASE64_STANDARD.decode(envelope.body.trim_ascii()) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "tunneled envelope body is not base64");
            return RtspMessage::unparsable();
        }
    };
    let mut inner = MessageAssembler::new();
    match inner.feed(&decoded) {
        Some(msg) => msg,
        None => {
            tracing::warn!("tunneled envelope held a truncated message");
            RtspMessage::unparsable()
        }
    }
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
