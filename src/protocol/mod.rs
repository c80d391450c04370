//! RTSP client message model (RFC 2326).
//!
//! This module owns the text side of the protocol as seen from a client —
//! building requests, serializing them (plain or HTTP-tunneled), and
//! reassembling inbound bytes into classified messages.
//!
//! ## RTSP message format (RFC 2326 §4)
//!
//! RTSP messages follow HTTP/1.1 syntax with a different method set:
//!
//! ```text
//! DESCRIBE rtsp://server/stream RTSP/1.0\r\n
//! CSeq: 2\r\n
//! Accept: application/sdp\r\n
//! \r\n
//! ```
//!
//! Key differences from HTTP:
//! - Stateful: sessions persist across requests (RFC 2326 §3).
//! - The client-chosen `CSeq` header correlates each response with its
//!   request (RFC 2326 §12.17).
//! - A server may push *requests* to the client (e.g. ANNOUNCE), so inbound
//!   bytes are classified as [`Request`](MessageKind::Request),
//!   [`Response`](MessageKind::Response), or
//!   [`Invalid`](MessageKind::Invalid) rather than assumed to be responses.

pub mod assembler;
pub mod message;

pub use assembler::MessageAssembler;
pub use message::{MessageKind, RtspMessage};
