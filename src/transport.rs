//! Boundary to the RTP/RTCP transport layer.
//!
//! The transaction engine and the media transport may share one TCP socket
//! for interleaved delivery (RFC 2326 §10.12). Only one component owns
//! reading at any instant, so two explicit channels exist between them:
//!
//! - [`TransportBridge::handoff`] — the engine drained bytes that are not
//!   RTSP text (first byte not alphanumeric, e.g. a `$`-framed interleaved
//!   packet) and passes them over untouched.
//! - [`DeliverySlot`] — when the transport layer owns the socket, it parses
//!   any RTSP response it encounters out of band and posts it here, waking
//!   the transaction waiting on the session.

use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::protocol::RtspMessage;

/// Bytes drained from a shared socket that belong to the transport layer.
///
/// `buffer[offset..offset + len]` is the unclaimed region; the transport
/// resumes its own framing from there.
#[derive(Debug, Clone)]
pub struct InterleavedHandoff {
    pub buffer: Vec<u8>,
    pub offset: usize,
    pub len: usize,
}

impl InterleavedHandoff {
    pub fn new(buffer: Vec<u8>) -> Self {
        let len = buffer.len();
        InterleavedHandoff {
            buffer,
            offset: 0,
            len,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer[self.offset..self.offset + self.len]
    }
}

/// The RTP/RTCP transport subsystem, as seen from the RTSP engine.
pub trait TransportBridge: Send + Sync {
    /// Whether the media transport is currently running.
    fn is_active(&self) -> bool;

    /// Start (or restart) the media transport.
    fn activate(&self);

    /// Return a clone of an existing socket already connected to `remote`,
    /// if the transport holds one. Connect adopts it instead of opening a
    /// second connection to the same endpoint.
    fn adopt_socket(&self, remote: SocketAddr) -> Option<TcpStream>;

    /// Accept bytes the engine drained but does not own.
    fn handoff(&self, handoff: InterleavedHandoff);
}

/// Single-message mailbox from the transport layer to a waiting transaction.
///
/// Holds at most one response; a second delivery before the waiter wakes
/// replaces the first (responses on one CSeq stream are ordered, so the
/// newer one is the one the waiter asked for).
#[derive(Default)]
pub struct DeliverySlot {
    slot: Mutex<Option<RtspMessage>>,
    cond: Condvar,
}

impl DeliverySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Post a response and wake the waiting transaction.
    pub fn deliver(&self, message: RtspMessage) {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            tracing::debug!("replacing undelivered response in slot");
        }
        *slot = Some(message);
        self.cond.notify_all();
    }

    /// Take the response if one is present, without waiting.
    pub fn take(&self) -> Option<RtspMessage> {
        self.slot.lock().take()
    }

    /// Wait up to `timeout` for a response, then take it if present.
    pub fn wait_take(&self, timeout: Duration) -> Option<RtspMessage> {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            let _ = self.cond.wait_for(&mut slot, timeout);
        }
        slot.take()
    }

    /// Wake any waiter without delivering (used on disposal).
    pub fn notify(&self) {
        self.cond.notify_all();
    }
}
