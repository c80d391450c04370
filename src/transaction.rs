//! The transaction engine: one logical send → correlated response.
//!
//! [`ClientSession::send_message`] drives an explicit phase machine:
//!
//! ```text
//! Prepare -> Connect -> Send -> Receive <-> Wait -> Handle -> Done
//!                         ^_______________________|   (resend on 505 /
//!                                                      retransmit on UDP)
//! ```
//!
//! One transaction may be in flight per session; the gate serializes
//! callers. Waits are deadline-based socket read timeouts that double each
//! time the elapsed wait overruns them, bounded by half the session
//! timeout. Transient socket errors reconnect and resend when configured;
//! anything else is charged against the attempt ceiling.
//!
//! On a shared (interleaved) socket the engine never reads — the transport
//! layer owns the socket and posts any correlated response through the
//! session's delivery slot instead.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::auth::{AuthScheme, basic_authorization};
use crate::connection::{Connection, FALLBACK_TIMEOUT, TransportKind};
use crate::error::{Result, RtspClientError};
use crate::protocol::RtspMessage;
use crate::protocol::message::{MessageKind, status};
use crate::session::ClientSession;
use crate::transport::InterleavedHandoff;

/// Slice used while blocked on the gate, so disposal is noticed promptly.
const GATE_POLL: Duration = Duration::from_millis(100);

/// Upper bound on one blocking read/wait. Escalated timeouts span several
/// slices; the escalation schedule itself tracks elapsed wall time, so
/// slicing only bounds how late a disposal is noticed.
const WAIT_SLICE: Duration = Duration::from_millis(500);

/// Binary mutex bounding one in-flight transaction per session.
///
/// Not a fair queue: a blocked caller may be overtaken indefinitely under
/// sustained contention. Re-entrant for the owning thread only, which lets
/// an authentication retry continue the transaction it interrupted.
pub(crate) struct TransactionGate {
    owner: Mutex<Option<ThreadId>>,
    cond: Condvar,
}

impl TransactionGate {
    pub(crate) fn new() -> Self {
        TransactionGate {
            owner: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    /// Block until the gate is free, then take it. Returns `false` when the
    /// calling thread already holds it (re-entrant continuation — the outer
    /// call keeps ownership and releases).
    pub(crate) fn acquire(&self, disposed: &AtomicBool) -> Result<bool> {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        loop {
            match *owner {
                None => {
                    *owner = Some(me);
                    return Ok(true);
                }
                Some(holder) if holder == me => return Ok(false),
                Some(_) => {
                    if disposed.load(Ordering::SeqCst) {
                        return Err(RtspClientError::Disposed);
                    }
                    let _ = self.cond.wait_for(&mut owner, GATE_POLL);
                }
            }
        }
    }

    pub(crate) fn release(&self) {
        *self.owner.lock() = None;
        self.cond.notify_all();
    }

    pub(crate) fn wake_all(&self) {
        self.cond.notify_all();
    }
}

/// Escalating wait state for one transaction.
///
/// Timeouts double whenever the elapsed wait overruns the current read
/// timeout; the schedule ends at half the session timeout.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BackoffState {
    pub attempt: u32,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub ceiling: Duration,
}

impl BackoffState {
    pub(crate) fn new(
        read_timeout: Duration,
        write_timeout: Duration,
        session_timeout: Duration,
    ) -> Self {
        BackoffState {
            attempt: 0,
            read_timeout,
            write_timeout,
            ceiling: session_timeout / 2,
        }
    }

    /// Double both timeouts. `false` once the doubled read timeout would
    /// pass the ceiling — the wait is abandoned, not stretched further.
    pub(crate) fn escalate(&mut self) -> bool {
        let next = self.read_timeout.saturating_mul(2);
        if next > self.ceiling {
            return false;
        }
        self.attempt += 1;
        self.read_timeout = next;
        self.write_timeout = self.write_timeout.saturating_mul(2).min(self.ceiling);
        true
    }
}

/// Phases of one transaction. `Handle` carries the message that arrived.
enum Phase {
    Send,
    Receive,
    Wait,
    Handle(RtspMessage),
    Done,
}

/// How a transaction ended, before authentication is resolved.
enum Outcome {
    Finished(Option<RtspMessage>),
    /// 401 — the negotiator takes over with the original request.
    Challenge {
        request: RtspMessage,
        response: RtspMessage,
    },
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
    )
}

fn is_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

impl ClientSession {
    /// Send a request and wait for its correlated response.
    pub fn send_request(&self, request: RtspMessage) -> Result<Option<RtspMessage>> {
        self.send_message(Some(request), true, true)
    }

    /// One logical transaction: prepare, connect, send, wait, handle.
    ///
    /// `message = None` only waits (e.g. for a response the transport layer
    /// will deliver). With `expect_response = false` the call returns right
    /// after the send completes.
    ///
    /// Returns `Ok(None)` when no connection could be established or the
    /// wait was abandoned; a transport error is raised only if no message
    /// was ever received on this session. A returned message may be
    /// unrelated to `message` when it arrived through the shared-socket
    /// path — callers inspect CSeq and status.
    pub fn send_message(
        &self,
        message: Option<RtspMessage>,
        use_protocol_version: bool,
        expect_response: bool,
    ) -> Result<Option<RtspMessage>> {
        if self.is_disposed() {
            return Err(RtspClientError::Disposed);
        }

        let mut message = message;
        if let Some(msg) = message.as_mut() {
            self.prepare_message(msg, use_protocol_version);
        }

        {
            let mut conn = self.conn.lock();
            if !conn.is_connected() {
                if let Err(e) = self.connect_locked(&mut conn, false) {
                    tracing::warn!(error = %e, remote = %self.config.remote_addr, "connect failed; dropping send");
                    return Ok(None);
                }
            }
            if !conn.is_connected() {
                return Ok(None);
            }
        }

        let acquired = if expect_response {
            self.gate.acquire(&self.disposed)?
        } else {
            false
        };

        let mut wire = message.as_ref().map(|m| self.serialize_wire(m));
        let outcome = {
            let mut conn = self.conn.lock();
            self.run_transaction(
                &mut conn,
                &mut message,
                &mut wire,
                use_protocol_version,
                expect_response,
            )
        };

        let result = match outcome {
            Ok(Outcome::Finished(response)) => Ok(response),
            Ok(Outcome::Challenge { request, response }) => {
                self.authenticate(Some(request), response, false)
            }
            Err(e) => Err(e),
        };

        if acquired {
            self.gate.release();
        }
        result
    }

    /// Phase 1: fill in the headers the session owns. CSeq is assigned only
    /// when absent, so retransmissions keep their original value.
    fn prepare_message(&self, message: &mut RtspMessage, use_protocol_version: bool) {
        {
            let state = self.state.lock();
            if use_protocol_version && message.version != state.protocol_version {
                message.version = state.protocol_version.clone();
            }
            for (name, value) in &state.additional_headers {
                if !message.contains_header(name) {
                    message.set_header(name, value);
                }
            }
            if !state.session_id.is_empty() && !message.contains_header("Session") {
                message.set_header("Session", &state.session_id);
            }
        }

        if message.cseq().is_none() {
            message.set_cseq(self.next_cseq());
        }

        if let Some(encoding) = &self.config.content_encoding {
            if !encoding.eq_ignore_ascii_case("identity")
                && !message.contains_header("Content-Encoding")
            {
                message.set_header("Content-Encoding", encoding);
            }
        }
        if self.config.send_date && !message.contains_header("Date") {
            let date = chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT");
            message.set_header("Date", &date.to_string());
        }
        if let Some(agent) = &self.config.user_agent {
            if !message.contains_header("User-Agent") {
                message.set_header("User-Agent", agent);
            }
        }
        if self.config.timestamp_requests && !message.contains_header("Timestamp") {
            message.set_header("Timestamp", &self.timestamp_value());
        }

        if !message.contains_header("Authorization") {
            let auth = self.auth.lock();
            if let Some(cached) = &auth.cached_authorization {
                message.set_header("Authorization", cached);
            } else if let (AuthScheme::Basic, Some(credential)) =
                (self.config.auth_scheme, self.config.credential.as_ref())
            {
                message.set_header("Authorization", &basic_authorization(credential));
            }
            // Digest waits for the server's challenge parameters.
        }
    }

    fn run_transaction(
        &self,
        conn: &mut Connection,
        message: &mut Option<RtspMessage>,
        wire: &mut Option<Vec<u8>>,
        use_protocol_version: bool,
        expect_response: bool,
    ) -> Result<Outcome> {
        let mut backoff = BackoffState::new(
            conn.read_timeout.unwrap_or(FALLBACK_TIMEOUT),
            conn.write_timeout.unwrap_or(FALLBACK_TIMEOUT),
            self.state.lock().timeout,
        );
        let mut attempts = self.config.max_attempts;
        let mut resent_version = false;
        let mut received: Option<RtspMessage> = None;
        let started = Instant::now();

        let mut phase = if wire.is_some() { Phase::Send } else { Phase::Wait };

        loop {
            if self.is_disposed() {
                tracing::debug!("session disposed mid-transaction");
                return Ok(Outcome::Finished(received.or_else(|| self.delivery.take())));
            }

            match phase {
                Phase::Send => {
                    // Consume bytes already queued so a response racing our
                    // send is not lost mid-write. A response correlated to
                    // this transaction short-circuits the send.
                    if !conn.shared {
                        if let Some(early) = self.try_drain(conn) {
                            let ours = early.kind == MessageKind::Response
                                && early.cseq().is_some()
                                && early.cseq() == message.as_ref().and_then(|m| m.cseq());
                            if ours {
                                phase = Phase::Handle(early);
                                continue;
                            }
                            self.handle_pushed(early);
                        }
                    }
                    let Some(bytes) = wire.as_deref() else {
                        phase = Phase::Wait;
                        continue;
                    };

                    match self.send_wire(conn, bytes, &mut attempts, backoff.write_timeout) {
                        Ok(()) => {
                            if let Some(msg) = message.as_mut() {
                                msg.mark_transferred();
                                self.events.lock().fire_requested(msg);
                            }
                            self.messages_sent.fetch_add(1, Ordering::SeqCst);
                            self.bytes_sent.fetch_add(bytes.len() as u64, Ordering::SeqCst);
                            tracing::debug!(
                                cseq = ?message.as_ref().and_then(|m| m.cseq()),
                                len = bytes.len(),
                                "request sent"
                            );
                            phase = if !expect_response {
                                Phase::Done
                            } else if conn.shared {
                                Phase::Wait
                            } else {
                                Phase::Receive
                            };
                        }
                        Err(e) if is_transient(&e) => {
                            if self.try_recover(conn, message)? {
                                phase = Phase::Send;
                            } else {
                                return self.finish_fatal(e, received);
                            }
                        }
                        Err(e) => {
                            attempts = attempts.saturating_sub(1);
                            tracing::warn!(error = %e, attempts_left = attempts, "send failed");
                            if attempts == 0 {
                                return self.finish_fatal(e, received);
                            }
                            phase = Phase::Send;
                        }
                    }
                }

                Phase::Receive => {
                    if conn.shared {
                        phase = Phase::Wait;
                        continue;
                    }
                    // A prior chunk may have completed more than one message.
                    if let Some(buffered) = self.assembler.lock().feed(&[]) {
                        phase = Phase::Handle(buffered);
                        continue;
                    }
                    let Some(socket) = conn.socket.as_ref() else {
                        if self.try_recover(conn, message)? {
                            phase = if wire.is_some() { Phase::Send } else { Phase::Wait };
                            continue;
                        }
                        return self.finish_fatal(
                            io::Error::new(io::ErrorKind::NotConnected, "socket lost"),
                            received,
                        );
                    };
                    let _ = socket.set_read_timeout(Some(backoff.read_timeout.min(WAIT_SLICE)));
                    let mut buf = [0u8; 8192];
                    match socket.recv(&mut buf) {
                        Ok(0) => {
                            tracing::debug!("server closed the connection");
                            if self.try_recover(conn, message)? {
                                phase = if wire.is_some() { Phase::Send } else { Phase::Wait };
                            } else {
                                return self.finish_fatal(
                                    io::Error::new(
                                        io::ErrorKind::ConnectionReset,
                                        "connection closed by server",
                                    ),
                                    received,
                                );
                            }
                        }
                        Ok(n) => {
                            phase = match self.ingest_bytes(&buf[..n]) {
                                Some(inbound) => Phase::Handle(inbound),
                                None => Phase::Wait,
                            };
                        }
                        Err(e) if is_timeout(&e) => phase = Phase::Wait,
                        Err(e) if is_transient(&e) => {
                            if self.try_recover(conn, message)? {
                                phase = if wire.is_some() { Phase::Send } else { Phase::Wait };
                            } else {
                                return self.finish_fatal(e, received);
                            }
                        }
                        Err(e) => {
                            attempts = attempts.saturating_sub(1);
                            tracing::warn!(error = %e, attempts_left = attempts, "receive failed");
                            if attempts == 0 {
                                return self.finish_fatal(e, received);
                            }
                            phase = Phase::Wait;
                        }
                    }
                }

                Phase::Wait => {
                    if attempts == 0 {
                        return self.finish_exhausted(received);
                    }
                    let elapsed = started.elapsed();
                    if elapsed >= backoff.read_timeout {
                        if !backoff.escalate() {
                            tracing::warn!(
                                elapsed_ms = elapsed.as_millis() as u64,
                                ceiling_ms = backoff.ceiling.as_millis() as u64,
                                "backoff ceiling reached; abandoning wait"
                            );
                            return Ok(Outcome::Finished(
                                received.or_else(|| self.delivery.take()),
                            ));
                        }
                        tracing::debug!(
                            attempt = backoff.attempt,
                            read_timeout_ms = backoff.read_timeout.as_millis() as u64,
                            "wait overran; timeouts doubled"
                        );
                        // Connectionless transport with the request still
                        // unacknowledged: retransmit the identical bytes
                        // instead of waiting longer.
                        if self.config.transport.is_connectionless() && wire.is_some() {
                            if let Some(msg) = message.as_mut() {
                                msg.clear_transferred();
                                if self.config.timestamp_requests {
                                    msg.set_header("Timestamp", &self.timestamp_value());
                                    *wire = Some(self.serialize_wire(msg));
                                }
                            }
                            attempts = attempts.saturating_sub(1);
                            tracing::debug!(attempts_left = attempts, "retransmitting over UDP");
                            phase = Phase::Send;
                            continue;
                        }
                    }
                    if conn.shared {
                        phase = match self.delivery.wait_take(backoff.read_timeout.min(WAIT_SLICE)) {
                            Some(inbound) => Phase::Handle(inbound),
                            None => Phase::Wait,
                        };
                    } else {
                        phase = Phase::Receive;
                    }
                }

                Phase::Handle(inbound) => {
                    self.messages_received.fetch_add(1, Ordering::SeqCst);
                    match inbound.kind {
                        MessageKind::Invalid => {
                            tracing::warn!("discarding invalid message");
                            phase = Phase::Wait;
                        }
                        MessageKind::Request => {
                            tracing::debug!(
                                method = %inbound.method,
                                cseq = ?inbound.cseq(),
                                "server pushed a request"
                            );
                            if let Some(cseq) = inbound.cseq() {
                                self.state.lock().remote_cseq = Some(cseq);
                            }
                            let handler = self.request_handler.lock();
                            if let Some(handler) = handler.as_ref() {
                                handler(&inbound);
                            }
                            drop(handler);
                            self.state.lock().last_inbound_request = Some(inbound);
                            phase = if expect_response { Phase::Wait } else { Phase::Done };
                        }
                        MessageKind::Response => {
                            let expected_version = self.state.lock().protocol_version.clone();
                            if inbound.version != expected_version {
                                tracing::warn!(
                                    got = %inbound.version,
                                    expected = %expected_version,
                                    "response protocol version mismatch"
                                );
                            }

                            let sent_cseq = message.as_ref().and_then(|m| m.cseq());
                            let got_cseq = inbound.cseq();
                            if let (Some(sent), Some(got)) = (sent_cseq, got_cseq) {
                                if sent != got {
                                    tracing::warn!(sent, got, "response sequence mismatch");
                                    if conn.shared {
                                        // Stale interleaved delivery; keep waiting.
                                        phase = Phase::Wait;
                                    } else {
                                        attempts = attempts.saturating_sub(1);
                                        if attempts == 0 {
                                            return self.finish_exhausted(received);
                                        }
                                        phase = Phase::Receive;
                                    }
                                    continue;
                                }
                            }
                            if let Some(got) = got_cseq {
                                self.state.lock().remote_cseq = Some(got);
                            }

                            if let Some(at) = message.as_ref().and_then(|m| m.transferred()) {
                                self.state.lock().round_trip = Some(at.elapsed());
                            }

                            match inbound.status_code {
                                status::OK => {
                                    if let Some(m) = message.as_ref() {
                                        if !m.method.is_empty() {
                                            self.state
                                                .lock()
                                                .supported_methods
                                                .insert(m.method.clone());
                                        }
                                    }
                                }
                                status::NOT_IMPLEMENTED => {
                                    if let Some(m) = message.as_ref() {
                                        tracing::debug!(method = %m.method, "server does not implement method");
                                        self.state.lock().supported_methods.remove(&m.method);
                                    }
                                }
                                status::UNAUTHORIZED => {
                                    if let Some(request) = message.take() {
                                        tracing::debug!("authentication challenge");
                                        return Ok(Outcome::Challenge {
                                            request,
                                            response: inbound,
                                        });
                                    }
                                }
                                status::VERSION_NOT_SUPPORTED => {
                                    if use_protocol_version && !resent_version {
                                        if let Some(msg) = message.as_mut() {
                                            resent_version = true;
                                            tracing::warn!(
                                                version = %inbound.version,
                                                "adopting server protocol version and resending"
                                            );
                                            self.state.lock().protocol_version =
                                                inbound.version.clone();
                                            msg.version = inbound.version.clone();
                                            msg.clear_transferred();
                                            *wire = Some(self.serialize_wire(msg));
                                            phase = Phase::Send;
                                            continue;
                                        }
                                    }
                                }
                                _ => {}
                            }

                            if self.config.echo_extension_headers {
                                let mut state = self.state.lock();
                                for (name, value) in &inbound.headers {
                                    if name.len() >= 2
                                        && name.as_bytes()[..2].eq_ignore_ascii_case(b"x-")
                                    {
                                        match state
                                            .additional_headers
                                            .iter_mut()
                                            .find(|(k, _)| k.eq_ignore_ascii_case(name))
                                        {
                                            Some(slot) => slot.1 = value.clone(),
                                            None => state
                                                .additional_headers
                                                .push((name.clone(), value.clone())),
                                        }
                                    }
                                }
                            }

                            let was_teardown = message
                                .as_ref()
                                .is_some_and(|m| m.method.eq_ignore_ascii_case("TEARDOWN"));
                            {
                                let mut state = self.state.lock();
                                if !was_teardown {
                                    state.update_from_response(
                                        &inbound,
                                        self.config.calculate_server_delay,
                                    );
                                }
                                state.last_request = message.clone();
                                state.last_response = Some(inbound.clone());
                            }

                            self.events.lock().fire_received(message.as_ref(), &inbound);
                            received = Some(inbound);
                            phase = Phase::Done;
                        }
                    }
                }

                Phase::Done => {
                    return Ok(Outcome::Finished(received));
                }
            }
        }
    }

    /// Blocking write of the whole wire image; partial sends retry against
    /// the shared attempt counter.
    fn send_wire(
        &self,
        conn: &Connection,
        bytes: &[u8],
        attempts: &mut u32,
        write_timeout: Duration,
    ) -> io::Result<()> {
        let socket = conn
            .socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no socket"))?;
        socket.set_write_timeout(Some(write_timeout))?;

        let mut sent = 0;
        while sent < bytes.len() {
            match socket.send(&bytes[sent..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::ConnectionReset,
                        "socket closed during send",
                    ));
                }
                Ok(n) => sent += n,
                Err(e) if is_timeout(&e) => {
                    *attempts = attempts.saturating_sub(1);
                    if *attempts == 0 {
                        return Err(e);
                    }
                    tracing::trace!(sent, total = bytes.len(), "partial send; retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Consume any bytes already queued on a non-shared socket.
    fn try_drain(&self, conn: &Connection) -> Option<RtspMessage> {
        let socket = conn.socket.as_ref()?;
        socket.set_read_timeout(Some(conn.poll_interval)).ok()?;
        let mut buf = [0u8; 8192];
        match socket.recv(&mut buf) {
            Ok(n) if n > 0 => self.ingest_bytes(&buf[..n]),
            _ => None,
        }
    }

    /// Route a chunk of inbound bytes: interleaved binary data goes to the
    /// transport bridge, RTSP text accumulates toward a message.
    fn ingest_bytes(&self, chunk: &[u8]) -> Option<RtspMessage> {
        if chunk.is_empty() {
            return None;
        }
        self.bytes_received
            .fetch_add(chunk.len() as u64, Ordering::SeqCst);

        let mut assembler = self.assembler.lock();
        if assembler.is_empty() && !chunk[0].is_ascii_alphanumeric() {
            drop(assembler);
            match &self.bridge {
                Some(bridge) => {
                    tracing::trace!(len = chunk.len(), "handing off interleaved data");
                    bridge.handoff(InterleavedHandoff::new(chunk.to_vec()));
                }
                None => {
                    tracing::warn!(len = chunk.len(), "dropping non-RTSP bytes (no transport bridge)")
                }
            }
            return None;
        }
        assembler.feed(chunk)
    }

    /// A message that arrived outside the request/response exchange.
    fn handle_pushed(&self, message: RtspMessage) {
        self.messages_received.fetch_add(1, Ordering::SeqCst);
        match message.kind {
            MessageKind::Request => {
                tracing::debug!(method = %message.method, "server pushed a request");
                let handler = self.request_handler.lock();
                if let Some(handler) = handler.as_ref() {
                    handler(&message);
                }
                drop(handler);
                self.state.lock().last_inbound_request = Some(message);
            }
            MessageKind::Response => {
                tracing::debug!(status = message.status_code, "out-of-band response");
                self.state.lock().last_inbound_response = Some(message);
            }
            MessageKind::Invalid => tracing::warn!("discarding invalid message"),
        }
    }

    /// Reconnect-and-resend path for transient socket errors.
    fn try_recover(
        &self,
        conn: &mut Connection,
        message: &mut Option<RtspMessage>,
    ) -> Result<bool> {
        if !self.config.automatically_reconnect || self.is_disposed() {
            return Ok(false);
        }
        tracing::info!(remote = %self.config.remote_addr, "transient socket error; reconnecting");
        if let Some(msg) = message.as_mut() {
            msg.clear_transferred();
        }
        self.assembler.lock().clear();
        self.reconnect_locked(conn, true)?;
        Ok(true)
    }

    fn finish_fatal(&self, error: io::Error, received: Option<RtspMessage>) -> Result<Outcome> {
        if received.is_none() && self.messages_received() == 0 {
            tracing::warn!(error = %error, "transaction failed with nothing ever received");
            Err(error.into())
        } else {
            tracing::warn!(error = %error, "transaction failed; returning last message");
            Ok(Outcome::Finished(
                received.or_else(|| self.state.lock().last_response.clone()),
            ))
        }
    }

    fn finish_exhausted(&self, received: Option<RtspMessage>) -> Result<Outcome> {
        if received.is_none() && self.messages_received() == 0 {
            Err(RtspClientError::AttemptsExhausted {
                attempts: self.config.max_attempts,
            })
        } else {
            tracing::warn!("attempts exhausted; returning last message");
            Ok(Outcome::Finished(
                received.or_else(|| self.state.lock().last_response.clone()),
            ))
        }
    }

    fn serialize_wire(&self, message: &RtspMessage) -> Vec<u8> {
        match self.config.transport {
            TransportKind::HttpTunnel => message.serialize_tunneled(),
            _ => message.serialize(),
        }
    }

    /// Value for the `Timestamp` request header: seconds since the session
    /// began, millisecond precision.
    fn timestamp_value(&self) -> String {
        format!("{:.3}", self.epoch.elapsed().as_secs_f64())
    }
}
