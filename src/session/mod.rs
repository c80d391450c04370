//! RTSP client session management (RFC 2326 §3, §12.37).
//!
//! A [`ClientSession`] is one logical RTSP dialogue with a server. It owns
//! the socket lifecycle, the strictly increasing CSeq stream, the
//! server-assigned session id and timeout, and the single-transaction gate.
//! Configuration is split from running state: [`SessionConfig`] is an
//! immutable value fixed at construction, everything the dialogue mutates
//! lives behind the session's own locks.
//!
//! ## Dialogue lifecycle (RFC 2326 §A)
//!
//! ```text
//! connect        -> socket established, timeouts calibrated from RTT
//! OPTIONS/...    -> transactions through send_request
//! SETUP 200      -> Session header adopted (id + timeout)
//! TEARDOWN       -> session id retired (state update skipped)
//! dispose        -> in-flight waits exit, no further transactions
//! ```

pub mod url;

use std::collections::HashSet;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::auth::{AuthScheme, AuthState, Credential};
use crate::connection::{Connection, TransportKind};
use crate::error::Result;
use crate::events::{EventNotifier, EventResult};
use crate::protocol::message::CLIENT_AGENT;
use crate::protocol::{MessageAssembler, RtspMessage};
use crate::transaction::TransactionGate;
use crate::transport::{DeliverySlot, TransportBridge};

pub use url::{RtspUrl, parse_rtsp_url};

/// Default session timeout in seconds (RFC 2326 §12.37).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

/// Default ceiling on send/receive attempts per transaction.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default multiplier applied to measured connection time when seeding
/// read/write timeouts.
pub const DEFAULT_CONNECTION_MULTIPLIER: u32 = 2;

/// Callback for requests the *server* pushes to the client (e.g. ANNOUNCE).
pub type RequestHandler = Box<dyn Fn(&RtspMessage) + Send + Sync>;

/// Hook invoked once per newly created socket, before connect, for
/// platform tuning.
pub type SocketHook = Arc<dyn Fn(&socket2::Socket) + Send + Sync>;

/// Immutable per-dialogue configuration.
///
/// Built once and handed to [`ClientSession::new`]; everything that changes
/// during the dialogue lives in the session's mutable state instead.
#[derive(Clone)]
pub struct SessionConfig {
    /// Server endpoint the session dials.
    pub remote_addr: SocketAddr,
    /// Base request URI (e.g. `rtsp://host:554/stream`).
    pub control_uri: String,
    /// Wire transport for the RTSP control channel.
    pub transport: TransportKind,
    /// Protocol version offered in requests.
    pub protocol_version: String,
    /// `User-Agent` value; `None` suppresses the header.
    pub user_agent: Option<String>,
    /// Credentials for Basic/Digest challenges.
    pub credential: Option<Credential>,
    /// Scheme attached proactively; Digest is always computed lazily on
    /// challenge.
    pub auth_scheme: AuthScheme,
    /// Reconnect and resend on transient socket errors.
    pub automatically_reconnect: bool,
    /// Stamp outgoing requests with a `Timestamp` header.
    pub timestamp_requests: bool,
    /// Parse `Timestamp: ...;delay=` from responses.
    pub calculate_server_delay: bool,
    /// Copy `X-*` response headers into the headers sent with every
    /// subsequent request.
    pub echo_extension_headers: bool,
    /// Suppress socket shutdown on disconnect (another owner keeps a clone).
    pub leave_open: bool,
    /// Attach a `Date` header to requests.
    pub send_date: bool,
    /// Send/receive attempt ceiling per transaction.
    pub max_attempts: u32,
    /// Read/write timeout = connection time × this, when not set explicitly.
    pub connection_multiplier: u32,
    /// Session timeout assumed before the server names one.
    pub default_session_timeout: Duration,
    /// Body encoding advertised via `Content-Encoding` when not `identity`.
    pub content_encoding: Option<String>,
    /// Platform tuning hook, run against each new socket before connect.
    pub socket_hook: Option<SocketHook>,
}

impl SessionConfig {
    pub fn new(remote_addr: SocketAddr, control_uri: &str) -> Self {
        SessionConfig {
            remote_addr,
            control_uri: control_uri.to_string(),
            transport: TransportKind::Tcp,
            protocol_version: crate::protocol::message::DEFAULT_VERSION.to_string(),
            user_agent: Some(CLIENT_AGENT.to_string()),
            credential: None,
            auth_scheme: AuthScheme::None,
            automatically_reconnect: true,
            timestamp_requests: false,
            calculate_server_delay: false,
            echo_extension_headers: false,
            leave_open: false,
            send_date: false,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            connection_multiplier: DEFAULT_CONNECTION_MULTIPLIER,
            default_session_timeout: Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECS),
            content_encoding: None,
            socket_hook: None,
        }
    }

    /// Build a config from an `rtsp://[user:pass@]host[:port]/path` URL,
    /// resolving the host and wiring embedded credentials for Basic auth.
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed = parse_rtsp_url(url)?;
        let remote_addr = (parsed.host.as_str(), parsed.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no address for {}", parsed.host),
                )
            })?;

        let mut config = SessionConfig::new(remote_addr, &parsed.control_uri());
        if let Some(credential) = parsed.credential {
            config.credential = Some(credential);
            config.auth_scheme = AuthScheme::Basic;
        }
        Ok(config)
    }

    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_credential(mut self, credential: Credential, scheme: AuthScheme) -> Self {
        self.credential = Some(credential);
        self.auth_scheme = scheme;
        self
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.default_session_timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_socket_hook(mut self, hook: SocketHook) -> Self {
        self.socket_hook = Some(hook);
        self
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("remote_addr", &self.remote_addr)
            .field("control_uri", &self.control_uri)
            .field("transport", &self.transport)
            .field("auth_scheme", &self.auth_scheme)
            .field("automatically_reconnect", &self.automatically_reconnect)
            .field("max_attempts", &self.max_attempts)
            .field("socket_hook", &self.socket_hook.is_some())
            .finish_non_exhaustive()
    }
}

/// Mutable dialogue state, updated as responses arrive.
#[derive(Debug)]
pub struct SessionState {
    /// Server-assigned session identifier; empty until SETUP succeeds.
    pub session_id: String,
    /// Session timeout (RFC 2326 §12.37); the server may name one in the
    /// Session header, otherwise 60 s is assumed.
    pub timeout: Duration,
    /// Version requests are sent with; adopted from the server on a 505.
    pub protocol_version: String,
    /// Round-trip time of the most recent matched request/response pair.
    pub round_trip: Option<Duration>,
    /// Server-reported processing delay, from the Timestamp header.
    pub last_server_delay: Option<Duration>,
    /// CSeq of the most recent inbound message.
    pub remote_cseq: Option<u32>,
    /// Methods the server accepted (200) and rejected (501).
    pub supported_methods: HashSet<String>,
    /// Headers merged into every outgoing request, including echoed `X-*`.
    pub additional_headers: Vec<(String, String)>,
    /// Most recent sent request / matched response pair.
    pub last_request: Option<RtspMessage>,
    pub last_response: Option<RtspMessage>,
    /// Most recent server-pushed request and out-of-band response.
    pub last_inbound_request: Option<RtspMessage>,
    pub last_inbound_response: Option<RtspMessage>,
}

impl SessionState {
    fn new(protocol_version: &str, timeout: Duration) -> Self {
        SessionState {
            session_id: String::new(),
            timeout,
            protocol_version: protocol_version.to_string(),
            round_trip: None,
            last_server_delay: None,
            remote_cseq: None,
            supported_methods: HashSet::new(),
            additional_headers: Vec::new(),
            last_request: None,
            last_response: None,
            last_inbound_request: None,
            last_inbound_response: None,
        }
    }

    /// Fold a matched response into the dialogue state: Session id/timeout
    /// (RFC 2326 §12.37) and, when enabled, the server delay from the
    /// Timestamp header.
    pub fn update_from_response(&mut self, response: &RtspMessage, calculate_delay: bool) {
        if let Some(value) = response.get_header("Session") {
            let (id, timeout) = parse_session_header(value);
            if !id.is_empty() && id != self.session_id {
                tracing::debug!(old = %self.session_id, new = %id, "adopting session id");
                self.session_id = id;
            }
            self.timeout = timeout;
        }

        if calculate_delay {
            if let Some(value) = response.get_header("Timestamp") {
                if let Some(delay) = parse_timestamp_delay(value) {
                    self.last_server_delay = Some(delay);
                }
            }
        }
    }
}

/// Parse `Session: <id>[;timeout=<seconds>]` (RFC 2326 §12.37).
///
/// A missing or non-positive timeout yields the 60 s default.
pub fn parse_session_header(value: &str) -> (String, Duration) {
    let mut parts = value.split(';');
    let id = parts.next().unwrap_or("").trim().to_string();

    let mut timeout = Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECS);
    for part in parts {
        if let Some(seconds) = part.trim().strip_prefix("timeout=") {
            match seconds.trim().parse::<i64>() {
                Ok(s) if s > 0 => timeout = Duration::from_secs(s as u64),
                Ok(_) | Err(_) => {
                    tracing::trace!(value = seconds, "non-positive or unparsable timeout; using default")
                }
            }
        }
    }
    (id, timeout)
}

/// Parse the delay out of `Timestamp: <echoed>[;delay=<seconds>]`, or the
/// space-separated two-token variant some servers emit.
pub fn parse_timestamp_delay(value: &str) -> Option<Duration> {
    for part in value.split(';').skip(1) {
        if let Some(seconds) = part.trim().strip_prefix("delay=") {
            return seconds.trim().parse::<f64>().ok().and_then(duration_from_secs);
        }
    }
    value
        .split_whitespace()
        .nth(1)
        .and_then(|token| token.parse::<f64>().ok())
        .and_then(duration_from_secs)
}

fn duration_from_secs(seconds: f64) -> Option<Duration> {
    (seconds.is_finite() && seconds >= 0.0).then(|| Duration::from_secs_f64(seconds))
}

/// One RTSP dialogue with a server.
///
/// Cheap to share behind an `Arc`; all methods take `&self`. Concurrent
/// [`send_request`](Self::send_request) calls serialize on the transaction
/// gate — the second caller blocks until the first completes.
pub struct ClientSession {
    pub(crate) config: SessionConfig,
    pub(crate) conn: Mutex<Connection>,
    pub(crate) state: Mutex<SessionState>,
    pub(crate) auth: Mutex<AuthState>,
    pub(crate) events: Mutex<EventNotifier>,
    pub(crate) bridge: Option<Arc<dyn TransportBridge>>,
    pub(crate) delivery: DeliverySlot,
    pub(crate) gate: TransactionGate,
    pub(crate) assembler: Mutex<MessageAssembler>,
    pub(crate) request_handler: Mutex<Option<RequestHandler>>,
    pub(crate) cseq: AtomicU32,
    pub(crate) disposed: AtomicBool,
    pub(crate) messages_sent: AtomicU64,
    pub(crate) bytes_sent: AtomicU64,
    pub(crate) messages_received: AtomicU64,
    pub(crate) bytes_received: AtomicU64,
    pub(crate) epoch: Instant,
}

impl ClientSession {
    pub fn new(config: SessionConfig) -> Self {
        Self::build(config, None)
    }

    /// A session whose control socket may be shared with the RTP transport.
    pub fn with_bridge(config: SessionConfig, bridge: Arc<dyn TransportBridge>) -> Self {
        Self::build(config, Some(bridge))
    }

    fn build(config: SessionConfig, bridge: Option<Arc<dyn TransportBridge>>) -> Self {
        let assembler = match config.transport {
            TransportKind::HttpTunnel => MessageAssembler::new_tunneled(),
            _ => MessageAssembler::new(),
        };
        let state = SessionState::new(&config.protocol_version, config.default_session_timeout);
        ClientSession {
            config,
            conn: Mutex::new(Connection::new()),
            state: Mutex::new(state),
            auth: Mutex::new(AuthState::default()),
            events: Mutex::new(EventNotifier::new()),
            bridge,
            delivery: DeliverySlot::new(),
            gate: TransactionGate::new(),
            assembler: Mutex::new(assembler),
            request_handler: Mutex::new(None),
            cseq: AtomicU32::new(0),
            disposed: AtomicBool::new(false),
            messages_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Next value in the strictly increasing CSeq stream.
    pub(crate) fn next_cseq(&self) -> u32 {
        self.cseq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Server-assigned session identifier; empty until negotiated.
    pub fn session_id(&self) -> String {
        self.state.lock().session_id.clone()
    }

    /// Negotiated (or default) session timeout.
    pub fn session_timeout(&self) -> Duration {
        self.state.lock().timeout
    }

    pub fn round_trip_time(&self) -> Option<Duration> {
        self.state.lock().round_trip
    }

    pub fn last_server_delay(&self) -> Option<Duration> {
        self.state.lock().last_server_delay
    }

    pub fn supported_methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.state.lock().supported_methods.iter().cloned().collect();
        methods.sort();
        methods
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::SeqCst)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::SeqCst)
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::SeqCst)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// End the dialogue: any in-flight wait exits at its next check and
    /// returns what it has; subsequent sends fail fast.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(session_id = %self.session_id(), "session disposed");
        self.gate.wake_all();
        self.delivery.notify();
    }

    /// Register a callback for requests the server pushes to the client.
    pub fn set_request_handler(&self, handler: impl Fn(&RtspMessage) + Send + Sync + 'static) {
        *self.request_handler.lock() = Some(Box::new(handler));
    }

    pub fn on_connected(&self, f: impl Fn() -> EventResult + Send + Sync + 'static) {
        self.events.lock().on_connected(f);
    }

    pub fn on_disconnected(&self, f: impl Fn() -> EventResult + Send + Sync + 'static) {
        self.events.lock().on_disconnected(f);
    }

    pub fn on_requested(&self, f: impl Fn(&RtspMessage) -> EventResult + Send + Sync + 'static) {
        self.events.lock().on_requested(f);
    }

    pub fn on_received(
        &self,
        f: impl Fn(Option<&RtspMessage>, &RtspMessage) -> EventResult + Send + Sync + 'static,
    ) {
        self.events.lock().on_received(f);
    }

    /// Out-of-band response delivery from a sharing transport layer.
    pub fn deliver_response(&self, response: RtspMessage) {
        self.delivery.deliver(response);
    }

    /// OPTIONS against the control URI (RFC 2326 §10.1).
    pub fn options(&self) -> Result<Option<RtspMessage>> {
        self.send_request(RtspMessage::options(&self.config.control_uri))
    }

    /// DESCRIBE against the control URI (RFC 2326 §10.2).
    pub fn describe(&self) -> Result<Option<RtspMessage>> {
        self.send_request(RtspMessage::describe(&self.config.control_uri))
    }

    /// SETUP for one track (RFC 2326 §10.4).
    pub fn setup(&self, track_uri: &str, transport: &str) -> Result<Option<RtspMessage>> {
        self.send_request(RtspMessage::setup(track_uri, transport))
    }

    /// PLAY against the control URI (RFC 2326 §10.5).
    pub fn play(&self) -> Result<Option<RtspMessage>> {
        self.send_request(RtspMessage::play(&self.config.control_uri))
    }

    /// TEARDOWN the dialogue (RFC 2326 §10.7).
    pub fn teardown(&self) -> Result<Option<RtspMessage>> {
        self.send_request(RtspMessage::teardown(&self.config.control_uri))
    }

    /// GET_PARAMETER keepalive (RFC 2326 §10.8). Send one inside every
    /// [`session_timeout`](Self::session_timeout) window to hold the
    /// dialogue open.
    pub fn keepalive(&self) -> Result<Option<RtspMessage>> {
        tracing::trace!(session_id = %self.session_id(), "keepalive");
        self.send_request(RtspMessage::get_parameter(&self.config.control_uri))
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.dispose();
        if !self.config.leave_open {
            self.conn.get_mut().close_socket();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_header_with_timeout() {
        let (id, timeout) = parse_session_header("abc123;timeout=30");
        assert_eq!(id, "abc123");
        assert_eq!(timeout, Duration::from_secs(30));
    }

    #[test]
    fn session_header_without_timeout_defaults() {
        let (id, timeout) = parse_session_header("abc123");
        assert_eq!(id, "abc123");
        assert_eq!(timeout, Duration::from_secs(60));
    }

    #[test]
    fn session_header_zero_timeout_defaults() {
        let (id, timeout) = parse_session_header("abc123;timeout=0");
        assert_eq!(id, "abc123");
        assert_eq!(timeout, Duration::from_secs(60));
    }

    #[test]
    fn session_header_tolerates_whitespace() {
        let (id, timeout) = parse_session_header(" abc123 ; timeout=10 ");
        assert_eq!(id, "abc123");
        assert_eq!(timeout, Duration::from_secs(10));
    }

    #[test]
    fn timestamp_delay_semicolon_form() {
        let delay = parse_timestamp_delay("12345;delay=1.5").unwrap();
        assert_eq!(delay, Duration::from_secs_f64(1.5));
    }

    #[test]
    fn timestamp_delay_space_form() {
        let delay = parse_timestamp_delay("12345 0.25").unwrap();
        assert_eq!(delay, Duration::from_secs_f64(0.25));
    }

    #[test]
    fn timestamp_without_delay() {
        assert!(parse_timestamp_delay("12345").is_none());
    }

    #[test]
    fn state_adopts_new_session_id_only() {
        let mut state = SessionState::new("RTSP/1.0", Duration::from_secs(60));
        let mut response = RtspMessage::response(200, "OK");
        response.set_header("Session", "id1;timeout=10");
        state.update_from_response(&response, false);
        assert_eq!(state.session_id, "id1");
        assert_eq!(state.timeout, Duration::from_secs(10));

        // Same id again: unchanged. New id: adopted.
        let mut response = RtspMessage::response(200, "OK");
        response.set_header("Session", "id2");
        state.update_from_response(&response, false);
        assert_eq!(state.session_id, "id2");
        assert_eq!(state.timeout, Duration::from_secs(60));
    }

    #[test]
    fn state_tracks_server_delay_when_enabled() {
        let mut state = SessionState::new("RTSP/1.0", Duration::from_secs(60));
        let mut response = RtspMessage::response(200, "OK");
        response.set_header("Timestamp", "999;delay=0.031");
        state.update_from_response(&response, true);
        assert_eq!(state.last_server_delay, Some(Duration::from_secs_f64(0.031)));
    }

    #[test]
    fn config_from_url_carries_credentials() {
        let config = SessionConfig::from_url("rtsp://user:pw@127.0.0.1:8554/cam").unwrap();
        assert_eq!(config.control_uri, "rtsp://127.0.0.1:8554/cam");
        assert_eq!(config.auth_scheme, AuthScheme::Basic);
        assert_eq!(config.credential.as_ref().unwrap().username, "user");
        assert_eq!(config.remote_addr.port(), 8554);
    }

    #[test]
    fn cseq_stream_strictly_increasing() {
        let config = SessionConfig::new("127.0.0.1:554".parse().unwrap(), "rtsp://127.0.0.1/s");
        let session = ClientSession::new(config);
        let a = session.next_cseq();
        let b = session.next_cseq();
        let c = session.next_cseq();
        assert!(a < b && b < c);
    }
}
