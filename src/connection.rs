//! Control-channel socket lifecycle: connect, disconnect, reconnect, and
//! the RTT-derived timeout calibration.
//!
//! Sockets are created through `socket2` so the optional configuration hook
//! can tune the raw socket before the blocking connect, and so slow links
//! (connect RTT ≥ 500 ms) can get a best-effort congestion-control tweak.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use socket2::{Domain, SockAddr, Socket, Type};

use crate::error::Result;
use crate::session::{ClientSession, SessionConfig};
use crate::transport::TransportBridge;

/// Wire transport for the RTSP control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Udp,
    /// RTSP-over-HTTP: TCP carrying base64 POST envelopes.
    HttpTunnel,
}

impl TransportKind {
    pub fn is_connectionless(&self) -> bool {
        matches!(self, TransportKind::Udp)
    }
}

/// Read/write timeout used until a connect has been measured.
pub(crate) const FALLBACK_TIMEOUT: Duration = Duration::from_millis(500);

/// Initial socket poll interval; shrunk toward the measured connect time.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Connect RTT at which the congestion-control tweak kicks in.
const SLOW_LINK_THRESHOLD: Duration = Duration::from_millis(500);

/// A connected control-channel socket.
#[derive(Debug)]
pub enum SocketHandle {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

impl SocketHandle {
    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        match self {
            SocketHandle::Tcp(stream) => {
                let mut stream: &TcpStream = stream;
                stream.write(buf)
            }
            SocketHandle::Udp(socket) => socket.send(buf),
        }
    }

    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            SocketHandle::Tcp(stream) => {
                let mut stream: &TcpStream = stream;
                stream.read(buf)
            }
            SocketHandle::Udp(socket) => socket.recv(buf),
        }
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        let timeout = timeout.map(|t| t.max(MIN_TIMEOUT));
        match self {
            SocketHandle::Tcp(stream) => stream.set_read_timeout(timeout),
            SocketHandle::Udp(socket) => socket.set_read_timeout(timeout),
        }
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        let timeout = timeout.map(|t| t.max(MIN_TIMEOUT));
        match self {
            SocketHandle::Tcp(stream) => stream.set_write_timeout(timeout),
            SocketHandle::Udp(socket) => socket.set_write_timeout(timeout),
        }
    }

    pub fn shutdown(&self) -> io::Result<()> {
        match self {
            SocketHandle::Tcp(stream) => stream.shutdown(Shutdown::Both),
            SocketHandle::Udp(_) => Ok(()),
        }
    }

    pub fn try_clone(&self) -> io::Result<SocketHandle> {
        match self {
            SocketHandle::Tcp(stream) => Ok(SocketHandle::Tcp(stream.try_clone()?)),
            SocketHandle::Udp(socket) => Ok(SocketHandle::Udp(socket.try_clone()?)),
        }
    }
}

/// Control-channel connection state.
///
/// Either `socket` holds a connected handle or the connection is down —
/// no partially initialized state is observable. Connect timestamps use
/// `None` as the disconnected sentinel.
#[derive(Debug, Default)]
pub struct Connection {
    pub(crate) socket: Option<SocketHandle>,
    /// Socket adopted from (and still owned by) the RTP transport layer.
    pub(crate) shared: bool,
    pub(crate) begin_connect: Option<Instant>,
    pub(crate) end_connect: Option<Instant>,
    /// Measured connect RTT, the base for timeout calibration.
    pub(crate) connection_time: Option<Duration>,
    pub(crate) read_timeout: Option<Duration>,
    pub(crate) write_timeout: Option<Duration>,
    pub(crate) poll_interval: Duration,
}

impl Connection {
    pub fn new() -> Self {
        Connection {
            poll_interval: DEFAULT_POLL_INTERVAL,
            ..Default::default()
        }
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    /// Establish the control channel. Returns `true` if a (re)connect
    /// actually happened, `false` for the already-connected no-op.
    ///
    /// When the RTP transport is active and already holds a socket to the
    /// same remote endpoint, that socket is adopted (shared) instead of
    /// opening a second connection.
    pub fn connect(
        &mut self,
        config: &SessionConfig,
        bridge: Option<&Arc<dyn TransportBridge>>,
        force: bool,
    ) -> Result<bool> {
        if self.is_connected() && !force {
            return Ok(false);
        }

        if let Some(bridge) = bridge {
            if bridge.is_active() {
                if let Some(stream) = bridge.adopt_socket(config.remote_addr) {
                    self.close(config, true);
                    tracing::debug!(remote = %config.remote_addr, "adopted shared transport socket");
                    let now = Instant::now();
                    self.begin_connect = Some(now);
                    self.end_connect = Some(now);
                    self.socket = Some(SocketHandle::Tcp(stream));
                    self.shared = true;
                    self.apply_timeouts();
                    return Ok(true);
                }
            }
        }

        self.close(config, true);

        let domain = Domain::for_address(config.remote_addr);
        let ty = match config.transport {
            TransportKind::Udp => Type::DGRAM,
            _ => Type::STREAM,
        };
        let socket = Socket::new(domain, ty, None)?;

        if let Some(hook) = &config.socket_hook {
            hook(&socket);
        }

        let begin = Instant::now();
        self.begin_connect = Some(begin);
        if let Err(e) = socket.connect(&SockAddr::from(config.remote_addr)) {
            self.begin_connect = None;
            return Err(e.into());
        }
        let end = Instant::now();
        self.end_connect = Some(end);

        let elapsed = end.duration_since(begin);
        self.connection_time = Some(elapsed);

        // Seed read/write timeouts from the measured RTT unless the caller
        // pinned them already.
        if self.read_timeout.is_none() && self.write_timeout.is_none() {
            let calibrated = (elapsed * config.connection_multiplier).max(MIN_TIMEOUT);
            self.read_timeout = Some(calibrated);
            self.write_timeout = Some(calibrated);
        }
        self.poll_interval = self.poll_interval.min(elapsed).max(MIN_TIMEOUT);

        #[cfg(any(target_os = "android", target_os = "linux"))]
        if config.transport != TransportKind::Udp && elapsed >= SLOW_LINK_THRESHOLD {
            if let Err(e) = socket.set_tcp_congestion(b"westwood") {
                tracing::trace!(error = %e, "congestion control tweak rejected");
            }
        }

        self.socket = Some(match config.transport {
            TransportKind::Udp => SocketHandle::Udp(UdpSocket::from(socket)),
            _ => SocketHandle::Tcp(TcpStream::from(socket)),
        });
        self.shared = false;
        self.apply_timeouts();

        tracing::info!(
            remote = %config.remote_addr,
            transport = ?config.transport,
            connect_time_us = elapsed.as_micros() as u64,
            "connected"
        );
        Ok(true)
    }

    /// Tear the control channel down. Returns `true` if a connection was
    /// actually dropped (callers fire the Disconnected event on `true`).
    pub fn close(&mut self, config: &SessionConfig, force: bool) -> bool {
        if !self.is_connected() && !force {
            return false;
        }
        let was_connected = self.is_connected();

        if let Some(socket) = self.socket.take() {
            // A shared socket still belongs to the transport layer; with
            // leave_open another owner holds a clone. Either way only our
            // handle is released.
            if !self.shared && !config.leave_open {
                let _ = socket.shutdown();
            }
        }
        self.shared = false;
        self.begin_connect = None;
        self.end_connect = None;
        self.connection_time = None;

        if was_connected {
            tracing::info!(remote = %config.remote_addr, "disconnected");
        }
        was_connected
    }

    /// Silent socket release for drop paths; no events, no logging.
    pub(crate) fn close_socket(&mut self) {
        if let Some(socket) = self.socket.take() {
            if !self.shared {
                let _ = socket.shutdown();
            }
        }
    }

    fn apply_timeouts(&self) {
        if let Some(socket) = &self.socket {
            let _ = socket.set_read_timeout(self.read_timeout.or(Some(FALLBACK_TIMEOUT)));
            let _ = socket.set_write_timeout(self.write_timeout.or(Some(FALLBACK_TIMEOUT)));
        }
    }
}

impl ClientSession {
    /// Ensure the control channel is up. No-op when already connected.
    pub fn connect(&self) -> Result<()> {
        let mut conn = self.conn.lock();
        self.connect_locked(&mut conn, false)
    }

    pub(crate) fn connect_locked(&self, conn: &mut Connection, force: bool) -> Result<()> {
        if conn.connect(&self.config, self.bridge.as_ref(), force)? {
            self.events.lock().fire_connected();
        }
        Ok(())
    }

    /// Drop the control channel. Clears the cached Authorization value, so
    /// the next send re-authenticates.
    pub fn disconnect(&self) {
        let mut conn = self.conn.lock();
        self.disconnect_locked(&mut conn, false);
    }

    pub(crate) fn disconnect_locked(&self, conn: &mut Connection, force: bool) {
        self.auth.lock().cached_authorization = None;
        if conn.close(&self.config, force) {
            self.events.lock().fire_disconnected();
        }
    }

    /// Disconnect then connect; reactivates the RTP transport when it was
    /// running before and the reconnect left it down.
    pub fn reconnect(&self) -> Result<()> {
        let mut conn = self.conn.lock();
        self.reconnect_locked(&mut conn, true)
    }

    pub(crate) fn reconnect_locked(
        &self,
        conn: &mut Connection,
        reconnect_transport: bool,
    ) -> Result<()> {
        let was_active = self.bridge.as_ref().is_some_and(|b| b.is_active());
        self.disconnect_locked(conn, true);
        self.connect_locked(conn, true)?;
        if reconnect_transport && was_active {
            if let Some(bridge) = &self.bridge {
                if !bridge.is_active() {
                    tracing::debug!("reactivating media transport after reconnect");
                    bridge.activate();
                }
            }
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.conn.lock().is_connected()
    }

    /// Measured connect RTT of the current connection, if any.
    pub fn connection_time(&self) -> Option<Duration> {
        self.conn.lock().connection_time
    }

    /// A clone of the connected socket handle, for callers that need to
    /// outlive a `leave_open` disconnect.
    pub fn try_clone_socket(&self) -> Option<SocketHandle> {
        self.conn
            .lock()
            .socket
            .as_ref()
            .and_then(|s| s.try_clone().ok())
    }
}
