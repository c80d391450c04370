//! Error types for the RTSP client library.

use std::fmt;

/// Errors that can occur in the RTSP client library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Transport**: [`Io`](Self::Io) — socket/network failures,
///   [`NotConnected`](Self::NotConnected),
///   [`AttemptsExhausted`](Self::AttemptsExhausted).
/// - **Protocol**: [`Parse`](Self::Parse) — malformed RTSP messages.
/// - **Session**: [`Disposed`](Self::Disposed) — use after
///   [`ClientSession::dispose`](crate::ClientSession::dispose).
/// - **Authentication**: [`MissingCredentials`](Self::MissingCredentials),
///   [`UnsupportedAlgorithm`](Self::UnsupportedAlgorithm),
///   [`Challenge`](Self::Challenge).
#[derive(Debug, thiserror::Error)]
pub enum RtspClientError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The session has no connected socket and could not establish one.
    #[error("session is not connected")]
    NotConnected,

    /// The session was disposed; no further transactions are possible.
    #[error("session has been disposed")]
    Disposed,

    /// Send/receive retries hit the configured attempt ceiling with no
    /// response ever produced.
    #[error("transaction attempts exhausted after {attempts} tries")]
    AttemptsExhausted { attempts: u32 },

    /// Failed to parse an RTSP message or URL (RFC 2326 §6, §7).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// The server demanded authentication but no credential is configured.
    #[error("authentication required but no credential configured")]
    MissingCredentials,

    /// The server's Digest challenge named an algorithm other than MD5.
    #[error("unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// A WWW-Authenticate header could not be understood.
    #[error("malformed authentication challenge: {0}")]
    Challenge(String),
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no start line).
    EmptyMessage,
    /// Start line was neither a valid request nor a valid status line.
    InvalidStartLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// Not an `rtsp://` URL, or host/port malformed.
    InvalidUrl,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::InvalidStartLine => write!(f, "invalid start line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidUrl => write!(f, "invalid rtsp url"),
        }
    }
}

/// Convenience alias for `Result<T, RtspClientError>`.
pub type Result<T> = std::result::Result<T, RtspClientError>;
