pub mod auth;
pub mod connection;
pub mod error;
pub mod events;
pub mod protocol;
pub mod session;
mod transaction;
pub mod transport;

pub use auth::{AuthChallenge, AuthScheme, Credential};
pub use connection::TransportKind;
pub use error::{Result, RtspClientError};
pub use protocol::{MessageKind, RtspMessage};
pub use session::{ClientSession, SessionConfig};
pub use transport::{InterleavedHandoff, TransportBridge};
