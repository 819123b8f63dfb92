//! # Error Definitions
//!
//! Failures of the connection layer. Anything that happens to an in-flight
//! call surfaces as a failed `Promise` instead.

use fetchrpc::ServiceError;

#[derive(Debug)]
pub enum Error {
    /// Socket-level failure.
    Io(std::io::Error),
    /// Framing or envelope failure (bad magic, oversized frame, bad kind).
    Rpc(fetchrpc::Error),
    /// Structured failure, e.g. a duplicate protocol id.
    Service(ServiceError),
    /// The transport was closed locally or by the peer.
    ConnectionClosed,
    /// No async runtime was available to drive the connection.
    NotConnected,
    /// The peer sent a message that makes no sense in this direction.
    ProtocolViolation(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Rpc(e) => write!(f, "RPC error: {}", e),
            Self::Service(e) => write!(f, "Service error: {}", e),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::NotConnected => write!(f, "Not connected"),
            Self::ProtocolViolation(msg) => write!(f, "Protocol violation: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<fetchrpc::Error> for Error {
    fn from(e: fetchrpc::Error) -> Self {
        Self::Rpc(e)
    }
}

impl From<ServiceError> for Error {
    fn from(e: ServiceError) -> Self {
        Self::Service(e)
    }
}

impl From<fetchpack::Error> for Error {
    fn from(e: fetchpack::Error) -> Self {
        Self::Rpc(fetchrpc::Error::Codec(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
