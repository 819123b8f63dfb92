//! # Fetchrpc
//!
//! Wire-level building blocks of the RPC stack, independent of any socket.
//!
//! ## Architecture
//!
//! - **frame**: The 16-byte frame header and the six message envelopes.
//! - **error**: The `ErrorCode` taxonomy and the serializable `ServiceError`.
//! - **callable**: Type-erased functions with generic argument unrolling.
//! - **protocol**: Function and feed tables keyed by id.
//! - **feed**: Subscriber lists and fan-out of published values.
//!
//! Everything that touches a socket, a timer or a task lives one layer up.

mod callable;
mod error;
mod feed;
mod frame;
mod protocol;

#[cfg(test)]
mod tests;

pub use callable::CallContext;
pub use callable::Callable;
pub use callable::ClassMember;
pub use callable::ContextHandler;
pub use callable::ContextMemberHandler;
pub use callable::Contextual;
pub use callable::Function;
pub use callable::Handler;
pub use callable::MemberHandler;
pub use callable::Outcome;
pub use callable::Packed;
pub use callable::Plain;
pub use error::Error;
pub use error::ErrorCode;
pub use error::Result;
pub use error::ServiceError;
pub use feed::FeedPublisher;
pub use feed::FrameSink;
pub use feed::Subscriber;
pub use frame::DEFAULT_MAX_FRAME_SIZE;
pub use frame::Envelope;
pub use frame::FrameHeader;
pub use frame::HEADER_SIZE;
pub use frame::Kind;
pub use frame::MAGIC;
pub use frame::to_frame;
pub use protocol::Protocol;

pub type ProtocolId = u16;
pub type FunctionId = u16;
pub type FeedId = u16;
pub type SubscriptionId = u64;

/// Identifies one live connection on one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(pub u64);

impl std::fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An opaque peer address.
///
/// For TCP peers this is the textual `ip:port`; other transports may use
/// arbitrary bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub Vec<u8>);

impl Address {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self { Address(s.as_bytes().to_vec()) }
}

impl From<String> for Address {
    fn from(s: String) -> Self { Address(s.into_bytes()) }
}

impl From<std::net::SocketAddr> for Address {
    fn from(addr: std::net::SocketAddr) -> Self { Address::from(addr.to_string()) }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => f.write_str(s),
            Err(_) => {
                for b in &self.0 {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}
