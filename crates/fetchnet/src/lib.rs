//! # Fetchnet
//!
//! Connections, correlation and peer management for the fetch RPC stack.
//!
//! ## Architecture
//!
//! - **transport**: The `Transport` trait, with TCP and in-memory duplex implementations.
//! - **promise**: Single-assignment result cells with blocking, async and callback waits.
//! - **dispatcher**: Pending exchanges keyed by `(service, channel, counter)`.
//! - **client** / **server**: Calls, replies and feed subscriptions over a transport.
//! - **peer_list**: Persistent peers and exponential reconnection backoff.
//!
//! Logging goes through `tracing`; installing a subscriber is up to the binary.

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod duplex;
pub mod error;
pub mod peer_list;
pub mod promise;
pub mod server;
pub mod tcp;
pub mod transport;


pub use client::RPC_CHANNEL;
pub use client::RPC_SERVICE;
pub use client::ServiceClient;
pub use config::ClientConfig;
pub use config::HandleAllocator;
pub use config::ServerConfig;
pub use dispatcher::DispatchOutcome;
pub use dispatcher::Dispatcher;
pub use dispatcher::RoutedPacket;
pub use dispatcher::combine;
pub use duplex::DuplexTransport;
pub use error::Error;
pub use error::Result;
pub use peer_list::PeerConnectionList;
pub use peer_list::PeerMetadata;
pub use promise::Promise;
pub use promise::PromiseState;
pub use server::ServerHandle;
pub use server::ServiceServer;
pub use tcp::TcpTransport;
pub use transport::Transport;
