//! # Service Server
//!
//! Serves a set of protocols to any number of connections.
//!
//! Each connection gets a read task. Calls are executed on the blocking pool,
//! one task per call, so a slow callable never stalls the connection. Replies
//! carry the caller's counter back unchanged.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::net::TcpListener;
use tokio::sync::watch;

use fetchpack::Decoder;
use fetchpack::Encoder;
use fetchrpc::CallContext;
use fetchrpc::ConnectionHandle;
use fetchrpc::Envelope;
use fetchrpc::ErrorCode;
use fetchrpc::FeedId;
use fetchrpc::FrameSink;
use fetchrpc::FunctionId;
use fetchrpc::Protocol;
use fetchrpc::ProtocolId;
use fetchrpc::ServiceError;
use fetchrpc::Subscriber;
use fetchrpc::SubscriptionId;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::tcp::TcpTransport;
use crate::transport::Transport;

/// Lets feed publishers push frames straight into a connection's write queue.
struct ConnectionSink(Arc<dyn Transport>);

impl FrameSink for ConnectionSink {
    fn deliver(&self, frame: Vec<u8>) -> std::result::Result<(), ServiceError> {
        self.0
            .send(frame)
            .map_err(|e| ServiceError::new(ErrorCode::CouldNotDeliver, e.to_string()))
    }
}

struct ServerInner {
    protocols: DashMap<ProtocolId, Arc<Protocol>>,
    connections: DashMap<ConnectionHandle, Arc<dyn Transport>>,
    config: ServerConfig,
}

#[derive(Clone)]
pub struct ServiceServer {
    inner: Arc<ServerInner>,
}

impl Default for ServiceServer {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl ServiceServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                protocols: DashMap::new(),
                connections: DashMap::new(),
                config,
            }),
        }
    }

    /// Publishes `protocol` under `id`. Ids are unique per server.
    pub fn add(&self, id: ProtocolId, protocol: Protocol) -> std::result::Result<(), ServiceError> {
        match self.inner.protocols.entry(id) {
            Entry::Occupied(_) => Err(ServiceError::protocol_exists(id)),
            Entry::Vacant(slot) => {
                tracing::info!(protocol = id, functions = protocol.len(), "protocol added");
                slot.insert(Arc::new(protocol));
                Ok(())
            }
        }
    }

    pub fn protocol(&self, id: ProtocolId) -> Option<Arc<Protocol>> {
        self.inner.protocols.get(&id).map(|p| p.clone())
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    /// Serves one already-established connection.
    pub fn serve(&self, transport: Arc<dyn Transport>) -> ConnectionHandle {
        let handle = self.inner.config.handles.next();
        self.inner.connections.insert(handle, transport.clone());
        tracing::info!(%handle, peer = %transport.peer_address(), "connection opened");

        tokio::spawn(self.inner.clone().read_loop(handle, transport));
        handle
    }

    /// Accepts TCP connections on `addr` until the returned handle is shut down.
    pub async fn listen(&self, addr: &str) -> Result<ServerHandle> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (stop, mut stopped) = watch::channel(false);

        tracing::info!(%local_addr, "listening");
        let server = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => match TcpTransport::new(stream, server.inner.config.max_frame_size) {
                            Ok(transport) => {
                                server.serve(Arc::new(transport));
                            }
                            Err(e) => tracing::warn!(%peer, error = %e, "failed to set up connection"),
                        },
                        Err(e) => tracing::warn!(error = %e, "accept failed"),
                    },
                    _ = stopped.changed() => break,
                }
            }
            tracing::info!(%local_addr, "stopped listening");
        });

        Ok(ServerHandle { local_addr, stop, server: self.clone() })
    }
}

/// A running listener. Dropping it stops accepting; open connections stay up.
pub struct ServerHandle {
    local_addr: SocketAddr,
    stop: watch::Sender<bool>,
    server: ServiceServer,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and closes every open connection.
    pub fn shutdown(self) {
        self.stop.send_replace(true);
        for conn in self.server.inner.connections.iter() {
            conn.value().close();
        }
    }
}

impl ServerInner {
    async fn read_loop(self: Arc<Self>, handle: ConnectionHandle, transport: Arc<dyn Transport>) {
        let sink: Arc<dyn FrameSink> = Arc::new(ConnectionSink(transport.clone()));
        let ctx = CallContext::new(handle, transport.peer_address());

        loop {
            let body = match transport.recv().await {
                Ok(Some(body)) => body,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(%handle, error = %e, "read failed, closing connection");
                    break;
                }
            };

            match Envelope::decode(&body) {
                Ok(envelope) => self.on_envelope(envelope, &ctx, &transport, &sink),
                Err(e) => {
                    tracing::warn!(%handle, error = %e, "malformed envelope, closing connection");
                    break;
                }
            }
        }

        transport.close();
        self.connections.remove(&handle);

        // Collect first so hooks may touch the server without holding a shard lock.
        let protocols: Vec<Arc<Protocol>> = self.protocols.iter().map(|p| p.value().clone()).collect();
        for protocol in protocols {
            protocol.connection_dropped(handle);
        }
        tracing::info!(%handle, "connection closed");
    }

    fn on_envelope(
        &self,
        envelope: Envelope,
        ctx: &CallContext,
        transport: &Arc<dyn Transport>,
        sink: &Arc<dyn FrameSink>,
    ) {
        match envelope {
            Envelope::Call { protocol, function, counter, args } => {
                let found = self.protocols.get(&protocol).map(|p| p.clone());
                let ctx = ctx.clone();
                let transport = transport.clone();
                tokio::task::spawn_blocking(move || {
                    let reply = match execute(found, protocol, function, &ctx, &args) {
                        Ok(value) => Envelope::Reply { counter, value },
                        Err(error) => {
                            tracing::debug!(protocol, function, counter, %error, "call failed");
                            Envelope::Error { counter, error }
                        }
                    };
                    let sent = reply.to_frame().map_err(crate::Error::from).and_then(|f| transport.send(f));
                    if let Err(e) = sent {
                        tracing::warn!(handle = %ctx.handle, counter, error = %e, "failed to send reply");
                    }
                });
            }
            Envelope::Subscribe { protocol, feed, subscription } => {
                match self.publisher(protocol, feed) {
                    Ok(publisher) => {
                        tracing::info!(handle = %ctx.handle, protocol, feed, subscription, "subscribed");
                        publisher.subscribe(Subscriber {
                            handle: ctx.handle,
                            protocol,
                            feed,
                            subscription,
                            sink: sink.clone(),
                        });
                    }
                    Err(e) => tracing::warn!(handle = %ctx.handle, error = %e, "subscribe to unknown feed"),
                }
            }
            Envelope::Unsubscribe { protocol, feed, subscription } => {
                self.unsubscribe(ctx.handle, protocol, feed, subscription);
            }
            other => {
                tracing::warn!(handle = %ctx.handle, kind = ?other.kind(), "unexpected message from client");
            }
        }
    }

    fn publisher(&self, protocol: ProtocolId, feed: FeedId) -> std::result::Result<Arc<fetchrpc::FeedPublisher>, ServiceError> {
        let proto = self
            .protocols
            .get(&protocol)
            .map(|p| p.clone())
            .ok_or_else(|| ServiceError::protocol_not_found(protocol))?;
        proto.feed(feed).cloned()
    }

    fn unsubscribe(&self, handle: ConnectionHandle, protocol: ProtocolId, feed: FeedId, subscription: SubscriptionId) {
        match self.publisher(protocol, feed) {
            Ok(publisher) => {
                if publisher.unsubscribe(handle, subscription) {
                    tracing::info!(%handle, protocol, feed, subscription, "unsubscribed");
                }
            }
            Err(e) => tracing::warn!(%handle, error = %e, "unsubscribe from unknown feed"),
        }
    }
}

/// Looks up and runs one call, returning the packed result.
fn execute(
    protocol: Option<Arc<Protocol>>,
    protocol_id: ProtocolId,
    function: FunctionId,
    ctx: &CallContext,
    args: &[u8],
) -> std::result::Result<Vec<u8>, ServiceError> {
    let protocol = protocol.ok_or_else(|| ServiceError::protocol_not_found(protocol_id))?;
    let callable = protocol.get(function)?;

    let mut result = Encoder::new();
    callable.invoke(ctx, &mut result, &mut Decoder::new(args))?;
    Ok(result.into_bytes())
}
