//! # Service Client
//!
//! Issues calls over one connection and correlates the answers.
//!
//! `call` never blocks: it registers the exchange with the dispatcher,
//! queues the frame, and returns a `Promise`. A background task reads frames
//! and routes replies, error replies and feed items. When the connection
//! ends, every exchange still riding on it is failed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Instant;

use dashmap::DashMap;

use fetchpack::Decoder;
use fetchpack::Encoder;
use fetchpack::Pack;
use fetchpack::Unpack;
use fetchrpc::Address;
use fetchrpc::ConnectionHandle;
use fetchrpc::Envelope;
use fetchrpc::ErrorCode;
use fetchrpc::FeedId;
use fetchrpc::FunctionId;
use fetchrpc::ProtocolId;
use fetchrpc::ServiceError;
use fetchrpc::SubscriptionId;

use crate::config::ClientConfig;
use crate::dispatcher::Dispatcher;
use crate::dispatcher::RoutedPacket;
use crate::error::Error;
use crate::error::Result;
use crate::promise::Promise;
use crate::tcp::TcpTransport;
use crate::transport::Transport;

/// Dispatcher service id used for client calls.
pub const RPC_SERVICE: u16 = 1;
/// Dispatcher channel id used for client calls.
pub const RPC_CHANNEL: u16 = 1;

/// How many cancelled subscriptions are remembered to silence late feed items.
const CANCELLED_HISTORY: usize = 30;

type FeedHandler = Arc<dyn Fn(&mut Decoder<'_>) + Send + Sync>;

struct Subscription {
    protocol: ProtocolId,
    feed: FeedId,
    handler: FeedHandler,
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    handle: ConnectionHandle,
    peer: Address,
    dispatcher: Dispatcher,
    counter: AtomicU64,
    /// Full wire counter of the live call behind each dispatcher key.
    in_flight: DashMap<u16, u64>,
    next_subscription: AtomicU64,
    subscriptions: DashMap<SubscriptionId, Subscription>,
    cancelled: Mutex<VecDeque<SubscriptionId>>,
    config: ClientConfig,
}

pub struct ServiceClient {
    inner: Arc<ClientInner>,
}

impl ServiceClient {
    /// Connects over TCP to `addr` (`host:port`).
    pub async fn connect(addr: &str, config: ClientConfig) -> Result<Self> {
        let transport = TcpTransport::connect(addr, config.max_frame_size).await?;
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    /// Drives an existing transport. Must be called from within a tokio runtime.
    pub fn with_transport(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        let handle = config.handles.next();
        let peer = transport.peer_address();
        let inner = Arc::new(ClientInner {
            transport,
            handle,
            peer,
            dispatcher: Dispatcher::with_timeout(config.exchange_timeout),
            counter: AtomicU64::new(1),
            in_flight: DashMap::new(),
            next_subscription: AtomicU64::new(1),
            subscriptions: DashMap::new(),
            cancelled: Mutex::new(VecDeque::with_capacity(CANCELLED_HISTORY)),
            config,
        });

        tracing::info!(%handle, peer = %inner.peer, "service client attached");
        tokio::spawn(inner.clone().read_loop());
        tokio::spawn(ClientInner::sweep(Arc::downgrade(&inner)));

        Self { inner }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.inner.handle
    }

    pub fn peer_address(&self) -> Address {
        self.inner.peer.clone()
    }

    pub fn is_alive(&self) -> bool {
        self.inner.transport.is_alive()
    }

    /// Calls awaiting an answer.
    pub fn pending_calls(&self) -> usize {
        self.inner.dispatcher.pending_count()
    }

    /// Closes the connection. Pending calls fail with `ConnectionLost`.
    pub fn close(&self) {
        self.inner.transport.close();
        self.inner.dispatcher.notify_connection_failure(self.inner.handle);
    }

    /// Calls `function` of `protocol` with `args` packed in order.
    pub fn call(&self, protocol: ProtocolId, function: FunctionId, args: impl Pack) -> Promise {
        let mut enc = Encoder::new();
        if let Err(e) = enc.pack(&args) {
            let promise = Promise::new();
            promise.fail(e.into());
            return promise;
        }
        self.call_with_packed_arguments(protocol, function, enc.into_bytes())
    }

    /// Like `call`, for arguments that are already encoded.
    pub fn call_with_packed_arguments(&self, protocol: ProtocolId, function: FunctionId, args: Vec<u8>) -> Promise {
        let inner = &self.inner;
        let counter = inner.counter.fetch_add(1, Ordering::Relaxed);
        let key = counter as u16;

        inner.in_flight.insert(key, counter);
        let promise = inner.dispatcher.register_exchange(RPC_SERVICE, RPC_CHANNEL, key, inner.peer.clone());
        inner.dispatcher.notify_message(inner.handle, RPC_SERVICE, RPC_CHANNEL, key);

        let sent = Envelope::Call { protocol, function, counter, args }
            .to_frame()
            .map_err(Error::from)
            .and_then(|frame| inner.transport.send(frame));

        if let Err(e) = sent {
            tracing::debug!(protocol, function, counter, error = %e, "call could not be delivered");
            inner.settle(counter);
            inner.dispatcher.dispatch_failure(
                &inner.routed(counter, Vec::new()),
                ServiceError::new(ErrorCode::CouldNotDeliver, e.to_string()),
            );
        }

        promise
    }

    /// Subscribes to a feed, decoding each item as `T`.
    pub fn subscribe<T, F>(&self, protocol: ProtocolId, feed: FeedId, handler: F) -> SubscriptionId
    where
        T: Unpack + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe_raw(protocol, feed, move |dec: &mut Decoder<'_>| match T::unpack(dec) {
            Ok(item) => handler(item),
            Err(e) => tracing::warn!(protocol, feed, error = %e, "undecodable feed item"),
        })
    }

    /// Subscribes to a feed with a handler that reads the payload itself.
    pub fn subscribe_raw(
        &self,
        protocol: ProtocolId,
        feed: FeedId,
        handler: impl Fn(&mut Decoder<'_>) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let subscription = self.inner.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.inner.subscriptions.insert(subscription, Subscription { protocol, feed, handler: Arc::new(handler) });

        tracing::info!(protocol, feed, subscription, "subscribing");
        self.inner.send_envelope(Envelope::Subscribe { protocol, feed, subscription });
        subscription
    }

    /// Cancels a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        let Some((_, sub)) = self.inner.subscriptions.remove(&subscription) else {
            return false;
        };

        {
            let mut cancelled = self.inner.cancelled.lock().unwrap_or_else(PoisonError::into_inner);
            if cancelled.len() == CANCELLED_HISTORY {
                cancelled.pop_front();
            }
            cancelled.push_back(subscription);
        }

        tracing::info!(protocol = sub.protocol, feed = sub.feed, subscription, "unsubscribing");
        self.inner.send_envelope(Envelope::Unsubscribe { protocol: sub.protocol, feed: sub.feed, subscription });
        true
    }
}

impl Drop for ServiceClient {
    fn drop(&mut self) {
        self.inner.transport.close();
        self.inner.dispatcher.fail_all_pending_promises();
    }
}

impl ClientInner {
    fn routed(&self, counter: u64, payload: Vec<u8>) -> RoutedPacket {
        RoutedPacket {
            service: RPC_SERVICE,
            channel: RPC_CHANNEL,
            counter: counter as u16,
            sender: self.peer.clone(),
            payload,
        }
    }

    fn send_envelope(&self, envelope: Envelope) {
        let sent = envelope.to_frame().map_err(Error::from).and_then(|f| self.transport.send(f));
        if let Err(e) = sent {
            tracing::warn!(kind = ?envelope.kind(), error = %e, "failed to send");
        }
    }

    async fn read_loop(self: Arc<Self>) {
        loop {
            match self.transport.recv().await {
                Ok(Some(body)) => {
                    if let Err(e) = self.handle_frame(&body) {
                        tracing::error!(handle = %self.handle, error = %e, "closing connection");
                        break;
                    }
                }
                Ok(None) => {
                    tracing::info!(handle = %self.handle, "connection closed");
                    break;
                }
                Err(e) => {
                    tracing::error!(handle = %self.handle, error = %e, "read failed");
                    break;
                }
            }
        }

        self.transport.close();
        self.dispatcher.notify_connection_failure(self.handle);
    }

    fn handle_frame(&self, body: &[u8]) -> Result<()> {
        match Envelope::decode(body)? {
            Envelope::Reply { counter, value } => {
                if self.settle(counter) {
                    self.dispatcher.dispatch(&self.routed(counter, value));
                }
                Ok(())
            }
            Envelope::Error { counter, error } => {
                if self.settle(counter) {
                    self.dispatcher.dispatch_failure(&self.routed(counter, Vec::new()), error);
                }
                Ok(())
            }
            Envelope::Feed { protocol, feed, subscription, payload } => {
                self.deliver_feed(protocol, feed, subscription, &payload);
                Ok(())
            }
            other => Err(Error::ProtocolViolation(format!("unexpected {:?} from server", other.kind()))),
        }
    }

    /// Claims the dispatcher key for `counter` if that call is still the one
    /// holding it. Replies to evicted or superseded calls are discarded.
    fn settle(&self, counter: u64) -> bool {
        if self.in_flight.remove_if(&(counter as u16), |_, live| *live == counter).is_some() {
            return true;
        }
        tracing::debug!(handle = %self.handle, counter, "stale reply discarded");
        false
    }

    fn deliver_feed(&self, protocol: ProtocolId, feed: FeedId, subscription: SubscriptionId, payload: &[u8]) {
        // Clone the handler out so it may (un)subscribe without deadlocking the map.
        let handler = match self.subscriptions.get(&subscription) {
            Some(sub) if sub.protocol == protocol && sub.feed == feed => sub.handler.clone(),
            Some(sub) => {
                tracing::warn!(
                    subscription,
                    expected = ?(sub.protocol, sub.feed),
                    received = ?(protocol, feed),
                    "feed item does not match its subscription"
                );
                return;
            }
            None => {
                let cancelled = self.cancelled.lock().unwrap_or_else(PoisonError::into_inner);
                if cancelled.contains(&subscription) {
                    tracing::debug!(subscription, "feed item for cancelled subscription");
                } else {
                    tracing::warn!(subscription, "feed item for unknown subscription");
                }
                return;
            }
        };

        handler(&mut Decoder::new(payload));
    }

    /// Periodic timeout sweep. Ends once the client is gone.
    async fn sweep(weak: std::sync::Weak<Self>) {
        let period = match weak.upgrade() {
            Some(inner) => inner.config.cleanup_interval,
            None => return,
        };
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else { break };
            let expired = inner.dispatcher.cleanup(Instant::now());
            if expired > 0 {
                tracing::warn!(handle = %inner.handle, expired, "calls timed out");
            }
        }
    }
}
