//! # Feeds
//!
//! A feed is a server-side stream of values pushed to every subscriber.
//! Each delivery is a `Feed` envelope tagged with the subscriber's own
//! subscription id, so one client can hold several independent
//! subscriptions to the same feed.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use fetchpack::Encoder;
use fetchpack::Pack;

use crate::ConnectionHandle;
use crate::FeedId;
use crate::ProtocolId;
use crate::SubscriptionId;
use crate::error::ServiceError;
use crate::frame::Envelope;

/// Somewhere a complete frame can be handed off without blocking.
pub trait FrameSink: Send + Sync {
    fn deliver(&self, frame: Vec<u8>) -> Result<(), ServiceError>;
}

/// One remote subscription to a feed.
#[derive(Clone)]
pub struct Subscriber {
    pub handle: ConnectionHandle,
    pub protocol: ProtocolId,
    pub feed: FeedId,
    pub subscription: SubscriptionId,
    pub sink: Arc<dyn FrameSink>,
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("handle", &self.handle)
            .field("protocol", &self.protocol)
            .field("feed", &self.feed)
            .field("subscription", &self.subscription)
            .finish_non_exhaustive()
    }
}

/// Fans published values out to the current subscribers.
#[derive(Default)]
pub struct FeedPublisher {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl FeedPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribers(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a subscriber. A repeated `(handle, subscription)` pair replaces the old entry.
    pub fn subscribe(&self, subscriber: Subscriber) {
        let mut subs = self.subscribers();
        subs.retain(|s| !(s.handle == subscriber.handle && s.subscription == subscriber.subscription));
        tracing::debug!(
            handle = %subscriber.handle,
            subscription = subscriber.subscription,
            "feed subscriber added"
        );
        subs.push(subscriber);
    }

    /// Removes one subscription. Returns whether it existed.
    pub fn unsubscribe(&self, handle: ConnectionHandle, subscription: SubscriptionId) -> bool {
        let mut subs = self.subscribers();
        let before = subs.len();
        subs.retain(|s| !(s.handle == handle && s.subscription == subscription));
        before != subs.len()
    }

    /// Removes every subscription held by a connection.
    pub fn remove_connection(&self, handle: ConnectionHandle) -> usize {
        let mut subs = self.subscribers();
        let before = subs.len();
        subs.retain(|s| s.handle != handle);
        before - subs.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    /// Publishes a value to every subscriber and returns the number of deliveries.
    ///
    /// Subscribers whose sink refuses the frame are dropped.
    pub fn publish<T: Pack + ?Sized>(&self, value: &T) -> usize {
        let mut enc = Encoder::new();
        if let Err(e) = enc.pack(value) {
            tracing::error!(error = %e, "failed to encode feed item");
            return 0;
        }
        let payload = enc.into_bytes();

        // Sinks only enqueue, but deliver outside the lock anyway.
        let targets: Vec<Subscriber> = self.subscribers().clone();

        let mut delivered = 0;
        let mut failed = Vec::new();
        for sub in targets {
            let envelope = Envelope::Feed {
                protocol: sub.protocol,
                feed: sub.feed,
                subscription: sub.subscription,
                payload: payload.clone(),
            };
            let frame = match envelope.to_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(error = %e, "failed to frame feed item");
                    continue;
                }
            };
            match sub.sink.deliver(frame) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(handle = %sub.handle, error = %e, "dropping feed subscriber");
                    failed.push((sub.handle, sub.subscription));
                }
            }
        }

        if !failed.is_empty() {
            self.subscribers().retain(|s| !failed.contains(&(s.handle, s.subscription)));
        }

        delivered
    }
}
