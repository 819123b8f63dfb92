//! # Dispatcher
//!
//! Correlates replies with the promises of the requests that caused them.
//!
//! Every pending exchange is keyed by `(service, channel, counter)` and
//! remembers the address it expects the answer from. Exchanges are also
//! grouped by connection handle so a dropped connection can fail exactly the
//! exchanges that were riding on it.
//!
//! ## Locking
//! `promises` is always taken before `handles`. `strikes` is only ever
//! taken on its own.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU16;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use fetchrpc::Address;
use fetchrpc::ConnectionHandle;
use fetchrpc::ErrorCode;
use fetchrpc::ServiceError;

use crate::promise::Promise;

pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Packs an exchange key: service in bits 63..32, channel in 31..16, counter in 15..0.
pub fn combine(service: u16, channel: u16, counter: u16) -> u64 {
    ((service as u64) << 32) | ((channel as u64) << 16) | counter as u64
}

/// An inbound answer, already stripped down to its routing fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedPacket {
    pub service: u16,
    pub channel: u16,
    pub counter: u16,
    pub sender: Address,
    pub payload: Vec<u8>,
}

impl RoutedPacket {
    pub fn key(&self) -> u64 {
        combine(self.service, self.channel, self.counter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The matching promise was resolved and the exchange removed.
    Fulfilled,
    /// Nothing is waiting under this key (late, duplicate or unsolicited).
    NoExchange,
    /// The key matched but the sender did not. The exchange stays pending.
    SenderMismatch { strikes: u32 },
}

struct PromiseEntry {
    address: Address,
    promise: Promise,
    timestamp: Instant,
}

pub struct Dispatcher {
    timeout: Duration,
    promises: Mutex<HashMap<u64, PromiseEntry>>,
    handles: Mutex<HashMap<ConnectionHandle, HashSet<u64>>>,
    strikes: Mutex<HashMap<Address, u32>>,
    counter: AtomicU16,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_EXCHANGE_TIMEOUT)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drops `key` from every handle's exchange set.
fn forget_key(handles: &mut HashMap<ConnectionHandle, HashSet<u64>>, key: u64) {
    handles.retain(|_, keys| {
        keys.remove(&key);
        !keys.is_empty()
    });
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            promises: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
            strikes: Mutex::new(HashMap::new()),
            counter: AtomicU16::new(1),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wrapping message number for routers that need one.
    pub fn next_counter(&self) -> u16 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Starts waiting for an answer from `expected` under the given key.
    ///
    /// A still-pending exchange under the same key is evicted and failed.
    pub fn register_exchange(&self, service: u16, channel: u16, counter: u16, expected: Address) -> Promise {
        let key = combine(service, channel, counter);
        let promise = Promise::new();
        let entry = PromiseEntry { address: expected, promise: promise.clone(), timestamp: Instant::now() };

        let evicted = {
            let mut promises = lock(&self.promises);
            let evicted = promises.insert(key, entry);
            if evicted.is_some() {
                forget_key(&mut lock(&self.handles), key);
            }
            evicted
        };

        if let Some(stale) = evicted {
            tracing::warn!(service, channel, counter, "evicting stale exchange");
            stale.promise.fail(ServiceError::new(
                ErrorCode::ExchangeEvicted,
                format!("exchange {:#x} replaced by a newer one", key),
            ));
        }

        promise
    }

    /// Associates a pending exchange with the connection carrying it.
    pub fn notify_message(&self, handle: ConnectionHandle, service: u16, channel: u16, counter: u16) {
        let key = combine(service, channel, counter);
        lock(&self.handles).entry(handle).or_default().insert(key);
    }

    /// Removes the exchange matching the packet if its sender is the expected one.
    fn take(&self, packet: &RoutedPacket) -> Result<Promise, DispatchOutcome> {
        let key = packet.key();
        let mut promises = lock(&self.promises);

        let Some(entry) = promises.get(&key) else {
            return Err(DispatchOutcome::NoExchange);
        };

        if entry.address != packet.sender {
            let expected = entry.address.clone();
            drop(promises);

            let strikes = {
                let mut strikes = lock(&self.strikes);
                let count = strikes.entry(packet.sender.clone()).or_insert(0);
                *count += 1;
                *count
            };
            tracing::warn!(
                key = format_args!("{:#x}", key),
                %expected,
                sender = %packet.sender,
                strikes,
                "reply from unexpected sender discarded"
            );
            return Err(DispatchOutcome::SenderMismatch { strikes });
        }

        let entry = promises.remove(&key).map(|e| e.promise);
        forget_key(&mut lock(&self.handles), key);
        entry.ok_or(DispatchOutcome::NoExchange)
    }

    /// Fulfills the matching exchange with the packet payload.
    pub fn dispatch(&self, packet: &RoutedPacket) -> DispatchOutcome {
        match self.take(packet) {
            Ok(promise) => {
                promise.fulfill(packet.payload.clone());
                DispatchOutcome::Fulfilled
            }
            Err(outcome) => {
                if outcome == DispatchOutcome::NoExchange {
                    tracing::debug!(key = format_args!("{:#x}", packet.key()), "no exchange waiting for reply");
                }
                outcome
            }
        }
    }

    /// Fails the matching exchange, e.g. on an error reply.
    pub fn dispatch_failure(&self, packet: &RoutedPacket, error: ServiceError) -> DispatchOutcome {
        match self.take(packet) {
            Ok(promise) => {
                promise.fail(error);
                DispatchOutcome::Fulfilled
            }
            Err(outcome) => outcome,
        }
    }

    /// Fails every exchange riding on `handle`. Returns how many were failed.
    pub fn notify_connection_failure(&self, handle: ConnectionHandle) -> usize {
        let failed: Vec<Promise> = {
            let mut promises = lock(&self.promises);
            let mut handles = lock(&self.handles);
            let keys = handles.remove(&handle).unwrap_or_default();
            keys.iter().filter_map(|k| promises.remove(k)).map(|e| e.promise).collect()
        };

        if !failed.is_empty() {
            tracing::info!(%handle, count = failed.len(), "failing exchanges of lost connection");
        }
        for promise in &failed {
            promise.fail(ServiceError::new(ErrorCode::ConnectionLost, format!("connection {} lost", handle)));
        }
        failed.len()
    }

    /// Times out every exchange older than the dispatcher timeout.
    pub fn cleanup(&self, now: Instant) -> usize {
        let expired: Vec<Promise> = {
            let mut promises = lock(&self.promises);
            let keys: Vec<u64> = promises
                .iter()
                .filter(|(_, e)| now.saturating_duration_since(e.timestamp) > self.timeout)
                .map(|(k, _)| *k)
                .collect();
            if keys.is_empty() {
                return 0;
            }

            let mut handles = lock(&self.handles);
            for key in &keys {
                forget_key(&mut handles, *key);
            }
            keys.iter().filter_map(|k| promises.remove(k)).map(|e| e.promise).collect()
        };

        tracing::debug!(count = expired.len(), "timing out stale exchanges");
        for promise in &expired {
            promise.time_out();
        }
        expired.len()
    }

    /// Fails everything still pending. Used on shutdown.
    pub fn fail_all_pending_promises(&self) -> usize {
        let pending: Vec<Promise> = {
            let mut promises = lock(&self.promises);
            lock(&self.handles).clear();
            promises.drain().map(|(_, e)| e.promise).collect()
        };
        for promise in &pending {
            promise.fail(ServiceError::new(ErrorCode::ConnectionLost, "dispatcher shut down"));
        }
        pending.len()
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.promises).len()
    }

    /// How many mismatched replies `sender` has produced so far.
    pub fn sender_strikes(&self, sender: &Address) -> u32 {
        lock(&self.strikes).get(sender).copied().unwrap_or(0)
    }
}
