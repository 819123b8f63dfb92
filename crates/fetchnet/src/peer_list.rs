//! # Peer Connection List
//!
//! Tracks which peers we want to stay connected to, which of them are
//! connected right now, and how badly each has been failing.
//!
//! Per-peer state is derived from `PeerMetadata`, never stored:
//!
//! ```text
//! unknown ──attempt──> trying ──established──> connected
//!                        │                        │
//!                        └──────── failure ───────┴──> backoff(n)
//! ```
//!
//! With `n = min(consecutive_failures, 11)`, a peer in backoff becomes
//! eligible again `2^n` seconds after its last failure. The only place that
//! decision is made is `get_peers_to_connect_to_at`.
//!
//! All maps sit behind one mutex.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::Instant;

use fetchrpc::ConnectionHandle;

/// Largest backoff exponent: 2^11 seconds, a little over half an hour.
pub const MAX_BACKOFF_EXPONENT: u32 = 11;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerMetadata {
    pub connected: bool,
    pub attempts: u64,
    pub successes: u64,
    pub total_failures: u64,
    pub consecutive_failures: u32,
    pub last_failed_connection: Option<Instant>,
}

impl PeerMetadata {
    /// How long to wait after the last failure before trying again.
    pub fn backoff(&self) -> Duration {
        let n = self.consecutive_failures.min(MAX_BACKOFF_EXPONENT);
        Duration::from_secs(1u64 << n)
    }

    /// Whether a new attempt is allowed at `now`.
    pub fn ready_at(&self, now: Instant) -> bool {
        match self.last_failed_connection {
            Some(failed) if self.consecutive_failures > 0 => {
                now.saturating_duration_since(failed) >= self.backoff()
            }
            _ => true,
        }
    }
}

type EstablishedHook = Arc<dyn Fn(&str, ConnectionHandle) + Send + Sync>;

#[derive(Default)]
struct State {
    persistent: BTreeSet<String>,
    connections: HashMap<String, ConnectionHandle>,
    metadata: HashMap<String, PeerMetadata>,
    on_established: Option<EstablishedHook>,
}

impl State {
    fn uri_of(&self, handle: ConnectionHandle) -> Option<String> {
        self.connections.iter().find(|(_, h)| **h == handle).map(|(uri, _)| uri.clone())
    }

    /// Metadata lives only while a peer is persistent or connected.
    fn prune(&mut self, uri: &str) {
        if !self.persistent.contains(uri) && !self.connections.contains_key(uri) {
            self.metadata.remove(uri);
        }
    }

    fn drop_connection(&mut self, uri: &str, now: Instant) -> Option<ConnectionHandle> {
        let handle = self.connections.remove(uri);
        if let Some(meta) = self.metadata.get_mut(uri) {
            meta.connected = false;
            meta.consecutive_failures = meta.consecutive_failures.saturating_add(1);
            meta.total_failures += 1;
            meta.last_failed_connection = Some(now);
            tracing::debug!(
                %uri,
                consecutive_failures = meta.consecutive_failures,
                backoff = ?meta.backoff(),
                "peer connection removed"
            );
        }
        self.prune(uri);
        handle
    }
}

#[derive(Default)]
pub struct PeerConnectionList {
    state: Mutex<State>,
}

impl PeerConnectionList {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Called with the peer uri and its handle whenever a connection is established.
    pub fn on_established(&self, hook: impl Fn(&str, ConnectionHandle) + Send + Sync + 'static) {
        self.state().on_established = Some(Arc::new(hook));
    }

    pub fn add_persistent_peer(&self, uri: &str) {
        let mut state = self.state();
        state.metadata.entry(uri.to_owned()).or_default();
        if state.persistent.insert(uri.to_owned()) {
            tracing::info!(%uri, "persistent peer added");
        }
    }

    pub fn remove_persistent_peer(&self, uri: &str) -> bool {
        let mut state = self.state();
        let removed = state.persistent.remove(uri);
        state.prune(uri);
        removed
    }

    /// Stops tracking whichever persistent peer owns `handle`.
    pub fn remove_persistent_peer_by_handle(&self, handle: ConnectionHandle) -> Option<String> {
        let mut state = self.state();
        let uri = state.uri_of(handle)?;
        state.persistent.remove(&uri);
        Some(uri)
    }

    /// Notes that a connection attempt to `uri` is starting.
    pub fn record_attempt(&self, uri: &str) {
        self.state().metadata.entry(uri.to_owned()).or_default().attempts += 1;
    }

    /// Associates a live connection with `uri`.
    pub fn add_connection(&self, uri: &str, handle: ConnectionHandle) {
        self.state().connections.insert(uri.to_owned(), handle);
    }

    /// Marks `uri` as connected and resets its failure streak.
    pub fn on_connection_established(&self, uri: &str) {
        let (hook, handle) = {
            let mut state = self.state();
            let meta = state.metadata.entry(uri.to_owned()).or_default();
            meta.connected = true;
            meta.successes += 1;
            meta.consecutive_failures = 0;
            (state.on_established.clone(), state.connections.get(uri).copied())
        };

        tracing::info!(%uri, "peer connection established");
        if let (Some(hook), Some(handle)) = (hook, handle) {
            hook(uri, handle);
        }
    }

    pub fn remove_connection(&self, uri: &str) -> Option<ConnectionHandle> {
        self.remove_connection_at(uri, Instant::now())
    }

    /// Drops the live connection to `uri` and counts a failure at `now`.
    pub fn remove_connection_at(&self, uri: &str, now: Instant) -> Option<ConnectionHandle> {
        self.state().drop_connection(uri, now)
    }

    pub fn remove_connection_by_handle(&self, handle: ConnectionHandle) -> Option<String> {
        self.remove_connection_by_handle_at(handle, Instant::now())
    }

    pub fn remove_connection_by_handle_at(&self, handle: ConnectionHandle, now: Instant) -> Option<String> {
        let mut state = self.state();
        let uri = state.uri_of(handle)?;
        state.drop_connection(&uri, now);
        Some(uri)
    }

    pub fn get_peers_to_connect_to(&self) -> Vec<String> {
        self.get_peers_to_connect_to_at(Instant::now())
    }

    /// Persistent peers that are not connected and are out of backoff at `now`.
    pub fn get_peers_to_connect_to_at(&self, now: Instant) -> Vec<String> {
        let state = self.state();
        state
            .persistent
            .iter()
            .filter(|uri| !state.connections.contains_key(*uri))
            .filter(|uri| match state.metadata.get(*uri) {
                None => true,
                Some(meta) => !meta.connected && meta.ready_at(now),
            })
            .cloned()
            .collect()
    }

    pub fn metadata(&self, uri: &str) -> Option<PeerMetadata> {
        self.state().metadata.get(uri).cloned()
    }

    pub fn is_connected(&self, uri: &str) -> bool {
        self.state().metadata.get(uri).is_some_and(|m| m.connected)
    }

    pub fn persistent_peers(&self) -> Vec<String> {
        self.state().persistent.iter().cloned().collect()
    }

    pub fn connected_peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.state().connections.keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Stops tracking `uri` and hands back its live connection so the caller can close it.
    pub fn disconnect_from_peer(&self, uri: &str) -> Option<ConnectionHandle> {
        let mut state = self.state();
        state.persistent.remove(uri);
        let handle = state.connections.remove(uri);
        state.metadata.remove(uri);
        handle
    }
}
