//! Client and server settings.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use fetchrpc::ConnectionHandle;
use fetchrpc::DEFAULT_MAX_FRAME_SIZE;

use crate::dispatcher::DEFAULT_EXCHANGE_TIMEOUT;

/// Hands out connection handles. Clones share one counter.
#[derive(Debug, Clone, Default)]
pub struct HandleAllocator {
    last: Arc<AtomicU64>,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next unused handle. Handles start at 1.
    pub fn next(&self) -> ConnectionHandle {
        ConnectionHandle(self.last.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long a call may stay unanswered before the sweep fails it.
    pub exchange_timeout: Duration,
    /// How often the sweep runs.
    pub cleanup_interval: Duration,
    pub max_frame_size: u64,
    pub handles: HandleAllocator,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
            cleanup_interval: Duration::from_secs(1),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            handles: HandleAllocator::new(),
        }
    }
}

impl ClientConfig {
    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn with_max_frame_size(mut self, max: u64) -> Self {
        self.max_frame_size = max;
        self
    }

    pub fn with_handles(mut self, handles: HandleAllocator) -> Self {
        self.handles = handles;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_frame_size: u64,
    pub handles: HandleAllocator,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            handles: HandleAllocator::new(),
        }
    }
}

impl ServerConfig {
    pub fn with_max_frame_size(mut self, max: u64) -> Self {
        self.max_frame_size = max;
        self
    }

    pub fn with_handles(mut self, handles: HandleAllocator) -> Self {
        self.handles = handles;
        self
    }
}
