//! # Promises
//!
//! A `Promise` is a single-assignment cell shared between whoever waits for
//! a call's result and whoever eventually delivers it.
//!
//! ```text
//! Waiting ──fulfill──> Fulfilled
//!    │──────fail─────> Failed
//!    └────time_out───> TimedOut
//! ```
//!
//! Terminal states are final: later resolution attempts return `false` and
//! change nothing. Waiters can block a thread (`wait`), await (`resolved`),
//! or attach continuations (`then`, `otherwise`).

use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use tokio::sync::Notify;

use fetchpack::Decoder;
use fetchpack::Unpack;
use fetchrpc::ErrorCode;
use fetchrpc::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Waiting,
    Fulfilled,
    Failed,
    TimedOut,
}

type SuccessFn = Box<dyn FnOnce(&[u8]) + Send>;
type FailureFn = Box<dyn FnOnce(&ServiceError) + Send>;

struct Slot {
    state: PromiseState,
    value: Option<Vec<u8>>,
    error: Option<ServiceError>,
    on_success: Vec<SuccessFn>,
    on_failure: Vec<FailureFn>,
}

struct Inner {
    slot: Mutex<Slot>,
    cond: Condvar,
    notify: Notify,
}

#[derive(Clone)]
pub struct Promise {
    inner: Arc<Inner>,
}

impl Default for Promise {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Promise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise").field("state", &self.state()).finish()
    }
}

impl Promise {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(Slot {
                    state: PromiseState::Waiting,
                    value: None,
                    error: None,
                    on_success: Vec::new(),
                    on_failure: Vec::new(),
                }),
                cond: Condvar::new(),
                notify: Notify::new(),
            }),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.inner.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> PromiseState {
        self.slot().state
    }

    pub fn is_pending(&self) -> bool {
        self.state() == PromiseState::Waiting
    }

    pub fn is_fulfilled(&self) -> bool {
        self.state() == PromiseState::Fulfilled
    }

    /// True for both `Failed` and `TimedOut`.
    pub fn is_failed(&self) -> bool {
        matches!(self.state(), PromiseState::Failed | PromiseState::TimedOut)
    }

    /// Resolves with the raw reply bytes.
    pub fn fulfill(&self, value: Vec<u8>) -> bool {
        let mut slot = self.slot();
        if slot.state != PromiseState::Waiting {
            return false;
        }
        slot.state = PromiseState::Fulfilled;
        let callbacks = std::mem::take(&mut slot.on_success);
        slot.on_failure.clear();
        let value = slot.value.insert(value).clone();
        drop(slot);

        self.wake();
        for callback in callbacks {
            callback(&value);
        }
        true
    }

    pub fn fail(&self, error: ServiceError) -> bool {
        self.reject(PromiseState::Failed, error)
    }

    pub fn time_out(&self) -> bool {
        self.reject(PromiseState::TimedOut, ServiceError::new(ErrorCode::TimedOut, "exchange timed out"))
    }

    fn reject(&self, state: PromiseState, error: ServiceError) -> bool {
        let mut slot = self.slot();
        if slot.state != PromiseState::Waiting {
            return false;
        }
        slot.state = state;
        let callbacks = std::mem::take(&mut slot.on_failure);
        slot.on_success.clear();
        slot.error = Some(error.clone());
        drop(slot);

        self.wake();
        for callback in callbacks {
            callback(&error);
        }
        true
    }

    fn wake(&self) {
        self.inner.cond.notify_all();
        self.inner.notify.notify_waiters();
    }

    /// Blocks the calling thread until resolved or `timeout` passes.
    ///
    /// Returns whether the promise left `Waiting`. Do not call from an async task.
    pub fn wait(&self, timeout: Duration) -> bool {
        let slot = self.slot();
        let (slot, _) = self
            .inner
            .cond
            .wait_timeout_while(slot, timeout, |s| s.state == PromiseState::Waiting)
            .unwrap_or_else(PoisonError::into_inner);
        slot.state != PromiseState::Waiting
    }

    /// Async form of `wait`.
    pub async fn resolved(&self, timeout: Duration) -> bool {
        let settle = async {
            loop {
                let notified = self.inner.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if !self.is_pending() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, settle).await.is_ok()
    }

    /// The raw reply bytes, once fulfilled.
    pub fn value(&self) -> Option<Vec<u8>> {
        self.slot().value.clone()
    }

    /// The failure, once failed or timed out.
    pub fn error(&self) -> Option<ServiceError> {
        self.slot().error.clone()
    }

    /// Decodes the reply as `T`. Fails unless the promise is fulfilled.
    pub fn as_value<T: Unpack>(&self) -> Result<T, ServiceError> {
        let slot = self.slot();
        match slot.state {
            PromiseState::Fulfilled => {
                let bytes = slot.value.as_deref().unwrap_or_default();
                Ok(T::unpack(&mut Decoder::new(bytes))?)
            }
            PromiseState::Waiting => Err(ServiceError::new(ErrorCode::Unknown, "promise is still waiting")),
            PromiseState::Failed | PromiseState::TimedOut => Err(slot
                .error
                .clone()
                .unwrap_or_else(|| ServiceError::new(ErrorCode::Unknown, "promise failed"))),
        }
    }

    /// Runs `f` with the reply bytes on fulfilment, immediately if already fulfilled.
    pub fn then(&self, f: impl FnOnce(&[u8]) + Send + 'static) -> &Self {
        let mut slot = self.slot();
        let state = slot.state;
        match state {
            PromiseState::Waiting => slot.on_success.push(Box::new(f)),
            PromiseState::Fulfilled => {
                let value = slot.value.clone().unwrap_or_default();
                drop(slot);
                f(&value);
            }
            PromiseState::Failed | PromiseState::TimedOut => {}
        }
        self
    }

    /// Runs `f` with the error on failure or timeout, immediately if already failed.
    pub fn otherwise(&self, f: impl FnOnce(&ServiceError) + Send + 'static) -> &Self {
        let mut slot = self.slot();
        let state = slot.state;
        match state {
            PromiseState::Waiting => slot.on_failure.push(Box::new(f)),
            PromiseState::Failed | PromiseState::TimedOut => {
                let error = slot.error.clone();
                drop(slot);
                if let Some(error) = error {
                    f(&error);
                }
            }
            PromiseState::Fulfilled => {}
        }
        self
    }
}
