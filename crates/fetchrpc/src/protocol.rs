//! # Protocols
//!
//! A `Protocol` is a table of exposed functions plus a table of feeds, both
//! keyed by small integer ids. Registration happens up front; once the
//! protocol is handed to a server it is shared read-only.

use std::collections::HashMap;
use std::sync::Arc;

use fetchpack::Unpack;

use crate::ConnectionHandle;
use crate::FeedId;
use crate::FunctionId;
use crate::callable::Callable;
use crate::callable::ClassMember;
use crate::callable::ContextHandler;
use crate::callable::ContextMemberHandler;
use crate::callable::Function;
use crate::callable::Handler;
use crate::callable::MemberHandler;
use crate::callable::Outcome;
use crate::error::ServiceError;
use crate::feed::FeedPublisher;

type DroppedHook = Box<dyn Fn(ConnectionHandle) + Send + Sync>;

#[derive(Default)]
pub struct Protocol {
    functions: HashMap<FunctionId, Box<dyn Callable>>,
    feeds: HashMap<FeedId, Arc<FeedPublisher>>,
    on_dropped: Option<DroppedHook>,
}

impl Protocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callable under `id`. Ids are unique per protocol.
    pub fn expose(&mut self, id: FunctionId, callable: impl Callable + 'static) -> Result<(), ServiceError> {
        if self.functions.contains_key(&id) {
            return Err(ServiceError::member_exists(id));
        }
        self.functions.insert(id, Box::new(callable));
        Ok(())
    }

    pub fn expose_fn<F, Args, Out>(&mut self, id: FunctionId, f: F) -> Result<(), ServiceError>
    where
        F: Handler<Args, Out>,
        Args: Unpack + 'static,
        Out: Outcome + 'static,
    {
        self.expose(id, Function::new(f))
    }

    pub fn expose_with_context<F, Args, Out>(&mut self, id: FunctionId, f: F) -> Result<(), ServiceError>
    where
        F: ContextHandler<Args, Out>,
        Args: Unpack + 'static,
        Out: Outcome + 'static,
    {
        self.expose(id, Function::with_context(f))
    }

    pub fn expose_member<T, M, Args, Out>(&mut self, id: FunctionId, target: Arc<T>, method: M) -> Result<(), ServiceError>
    where
        T: Send + Sync + 'static,
        M: MemberHandler<T, Args, Out>,
        Args: Unpack + 'static,
        Out: Outcome + 'static,
    {
        self.expose(id, ClassMember::new(target, method))
    }

    pub fn expose_member_with_context<T, M, Args, Out>(
        &mut self,
        id: FunctionId,
        target: Arc<T>,
        method: M,
    ) -> Result<(), ServiceError>
    where
        T: Send + Sync + 'static,
        M: ContextMemberHandler<T, Args, Out>,
        Args: Unpack + 'static,
        Out: Outcome + 'static,
    {
        self.expose(id, ClassMember::with_context(target, method))
    }

    pub fn get(&self, id: FunctionId) -> Result<&dyn Callable, ServiceError> {
        self.functions
            .get(&id)
            .map(|c| c.as_ref())
            .ok_or_else(|| ServiceError::member_not_found(id))
    }

    pub fn register_feed(&mut self, id: FeedId, publisher: Arc<FeedPublisher>) -> Result<(), ServiceError> {
        if self.feeds.contains_key(&id) {
            return Err(ServiceError::feed_exists(id));
        }
        self.feeds.insert(id, publisher);
        Ok(())
    }

    pub fn feed(&self, id: FeedId) -> Result<&Arc<FeedPublisher>, ServiceError> {
        self.feeds.get(&id).ok_or_else(|| ServiceError::feed_not_found(id))
    }

    /// Runs `hook` whenever a connection using this protocol goes away.
    pub fn on_connection_dropped(&mut self, hook: impl Fn(ConnectionHandle) + Send + Sync + 'static) {
        self.on_dropped = Some(Box::new(hook));
    }

    /// Drops the connection's feed subscriptions, then runs the user hook.
    pub fn connection_dropped(&self, handle: ConnectionHandle) {
        let removed: usize = self.feeds.values().map(|f| f.remove_connection(handle)).sum();
        if removed > 0 {
            tracing::debug!(%handle, removed, "dropped feed subscriptions");
        }
        if let Some(hook) = &self.on_dropped {
            hook(handle);
        }
    }

    pub fn function_ids(&self) -> Vec<FunctionId> {
        let mut ids: Vec<_> = self.functions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn feed_ids(&self) -> Vec<FeedId> {
        let mut ids: Vec<_> = self.feeds.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of exposed functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
