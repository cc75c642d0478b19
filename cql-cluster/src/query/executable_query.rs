use futures::future::BoxFuture;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::cluster::HostInfo;
use crate::error::{Error, Result};
use crate::query::QueryContext;
use crate::retry::RetryPolicy;
use crate::routing::Murmur3Token;
use crate::speculative_execution::SpeculativeExecutionPolicy;
use crate::transport::Connection;

/// Outcome of a single attempt, passed to [`ExecutableQuery::attempt`].
#[derive(Debug)]
pub struct AttemptInfo<'a> {
    pub host: &'a Arc<HostInfo>,
    /// 1-based attempt number within one execution.
    pub attempt: usize,
    pub start: Instant,
    pub end: Instant,
    pub error: Option<&'a Error>,
}

/// A logical query, which can be executed on any connection possibly many times.
pub trait ExecutableQuery<T: Connection>: Send + Sync {
    type Output: Send + 'static;

    /// Executes a single attempt on given connection.
    fn execute<'a>(
        &'a self,
        context: &'a QueryContext,
        connection: &'a T,
    ) -> BoxFuture<'a, Result<Self::Output>>;

    /// Observes every attempt which reached a connection.
    fn attempt(&self, _info: &AttemptInfo) {}

    /// Called before the query is handed to a concurrent execution.
    fn borrow_for_execution(&self) {}

    /// Called when an execution started with
    /// [`borrow_for_execution`](ExecutableQuery::borrow_for_execution) finishes.
    fn release_after_execution(&self) {}

    fn retry_policy(&self) -> Arc<dyn RetryPolicy + Send + Sync>;

    fn speculative_execution_policy(&self) -> Arc<dyn SpeculativeExecutionPolicy + Send + Sync>;

    fn is_idempotent(&self) -> bool;

    /// Conditional (lightweight transaction) queries use dedicated retry sessions.
    fn is_lwt(&self) -> bool {
        false
    }

    /// Targets the query at a specific host, bypassing host selection.
    fn host_id(&self) -> Option<Uuid> {
        None
    }

    fn keyspace(&self) -> Option<&str> {
        None
    }

    fn routing_token(&self) -> Option<Murmur3Token> {
        None
    }

    fn routing_key(&self) -> Option<&[u8]> {
        None
    }

    fn context(&self) -> QueryContext {
        QueryContext::background()
    }
}

/// Keeps a query borrowed for the lifetime of a concurrent execution.
pub(crate) struct ExecutionGuard<T: Connection, Q: ExecutableQuery<T>> {
    query: Arc<Q>,
    _connection: PhantomData<fn() -> T>,
}

impl<T: Connection, Q: ExecutableQuery<T>> ExecutionGuard<T, Q> {
    pub(crate) fn new(query: Arc<Q>) -> Self {
        query.borrow_for_execution();
        ExecutionGuard {
            query,
            _connection: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn query(&self) -> &Arc<Q> {
        &self.query
    }
}

impl<T: Connection, Q: ExecutableQuery<T>> Drop for ExecutionGuard<T, Q> {
    fn drop(&mut self) {
        self.query.release_after_execution();
    }
}
