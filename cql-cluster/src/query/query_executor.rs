use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, Instant};
use tracing::*;

use crate::cluster::{ConnectionManager, PoolRegistry};
use crate::error::{Error, QueryError, Result};
use crate::load_balancing::{single_host, HostSelectionPolicy, HostStream, Request, SelectedHost};
use crate::query::executable_query::ExecutionGuard;
use crate::query::{AttemptInfo, ExecutableQuery};
use crate::retry::{QueryInfo, RetryDecision};
use crate::transport::Connection;

type SharedHostStream = Arc<Mutex<HostStream>>;

fn annotate(error: Error, potentially_executed: bool, idempotent: bool) -> Error {
    Error::Query(QueryError::annotate(error, potentially_executed, idempotent))
}

async fn next_host(hosts: &SharedHostStream) -> Option<Box<dyn SelectedHost>> {
    hosts.lock().await.next().await
}

/// Drives a query to a single result: picks hosts, retries failed attempts and races
/// speculative executions.
pub struct QueryExecutor<T: Connection + 'static, CM: ConnectionManager<T> + 'static> {
    registry: Arc<PoolRegistry<T, CM>>,
    host_selection_policy: Arc<dyn HostSelectionPolicy>,
}

impl<T: Connection + 'static, CM: ConnectionManager<T> + 'static> QueryExecutor<T, CM> {
    pub fn new(
        registry: Arc<PoolRegistry<T, CM>>,
        host_selection_policy: Arc<dyn HostSelectionPolicy>,
    ) -> Self {
        QueryExecutor {
            registry,
            host_selection_policy,
        }
    }

    #[inline]
    pub fn registry(&self) -> &Arc<PoolRegistry<T, CM>> {
        &self.registry
    }

    /// Executes given query. Errors are always [`Error::Query`], telling if the query might
    /// have been executed despite the failure.
    pub async fn execute_query<Q: ExecutableQuery<T> + 'static>(
        &self,
        query: Arc<Q>,
    ) -> Result<Q::Output> {
        let idempotent = query.is_idempotent();

        let (hosts, targeted) = match query.host_id() {
            Some(host_id) => {
                let pool = self
                    .registry
                    .pool_by_host_id(host_id)
                    .ok_or_else(|| annotate(Error::NoPool(host_id.to_string()), false, idempotent))?;

                if pool.size() == 0 {
                    return Err(annotate(
                        Error::NoConnectionsInPool(pool.address().to_string()),
                        false,
                        idempotent,
                    ));
                }

                (single_host(pool.host().clone(), query.routing_token()), true)
            }
            None => {
                let request = Request::new(
                    query.keyspace(),
                    query.routing_token(),
                    query.routing_key(),
                );

                (self.host_selection_policy.pick(&request), false)
            }
        };

        let hosts = Arc::new(Mutex::new(hosts));
        let speculative_execution_policy = query.speculative_execution_policy();
        let attempts = speculative_execution_policy.attempts();

        if !idempotent || targeted || attempts == 0 {
            let context = query.context();
            return tokio::select! {
                result = Self::run_attempts(self.registry.clone(), query, hosts) => result,
                error = context.done() => Err(annotate(error, true, idempotent)),
            };
        }

        self.speculate(query, hosts, attempts, speculative_execution_policy.delay())
            .await
    }

    async fn speculate<Q: ExecutableQuery<T> + 'static>(
        &self,
        query: Arc<Q>,
        hosts: SharedHostStream,
        attempts: usize,
        delay: Duration,
    ) -> Result<Q::Output> {
        let context = query.context();
        let idempotent = query.is_idempotent();
        let (results, mut receiver) = mpsc::channel(1);

        self.spawn_execution(&query, &hosts, &results);

        let mut launched = 0;
        let ticker = sleep(delay);
        tokio::pin!(ticker);

        loop {
            tokio::select! {
                Some(result) = receiver.recv() => return result,
                _ = &mut ticker, if launched < attempts => {
                    launched += 1;
                    debug!(execution = launched, "Starting speculative execution.");

                    self.spawn_execution(&query, &hosts, &results);
                    ticker.as_mut().reset(Instant::now() + delay);
                }
                error = context.done() => return Err(annotate(error, true, idempotent)),
            }
        }
    }

    fn spawn_execution<Q: ExecutableQuery<T> + 'static>(
        &self,
        query: &Arc<Q>,
        hosts: &SharedHostStream,
        results: &mpsc::Sender<Result<Q::Output>>,
    ) {
        let guard = ExecutionGuard::<T, Q>::new(query.clone());
        let registry = self.registry.clone();
        let hosts = hosts.clone();
        let results = results.clone();

        // executions which lost the race run to completion and their results are dropped
        tokio::spawn(async move {
            let result = Self::run_attempts(registry, guard.query().clone(), hosts).await;
            let _ = results.try_send(result);
            drop(guard);
        });
    }

    fn connection(
        registry: &Arc<PoolRegistry<T, CM>>,
        host: &dyn SelectedHost,
    ) -> Result<Arc<T>> {
        let info = host.info();
        if !info.is_up() {
            return Err(Error::HostDown);
        }

        let address = info.connect_address();
        let pool = match registry.pool(address) {
            Some(pool) => pool,
            None => {
                let registry = registry.clone();
                let info = info.clone();
                tokio::spawn(async move { registry.add_host(info).await });

                return Err(Error::NoPool(address.to_string()));
            }
        };

        pool.pick(host.token())
            .ok_or_else(|| Error::NoConnectionsInPool(address.to_string()))
    }

    async fn run_attempts<Q: ExecutableQuery<T>>(
        registry: Arc<PoolRegistry<T, CM>>,
        query: Arc<Q>,
        hosts: SharedHostStream,
    ) -> Result<Q::Output> {
        let context = query.context();
        let idempotent = query.is_idempotent();
        let retry_policy = query.retry_policy();

        let lwt_session = if query.is_lwt() {
            retry_policy.new_lwt_session()
        } else {
            None
        };

        let mut session = match lwt_session {
            Some(session) => session,
            None => retry_policy.new_session(),
        };

        let mut potentially_executed = false;
        let mut last_error = None;
        let mut attempt = 0;
        let mut selected = next_host(&hosts).await;

        while let Some(host) = &selected {
            let connection = match Self::connection(&registry, host.as_ref()) {
                Ok(connection) => connection,
                Err(error) => {
                    debug!(address = %host.info().connect_address(), %error, "Skipping host.");

                    // errors of actual attempts take precedence
                    last_error.get_or_insert(error);
                    selected = next_host(&hosts).await;
                    continue;
                }
            };

            attempt += 1;

            let start = Instant::now();
            let result = query.execute(&context, connection.as_ref()).await;
            query.attempt(&AttemptInfo {
                host: host.info(),
                attempt,
                start,
                end: Instant::now(),
                error: result.as_ref().err(),
            });

            let error = match result {
                Ok(output) => {
                    host.mark(None);
                    return Ok(output);
                }
                Err(error) => error,
            };

            potentially_executed |= error.is_potentially_executed();

            let decision = if error.is_cancellation() {
                host.mark(None);
                potentially_executed = true;
                RetryDecision::Rethrow
            } else {
                host.mark(Some(&error));

                if !session.attempt() {
                    return Err(annotate(error, potentially_executed, idempotent));
                }

                session.decide(QueryInfo {
                    error: &error,
                    is_idempotent: idempotent,
                })
            };

            match decision {
                RetryDecision::Retry => {
                    debug!(address = %connection.address(), %error, "Retrying on the same host.");
                    last_error = Some(error);
                }
                RetryDecision::RetryNextHost => {
                    debug!(address = %connection.address(), %error, "Retrying on the next host.");
                    last_error = Some(error);
                    selected = next_host(&hosts).await;
                }
                RetryDecision::Rethrow | RetryDecision::Ignore => {
                    return Err(annotate(error, potentially_executed, idempotent));
                }
            }
        }

        Err(annotate(
            last_error.unwrap_or(Error::NoHostsAvailable),
            potentially_executed,
            idempotent,
        ))
    }
}

#[cfg(test)]
mod tests {
    use futures::future::BoxFuture;
    use futures::stream;
    use futures::FutureExt;
    use std::collections::VecDeque;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::broadcast;
    use uuid::Uuid;

    use super::*;
    use crate::cluster::{ConnectionPoolConfig, ConnectionPoolFactory, HostInfo, KeyspaceHolder};
    use crate::query::QueryContext;
    use crate::retry::{
        ConstantReconnectionPolicy, MockRetryPolicy, RetryPolicy, RetrySession,
        SimpleConvictionPolicy, SimpleRetryPolicy,
    };
    use crate::speculative_execution::{
        ConstantSpeculativeExecutionPolicy, NonSpeculativeExecutionPolicy,
        SpeculativeExecutionPolicy,
    };
    use crate::test_utils::{address, host, FakeConnection, FakeConnectionManager};

    type TestRegistry = PoolRegistry<FakeConnection, FakeConnectionManager>;
    type TestExecutor = QueryExecutor<FakeConnection, FakeConnectionManager>;

    struct TestHost {
        info: Arc<HostInfo>,
        marks: Arc<StdMutex<Vec<(SocketAddr, bool)>>>,
    }

    impl SelectedHost for TestHost {
        fn info(&self) -> &Arc<HostInfo> {
            &self.info
        }

        fn token(&self) -> Option<crate::routing::Murmur3Token> {
            None
        }

        fn mark(&self, error: Option<&Error>) {
            self.marks
                .lock()
                .unwrap()
                .push((self.info.connect_address(), error.is_none()));
        }
    }

    /// Yields hosts in order and records feedback.
    #[derive(Default)]
    struct TestPolicy {
        hosts: Vec<Arc<HostInfo>>,
        picks: AtomicUsize,
        marks: Arc<StdMutex<Vec<(SocketAddr, bool)>>>,
    }

    impl TestPolicy {
        fn new(hosts: Vec<Arc<HostInfo>>) -> Self {
            TestPolicy {
                hosts,
                ..Default::default()
            }
        }

        fn marks(&self) -> Vec<(SocketAddr, bool)> {
            self.marks.lock().unwrap().clone()
        }
    }

    impl HostSelectionPolicy for TestPolicy {
        fn pick(&self, _request: &Request) -> HostStream {
            self.picks.fetch_add(1, Ordering::Relaxed);

            let marks = self.marks.clone();
            let hosts = self.hosts.clone();
            stream::iter(hosts.into_iter().map(move |info| {
                Box::new(TestHost {
                    info,
                    marks: marks.clone(),
                }) as Box<dyn SelectedHost>
            }))
            .boxed()
        }
    }

    /// Retry session returning scripted decisions.
    struct ScriptedSession(VecDeque<RetryDecision>);

    impl RetrySession for ScriptedSession {
        fn decide(&mut self, _query_info: QueryInfo) -> RetryDecision {
            self.0.pop_front().unwrap_or(RetryDecision::Rethrow)
        }
    }

    fn scripted(decisions: Vec<RetryDecision>) -> Box<dyn RetrySession + Send + Sync> {
        Box::new(ScriptedSession(decisions.into()))
    }

    struct TestQuery {
        idempotent: bool,
        lwt: bool,
        host_id: Option<Uuid>,
        delay: Duration,
        context: QueryContext,
        retry_policy: Arc<dyn RetryPolicy + Send + Sync>,
        speculative_execution_policy: Arc<dyn SpeculativeExecutionPolicy + Send + Sync>,
        failures: StdMutex<VecDeque<Error>>,
        running: AtomicUsize,
        max_running: AtomicUsize,
        borrowed: AtomicUsize,
        released: AtomicUsize,
        attempts: StdMutex<Vec<(usize, SocketAddr, bool)>>,
    }

    impl TestQuery {
        fn new() -> Self {
            TestQuery {
                idempotent: true,
                lwt: false,
                host_id: None,
                delay: Duration::ZERO,
                context: QueryContext::background(),
                retry_policy: Arc::new(SimpleRetryPolicy::new(3)),
                speculative_execution_policy: Arc::new(NonSpeculativeExecutionPolicy),
                failures: Default::default(),
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
                borrowed: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
                attempts: Default::default(),
            }
        }

        fn with_failures(self, failures: Vec<Error>) -> Self {
            *self.failures.lock().unwrap() = failures.into();
            self
        }

        fn attempts(&self) -> Vec<(usize, SocketAddr, bool)> {
            self.attempts.lock().unwrap().clone()
        }
    }

    impl ExecutableQuery<FakeConnection> for TestQuery {
        type Output = SocketAddr;

        fn execute<'a>(
            &'a self,
            context: &'a QueryContext,
            connection: &'a FakeConnection,
        ) -> BoxFuture<'a, Result<SocketAddr>> {
            async move {
                let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_running.fetch_max(running, Ordering::SeqCst);

                let result = tokio::select! {
                    _ = sleep(self.delay) => {
                        let failure = self.failures.lock().unwrap().pop_front();
                        match failure {
                            Some(error) => Err(error),
                            None => Ok(connection.address()),
                        }
                    }
                    error = context.done() => Err(error),
                };

                self.running.fetch_sub(1, Ordering::SeqCst);
                result
            }
            .boxed()
        }

        fn attempt(&self, info: &AttemptInfo) {
            assert!(info.start <= info.end);
            self.attempts.lock().unwrap().push((
                info.attempt,
                info.host.connect_address(),
                info.error.is_none(),
            ));
        }

        fn borrow_for_execution(&self) {
            self.borrowed.fetch_add(1, Ordering::SeqCst);
        }

        fn release_after_execution(&self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }

        fn retry_policy(&self) -> Arc<dyn RetryPolicy + Send + Sync> {
            self.retry_policy.clone()
        }

        fn speculative_execution_policy(
            &self,
        ) -> Arc<dyn SpeculativeExecutionPolicy + Send + Sync> {
            self.speculative_execution_policy.clone()
        }

        fn is_idempotent(&self) -> bool {
            self.idempotent
        }

        fn is_lwt(&self) -> bool {
            self.lwt
        }

        fn host_id(&self) -> Option<Uuid> {
            self.host_id
        }

        fn context(&self) -> QueryContext {
            self.context.clone()
        }
    }

    fn registry() -> Arc<TestRegistry> {
        let (event_sender, _) = broadcast::channel(16);
        let factory = ConnectionPoolFactory::new(
            ConnectionPoolConfig::new(1, None),
            Arc::new(FakeConnectionManager::new()),
            Arc::new(KeyspaceHolder::default()),
            Arc::new(ConstantReconnectionPolicy::new(1, Duration::ZERO)),
            Arc::new(SimpleConvictionPolicy),
            event_sender,
        );

        Arc::new(PoolRegistry::new(factory))
    }

    async fn executor(hosts: &[Arc<HostInfo>]) -> (TestExecutor, Arc<TestPolicy>) {
        let registry = registry();
        registry.set_hosts(hosts).await;

        let policy = Arc::new(TestPolicy::new(hosts.to_vec()));
        (QueryExecutor::new(registry, policy.clone()), policy)
    }

    fn inner(error: &Error) -> &Error {
        match error {
            Error::Query(error) => &error.error,
            error => panic!("Unannotated error: {error}"),
        }
    }

    fn io_error() -> Error {
        Error::Io(std::io::ErrorKind::ConnectionReset.into())
    }

    #[tokio::test]
    async fn should_execute_on_first_host() {
        let (executor, policy) = executor(&[host(1), host(2)]).await;
        let query = Arc::new(TestQuery::new());

        let result = executor.execute_query(query.clone()).await.unwrap();

        assert_eq!(result, address(1));
        assert_eq!(query.attempts(), vec![(1, address(1), true)]);
        assert_eq!(policy.marks(), vec![(address(1), true)]);
    }

    #[tokio::test]
    async fn should_retry_on_next_host() {
        let (executor, policy) = executor(&[host(1), host(2)]).await;
        let query = Arc::new(TestQuery::new().with_failures(vec![io_error()]));

        let result = executor.execute_query(query.clone()).await.unwrap();

        assert_eq!(result, address(2));
        assert_eq!(
            query.attempts(),
            vec![(1, address(1), false), (2, address(2), true)]
        );
        assert_eq!(
            policy.marks(),
            vec![(address(1), false), (address(2), true)]
        );
    }

    #[tokio::test]
    async fn should_retry_on_same_host() {
        let (executor, _) = executor(&[host(1), host(2)]).await;

        let mut retry_policy = MockRetryPolicy::new();
        retry_policy
            .expect_new_session()
            .times(1)
            .returning(|| scripted(vec![RetryDecision::Retry, RetryDecision::Retry]));

        let mut query = TestQuery::new().with_failures(vec![io_error(), io_error()]);
        query.retry_policy = Arc::new(retry_policy);
        let query = Arc::new(query);

        let result = executor.execute_query(query.clone()).await.unwrap();

        assert_eq!(result, address(1));
        assert_eq!(
            query.attempts(),
            vec![
                (1, address(1), false),
                (2, address(1), false),
                (3, address(1), true)
            ]
        );
    }

    #[tokio::test]
    async fn should_rethrow_annotated_error() {
        let (executor, _) = executor(&[host(1), host(2)]).await;

        let mut retry_policy = MockRetryPolicy::new();
        retry_policy
            .expect_new_session()
            .returning(|| scripted(vec![RetryDecision::Rethrow]));

        let mut query = TestQuery::new().with_failures(vec![io_error()]);
        query.retry_policy = Arc::new(retry_policy);
        query.idempotent = false;
        let query = Arc::new(query);

        let error = executor.execute_query(query.clone()).await.unwrap_err();

        assert!(matches!(inner(&error), Error::Io(_)));
        assert!(!error.is_potentially_executed());
        assert_eq!(query.attempts().len(), 1);
    }

    #[tokio::test]
    async fn should_stop_when_retries_are_exhausted() {
        let (executor, _) = executor(&[host(1), host(2), host(3)]).await;

        let mut query = TestQuery::new().with_failures(vec![io_error(), io_error()]);
        query.retry_policy = Arc::new(SimpleRetryPolicy::new(1));
        let query = Arc::new(query);

        let error = executor.execute_query(query.clone()).await.unwrap_err();

        assert!(matches!(inner(&error), Error::Io(_)));
        assert_eq!(query.attempts().len(), 2);
    }

    #[tokio::test]
    async fn should_stop_on_ignore() {
        let (executor, policy) = executor(&[host(1), host(2)]).await;

        let mut retry_policy = MockRetryPolicy::new();
        retry_policy
            .expect_new_session()
            .times(1)
            .returning(|| scripted(vec![RetryDecision::Ignore]));

        let mut query = TestQuery::new().with_failures(vec![io_error()]);
        query.retry_policy = Arc::new(retry_policy);
        let query = Arc::new(query);

        let error = executor.execute_query(query.clone()).await.unwrap_err();

        assert!(matches!(inner(&error), Error::Io(_)));
        assert!(matches!(&error, Error::Query(error) if error.idempotent));
        assert_eq!(query.attempts(), vec![(1, address(1), false)]);
        assert_eq!(policy.marks(), vec![(address(1), false)]);
    }

    #[tokio::test]
    async fn should_return_attempt_error_over_skipped_hosts() {
        let (executor, _) = executor(&[host(1)]).await;
        let down = Arc::new(
            HostInfo::new(address(2), Uuid::new_v4(), "dc1".into(), "r1".into(), vec![])
                .with_state(crate::cluster::HostState::Down),
        );
        let pooled = executor.registry().pool(address(1)).unwrap().host().clone();
        let executor = QueryExecutor::new(
            executor.registry().clone(),
            Arc::new(TestPolicy::new(vec![pooled, down])),
        );

        let query = Arc::new(TestQuery::new().with_failures(vec![io_error()]));

        let error = executor.execute_query(query.clone()).await.unwrap_err();

        assert!(matches!(inner(&error), Error::Io(_)));
        assert_eq!(query.attempts(), vec![(1, address(1), false)]);
    }

    #[tokio::test]
    async fn should_use_lwt_session_for_lwt_queries() {
        let (executor, _) = executor(&[host(1), host(2)]).await;

        let mut retry_policy = MockRetryPolicy::new();
        retry_policy.expect_new_session().never();
        retry_policy
            .expect_new_lwt_session()
            .times(1)
            .returning(|| Some(scripted(vec![RetryDecision::Rethrow])));

        let mut query = TestQuery::new().with_failures(vec![io_error()]);
        query.retry_policy = Arc::new(retry_policy);
        query.idempotent = false;
        query.lwt = true;
        let query = Arc::new(query);

        let error = executor.execute_query(query.clone()).await.unwrap_err();

        assert!(matches!(inner(&error), Error::Io(_)));
        assert_eq!(query.attempts(), vec![(1, address(1), false)]);
    }

    #[tokio::test]
    async fn should_fail_without_hosts() {
        let (executor, _) = executor(&[]).await;

        let error = executor
            .execute_query(Arc::new(TestQuery::new()))
            .await
            .unwrap_err();

        assert!(matches!(inner(&error), Error::NoHostsAvailable));
    }

    #[tokio::test]
    async fn should_skip_hosts_without_pool() {
        let (executor, policy) = executor(&[host(1)]).await;
        let unpooled = host(9);
        let policy = Arc::new(TestPolicy::new(vec![unpooled.clone(), policy.hosts[0].clone()]));
        let executor = QueryExecutor::new(executor.registry().clone(), policy.clone());
        let query = Arc::new(TestQuery::new());

        let result = executor.execute_query(query.clone()).await.unwrap();

        assert_eq!(result, address(1));
        assert_eq!(query.attempts().len(), 1);
        assert_eq!(policy.marks(), vec![(address(1), true)]);

        // the pool is created lazily
        sleep(Duration::from_millis(50)).await;
        assert!(executor.registry().pool(unpooled.connect_address()).is_some());
    }

    #[tokio::test]
    async fn should_report_last_skip_reason() {
        let (executor, _) = executor(&[]).await;
        let down = Arc::new(
            HostInfo::new(address(1), Uuid::new_v4(), "dc1".into(), "r1".into(), vec![])
                .with_state(crate::cluster::HostState::Down),
        );
        let executor = QueryExecutor::new(
            executor.registry().clone(),
            Arc::new(TestPolicy::new(vec![down])),
        );

        let error = executor
            .execute_query(Arc::new(TestQuery::new()))
            .await
            .unwrap_err();

        assert!(matches!(inner(&error), Error::HostDown));
    }

    #[tokio::test]
    async fn should_fail_fast_for_unknown_target_host() {
        let (executor, policy) = executor(&[host(1)]).await;

        let mut query = TestQuery::new();
        query.host_id = Some(Uuid::new_v4());

        let error = executor.execute_query(Arc::new(query)).await.unwrap_err();

        assert!(matches!(inner(&error), Error::NoPool(_)));
        assert_eq!(policy.picks.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn should_fail_fast_for_unconnected_target_host() {
        let target = host(1);
        let (executor, policy) = executor(&[target.clone()]).await;

        let pool = executor.registry().pool(target.connect_address()).unwrap();
        let connection = pool.pick(None).unwrap();
        connection.close();
        pool.handle_error(&connection, &io_error(), true);

        let mut query = TestQuery::new();
        query.host_id = Some(target.host_id());
        let query = Arc::new(query);

        let error = executor.execute_query(query.clone()).await.unwrap_err();

        assert!(matches!(inner(&error), Error::NoConnectionsInPool(_)));
        assert!(!error.is_potentially_executed());
        assert_eq!(policy.picks.load(Ordering::Relaxed), 0);
        assert!(policy.marks().is_empty());
        assert!(query.attempts().is_empty());
    }

    #[tokio::test]
    async fn should_execute_on_target_host() {
        let target = host(2);
        let (executor, policy) = executor(&[host(1), target.clone()]).await;

        let mut query = TestQuery::new();
        query.host_id = Some(target.host_id());

        let result = executor.execute_query(Arc::new(query)).await.unwrap();

        assert_eq!(result, address(2));
        assert_eq!(policy.picks.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn should_limit_speculative_executions() {
        let hosts: Vec<_> = (1..=5).map(host).collect();
        let (executor, _) = executor(&hosts).await;

        let mut query = TestQuery::new();
        query.delay = Duration::from_millis(100);
        query.speculative_execution_policy = Arc::new(ConstantSpeculativeExecutionPolicy::new(
            2,
            Duration::from_millis(10),
        ));
        let query = Arc::new(query);

        let result = executor.execute_query(query.clone()).await.unwrap();

        assert_eq!(result, address(1));
        assert_eq!(query.max_running.load(Ordering::SeqCst), 3);
        assert_eq!(query.borrowed.load(Ordering::SeqCst), 3);

        sleep(Duration::from_millis(200)).await;

        assert_eq!(query.released.load(Ordering::SeqCst), 3);
        assert_eq!(query.attempts().len(), 3);
    }

    #[tokio::test]
    async fn should_not_speculate_non_idempotent_queries() {
        let (executor, _) = executor(&[host(1), host(2)]).await;

        let mut speculative_execution_policy =
            crate::speculative_execution::MockSpeculativeExecutionPolicy::new();
        speculative_execution_policy
            .expect_attempts()
            .return_const(2usize);
        speculative_execution_policy.expect_delay().never();

        let mut query = TestQuery::new();
        query.idempotent = false;
        query.delay = Duration::from_millis(50);
        query.speculative_execution_policy = Arc::new(speculative_execution_policy);
        let query = Arc::new(query);

        executor.execute_query(query.clone()).await.unwrap();

        assert_eq!(query.max_running.load(Ordering::SeqCst), 1);
        assert_eq!(query.borrowed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn should_mark_cancelled_speculative_query_as_potentially_executed() {
        let (executor, _) = executor(&[host(1), host(2)]).await;
        let (context, canceller) = QueryContext::with_cancel();

        let mut query = TestQuery::new();
        query.delay = Duration::from_secs(5);
        query.context = context;
        query.speculative_execution_policy = Arc::new(ConstantSpeculativeExecutionPolicy::new(
            1,
            Duration::from_millis(10),
        ));
        let query = Arc::new(query);

        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let error = executor.execute_query(query.clone()).await.unwrap_err();

        assert!(error.is_cancellation());
        assert!(error.is_potentially_executed());

        // attempts observe the cancellation too
        sleep(Duration::from_millis(50)).await;
        assert_eq!(query.borrowed.load(Ordering::SeqCst), 2);
        assert_eq!(query.released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn should_mark_cancelled_query_as_potentially_executed() {
        let (executor, _) = executor(&[host(1)]).await;

        let mut query = TestQuery::new();
        query.idempotent = false;
        query.delay = Duration::from_secs(5);
        query.context = QueryContext::background().with_timeout(Duration::from_millis(20));

        let error = executor.execute_query(Arc::new(query)).await.unwrap_err();

        assert!(matches!(inner(&error), Error::DeadlineExceeded));
        assert!(error.is_potentially_executed());
        assert!(!matches!(&error, Error::Query(error) if error.idempotent));
    }
}
