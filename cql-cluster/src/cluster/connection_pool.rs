use futures::future::join_all;
use rand::{rng, Rng};
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::*;

use crate::cluster::connection_manager::new_connection;
use crate::cluster::connection_picker::PickerState;
use crate::cluster::{ConnectionManager, HostInfo, KeyspaceHolder};
use crate::error::{Error, Result};
use crate::events::HostEvent;
use crate::retry::{ConvictionPolicy, ReconnectionPolicy};
use crate::routing::Murmur3Token;
use crate::transport::{Connection, ConnectionErrorHandler};

const DEFAULT_POOL_SIZE: usize = 2;

const FILL_BACKOFF_MIN_MILLIS: u64 = 31;
const FILL_BACKOFF_JITTER_MILLIS: u64 = 100;

fn fill_backoff() -> Duration {
    Duration::from_millis(
        FILL_BACKOFF_MIN_MILLIS + rng().random_range(0..FILL_BACKOFF_JITTER_MILLIS),
    )
}

fn log_connect_error(address: SocketAddr, error: &Error) {
    // refused connections are typical during node outages
    if error.is_dial_refusal() {
        debug!(?address, %error, "Unable to dial host.");
    } else {
        error!(?address, %error, "Failed to connect to host!");
    }
}

/// Configuration for host connection pools. Shard-aware hosts ignore the size and keep one
/// connection per shard instead.
#[derive(Clone, Copy, Debug)]
pub struct ConnectionPoolConfig {
    size: usize,
    connect_timeout: Option<Duration>,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        ConnectionPoolConfig {
            size: DEFAULT_POOL_SIZE,
            connect_timeout: None,
        }
    }
}

impl ConnectionPoolConfig {
    /// Creates a new configuration for a pool of given size, with optional connect timeout.
    pub fn new(size: usize, connect_timeout: Option<Duration>) -> Self {
        assert!(size > 0);
        ConnectionPoolConfig {
            size,
            connect_timeout,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }
}

/// Creates pools sharing the same connection manager, policies and event channel.
pub struct ConnectionPoolFactory<T: Connection + 'static, CM: ConnectionManager<T> + 'static> {
    config: ConnectionPoolConfig,
    connection_manager: Arc<CM>,
    keyspace_holder: Arc<KeyspaceHolder>,
    reconnection_policy: Arc<dyn ReconnectionPolicy + Send + Sync>,
    conviction_policy: Arc<dyn ConvictionPolicy + Send + Sync>,
    event_sender: broadcast::Sender<HostEvent>,
    _transport: PhantomData<T>,
}

impl<T: Connection + 'static, CM: ConnectionManager<T> + 'static> ConnectionPoolFactory<T, CM> {
    pub fn new(
        config: ConnectionPoolConfig,
        connection_manager: Arc<CM>,
        keyspace_holder: Arc<KeyspaceHolder>,
        reconnection_policy: Arc<dyn ReconnectionPolicy + Send + Sync>,
        conviction_policy: Arc<dyn ConvictionPolicy + Send + Sync>,
        event_sender: broadcast::Sender<HostEvent>,
    ) -> Self {
        ConnectionPoolFactory {
            config,
            connection_manager,
            keyspace_holder,
            reconnection_policy,
            conviction_policy,
            event_sender,
            _transport: Default::default(),
        }
    }

    #[inline]
    pub fn connection_manager(&self) -> &CM {
        self.connection_manager.as_ref()
    }

    /// Subscribes to host events raised by pools created by this factory.
    #[inline]
    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.event_sender.subscribe()
    }

    /// Creates a new, empty pool. No connections are established until the pool is filled.
    pub fn create(&self, host: Arc<HostInfo>) -> Arc<HostConnectionPool<T, CM>> {
        Arc::new(HostConnectionPool {
            state: RwLock::new(PoolState {
                picker: PickerState::new(self.config.size),
                closed: false,
                filling: false,
            }),
            host,
            config: self.config,
            connection_manager: self.connection_manager.clone(),
            keyspace_holder: self.keyspace_holder.clone(),
            reconnection_policy: self.reconnection_policy.clone(),
            conviction_policy: self.conviction_policy.clone(),
            event_sender: self.event_sender.clone(),
        })
    }
}

struct PoolState<T: Connection> {
    picker: PickerState<T>,
    closed: bool,
    filling: bool,
}

/// Live connections to a single host. The pool fills itself in the background whenever it
/// notices missing connections and reports host availability changes through [`HostEvent`]s.
pub struct HostConnectionPool<T: Connection + 'static, CM: ConnectionManager<T> + 'static> {
    state: RwLock<PoolState<T>>,
    host: Arc<HostInfo>,
    config: ConnectionPoolConfig,
    connection_manager: Arc<CM>,
    keyspace_holder: Arc<KeyspaceHolder>,
    reconnection_policy: Arc<dyn ReconnectionPolicy + Send + Sync>,
    conviction_policy: Arc<dyn ConvictionPolicy + Send + Sync>,
    event_sender: broadcast::Sender<HostEvent>,
}

impl<T: Connection + 'static, CM: ConnectionManager<T> + 'static> HostConnectionPool<T, CM> {
    #[inline]
    pub fn host(&self) -> &Arc<HostInfo> {
        &self.host
    }

    #[inline]
    pub fn address(&self) -> SocketAddr {
        self.host.connect_address()
    }

    /// Returns the number of live connections.
    pub fn size(&self) -> usize {
        self.state.read().unwrap().picker.size().0
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.state.read().unwrap().closed
    }

    /// Picks a connection for given routing token. Never waits for connections to be
    /// established: missing connections are filled in the background and `None` is returned if
    /// there are no connections at all.
    pub fn pick(self: &Arc<Self>, token: Option<Murmur3Token>) -> Option<Arc<T>> {
        let (connection, current, should_fill) = {
            let state = self.state.read().unwrap();
            if state.closed {
                return None;
            }

            let (current, missing) = state.picker.size();
            (state.picker.pick(token), current, missing > 0 && !state.filling)
        };

        if should_fill {
            let pool = self.clone();
            tokio::spawn(async move { pool.fill().await });
        }

        if current == 0 {
            return None;
        }

        connection
    }

    /// Fills the pool up to its target size. Only one fill runs at a time; concurrent calls
    /// return immediately. When the pool is empty, the first connection is established before
    /// returning and the rest are established in the background.
    pub async fn fill(self: &Arc<Self>) {
        {
            let state = self.state.read().unwrap();
            if state.closed || state.filling || state.picker.size().1 == 0 {
                return;
            }
        }

        let start_count = {
            let mut state = self.state.write().unwrap();
            let (current, missing) = state.picker.size();
            if state.closed || state.filling || missing == 0 {
                return;
            }

            state.filling = true;
            current
        };

        if start_count == 0 {
            match self.connect().await {
                Ok(true) => {}
                Ok(false) => {
                    // closed while connecting
                    self.state.write().unwrap().filling = false;
                    return;
                }
                Err(error) => {
                    self.first_connection_failed(error);
                    return;
                }
            }

            self.conviction_policy.reset(&self.host);
            self.host.mark_up();
        }

        // the picker might have been initialized with a different target size
        let fill_count = self.state.read().unwrap().picker.size().1;

        let pool = self.clone();
        tokio::spawn(async move { pool.fill_remaining(fill_count, start_count == 0).await });
    }

    /// Handles an error reported by one of the pool connections. Only closed connections are
    /// removed; the next pick notices the missing capacity and refills the pool.
    pub fn handle_error(&self, connection: &T, error: &Error, closed: bool) {
        if !closed {
            debug!(address = ?self.address(), %error, "Connection error.");
            return;
        }

        let mut state = self.state.write().unwrap();
        if state.closed {
            return;
        }

        debug!(address = ?self.address(), %error, "Removing closed connection.");
        state.picker.remove(connection);
    }

    /// Closes the pool and all its connections. Subsequent calls have no effect.
    pub fn close(&self) {
        let mut state = self.state.write().unwrap();
        if state.closed {
            return;
        }

        debug!(address = ?self.address(), "Closing pool.");

        state.closed = true;
        state.picker.close();
    }

    fn first_connection_failed(self: &Arc<Self>, error: Error) {
        log_connect_error(self.address(), &error);

        let pool = self.clone();
        tokio::spawn(async move { pool.stop_filling(true).await });

        if self.conviction_policy.add_failure(&error, &self.host) {
            warn!(address = ?self.address(), "Marking host down.");
            self.host.mark_down();
            self.send_event(HostEvent::Down(self.address()));
        }
    }

    async fn fill_remaining(self: Arc<Self>, count: usize, from_empty: bool) {
        let results = join_all((0..count).map(|_| self.connect())).await;

        let mut had_error = false;
        for error in results.into_iter().filter_map(|result| result.err()) {
            log_connect_error(self.address(), &error);
            had_error = true;
        }

        if from_empty && !self.is_closed() {
            debug!(address = ?self.address(), size = self.size(), "Host connected.");
            self.send_event(HostEvent::Up(self.address()));
        }

        self.stop_filling(had_error).await;
    }

    async fn stop_filling(&self, had_error: bool) {
        if had_error {
            // give the host some time to recover before the next fill
            sleep(fill_backoff()).await;
        }

        self.state.write().unwrap().filling = false;
    }

    /// Establishes a new connection and installs it in the picker. Returns `false` if the pool
    /// got closed and the connection was discarded.
    async fn connect(self: &Arc<Self>) -> Result<bool> {
        if self.is_closed() {
            return Ok(false);
        }

        let address = self.address();
        let max_retries = self.reconnection_policy.max_retries().max(1);

        let mut attempt = 0;
        let connection = loop {
            let error_handler: Arc<dyn ConnectionErrorHandler<T>> = Arc::new(PoolErrorHandler {
                pool: Arc::downgrade(self),
            });

            match new_connection(
                self.connection_manager.as_ref(),
                address,
                self.config.connect_timeout,
                Some(error_handler),
            )
            .await
            {
                Ok(connection) => break connection,
                Err(error) => {
                    attempt += 1;
                    if attempt >= max_retries || error.is_permanent_network_error() {
                        return Err(error);
                    }

                    debug!(?address, %error, attempt, "Connection failed, reconnecting.");
                    sleep(self.reconnection_policy.interval(attempt - 1)).await;
                }
            }
        };

        if let Some(keyspace) = self.keyspace_holder.keyspace() {
            if let Err(error) = connection.use_keyspace(&keyspace).await {
                connection.close();
                return Err(error);
            }
        }

        let connection = Arc::new(connection);

        let mut state = self.state.write().unwrap();
        if state.closed {
            connection.close();
            return Ok(false);
        }

        state.picker.put(connection);
        Ok(true)
    }

    #[inline]
    fn send_event(&self, event: HostEvent) {
        // nobody might be listening
        let _ = self.event_sender.send(event);
    }
}

struct PoolErrorHandler<T: Connection + 'static, CM: ConnectionManager<T> + 'static> {
    pool: Weak<HostConnectionPool<T, CM>>,
}

impl<T: Connection + 'static, CM: ConnectionManager<T> + 'static> ConnectionErrorHandler<T>
    for PoolErrorHandler<T, CM>
{
    fn handle_error(&self, connection: &T, error: &Error, closed: bool) {
        if let Some(pool) = self.pool.upgrade() {
            pool.handle_error(connection, error, closed);
        }
    }
}
