//! Fake connections and connection managers shared by unit tests.

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use fxhash::FxHashMap;
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

use crate::cluster::{ConnectionManager, HostInfo, SystemRow};
use crate::error::{Error, Result};
use crate::routing::{ShardCount, ShardInfo};
use crate::transport::{Connection, ConnectionErrorHandler, SystemTable};

pub(crate) fn address(last_octet: u8) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, last_octet)), 9042)
}

pub(crate) fn host(last_octet: u8) -> Arc<HostInfo> {
    Arc::new(HostInfo::new(
        address(last_octet),
        Uuid::new_v4(),
        "dc1".into(),
        "r1".into(),
        vec![format!("{}", i64::from(last_octet) * 1000)],
    ))
}

pub(crate) struct FakeConnection {
    address: SocketAddr,
    closed: AtomicBool,
    shard_info: Option<ShardInfo>,
    peers_v2: bool,
    system_tables: FxHashMap<SystemTable, Result<Vec<SystemRow>>>,
    keyspace: Mutex<Option<String>>,
    sent: AtomicUsize,
}

impl FakeConnection {
    pub(crate) fn new(address: SocketAddr) -> Self {
        FakeConnection {
            address,
            closed: AtomicBool::new(false),
            shard_info: None,
            peers_v2: false,
            system_tables: Default::default(),
            keyspace: Default::default(),
            sent: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_shard(mut self, shard: u16, nr_shards: u16) -> Self {
        self.shard_info = ShardCount::new(nr_shards).map(|count| ShardInfo::new(shard, count, 0));
        self
    }

    pub(crate) fn with_peers_v2(mut self) -> Self {
        self.peers_v2 = true;
        self
    }

    pub(crate) fn with_system_table(
        mut self,
        table: SystemTable,
        rows: Result<Vec<SystemRow>>,
    ) -> Self {
        self.system_tables.insert(table, rows);
        self
    }

    pub(crate) fn keyspace(&self) -> Option<String> {
        self.keyspace.lock().unwrap().clone()
    }

    pub(crate) fn sent(&self) -> usize {
        self.sent.load(Ordering::Relaxed)
    }
}

impl Connection for FakeConnection {
    fn send<'a>(&'a self, request: &'a [u8]) -> BoxFuture<'a, Result<Bytes>> {
        async move {
            if self.is_closed() {
                return Err(Error::General("Connection closed".into()));
            }

            self.sent.fetch_add(1, Ordering::Relaxed);
            Ok(Bytes::copy_from_slice(request))
        }
        .boxed()
    }

    fn query_system(&self, table: SystemTable) -> BoxFuture<'_, Result<Vec<SystemRow>>> {
        let result = self
            .system_tables
            .get(&table)
            .cloned()
            .unwrap_or_else(|| Err(Error::General(format!("Unknown table: {table}"))));

        async move { result }.boxed()
    }

    fn use_keyspace<'a>(&'a self, keyspace: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            *self.keyspace.lock().unwrap() = Some(keyspace.to_string());
            Ok(())
        }
        .boxed()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn address(&self) -> SocketAddr {
        self.address
    }

    fn shard_info(&self) -> Option<ShardInfo> {
        self.shard_info
    }

    fn uses_peers_v2(&self) -> bool {
        self.peers_v2
    }
}

/// Connection manager with scripted dial failures.
#[derive(Default)]
pub(crate) struct FakeConnectionManager {
    dials: AtomicUsize,
    failures: Mutex<VecDeque<Error>>,
    always_fail: AtomicBool,
    slow_after: Option<(usize, Duration)>,
    nr_shards: Option<u16>,
}

impl FakeConnectionManager {
    pub(crate) fn new() -> Self {
        Default::default()
    }

    /// The next dials fail with given errors, in order.
    pub(crate) fn with_failures(self, failures: Vec<Error>) -> Self {
        *self.failures.lock().unwrap() = failures.into();
        self
    }

    /// Dials after the first `dials` ones take `delay` to complete.
    pub(crate) fn with_slow_dials_after(mut self, dials: usize, delay: Duration) -> Self {
        self.slow_after = Some((dials, delay));
        self
    }

    pub(crate) fn with_shards(mut self, nr_shards: u16) -> Self {
        self.nr_shards = Some(nr_shards);
        self
    }

    pub(crate) fn failing() -> Self {
        let manager = Self::new();
        manager.always_fail.store(true, Ordering::Relaxed);
        manager
    }

    pub(crate) fn set_failing(&self, always_fail: bool) {
        self.always_fail.store(always_fail, Ordering::Relaxed);
    }

    pub(crate) fn dials(&self) -> usize {
        self.dials.load(Ordering::Relaxed)
    }
}

impl ConnectionManager<FakeConnection> for FakeConnectionManager {
    fn connection(
        &self,
        addr: SocketAddr,
        _error_handler: Option<Arc<dyn ConnectionErrorHandler<FakeConnection>>>,
    ) -> BoxFuture<'_, Result<FakeConnection>> {
        let index = self.dials.fetch_add(1, Ordering::Relaxed);
        let failure = if self.always_fail.load(Ordering::Relaxed) {
            Some(Error::Io(std::io::ErrorKind::ConnectionRefused.into()))
        } else {
            self.failures.lock().unwrap().pop_front()
        };

        let delay = self
            .slow_after
            .filter(|(dials, _)| index >= *dials)
            .map(|(_, delay)| delay);

        async move {
            if let Some(delay) = delay {
                sleep(delay).await;
            }

            match failure {
                Some(error) => Err(error),
                None => {
                    let connection = FakeConnection::new(addr);
                    Ok(match self.nr_shards {
                        Some(nr_shards) => {
                            connection.with_shard((index % nr_shards as usize) as u16, nr_shards)
                        }
                        None => connection,
                    })
                }
            }
        }
        .boxed()
    }
}
