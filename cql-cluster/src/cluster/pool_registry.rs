use fxhash::{FxHashMap, FxHashSet};
use itertools::Itertools;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::*;
use uuid::Uuid;

use crate::cluster::{ConnectionManager, ConnectionPoolFactory, HostConnectionPool, HostInfo};
use crate::events::HostEvent;
use crate::transport::Connection;

struct Pools<T: Connection + 'static, CM: ConnectionManager<T> + 'static> {
    by_address: FxHashMap<SocketAddr, Arc<HostConnectionPool<T, CM>>>,
    by_host_id: FxHashMap<Uuid, SocketAddr>,
    pending: FxHashSet<SocketAddr>,
}

impl<T: Connection + 'static, CM: ConnectionManager<T> + 'static> Default for Pools<T, CM> {
    fn default() -> Self {
        Pools {
            by_address: Default::default(),
            by_host_id: Default::default(),
            pending: Default::default(),
        }
    }
}

impl<T: Connection + 'static, CM: ConnectionManager<T> + 'static> Pools<T, CM> {
    fn insert(&mut self, pool: Arc<HostConnectionPool<T, CM>>) {
        let address = pool.address();
        self.by_host_id.insert(pool.host().host_id(), address);
        if let Some(previous) = self.by_address.insert(address, pool) {
            previous.close();
        }
    }

    fn remove(&mut self, address: SocketAddr) -> Option<Arc<HostConnectionPool<T, CM>>> {
        let pool = self.by_address.remove(&address)?;

        let host_id = pool.host().host_id();
        if self.by_host_id.get(&host_id) == Some(&address) {
            self.by_host_id.remove(&host_id);
        }

        Some(pool)
    }
}

fn close_detached<T: Connection + 'static, CM: ConnectionManager<T> + 'static>(
    pool: Arc<HostConnectionPool<T, CM>>,
) {
    tokio::spawn(async move { pool.close() });
}

struct PendingGuard<'a, T: Connection + 'static, CM: ConnectionManager<T> + 'static> {
    pools: &'a RwLock<Pools<T, CM>>,
    address: SocketAddr,
}

impl<T: Connection + 'static, CM: ConnectionManager<T> + 'static> Drop for PendingGuard<'_, T, CM> {
    fn drop(&mut self) {
        self.pools.write().unwrap().pending.remove(&self.address);
    }
}

/// Keeps a connection pool for every reachable host. The pool map is reconciled incrementally
/// against topology snapshots; pools are created only for hosts which are up and registered
/// only once they hold at least one live connection.
pub struct PoolRegistry<T: Connection + 'static, CM: ConnectionManager<T> + 'static> {
    factory: ConnectionPoolFactory<T, CM>,
    pools: RwLock<Pools<T, CM>>,
    reconciliation: Mutex<()>,
}

impl<T: Connection + 'static, CM: ConnectionManager<T> + 'static> PoolRegistry<T, CM> {
    pub fn new(factory: ConnectionPoolFactory<T, CM>) -> Self {
        PoolRegistry {
            factory,
            pools: Default::default(),
            reconciliation: Mutex::new(()),
        }
    }

    #[inline]
    pub fn factory(&self) -> &ConnectionPoolFactory<T, CM> {
        &self.factory
    }

    /// Reconciles pools with given hosts: pools of hosts which are gone or down are closed and
    /// pools for new hosts are created and filled concurrently. Applying the same hosts twice
    /// doesn't change anything.
    pub async fn set_hosts(&self, hosts: &[Arc<HostInfo>]) {
        let _guard = self.reconciliation.lock().await;

        let desired: FxHashMap<SocketAddr, &Arc<HostInfo>> = hosts
            .iter()
            .filter(|host| host.is_up())
            .map(|host| (host.connect_address(), host))
            .collect();

        let (removed, added) = {
            let mut pools = self.pools.write().unwrap();

            let gone = pools
                .by_address
                .keys()
                .filter(|address| !desired.contains_key(*address))
                .copied()
                .collect_vec();

            let removed = gone
                .into_iter()
                .filter_map(|address| pools.remove(address))
                .collect_vec();

            let added = desired
                .iter()
                .filter(|(address, _)| !pools.by_address.contains_key(*address))
                .map(|(_, host)| Arc::clone(host))
                .collect_vec();

            (removed, added)
        };

        for pool in removed {
            debug!(address = ?pool.address(), "Removing pool of a host which is gone.");
            close_detached(pool);
        }

        if added.is_empty() {
            return;
        }

        let (sender, mut receiver) = mpsc::channel(added.len());
        for host in added {
            let pool = self.factory.create(host);
            let sender = sender.clone();

            tokio::spawn(async move {
                pool.fill().await;
                let _ = sender.send(pool).await;
            });
        }

        drop(sender);

        while let Some(pool) = receiver.recv().await {
            self.register(pool);
        }
    }

    /// Creates a pool for a single host, unless one exists already or the host is down.
    pub async fn add_host(&self, host: Arc<HostInfo>) {
        let address = host.connect_address();

        {
            let mut pools = self.pools.write().unwrap();
            if !host.is_up() || pools.by_address.contains_key(&address) {
                return;
            }

            // another task is already creating it
            if !pools.pending.insert(address) {
                return;
            }
        }

        // cleared even if the caller stops polling midway
        let _pending = PendingGuard {
            pools: &self.pools,
            address,
        };

        let _guard = self.reconciliation.lock().await;

        let exists = self.pools.read().unwrap().by_address.contains_key(&address);
        if !exists {
            let pool = self.factory.create(host);
            pool.fill().await;
            self.register(pool);
        }
    }

    /// Removes and closes the pool of given host. Returns `true` if there was one.
    pub fn remove_host(&self, address: SocketAddr) -> bool {
        let pool = self.pools.write().unwrap().remove(address);
        match pool {
            Some(pool) => {
                close_detached(pool);
                true
            }
            None => false,
        }
    }

    /// Handles a host which went down. Down hosts are not pooled, so this is equivalent to
    /// removing the host.
    pub fn host_down(&self, address: SocketAddr) {
        if self.remove_host(address) {
            debug!(?address, "Removed pool of a host which went down.");
        }
    }

    #[inline]
    pub fn pool(&self, address: SocketAddr) -> Option<Arc<HostConnectionPool<T, CM>>> {
        self.pools.read().unwrap().by_address.get(&address).cloned()
    }

    pub fn pool_by_host_id(&self, host_id: Uuid) -> Option<Arc<HostConnectionPool<T, CM>>> {
        let pools = self.pools.read().unwrap();
        pools
            .by_host_id
            .get(&host_id)
            .and_then(|address| pools.by_address.get(address))
            .cloned()
    }

    /// Returns the number of live connections across all pools.
    pub fn size(&self) -> usize {
        self.pools
            .read()
            .unwrap()
            .by_address
            .values()
            .map(|pool| pool.size())
            .sum()
    }

    /// Returns addresses of all pooled hosts.
    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.pools
            .read()
            .unwrap()
            .by_address
            .keys()
            .copied()
            .collect()
    }

    /// Closes all pools.
    pub fn close(&self) {
        let pools = std::mem::take(&mut *self.pools.write().unwrap());
        for pool in pools.by_address.into_values() {
            pool.close();
        }
    }

    /// Starts consuming host events raised by pools. Pools of hosts reported down are removed.
    /// Stops when the registry is dropped or the channel is closed.
    pub fn handle_host_events(self: &Arc<Self>, mut receiver: broadcast::Receiver<HostEvent>) {
        let registry = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        let Some(registry) = registry.upgrade() else {
                            break;
                        };

                        debug!(%event, "Host event.");

                        if let HostEvent::Down(address) = event {
                            registry.host_down(address);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Host event receiver lagged behind.");
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            debug!("Host event handling stopped.");
        });
    }

    fn register(&self, pool: Arc<HostConnectionPool<T, CM>>) {
        if pool.size() == 0 {
            debug!(address = ?pool.address(), "Discarding pool without connections.");
            pool.close();
            return;
        }

        self.pools.write().unwrap().insert(pool);
    }
}
