use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::cluster::{
    AddressTranslator, ConnectionManager, ConnectionPoolConfig, ConnectionPoolFactory,
    IdentityAddressTranslator, KeyspaceHolder, NodeAddress, PoolRegistry, TopologyDescriber,
};
use crate::error::{Error, Result};
use crate::retry::{
    ConstantReconnectionPolicy, ConvictionPolicy, ReconnectionPolicy, SimpleConvictionPolicy,
};
use crate::transport::Connection;

pub const DEFAULT_PORT: u16 = 9042;
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 64;

/// Resolved cluster configuration.
#[derive(Clone)]
pub struct ClusterConfig {
    contact_points: Vec<SocketAddr>,
    port: u16,
    pool_config: ConnectionPoolConfig,
    keyspace_holder: Arc<KeyspaceHolder>,
    reconnection_policy: Arc<dyn ReconnectionPolicy + Send + Sync>,
    conviction_policy: Arc<dyn ConvictionPolicy + Send + Sync>,
    address_translator: Arc<dyn AddressTranslator>,
    event_channel_capacity: usize,
}

impl ClusterConfig {
    #[inline]
    pub fn contact_points(&self) -> &[SocketAddr] {
        &self.contact_points
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[inline]
    pub fn pool_config(&self) -> ConnectionPoolConfig {
        self.pool_config
    }

    #[inline]
    pub fn keyspace_holder(&self) -> &Arc<KeyspaceHolder> {
        &self.keyspace_holder
    }

    /// Creates a pool registry which removes pools of hosts reported down by their pools.
    pub fn pool_registry<T: Connection + 'static, CM: ConnectionManager<T> + 'static>(
        &self,
        connection_manager: Arc<CM>,
    ) -> Arc<PoolRegistry<T, CM>> {
        let (event_sender, event_receiver) = broadcast::channel(self.event_channel_capacity);
        let factory = ConnectionPoolFactory::new(
            self.pool_config,
            connection_manager,
            self.keyspace_holder.clone(),
            self.reconnection_policy.clone(),
            self.conviction_policy.clone(),
            event_sender,
        );

        let registry = Arc::new(PoolRegistry::new(factory));
        registry.handle_host_events(event_receiver);
        registry
    }

    pub fn topology_describer<T: Connection>(&self) -> TopologyDescriber<T> {
        TopologyDescriber::new(self.port, self.address_translator.clone())
    }
}

/// Builder for [`ClusterConfig`]. Hostname contact points are resolved when building.
pub struct ClusterConfigBuilder {
    contact_points: Vec<NodeAddress>,
    port: u16,
    pool_size: Option<usize>,
    connect_timeout: Option<Duration>,
    keyspace: Option<String>,
    reconnection_policy: Arc<dyn ReconnectionPolicy + Send + Sync>,
    conviction_policy: Arc<dyn ConvictionPolicy + Send + Sync>,
    address_translator: Arc<dyn AddressTranslator>,
    event_channel_capacity: usize,
}

impl Default for ClusterConfigBuilder {
    fn default() -> Self {
        ClusterConfigBuilder {
            contact_points: vec![],
            port: DEFAULT_PORT,
            pool_size: None,
            connect_timeout: None,
            keyspace: None,
            reconnection_policy: Arc::new(ConstantReconnectionPolicy::default()),
            conviction_policy: Arc::new(SimpleConvictionPolicy),
            address_translator: Arc::new(IdentityAddressTranslator),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl ClusterConfigBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds a contact point used to discover the rest of the cluster.
    #[must_use]
    pub fn with_contact_point(mut self, address: impl Into<NodeAddress>) -> Self {
        self.contact_points.push(address.into());
        self
    }

    /// Sets the port used for hosts which don't advertise one.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = Some(pool_size);
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = Some(connect_timeout);
        self
    }

    /// Sets the keyspace new connections switch to.
    #[must_use]
    pub fn with_keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = Some(keyspace.into());
        self
    }

    #[must_use]
    pub fn with_reconnection_policy(
        mut self,
        reconnection_policy: Arc<dyn ReconnectionPolicy + Send + Sync>,
    ) -> Self {
        self.reconnection_policy = reconnection_policy;
        self
    }

    #[must_use]
    pub fn with_conviction_policy(
        mut self,
        conviction_policy: Arc<dyn ConvictionPolicy + Send + Sync>,
    ) -> Self {
        self.conviction_policy = conviction_policy;
        self
    }

    #[must_use]
    pub fn with_address_translator(mut self, address_translator: Arc<dyn AddressTranslator>) -> Self {
        self.address_translator = address_translator;
        self
    }

    /// Sets how many host events can be buffered before slow receivers start missing them.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, event_channel_capacity: usize) -> Self {
        self.event_channel_capacity = event_channel_capacity;
        self
    }

    /// Finalizes building process.
    pub async fn build(self) -> Result<ClusterConfig> {
        if self.pool_size == Some(0) {
            return Err(Error::General("Pool size must be positive".into()));
        }

        if self.event_channel_capacity == 0 {
            return Err(Error::General(
                "Event channel capacity must be positive".into(),
            ));
        }

        // replace with map() when async lambdas become available
        let mut contact_points = Vec::with_capacity(self.contact_points.len());
        for address in &self.contact_points {
            contact_points.append(&mut address.resolve(self.port).await?);
        }

        if contact_points.is_empty() {
            return Err(Error::General("No contact points".into()));
        }

        let pool_config = match self.pool_size {
            Some(pool_size) => ConnectionPoolConfig::new(pool_size, self.connect_timeout),
            None => ConnectionPoolConfig::new(
                ConnectionPoolConfig::default().size(),
                self.connect_timeout,
            ),
        };

        Ok(ClusterConfig {
            contact_points,
            port: self.port,
            pool_config,
            keyspace_holder: Arc::new(KeyspaceHolder::new(self.keyspace)),
            reconnection_policy: self.reconnection_policy,
            conviction_policy: self.conviction_policy,
            address_translator: self.address_translator,
            event_channel_capacity: self.event_channel_capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::sleep;

    use super::*;
    use crate::test_utils::{host, FakeConnection, FakeConnectionManager};

    #[tokio::test]
    async fn should_build_config() {
        let first: SocketAddr = "127.0.0.1:9042".parse().unwrap();
        let second: SocketAddr = "127.0.0.2:9043".parse().unwrap();

        let config = ClusterConfigBuilder::new()
            .with_contact_point("127.0.0.1:9042")
            .with_contact_point(second)
            .with_pool_size(4)
            .with_keyspace("ks")
            .build()
            .await
            .unwrap();

        assert_eq!(config.contact_points().to_vec(), vec![first, second]);
        assert_eq!(config.port(), DEFAULT_PORT);
        assert_eq!(config.pool_config().size(), 4);
        assert_eq!(
            config.keyspace_holder().keyspace().as_deref().map(String::as_str),
            Some("ks")
        );
    }

    #[tokio::test]
    async fn should_reject_invalid_config() {
        assert!(ClusterConfigBuilder::new().build().await.is_err());
        assert!(ClusterConfigBuilder::new()
            .with_contact_point("127.0.0.1:9042")
            .with_pool_size(0)
            .build()
            .await
            .is_err());
    }

    #[tokio::test]
    async fn should_remove_pool_when_host_goes_down() {
        let config = ClusterConfigBuilder::new()
            .with_contact_point("127.0.0.1:9042")
            .with_pool_size(1)
            .build()
            .await
            .unwrap();

        let manager = Arc::new(FakeConnectionManager::new());
        let registry = config.pool_registry::<FakeConnection, _>(manager.clone());
        let host = host(1);

        registry.set_hosts(&[host.clone()]).await;
        sleep(Duration::from_millis(10)).await;

        let pool = registry.pool(host.connect_address()).unwrap();
        let connection = pool.pick(None).unwrap();

        manager.set_failing(true);
        connection.close();
        pool.handle_error(&connection, &Error::General("closed".into()), true);

        // triggers a fill which fails to connect
        assert!(pool.pick(None).is_none());
        sleep(Duration::from_millis(50)).await;

        assert!(!host.is_up());
        assert!(registry.pool(host.connect_address()).is_none());
    }
}
