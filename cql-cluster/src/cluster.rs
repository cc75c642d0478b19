mod config;
mod connection_manager;
mod connection_picker;
mod connection_pool;
mod host_info;
mod keyspace_holder;
mod node_address;
mod pool_registry;
mod system_row;
mod topology_describer;

pub use crate::cluster::config::{ClusterConfig, ClusterConfigBuilder, DEFAULT_PORT};
pub use crate::cluster::connection_manager::ConnectionManager;
pub use crate::cluster::connection_picker::{
    ConnectionPicker, RoundRobinConnectionPicker, ShardAwareConnectionPicker,
};
pub use crate::cluster::connection_pool::{
    ConnectionPoolConfig, ConnectionPoolFactory, HostConnectionPool,
};
pub use crate::cluster::host_info::{HostInfo, HostState};
pub use crate::cluster::keyspace_holder::KeyspaceHolder;
pub use crate::cluster::node_address::NodeAddress;
pub use crate::cluster::pool_registry::PoolRegistry;
pub use crate::cluster::system_row::{SystemRow, SystemValue};
pub use crate::cluster::topology_describer::{
    AddressTranslator, IdentityAddressTranslator, TopologyDescriber, TopologyError,
    TopologySnapshot,
};
