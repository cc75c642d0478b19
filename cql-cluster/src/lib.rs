//! **cql-cluster** is the cluster engine of an asynchronous CQL driver. It keeps a pool of
//! connections per node, discovers cluster membership through a control connection, and drives
//! queries to completion with retries and speculative executions.
//!
//! ## Getting started
//!
//! The engine is transport-agnostic: a driver provides a [`Connection`](transport::Connection)
//! implementation together with a [`ConnectionManager`](cluster::ConnectionManager) able to
//! dial it. Everything else is wired from a [`ClusterConfig`](cluster::ClusterConfig):
//!
//! 1. build the config with [`ClusterConfigBuilder`](cluster::ClusterConfigBuilder),
//! 2. create a [`PoolRegistry`](cluster::PoolRegistry) with
//!    [`ClusterConfig::pool_registry`](cluster::ClusterConfig::pool_registry),
//! 3. describe the cluster with a [`TopologyDescriber`](cluster::TopologyDescriber) and feed the
//!    hosts to both the registry and a [host selection policy](crate::load_balancing),
//! 4. execute [`ExecutableQuery`](query::ExecutableQuery) implementations through a
//!    [`QueryExecutor`](query::QueryExecutor).
//!
//! ## Nodes and load balancing
//!
//! Pools are filled in the background and never block query execution. Hosts which cannot be
//! connected to are skipped, and the next host from the selection policy is tried instead.
//! Topology-aware selection policies can use the routing token of a query, which also picks
//! the connection bound to the owning shard on shard-per-core nodes.

pub mod cluster;
pub mod error;
pub mod events;
pub mod load_balancing;
pub mod query;
pub mod retry;
pub mod routing;
pub mod speculative_execution;
pub mod transport;

#[cfg(test)]
mod test_utils;

pub type Error = error::Error;
pub type Result<T> = error::Result<T>;
