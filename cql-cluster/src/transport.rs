//! This module contains a declaration of the `Connection` trait, which should be implemented by
//! a particular transport in order to be used by the cluster engine.
//!
//! Encoding and decoding of values, framing, authentication and TLS all live behind this
//! trait. The engine only needs to send opaque requests, read system tables, switch keyspaces
//! and learn about the connection's capabilities.
use bytes::Bytes;
use futures::future::BoxFuture;
use std::fmt::{Display, Formatter};
use std::net::SocketAddr;

use crate::cluster::SystemRow;
use crate::error::{Error, Result};
use crate::routing::ShardInfo;

/// System tables queried for topology discovery.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SystemTable {
    Local,
    Peers,
    PeersV2,
}

impl SystemTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemTable::Local => "system.local",
            SystemTable::Peers => "system.peers",
            SystemTable::PeersV2 => "system.peers_v2",
        }
    }
}

impl Display for SystemTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single physical link to a node.
pub trait Connection: Send + Sync {
    /// Sends an encoded request and waits for the encoded response.
    fn send<'a>(&'a self, request: &'a [u8]) -> BoxFuture<'a, Result<Bytes>>;

    /// Reads all rows from given system table.
    fn query_system(&self, table: SystemTable) -> BoxFuture<'_, Result<Vec<SystemRow>>>;

    /// Switches the connection to given keyspace.
    fn use_keyspace<'a>(&'a self, keyspace: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Closes the connection. Pending requests fail.
    fn close(&self);

    /// Checks if the connection is closed (e.g. after read or write errors)
    fn is_closed(&self) -> bool;

    /// Returns associated node address
    fn address(&self) -> SocketAddr;

    /// Sharding information, if the node runs a shard-per-core architecture.
    fn shard_info(&self) -> Option<ShardInfo> {
        None
    }

    /// Checks if the node exposes `system.peers_v2`.
    fn uses_peers_v2(&self) -> bool {
        false
    }
}

/// Receives errors observed by connections. Each connection reports to the pool which owns it.
pub trait ConnectionErrorHandler<T: Connection>: Send + Sync {
    /// Called when a connection encounters an error. `closed` tells if the connection is no
    /// longer usable.
    fn handle_error(&self, connection: &T, error: &Error, closed: bool);
}
