use arc_swap::ArcSwapOption;
use fxhash::FxHashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use thiserror::Error as ThisError;
use tokio::sync::Mutex;
use tracing::*;
use uuid::Uuid;

use crate::cluster::{HostInfo, SystemRow};
use crate::error::{Error, Result};
use crate::transport::{Connection, SystemTable};

/// Translates addresses advertised by nodes into addresses reachable by the driver, e.g. when
/// nodes sit behind NAT.
pub trait AddressTranslator: Send + Sync {
    fn translate(&self, address: SocketAddr) -> SocketAddr;
}

/// Uses advertised addresses as they are.
#[derive(Default, Copy, Clone, Debug)]
pub struct IdentityAddressTranslator;

impl AddressTranslator for IdentityAddressTranslator {
    #[inline]
    fn translate(&self, address: SocketAddr) -> SocketAddr {
        address
    }
}

/// Result of describing the cluster: hosts owning parts of the ring, local node first, and the
/// cluster partitioner.
#[derive(Debug, Default)]
pub struct TopologySnapshot {
    pub hosts: Vec<Arc<HostInfo>>,
    pub partitioner: Option<String>,
}

/// Failure to describe the cluster. Carries the last successfully described topology.
#[derive(Debug, ThisError)]
#[error("Error describing cluster topology: {error}")]
pub struct TopologyError {
    pub cached: Arc<TopologySnapshot>,
    #[source]
    pub error: Error,
}

/// Discovers cluster members by reading system tables through the control connection.
pub struct TopologyDescriber<T: Connection> {
    control_connection: ArcSwapOption<T>,
    default_port: u16,
    address_translator: Arc<dyn AddressTranslator>,
    snapshot: Mutex<Arc<TopologySnapshot>>,
}

impl<T: Connection> TopologyDescriber<T> {
    pub fn new(default_port: u16, address_translator: Arc<dyn AddressTranslator>) -> Self {
        TopologyDescriber {
            control_connection: Default::default(),
            default_port,
            address_translator,
            snapshot: Default::default(),
        }
    }

    #[inline]
    pub fn set_control_connection(&self, connection: Option<Arc<T>>) {
        self.control_connection.store(connection);
    }

    #[inline]
    pub fn control_connection(&self) -> Option<Arc<T>> {
        self.control_connection.load_full()
    }

    /// Returns the last successfully described topology.
    pub async fn snapshot(&self) -> Arc<TopologySnapshot> {
        self.snapshot.lock().await.clone()
    }

    /// Describes the cluster. On success, the result replaces the cached topology; on failure
    /// the cached topology is returned along with the error.
    pub async fn get_hosts(&self) -> std::result::Result<Arc<TopologySnapshot>, TopologyError> {
        let mut snapshot = self.snapshot.lock().await;

        match self.describe().await {
            Ok(described) => {
                *snapshot = Arc::new(described);
                Ok(snapshot.clone())
            }
            Err(error) => {
                warn!(%error, "Error describing cluster topology, using cached hosts.");
                Err(TopologyError {
                    cached: snapshot.clone(),
                    error,
                })
            }
        }
    }

    /// Resolves a single host by its id, looking at peers first.
    pub async fn host_info(&self, host_id: Uuid) -> Result<Arc<HostInfo>> {
        let connection = self.control_connection().ok_or(Error::NoControlConnection)?;
        let control_address = connection.address();

        let mut host = None;
        for table in [Self::peers_table(connection.as_ref()), SystemTable::Local] {
            let rows = connection.query_system(table).await?;
            if let Some(row) = find_host_row(&rows, host_id)? {
                host = Some(if table == SystemTable::Local {
                    self.local_host_info(row, control_address)?
                } else {
                    self.peer_host_info(row)?
                });
                break;
            }
        }

        let host = host.ok_or_else(|| {
            Error::InvalidControlConnection(format!(
                "Control connection to {control_address} doesn't know host {host_id}"
            ))
        })?;

        if host.has_invalid_connect_address() {
            return Err(Error::InvalidConnectAddress {
                host_id,
                address: host.connect_address(),
            });
        }

        Ok(Arc::new(host))
    }

    async fn describe(&self) -> Result<TopologySnapshot> {
        let connection = self.control_connection().ok_or(Error::NoControlConnection)?;
        let control_address = connection.address();

        let local_rows = connection.query_system(SystemTable::Local).await?;
        let local_row = local_rows.first().ok_or_else(|| {
            Error::InvalidControlConnection(format!(
                "Node {control_address} failed to return info about itself"
            ))
        })?;

        let local = self.local_host_info(local_row, control_address)?;

        let peer_rows = connection
            .query_system(Self::peers_table(connection.as_ref()))
            .await?;

        let mut seen_ids = FxHashSet::default();
        seen_ids.insert(local.host_id());

        let mut hosts = Vec::with_capacity(peer_rows.len() + 1);
        if !local.is_zero_token() {
            hosts.push(Arc::new(local));
        }

        for row in &peer_rows {
            if !is_peer_row_valid(row) {
                warn!(
                    ?row,
                    "Found invalid peer, likely due to a gossip or snitch issue; it will be ignored."
                );
                continue;
            }

            let host = self.peer_host_info(row)?;

            // if the peer is actually the control node, ignore that peer as it is likely a
            // misconfiguration problem
            if host.connect_address() == control_address {
                warn!(
                    node = %host.connect_address(),
                    control = %control_address,
                    "Control node has itself as a peer, thus will be ignored. This is likely due \
                    to a misconfiguration; please verify the rpc address configuration on all \
                    nodes in your cluster."
                );
                continue;
            }

            if !seen_ids.insert(host.host_id()) {
                warn!(host_id = %host.host_id(), "Found duplicate peer host id, ignoring.");
                continue;
            }

            if host.is_zero_token() {
                continue;
            }

            hosts.push(Arc::new(host));
        }

        let partitioner = hosts
            .first()
            .and_then(|host| host.partitioner())
            .map(ToString::to_string);

        debug!(hosts = hosts.len(), ?partitioner, "Described cluster topology.");

        Ok(TopologySnapshot { hosts, partitioner })
    }

    #[inline]
    fn peers_table(connection: &T) -> SystemTable {
        if connection.uses_peers_v2() {
            SystemTable::PeersV2
        } else {
            SystemTable::Peers
        }
    }

    fn local_host_info(&self, row: &SystemRow, control_address: SocketAddr) -> Result<HostInfo> {
        // don't rely on the local rpc address for the control node, since it may report the
        // normal address instead of the broadcast one; we already know the endpoint anyway
        host_info_from_row(row, control_address)
    }

    fn peer_host_info(&self, row: &SystemRow) -> Result<HostInfo> {
        let address = peer_address(row)?.unwrap_or(IpAddr::from([0, 0, 0, 0]));
        let port = row
            .int("native_port")?
            .or(row.int("rpc_port")?)
            .and_then(|port| u16::try_from(port).ok())
            .unwrap_or(self.default_port);

        let connect_address = self
            .address_translator
            .translate(SocketAddr::new(address, port));

        host_info_from_row(row, connect_address)
    }
}

fn find_host_row(rows: &[SystemRow], host_id: Uuid) -> Result<Option<&SystemRow>> {
    for row in rows {
        if row.uuid("host_id")? == Some(host_id) {
            return Ok(Some(row));
        }
    }

    Ok(None)
}

fn peer_address(row: &SystemRow) -> Result<Option<IpAddr>> {
    // system.peers or system.peers_v2
    let rpc_address = row.inet("rpc_address")?.or(row.inet("native_address")?);
    if let Some(rpc_address) = rpc_address.filter(|address| !address.is_unspecified()) {
        return Ok(Some(rpc_address));
    }

    Ok(row
        .inet("preferred_ip")?
        .or(row.inet("peer")?)
        .or(row.inet("broadcast_address")?))
}

fn is_peer_row_valid(row: &SystemRow) -> bool {
    let has_peers_rpc_address = !row.is_empty_by_name("rpc_address");
    let has_peers_v2_rpc_address = !row.is_empty_by_name("native_address");

    (has_peers_rpc_address || has_peers_v2_rpc_address)
        && !row.is_empty_by_name("host_id")
        && !row.is_empty_by_name("data_center")
        && !row.is_empty_by_name("rack")
}

fn host_info_from_row(row: &SystemRow, connect_address: SocketAddr) -> Result<HostInfo> {
    let host_id = row.uuid("host_id")?.unwrap_or_default();
    let datacenter = row.text("data_center")?.unwrap_or_default().to_string();
    let rack = row.text("rack")?.unwrap_or_default().to_string();
    let tokens = row.text_set("tokens")?.to_vec();

    let broadcast_address = row.inet("broadcast_address")?.or(row.inet("peer")?);

    Ok(
        HostInfo::new(connect_address, host_id, datacenter, rack, tokens)
            .with_broadcast_address(broadcast_address)
            .with_preferred_ip(row.inet("preferred_ip")?)
            .with_partitioner(row.text("partitioner")?.map(ToString::to_string))
            .with_versions(
                row.text("release_version")?.map(ToString::to_string),
                row.uuid("schema_version")?,
            ),
    )
}
