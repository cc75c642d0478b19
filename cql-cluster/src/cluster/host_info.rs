use atomic::Atomic;
use bytemuck::NoUninit;
use derive_more::Display;
use std::fmt::{Debug, Formatter};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::Ordering;
use uuid::Uuid;

/// The state of a host, as viewed from the driver.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, NoUninit)]
#[repr(u8)]
pub enum HostState {
    /// The host is believed to accept connections.
    Up,
    /// The host failed to accept connections or was reported down by an event.
    Down,
}

/// Metadata about a node in the cluster. A new `HostInfo` is produced by every topology refresh;
/// only the state is mutated in place.
pub struct HostInfo {
    connect_address: SocketAddr,
    broadcast_address: Option<IpAddr>,
    preferred_ip: Option<IpAddr>,
    host_id: Uuid,
    datacenter: String,
    rack: String,
    tokens: Vec<String>,
    partitioner: Option<String>,
    release_version: Option<String>,
    schema_version: Option<Uuid>,
    state: Atomic<HostState>,
}

impl Debug for HostInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostInfo")
            .field("connect_address", &self.connect_address)
            .field("broadcast_address", &self.broadcast_address)
            .field("host_id", &self.host_id)
            .field("datacenter", &self.datacenter)
            .field("rack", &self.rack)
            .field("tokens", &self.tokens.len())
            .field("state", &self.state())
            .finish()
    }
}

impl HostInfo {
    pub fn new(
        connect_address: SocketAddr,
        host_id: Uuid,
        datacenter: String,
        rack: String,
        tokens: Vec<String>,
    ) -> Self {
        HostInfo {
            connect_address,
            broadcast_address: None,
            preferred_ip: None,
            host_id,
            datacenter,
            rack,
            tokens,
            partitioner: None,
            release_version: None,
            schema_version: None,
            state: Atomic::new(HostState::Up),
        }
    }

    #[must_use]
    pub fn with_broadcast_address(mut self, broadcast_address: Option<IpAddr>) -> Self {
        self.broadcast_address = broadcast_address;
        self
    }

    #[must_use]
    pub fn with_preferred_ip(mut self, preferred_ip: Option<IpAddr>) -> Self {
        self.preferred_ip = preferred_ip;
        self
    }

    #[must_use]
    pub fn with_partitioner(mut self, partitioner: Option<String>) -> Self {
        self.partitioner = partitioner;
        self
    }

    #[must_use]
    pub fn with_versions(
        mut self,
        release_version: Option<String>,
        schema_version: Option<Uuid>,
    ) -> Self {
        self.release_version = release_version;
        self.schema_version = schema_version;
        self
    }

    #[must_use]
    pub fn with_state(self, state: HostState) -> Self {
        self.state.store(state, Ordering::Relaxed);
        self
    }

    /// The address the driver connects to.
    #[inline]
    pub fn connect_address(&self) -> SocketAddr {
        self.connect_address
    }

    /// The address other nodes use to communicate with this node.
    #[inline]
    pub fn broadcast_address(&self) -> Option<IpAddr> {
        self.broadcast_address
    }

    #[inline]
    pub fn preferred_ip(&self) -> Option<IpAddr> {
        self.preferred_ip
    }

    /// The host ID that is assigned to this node by the cluster. This value can be used to
    /// uniquely identify a node even when the underling IP address changes.
    #[inline]
    pub fn host_id(&self) -> Uuid {
        self.host_id
    }

    #[inline]
    pub fn datacenter(&self) -> &str {
        &self.datacenter
    }

    #[inline]
    pub fn rack(&self) -> &str {
        &self.rack
    }

    /// Raw tokens owned by the node, as reported by the cluster.
    #[inline]
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    #[inline]
    pub fn partitioner(&self) -> Option<&str> {
        self.partitioner.as_deref()
    }

    #[inline]
    pub fn release_version(&self) -> Option<&str> {
        self.release_version.as_deref()
    }

    #[inline]
    pub fn schema_version(&self) -> Option<Uuid> {
        self.schema_version
    }

    #[inline]
    pub fn state(&self) -> HostState {
        self.state.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_up(&self) -> bool {
        self.state() == HostState::Up
    }

    /// Nodes which own no part of the ring don't serve data.
    #[inline]
    pub fn is_zero_token(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Connecting to an unspecified address (`0.0.0.0` or `::`) is not possible.
    #[inline]
    pub fn has_invalid_connect_address(&self) -> bool {
        self.connect_address.ip().is_unspecified()
    }

    pub(crate) fn mark_up(&self) {
        self.state.store(HostState::Up, Ordering::Relaxed);
    }

    pub(crate) fn mark_down(&self) {
        self.state.store(HostState::Down, Ordering::Relaxed);
    }
}
