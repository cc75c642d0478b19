use std::net::SocketAddr;
use tokio::net::lookup_host;

use crate::error::Result;

/// Address of a contact point. Can be a direct socket address or a hostname, which may resolve
/// to multiple addresses. Hostnames without an explicit port use the cluster port.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeAddress {
    Direct(SocketAddr),
    Hostname(String),
}

impl NodeAddress {
    /// Resolves the address into socket addresses.
    pub async fn resolve(&self, default_port: u16) -> Result<Vec<SocketAddr>> {
        match self {
            NodeAddress::Direct(addr) => Ok(vec![*addr]),
            NodeAddress::Hostname(hostname) if hostname.contains(':') => lookup_host(hostname)
                .await
                .map(|addrs| addrs.collect())
                .map_err(Into::into),
            NodeAddress::Hostname(hostname) => lookup_host((hostname.as_str(), default_port))
                .await
                .map(|addrs| addrs.collect())
                .map_err(Into::into),
        }
    }
}

impl From<SocketAddr> for NodeAddress {
    fn from(addr: SocketAddr) -> Self {
        NodeAddress::Direct(addr)
    }
}

impl From<String> for NodeAddress {
    fn from(value: String) -> Self {
        value
            .parse()
            .map(NodeAddress::Direct)
            .unwrap_or(NodeAddress::Hostname(value))
    }
}

impl From<&str> for NodeAddress {
    fn from(value: &str) -> Self {
        NodeAddress::from(value.to_string())
    }
}
