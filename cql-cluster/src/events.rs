use derive_more::Display;
use std::net::SocketAddr;

/// Host availability changes observed by connection pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum HostEvent {
    /// A pool established its connections to the host.
    #[display("Host up: {_0}")]
    Up(SocketAddr),
    /// A pool could not connect to the host and the conviction policy marked it down.
    #[display("Host down: {_0}")]
    Down(SocketAddr),
}

impl HostEvent {
    #[inline]
    pub fn address(&self) -> SocketAddr {
        match self {
            HostEvent::Up(address) | HostEvent::Down(address) => *address,
        }
    }
}
