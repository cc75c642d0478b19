//! Host selection policies. A policy turns a request into a lazy sequence of hosts to try, and
//! receives feedback about every attempt made against the hosts it selected.

mod random;
mod request;
mod round_robin;
mod single_host;

pub use self::random::RandomHostSelectionPolicy;
pub use self::request::Request;
pub use self::round_robin::RoundRobinHostSelectionPolicy;
pub use self::single_host::{single_host, single_host_with};

use derive_more::Constructor;
use futures::stream::BoxStream;
use std::sync::Arc;

use crate::cluster::HostInfo;
use crate::error::Error;
use crate::routing::Murmur3Token;

/// Lazy, possibly unbounded, sequence of hosts to try.
pub type HostStream = BoxStream<'static, Box<dyn SelectedHost>>;

/// A host chosen for a single attempt.
pub trait SelectedHost: Send + Sync {
    fn info(&self) -> &Arc<HostInfo>;

    /// Token used to pick a connection on the host.
    fn token(&self) -> Option<Murmur3Token>;

    /// Reports the outcome of an attempt made against this host. `None` means success.
    fn mark(&self, error: Option<&Error>);
}

/// Selected host which ignores feedback.
#[derive(Debug, Clone, Constructor)]
pub struct SimpleSelectedHost {
    info: Arc<HostInfo>,
    token: Option<Murmur3Token>,
}

impl SelectedHost for SimpleSelectedHost {
    #[inline]
    fn info(&self) -> &Arc<HostInfo> {
        &self.info
    }

    #[inline]
    fn token(&self) -> Option<Murmur3Token> {
        self.token
    }

    fn mark(&self, _error: Option<&Error>) {}
}

/// Host selection policy, kept up to date with topology changes.
pub trait HostSelectionPolicy: Send + Sync {
    /// Returns hosts to try for given request, in order.
    fn pick(&self, request: &Request) -> HostStream;

    fn add_host(&self, _host: Arc<HostInfo>) {}

    fn remove_host(&self, _host: &HostInfo) {}

    fn host_up(&self, _host: Arc<HostInfo>) {}

    fn host_down(&self, _host: &HostInfo) {}

    fn set_partitioner(&self, _partitioner: &str) {}
}
