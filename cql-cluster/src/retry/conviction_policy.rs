#[cfg(test)]
use mockall::automock;

use crate::cluster::HostInfo;
use crate::error::Error;

/// Decides whether a host which refused a connection should be considered down.
#[cfg_attr(test, automock)]
pub trait ConvictionPolicy {
    /// Records a failed connection attempt and returns `true` if the host should be marked down.
    fn add_failure(&self, error: &Error, host: &HostInfo) -> bool;

    /// Forgets failures recorded for given host.
    fn reset(&self, host: &HostInfo);
}

/// Convicts a host on the first failure.
#[derive(Default, Copy, Clone, Debug, PartialEq, Ord, PartialOrd, Eq, Hash)]
pub struct SimpleConvictionPolicy;

impl ConvictionPolicy for SimpleConvictionPolicy {
    fn add_failure(&self, _error: &Error, _host: &HostInfo) -> bool {
        true
    }

    fn reset(&self, _host: &HostInfo) {}
}
