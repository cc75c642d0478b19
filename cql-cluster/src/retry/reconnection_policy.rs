use derive_more::Constructor;
#[cfg(test)]
use mockall::automock;
use rand::{rng, Rng};
use std::time::Duration;

const DEFAULT_MAX_RETRIES: usize = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Determines how many times, and how often, a single connection is dialed before the attempt
/// to establish it is abandoned.
#[cfg_attr(test, automock)]
pub trait ReconnectionPolicy {
    /// Maximum number of dial attempts for a single connection. Values below 1 are treated as 1.
    fn max_retries(&self) -> usize;

    /// Delay to wait after the failed attempt with given (zero-based) index.
    fn interval(&self, attempt: usize) -> Duration;
}

/// Dials at a constant interval.
#[derive(Copy, Clone, Constructor, Debug, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct ConstantReconnectionPolicy {
    max_retries: usize,
    interval: Duration,
}

impl Default for ConstantReconnectionPolicy {
    fn default() -> Self {
        ConstantReconnectionPolicy::new(DEFAULT_MAX_RETRIES, DEFAULT_BASE_DELAY)
    }
}

impl ReconnectionPolicy for ConstantReconnectionPolicy {
    fn max_retries(&self) -> usize {
        self.max_retries
    }

    fn interval(&self, _attempt: usize) -> Duration {
        self.interval
    }
}

/// Dials exactly once.
#[derive(Default, Copy, Clone, Debug, PartialEq, Ord, PartialOrd, Eq, Hash)]
pub struct NeverReconnectionPolicy;

impl ReconnectionPolicy for NeverReconnectionPolicy {
    fn max_retries(&self) -> usize {
        1
    }

    fn interval(&self, _attempt: usize) -> Duration {
        Duration::ZERO
    }
}

/// A reconnection policy that waits exponentially longer between each dial attempt (but keeps a
/// constant delay once a maximum delay is reached). The delay will increase exponentially, with
/// an added jitter.
#[derive(Copy, Clone, Constructor, Debug, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct ExponentialReconnectionPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_retries: usize,
}

impl Default for ExponentialReconnectionPolicy {
    fn default() -> Self {
        ExponentialReconnectionPolicy::new(
            DEFAULT_BASE_DELAY,
            DEFAULT_MAX_DELAY,
            DEFAULT_MAX_RETRIES,
        )
    }
}

impl ReconnectionPolicy for ExponentialReconnectionPolicy {
    fn max_retries(&self) -> usize {
        self.max_retries
    }

    fn interval(&self, attempt: usize) -> Duration {
        let delay = self
            .base_delay
            .saturating_mul(
                1u32.checked_shl(u32::try_from(attempt).unwrap_or(u32::MAX))
                    .unwrap_or(u32::MAX),
            )
            .min(self.max_delay);

        let jitter = rng().random_range(85..116);

        (delay / 100)
            .saturating_mul(jitter)
            .clamp(self.base_delay.min(self.max_delay), self.max_delay)
    }
}
