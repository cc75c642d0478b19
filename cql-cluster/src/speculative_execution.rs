//! Speculative executions: redundant executions of a query started against other hosts while
//! the first one is still waiting for a response.
//!
//! A host going through a rough patch (ex: a long GC pause) answers late, and so does every
//! query routed to it. Starting another execution on the next host after a delay bounds that
//! latency: whichever execution finishes first provides the result. The others are not
//! cancelled; they run to completion and their results are discarded.
//!
//! Each execution has its own retry session, so retries are not affected by speculation.

use derive_more::Constructor;
#[cfg(test)]
use mockall::automock;
use std::time::Duration;

/// Decides how many additional executions a query may get and how far apart they start.
/// Non-idempotent queries never get speculative executions, since more than one host could
/// apply them.
#[cfg_attr(test, automock)]
pub trait SpeculativeExecutionPolicy {
    /// Maximum number of executions started in addition to the main one.
    fn attempts(&self) -> usize;

    /// Time between consecutive executions.
    fn delay(&self) -> Duration;
}

/// A policy that schedules a configurable number of speculative executions, separated by a fixed
/// delay.
#[derive(Debug, Clone, Copy, Constructor)]
pub struct ConstantSpeculativeExecutionPolicy {
    max_executions: usize,
    delay: Duration,
}

impl SpeculativeExecutionPolicy for ConstantSpeculativeExecutionPolicy {
    fn attempts(&self) -> usize {
        self.max_executions
    }

    fn delay(&self) -> Duration {
        self.delay
    }
}

/// Never schedules speculative executions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonSpeculativeExecutionPolicy;

impl SpeculativeExecutionPolicy for NonSpeculativeExecutionPolicy {
    fn attempts(&self) -> usize {
        0
    }

    fn delay(&self) -> Duration {
        Duration::ZERO
    }
}
