use derive_more::Display;
#[cfg(test)]
use mockall::automock;
use std::convert::TryFrom;

use crate::error::{Error, ServerError, ServerErrorKind, WriteType};

const DEFAULT_NUM_RETRIES: usize = 3;

/// What to do after a failed attempt.
#[derive(Debug, PartialEq, Eq, Ord, PartialOrd, Hash, Copy, Clone, Display)]
pub enum RetryDecision {
    /// Retry on the same host.
    Retry,
    /// Move on to the next host in the query plan.
    RetryNextHost,
    /// Return the error to the caller.
    Rethrow,
    /// Stop retrying, returning the outcome of the last attempt as is.
    Ignore,
}

impl TryFrom<u8> for RetryDecision {
    type Error = Error;

    /// Decodes decisions supplied as raw codes, ex. by policies implemented outside of Rust.
    /// Sessions adapting such policies decode through this and must surface
    /// [`Error::UnknownRetryDecision`] instead of guessing a decision.
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(RetryDecision::Retry),
            0x01 => Ok(RetryDecision::RetryNextHost),
            0x02 => Ok(RetryDecision::Ignore),
            0x03 => Ok(RetryDecision::Rethrow),
            value => Err(Error::UnknownRetryDecision(value)),
        }
    }
}

/// Information about a failed query.
pub struct QueryInfo<'a> {
    pub error: &'a Error,
    pub is_idempotent: bool,
}

/// Query-specific information about current state of retrying.
pub trait RetrySession {
    /// Called once per failed attempt before [`decide`](RetrySession::decide). Returning `false`
    /// stops retrying altogether.
    fn attempt(&mut self) -> bool {
        true
    }

    /// Decide what to do with the failing query.
    fn decide(&mut self, query_info: QueryInfo) -> RetryDecision;
}

/// Retry policy determines what to do in case of communication error.
#[cfg_attr(test, automock)]
pub trait RetryPolicy {
    /// Called for each new query execution, starts a session of deciding about retries.
    fn new_session(&self) -> Box<dyn RetrySession + Send + Sync>;

    /// Starts a session for a conditional (LWT) query. Policies which don't provide one have
    /// their regular session used instead.
    fn new_lwt_session(&self) -> Option<Box<dyn RetrySession + Send + Sync>> {
        None
    }
}

fn server_error_kind(error: &Error) -> Option<&ServerErrorKind> {
    match error {
        Error::Server {
            body: ServerError { kind, .. },
            ..
        } => Some(kind),
        Error::Query(error) => server_error_kind(&error.error),
        _ => None,
    }
}

/// Forwards all errors directly to the user, never retries
#[derive(Default)]
pub struct FallthroughRetryPolicy;

impl RetryPolicy for FallthroughRetryPolicy {
    fn new_session(&self) -> Box<dyn RetrySession + Send + Sync> {
        Box::new(FallthroughRetrySession)
    }
}

#[derive(Default)]
pub struct FallthroughRetrySession;

impl RetrySession for FallthroughRetrySession {
    fn attempt(&mut self) -> bool {
        false
    }

    fn decide(&mut self, _query_info: QueryInfo) -> RetryDecision {
        RetryDecision::Rethrow
    }
}

/// Retries a query on the next host, up to a given number of times. Conditional queries are
/// retried on the same host, and only when the server rejected them before execution.
#[derive(Clone, Copy, Debug)]
pub struct SimpleRetryPolicy {
    num_retries: usize,
}

impl SimpleRetryPolicy {
    pub fn new(num_retries: usize) -> Self {
        SimpleRetryPolicy { num_retries }
    }
}

impl Default for SimpleRetryPolicy {
    fn default() -> Self {
        SimpleRetryPolicy::new(DEFAULT_NUM_RETRIES)
    }
}

impl RetryPolicy for SimpleRetryPolicy {
    fn new_session(&self) -> Box<dyn RetrySession + Send + Sync> {
        Box::new(SimpleRetrySession {
            num_retries: self.num_retries,
            attempts: 0,
            lwt: false,
        })
    }

    fn new_lwt_session(&self) -> Option<Box<dyn RetrySession + Send + Sync>> {
        Some(Box::new(SimpleRetrySession {
            num_retries: self.num_retries,
            attempts: 0,
            lwt: true,
        }))
    }
}

struct SimpleRetrySession {
    num_retries: usize,
    attempts: usize,
    lwt: bool,
}

impl RetrySession for SimpleRetrySession {
    fn attempt(&mut self) -> bool {
        self.attempts += 1;
        self.attempts <= self.num_retries
    }

    fn decide(&mut self, query_info: QueryInfo) -> RetryDecision {
        if !self.lwt {
            return RetryDecision::RetryNextHost;
        }

        // a conditional statement can only be safely re-sent when it was never applied
        match server_error_kind(query_info.error) {
            Some(ServerErrorKind::Unavailable { .. })
            | Some(ServerErrorKind::Overloaded)
            | Some(ServerErrorKind::IsBootstrapping) => RetryDecision::Retry,
            _ => RetryDecision::Rethrow,
        }
    }
}

/// Default retry policy - retries when there is a high chance that a retry might help.
/// Behaviour based on [DataStax Java Driver](https://docs.datastax.com/en/developer/java-driver/4.10/manual/core/retries/)
#[derive(Default)]
pub struct DefaultRetryPolicy;

impl RetryPolicy for DefaultRetryPolicy {
    fn new_session(&self) -> Box<dyn RetrySession + Send + Sync> {
        Box::<DefaultRetrySession>::default()
    }
}

#[derive(Default)]
pub struct DefaultRetrySession {
    was_unavailable_retry: bool,
    was_read_timeout_retry: bool,
    was_write_timeout_retry: bool,
}

impl RetrySession for DefaultRetrySession {
    fn decide(&mut self, query_info: QueryInfo) -> RetryDecision {
        let if_idempotent = |is_idempotent| {
            if is_idempotent {
                RetryDecision::RetryNextHost
            } else {
                RetryDecision::Rethrow
            }
        };

        match server_error_kind(query_info.error) {
            Some(ServerErrorKind::Overloaded)
            | Some(ServerErrorKind::Server)
            | Some(ServerErrorKind::Truncate) => if_idempotent(query_info.is_idempotent),
            Some(ServerErrorKind::Unavailable { .. }) => {
                if !self.was_unavailable_retry {
                    self.was_unavailable_retry = true;
                    RetryDecision::RetryNextHost
                } else {
                    RetryDecision::Rethrow
                }
            }
            Some(ServerErrorKind::ReadTimeout {
                received,
                block_for,
                data_present,
            }) => {
                if !self.was_read_timeout_retry && received >= block_for && !data_present {
                    self.was_read_timeout_retry = true;
                    RetryDecision::Retry
                } else {
                    RetryDecision::Rethrow
                }
            }
            Some(ServerErrorKind::WriteTimeout { write_type, .. }) => {
                if !self.was_write_timeout_retry
                    && query_info.is_idempotent
                    && *write_type == WriteType::BatchLog
                {
                    self.was_write_timeout_retry = true;
                    RetryDecision::Retry
                } else {
                    RetryDecision::Rethrow
                }
            }
            Some(ServerErrorKind::IsBootstrapping) => RetryDecision::RetryNextHost,
            Some(_) => RetryDecision::Rethrow,
            None => match query_info.error {
                Error::Io(_) | Error::General(_) | Error::Timeout(_) => {
                    if_idempotent(query_info.is_idempotent)
                }
                _ => RetryDecision::Rethrow,
            },
        }
    }
}
