use std::io;
use std::net::SocketAddr;
use std::result;
use thiserror::Error as ThisError;
use uuid::Uuid;

pub type Result<T> = result::Result<T, Error>;

/// Cluster engine error type. Errors fall into a few families: transport errors reported by
/// connections (`Io`, `Timeout`, `Server`), topology errors raised while describing the cluster,
/// pool errors raised when a host cannot serve a request, and execution errors surfaced by the
/// query executor once every attempt is exhausted.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Internal IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// General error
    #[error("General error: {0}")]
    General(String),
    /// Timed out waiting for an operation to complete.
    #[error("Timeout: {0}")]
    Timeout(String),
    /// Error returned by a server in response to a request.
    #[error("Server {addr} error: {body}")]
    Server { body: ServerError, addr: SocketAddr },
    /// No control connection is currently established.
    #[error("No control connection available")]
    NoControlConnection,
    /// The control connection returned a view of the cluster which is internally inconsistent.
    #[error("Invalid control connection: {0}")]
    InvalidControlConnection(String),
    /// A host was resolved, but its connect address cannot be used.
    #[error("Invalid connect address {address} for host {host_id}")]
    InvalidConnectAddress { host_id: Uuid, address: SocketAddr },
    /// There is no connection pool for the given host.
    #[error("No connection pool for host: {0}")]
    NoPool(String),
    /// The connection pool for the given host has no live connections.
    #[error("No connections in pool for host: {0}")]
    NoConnectionsInPool(String),
    /// The selected host is down.
    #[error("Host is down")]
    HostDown,
    /// The host sequence was exhausted without any attempt being made.
    #[error("No hosts available")]
    NoHostsAvailable,
    /// A retry policy produced a decision the executor doesn't understand.
    #[error("Unknown retry decision: {0}")]
    UnknownRetryDecision(u8),
    /// The query was cancelled by the caller.
    #[error("Query cancelled")]
    Cancelled,
    /// The query deadline passed before a result was available.
    #[error("Query deadline exceeded")]
    DeadlineExceeded,
    /// A failed query, annotated with execution metadata.
    #[error(transparent)]
    Query(#[from] QueryError),
}

impl Error {
    /// Internal errors signal a defect in a supplied policy or in the engine itself and are
    /// never subject to retries.
    pub fn is_internal(&self) -> bool {
        match self {
            Error::UnknownRetryDecision(_) => true,
            Error::Query(error) => error.error.is_internal(),
            _ => false,
        }
    }

    /// Checks if this error comes from the caller cancelling the query or its deadline expiring.
    pub fn is_cancellation(&self) -> bool {
        match self {
            Error::Cancelled | Error::DeadlineExceeded => true,
            Error::Query(error) => error.error.is_cancellation(),
            _ => false,
        }
    }

    /// Network errors which will not go away by retrying a dial right away (ex: network
    /// unreachable, connection refused).
    pub fn is_permanent_network_error(&self) -> bool {
        match self {
            Error::Io(error) => !matches!(
                error.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::Other
            ),
            _ => false,
        }
    }

    /// Dial errors which are common during node outages and don't deserve loud logging.
    pub(crate) fn is_dial_refusal(&self) -> bool {
        match self {
            Error::Io(error) => matches!(
                error.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }

    /// Returns whether the request could have reached a server. Only meaningful for errors
    /// returned by the executor.
    pub fn is_potentially_executed(&self) -> bool {
        match self {
            Error::Query(error) => error.potentially_executed,
            _ => false,
        }
    }
}

impl From<String> for Error {
    fn from(err: String) -> Error {
        Error::General(err)
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Error {
        Error::General(err.to_string())
    }
}

impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            Error::Io(error) => Error::Io(io::Error::new(
                error.kind(),
                error
                    .get_ref()
                    .map(|error| error.to_string())
                    .unwrap_or_default(),
            )),
            Error::General(error) => Error::General(error.clone()),
            Error::Timeout(error) => Error::Timeout(error.clone()),
            Error::Server { body, addr } => Error::Server {
                body: body.clone(),
                addr: *addr,
            },
            Error::NoControlConnection => Error::NoControlConnection,
            Error::InvalidControlConnection(error) => {
                Error::InvalidControlConnection(error.clone())
            }
            Error::InvalidConnectAddress { host_id, address } => Error::InvalidConnectAddress {
                host_id: *host_id,
                address: *address,
            },
            Error::NoPool(host) => Error::NoPool(host.clone()),
            Error::NoConnectionsInPool(host) => Error::NoConnectionsInPool(host.clone()),
            Error::HostDown => Error::HostDown,
            Error::NoHostsAvailable => Error::NoHostsAvailable,
            Error::UnknownRetryDecision(value) => Error::UnknownRetryDecision(*value),
            Error::Cancelled => Error::Cancelled,
            Error::DeadlineExceeded => Error::DeadlineExceeded,
            Error::Query(error) => Error::Query(error.clone()),
        }
    }
}

/// Error of a query which went through the executor. Carries information needed to decide if
/// it's safe to re-issue the query.
#[derive(Debug, Clone, ThisError)]
#[error("{error} (potentially executed: {potentially_executed}, idempotent: {idempotent})")]
pub struct QueryError {
    #[source]
    pub error: Box<Error>,
    /// The request might have reached a server, even though no successful response has been
    /// received.
    pub potentially_executed: bool,
    pub idempotent: bool,
}

impl QueryError {
    pub fn new(error: Error, potentially_executed: bool, idempotent: bool) -> Self {
        QueryError {
            error: Box::new(error),
            potentially_executed,
            idempotent,
        }
    }

    /// Annotates an error, merging the metadata if the error is already annotated.
    pub(crate) fn annotate(error: Error, potentially_executed: bool, idempotent: bool) -> Self {
        match error {
            Error::Query(mut error) => {
                error.potentially_executed |= potentially_executed;
                error.idempotent = idempotent;
                error
            }
            error => QueryError::new(error, potentially_executed, idempotent),
        }
    }
}

/// Server error as classified by the protocol layer.
#[derive(Debug, PartialEq, Eq, Clone, ThisError)]
#[error("{kind:?}: {message}")]
pub struct ServerError {
    pub kind: ServerErrorKind,
    pub message: String,
}

impl ServerError {
    pub fn new(kind: ServerErrorKind, message: impl Into<String>) -> Self {
        ServerError {
            kind,
            message: message.into(),
        }
    }
}

/// Kind of server write which timed out.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum WriteType {
    Simple,
    Batch,
    UnloggedBatch,
    Counter,
    BatchLog,
    Cas,
    View,
    Cdc,
}

/// Server error classes relevant to retrying.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ServerErrorKind {
    Server,
    Overloaded,
    IsBootstrapping,
    Truncate,
    Unavailable {
        required: i32,
        alive: i32,
    },
    ReadTimeout {
        received: i32,
        block_for: i32,
        data_present: bool,
    },
    WriteTimeout {
        received: i32,
        block_for: i32,
        write_type: WriteType,
    },
    Invalid,
    Other(i32),
}
