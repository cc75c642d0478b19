use futures::future::BoxFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::{Connection, ConnectionErrorHandler};

/// Manages establishing connections to nodes. Implementations own dialing, authentication,
/// TLS and protocol negotiation.
pub trait ConnectionManager<T: Connection>: Send + Sync {
    /// Tries to establish a new, ready to use connection with an optional error handler.
    fn connection(
        &self,
        addr: SocketAddr,
        error_handler: Option<Arc<dyn ConnectionErrorHandler<T>>>,
    ) -> BoxFuture<'_, Result<T>>;
}

/// Establishes a connection, giving up after an optional timeout.
pub(crate) async fn new_connection<T: Connection, CM: ConnectionManager<T> + ?Sized>(
    connection_manager: &CM,
    addr: SocketAddr,
    timeout: Option<Duration>,
    error_handler: Option<Arc<dyn ConnectionErrorHandler<T>>>,
) -> Result<T> {
    if let Some(timeout) = timeout {
        tokio::time::timeout(timeout, connection_manager.connection(addr, error_handler))
            .await
            .map_err(|_| Error::Timeout(format!("Timeout waiting for connection to: {addr}")))
            .and_then(|result| result)
    } else {
        connection_manager.connection(addr, error_handler).await
    }
}
