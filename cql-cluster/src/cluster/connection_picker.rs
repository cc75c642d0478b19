use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::*;

use crate::routing::{Murmur3Token, Sharder};
use crate::transport::Connection;

/// Strategy choosing among live connections of a single host.
pub trait ConnectionPicker<T: Connection>: Send + Sync {
    /// Returns a connection suitable for given routing token, if any is available.
    fn pick(&self, token: Option<Murmur3Token>) -> Option<Arc<T>>;

    /// Returns the number of current and missing connections.
    fn size(&self) -> (usize, usize);

    /// Adds a new connection. Connections which cannot be used are closed.
    fn put(&mut self, connection: Arc<T>);

    /// Removes given connection, if present.
    fn remove(&mut self, connection: &T);

    /// Closes all connections.
    fn close(&mut self);
}

/// Cycles through connections, skipping closed ones.
pub struct RoundRobinConnectionPicker<T> {
    connections: Vec<Arc<T>>,
    size: usize,
    index: AtomicUsize,
}

impl<T: Connection> RoundRobinConnectionPicker<T> {
    pub fn new(size: usize) -> Self {
        RoundRobinConnectionPicker {
            connections: Vec::with_capacity(size),
            size,
            index: AtomicUsize::new(0),
        }
    }
}

impl<T: Connection> ConnectionPicker<T> for RoundRobinConnectionPicker<T> {
    fn pick(&self, _token: Option<Murmur3Token>) -> Option<Arc<T>> {
        let len = self.connections.len();
        if len == 0 {
            return None;
        }

        let start = self.index.fetch_add(1, Ordering::Relaxed);
        (0..len)
            .map(|offset| &self.connections[(start + offset) % len])
            .find(|connection| !connection.is_closed())
            .cloned()
    }

    #[inline]
    fn size(&self) -> (usize, usize) {
        let current = self.connections.len();
        (current, self.size.saturating_sub(current))
    }

    fn put(&mut self, connection: Arc<T>) {
        if self.connections.len() >= self.size {
            debug!(address = ?connection.address(), "Closing excess connection.");
            connection.close();
            return;
        }

        self.connections.push(connection);
    }

    fn remove(&mut self, connection: &T) {
        self.connections
            .retain(|existing| !ptr::eq(existing.as_ref(), connection));
    }

    fn close(&mut self) {
        for connection in self.connections.drain(..) {
            connection.close();
        }
    }
}

/// Keeps one connection per shard of a shard-per-core node and routes tokens to the connection
/// bound to the owning shard.
pub struct ShardAwareConnectionPicker<T> {
    sharder: Sharder,
    connections: Vec<Option<Arc<T>>>,
    current: usize,
    index: AtomicUsize,
}

impl<T: Connection> ShardAwareConnectionPicker<T> {
    pub fn new(sharder: Sharder) -> Self {
        ShardAwareConnectionPicker {
            sharder,
            connections: vec![None; sharder.nr_shards.get() as usize],
            current: 0,
            index: AtomicUsize::new(0),
        }
    }

    fn pick_any(&self) -> Option<Arc<T>> {
        let len = self.connections.len();
        let start = self.index.fetch_add(1, Ordering::Relaxed);

        (0..len)
            .filter_map(|offset| self.connections[(start + offset) % len].as_ref())
            .find(|connection| !connection.is_closed())
            .cloned()
    }
}

impl<T: Connection> ConnectionPicker<T> for ShardAwareConnectionPicker<T> {
    fn pick(&self, token: Option<Murmur3Token>) -> Option<Arc<T>> {
        if self.current == 0 {
            return None;
        }

        if let Some(token) = token {
            let shard = self.sharder.shard_of(token) as usize;
            if let Some(connection) = self.connections.get(shard).and_then(Option::as_ref) {
                if !connection.is_closed() {
                    return Some(connection.clone());
                }
            }
        }

        self.pick_any()
    }

    #[inline]
    fn size(&self) -> (usize, usize) {
        (self.current, self.connections.len() - self.current)
    }

    fn put(&mut self, connection: Arc<T>) {
        let slot = connection
            .shard_info()
            .map(|shard_info| shard_info.shard as usize)
            .and_then(|shard| self.connections.get_mut(shard));

        match slot {
            Some(slot) if slot.is_none() => {
                *slot = Some(connection);
                self.current += 1;
            }
            _ => {
                debug!(
                    address = ?connection.address(),
                    shard_info = ?connection.shard_info(),
                    "Closing connection to an already connected shard."
                );
                connection.close();
            }
        }
    }

    fn remove(&mut self, connection: &T) {
        let slot = self.connections.iter_mut().find(|slot| {
            slot.as_ref()
                .map(|existing| ptr::eq(existing.as_ref(), connection))
                .unwrap_or(false)
        });

        if let Some(slot) = slot {
            *slot = None;
            self.current -= 1;
        }
    }

    fn close(&mut self) {
        for connection in self.connections.iter_mut().filter_map(Option::take) {
            connection.close();
        }

        self.current = 0;
    }
}

/// Pool-side picker holder. The concrete picker is chosen from the capabilities of the first
/// established connection.
pub(crate) enum PickerState<T: Connection> {
    Uninitialized { size: usize },
    Initialized(Box<dyn ConnectionPicker<T>>),
}

impl<T: Connection + 'static> PickerState<T> {
    #[inline]
    pub(crate) fn new(size: usize) -> Self {
        PickerState::Uninitialized { size }
    }

    pub(crate) fn pick(&self, token: Option<Murmur3Token>) -> Option<Arc<T>> {
        match self {
            PickerState::Uninitialized { .. } => None,
            PickerState::Initialized(picker) => picker.pick(token),
        }
    }

    pub(crate) fn size(&self) -> (usize, usize) {
        match self {
            PickerState::Uninitialized { size } => (0, *size),
            PickerState::Initialized(picker) => picker.size(),
        }
    }

    pub(crate) fn put(&mut self, connection: Arc<T>) {
        if let PickerState::Uninitialized { size } = *self {
            let picker: Box<dyn ConnectionPicker<T>> = match connection.shard_info() {
                Some(shard_info) => {
                    debug!(
                        address = ?connection.address(),
                        nr_shards = shard_info.nr_shards.get(),
                        "Using shard-aware connection picker."
                    );
                    Box::new(ShardAwareConnectionPicker::new(shard_info.sharder()))
                }
                None => Box::new(RoundRobinConnectionPicker::new(size)),
            };

            *self = PickerState::Initialized(picker);
        }

        if let PickerState::Initialized(picker) = self {
            picker.put(connection);
        }
    }

    pub(crate) fn remove(&mut self, connection: &T) {
        if let PickerState::Initialized(picker) = self {
            picker.remove(connection);
        }
    }

    pub(crate) fn close(&mut self) {
        if let PickerState::Initialized(picker) = self {
            picker.close();
        }
    }
}
