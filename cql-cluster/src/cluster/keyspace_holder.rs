use arc_swap::ArcSwapOption;
use std::sync::Arc;

/// Holds the keyspace every new pooled connection switches to.
#[derive(Default, Debug)]
pub struct KeyspaceHolder {
    keyspace: ArcSwapOption<String>,
}

impl KeyspaceHolder {
    pub fn new(keyspace: Option<String>) -> Self {
        KeyspaceHolder {
            keyspace: ArcSwapOption::new(keyspace.map(Arc::new)),
        }
    }

    #[inline]
    pub fn keyspace(&self) -> Option<Arc<String>> {
        self.keyspace.load_full()
    }

    /// Changes the keyspace for connections established from now on. Existing connections are
    /// not affected.
    #[inline]
    pub fn set_keyspace(&self, keyspace: Option<String>) {
        self.keyspace.store(keyspace.map(Arc::new));
    }
}
