//! Adapter publication
//!
//! The factory publishes the root adapter and every PERSISTENT adapter under
//! `"<server_id>/<path>"` so the transport layer can route requests for
//! them, and withdraws the entry when the adapter is destroyed.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::types::AdapterPath;

/// Registration hook for dispatch targets
pub trait AdapterRegistry: Send + Sync {
    /// Publish the adapter at `path` under `key`, replacing any previous entry
    fn publish(&self, key: &str, path: &AdapterPath);

    /// Remove the entry for `key`, if any
    fn withdraw(&self, key: &str);
}

/// In-process registry
#[derive(Debug, Default)]
pub struct LocalRegistry {
    entries: RwLock<HashMap<String, AdapterPath>>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lookup the adapter published under `key`
    pub fn lookup(&self, key: &str) -> Option<AdapterPath> {
        self.entries.read().get(key).cloned()
    }

    /// Published keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl AdapterRegistry for LocalRegistry {
    fn publish(&self, key: &str, path: &AdapterPath) {
        debug!("Registry: publishing {} -> {}", key, path);
        self.entries.write().insert(key.to_string(), path.clone());
    }

    fn withdraw(&self, key: &str) {
        debug!("Registry: withdrawing {}", key);
        self.entries.write().remove(key);
    }
}
