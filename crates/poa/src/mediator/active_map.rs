//! RETAIN + USE_ACTIVE_OBJECT_MAP_ONLY

use std::sync::Arc;

use super::{not_found, Hold, Located, Mediator, RetainedStore};
use crate::adapter::Poa;
use crate::types::{ObjectId, Result};

/// Resolves ids through the active object map only
pub(crate) struct ActiveMapMediator {
    store: Arc<RetainedStore>,
}

impl ActiveMapMediator {
    pub fn new(store: Arc<RetainedStore>) -> Self {
        Self { store }
    }
}

impl Mediator for ActiveMapMediator {
    fn name(&self) -> &'static str {
        "active-map"
    }

    fn locate(&self, poa: &Arc<Poa>, id: &ObjectId, _operation: &str) -> Result<Located> {
        match self.store.locate(poa, id, false)? {
            Some((entry, servant)) => Ok(Located {
                servant,
                hold: Hold::Entry(entry),
            }),
            None => Err(not_found(poa, id, "object not active")),
        }
    }

    fn store(&self) -> Option<&Arc<RetainedStore>> {
        Some(&self.store)
    }
}
