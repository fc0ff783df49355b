//! RETAIN + USE_SERVANT_MANAGER
//!
//! Unknown ids are incarnated through the registered servant activator and
//! the result is cached in the active object map until deactivation.

use std::sync::Arc;

use tracing::debug;

use super::{not_found, Hold, Located, Mediator, RetainedStore};
use crate::adapter::Poa;
use crate::servant::ServantManager;
use crate::types::{ObjectId, PoaError, Result};

pub(crate) struct ActivatorMediator {
    store: Arc<RetainedStore>,
}

impl ActivatorMediator {
    pub fn new(store: Arc<RetainedStore>) -> Self {
        Self { store }
    }
}

impl Mediator for ActivatorMediator {
    fn name(&self) -> &'static str {
        "servant-activator"
    }

    fn locate(&self, poa: &Arc<Poa>, id: &ObjectId, _operation: &str) -> Result<Located> {
        match self.store.locate(poa, id, true)? {
            Some((entry, servant)) => Ok(Located {
                servant,
                hold: Hold::Entry(entry),
            }),
            None => Err(not_found(poa, id, "no servant manager")),
        }
    }

    fn store(&self) -> Option<&Arc<RetainedStore>> {
        Some(&self.store)
    }

    fn get_servant_manager(&self) -> Result<Option<ServantManager>> {
        Ok(self.store.activator().map(ServantManager::Activator))
    }

    fn set_servant_manager(&self, manager: ServantManager) -> Result<()> {
        match manager {
            ServantManager::Activator(activator) => {
                self.store.set_activator(activator)?;
                debug!("POA: servant activator registered");
                Ok(())
            }
            ServantManager::Locator(_) => Err(PoaError::ObjAdapter(
                "RETAIN adapters need a servant activator".to_string(),
            )),
        }
    }
}
