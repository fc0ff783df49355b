//! NON_RETAIN + USE_SERVANT_MANAGER
//!
//! Every request calls `preinvoke` on the registered servant locator and the
//! matching `postinvoke` when it completes. Nothing is cached.

use std::sync::{Arc, OnceLock};

use tracing::debug;

use super::{not_found, Hold, Located, Mediator};
use crate::adapter::Poa;
use crate::servant::{guard_upcall, ServantLocator, ServantManager};
use crate::types::{ObjectId, PoaError, Result};

#[derive(Default)]
pub(crate) struct LocatorMediator {
    locator: OnceLock<Arc<dyn ServantLocator>>,
}

impl LocatorMediator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Mediator for LocatorMediator {
    fn name(&self) -> &'static str {
        "servant-locator"
    }

    fn locate(&self, poa: &Arc<Poa>, id: &ObjectId, operation: &str) -> Result<Located> {
        let locator = self
            .locator
            .get()
            .cloned()
            .ok_or_else(|| not_found(poa, id, "no servant manager"))?;
        let (servant, cookie) =
            guard_upcall("preinvoke", id, || locator.preinvoke(id, poa, operation))?;
        Ok(Located {
            servant,
            hold: Hold::Locator { locator, cookie },
        })
    }

    fn get_servant_manager(&self) -> Result<Option<ServantManager>> {
        Ok(self.locator.get().cloned().map(ServantManager::Locator))
    }

    fn set_servant_manager(&self, manager: ServantManager) -> Result<()> {
        match manager {
            ServantManager::Locator(locator) => {
                self.locator
                    .set(locator)
                    .map_err(|_| PoaError::BadInvOrder("servant manager already set".to_string()))?;
                debug!("POA: servant locator registered");
                Ok(())
            }
            ServantManager::Activator(_) => Err(PoaError::ObjAdapter(
                "NON_RETAIN adapters need a servant locator".to_string(),
            )),
        }
    }
}
