//! USE_DEFAULT_SERVANT, with and without retention

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::{not_found, Hold, Located, Mediator, RetainedStore};
use crate::adapter::Poa;
use crate::servant::ServantRef;
use crate::types::{ObjectId, PoaError, Result};

/// The one servant answering for every id not otherwise bound
#[derive(Default)]
struct DefaultSlot {
    servant: RwLock<Option<ServantRef>>,
}

impl DefaultSlot {
    fn get(&self) -> Option<ServantRef> {
        self.servant.read().clone()
    }

    fn set(&self, servant: ServantRef) {
        *self.servant.write() = Some(servant);
    }

    fn locate(&self, poa: &Poa, id: &ObjectId) -> Result<Located> {
        self.get()
            .map(Located::unheld)
            .ok_or_else(|| not_found(poa, id, "no default servant"))
    }
}

/// RETAIN + USE_DEFAULT_SERVANT: map first, default servant otherwise
pub(crate) struct RetainedDefaultServant {
    store: Arc<RetainedStore>,
    slot: DefaultSlot,
}

impl RetainedDefaultServant {
    pub fn new(store: Arc<RetainedStore>) -> Self {
        Self {
            store,
            slot: DefaultSlot::default(),
        }
    }
}

impl Mediator for RetainedDefaultServant {
    fn name(&self) -> &'static str {
        "retained-default-servant"
    }

    fn locate(&self, poa: &Arc<Poa>, id: &ObjectId, _operation: &str) -> Result<Located> {
        match self.store.locate(poa, id, false)? {
            Some((entry, servant)) => Ok(Located {
                servant,
                hold: Hold::Entry(entry),
            }),
            None => self.slot.locate(poa, id),
        }
    }

    fn store(&self) -> Option<&Arc<RetainedStore>> {
        Some(&self.store)
    }

    fn default_servant(&self) -> Option<ServantRef> {
        self.slot.get()
    }

    fn get_servant(&self) -> Result<ServantRef> {
        self.slot.get().ok_or(PoaError::NoServant)
    }

    fn set_servant(&self, servant: ServantRef) -> Result<()> {
        debug!("POA: default servant registered");
        self.slot.set(servant);
        Ok(())
    }
}

/// NON_RETAIN + USE_DEFAULT_SERVANT: every request goes to the default servant
#[derive(Default)]
pub(crate) struct DefaultServantMediator {
    slot: DefaultSlot,
}

impl DefaultServantMediator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Mediator for DefaultServantMediator {
    fn name(&self) -> &'static str {
        "default-servant"
    }

    fn locate(&self, poa: &Arc<Poa>, id: &ObjectId, _operation: &str) -> Result<Located> {
        self.slot.locate(poa, id)
    }

    fn default_servant(&self) -> Option<ServantRef> {
        self.slot.get()
    }

    fn get_servant(&self) -> Result<ServantRef> {
        self.slot.get().ok_or(PoaError::NoServant)
    }

    fn set_servant(&self, servant: ServantRef) -> Result<()> {
        debug!("POA: default servant registered");
        self.slot.set(servant);
        Ok(())
    }
}
