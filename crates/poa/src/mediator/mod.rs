//! Policy-driven servant resolution
//!
//! Each adapter owns exactly one mediator, chosen from its policy table:
//!
//! | retention  | request processing    | mediator                    |
//! |------------|-----------------------|-----------------------------|
//! | RETAIN     | active object map     | [`ActiveMapMediator`]       |
//! | RETAIN     | default servant       | [`RetainedDefaultServant`]  |
//! | RETAIN     | servant manager       | [`ActivatorMediator`]       |
//! | NON_RETAIN | default servant       | [`DefaultServantMediator`]  |
//! | NON_RETAIN | servant manager       | [`LocatorMediator`]         |
//!
//! Operations a mediator does not support fail with `WrongPolicy`.

mod active_map;
mod default_servant;
mod retained;
mod servant_activator;
mod servant_locator;

use std::sync::Arc;
use std::time::Duration;

pub(crate) use active_map::ActiveMapMediator;
pub(crate) use default_servant::{DefaultServantMediator, RetainedDefaultServant};
pub(crate) use retained::RetainedStore;
pub(crate) use servant_activator::ActivatorMediator;
pub(crate) use servant_locator::LocatorMediator;

use crate::adapter::Poa;
use crate::aom::Entry;
use crate::executor::Executor;
use crate::servant::{guard_notification, Cookie, ServantLocator, ServantManager, ServantRef};
use crate::types::{
    ObjectId, PoaError, PolicyTable, RequestProcessingPolicy, Result, ServantRetentionPolicy,
};

/// What an invocation holds on to until it completes
pub(crate) enum Hold {
    Nothing,
    /// Entry of the active object map
    Entry(Arc<Entry>),
    /// Locator to call `postinvoke` on, with the `preinvoke` cookie
    Locator {
        locator: Arc<dyn ServantLocator>,
        cookie: Cookie,
    },
}

/// Servant resolved for one invocation
pub(crate) struct Located {
    pub servant: ServantRef,
    pub hold: Hold,
}

impl Located {
    pub fn unheld(servant: ServantRef) -> Self {
        Self {
            servant,
            hold: Hold::Nothing,
        }
    }
}

pub(crate) trait Mediator: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Resolve the servant for one invocation of `operation` on `id`
    fn locate(&self, poa: &Arc<Poa>, id: &ObjectId, operation: &str) -> Result<Located>;

    /// Complete an invocation started by [`locate`](Self::locate)
    fn release(&self, poa: &Arc<Poa>, id: &ObjectId, operation: &str, located: Located) {
        match located.hold {
            Hold::Nothing => {}
            Hold::Entry(entry) => {
                if let Some(store) = self.store() {
                    store.release(poa, &entry);
                }
            }
            Hold::Locator { locator, cookie } => {
                let servant = located.servant;
                guard_notification("postinvoke", id, || {
                    locator.postinvoke(id, poa, operation, cookie, servant)
                });
            }
        }
    }

    /// Active object map, for RETAIN mediators
    fn store(&self) -> Option<&Arc<RetainedStore>> {
        None
    }

    /// Registered default servant, if any
    fn default_servant(&self) -> Option<ServantRef> {
        None
    }

    fn get_servant(&self) -> Result<ServantRef> {
        Err(PoaError::WrongPolicy("USE_DEFAULT_SERVANT"))
    }

    fn set_servant(&self, _servant: ServantRef) -> Result<()> {
        Err(PoaError::WrongPolicy("USE_DEFAULT_SERVANT"))
    }

    fn get_servant_manager(&self) -> Result<Option<ServantManager>> {
        Err(PoaError::WrongPolicy("USE_SERVANT_MANAGER"))
    }

    fn set_servant_manager(&self, _manager: ServantManager) -> Result<()> {
        Err(PoaError::WrongPolicy("USE_SERVANT_MANAGER"))
    }
}

/// Select the mediator for a validated policy table
pub(crate) fn build(
    policies: &PolicyTable,
    executor: Arc<Executor>,
    poll: Duration,
    background: bool,
) -> Result<Box<dyn Mediator>> {
    let store = || Arc::new(RetainedStore::new(policies, executor.clone(), poll, background));
    let mediator: Box<dyn Mediator> =
        match (policies.servant_retention(), policies.request_processing()) {
            (ServantRetentionPolicy::Retain, RequestProcessingPolicy::ActiveObjectMapOnly) => {
                Box::new(ActiveMapMediator::new(store()))
            }
            (ServantRetentionPolicy::Retain, RequestProcessingPolicy::DefaultServant) => {
                Box::new(RetainedDefaultServant::new(store()))
            }
            (ServantRetentionPolicy::Retain, RequestProcessingPolicy::ServantManager) => {
                Box::new(ActivatorMediator::new(store()))
            }
            (ServantRetentionPolicy::NonRetain, RequestProcessingPolicy::DefaultServant) => {
                Box::new(DefaultServantMediator::new())
            }
            (ServantRetentionPolicy::NonRetain, RequestProcessingPolicy::ServantManager) => {
                Box::new(LocatorMediator::new())
            }
            (ServantRetentionPolicy::NonRetain, RequestProcessingPolicy::ActiveObjectMapOnly) => {
                return Err(PoaError::WrongPolicy(
                    "NON_RETAIN with USE_ACTIVE_OBJECT_MAP_ONLY",
                ))
            }
        };
    Ok(mediator)
}

fn not_found(poa: &Poa, id: &ObjectId, why: &str) -> PoaError {
    PoaError::ObjectNotExist(format!("{} in {}: {}", id, poa.path(), why))
}
