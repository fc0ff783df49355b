//! State shared by the RETAIN resolution strategies
//!
//! Owns the active object map and, for the servant-activator strategy, the
//! registered activator. Incarnation goes through the entry state machine so
//! concurrent requests for one id incarnate once; etherealization runs after
//! the last invocation holding the entry has left.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tracing::{debug, error};

use crate::adapter::Poa;
use crate::aom::{ActiveObjectMap, Entry, Lookup, Teardown};
use crate::executor::Executor;
use crate::servant::{guard_notification, guard_upcall, ServantActivator, ServantRef};
use crate::types::{ObjectId, PoaError, PolicyTable, Result};

pub(crate) struct RetainedStore {
    map: ActiveObjectMap,
    activator: OnceLock<Arc<dyn ServantActivator>>,
    executor: Arc<Executor>,
    background: bool,
}

impl RetainedStore {
    pub fn new(
        policies: &PolicyTable,
        executor: Arc<Executor>,
        poll: Duration,
        background: bool,
    ) -> Self {
        Self {
            map: ActiveObjectMap::new(policies.id_uniqueness(), poll),
            activator: OnceLock::new(),
            executor,
            background,
        }
    }

    pub fn map(&self) -> &ActiveObjectMap {
        &self.map
    }

    pub fn activator(&self) -> Option<Arc<dyn ServantActivator>> {
        self.activator.get().cloned()
    }

    /// Register the activator; only one registration is allowed
    pub fn set_activator(&self, activator: Arc<dyn ServantActivator>) -> Result<()> {
        self.activator
            .set(activator)
            .map_err(|_| PoaError::BadInvOrder("servant manager already set".to_string()))
    }

    /// Find the servant for `id`, incarnating it when `incarnate` is set and
    /// an activator is registered
    ///
    /// On success the caller holds the returned entry and must hand it back
    /// through [`release`](Self::release).
    pub fn locate(
        &self,
        poa: &Arc<Poa>,
        id: &ObjectId,
        incarnate: bool,
    ) -> Result<Option<(Arc<Entry>, ServantRef)>> {
        let activator = if incarnate { self.activator() } else { None };
        loop {
            match self.map.enter(id, activator.is_some())? {
                Lookup::Missing => return Ok(None),
                Lookup::Active(entry, servant) => return Ok(Some((entry, servant))),
                Lookup::Busy(entry) => entry.wait_while_busy(),
                Lookup::Incarnate(entry) => {
                    let Some(activator) = &activator else {
                        self.map.abort_incarnation(&entry)?;
                        return Ok(None);
                    };
                    debug!("POA {}: incarnating {}", poa.path(), id);
                    return match guard_upcall("incarnate", id, || activator.incarnate(id, poa)) {
                        Ok(servant) => {
                            self.map.complete_incarnation(&entry, servant.clone())?;
                            Ok(Some((entry, servant)))
                        }
                        Err(e) => {
                            self.map.abort_incarnation(&entry)?;
                            Err(e)
                        }
                    };
                }
            }
        }
    }

    /// Give back a hold taken by [`locate`](Self::locate)
    pub fn release(self: &Arc<Self>, poa: &Arc<Poa>, entry: &Arc<Entry>) {
        match entry.exit() {
            Ok(Some((servant, teardown))) => self.dispose(poa, entry.clone(), servant, teardown, true),
            Ok(None) => {}
            Err(e) => error!("POA {}: releasing {} failed: {}", poa.path(), entry.id(), e),
        }
    }

    pub fn activate(&self, id: &ObjectId, servant: ServantRef) -> Result<()> {
        self.map.activate(id, servant)
    }

    /// Deactivate one object; etherealization may be deferred to the last
    /// invocation still using it
    pub fn deactivate(self: &Arc<Self>, poa: &Arc<Poa>, id: &ObjectId) -> Result<()> {
        let teardown = Teardown {
            etherealize: true,
            cleanup: false,
        };
        if let Some((entry, servant, teardown)) = self.map.deactivate(id, teardown)? {
            self.dispose(poa, entry, servant, teardown, true);
        }
        debug!("POA {}: deactivated {}", poa.path(), id);
        Ok(())
    }

    /// Deactivate every active object, inline
    ///
    /// Used by adapter destruction and manager deactivation after
    /// invocations have drained.
    pub fn deactivate_all(self: &Arc<Self>, poa: &Arc<Poa>, etherealize: bool) -> usize {
        let teardown = Teardown {
            etherealize,
            cleanup: true,
        };
        let mut count = 0;
        for id in self.map.active_ids() {
            match self.map.deactivate(&id, teardown) {
                Ok(Some((entry, servant, teardown))) => {
                    self.dispose(poa, entry, servant, teardown, false);
                    count += 1;
                }
                Ok(None) => count += 1,
                // Deactivated concurrently
                Err(PoaError::ObjectNotActive(_)) => {}
                Err(e) => error!("POA {}: deactivating {} failed: {}", poa.path(), id, e),
            }
        }
        count
    }

    fn dispose(
        self: &Arc<Self>,
        poa: &Arc<Poa>,
        entry: Arc<Entry>,
        servant: ServantRef,
        teardown: Teardown,
        allow_background: bool,
    ) {
        let upcall = teardown.etherealize && self.activator.get().is_some();
        if upcall && allow_background && self.background && poa.hold_for_background() {
            let store = self.clone();
            let poa = poa.clone();
            self.executor.spawn("etherealize", move || {
                store.etherealize(&poa, &entry, servant, teardown);
                if let Err(e) = poa.exit() {
                    error!("POA {}: {}", poa.path(), e);
                }
            });
        } else {
            self.etherealize(poa, &entry, servant, teardown);
        }
    }

    fn etherealize(&self, poa: &Arc<Poa>, entry: &Arc<Entry>, servant: ServantRef, teardown: Teardown) {
        let remaining = self.map.unbind(entry, &servant);
        if teardown.etherealize {
            if let Some(activator) = self.activator.get() {
                debug!("POA {}: etherealizing {}", poa.path(), entry.id());
                guard_notification("etherealize", entry.id(), || {
                    activator.etherealize(entry.id(), poa, servant, teardown.cleanup, remaining)
                });
            }
        }
        if let Err(e) = self.map.finish(entry) {
            error!("POA {}: {}", poa.path(), e);
        }
    }
}
