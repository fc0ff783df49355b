//! Object activation, servant registration and id/reference conversion

use std::sync::Arc;

use tracing::debug;

use super::poa::{Poa, PoaCore};
use crate::current::ThreadContext;
use crate::mediator::RetainedStore;
use crate::servant::{same_servant, ServantManager, ServantRef};
use crate::types::{ObjectId, ObjectReference, PoaError, RequestProcessingPolicy, Result};

fn retained(core: &PoaCore) -> Result<&Arc<RetainedStore>> {
    core.mediator.store().ok_or(PoaError::WrongPolicy("RETAIN"))
}

fn uses_default_servant(core: &PoaCore) -> bool {
    core.policies.request_processing() == RequestProcessingPolicy::DefaultServant
}

impl Poa {
    /// Activate a servant under a fresh system id
    pub fn activate_object(&self, servant: ServantRef) -> Result<ObjectId> {
        let core = self.core()?;
        let store = retained(&core)?;
        if !core.policies.is_system_id() {
            return Err(PoaError::WrongPolicy("SYSTEM_ID"));
        }
        let id = core.ids.next_id();
        store.activate(&id, servant)?;
        debug!("POA {}: activated {}", self.path(), id);
        Ok(id)
    }

    /// Activate a servant under a caller-chosen id
    ///
    /// On a SYSTEM_ID adapter the id must have been generated by this
    /// adapter.
    pub fn activate_object_with_id(&self, id: ObjectId, servant: ServantRef) -> Result<()> {
        let core = self.core()?;
        let store = retained(&core)?;
        if core.policies.is_system_id() && !core.ids.is_valid(&id) {
            return Err(PoaError::InvalidObjectId(id));
        }
        store.activate(&id, servant)?;
        debug!("POA {}: activated {}", self.path(), id);
        Ok(())
    }

    /// Deactivate an object
    ///
    /// Etherealization happens once the last invocation on the object has
    /// completed, possibly after this call returns.
    pub fn deactivate_object(self: &Arc<Self>, id: &ObjectId) -> Result<()> {
        let core = self.core()?;
        retained(&core)?.deactivate(self, id)
    }

    /// Number of objects in the active object map
    pub fn active_object_count(&self) -> Result<usize> {
        let core = self.core()?;
        Ok(retained(&core)?.map().len())
    }

    /// Create a reference for a new system id without activating anything
    pub fn create_reference(&self, type_id: &str) -> Result<ObjectReference> {
        let core = self.core()?;
        if !core.policies.is_system_id() {
            return Err(PoaError::WrongPolicy("SYSTEM_ID"));
        }
        let id = core.ids.next_id();
        Ok(self.reference_for(&core, id, type_id))
    }

    pub fn create_reference_with_id(&self, id: ObjectId, type_id: &str) -> Result<ObjectReference> {
        let core = self.core()?;
        if core.policies.is_system_id() && !core.ids.is_valid(&id) {
            return Err(PoaError::InvalidObjectId(id));
        }
        Ok(self.reference_for(&core, id, type_id))
    }

    /// Reference for `id`, without any policy or activity check
    pub(crate) fn make_reference(&self, id: ObjectId, type_id: &str) -> Result<ObjectReference> {
        let core = self.core()?;
        Ok(self.reference_for(&core, id, type_id))
    }

    fn reference_for(&self, core: &PoaCore, id: ObjectId, type_id: &str) -> ObjectReference {
        let stamp = (!core.policies.is_persistent()).then_some(core.stamp);
        ObjectReference::new(self.server_id(), type_id, self.path().clone(), stamp, id)
    }

    /// Id a servant is active under, activating it implicitly when the
    /// policies allow
    pub fn servant_to_id(self: &Arc<Self>, servant: &ServantRef) -> Result<ObjectId> {
        let core = self.core()?;
        let policies = &core.policies;
        let default_servant = uses_default_servant(&core);
        if !default_servant
            && !(policies.is_retained() && (policies.is_unique_id() || policies.is_implicit()))
        {
            return Err(PoaError::WrongPolicy(
                "RETAIN with UNIQUE_ID or IMPLICIT_ACTIVATION, or USE_DEFAULT_SERVANT",
            ));
        }

        if let Some(store) = core.mediator.store() {
            if policies.is_unique_id() {
                if let Some(id) = store.map().servant_to_ids(servant).into_iter().next() {
                    return Ok(id);
                }
            }
            if policies.is_implicit() {
                let id = core.ids.next_id();
                match store.activate(&id, servant.clone()) {
                    Ok(()) => {
                        debug!("POA {}: implicitly activated {}", self.path(), id);
                        return Ok(id);
                    }
                    // Another thread activated it first
                    Err(PoaError::ServantAlreadyActive) => {
                        if let Some(id) = store.map().servant_to_ids(servant).into_iter().next() {
                            return Ok(id);
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if default_servant {
            if let Some(frame) = ThreadContext::current_frame() {
                let is_default = core
                    .mediator
                    .default_servant()
                    .map_or(false, |d| same_servant(&d, servant));
                if is_default && Arc::ptr_eq(&frame.poa, self) && same_servant(&frame.servant, servant)
                {
                    return Ok(frame.id);
                }
            }
        }
        Err(PoaError::ServantNotActive)
    }

    pub fn servant_to_reference(self: &Arc<Self>, servant: &ServantRef) -> Result<ObjectReference> {
        // Inside an invocation on this servant: the target of that invocation
        if let Some(frame) = ThreadContext::current_frame() {
            if Arc::ptr_eq(&frame.poa, self) && same_servant(&frame.servant, servant) {
                let type_id = servant.primary_interface(&frame.id, self.path());
                return self.make_reference(frame.id, &type_id);
            }
        }
        let id = self.servant_to_id(servant)?;
        let type_id = servant.primary_interface(&id, self.path());
        self.make_reference(id, &type_id)
    }

    /// Servant for the object a reference designates
    pub fn reference_to_servant(&self, reference: &ObjectReference) -> Result<ServantRef> {
        let id = self.reference_to_id(reference)?;
        self.id_to_servant(&id)
    }

    /// Object id carried by a reference created by this adapter
    pub fn reference_to_id(&self, reference: &ObjectReference) -> Result<ObjectId> {
        if reference.adapter_path() != self.path() {
            return Err(PoaError::WrongAdapter(self.path().to_string()));
        }
        let core = self.core()?;
        if let Some(stamp) = reference.adapter_stamp() {
            if !core.policies.is_persistent() && stamp != core.stamp {
                return Err(PoaError::WrongAdapter(self.path().to_string()));
            }
        }
        Ok(reference.object_id().clone())
    }

    pub fn id_to_servant(&self, id: &ObjectId) -> Result<ServantRef> {
        let core = self.core()?;
        let default_servant = uses_default_servant(&core);
        if !core.policies.is_retained() && !default_servant {
            return Err(PoaError::WrongPolicy("RETAIN or USE_DEFAULT_SERVANT"));
        }
        core.mediator
            .store()
            .and_then(|store| store.map().id_to_servant(id))
            .or_else(|| core.mediator.default_servant())
            .ok_or_else(|| PoaError::ObjectNotActive(id.clone()))
    }

    pub fn id_to_reference(&self, id: &ObjectId) -> Result<ObjectReference> {
        let core = self.core()?;
        let servant = retained(&core)?
            .map()
            .id_to_servant(id)
            .ok_or_else(|| PoaError::ObjectNotActive(id.clone()))?;
        let type_id = servant.primary_interface(id, self.path());
        Ok(self.reference_for(&core, id.clone(), &type_id))
    }

    pub fn get_servant(&self) -> Result<ServantRef> {
        self.core()?.mediator.get_servant()
    }

    pub fn set_servant(&self, servant: ServantRef) -> Result<()> {
        self.core()?.mediator.set_servant(servant)
    }

    pub fn get_servant_manager(&self) -> Result<Option<ServantManager>> {
        self.core()?.mediator.get_servant_manager()
    }

    /// Register the servant manager; allowed once per adapter
    pub fn set_servant_manager(&self, manager: ServantManager) -> Result<()> {
        self.core()?.mediator.set_servant_manager(manager)
    }
}
