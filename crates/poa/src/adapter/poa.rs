//! Adapter instance: lifecycle, adapter tree and invocation admission
//!
//! Lock order: a parent adapter is locked before a child, an adapter before
//! its manager, and the factory tables last. No lock of any adapter is held
//! while a user callback runs.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::serial::SerialGate;
use super::state::PoaState;
use crate::current::ThreadContext;
use crate::executor::{panic_message, Executor};
use crate::factory::PoaFactory;
use crate::invocation::{Admission, Invocation};
use crate::manager::PoaManager;
use crate::mediator::{self, Mediator};
use crate::servant::AdapterActivator;
use crate::types::{
    generate_stamp, AdapterPath, IdGenerator, ObjectId, PoaError, Policy, PolicyTable, Result,
    ThreadPolicy,
};

/// Everything an adapter gets once it is initialized
pub(crate) struct PoaCore {
    pub manager: Arc<PoaManager>,
    pub policies: PolicyTable,
    pub mediator: Box<dyn Mediator>,
    pub ids: IdGenerator,
    /// Creation stamp; embedded in transient references
    pub stamp: u64,
    pub serial: Option<SerialGate>,
}

impl PoaCore {
    fn new(manager: Arc<PoaManager>, policies: PolicyTable, factory: &PoaFactory) -> Result<Self> {
        let config = factory.config();
        let stamp = generate_stamp();
        let mediator = mediator::build(
            &policies,
            factory.executor().clone(),
            config.wait_poll_interval,
            config.background_etherealization,
        )?;
        debug!("POA core: {} mediator, manager {}", mediator.name(), manager.id());
        let serial = (policies.thread() == ThreadPolicy::SingleThread)
            .then(|| SerialGate::new(config.wait_poll_interval));
        Ok(Self {
            manager,
            policies,
            mediator,
            ids: IdGenerator::new(policies.lifespan(), stamp),
            stamp,
            serial,
        })
    }
}

struct PoaInner {
    state: PoaState,
    core: Option<Arc<PoaCore>>,
    parent: Option<Weak<Poa>>,
    children: HashMap<String, Arc<Poa>>,
    activator: Option<Arc<dyn AdapterActivator>>,
}

/// Portable Object Adapter instance
pub struct Poa {
    name: String,
    path: AdapterPath,
    factory: Weak<PoaFactory>,
    executor: Arc<Executor>,
    server_id: String,
    poll: Duration,
    inner: RwLock<PoaInner>,
    /// Invocations (and background etherealizations) in progress
    invocations: AtomicUsize,
    signal: Mutex<()>,
    cond: Condvar,
}

impl Poa {
    fn blank(name: &str, path: AdapterPath, factory: &Arc<PoaFactory>, parent: Option<&Arc<Poa>>) -> Self {
        let config = factory.config();
        Self {
            name: name.to_string(),
            path,
            factory: Arc::downgrade(factory),
            executor: factory.executor().clone(),
            server_id: config.server_id.clone(),
            poll: config.wait_poll_interval,
            inner: RwLock::new(PoaInner {
                state: PoaState::Start,
                core: None,
                parent: parent.map(Arc::downgrade),
                children: HashMap::new(),
                activator: None,
            }),
            invocations: AtomicUsize::new(0),
            signal: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Create the root adapter of a factory
    pub(crate) fn new_root(factory: &Arc<PoaFactory>, manager: Arc<PoaManager>) -> Result<Arc<Poa>> {
        let name = factory.config().root_poa_name.clone();
        let poa = Arc::new(Self::blank(&name, AdapterPath::root(&name), factory, None));
        let core = Arc::new(PoaCore::new(manager.clone(), PolicyTable::root(), factory)?);
        poa.install(core, PoaState::Run);
        manager.add_adapter(&poa);
        info!("POA {}: root adapter created", poa.path);
        Ok(poa)
    }

    fn install(&self, core: Arc<PoaCore>, state: PoaState) {
        {
            let mut inner = self.inner.write();
            inner.core = Some(core);
            inner.state = state;
        }
        self.notify();
    }

    fn notify(&self) {
        let _guard = self.signal.lock();
        self.cond.notify_all();
    }

    pub(crate) fn factory(&self) -> Result<Arc<PoaFactory>> {
        self.factory
            .upgrade()
            .ok_or_else(|| PoaError::AdapterDestroyed(format!("{} (factory gone)", self.path)))
    }

    pub(crate) fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn the_name(&self) -> &str {
        &self.name
    }

    /// Names from the root adapter down to this one
    pub fn path(&self) -> &AdapterPath {
        &self.path
    }

    pub fn state(&self) -> PoaState {
        self.inner.read().state
    }

    pub fn the_parent(&self) -> Option<Arc<Poa>> {
        self.inner.read().parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn the_children(&self) -> Vec<Arc<Poa>> {
        let inner = self.inner.read();
        inner
            .children
            .values()
            .filter(|child| child.state().is_initialized())
            .cloned()
            .collect()
    }

    pub(crate) fn core(&self) -> Result<Arc<PoaCore>> {
        let inner = self.inner.read();
        match &inner.core {
            Some(core) => Ok(core.clone()),
            None if inner.state.is_shutting_down() => {
                Err(PoaError::AdapterDestroyed(self.path.to_string()))
            }
            None => Err(PoaError::AdapterNonExistent(self.path.to_string())),
        }
    }

    pub fn the_manager(&self) -> Result<Arc<PoaManager>> {
        Ok(self.core()?.manager.clone())
    }

    pub fn policies(&self) -> Result<PolicyTable> {
        Ok(self.core()?.policies)
    }

    pub fn get_adapter_activator(&self) -> Option<Arc<dyn AdapterActivator>> {
        self.inner.read().activator.clone()
    }

    pub fn set_adapter_activator(&self, activator: Option<Arc<dyn AdapterActivator>>) {
        self.inner.write().activator = activator;
    }

    /// Create a child adapter
    ///
    /// With no manager given, a new one (in `Holding` state) is created for
    /// the child. Inside an adapter activator's `unknown_adapter` upcall
    /// this completes the child the lookup is waiting for.
    pub fn create_poa(
        self: &Arc<Self>,
        name: &str,
        manager: Option<Arc<PoaManager>>,
        policies: &[Policy],
    ) -> Result<Arc<Poa>> {
        if name.is_empty() || name.contains(AdapterPath::SEPARATOR) {
            return Err(PoaError::InvalidName(name.to_string()));
        }
        let table = PolicyTable::new(policies)?;
        let factory = self.factory()?;

        let child = {
            let mut inner = self.inner.write();
            if inner.state.is_shutting_down() {
                return Err(PoaError::AdapterDestroyed(self.path.to_string()));
            }
            if !inner.state.is_initialized() {
                return Err(PoaError::AdapterNonExistent(self.path.to_string()));
            }
            let placeholder = match inner.children.get(name) {
                Some(child) if child.state() == PoaState::Init => Some(child.clone()),
                Some(_) => {
                    return Err(PoaError::AdapterAlreadyExists(self.path.child(name).to_string()))
                }
                None => None,
            };

            let manager =
                manager.unwrap_or_else(|| factory.create_manager(&format!("{}Manager", name)));
            let core = Arc::new(PoaCore::new(manager.clone(), table, &factory)?);
            let child = match placeholder {
                Some(child) => {
                    child.install(core, PoaState::InitDone);
                    child
                }
                None => {
                    let child =
                        Arc::new(Poa::blank(name, self.path.child(name), &factory, Some(self)));
                    child.install(core, PoaState::Run);
                    inner.children.insert(name.to_string(), child.clone());
                    child
                }
            };
            manager.add_adapter(&child);
            child
        };

        factory.register_adapter(&child);
        info!("POA {}: created (manager {})", child.path, child.the_manager()?.id());
        Ok(child)
    }

    /// Find a child adapter, running the adapter activator if it is missing
    /// and `activate_it` is set
    pub fn find_poa(self: &Arc<Self>, name: &str, activate_it: bool) -> Result<Arc<Poa>> {
        let child_path = self.path.child(name);
        let not_found = || PoaError::AdapterNonExistent(child_path.to_string());

        let (existing, activator) = {
            let inner = self.inner.read();
            if inner.state.is_shutting_down() {
                return Err(PoaError::AdapterDestroyed(self.path.to_string()));
            }
            (inner.children.get(name).cloned(), inner.activator.clone())
        };
        if let Some(child) = existing {
            child.wait_ready().map_err(|_| not_found())?;
            return Ok(child);
        }
        let activator = match activator {
            Some(activator) if activate_it => activator,
            _ => return Err(not_found()),
        };

        let placeholder = {
            let mut inner = self.inner.write();
            if inner.state.is_shutting_down() {
                return Err(PoaError::AdapterDestroyed(self.path.to_string()));
            }
            if let Some(child) = inner.children.get(name).cloned() {
                drop(inner);
                child.wait_ready().map_err(|_| not_found())?;
                return Ok(child);
            }
            let factory = self.factory()?;
            let placeholder = Arc::new(Poa::blank(name, child_path.clone(), &factory, Some(self)));
            placeholder.inner.write().state = PoaState::Init;
            inner.children.insert(name.to_string(), placeholder.clone());
            placeholder
        };

        debug!("POA {}: activating unknown adapter {}", self.path, name);
        let created = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            activator.unknown_adapter(self, name)
        })) {
            Ok(created) => created,
            Err(payload) => {
                warn!(
                    "POA {}: adapter activator panicked: {}",
                    self.path,
                    panic_message(payload.as_ref())
                );
                false
            }
        };

        if created && placeholder.finish_activation() {
            info!("POA {}: activated", child_path);
            return Ok(placeholder);
        }

        warn!("POA {}: activation failed", child_path);
        if let Err(e) = placeholder.destroy(false, true) {
            debug!("POA {}: discarding placeholder: {}", child_path, e);
        }
        Err(not_found())
    }

    fn finish_activation(&self) -> bool {
        let done = {
            let mut inner = self.inner.write();
            if inner.state == PoaState::InitDone {
                inner.state = PoaState::Run;
                true
            } else {
                false
            }
        };
        self.notify();
        done
    }

    /// Block while the adapter is still being brought up
    pub(crate) fn wait_ready(&self) -> Result<()> {
        let mut guard = self.signal.lock();
        loop {
            let state = self.state();
            if state.is_running() {
                return Ok(());
            }
            if state.is_shutting_down() {
                return Err(PoaError::AdapterDestroyed(self.path.to_string()));
            }
            self.cond.wait_for(&mut guard, self.poll);
        }
    }

    fn try_admit(&self) -> Result<bool> {
        let inner = self.inner.read();
        match inner.state {
            PoaState::Run => {
                self.invocations.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
            state if state.is_shutting_down() => {
                Err(PoaError::AdapterDestroyed(self.path.to_string()))
            }
            _ => Ok(false),
        }
    }

    /// Admit one invocation
    ///
    /// Waits while the adapter is being brought up; fails once destruction
    /// has begun. Every successful `enter` must be paired with [`exit`](Self::exit).
    pub fn enter(&self) -> Result<()> {
        if self.try_admit()? {
            return Ok(());
        }
        let mut guard = self.signal.lock();
        loop {
            if self.try_admit()? {
                return Ok(());
            }
            self.cond.wait_for(&mut guard, self.poll);
        }
    }

    /// Complete one invocation
    pub fn exit(&self) -> Result<()> {
        let previous = self
            .invocations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map_err(|_| {
                error!("POA {}: exit without matching enter", self.path);
                PoaError::IllegalState(format!("unbalanced exit on {}", self.path))
            })?;
        if previous == 1 {
            self.notify();
        }
        Ok(())
    }

    /// Count background work against the adapter so destruction drains it
    ///
    /// Refused once destruction has begun: the drain may already be over,
    /// so the caller has to do the work inline.
    pub(crate) fn hold_for_background(&self) -> bool {
        let inner = self.inner.read();
        if inner.state.is_shutting_down() {
            return false;
        }
        self.invocations.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Invocations currently admitted
    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    fn wait_idle(&self) {
        let mut guard = self.signal.lock();
        while self.invocations.load(Ordering::SeqCst) > 0 {
            self.cond.wait_for(&mut guard, self.poll);
        }
    }

    fn wait_destroyed(&self) {
        let mut guard = self.signal.lock();
        while self.state() != PoaState::Destroyed {
            self.cond.wait_for(&mut guard, self.poll);
        }
    }

    /// Resolve the servant for one request and admit it
    ///
    /// Admission goes through the manager, then this adapter, then the
    /// mediator. The returned [`Invocation`] undoes all three when dropped.
    pub fn resolve(self: &Arc<Self>, id: &ObjectId, operation: &str) -> Result<Invocation> {
        self.wait_ready()?;
        let core = self.core()?;
        let admission = Admission::enter(self, core.clone())?;
        let located = core.mediator.locate(self, id, operation)?;
        Ok(Invocation::new(admission, id.clone(), operation, located))
    }

    /// Destroy this adapter and all its descendants
    ///
    /// With `wait` the call returns once destruction is complete; it fails
    /// with `BadInvOrder` when issued from an invocation on this adapter or
    /// a descendant. Without `wait` destruction continues in the background.
    /// A second call during destruction returns at once, or waits for the
    /// first to finish when `wait` is set.
    pub fn destroy(self: &Arc<Self>, etherealize_objects: bool, wait: bool) -> Result<()> {
        if wait && ThreadContext::in_invocation_under(&self.path) {
            return Err(PoaError::BadInvOrder(format!(
                "destroy of {} with wait from one of its own invocations",
                self.path
            )));
        }

        {
            let mut inner = self.inner.write();
            match inner.state {
                PoaState::Destroyed => {
                    return Err(PoaError::AlreadyDestroyed(self.path.to_string()));
                }
                PoaState::Destroying => {
                    drop(inner);
                    if wait {
                        self.wait_destroyed();
                    }
                    return Ok(());
                }
                _ => inner.state = PoaState::Destroying,
            }
        }
        // Lookups and admissions waiting for Run must now fail
        self.notify();
        info!("POA {}: destroying", self.path);

        if wait {
            self.run_destruction(etherealize_objects);
        } else {
            let poa = self.clone();
            self.executor
                .spawn("destroy", move || poa.run_destruction(etherealize_objects));
        }
        Ok(())
    }

    fn run_destruction(self: &Arc<Self>, etherealize_objects: bool) {
        let children: Vec<Arc<Poa>> = self.inner.read().children.values().cloned().collect();
        for child in children {
            if let Err(e) = child.destroy(etherealize_objects, true) {
                debug!("POA {}: child {}: {}", self.path, child.path, e);
            }
        }

        self.wait_idle();

        let core = self.inner.read().core.clone();
        if let Some(core) = &core {
            if let Some(store) = core.mediator.store() {
                let count = store.deactivate_all(self, etherealize_objects);
                debug!("POA {}: deactivated {} objects", self.path, count);
            }
        }

        let parent = self.inner.write().parent.take().and_then(|p| p.upgrade());
        if let Some(parent) = parent {
            parent.remove_child(&self.name, self);
        }
        if let Some(core) = &core {
            core.manager.remove_adapter(self);
        }
        if let Some(factory) = self.factory.upgrade() {
            factory.unregister_adapter(self);
        }

        {
            let mut inner = self.inner.write();
            inner.core = None;
            inner.activator = None;
            inner.children.clear();
            inner.state = PoaState::Destroyed;
        }
        self.notify();
        info!("POA {}: destroyed", self.path);
    }

    fn remove_child(&self, name: &str, child: &Arc<Poa>) {
        let mut inner = self.inner.write();
        if inner.children.get(name).map_or(false, |c| Arc::ptr_eq(c, child)) {
            inner.children.remove(name);
        }
    }

    /// Deactivate all active objects with etherealization
    pub(crate) fn etherealize_objects(self: &Arc<Self>) -> usize {
        match self.core() {
            Ok(core) => core
                .mediator
                .store()
                .map_or(0, |store| store.deactivate_all(self, true)),
            Err(_) => 0,
        }
    }
}

impl fmt::Debug for Poa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poa")
            .field("path", &self.path)
            .field("state", &self.state())
            .field("invocations", &self.invocation_count())
            .finish()
    }
}
