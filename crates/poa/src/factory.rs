//! Process-wide adapter factory
//!
//! Owns the root adapter, every adapter manager, and a path index of all
//! live adapters. It is the entry point for the dispatch layer: requests
//! arrive as `(path, id, operation)` or as an encoded reference and leave as
//! an admitted [`Invocation`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::adapter::Poa;
use crate::config::PoaConfig;
use crate::executor::Executor;
use crate::invocation::Invocation;
use crate::manager::PoaManager;
use crate::registry::{AdapterRegistry, LocalRegistry};
use crate::servant::ServantRef;
use crate::types::{
    AdapterPath, BinaryReferenceEncoder, ObjectId, ObjectReference, PoaError, ReferenceEncoder,
    Result,
};

/// Name of the manager created with the root adapter
pub const ROOT_MANAGER_NAME: &str = "RootPOAManager";

struct Registered {
    poa: Weak<Poa>,
    published: bool,
}

/// Factory of adapters and adapter managers
pub struct PoaFactory {
    config: PoaConfig,
    executor: Arc<Executor>,
    registry: Arc<dyn AdapterRegistry>,
    encoder: Arc<dyn ReferenceEncoder>,
    root: Mutex<Option<Arc<Poa>>>,
    adapters: RwLock<HashMap<AdapterPath, Registered>>,
    /// Managers stay alive through their adapters and callers only
    managers: RwLock<HashMap<u64, Weak<PoaManager>>>,
    next_manager: AtomicU64,
}

impl PoaFactory {
    /// Create a factory with an in-process registry and the binary
    /// reference encoding
    pub fn new(config: PoaConfig) -> Arc<Self> {
        Self::with_collaborators(
            config,
            Arc::new(LocalRegistry::new()),
            Arc::new(BinaryReferenceEncoder),
        )
    }

    pub fn with_collaborators(
        config: PoaConfig,
        registry: Arc<dyn AdapterRegistry>,
        encoder: Arc<dyn ReferenceEncoder>,
    ) -> Arc<Self> {
        let executor = Arc::new(Executor::new(
            config.worker_name_prefix.clone(),
            config.wait_poll_interval,
        ));
        info!("POA factory: server {}", config.server_id);
        Arc::new(Self {
            config,
            executor,
            registry,
            encoder,
            root: Mutex::new(None),
            adapters: RwLock::new(HashMap::new()),
            managers: RwLock::new(HashMap::new()),
            next_manager: AtomicU64::new(1),
        })
    }

    /// Process-wide factory with the default configuration
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<PoaFactory>> = OnceLock::new();
        GLOBAL.get_or_init(|| PoaFactory::new(PoaConfig::default())).clone()
    }

    pub fn config(&self) -> &PoaConfig {
        &self.config
    }

    pub(crate) fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// The root adapter, created on first use
    ///
    /// After the root has been destroyed a new one (with a new manager) is
    /// created.
    pub fn root_poa(self: &Arc<Self>) -> Result<Arc<Poa>> {
        let mut root = self.root.lock();
        if let Some(poa) = root.as_ref() {
            if !poa.state().is_shutting_down() {
                return Ok(poa.clone());
            }
        }
        let manager = self.create_manager(ROOT_MANAGER_NAME);
        let poa = Poa::new_root(self, manager)?;
        *root = Some(poa.clone());
        drop(root);
        self.register_adapter(&poa);
        Ok(poa)
    }

    /// Create a manager in `Holding` state
    pub fn create_manager(&self, name: &str) -> Arc<PoaManager> {
        let id = self.next_manager.fetch_add(1, Ordering::SeqCst);
        let manager = Arc::new(PoaManager::new(
            id,
            name,
            self.executor.clone(),
            self.config.wait_poll_interval,
        ));
        {
            let mut managers = self.managers.write();
            managers.retain(|_, m| m.strong_count() > 0);
            managers.insert(id, Arc::downgrade(&manager));
        }
        debug!("POA factory: created manager {} ({})", id, name);
        manager
    }

    pub fn find_manager(&self, id: u64) -> Option<Arc<PoaManager>> {
        self.managers.read().get(&id).and_then(Weak::upgrade)
    }

    /// Every live manager created by this factory, by id
    ///
    /// A manager is dropped once no adapter uses it and no caller holds it.
    pub fn managers(&self) -> Vec<Arc<PoaManager>> {
        let mut managers: Vec<_> = self.managers.read().values().filter_map(Weak::upgrade).collect();
        managers.sort_by_key(|m| m.id());
        managers
    }

    /// Every live adapter, by path
    pub fn adapters(&self) -> Vec<Arc<Poa>> {
        let adapters = self.adapters.read();
        let mut live: Vec<_> = adapters.values().filter_map(|r| r.poa.upgrade()).collect();
        live.sort_by(|a, b| a.path().cmp(b.path()));
        live
    }

    /// Find the adapter at `path`, walking down from the root and running
    /// adapter activators for missing adapters
    pub fn find_poa(self: &Arc<Self>, path: &AdapterPath) -> Result<Arc<Poa>> {
        let root = self.root_poa()?;
        let segments = path.segments();
        match segments.first() {
            Some(name) if name == root.the_name() => {}
            _ => return Err(PoaError::AdapterNonExistent(path.to_string())),
        }
        let mut poa = root;
        for name in &segments[1..] {
            poa = poa.find_poa(name, true)?;
        }
        Ok(poa)
    }

    /// Admit a request for `id` on the adapter at `path`
    pub fn resolve(
        self: &Arc<Self>,
        path: &AdapterPath,
        id: &ObjectId,
        operation: &str,
    ) -> Result<Invocation> {
        self.find_poa(path)?.resolve(id, operation)
    }

    /// Admit a request addressed by reference
    ///
    /// References from another server, for a missing adapter, or carrying
    /// the stamp of an earlier incarnation of a transient adapter designate
    /// no object.
    pub fn resolve_reference(
        self: &Arc<Self>,
        reference: &ObjectReference,
        operation: &str,
    ) -> Result<Invocation> {
        let no_object = |why: &str| {
            PoaError::ObjectNotExist(format!("{} in {}: {}", reference.object_id(), reference.adapter_path(), why))
        };
        if reference.server_id() != self.config.server_id {
            return Err(no_object("foreign server"));
        }
        let poa = match self.find_poa(reference.adapter_path()) {
            Ok(poa) => poa,
            Err(PoaError::AdapterNonExistent(_)) | Err(PoaError::AdapterDestroyed(_)) => {
                return Err(no_object("no such adapter"))
            }
            Err(e) => return Err(e),
        };
        let id = match poa.reference_to_id(reference) {
            Ok(id) => id,
            Err(PoaError::WrongAdapter(_)) => return Err(no_object("stale reference")),
            Err(e) => return Err(e),
        };
        poa.resolve(&id, operation)
    }

    /// First live adapter that has `servant` in its active object map
    pub fn find_adapter_for_servant(&self, servant: &ServantRef) -> Option<Arc<Poa>> {
        self.adapters().into_iter().find(|poa| {
            poa.core().ok().map_or(false, |core| {
                core.mediator
                    .store()
                    .map_or(false, |store| !store.map().servant_to_ids(servant).is_empty())
            })
        })
    }

    /// Reference for `id` on the adapter at `path`
    pub fn id_to_reference(
        self: &Arc<Self>,
        path: &AdapterPath,
        id: &ObjectId,
        type_id: &str,
    ) -> Result<ObjectReference> {
        self.find_poa(path)?.create_reference_with_id(id.clone(), type_id)
    }

    /// Adapter path and object id carried by `reference`
    pub fn reference_to_id(&self, reference: &ObjectReference) -> Result<(AdapterPath, ObjectId)> {
        if reference.server_id() != self.config.server_id {
            return Err(PoaError::InvalidReference(format!(
                "reference from server {}",
                reference.server_id()
            )));
        }
        Ok((reference.adapter_path().clone(), reference.object_id().clone()))
    }

    pub fn encode_reference(&self, reference: &ObjectReference) -> Bytes {
        self.encoder.encode(reference)
    }

    pub fn decode_reference(&self, bytes: &[u8]) -> Result<ObjectReference> {
        self.encoder.decode(bytes)
    }

    /// Destroy the root adapter and everything below it, etherealizing
    /// active objects
    pub fn shutdown(&self, wait: bool) -> Result<()> {
        let root = self.root.lock().take();
        match root {
            Some(root) => {
                info!("POA factory: shutting down");
                match root.destroy(true, wait) {
                    Ok(()) | Err(PoaError::AlreadyDestroyed(_)) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            None => Ok(()),
        }
    }

    fn registry_key(&self, path: &AdapterPath) -> String {
        format!("{}/{}", self.config.server_id, path)
    }

    pub(crate) fn register_adapter(&self, poa: &Arc<Poa>) {
        let published = poa.path().depth() == 1
            || poa.policies().map_or(false, |p| p.is_persistent());
        self.adapters.write().insert(
            poa.path().clone(),
            Registered {
                poa: Arc::downgrade(poa),
                published,
            },
        );
        if published {
            self.registry.publish(&self.registry_key(poa.path()), poa.path());
        }
    }

    pub(crate) fn unregister_adapter(&self, poa: &Poa) {
        let removed = {
            let mut adapters = self.adapters.write();
            match adapters.get(poa.path()) {
                Some(r) if std::ptr::eq(r.poa.as_ptr(), poa) => adapters.remove(poa.path()),
                // Replaced by a newer adapter of the same path
                _ => None,
            }
        };
        if let Some(Registered { published: true, .. }) = removed {
            self.registry.withdraw(&self.registry_key(poa.path()));
        }
    }
}

impl fmt::Debug for PoaFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoaFactory")
            .field("server_id", &self.config.server_id)
            .field("adapters", &self.adapters.read().len())
            .field("managers", &self.managers().len())
            .finish()
    }
}
