//! Servants and the user callbacks an adapter upcalls into
//!
//! - [`Servant`]: the object implementation bound to one or more ids
//! - [`ServantActivator`]: incarnates and etherealizes servants on demand
//!   (RETAIN adapters)
//! - [`ServantLocator`]: supplies a servant per request (NON_RETAIN adapters)
//! - [`AdapterActivator`]: creates child adapters on first use
//!
//! Upcalls always run without adapter locks held. Errors and panics they
//! raise are translated with [`guard_upcall`] before reaching the caller.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use tracing::warn;

use crate::adapter::Poa;
use crate::executor::panic_message;
use crate::types::{AdapterPath, ObjectId, PoaError, Result};

/// Result of an operation invoked on a servant
pub type CallResult = Result<Bytes>;

/// Future type for call results
pub type CallFuture = Pin<Box<dyn Future<Output = CallResult> + Send>>;

/// Trait for servant implementations
pub trait Servant: Send + Sync + 'static {
    /// Repository id of the most derived interface for `id` in adapter `path`
    fn primary_interface(&self, id: &ObjectId, path: &AdapterPath) -> String;

    /// Invoke an operation on this servant
    fn invoke(&self, operation: &str, args: Bytes) -> CallFuture;

    /// Cast to Any for downcasting
    fn as_any(&self) -> &dyn Any;
}

/// Shared handle on a servant
pub type ServantRef = Arc<dyn Servant>;

/// Identity of a servant, used as map key for servant-to-id lookups
pub(crate) fn servant_key(servant: &ServantRef) -> usize {
    Arc::as_ptr(servant) as *const () as usize
}

/// Whether two handles designate the same servant
pub fn same_servant(a: &ServantRef, b: &ServantRef) -> bool {
    servant_key(a) == servant_key(b)
}

/// Servant manager for RETAIN adapters
pub trait ServantActivator: Send + Sync {
    /// Produce a servant for `id`
    ///
    /// Called at most once per activation of an id, however many requests
    /// for it arrive concurrently. Return [`PoaError::forward`] to redirect
    /// the request.
    fn incarnate(&self, id: &ObjectId, poa: &Arc<Poa>) -> Result<ServantRef>;

    /// Release a servant previously bound to `id`
    ///
    /// `remaining_activations` is true when the servant is still bound to
    /// other ids in this adapter.
    fn etherealize(
        &self,
        id: &ObjectId,
        poa: &Arc<Poa>,
        servant: ServantRef,
        cleanup_in_progress: bool,
        remaining_activations: bool,
    );
}

/// Opaque value carried from `preinvoke` to the matching `postinvoke`
pub type Cookie = Box<dyn Any + Send>;

/// Servant manager for NON_RETAIN adapters
pub trait ServantLocator: Send + Sync {
    fn preinvoke(
        &self,
        id: &ObjectId,
        poa: &Arc<Poa>,
        operation: &str,
    ) -> Result<(ServantRef, Cookie)>;

    fn postinvoke(
        &self,
        id: &ObjectId,
        poa: &Arc<Poa>,
        operation: &str,
        cookie: Cookie,
        servant: ServantRef,
    );
}

/// Creates child adapters that are looked up but do not exist yet
pub trait AdapterActivator: Send + Sync {
    /// Create the child `name` of `parent` (via `create_poa`) and return
    /// whether it was created
    fn unknown_adapter(&self, parent: &Arc<Poa>, name: &str) -> bool;
}

/// A servant manager as registered on an adapter
#[derive(Clone)]
pub enum ServantManager {
    Activator(Arc<dyn ServantActivator>),
    Locator(Arc<dyn ServantLocator>),
}

impl fmt::Debug for ServantManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServantManager::Activator(_) => f.write_str("ServantManager::Activator"),
            ServantManager::Locator(_) => f.write_str("ServantManager::Locator"),
        }
    }
}

/// Run a fallible upcall, translating its failures
///
/// `ForwardRequest` passes through unchanged. Any other error, or a panic,
/// is logged and reported as `ObjectNotExist`.
pub(crate) fn guard_upcall<T>(
    what: &str,
    id: &ObjectId,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e @ PoaError::ForwardRequest(_))) => Err(e),
        Ok(Err(e)) => {
            warn!("POA: {} for {} failed: {}", what, id, e);
            Err(PoaError::ObjectNotExist(format!("{} failed for {}: {}", what, id, e)))
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!("POA: {} for {} panicked: {}", what, id, message);
            Err(PoaError::ObjectNotExist(format!("{} panicked for {}", what, id)))
        }
    }
}

/// Run an upcall that reports nothing back (etherealize, postinvoke)
pub(crate) fn guard_notification(what: &str, id: &ObjectId, f: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        warn!(
            "POA: {} for {} panicked: {}",
            what,
            id,
            panic_message(payload.as_ref())
        );
    }
}
