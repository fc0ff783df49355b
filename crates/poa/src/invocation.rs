//! Request admission guards
//!
//! ```text
//! Poa::resolve
//!    │
//!    ├─ PoaManager::enter ─┐
//!    ├─ Poa::enter         ├─ Admission (dropped last)
//!    ├─ SerialGate         ┘
//!    ├─ Mediator::locate ──── Hold (entry or locator cookie)
//!    └─ ThreadContext frame
//!          ▼
//!      Invocation ── drop: release hold, pop frame, then Admission
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use tracing::error;

use crate::adapter::{Poa, PoaCore};
use crate::current::{Frame, ThreadContext};
use crate::mediator::{Hold, Located};
use crate::servant::{CallFuture, ServantRef};
use crate::types::{ObjectId, Result};

/// Manager and adapter admission of one request
pub(crate) struct Admission {
    poa: Arc<Poa>,
    core: Arc<PoaCore>,
    serialized: bool,
}

impl Admission {
    pub fn enter(poa: &Arc<Poa>, core: Arc<PoaCore>) -> Result<Self> {
        core.manager.enter()?;
        if let Err(e) = poa.enter() {
            if let Err(exit) = core.manager.exit() {
                error!("POA {}: {}", poa.path(), exit);
            }
            return Err(e);
        }
        let serialized = match &core.serial {
            Some(gate) => {
                gate.acquire();
                true
            }
            None => false,
        };
        Ok(Self {
            poa: poa.clone(),
            core,
            serialized,
        })
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        if self.serialized {
            if let Some(gate) = &self.core.serial {
                gate.release();
            }
        }
        if let Err(e) = self.poa.exit() {
            error!("POA {}: {}", self.poa.path(), e);
        }
        if let Err(e) = self.core.manager.exit() {
            error!("POA {}: {}", self.poa.path(), e);
        }
    }
}

/// One admitted request with its servant resolved
///
/// While it lives the object cannot be etherealized and the adapter cannot
/// finish destruction. Dropping it completes the request: `postinvoke` or
/// deferred etherealization run, then admission is given back. It is tied
/// to the thread that resolved it.
pub struct Invocation {
    hold: Option<Hold>,
    id: ObjectId,
    operation: String,
    servant: ServantRef,
    token: u64,
    admission: Admission,
    _not_send: PhantomData<*const ()>,
}

impl Invocation {
    pub(crate) fn new(admission: Admission, id: ObjectId, operation: &str, located: Located) -> Self {
        let token = ThreadContext::push_frame(Frame {
            poa: admission.poa.clone(),
            id: id.clone(),
            operation: operation.to_string(),
            servant: located.servant.clone(),
        });
        Self {
            hold: Some(located.hold),
            id,
            operation: operation.to_string(),
            servant: located.servant,
            token,
            admission,
            _not_send: PhantomData,
        }
    }

    pub fn servant(&self) -> &ServantRef {
        &self.servant
    }

    pub fn object_id(&self) -> &ObjectId {
        &self.id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn poa(&self) -> &Arc<Poa> {
        &self.admission.poa
    }

    /// Dispatch the operation to the resolved servant
    pub fn invoke(&self, args: Bytes) -> CallFuture {
        self.servant.invoke(&self.operation, args)
    }
}

impl Drop for Invocation {
    fn drop(&mut self) {
        if let Some(hold) = self.hold.take() {
            let located = Located {
                servant: self.servant.clone(),
                hold,
            };
            self.admission.core.mediator.release(
                &self.admission.poa,
                &self.id,
                &self.operation,
                located,
            );
        }
        ThreadContext::remove_frame(self.token);
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("poa", self.admission.poa.path())
            .field("id", &self.id)
            .field("operation", &self.operation)
            .finish()
    }
}
