//! Adapter manager: request admission for a group of adapters
//!
//! ```text
//!            activate               discard
//! Holding ◀──────────▶ Active ◀──────────▶ Discarding
//!    │        hold       │                    │
//!    └───────────────────┴──── deactivate ────┴──▶ Inactive
//! ```
//!
//! - `Active` admits every request.
//! - `Holding` blocks new requests, except from a thread already admitted
//!   into this manager. A thread admitted into another manager is refused
//!   with a retryable error instead of waiting.
//! - `Discarding` refuses requests with a retryable error.
//! - `Inactive` refuses requests for good.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

use crate::adapter::Poa;
use crate::current::ThreadContext;
use crate::executor::Executor;
use crate::types::{PoaError, Result};

/// Admission state of a manager
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ManagerState {
    Holding,
    Active,
    Discarding,
    Inactive,
}

struct ManagerInner {
    state: ManagerState,
    in_flight: usize,
    waiting: usize,
    adapters: Vec<Weak<Poa>>,
}

/// Admission controller shared by one or more adapters
pub struct PoaManager {
    id: u64,
    name: String,
    inner: Mutex<ManagerInner>,
    cond: Condvar,
    poll: Duration,
    executor: Arc<Executor>,
}

impl PoaManager {
    /// Create a manager in `Holding` state
    pub fn new(id: u64, name: impl Into<String>, executor: Arc<Executor>, poll: Duration) -> Self {
        Self {
            id,
            name: name.into(),
            inner: Mutex::new(ManagerInner {
                state: ManagerState::Holding,
                in_flight: 0,
                waiting: 0,
                adapters: Vec::new(),
            }),
            cond: Condvar::new(),
            poll,
            executor,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get_state(&self) -> ManagerState {
        self.inner.lock().state
    }

    /// Requests currently admitted
    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight
    }

    /// Threads blocked in [`enter`](Self::enter)
    pub fn waiting(&self) -> usize {
        self.inner.lock().waiting
    }

    /// Adapters currently managed
    pub fn adapters(&self) -> Vec<Arc<Poa>> {
        self.inner.lock().adapters.iter().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn add_adapter(&self, poa: &Arc<Poa>) {
        let mut inner = self.inner.lock();
        inner.adapters.retain(|w| w.strong_count() > 0);
        inner.adapters.push(Arc::downgrade(poa));
    }

    pub(crate) fn remove_adapter(&self, poa: &Poa) {
        let target = poa as *const Poa;
        self.inner
            .lock()
            .adapters
            .retain(|w| w.strong_count() > 0 && w.as_ptr() != target);
    }

    /// Admit one request
    pub fn enter(&self) -> Result<()> {
        let reentrant = ThreadContext::is_admitted(self.id);
        let mut inner = self.inner.lock();
        let mut waited = false;
        let outcome = loop {
            match inner.state {
                ManagerState::Active => break Ok(()),
                ManagerState::Holding if reentrant => break Ok(()),
                ManagerState::Holding => {
                    if ThreadContext::admitted_elsewhere(self.id) {
                        break Err(PoaError::Transient(format!(
                            "manager {} is holding and the caller is admitted into another manager",
                            self.name
                        )));
                    }
                    if !waited {
                        inner.waiting += 1;
                        waited = true;
                    }
                    self.cond.wait_for(&mut inner, self.poll);
                }
                ManagerState::Discarding => {
                    break Err(PoaError::Transient(format!("manager {} is discarding", self.name)))
                }
                ManagerState::Inactive => break Err(PoaError::AdapterInactive),
            }
        };
        if waited {
            inner.waiting -= 1;
        }
        outcome?;
        inner.in_flight += 1;
        drop(inner);
        ThreadContext::admit(self.id);
        Ok(())
    }

    /// Complete a request admitted by [`enter`](Self::enter)
    pub fn exit(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.in_flight == 0 {
            error!("POAManager {}: exit without matching enter", self.name);
            return Err(PoaError::IllegalState(format!(
                "unbalanced exit on manager {}",
                self.name
            )));
        }
        inner.in_flight -= 1;
        if inner.in_flight == 0 {
            self.cond.notify_all();
        }
        drop(inner);
        ThreadContext::release(self.id);
        Ok(())
    }

    fn transition(&self, to: ManagerState) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state == ManagerState::Inactive {
            return Err(PoaError::AdapterInactive);
        }
        if inner.state != to {
            info!("POAManager {}: {:?} -> {:?}", self.name, inner.state, to);
            inner.state = to;
        }
        self.cond.notify_all();
        Ok(())
    }

    fn check_wait(&self, op: &str) -> Result<()> {
        if ThreadContext::is_admitted(self.id) {
            return Err(PoaError::BadInvOrder(format!(
                "{} with wait from a request admitted by manager {}",
                op, self.name
            )));
        }
        Ok(())
    }

    /// Start admitting requests
    pub fn activate(&self) -> Result<()> {
        self.transition(ManagerState::Active)
    }

    /// Queue new requests; with `wait`, return once admitted requests have
    /// completed
    pub fn hold_requests(&self, wait: bool) -> Result<()> {
        if wait {
            self.check_wait("hold_requests")?;
        }
        self.transition(ManagerState::Holding)?;
        if wait {
            self.wait_idle();
        }
        Ok(())
    }

    /// Refuse new requests; with `wait`, return once admitted requests have
    /// completed
    pub fn discard_requests(&self, wait: bool) -> Result<()> {
        if wait {
            self.check_wait("discard_requests")?;
        }
        self.transition(ManagerState::Discarding)?;
        if wait {
            self.wait_idle();
        }
        Ok(())
    }

    /// Refuse requests permanently
    ///
    /// Once admitted requests have drained, objects of every managed adapter
    /// are etherealized in the background when `etherealize_objects` is set.
    /// With `wait` the call returns after that work is done.
    pub fn deactivate(self: &Arc<Self>, etherealize_objects: bool, wait: bool) -> Result<()> {
        if wait {
            self.check_wait("deactivate")?;
        }
        let adapters = {
            let mut inner = self.inner.lock();
            if inner.state == ManagerState::Inactive {
                return Err(PoaError::AdapterInactive);
            }
            info!("POAManager {}: {:?} -> Inactive", self.name, inner.state);
            inner.state = ManagerState::Inactive;
            self.cond.notify_all();
            inner.adapters.iter().filter_map(Weak::upgrade).collect::<Vec<_>>()
        };

        let manager = self.clone();
        let completion = self.executor.spawn("deactivate", move || {
            manager.wait_idle();
            if etherealize_objects {
                for poa in adapters {
                    let count = poa.etherealize_objects();
                    debug!("POAManager {}: etherealized {} objects of {}", manager.name, count, poa.path());
                }
            }
        });
        if wait {
            completion.wait();
        }
        Ok(())
    }

    fn wait_idle(&self) {
        let mut inner = self.inner.lock();
        while inner.in_flight > 0 {
            self.cond.wait_for(&mut inner, self.poll);
        }
    }
}

impl fmt::Debug for PoaManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("PoaManager")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("in_flight", &inner.in_flight)
            .finish()
    }
}
