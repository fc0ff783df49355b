//! Active object map entry state machine
//!
//! ```text
//!            enter (n=1)            incarnated
//! Invalid ───────────────▶ Incarnating ───────────▶ Valid ◀──┐ enter/exit (n±1)
//!    ▲                          │                     │ └─────┘
//!    └──── incarnation failed ──┘                     │ begin etherealize
//!                                          n>0 ┌──────┴──────┐ n=0
//!                                              ▼             ▼
//!                             EtherealizePending ──last exit──▶ Etherealizing
//!                                                                    │ etherealized
//!                                                                    ▼
//!                                                                Destroyed
//! ```
//!
//! `n` counts the invocations currently holding the entry. Callers that find
//! an entry in a busy state (incarnating or being etherealized) wait on the
//! entry and retry their map lookup afterwards.

use std::fmt;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::error;

use crate::servant::ServantRef;
use crate::types::{ObjectId, PoaError, Result};

/// Entry lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
    Invalid,
    Incarnating,
    Valid,
    EtherealizePending,
    Etherealizing,
    Destroyed,
}

impl EntryState {
    /// States in which new holders must wait
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            EntryState::Incarnating | EntryState::EtherealizePending | EntryState::Etherealizing
        )
    }
}

/// How a deactivated servant is to be released
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Teardown {
    /// Call the activator's `etherealize`
    pub etherealize: bool,
    /// Deactivation is part of adapter destruction or manager deactivation
    pub cleanup: bool,
}

enum Input {
    Enter,
    Activate(ServantRef),
    Incarnated(ServantRef),
    IncarnationFailed,
    Exit,
    BeginEtherealize(Teardown),
    Etherealized,
}

enum Output {
    /// Caller now holds the entry
    Proceed(ServantRef),
    /// Caller holds the entry and must incarnate a servant
    Incarnate,
    /// Caller must wait for the entry to settle
    Busy,
    /// Caller must etherealize this servant now
    Etherealize(ServantRef, Teardown),
    Done,
}

struct EntryInner {
    state: EntryState,
    refs: usize,
    servant: Option<ServantRef>,
    teardown: Option<Teardown>,
}

/// One slot of the active object map
pub struct Entry {
    id: ObjectId,
    inner: Mutex<EntryInner>,
    cond: Condvar,
    poll: Duration,
}

impl Entry {
    /// New entry in `Invalid` state
    pub fn new(id: ObjectId, poll: Duration) -> Self {
        Self {
            id,
            inner: Mutex::new(EntryInner {
                state: EntryState::Invalid,
                refs: 0,
                servant: None,
                teardown: None,
            }),
            cond: Condvar::new(),
            poll,
        }
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn state(&self) -> EntryState {
        self.inner.lock().state
    }

    /// Number of invocations holding this entry
    pub fn refs(&self) -> usize {
        self.inner.lock().refs
    }

    /// Bound servant, if the entry is `Valid`
    pub fn servant(&self) -> Option<ServantRef> {
        let inner = self.inner.lock();
        match inner.state {
            EntryState::Valid => inner.servant.clone(),
            _ => None,
        }
    }

    fn step(&self, inner: &mut EntryInner, input: Input) -> Result<Output> {
        use EntryState::*;
        use Input::*;

        let output = match (inner.state, input) {
            (Destroyed, input) => {
                error!("AOM: {:?} on destroyed entry {}", input, self.id);
                return Err(PoaError::IllegalState(format!(
                    "{:?} on destroyed entry {}",
                    input, self.id
                )));
            }

            (Invalid, Enter) => {
                inner.state = Incarnating;
                inner.refs = 1;
                Output::Incarnate
            }
            (Valid, Enter) => {
                inner.refs += 1;
                match &inner.servant {
                    Some(servant) => Output::Proceed(servant.clone()),
                    None => return Err(self.illegal("valid entry without servant")),
                }
            }
            (Incarnating | EtherealizePending | Etherealizing, Enter) => Output::Busy,

            (Invalid, Activate(servant)) => {
                inner.state = Valid;
                inner.servant = Some(servant);
                Output::Done
            }
            (Valid | Incarnating, Activate(_)) => {
                return Err(PoaError::ObjectAlreadyActive(self.id.clone()))
            }
            (EtherealizePending | Etherealizing, Activate(_)) => Output::Busy,

            (Incarnating, Incarnated(servant)) => {
                inner.state = Valid;
                inner.servant = Some(servant);
                Output::Done
            }
            (Incarnating, IncarnationFailed) => {
                inner.state = Invalid;
                inner.refs = inner.refs.saturating_sub(1);
                Output::Done
            }

            (Valid | EtherealizePending, Exit) => {
                if inner.refs == 0 {
                    return Err(self.illegal("exit without matching enter"));
                }
                inner.refs -= 1;
                if inner.state == EtherealizePending && inner.refs == 0 {
                    inner.state = Etherealizing;
                    self.take_for_etherealize(inner)?
                } else {
                    Output::Done
                }
            }

            (Valid, BeginEtherealize(teardown)) => {
                inner.teardown = Some(teardown);
                if inner.refs > 0 {
                    inner.state = EtherealizePending;
                    Output::Done
                } else {
                    inner.state = Etherealizing;
                    self.take_for_etherealize(inner)?
                }
            }
            (Incarnating, BeginEtherealize(_)) => Output::Busy,
            (Invalid | EtherealizePending | Etherealizing, BeginEtherealize(_)) => {
                return Err(PoaError::ObjectNotActive(self.id.clone()))
            }

            (Etherealizing, Etherealized) => {
                inner.state = Destroyed;
                inner.servant = None;
                inner.teardown = None;
                Output::Done
            }

            (state, input) => {
                return Err(self.illegal(&format!("{:?} in state {:?}", input, state)));
            }
        };
        Ok(output)
    }

    fn take_for_etherealize(&self, inner: &mut EntryInner) -> Result<Output> {
        let teardown = inner.teardown.unwrap_or(Teardown {
            etherealize: true,
            cleanup: false,
        });
        match &inner.servant {
            Some(servant) => Ok(Output::Etherealize(servant.clone(), teardown)),
            None => Err(self.illegal("etherealizing entry without servant")),
        }
    }

    fn illegal(&self, what: &str) -> PoaError {
        error!("AOM: entry {}: {}", self.id, what);
        PoaError::IllegalState(format!("entry {}: {}", self.id, what))
    }

    fn apply(&self, input: Input) -> Result<Output> {
        let mut inner = self.inner.lock();
        let before = inner.state;
        let output = self.step(&mut inner, input)?;
        if inner.state != before {
            self.cond.notify_all();
        }
        Ok(output)
    }

    /// Try to take a hold on the entry
    ///
    /// Returns `Ok(Some(Some(servant)))` when the entry is valid,
    /// `Ok(Some(None))` when the caller must incarnate, `Ok(None)` when the
    /// entry is busy.
    pub(crate) fn try_enter(&self) -> Result<Option<Option<ServantRef>>> {
        match self.apply(Input::Enter)? {
            Output::Proceed(servant) => Ok(Some(Some(servant))),
            Output::Incarnate => Ok(Some(None)),
            _ => Ok(None),
        }
    }

    /// Bind a servant to an unused entry; `Ok(false)` when busy
    pub(crate) fn activate(&self, servant: ServantRef) -> Result<bool> {
        Ok(!matches!(self.apply(Input::Activate(servant))?, Output::Busy))
    }

    pub(crate) fn incarnated(&self, servant: ServantRef) -> Result<()> {
        self.apply(Input::Incarnated(servant)).map(|_| ())
    }

    pub(crate) fn incarnation_failed(&self) -> Result<()> {
        self.apply(Input::IncarnationFailed).map(|_| ())
    }

    /// Drop a hold; the last holder of a pending entry gets the servant to
    /// etherealize
    pub(crate) fn exit(&self) -> Result<Option<(ServantRef, Teardown)>> {
        match self.apply(Input::Exit)? {
            Output::Etherealize(servant, teardown) => Ok(Some((servant, teardown))),
            _ => Ok(None),
        }
    }

    /// Start deactivation
    ///
    /// `Ok(Some(Some(..)))`: etherealize now. `Ok(Some(None))`: deferred to
    /// the last holder. `Ok(None)`: busy, wait and retry.
    pub(crate) fn begin_etherealize(
        &self,
        teardown: Teardown,
    ) -> Result<Option<Option<(ServantRef, Teardown)>>> {
        match self.apply(Input::BeginEtherealize(teardown))? {
            Output::Etherealize(servant, teardown) => Ok(Some(Some((servant, teardown)))),
            Output::Busy => Ok(None),
            _ => Ok(Some(None)),
        }
    }

    pub(crate) fn etherealized(&self) -> Result<()> {
        self.apply(Input::Etherealized).map(|_| ())
    }

    /// Block until the entry is no longer incarnating or etherealizing
    pub(crate) fn wait_while_busy(&self) {
        let mut inner = self.inner.lock();
        while inner.state.is_busy() {
            self.cond.wait_for(&mut inner, self.poll);
        }
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("refs", &inner.refs)
            .finish()
    }
}

impl fmt::Debug for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Input::Enter => "Enter",
            Input::Activate(_) => "Activate",
            Input::Incarnated(_) => "Incarnated",
            Input::IncarnationFailed => "IncarnationFailed",
            Input::Exit => "Exit",
            Input::BeginEtherealize(_) => "BeginEtherealize",
            Input::Etherealized => "Etherealized",
        };
        f.write_str(name)
    }
}
