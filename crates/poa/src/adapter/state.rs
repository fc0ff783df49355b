//! Adapter lifecycle
//!
//! ```text
//! Start ──▶ Run ──────────────────────────▶ Destroying ──▶ Destroyed
//!   │        ▲                                  ▲
//!   ▼        │                                  │
//!  Init ──▶ InitDone          (activation failed)
//!   └───────────────────────────────────────────┘
//! ```
//!
//! `Init` is a placeholder created while an adapter activator runs;
//! `InitDone` means `create_poa` filled it in and the activator has not yet
//! returned.

/// Adapter lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PoaState {
    Start,
    Init,
    InitDone,
    Run,
    Destroying,
    Destroyed,
}

impl PoaState {
    /// Requests are admitted
    pub fn is_running(self) -> bool {
        self == PoaState::Run
    }

    /// Destruction has begun or completed
    pub fn is_shutting_down(self) -> bool {
        matches!(self, PoaState::Destroying | PoaState::Destroyed)
    }

    /// Still being brought up; admission and lookups wait
    pub fn is_pending(self) -> bool {
        matches!(self, PoaState::Start | PoaState::Init | PoaState::InitDone)
    }

    /// Policies and servants are in place
    pub fn is_initialized(self) -> bool {
        matches!(self, PoaState::InitDone | PoaState::Run)
    }
}
