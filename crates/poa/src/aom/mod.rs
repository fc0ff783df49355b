//! Active object map and its per-entry state machine

mod entry;
mod map;

pub use entry::{Entry, EntryState};
pub(crate) use entry::Teardown;
pub use map::ActiveObjectMap;
pub(crate) use map::Lookup;
