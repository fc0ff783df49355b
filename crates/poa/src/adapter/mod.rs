//! Object adapters

mod objects;
mod poa;
mod serial;
mod state;

pub use poa::Poa;
pub(crate) use poa::PoaCore;
pub use state::PoaState;
