//! Adapter managers

mod poa_manager;

pub use poa_manager::{ManagerState, PoaManager};
