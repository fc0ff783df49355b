//! Core POA types
//!
//! This module contains the value types shared by every layer of the adapter:
//! - Errors: `PoaError` and its classification
//! - Identifiers: `ObjectId`, `AdapterPath`, system id generation
//! - Policies: the seven standard policies plus vendor extensions
//! - References: `ObjectReference` and its encodings

mod error;
mod object_id;
mod policy;
mod reference;

pub use error::*;
pub use object_id::{generate_stamp, AdapterPath, IdGenerator, ObjectId, SYSTEM_ID_LEN};
pub use policy::*;
pub use reference::*;

/// Well-known repository ids
pub mod repo_id {
    /// Base interface every servant supports
    pub const OBJECT: &str = "IDL:omg.org/CORBA/Object:1.0";
    /// Repository id used when a servant does not name its interface
    pub const UNKNOWN: &str = "";
}
