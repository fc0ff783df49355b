//! Portable Object Adapter
//!
//! This crate maps incoming requests, addressed by adapter path and object
//! id, onto in-process servants. It manages servant activation and
//! etherealization, and gates request flow per adapter manager.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Dispatch / transport layer (external)          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  PoaFactory           │  PoaManager       │  PoaCurrent     │
//! │  - root adapter       │  - Holding        │  - thread-local │
//! │  - path index         │  - Active         │    frames       │
//! │  - references         │  - Discarding     │  - admissions   │
//! │  - registry hook      │  - Inactive       │                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Poa (adapter tree, lifecycle, invocation counting)         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Mediators: active map │ default servant │ activator │      │
//! │             locator    │ retained default servant           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ActiveObjectMap + per-entry state machine                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A request passes the manager, then the adapter, then the mediator:
//!
//! ```no_run
//! use bytes::Bytes;
//! use poa::{AdapterPath, ObjectId, PoaConfig, PoaFactory};
//!
//! # fn main() -> poa::Result<()> {
//! let factory = PoaFactory::new(PoaConfig::default());
//! let root = factory.root_poa()?;
//! root.the_manager()?.activate()?;
//!
//! let path = AdapterPath::root("RootPOA");
//! let invocation = factory.resolve(&path, &ObjectId::from("obj"), "ping")?;
//! let _reply = invocation.invoke(Bytes::new());
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`types`]: ids, paths, policies, references and errors
//! - [`aom`]: the active object map
//! - [`servant`]: servant and servant manager traits
//! - [`adapter`]: adapter instances
//! - [`manager`]: adapter managers
//! - [`factory`]: the adapter factory
//! - [`current`]: per-thread invocation context

pub mod adapter;
pub mod aom;
pub mod config;
pub mod current;
pub mod executor;
pub mod factory;
pub mod invocation;
pub mod manager;
pub mod registry;
pub mod servant;
pub mod types;

mod mediator;

pub use adapter::{Poa, PoaState};
pub use config::PoaConfig;
pub use current::{PoaCurrent, ThreadContext};
pub use executor::{Completion, Executor};
pub use factory::{PoaFactory, ROOT_MANAGER_NAME};
pub use invocation::Invocation;
pub use manager::{ManagerState, PoaManager};
pub use registry::{AdapterRegistry, LocalRegistry};
pub use servant::{
    AdapterActivator, CallFuture, CallResult, Cookie, Servant, ServantActivator, ServantLocator,
    ServantManager, ServantRef, same_servant,
};
pub use types::{
    AdapterPath, ErrorKind, ObjectId, ObjectReference, PoaError, Policy, PolicyTable,
    ReferenceEncoder, Result,
};
