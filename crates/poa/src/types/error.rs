//! POA error types

use thiserror::Error;

use super::object_id::ObjectId;
use super::reference::ObjectReference;

/// Result type for POA operations
pub type Result<T> = std::result::Result<T, PoaError>;

/// Coarse classification of a [`PoaError`]
///
/// The dispatch layer uses this to decide how a failure is reported back to
/// the client and whether a retry makes sense.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The operation is not supported by the adapter's policies
    PolicyViolation,
    /// The operation conflicts with the current state of an object or adapter
    StateConflict,
    /// The request was refused at an admission gate
    AdmissionRejected,
    /// No servant could be produced for the target object
    ResolutionFailure,
    /// The request has to be re-issued against another reference
    Forward,
    /// A state machine received an input it can never accept
    Fatal,
}

/// POA errors
#[derive(Error, Debug, Clone)]
pub enum PoaError {
    /// Operation not allowed under the adapter's policies
    #[error("wrong policy: {0}")]
    WrongPolicy(&'static str),

    /// Illegal policy list passed to adapter creation
    #[error("invalid policy at index {index}: {reason}")]
    InvalidPolicy { index: usize, reason: String },

    /// The object id is already bound to a servant
    #[error("object already active: {0}")]
    ObjectAlreadyActive(ObjectId),

    /// The servant is already bound (UNIQUE_ID)
    #[error("servant already active")]
    ServantAlreadyActive,

    /// The object id is not bound
    #[error("object not active: {0}")]
    ObjectNotActive(ObjectId),

    /// The servant is not bound to any id
    #[error("servant not active")]
    ServantNotActive,

    /// No default servant has been registered
    #[error("no servant registered")]
    NoServant,

    /// A child adapter with that name already exists
    #[error("adapter already exists: {0}")]
    AdapterAlreadyExists(String),

    /// No such adapter, and none could be activated
    #[error("adapter does not exist: {0}")]
    AdapterNonExistent(String),

    /// The adapter manager is inactive
    #[error("adapter manager is inactive")]
    AdapterInactive,

    /// The adapter is being destroyed or is gone
    #[error("adapter destroyed: {0}")]
    AdapterDestroyed(String),

    /// `destroy` called on an adapter whose destruction has completed
    #[error("adapter already destroyed: {0}")]
    AlreadyDestroyed(String),

    /// Adapter name that cannot appear as a path segment
    #[error("invalid adapter name: {0:?}")]
    InvalidName(String),

    /// Operation issued in an order that would deadlock or is not allowed
    #[error("bad invocation order: {0}")]
    BadInvOrder(String),

    /// Retryable admission rejection
    #[error("transient failure: {0}")]
    Transient(String),

    /// Generic adapter failure
    #[error("object adapter error: {0}")]
    ObjAdapter(String),

    /// Target object cannot be resolved
    #[error("object does not exist: {0}")]
    ObjectNotExist(String),

    /// Upcall asked for the request to be forwarded
    #[error("request forwarded to {}", .0.adapter_path())]
    ForwardRequest(Box<ObjectReference>),

    /// State machine received an input it cannot accept
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// The id was not generated by this adapter
    #[error("invalid object id: {0}")]
    InvalidObjectId(ObjectId),

    /// The reference was not created by this adapter
    #[error("reference does not belong to adapter {0}")]
    WrongAdapter(String),

    /// Malformed object reference
    #[error("invalid object reference: {0}")]
    InvalidReference(String),

    /// Buffer underflow while decoding (not enough data)
    #[error("buffer underflow: need {needed} bytes, have {have}")]
    BufferUnderflow { needed: usize, have: usize },

    /// Invocation context queried outside of an invocation
    #[error("no invocation in progress on this thread")]
    NoContext,
}

impl PoaError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            PoaError::WrongPolicy(_) | PoaError::InvalidPolicy { .. } => ErrorKind::PolicyViolation,
            PoaError::AdapterInactive | PoaError::AdapterDestroyed(_) | PoaError::Transient(_) => {
                ErrorKind::AdmissionRejected
            }
            PoaError::ObjectNotExist(_) => ErrorKind::ResolutionFailure,
            PoaError::ForwardRequest(_) => ErrorKind::Forward,
            PoaError::IllegalState(_) => ErrorKind::Fatal,
            _ => ErrorKind::StateConflict,
        }
    }

    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoaError::Transient(_))
    }

    /// Whether this error indicates a defect in the caller
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }

    /// Build the forward signal a servant manager returns to redirect a request
    pub fn forward(reference: ObjectReference) -> Self {
        PoaError::ForwardRequest(Box::new(reference))
    }
}
