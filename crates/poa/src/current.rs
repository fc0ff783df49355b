//! Per-thread invocation context
//!
//! [`ThreadContext`] records, for the executing thread, which adapter
//! managers it is admitted into and the stack of invocations it is running.
//! Managers consult it to let a thread re-enter a holding manager and to
//! refuse cross-manager waits; adapters consult it to refuse a blocking
//! destroy from inside one of their own invocations. [`PoaCurrent`] is the
//! read-only view servants use to find out what they are serving.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use crate::adapter::Poa;
use crate::servant::ServantRef;
use crate::types::{AdapterPath, ObjectId, ObjectReference, PoaError, Result};

thread_local! {
    static CONTEXT: RefCell<ThreadContext> = RefCell::new(ThreadContext::default());
}

/// One invocation in progress on this thread
#[derive(Clone)]
pub(crate) struct Frame {
    pub poa: Arc<Poa>,
    pub id: ObjectId,
    pub operation: String,
    pub servant: ServantRef,
}

/// Admission and invocation bookkeeping of the current thread
#[derive(Default)]
pub struct ThreadContext {
    /// Manager id to admission depth
    admitted: HashMap<u64, usize>,
    frames: Vec<(u64, Frame)>,
    next_token: u64,
}

impl ThreadContext {
    fn with<R>(f: impl FnOnce(&mut ThreadContext) -> R) -> Option<R> {
        // Fails only while the thread is being torn down
        CONTEXT.try_with(|cell| f(&mut cell.borrow_mut())).ok()
    }

    /// Whether this thread is currently admitted into `manager`
    pub fn is_admitted(manager: u64) -> bool {
        Self::with(|ctx| ctx.admitted.contains_key(&manager)).unwrap_or(false)
    }

    /// Whether this thread is admitted into any manager other than `manager`
    pub fn admitted_elsewhere(manager: u64) -> bool {
        Self::with(|ctx| ctx.admitted.keys().any(|id| *id != manager)).unwrap_or(false)
    }

    pub(crate) fn admit(manager: u64) {
        Self::with(|ctx| *ctx.admitted.entry(manager).or_insert(0) += 1);
    }

    pub(crate) fn release(manager: u64) {
        Self::with(|ctx| {
            if let Some(depth) = ctx.admitted.get_mut(&manager) {
                *depth -= 1;
                if *depth == 0 {
                    ctx.admitted.remove(&manager);
                }
            }
        });
    }

    /// Push an invocation frame; the token removes exactly this frame
    pub(crate) fn push_frame(frame: Frame) -> u64 {
        Self::with(|ctx| {
            ctx.next_token += 1;
            ctx.frames.push((ctx.next_token, frame));
            ctx.next_token
        })
        .unwrap_or(0)
    }

    pub(crate) fn remove_frame(token: u64) -> Option<Frame> {
        Self::with(|ctx| {
            let at = ctx.frames.iter().rposition(|(t, _)| *t == token)?;
            Some(ctx.frames.remove(at).1)
        })
        .flatten()
    }

    pub(crate) fn current_frame() -> Option<Frame> {
        Self::with(|ctx| ctx.frames.last().map(|(_, f)| f.clone())).flatten()
    }

    /// Whether this thread is running an invocation on the adapter at
    /// `path` or one of its descendants
    pub fn in_invocation_under(path: &AdapterPath) -> bool {
        Self::with(|ctx| ctx.frames.iter().any(|(_, f)| f.poa.path().starts_with(path)))
            .unwrap_or(false)
    }

    /// Number of nested invocations running on this thread
    pub fn depth() -> usize {
        Self::with(|ctx| ctx.frames.len()).unwrap_or(0)
    }
}

/// Information about the invocation the calling thread is serving
#[derive(Clone, Copy, Debug, Default)]
pub struct PoaCurrent;

impl PoaCurrent {
    pub fn new() -> Self {
        Self
    }

    fn frame(&self) -> Result<Frame> {
        ThreadContext::current_frame().ok_or(PoaError::NoContext)
    }

    /// Whether the thread is inside an invocation at all
    pub fn in_invocation(&self) -> bool {
        ThreadContext::depth() > 0
    }

    /// Adapter serving the current invocation
    pub fn get_poa(&self) -> Result<Arc<Poa>> {
        Ok(self.frame()?.poa)
    }

    pub fn get_object_id(&self) -> Result<ObjectId> {
        Ok(self.frame()?.id)
    }

    pub fn get_operation(&self) -> Result<String> {
        Ok(self.frame()?.operation)
    }

    pub fn get_servant(&self) -> Result<ServantRef> {
        Ok(self.frame()?.servant)
    }

    /// Reference to the target object, typed with the servant's primary
    /// interface
    pub fn get_reference(&self) -> Result<ObjectReference> {
        let frame = self.frame()?;
        let type_id = frame.servant.primary_interface(&frame.id, frame.poa.path());
        frame.poa.make_reference(frame.id, &type_id)
    }
}
