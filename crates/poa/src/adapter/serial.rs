//! Dispatch serialization for SINGLE_THREAD_MODEL adapters
//!
//! One thread at a time may dispatch into the adapter. The owning thread
//! may re-enter (a colocated call back into the same adapter); every other
//! thread waits.

use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

pub(crate) struct SerialGate {
    owner: Mutex<Option<(ThreadId, usize)>>,
    cond: Condvar,
    poll: Duration,
}

impl SerialGate {
    pub fn new(poll: Duration) -> Self {
        Self {
            owner: Mutex::new(None),
            cond: Condvar::new(),
            poll,
        }
    }

    pub fn acquire(&self) {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        loop {
            match owner.as_mut() {
                None => {
                    *owner = Some((me, 1));
                    return;
                }
                Some((thread, depth)) if *thread == me => {
                    *depth += 1;
                    return;
                }
                Some(_) => {
                    self.cond.wait_for(&mut owner, self.poll);
                }
            }
        }
    }

    pub fn release(&self) {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        if let Some((thread, depth)) = owner.as_mut() {
            if *thread == me {
                *depth -= 1;
                if *depth == 0 {
                    *owner = None;
                    self.cond.notify_one();
                }
            }
        }
    }
}
