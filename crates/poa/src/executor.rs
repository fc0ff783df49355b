//! Background work
//!
//! Non-blocking adapter destruction, manager deactivation and deferred
//! etherealization run here. Work goes to the Tokio blocking pool when the
//! caller is inside a runtime, otherwise to a named OS thread; if no thread
//! can be started the work runs inline on the caller.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

/// Spawner for background adapter work
pub struct Executor {
    name_prefix: String,
    poll: Duration,
    sequence: AtomicU64,
}

impl Executor {
    /// Create an executor naming its threads `<prefix>-<n>`
    pub fn new(name_prefix: impl Into<String>, poll: Duration) -> Self {
        Self {
            name_prefix: name_prefix.into(),
            poll,
            sequence: AtomicU64::new(0),
        }
    }

    /// Run `f` in the background
    ///
    /// A panic in `f` is logged and contained; the returned [`Completion`]
    /// still completes.
    pub fn spawn<F>(&self, task: &str, f: F) -> Completion
    where
        F: FnOnce() + Send + 'static,
    {
        let shared = Arc::new(Shared {
            done: Mutex::new(false),
            cond: Condvar::new(),
            poll: self.poll,
        });
        let completion = Completion {
            shared: shared.clone(),
        };

        let task_name = task.to_string();
        let job = move || {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
                error!(
                    "Executor: task '{}' panicked: {}",
                    task_name,
                    panic_message(payload.as_ref())
                );
            }
            shared.finish();
        };

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            debug!("Executor: '{}' on blocking pool", task);
            handle.spawn_blocking(job);
            return completion;
        }

        let slot = Arc::new(Mutex::new(Some(job)));
        let thread_slot = slot.clone();
        let name = format!(
            "{}-{}",
            self.name_prefix,
            self.sequence.fetch_add(1, Ordering::Relaxed)
        );
        let spawned = std::thread::Builder::new().name(name.clone()).spawn(move || {
            let job = thread_slot.lock().take();
            if let Some(job) = job {
                job();
            }
        });
        match spawned {
            Ok(_) => debug!("Executor: '{}' on thread {}", task, name),
            Err(e) => {
                warn!("Executor: cannot start thread for '{}' ({}), running inline", task, e);
                let job = slot.lock().take();
                if let Some(job) = job {
                    job();
                }
            }
        }
        completion
    }
}

struct Shared {
    done: Mutex<bool>,
    cond: Condvar,
    poll: Duration,
}

impl Shared {
    fn finish(&self) {
        *self.done.lock() = true;
        self.cond.notify_all();
    }
}

/// Handle on a task started by [`Executor::spawn`]
#[derive(Clone)]
pub struct Completion {
    shared: Arc<Shared>,
}

impl Completion {
    /// Block until the task has ended
    pub fn wait(&self) {
        let mut done = self.shared.done.lock();
        while !*done {
            self.shared.cond.wait_for(&mut done, self.shared.poll);
        }
    }

    pub fn is_done(&self) -> bool {
        *self.shared.done.lock()
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
