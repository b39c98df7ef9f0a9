//! Owned, cancelable deferred tasks.
//!
//! A session has two kinds of timers: the reconnect timer and the QR render.
//! Each lives in a [`TaskSlot`] on the session record.  Putting a new task in
//! a slot aborts the one already there, so two of the same kind can never be
//! pending at once.
//!
//! A task that finishes on its own calls [`TaskSlot::release`] with its own
//! id.  Releasing detaches the handle instead of aborting it, so a task can
//! clear its slot and keep running.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::task::JoinHandle;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// A spawned task plus the id it was given at spawn time.
#[derive(Debug)]
pub struct DeferredTask {
    id: u64,
    handle: JoinHandle<()>,
}

impl DeferredTask {
    /// Spawns the future built by `make`, passing it the task's own id.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<F, Fut>(make: F) -> Self
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(make(id));
        Self { id, handle }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Aborts the task.  A no-op if it already finished.
    pub fn cancel(self) {
        self.handle.abort();
    }
}

/// Holds at most one pending [`DeferredTask`].
#[derive(Debug, Default)]
pub struct TaskSlot {
    current: Option<DeferredTask>,
}

impl TaskSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `task`, aborting the previous one.
    ///
    /// Returns `true` if a previous task was still pending.
    pub fn replace(&mut self, task: DeferredTask) -> bool {
        let superseded = self.is_pending();
        if let Some(previous) = self.current.replace(task) {
            previous.cancel();
        }
        superseded
    }

    /// Aborts the stored task, if any.  Returns `true` if one was pending.
    pub fn cancel(&mut self) -> bool {
        let was_pending = self.is_pending();
        if let Some(task) = self.current.take() {
            task.cancel();
        }
        was_pending
    }

    /// Clears the slot without aborting, but only if it still holds task
    /// `id`.  Returns `false` if the task was superseded or cancelled.
    pub fn release(&mut self, id: u64) -> bool {
        match &self.current {
            Some(task) if task.id == id => {
                self.current = None;
                true
            }
            _ => false,
        }
    }

    /// Returns `true` if a task is stored and has not finished yet.
    pub fn is_pending(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
