//! Single-shot broadcast latch.
//!
//! One owner runs a target to completion and opens the gate exactly once;
//! every other scheduler of the same target id waits on it instead of
//! re-running the work. Generalizes the `StopSignal` one-shot condvar
//! pattern from the teacher's progress reporting to an async, multi-waiter
//! primitive (`Notify::notified()` is created before the state check on
//! every iteration, so a `set_open` that lands between the check and the
//! await is never missed).

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::FabError;

#[derive(Debug, Default)]
pub struct Gate {
    open: AtomicBool,
    notify: Notify,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            open: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Opens the gate and wakes every current and future waiter. Idempotent.
    pub fn open(&self) {
        self.open.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_open() {
                return;
            }
            notified.await;
        }
    }

    /// Waits for the gate, but returns `FabError::Cancelled` if the given
    /// token fires first (spec §4.2: a waiter observes cancellation rather
    /// than hanging forever on a target that will never finish).
    pub async fn wait_cancellable(&self, cancel: &CancellationToken) -> Result<(), FabError> {
        loop {
            let notified = self.notify.notified();
            if self.is_open() {
                return Ok(());
            }
            tokio::select! {
                _ = notified => {}
                _ = cancel.cancelled() => return Err(FabError::Cancelled),
            }
        }
    }
}
