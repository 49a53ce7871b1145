// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process-wide "shutdown pending" broadcast.
//!
//! A signal handler (not modeled here -- platform wrappers are out of
//! scope) flips this flag and notifies every waiter; task queues, the
//! scheduler, and caches each drain on their own deadline after observing
//! it, per the concurrency model's shutdown cascade.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::Notify;

#[derive(Debug, Clone)]
pub struct ShutdownState {
    pending: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownState {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Flip the flag and wake every waiter. Idempotent.
    pub fn trigger(&self) {
        self.pending.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Resolves immediately if shutdown is already pending.
    pub async fn wait(&self) {
        if self.is_pending() {
            return;
        }
        self.notify.notified().await;
    }
}
