//! Completion gates for in-flight pipeline work.
//!
//! A [`Gate`] counts outstanding units of work and lets a task await the
//! count reaching zero. The pipeline keeps two independent gates -- one for
//! dispatched-but-unapplied metric updates, one for in-flight flush sends --
//! because a flush snapshot must wait for ingestion to settle while ingestion
//! must never wait on a slow network send.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Notify;

/// Counter of outstanding work with an awaitable quiescent point.
#[derive(Debug, Default)]
pub(crate) struct Gate {
    outstanding: AtomicU64,
    notify: Notify,
}

impl Gate {
    /// Account for `n` new units of outstanding work.
    pub(crate) fn add(&self, n: u64) {
        self.outstanding.fetch_add(n, Ordering::SeqCst);
    }

    /// Mark one unit of work complete.
    pub(crate) fn done(&self) {
        let previous = self.outstanding.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "gate underflow");
        if previous == 1 {
            self.notify.notify_waiters();
        }
    }

    /// Wait until the outstanding count reaches zero.
    ///
    /// Registration for notification happens before the count is checked. If
    /// the order were reversed, a `done` landing between the check and the
    /// await would be lost and this future would hang.
    pub(crate) async fn settled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.outstanding.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}
