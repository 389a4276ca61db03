//! Forced wake for scheduled units.
//!
//! A unit suspended on I/O readiness or a timer can be made runnable early by
//! another unit on the same worker. The woken unit is expected to re-check its
//! exit condition (quit flag, liveness) and go back to waiting if there is
//! nothing to do. This is the only cancellation mechanism the worker uses: it
//! never aborts a task, it wakes it and lets it leave on its own.

use std::rc::Rc;

use tokio::sync::Notify;

/// Per-unit wake signal.
///
/// Cloning yields another handle to the same signal. A wake delivered while
/// nobody is waiting is stored, and the next [`wait`](Self::wait) completes
/// immediately. Repeated wakes before a wait coalesce into one.
#[derive(Clone, Default)]
pub(crate) struct WakeSignal {
    notify: Rc<Notify>,
}

impl WakeSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make the owning unit runnable.
    pub(crate) fn wake(&self) {
        self.notify.notify_one();
    }

    /// Suspend until woken.
    ///
    /// Cancel-safe: dropping the future before it completes does not consume
    /// a pending wake.
    pub(crate) async fn wait(&self) {
        self.notify.notified().await;
    }
}

impl std::fmt::Debug for WakeSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeSignal").finish_non_exhaustive()
    }
}
