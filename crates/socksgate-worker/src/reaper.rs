//! Idle reaper.
//!
//! Every `reap_interval` each registered session loses one point of liveness,
//! whether or not it has been busy. Sessions reset their own liveness when they
//! see traffic, so only the quiet ones run down to zero. Those are woken to
//! decide for themselves whether to close. No per-session timers are involved.

use std::rc::Rc;

use crate::worker::Shared;

pub(crate) async fn run(shared: Rc<Shared>) {
    let period = shared.config.reap_interval;
    tracing::debug!(?period, "idle reaper started");

    loop {
        tokio::select! {
            () = tokio::time::sleep(period) => {},
            () = shared.reaper_wake.wait() => {},
        }

        // Shutdown has already woken every session.
        if shared.is_quitting() {
            break;
        }

        let expired = shared.registry.borrow().decay_liveness();
        if expired.is_empty() {
            tracing::trace!(active = shared.session_count(), "reaper tick");
        } else {
            tracing::debug!(
                active = shared.session_count(),
                expired = expired.len(),
                "woke idle sessions"
            );
        }
    }

    tracing::debug!("idle reaper stopped");
}
