//! Shutdown watcher.
//!
//! Runs once per worker. Waits for a stop request from any thread, then flips
//! the quit flag and wakes everything: the accept loop, the idle reaper, and
//! every registered session. Sessions are not closed here, only told to close;
//! each one unregisters itself as it finishes.

use std::rc::Rc;

use tokio::sync::watch;

use crate::worker::Shared;

pub(crate) async fn run(shared: Rc<Shared>, mut stop: watch::Receiver<bool>) {
    tracing::debug!("shutdown watcher started");

    // Err means every StopHandle is gone and nobody can ask for a stop any
    // more, which is taken as the request itself.
    let requested = stop.wait_for(|stopped| *stopped).await.is_ok();
    if requested {
        tracing::info!("stop requested, shutting down worker");
    } else {
        tracing::warn!("all stop handles dropped, shutting down worker");
    }

    // Must precede every wake below so woken units observe it.
    shared.quit.set(true);

    shared.accept_wake.wake();
    shared.reaper_wake.wake();

    let woken = shared.registry.borrow().expire_all();
    tracing::debug!(sessions = woken, "woke registered sessions for shutdown");

    drop(stop);
}
