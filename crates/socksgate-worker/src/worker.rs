//! Worker lifecycle.
//!
//! A [`Worker`] owns one listening socket and everything needed to serve it:
//! the session registry, the quit flag, and three scheduled units (accept
//! loop, shutdown watcher, idle reaper). [`Worker::start`] spawns the units on
//! the current `LocalSet` and returns a [`WorkerHandle`]; the handle's
//! [`join`](WorkerHandle::join) is the only way to tear the worker down and
//! resolves once all three units have returned.
//!
//! # Threading
//!
//! Everything except [`StopHandle`] is `!Send` and lives on the `LocalSet`
//! thread. All units and sessions of a worker share that thread, so registry
//! and quit-flag updates are strictly ordered by the scheduler. A
//! [`StopHandle`] can be moved anywhere, e.g. into a signal handler.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    sync::Arc,
};

use tokio::{
    sync::{Notify, watch},
    task::JoinHandle,
};

use crate::{
    accept,
    config::WorkerConfig,
    error::WorkerError,
    listener::Listener,
    reaper,
    registry::{SessionId, SessionRegistry},
    session::SessionFactory,
    shutdown,
    wake::WakeSignal,
};

/// State shared by the worker's units and its sessions.
pub(crate) struct Shared {
    pub(crate) config: WorkerConfig,
    /// Set once by the shutdown watcher, never cleared.
    pub(crate) quit: Cell<bool>,
    pub(crate) registry: RefCell<SessionRegistry>,
    pub(crate) accept_wake: WakeSignal,
    pub(crate) reaper_wake: WakeSignal,
    /// Notified whenever the registry becomes empty.
    drained: Notify,
}

impl Shared {
    pub(crate) fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            quit: Cell::new(false),
            registry: RefCell::new(SessionRegistry::new()),
            accept_wake: WakeSignal::new(),
            reaper_wake: WakeSignal::new(),
            drained: Notify::new(),
        }
    }

    pub(crate) fn is_quitting(&self) -> bool {
        self.quit.get()
    }

    pub(crate) fn session_count(&self) -> usize {
        self.registry.borrow().len()
    }

    /// Add a session to the registry with the configured starting liveness.
    pub(crate) fn register(&self) -> (SessionId, Rc<Cell<i32>>, WakeSignal) {
        let wake = WakeSignal::new();
        let (id, liveness) =
            self.registry.borrow_mut().insert(self.config.session_liveness, wake.clone());

        (id, liveness, wake)
    }

    /// Close notification: drop a finished session from the registry.
    pub(crate) fn unregister(&self, id: SessionId) {
        let (removed, empty) = {
            let mut registry = self.registry.borrow_mut();
            (registry.remove(id), registry.is_empty())
        };

        if removed {
            tracing::debug!(session = %id, "session closed");
        } else {
            tracing::warn!(session = %id, "close notification for unregistered session");
        }

        if empty {
            self.drained.notify_waiters();
        }
    }
}

/// Requests shutdown of a worker from any thread.
///
/// Stopping is asynchronous: [`stop`](Self::stop) returns immediately and the
/// worker winds down on its own thread. Calling it again is harmless. A stop
/// requested before the worker has started is remembered.
///
/// If every handle for a worker (including the one inside [`WorkerHandle`]) is
/// dropped, the worker shuts down as if stopped.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Ask the worker to shut down.
    pub fn stop(&self) {
        let already = self.tx.send_replace(true);
        if !already {
            tracing::debug!("worker stop signalled");
        }
    }

    /// Whether a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

/// A worker that has been built but not started.
pub struct Worker<L, F> {
    shared: Rc<Shared>,
    listener: L,
    factory: F,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
}

impl<L, F> Worker<L, F>
where
    L: Listener,
    F: SessionFactory<L::Stream>,
{
    /// Build a worker around an already bound, listening socket.
    ///
    /// Nothing runs until [`start`](Self::start).
    pub fn new(listener: L, factory: F, config: WorkerConfig) -> Result<Self, WorkerError> {
        config.validate()?;

        let (stop_tx, stop_rx) = watch::channel(false);

        Ok(Self {
            shared: Rc::new(Shared::new(config)),
            listener,
            factory,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
        })
    }

    /// Handle for stopping the worker, usable before and after it starts.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle { tx: Arc::clone(&self.stop_tx) }
    }

    /// Spawn the accept loop, shutdown watcher and idle reaper.
    ///
    /// Returns immediately; the units run as the `LocalSet` is driven.
    ///
    /// # Panics
    ///
    /// Panics when called outside a `tokio::task::LocalSet`.
    pub fn start(self) -> WorkerHandle {
        let Self { shared, listener, factory, stop_tx, stop_rx } = self;

        let accept = tokio::task::spawn_local(accept::run(Rc::clone(&shared), listener, factory));
        let shutdown = tokio::task::spawn_local(shutdown::run(Rc::clone(&shared), stop_rx));
        let reaper = tokio::task::spawn_local(reaper::run(Rc::clone(&shared)));

        tracing::info!(
            reap_interval = ?shared.config.reap_interval,
            session_liveness = shared.config.session_liveness,
            "worker started"
        );

        WorkerHandle { shared, stop: StopHandle { tx: stop_tx }, accept, shutdown, reaper }
    }
}

/// A running worker.
pub struct WorkerHandle {
    shared: Rc<Shared>,
    stop: StopHandle,
    accept: JoinHandle<()>,
    shutdown: JoinHandle<()>,
    reaper: JoinHandle<()>,
}

impl WorkerHandle {
    /// Ask the worker to shut down. Same as [`StopHandle::stop`].
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// A `Send` handle for stopping the worker from elsewhere.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Whether the shutdown watcher has set the quit flag.
    pub fn is_quitting(&self) -> bool {
        self.shared.is_quitting()
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.shared.session_count()
    }

    /// Whether a session is still registered.
    pub fn is_registered(&self, id: SessionId) -> bool {
        self.shared.registry.borrow().contains(id)
    }

    /// Current liveness of a registered session.
    pub fn session_liveness(&self, id: SessionId) -> Option<i32> {
        self.shared.registry.borrow().get(id).map(|entry| entry.liveness())
    }

    /// Ids of all registered sessions, newest first.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.shared.registry.borrow().iter().map(|(id, _)| id).collect()
    }

    /// Resolve once no sessions are registered.
    ///
    /// Does not stop the worker; pair with [`stop`](Self::stop) to wait for
    /// sessions to wind down after a shutdown.
    pub async fn drain(&self) {
        loop {
            let drained = self.shared.drained.notified();
            if self.shared.registry.borrow().is_empty() {
                return;
            }
            drained.await;
        }
    }

    /// Wait for the accept loop, shutdown watcher and idle reaper to return,
    /// then release the worker.
    ///
    /// Does not request a stop by itself. Sessions still running keep going
    /// until they finish; use [`drain`](Self::drain) first to wait for them.
    pub async fn join(self) -> Result<(), WorkerError> {
        let Self { shared, stop, accept, shutdown, reaper } = self;

        let mut first_error = None;
        for (unit, handle) in [("accept", accept), ("shutdown", shutdown), ("reaper", reaper)] {
            if let Err(e) = handle.await {
                tracing::error!(unit, error = %e, "worker unit did not return cleanly");
                first_error.get_or_insert(WorkerError::UnitFailed { unit });
            }
        }

        tracing::info!(remaining = shared.session_count(), "worker stopped");
        drop(stop);

        first_error.map_or(Ok(()), Err)
    }
}
