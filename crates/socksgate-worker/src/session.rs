//! Session collaborator interface.
//!
//! A session is one accepted connection's protocol handling. The worker never
//! looks inside it: it builds one through a [`SessionFactory`], registers it,
//! and runs it on its own task. All the worker exposes to the session is a
//! [`SessionContext`] with the registry-visible state (liveness, forced wake,
//! quit flag).
//!
//! # Close notification
//!
//! The task that runs a session owns a registration guard. The guard is
//! dropped after [`Session::run`] has returned and the session value itself has
//! been dropped, or when the task unwinds, and removes the session from the
//! registry. It fires exactly once per session.
//!
//! # Expected session behaviour
//!
//! A session should select on [`SessionContext::woken`] alongside its own I/O.
//! When woken it checks [`SessionContext::should_close`]: if the worker is
//! quitting, it returns; if only its liveness ran out, it may either return or
//! [`refresh`](SessionContext::refresh) and carry on. Any real activity should
//! also refresh, otherwise the idle reaper will eventually expire it.

use std::{cell::Cell, fmt, future::Future, net::SocketAddr, rc::Rc};

use crate::{error::SessionError, registry::SessionId, wake::WakeSignal, worker::Shared};

/// A connection handler run by the worker.
pub trait Session: 'static {
    /// Drive the session until it finishes.
    ///
    /// The future runs on its own `LocalSet` task, independently of the worker
    /// and of other sessions.
    fn run(self, ctx: SessionContext) -> impl Future<Output = ()> + 'static;
}

/// Builds sessions for accepted connections of stream type `S`.
pub trait SessionFactory<S>: 'static {
    /// Session type produced by this factory.
    type Session: Session;

    /// Construct a session for a freshly accepted connection.
    ///
    /// On error the stream is dropped (closing the connection) and nothing is
    /// registered.
    fn create(&self, stream: S, peer: SocketAddr) -> Result<Self::Session, SessionError>;
}

/// Registry-visible state handed to a running session.
pub struct SessionContext {
    id: SessionId,
    liveness: Rc<Cell<i32>>,
    wake: WakeSignal,
    shared: Rc<Shared>,
}

impl SessionContext {
    /// Registry id of this session.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Remaining liveness. Zero or below means the idle reaper has expired
    /// the session.
    pub fn liveness(&self) -> i32 {
        self.liveness.get()
    }

    /// Overwrite the liveness counter.
    pub fn set_liveness(&self, liveness: i32) {
        self.liveness.set(liveness);
    }

    /// Reset liveness to the worker's configured starting value.
    ///
    /// Call on every sign of activity.
    pub fn refresh(&self) {
        self.liveness.set(self.shared.config.session_liveness);
    }

    /// Whether liveness has run out.
    pub fn is_expired(&self) -> bool {
        self.liveness.get() <= 0
    }

    /// Whether the worker is shutting down.
    pub fn is_quitting(&self) -> bool {
        self.shared.is_quitting()
    }

    /// Whether the session ought to finish now: the worker is quitting or the
    /// session has expired.
    pub fn should_close(&self) -> bool {
        self.is_quitting() || self.is_expired()
    }

    /// Wait for the next forced wake from the worker.
    ///
    /// Completes immediately if a wake arrived since the last call. Cancel-safe,
    /// so it can sit in a `tokio::select!` next to the session's I/O.
    pub async fn woken(&self) {
        self.wake.wait().await;
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("id", &self.id)
            .field("liveness", &self.liveness.get())
            .field("quitting", &self.is_quitting())
            .finish_non_exhaustive()
    }
}

/// Removes its session from the registry when dropped.
struct Registration {
    shared: Rc<Shared>,
    id: SessionId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.shared.unregister(self.id);
    }
}

/// Register `session` and start it on its own task.
///
/// Registration happens before the task is spawned, so even a session that
/// finishes on its first poll is observed as registered and then removed.
pub(crate) fn spawn<S: Session>(shared: &Rc<Shared>, session: S) -> SessionId {
    let (id, liveness, wake) = shared.register();

    let ctx = SessionContext { id, liveness, wake, shared: Rc::clone(shared) };
    let registration = Registration { shared: Rc::clone(shared), id };

    tokio::task::spawn_local(async move {
        let _registration = registration;
        session.run(ctx).await;
    });

    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::WorkerConfig, registry::Entry};

    /// Finishes on its first poll.
    struct Immediate;

    impl Session for Immediate {
        fn run(self, _ctx: SessionContext) -> impl Future<Output = ()> + 'static {
            async {}
        }
    }

    /// Pins its liveness to a fixed value, then waits for one forced wake.
    struct Pinned(i32);

    impl Session for Pinned {
        fn run(self, ctx: SessionContext) -> impl Future<Output = ()> + 'static {
            async move {
                ctx.set_liveness(self.0);
                ctx.woken().await;
            }
        }
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn registered_before_first_poll() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let shared = Rc::new(Shared::new(WorkerConfig::default()));
                let id = spawn(&shared, Immediate);

                assert!(shared.registry.borrow().contains(id), "must be registered before it runs");

                settle().await;
                assert!(!shared.registry.borrow().contains(id));
                assert_eq!(shared.session_count(), 0);
            })
            .await;
    }

    #[tokio::test]
    async fn set_liveness_is_visible_to_registry() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let shared = Rc::new(Shared::new(WorkerConfig::default()));
                let id = spawn(&shared, Pinned(3));

                let liveness = |shared: &Shared| shared.registry.borrow().get(id).map(Entry::liveness);
                assert_eq!(liveness(&shared), Some(WorkerConfig::default().session_liveness));

                settle().await;
                assert_eq!(liveness(&shared), Some(3));

                // One tick leaves it alive at 2; expiry wakes it and it leaves
                assert!(shared.registry.borrow().decay_liveness().is_empty());
                assert_eq!(liveness(&shared), Some(2));

                shared.registry.borrow().expire_all();
                settle().await;
                assert_eq!(liveness(&shared), None);
            })
            .await;
    }
}
