//! Accept loop.
//!
//! Waits on the listener, turns each connection into a registered, running
//! session, and keeps going. Per-connection failures never end the loop. The
//! only way out is a forced wake observed while the listener has nothing
//! pending and the quit flag is set.
//!
//! A connection that is already queued when shutdown starts is still admitted:
//! the listener is always polled before the wake signal, and the quit flag is
//! only consulted on the wake branch. Such a session sees
//! [`SessionContext::is_quitting`](crate::SessionContext::is_quitting) on its
//! first poll and is expected to leave straight away.

use std::{net::SocketAddr, rc::Rc};

use crate::{
    listener::Listener,
    session::{self, SessionFactory},
    worker::Shared,
};

pub(crate) async fn run<L, F>(shared: Rc<Shared>, mut listener: L, factory: F)
where
    L: Listener,
    F: SessionFactory<L::Stream>,
{
    tracing::debug!("accept loop started");

    loop {
        let accepted = tokio::select! {
            biased;

            accepted = listener.accept() => accepted,
            () = shared.accept_wake.wait() => {
                if shared.is_quitting() {
                    break;
                }
                continue;
            },
        };

        match accepted {
            Ok((stream, peer)) => admit(&shared, &listener, &factory, stream, peer),
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");

                let backoff = shared.config.accept_error_backoff;
                if !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
            },
        }
    }

    tracing::debug!("accept loop stopped");
}

/// Configure, construct, register and start one session.
fn admit<L, F>(shared: &Rc<Shared>, listener: &L, factory: &F, stream: L::Stream, peer: SocketAddr)
where
    L: Listener,
    F: SessionFactory<L::Stream>,
{
    if let Err(e) = listener.configure(&stream, peer) {
        tracing::warn!(%peer, error = %e, "failed to configure connection, dropping it");
        return;
    }

    let session = match factory.create(stream, peer) {
        Ok(session) => session,
        Err(e) => {
            tracing::debug!(%peer, error = %e, "session construction failed, dropping connection");
            return;
        },
    };

    let id = session::spawn(shared, session);
    tracing::debug!(%peer, session = %id, active = shared.session_count(), "session started");
}
