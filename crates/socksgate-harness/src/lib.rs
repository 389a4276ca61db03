//! Deterministic in-memory harness for socksgate worker tests.
//!
//! Runs workers without sockets: a [`ScriptedListener`] delivers in-memory
//! connections pushed through a [`Connector`], and [`ProbeFactory`] builds
//! echo sessions that log every lifecycle step to a [`ProbeLog`].
//!
//! Workers are `!Send` and must run on a `LocalSet`; wrap test bodies in
//! [`run_local`]. Combined with Tokio's paused clock this makes reaper ticks
//! fully deterministic.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod probe;
pub mod scripted;

use std::future::Future;

pub use probe::{ExpiryPolicy, ProbeEvent, ProbeFactory, ProbeLog, ProbeSession};
pub use scripted::{ClientEnd, Connector, ScriptedListener, scripted_listener};

/// Scheduler passes [`settle`] gives the `LocalSet`.
const SETTLE_ROUNDS: usize = 64;

/// Drive `future` to completion on a fresh `LocalSet`.
pub async fn run_local<F: Future>(future: F) -> F::Output {
    tokio::task::LocalSet::new().run_until(future).await
}

/// Yield repeatedly so every runnable local task gets to run.
///
/// Does not advance time.
pub async fn settle() {
    for _ in 0..SETTLE_ROUNDS {
        tokio::task::yield_now().await;
    }
}
