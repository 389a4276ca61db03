//! Connection-acceptance and session-lifecycle core of the socksgate proxy.
//!
//! A [`Worker`] serves one listening socket on a single thread. It accepts
//! connections, hands each to a [`Session`] running on its own task, tracks
//! every live session in a registry, expires idle sessions, and coordinates an
//! orderly shutdown.
//!
//! # Architecture
//!
//! The worker is three cooperating tasks on a `tokio::task::LocalSet`:
//!
//! - **Accept loop**: accepts, configures and registers connections, then
//!   starts their sessions.
//! - **Shutdown watcher**: waits for a [`StopHandle::stop`], sets the quit flag
//!   and wakes the other two units plus every registered session.
//! - **Idle reaper**: every `reap_interval` takes one point of liveness from
//!   each session and wakes those that reached zero.
//!
//! Cancellation is cooperative throughout. The worker never aborts a task or
//! closes a session; it wakes the task and the task re-checks whether it should
//! leave. Sessions see that state through their [`SessionContext`].
//!
//! # Usage
//!
//! ```no_run
//! use socksgate_worker::{TcpAcceptor, Worker, WorkerConfig};
//! # use socksgate_worker::{Session, SessionContext, SessionError, SessionFactory};
//! # use std::net::SocketAddr;
//! # struct Noop;
//! # impl Session for Noop {
//! #     fn run(self, _ctx: SessionContext) -> impl std::future::Future<Output = ()> + 'static {
//! #         async {}
//! #     }
//! # }
//! # struct Factory;
//! # impl SessionFactory<tokio::net::TcpStream> for Factory {
//! #     type Session = Noop;
//! #     fn create(&self, _: tokio::net::TcpStream, _: SocketAddr) -> Result<Noop, SessionError> {
//! #         Ok(Noop)
//! #     }
//! # }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:1080").await?;
//! let worker = Worker::new(TcpAcceptor::new(listener), Factory, WorkerConfig::default())?;
//!
//! let handle = worker.start();
//! let stop = handle.stop_handle();
//! // ... later, from any thread:
//! stop.stop();
//!
//! handle.drain().await;
//! handle.join().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod accept;
mod config;
mod error;
mod listener;
mod reaper;
mod registry;
mod session;
mod shutdown;
mod wake;
mod worker;

pub use config::{
    DEFAULT_ACCEPT_ERROR_BACKOFF, DEFAULT_REAP_INTERVAL, DEFAULT_SESSION_LIVENESS, WorkerConfig,
};
pub use error::{SessionError, WorkerError};
pub use listener::{Listener, TcpAcceptor};
pub use registry::SessionId;
pub use session::{Session, SessionContext, SessionFactory};
pub use worker::{StopHandle, Worker, WorkerHandle};
