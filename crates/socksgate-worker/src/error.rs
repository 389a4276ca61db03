//! Worker and session error types.
//!
//! Only construction-time failures reach the owner through the lifecycle API.
//! Everything that goes wrong with an individual connection is logged and the
//! accept loop carries on.

use std::io;

/// Errors surfaced by the worker lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Configuration rejected at construction.
    ///
    /// Fatal - fix the configuration and construct again.
    #[error("invalid worker configuration: {0}")]
    Config(String),

    /// The listening socket could not be prepared for the worker.
    ///
    /// The socket must already be bound and listening; this covers switching
    /// it to non-blocking mode and registering it with the runtime.
    #[error("listener setup failed: {0}")]
    Listener(#[source] io::Error),

    /// A scheduled unit panicked or was cancelled instead of returning.
    ///
    /// Indicates a bug. Reported by `join` once all units are done.
    #[error("worker unit '{unit}' did not return cleanly")]
    UnitFailed {
        /// Name of the unit
        unit: &'static str,
    },
}

/// Errors a [`SessionFactory`](crate::SessionFactory) reports when it refuses a
/// connection.
///
/// The connection is closed and never registered. Other sessions are not
/// affected.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The factory declined the connection.
    #[error("session rejected: {0}")]
    Rejected(String),

    /// I/O failure while setting up the session.
    #[error("session I/O error: {0}")]
    Io(#[from] io::Error),
}
