//! Server error types.

use std::fmt;

use socksgate_worker::WorkerError;

/// Errors that can occur in the server.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (unparseable bind or upstream address, etc.).
    ///
    /// Fatal, prevents startup. Fix configuration and restart.
    Config(String),

    /// Transport/network error (bind failure, address in use, etc.).
    ///
    /// Usually fatal at startup. Check error message for details.
    Transport(String),

    /// Worker error (invalid worker configuration, unit failure).
    ///
    /// Wraps errors from the worker lifecycle. See `WorkerError` for details.
    Worker(WorkerError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Worker(err) => write!(f, "worker error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Worker(err) => Some(err),
            _ => None,
        }
    }
}

impl From<WorkerError> for ServerError {
    fn from(err: WorkerError) -> Self {
        Self::Worker(err)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
