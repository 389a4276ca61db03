//! socksgate proxy server.
//!
//! Production glue around [`socksgate_worker`]: binds a real TCP socket, runs
//! one [`Worker`] with [`ForwardFactory`] sessions, and turns an external
//! shutdown signal into an orderly stop, drain and join.
//!
//! # Components
//!
//! - [`Server`]: binds the listening socket and drives the worker lifecycle
//! - [`ForwardFactory`] / [`ForwardSession`]: relay each client to a fixed
//!   upstream address
//! - [`ServerRuntimeConfig`]: addresses, socket options and worker tuning

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod forward;

use std::{future::Future, net::SocketAddr, time::Duration};

pub use error::ServerError;
pub use forward::{ForwardFactory, ForwardSession};
use socksgate_worker::{TcpAcceptor, Worker, WorkerConfig};
use tokio::net::TcpListener;

/// Default time allowed for sessions to finish after a stop.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:1080")
    pub bind_address: String,
    /// Address every connection is forwarded to
    pub upstream_address: String,
    /// Set `TCP_NODELAY` on accepted connections
    pub nodelay: bool,
    /// How long to wait for sessions to finish after a stop
    pub shutdown_grace: Duration,
    /// Worker configuration (reaper period, liveness)
    pub worker: WorkerConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:1080".to_string(),
            upstream_address: "127.0.0.1:8080".to_string(),
            nodelay: false,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            worker: WorkerConfig::default(),
        }
    }
}

/// Production socksgate server.
///
/// One listening socket served by one worker on the current thread.
pub struct Server {
    acceptor: TcpAcceptor,
    upstream: SocketAddr,
    shutdown_grace: Duration,
    worker: WorkerConfig,
}

impl Server {
    /// Parse addresses and bind the listening socket.
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let bind: SocketAddr = config.bind_address.parse().map_err(|e| {
            ServerError::Config(format!("invalid bind address '{}': {e}", config.bind_address))
        })?;
        let upstream: SocketAddr = config.upstream_address.parse().map_err(|e| {
            ServerError::Config(format!(
                "invalid upstream address '{}': {e}",
                config.upstream_address
            ))
        })?;

        let listener = TcpListener::bind(bind)
            .await
            .map_err(|e| ServerError::Transport(format!("failed to bind {bind}: {e}")))?;
        let acceptor = TcpAcceptor::new(listener).with_nodelay(config.nodelay);

        Ok(Self {
            acceptor,
            upstream,
            shutdown_grace: config.shutdown_grace,
            worker: config.worker,
        })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.acceptor.local_addr()?)
    }

    /// Serve connections until `shutdown` resolves, then stop the worker,
    /// give sessions up to the grace period to finish, and join it.
    ///
    /// # Panics
    ///
    /// Panics when called outside a `tokio::task::LocalSet`.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<(), ServerError> {
        let Self { acceptor, upstream, shutdown_grace, worker } = self;

        tracing::info!(listen = %acceptor.local_addr()?, %upstream, "server starting");

        let worker = Worker::new(acceptor, ForwardFactory::new(upstream), worker)?;
        let handle = worker.start();

        shutdown.await;
        tracing::info!(active = handle.session_count(), "shutdown requested");
        handle.stop();

        if tokio::time::timeout(shutdown_grace, handle.drain()).await.is_err() {
            tracing::warn!(
                remaining = handle.session_count(),
                grace = ?shutdown_grace,
                "sessions still open after grace period"
            );
        }

        handle.join().await?;
        tracing::info!("server stopped");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_rejects_bad_addresses() {
        let config =
            ServerRuntimeConfig { bind_address: "not-an-address".to_string(), ..Default::default() };
        assert!(matches!(Server::bind(config).await, Err(ServerError::Config(_))));

        let config = ServerRuntimeConfig {
            bind_address: "127.0.0.1:0".to_string(),
            upstream_address: "nowhere".to_string(),
            ..Default::default()
        };
        assert!(matches!(Server::bind(config).await, Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn bind_picks_ephemeral_port() {
        let config =
            ServerRuntimeConfig { bind_address: "127.0.0.1:0".to_string(), ..Default::default() };
        let server = Server::bind(config).await.unwrap();

        assert_ne!(server.local_addr().unwrap().port(), 0);
    }
}
