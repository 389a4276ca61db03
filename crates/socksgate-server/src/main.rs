//! socksgate server binary.
//!
//! # Usage
//!
//! ```bash
//! # Forward everything on :1080 to a local service
//! socksgate-server --bind 0.0.0.0:1080 --upstream 127.0.0.1:8080
//!
//! # Reap idle connections faster
//! socksgate-server --upstream 127.0.0.1:8080 --reap-interval-secs 5 --session-liveness 3
//! ```

use std::time::Duration;

use clap::Parser;
use socksgate_server::{Server, ServerRuntimeConfig};
use socksgate_worker::WorkerConfig;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// socksgate proxy server
#[derive(Parser, Debug)]
#[command(name = "socksgate-server")]
#[command(about = "Single-worker TCP proxy with idle reaping")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:1080")]
    bind: String,

    /// Address to forward connections to
    #[arg(short, long)]
    upstream: String,

    /// Idle reaper period in seconds
    #[arg(long, default_value = "30")]
    reap_interval_secs: u64,

    /// Reaper ticks an idle session survives
    #[arg(long, default_value = "10")]
    session_liveness: i32,

    /// Seconds to wait for sessions to finish on shutdown
    #[arg(long, default_value = "5")]
    shutdown_grace_secs: u64,

    /// Set TCP_NODELAY on accepted connections
    #[arg(long)]
    nodelay: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        upstream_address: args.upstream,
        nodelay: args.nodelay,
        shutdown_grace: Duration::from_secs(args.shutdown_grace_secs),
        worker: WorkerConfig {
            reap_interval: Duration::from_secs(args.reap_interval_secs),
            session_liveness: args.session_liveness,
            ..Default::default()
        },
    };

    // One worker, one thread: sessions share the worker's LocalSet.
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let local = tokio::task::LocalSet::new();

    local.block_on(&runtime, async move {
        tracing::info!("socksgate server starting");
        tracing::info!("Binding to {}", config.bind_address);

        let server = Server::bind(config).await?;
        tracing::info!("Server listening on {}", server.local_addr()?);

        server.run(shutdown_signal()).await
    })?;

    Ok(())
}

/// Resolves on Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C, shutting down");
    }
}
