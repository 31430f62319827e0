//! replay-proxy
//!
//! ```text
//!                      ┌──────────────────────────────────────────────┐
//!   Client request     │  ┌────────┐   ┌──────────┐   ┌───────────┐   │
//!   ───────────────────┼─▶│  http  │──▶│  retry   │──▶│ forwarder │───┼──▶ Backend
//!                      │  │ server │   │  layer   │   │ + pool    │   │
//!   Client response    │  └────────┘   └──────────┘   └───────────┘   │
//!   ◀──────────────────┼── streamed through the committed attempt      │
//!                      │                                              │
//!                      │  config (hot reload) · observability · lifecycle
//!                      └──────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use replay_proxy::config::{load_config, ConfigWatcher, ProxyConfig};
use replay_proxy::observability::{logging, metrics};
use replay_proxy::{HttpServer, Shutdown};

#[derive(Debug, Parser)]
#[command(name = "replay-proxy", version, about = "HTTP reverse proxy with retry and replay")]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    logging::init(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "replay-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        backends = config.backends.len(),
        max_attempts = config.retries.max_attempts,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    // Keep the watcher handle alive for the lifetime of the server.
    let (_watcher, config_updates) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path, config.clone());
            (Some(watcher.run()?), updates)
        }
        None => (None, tokio::sync::mpsc::unbounded_channel().1),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    shutdown.trigger_on_signal();

    let server = HttpServer::new(&config)?;
    server.run(listener, config_updates, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
