//! tunnel-panda
//!
//! ```text
//!                         ┌──────────────────────────────────────────────────┐
//!                         │                  TUNNEL PANDA                     │
//!                         │                                                   │
//!   client ───────────────┼─▶ net::listener ─▶ net::head ─┬─▶ websocket       │
//!                         │                               │     gateway ──────┼──▶ upstream (chat stream)
//!                         │                               │       ▲           │
//!                         │                               │       │ ingest    │
//!                         │                               └─▶ http (axum) ────┼──▶ upstream / vector db
//!                         │                                                   │
//!                         │   config · security · observability · lifecycle  │
//!                         └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tunnel_panda::config::loader::{load_config, load_from_env};
use tunnel_panda::lifecycle::shutdown_signal;
use tunnel_panda::net::listener::Listener;
use tunnel_panda::observability::{logging, metrics};
use tunnel_panda::HttpServer;

#[derive(Parser)]
#[command(name = "tunnel-panda", version, about = "Authenticated gateway for a local LLM server")]
struct Args {
    /// TOML config file. Without it, defaults plus environment variables apply.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload credentials when the config file changes.
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => load_from_env()?,
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tunnel-panda starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        upstream = %config.upstream.url,
        database = %config.database.provider,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = Listener::bind(&config.listener).await?;
    let server = HttpServer::new(config)?;

    let _watcher = match (&args.config, args.watch) {
        (Some(path), true) => Some(server.watch_config(path.clone())?),
        (None, true) => {
            tracing::warn!("--watch needs --config, hot reload disabled");
            None
        }
        _ => None,
    };

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.trigger();
    });

    server.run(listener).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
