//! Request logging demo server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ axum (TraceLayer, TimeoutLayer)
//!                  │
//!                  ▼
//!            RequestLogger ──spawn──▶ DemoHandler
//!                  │                      │ writes via ObservingResponder
//!                  │◀──── head + body ────┘ (HyperSink)
//!                  ▼
//!            access log sink (stdout | stderr | file)
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use request_logger::access_log::open_sink;
use request_logger::config::{load_config, ServerConfig};
use request_logger::http::{DemoHandler, HttpServer};
use request_logger::observability::init_tracing;
use request_logger::Shutdown;

#[derive(Parser)]
#[command(name = "request-logger")]
#[command(about = "HTTP server with one access record per request", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listener.bind_address = listen;
    }

    init_tracing(&config.observability);
    tracing::info!("request-logger v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        access_log = ?config.access_log.destination,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    let log_sink = open_sink(&config.access_log)?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    shutdown.trigger_on_ctrl_c();

    let server = HttpServer::new(&config, DemoHandler, log_sink);
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
