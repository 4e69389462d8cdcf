//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the logging middleware mounted
//! - Wire up tower middleware (tracing, request timeout)
//! - Serve with peer addresses attached to every request
//! - Stop on the shutdown signal, letting in-flight requests finish

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::access_log::SharedLogSink;
use crate::config::ServerConfig;
use crate::http::hyper_sink::HyperSink;
use crate::http::logger::{Handler, RequestLogger};
use crate::lifecycle::shutdown;

/// HTTP server fronting a downstream handler with request logging.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server serving `handler` for every path.
    pub fn new<H>(config: &ServerConfig, handler: H, log_sink: SharedLogSink) -> Self
    where
        H: Handler<HyperSink>,
    {
        let router = Self::build_router(config, RequestLogger::new(handler, log_sink));
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router<H>(config: &ServerConfig, logger: RequestLogger<H>) -> Router
    where
        H: Handler<HyperSink>,
    {
        Router::new()
            .fallback_service(logger)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown_rx` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown::wait_for(shutdown_rx))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
