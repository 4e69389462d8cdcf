//! HTTP request logging middleware.
//!
//! Wraps a downstream handler, observes the response it sends, and writes one
//! fixed-format access record per request:
//!
//! ```text
//! 2026-10-17T09:14:03+02:00 10.0.0.7 GET "/x" 200 3 100 - "test-agent" ""
//! ```

pub mod access_log;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use access_log::{LogSink, MemorySink, SharedLogSink, WriterSink};
pub use config::ServerConfig;
pub use http::{Handler, HttpServer, ObservingResponder, RequestLogger, ResponseSink};
pub use lifecycle::Shutdown;
