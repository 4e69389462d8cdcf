//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, ConnectInfo)
//!     → logger.rs (RequestLogger: one task + one access record per request)
//!     → responder.rs (ObservingResponder: status, byte counts, error path, hijack)
//!     → hyper_sink.rs (HyperSink: head + streamed body back to hyper)
//!     → Send to client
//! ```

pub mod handlers;
pub mod hyper_sink;
pub mod logger;
pub mod responder;
pub mod server;
pub mod sink;

pub use handlers::DemoHandler;
pub use hyper_sink::HyperSink;
pub use logger::{Handler, RequestLogger};
pub use responder::{root_cause, ObservingResponder};
pub use server::HttpServer;
pub use sink::{BufferedSink, Hijack, HijackError, ResponseSink};
