//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Request handling produces:
//!     → access_log (one fixed-format record per request)
//!     → logging.rs (tracing events for diagnostics, to stderr)
//! ```

pub mod logging;

pub use logging::init_tracing;
