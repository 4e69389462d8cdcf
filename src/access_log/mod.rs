//! Access log subsystem.
//!
//! # Data Flow
//! ```text
//! ObservingResponder::log_now
//!     → record.rs (format one line from RequestMeta + Outcome)
//!     → sink.rs (atomic append to stdout / stderr / file / memory)
//! ```

pub mod record;
pub mod sink;

pub use record::{format_record, quote, quote_bytes, remote_host, Outcome, RequestMeta, NO_RATIO};
pub use sink::{open_sink, LogSink, MemorySink, SharedLogSink, WriterSink};
