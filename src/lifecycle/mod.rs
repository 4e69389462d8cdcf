//! Process lifecycle management.
//!
//! # Data Flow
//! ```text
//! Ctrl+C ─▶ Shutdown::trigger ─▶ broadcast ─▶ HttpServer stops accepting,
//!                                             in-flight requests finish and log
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
