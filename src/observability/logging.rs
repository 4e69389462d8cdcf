//! Diagnostic logging setup.
//!
//! # Responsibilities
//! - Initialize the `tracing` subscriber for the binary
//! - Pick the filter from `RUST_LOG`, falling back to the configured level
//!
//! Access records do not go through here; they are written to the access
//! log sink directly.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::schema::ObservabilityConfig;

/// Default directives for a configured level.
fn default_directives(level: &str) -> String {
    format!("request_logger={level},tower_http={level}")
}

/// Install the global subscriber. Call once at startup.
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_directives(&config.log_level).into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_cover_crate_and_middleware() {
        let directives = default_directives("debug");
        assert_eq!(directives, "request_logger=debug,tower_http=debug");
        assert!(directives.parse::<EnvFilter>().is_ok());
    }
}
