//! # Structured Logging
//!
//! Initializes the tracing subscriber. `RUST_LOG` overrides the CLI-provided
//! default level; JSON output is opt-in for log pipelines.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// Safe to call once per process; later calls are ignored so tests that race
/// on initialization do not panic.
pub fn init_logging(default_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let result = if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "tracing subscriber already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialization_does_not_panic() {
        init_logging("info", false);
        init_logging("debug", true);
    }
}
