//! # Observability
//!
//! Structured logging setup for the operator using the tracing ecosystem.
//! The subscriber is installed once at startup; every component logs through
//! the ambient `tracing` dispatcher instead of a package-level logger.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;
use crate::errors::{Error, Result};

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured default level. JSON output
/// is the default so log lines stay machine-readable in cluster log pipelines;
/// `SEALKEEPER_LOG_PLAIN=true` switches to the human-readable format for
/// development.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| Error::config(format!("Invalid log filter: {}", e)))?;

    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json().with_current_span(false)).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.map_err(|e| Error::internal(format!("Failed to install tracing subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_tracing_rejects_bad_filter() {
        let config = ObservabilityConfig {
            log_level: "not=a=filter=at-all".to_string(),
            json_logs: false,
        };
        assert!(init_tracing(&config).is_err());
    }
}
