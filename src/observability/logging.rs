//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once per process
//! - Honour `RUST_LOG` over the configured level
//!
//! # Design Decisions
//! - JSON format for production, human format for development
//! - Initialization failure is returned, not panicked, so tests that
//!   initialise twice are harmless

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use super::ObservabilityError;
use crate::config::ObservabilityConfig;

/// Install the global subscriber.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), ObservabilityError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if config.json_logs {
        let json_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true);

        subscriber
            .with(json_layer)
            .try_init()
            .map_err(|e| ObservabilityError::Logging(e.to_string()))?;
    } else {
        let pretty_layer = fmt::layer().with_ansi(true).with_target(true);

        subscriber
            .with(pretty_layer)
            .try_init()
            .map_err(|e| ObservabilityError::Logging(e.to_string()))?;
    }

    Ok(())
}
