//! Tracing subscriber setup

use crate::config::MonitoringConfig;
use crate::errors::{ConfigurationError, StakeResult};
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins over the configured level when set
pub fn env_filter(config: &MonitoringConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(config: &MonitoringConfig) -> StakeResult<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_target(false);

    let result = if config.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| ConfigurationError::LoadFailed(format!("tracing subscriber: {}", e)).into())
}
