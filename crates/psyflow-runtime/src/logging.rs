//! Logging setup for binaries and test harnesses embedding a session.
//! Library crates only emit `tracing` events and never install a subscriber.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use psyflow_core::{ConfigurationError, FlowResult};

use crate::LoggingConfig;

/// Filter from `RUST_LOG` when set, else from the configured level
pub fn filter(config: &LoggingConfig) -> FlowResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            ConfigurationError::InvalidConfig(format!("log level '{}': {}", config.level, e)).into()
        }),
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(config: &LoggingConfig) -> FlowResult<()> {
    let filter = filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    result.map_err(|e| ConfigurationError::InvalidConfig(format!("logging: {}", e)).into())
}
