//! Process-wide `tracing` setup.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggerSection;
use crate::error::{Error, Result};

/// Builds the level filter; `RUST_LOG` wins over the configured level
pub fn env_filter(config: &LoggerSection) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|err| Error::config(format!("invalid log level {:?}: {err}", config.level))),
    }
}

/// Installs the global subscriber. Call once at startup.
pub fn init(config: &LoggerSection) -> Result<()> {
    let filter = env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    installed.map_err(|err| Error::config(format!("failed to install logger: {err}")))
}
