//! Configuration loading from a file or a command-line backend list.

use crate::config::{validate_config, BackendConfig, Config};
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;
use url::Url;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("invalid backend url '{0}': {1}")]
    InvalidBackend(String, url::ParseError),

    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a YAML file.
///
/// This function reads the file, parses the YAML, and validates the configuration.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;

    validate_config(&config).map_err(ConfigError::ValidationError)?;

    Ok(config)
}

impl Config {
    /// Build a configuration from a comma-separated backend list.
    ///
    /// Listens on every interface at `port`; every other setting keeps its
    /// default. Blank entries are skipped.
    pub fn from_backend_list(list: &str, port: u16) -> Result<Self, ConfigError> {
        let backends = list
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                Url::parse(entry)
                    .map(|url| BackendConfig { url })
                    .map_err(|e| ConfigError::InvalidBackend(entry.to_string(), e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Start from the file defaults so both modes agree.
        let mut config: Config = serde_yaml::from_str("{}")?;
        config.listen = SocketAddr::from(([0, 0, 0, 0], port));
        config.backends = backends;

        validate_config(&config).map_err(ConfigError::ValidationError)?;

        Ok(config)
    }
}
