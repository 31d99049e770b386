//! Startup orchestration.
//!
//! ```text
//! config file → CLI overrides → validation → logging + metrics → Server::new → run
//! ```

use std::path::PathBuf;

use crate::config::{validation::validate_config, ConfigError, Environment, ServerConfig};
use crate::observability::{logging, metrics};

/// Command-line values that override the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub environment: Option<Environment>,
    pub project_root: Option<PathBuf>,
}

pub fn apply_overrides(mut config: ServerConfig, overrides: &Overrides) -> Result<ServerConfig, ConfigError> {
    if let Some(env) = overrides.environment {
        config.server.environment = env;
    }
    if let Some(root) = &overrides.project_root {
        config.server.project_root = root.clone();
    }
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Install the log subscriber and, when enabled, the metrics exporter.
pub fn init_observability(config: &ServerConfig) {
    logging::init_logging(&config.observability);

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_values_win() {
        let overrides = Overrides {
            environment: Some(Environment::Staging),
            project_root: Some(PathBuf::from("/srv/sites")),
        };
        let config = apply_overrides(ServerConfig::default(), &overrides).unwrap();
        assert_eq!(config.server.environment, Environment::Staging);
        assert_eq!(config.server.project_root, PathBuf::from("/srv/sites"));
    }
}
