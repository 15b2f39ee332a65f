//! Configuration Loader
//!
//! Environment-aware configuration loading. Sources are layered in order of
//! increasing precedence:
//!
//! 1. `conductor.toml` in the configuration directory
//! 2. `conductor.<environment>.toml` in the same directory
//! 3. `CONDUCTOR__<SECTION>__<KEY>` environment variables
//!
//! Every file is optional; absent layers fall back to the section defaults.

use super::error::{ConfigResult, ConfigurationError};
use super::ConductorConfig;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const ENV_PREFIX: &str = "CONDUCTOR";
const BASE_FILE_NAME: &str = "conductor";

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: ConductorConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading conductor configuration"
        );

        let config = Self::build_layers(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = %environment,
            strategy = %config.ledger.strategy,
            strict_mode = config.gate.strict_mode,
            callback_ttl_ms = config.callbacks.ttl_ms,
            "⚙️ CONFIG: Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration, validating it first
    pub fn from_config(config: ConductorConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_directory: Self::default_config_directory(),
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    fn build_layers(directory: &Path, environment: &str) -> ConfigResult<ConductorConfig> {
        let base = directory.join(format!("{BASE_FILE_NAME}.toml"));
        let overlay = directory.join(format!("{BASE_FILE_NAME}.{environment}.toml"));

        let settings = config::Config::builder()
            .add_source(config::File::from(base.clone()).required(false))
            .add_source(config::File::from(overlay).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::load_error(base.display().to_string(), e))?;

        Ok(settings.try_deserialize::<ConductorConfig>()?)
    }

    /// Detect environment from environment variables
    pub fn detect_environment() -> String {
        env::var("CONDUCTOR_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn default_config_directory() -> PathBuf {
        env::var("CONDUCTOR_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }
}
