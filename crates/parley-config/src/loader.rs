//! Configuration loader with layered sources.

use crate::{AppConfig, TtlConfig};
use config::{Config, ConfigError, Environment, File};
use parley_core::ParleyError;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Environment variable prefix for overrides, e.g. `PARLEY_REDIS__URL`.
pub const ENV_PREFIX: &str = "PARLEY";

/// Configuration loader with runtime reload support.
#[derive(Clone)]
pub struct ConfigLoader {
    config: Arc<RwLock<AppConfig>>,
    config_dir: String,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. `{dir}/default.toml` - Default values
    /// 2. `{dir}/{environment}.toml` - Environment-specific overrides
    /// 3. `{dir}/local.toml` - Uncommitted local overrides
    /// 4. Environment variables with `PARLEY_` prefix and `__` separator
    pub fn new(config_dir: impl Into<String>) -> Result<Self, ParleyError> {
        let config_dir = config_dir.into();
        let config = Self::load_config(&config_dir)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_dir,
        })
    }

    /// Loads configuration from the default location (`./config`).
    pub fn from_default_location() -> Result<Self, ParleyError> {
        Self::new("./config")
    }

    /// Returns the current configuration.
    pub async fn get(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// Reloads the configuration from disk.
    ///
    /// Components built from the previous snapshot keep it; TTLs are fixed
    /// for the lifetime of a gateway.
    pub async fn reload(&self) -> Result<(), ParleyError> {
        let new_config = Self::load_config(&self.config_dir)?;
        let mut config = self.config.write().await;
        *config = new_config;
        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Loads configuration from the specified directory.
    fn load_config(config_dir: &str) -> Result<AppConfig, ParleyError> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let environment =
            std::env::var("PARLEY_ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        info!("Loading configuration for environment: {}", environment);

        let mut builder = Config::builder();

        for name in ["default", environment.as_str(), "local"] {
            let path = format!("{}/{}.toml", config_dir, name);
            if Path::new(&path).exists() {
                debug!("Loading config from: {}", path);
                builder = builder.add_source(File::with_name(&path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().map_err(config_error_to_parley_error)?;

        let app_config: AppConfig = config
            .try_deserialize()
            .map_err(config_error_to_parley_error)?;

        Self::validate_config(&app_config)?;

        Ok(app_config)
    }

    /// Validates the configuration.
    pub fn validate_config(config: &AppConfig) -> Result<(), ParleyError> {
        if config.redis.enabled {
            let url = url::Url::parse(&config.redis.url).map_err(|e| {
                ParleyError::Configuration(format!("Invalid Redis URL '{}': {}", config.redis.url, e))
            })?;
            if !matches!(url.scheme(), "redis" | "rediss" | "redis+unix" | "unix") {
                return Err(ParleyError::Configuration(format!(
                    "Unsupported Redis URL scheme: {}",
                    url.scheme()
                )));
            }
            if config.redis.pool_size == 0 {
                return Err(ParleyError::Configuration(
                    "Redis pool size must be greater than zero".to_string(),
                ));
            }
            if config.redis.operation_timeout_ms == 0 {
                return Err(ParleyError::Configuration(
                    "Redis operation timeout must be greater than zero".to_string(),
                ));
            }
        }

        for (name, secs) in config.cache.ttl.entries() {
            if secs == 0 {
                return Err(ParleyError::Configuration(format!(
                    "cache.ttl.{} must be greater than zero",
                    name
                )));
            }
        }

        if config.cache.ttl.realtime_secs > TtlConfig::MAX_REALTIME_SECS {
            warn!(
                "cache.ttl.realtime_secs is {}s; unread counters and presence may lag by that long",
                config.cache.ttl.realtime_secs
            );
        }

        if config.availability.failure_threshold == 0 {
            return Err(ParleyError::Configuration(
                "availability.failure_threshold must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Gets a specific configuration value by key path.
    pub async fn get_value<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let config = self.config.read().await;
        let json = serde_json::to_value(&*config).ok()?;

        let mut current = &json;
        for part in key.split('.') {
            current = current.get(part)?;
        }

        serde_json::from_value(current.clone()).ok()
    }
}

fn config_error_to_parley_error(err: ConfigError) -> ParleyError {
    ParleyError::Configuration(err.to_string())
}
