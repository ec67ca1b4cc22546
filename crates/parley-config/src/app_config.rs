//! Application configuration structures.

use parley_core::telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration of the cache layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name and metadata.
    #[serde(default)]
    pub app: AppMetadata,

    /// Redis connection settings.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Cache policy (TTLs).
    #[serde(default)]
    pub cache: CacheConfig,

    /// Availability guard settings.
    #[serde(default)]
    pub availability: AvailabilitySettings,

    /// Invalidation retry settings.
    #[serde(default)]
    pub invalidation: InvalidationConfig,

    /// Logging and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppMetadata {
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
    /// Environment (development, staging, production).
    pub environment: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "parley".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Redis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis URL.
    pub url: String,
    /// Maximum pooled connections.
    pub pool_size: usize,
    /// Enable the cache tier. When disabled every read goes to the store.
    pub enabled: bool,
    /// How long to wait for a pooled connection, in milliseconds.
    pub pool_wait_timeout_ms: u64,
    /// Per-operation timeout, in milliseconds.
    pub operation_timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 20,
            enabled: true,
            pool_wait_timeout_ms: 200,
            operation_timeout_ms: 250,
        }
    }
}

impl RedisConfig {
    /// Returns the pool wait timeout as a Duration.
    #[must_use]
    pub const fn pool_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_wait_timeout_ms)
    }

    /// Returns the per-operation timeout as a Duration.
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Cache policy configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Time-to-live per entity class.
    #[serde(default)]
    pub ttl: TtlConfig,
}

/// TTL per entity class, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
    /// User profile and user lookups by username/email.
    pub user_secs: u64,
    /// Single messages.
    pub message_secs: u64,
    /// Conversation pages and conversation partner lists.
    pub conversation_secs: u64,
    /// Unread counters and presence.
    pub realtime_secs: u64,
    /// Everything else.
    pub default_secs: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            user_secs: 1800,
            message_secs: 300,
            conversation_secs: 600,
            realtime_secs: 60,
            default_secs: 3600,
        }
    }
}

impl TtlConfig {
    /// Upper bound for the realtime class.
    pub const MAX_REALTIME_SECS: u64 = 60;

    /// Returns all configured values with their names.
    #[must_use]
    pub fn entries(&self) -> [(&'static str, u64); 5] {
        [
            ("user_secs", self.user_secs),
            ("message_secs", self.message_secs),
            ("conversation_secs", self.conversation_secs),
            ("realtime_secs", self.realtime_secs),
            ("default_secs", self.default_secs),
        ]
    }
}

/// Availability guard settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AvailabilitySettings {
    /// Consecutive failures before the cache tier is considered down.
    pub failure_threshold: u64,
    /// Background probe interval, in milliseconds.
    pub probe_interval_ms: u64,
    /// Probe timeout, in milliseconds.
    pub probe_timeout_ms: u64,
}

impl Default for AvailabilitySettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            probe_interval_ms: 5000,
            probe_timeout_ms: 500,
        }
    }
}

impl AvailabilitySettings {
    /// Returns the probe interval as a Duration.
    #[must_use]
    pub const fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    /// Returns the probe timeout as a Duration.
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Invalidation retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InvalidationConfig {
    /// Retry failed deletes on a background task.
    pub background_retry: bool,
    /// Attempts per background retry, including the first.
    pub retry_max_attempts: u32,
    /// First retry delay, in milliseconds.
    pub retry_initial_delay_ms: u64,
    /// Longest retry delay, in milliseconds.
    pub retry_max_delay_ms: u64,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            background_retry: true,
            retry_max_attempts: 3,
            retry_initial_delay_ms: 50,
            retry_max_delay_ms: 2000,
        }
    }
}

impl InvalidationConfig {
    /// Returns the first retry delay as a Duration.
    #[must_use]
    pub const fn retry_initial_delay(&self) -> Duration {
        Duration::from_millis(self.retry_initial_delay_ms)
    }

    /// Returns the longest retry delay as a Duration.
    #[must_use]
    pub const fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing subscriber settings.
    #[serde(default)]
    pub tracing: TelemetryConfig,
    /// Emit `metrics` counters.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            tracing: TelemetryConfig::default(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}
