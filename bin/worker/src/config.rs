//! Centralized worker configuration.
//!
//! Loaded via the `config` crate from `MIXTAPE__`-prefixed environment
//! variables, with `__` separating nested keys (for example
//! `MIXTAPE__CONTENT_API__BASE_URL`).

use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Deserialize)]
pub struct WorkerConfig {
    /// External content API connection.
    pub content_api: ContentApiConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub status: StatusConfig,

    /// JSON file holding an array of jobs to load at startup.
    #[serde(default)]
    pub jobs_file: Option<PathBuf>,
}

/// External content API connection.
#[derive(Clone, Deserialize)]
pub struct ContentApiConfig {
    /// Base URL that API paths are joined onto.
    pub base_url: String,

    /// Bearer token sent with every request.
    pub access_token: String,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl ContentApiConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl fmt::Debug for ContentApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentApiConfig")
            .field("base_url", &self.base_url)
            .field("access_token", &"[REDACTED]")
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

fn default_timeout_seconds() -> u64 {
    10
}

/// Worker agent pool.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Number of worker agents.
    #[serde(default = "default_pool_size")]
    pub size: usize,

    /// Identifier of this host; agents register as `{device_id}-{n}`.
    #[serde(default = "default_device_id")]
    pub device_id: String,

    /// Workers silent for longer than this are marked offline.
    #[serde(default = "default_stale_after_seconds")]
    pub stale_after_seconds: u64,
}

fn default_pool_size() -> usize {
    4
}

fn default_device_id() -> String {
    "mixtape-worker".to_string()
}

fn default_stale_after_seconds() -> u64 {
    120
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            device_id: default_device_id(),
            stale_after_seconds: default_stale_after_seconds(),
        }
    }
}

/// Execution engine tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// Maximum number of nodes of one run executing at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_max_concurrency() -> usize {
    4
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Interval between due-job checks, in seconds.
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
}

fn default_tick_seconds() -> u64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_tick_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusConfig {
    /// How long status reads may be served from cache, in seconds.
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,

    /// Interval between status snapshots, in seconds.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
}

fn default_cache_ttl_seconds() -> u64 {
    15
}

fn default_interval_seconds() -> u64 {
    60
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: default_cache_ttl_seconds(),
            interval_seconds: default_interval_seconds(),
        }
    }
}

impl WorkerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_config(
            config::Config::builder()
                .add_source(
                    config::Environment::with_prefix("MIXTAPE")
                        .prefix_separator("__")
                        .separator("__")
                        .try_parsing(true),
                )
                .build()?,
        )
    }

    /// Deserializes an already-built configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if required keys are missing or mistyped.
    pub fn from_config(config: config::Config) -> Result<Self, config::ConfigError> {
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required() -> config::ConfigBuilder<config::builder::DefaultState> {
        config::Config::builder()
            .set_override("content_api.base_url", "https://api.example.com/v1")
            .expect("override")
            .set_override("content_api.access_token", "secret-token")
            .expect("override")
    }

    #[test]
    fn defaults_fill_optional_sections() {
        let config = WorkerConfig::from_config(required().build().expect("build")).expect("config");
        assert_eq!(config.content_api.timeout_seconds, 10);
        assert_eq!(config.pool.size, 4);
        assert_eq!(config.pool.stale_after_seconds, 120);
        assert_eq!(config.engine.max_concurrency, 4);
        assert_eq!(config.scheduler.tick_seconds, 30);
        assert_eq!(config.status.cache_ttl_seconds, 15);
        assert_eq!(config.status.interval_seconds, 60);
        assert!(config.jobs_file.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let built = required()
            .set_override("pool.size", 2_i64)
            .expect("override")
            .set_override("scheduler.tick_seconds", 5_i64)
            .expect("override")
            .set_override("jobs_file", "/etc/mixtape/jobs.json")
            .expect("override")
            .build()
            .expect("build");
        let config = WorkerConfig::from_config(built).expect("config");
        assert_eq!(config.pool.size, 2);
        assert_eq!(config.scheduler.tick_seconds, 5);
        assert_eq!(config.jobs_file, Some(PathBuf::from("/etc/mixtape/jobs.json")));
    }

    #[test]
    fn missing_content_api_is_an_error() {
        let built = config::Config::builder().build().expect("build");
        assert!(WorkerConfig::from_config(built).is_err());
    }

    #[test]
    fn debug_redacts_access_token() {
        let config = WorkerConfig::from_config(required().build().expect("build")).expect("config");
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("api.example.com"));
    }
}
