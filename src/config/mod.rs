//! Configuration management.
//!
//! Configuration is layered: defaults, then an optional TOML file, then
//! environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Type | Default | Description |
//! |----------|------|---------|-------------|
//! | `SEENSTORE_CONFIG_PATH` | path | - | Config file to load |
//! | `SEENSTORE_REPLICATION_ENABLED` | bool | `false` | Run the store in shared mode |
//! | `SEENSTORE_CHANNEL_CAPACITY` | usize | `10` | Replication channel slots |
//! | `SEENSTORE_RATE_LIMIT_PERMITS` | u32 | `5` | Hits per key per window |
//! | `SEENSTORE_RATE_LIMIT_WINDOW_SECS` | u64 | `5` | Window width |
//! | `SEENSTORE_HASH_CAPACITY` | usize | `1000000` | Exact hashes retained |
//! | `SEENSTORE_LOG_FORMAT` | string | `pretty` | `pretty` or `json` |
//! | `SEENSTORE_LOG_FILE` | path | - | Append logs to a file |
//! | `SEENSTORE_METRICS_ENABLED` | bool | `false` | Install Prometheus exporter |
//! | `SEENSTORE_METRICS_PORT` | u16 | `9090` | Exporter listen port |
//!
//! # Example File
//!
//! ```toml
//! hash_capacity = 500000
//!
//! [replication]
//! enabled = true
//! channel_capacity = 32
//!
//! [rate_limit]
//! permits = 10
//! window_secs = 5
//!
//! [observability.logging]
//! format = "json"
//!
//! [observability.metrics]
//! enabled = true
//! port = 9100
//! ```

use crate::store::RateLimitConfig;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default replication channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10;

/// Default number of exact hashes retained.
pub const DEFAULT_HASH_CAPACITY: usize = 1_000_000;

/// Main configuration for seenstore.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Replication settings.
    pub replication: ReplicationConfig,
    /// Rate limiter parameters.
    pub rate_limit: RateLimitConfig,
    /// Maximum exact hashes retained before LRU eviction.
    pub hash_capacity: usize,
    /// Logging and metrics settings.
    pub observability: ObservabilitySettings,
}

/// Replication settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationConfig {
    /// Whether the store publishes to and consumes from peers.
    pub enabled: bool,
    /// Slots in each of the inbound and outbound channels.
    pub channel_capacity: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Observability settings as read from the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObservabilitySettings {
    /// Logging settings.
    pub logging: Option<LoggingSettings>,
    /// Metrics settings.
    pub metrics: Option<MetricsSettings>,
}

/// Logging settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingSettings {
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// Filter directive, e.g. `info` or `seenstore=debug`.
    pub level: Option<String>,
    /// Log file path (stderr when unset).
    pub file: Option<String>,
}

/// Metrics settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsSettings {
    /// Whether to install the Prometheus exporter.
    pub enabled: Option<bool>,
    /// Listen port for the exporter.
    pub port: Option<u16>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Hash capacity.
    pub hash_capacity: Option<usize>,
    /// Replication section.
    pub replication: Option<ConfigFileReplication>,
    /// Rate limit section.
    pub rate_limit: Option<ConfigFileRateLimit>,
    /// Observability section.
    pub observability: Option<ObservabilitySettings>,
}

/// Replication section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileReplication {
    /// Enable replication.
    pub enabled: Option<bool>,
    /// Channel capacity.
    pub channel_capacity: Option<usize>,
}

/// Rate limit section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileRateLimit {
    /// Permits per window.
    pub permits: Option<u32>,
    /// Window width in seconds.
    pub window_secs: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            replication: ReplicationConfig::default(),
            rate_limit: RateLimitConfig::default(),
            hash_capacity: DEFAULT_HASH_CAPACITY,
            observability: ObservabilitySettings::default(),
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path and applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;

        let file: ConfigFile = toml::from_str(&contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;

        Ok(Self::from_config_file(file).with_env_overrides())
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the following paths in order:
    /// 1. `SEENSTORE_CONFIG_PATH`
    /// 2. Platform-specific config dir (`seenstore/config.toml`)
    /// 3. `~/.config/seenstore/config.toml`
    ///
    /// Falls back to defaults (with environment overrides) if no file is found.
    ///
    /// # Errors
    ///
    /// Returns an error only if `SEENSTORE_CONFIG_PATH` names a file that
    /// cannot be loaded.
    pub fn load_default() -> Result<Self> {
        if let Ok(path) = std::env::var("SEENSTORE_CONFIG_PATH")
            && !path.trim().is_empty()
        {
            return Self::load_from_file(Path::new(path.trim()));
        }

        for candidate in default_paths() {
            if candidate.exists() {
                match Self::load_from_file(&candidate) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!(
                            path = %candidate.display(),
                            error = %e,
                            "Ignoring unreadable config file"
                        );
                    },
                }
            }
        }

        Ok(Self::default().with_env_overrides())
    }

    /// Converts a `ConfigFile` to `StoreConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(capacity) = file.hash_capacity {
            config = config.with_hash_capacity(capacity);
        }
        if let Some(replication) = file.replication {
            if let Some(enabled) = replication.enabled {
                config.replication.enabled = enabled;
            }
            if let Some(capacity) = replication.channel_capacity {
                config = config.with_channel_capacity(capacity);
            }
        }
        if let Some(rate_limit) = file.rate_limit {
            if let Some(permits) = rate_limit.permits {
                config.rate_limit = config.rate_limit.with_permits(permits);
            }
            if let Some(secs) = rate_limit.window_secs {
                config.rate_limit = config.rate_limit.with_window(Duration::from_secs(secs));
            }
        }
        if let Some(observability) = file.observability {
            config.observability = observability;
        }

        config
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(enabled) = parse_bool_env("SEENSTORE_REPLICATION_ENABLED") {
            self.replication.enabled = enabled;
        }
        if let Some(capacity) = parse_env::<usize>("SEENSTORE_CHANNEL_CAPACITY") {
            self = self.with_channel_capacity(capacity);
        }
        if let Some(permits) = parse_env::<u32>("SEENSTORE_RATE_LIMIT_PERMITS") {
            self.rate_limit = self.rate_limit.with_permits(permits);
        }
        if let Some(secs) = parse_env::<u64>("SEENSTORE_RATE_LIMIT_WINDOW_SECS") {
            self.rate_limit = self.rate_limit.with_window(Duration::from_secs(secs));
        }
        if let Some(capacity) = parse_env::<usize>("SEENSTORE_HASH_CAPACITY") {
            self = self.with_hash_capacity(capacity);
        }

        if let Ok(format) = std::env::var("SEENSTORE_LOG_FORMAT") {
            self.observability
                .logging
                .get_or_insert_with(LoggingSettings::default)
                .format = Some(format);
        }
        if let Ok(file) = std::env::var("SEENSTORE_LOG_FILE")
            && !file.trim().is_empty()
        {
            self.observability
                .logging
                .get_or_insert_with(LoggingSettings::default)
                .file = Some(file);
        }
        if let Some(enabled) = parse_bool_env("SEENSTORE_METRICS_ENABLED") {
            self.observability
                .metrics
                .get_or_insert_with(MetricsSettings::default)
                .enabled = Some(enabled);
        }
        if let Some(port) = parse_env::<u16>("SEENSTORE_METRICS_PORT") {
            self.observability
                .metrics
                .get_or_insert_with(MetricsSettings::default)
                .port = Some(port);
        }
        self
    }

    /// Sets whether replication is enabled.
    #[must_use]
    pub const fn with_replication(mut self, enabled: bool) -> Self {
        self.replication.enabled = enabled;
        self
    }

    /// Sets the replication channel capacity (minimum 1).
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.replication.channel_capacity = capacity.max(1);
        self
    }

    /// Sets the rate limiter parameters.
    #[must_use]
    pub const fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Sets the exact-hash capacity (minimum 1).
    #[must_use]
    pub fn with_hash_capacity(mut self, capacity: usize) -> Self {
        self.hash_capacity = capacity.max(1);
        self
    }
}

/// Candidate config file locations, most specific first.
fn default_paths() -> Vec<PathBuf> {
    let Some(base_dirs) = directories::BaseDirs::new() else {
        return Vec::new();
    };
    vec![
        base_dirs.config_dir().join("seenstore").join("config.toml"),
        base_dirs
            .home_dir()
            .join(".config")
            .join("seenstore")
            .join("config.toml"),
    ]
}

fn parse_bool_env(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|value| {
        let value = value.trim().to_lowercase();
        value == "true" || value == "1" || value == "yes"
    })
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
}
