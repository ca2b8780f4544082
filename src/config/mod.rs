//! Application configuration.
//!
//! Loaded from a YAML file and overridable through `KGNODE__`-prefixed
//! environment variables.

use std::time::Duration;

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "KGNODE_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "KGNODE";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "KGNODE_LOG";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Executor tuning.
    pub executor: ExecutorSettings,
    /// Telemetry reporting (optional).
    pub telemetry: TelemetryConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path, or `:memory:` for an in-memory database.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "data/kgnode.db".to_string(),
        }
    }
}

/// Executor tuning knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Scheduling tick interval in milliseconds.
    pub tick_interval_ms: u64,
    /// Maximum number of commands executing concurrently.
    pub parallelism: usize,
    /// Reschedule period in milliseconds for records with no explicit period.
    pub default_period_ms: u64,
    /// Initial delay in milliseconds before permanent commands first run.
    pub permanent_delay_ms: u64,
    /// Hours to keep finalized command records before cleanup.
    pub command_retention_hours: u64,
    /// Hours to keep finalized operation records before cleanup.
    pub operation_retention_hours: u64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            parallelism: 4,
            default_period_ms: 5_000,
            permanent_delay_ms: 60_000,
            command_retention_hours: 96,
            operation_retention_hours: 24,
        }
    }
}

impl ExecutorSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn default_period(&self) -> Duration {
        Duration::from_millis(self.default_period_ms)
    }

    pub fn permanent_delay(&self) -> Duration {
        Duration::from_millis(self.permanent_delay_ms)
    }

    pub fn command_retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.command_retention_hours as i64)
    }

    pub fn operation_retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.operation_retention_hours as i64)
    }
}

/// Telemetry reporting configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Endpoint to POST usage reports to. Disabled when unset.
    pub endpoint: Option<String>,
    /// Reporting period in minutes.
    pub period_minutes: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            period_minutes: 15,
        }
    }
}

impl TelemetryConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_minutes * 60)
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `KGNODE_CONFIG` environment variable (if set)
    /// 4. Environment variables with `KGNODE` prefix
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Create config for testing: in-memory storage and a fast tick.
    pub fn for_test() -> Self {
        Self {
            storage: StorageConfig {
                path: ":memory:".to_string(),
            },
            executor: ExecutorSettings {
                tick_interval_ms: 20,
                default_period_ms: 40,
                permanent_delay_ms: 0,
                ..ExecutorSettings::default()
            },
            telemetry: TelemetryConfig::default(),
        }
    }
}
