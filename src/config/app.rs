//! Agent configuration structures.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::validation::{ConfigError, expand_env_vars, normalize_mount_path};

// =============================================================================
// Constants
// =============================================================================

/// Default collection interval in seconds.
pub const DEFAULT_COLLECT_INTERVAL_SECS: u64 = 1;

/// Longest accepted collection interval (one day).
pub const MAX_COLLECT_INTERVAL_SECS: u64 = 86_400;

/// Default sink HTTP timeout (10 seconds).
pub const DEFAULT_SINK_TIMEOUT: Duration = Duration::from_secs(10);

fn default_sink_timeout() -> Duration {
    DEFAULT_SINK_TIMEOUT
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Sink Configuration
// =============================================================================

/// InfluxDB connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Base URL (default: "http://localhost:8086").
    pub url: String,

    /// Target database (default: "system_stats").
    pub database: String,

    /// Basic-auth user; supports `${VAR}` expansion.
    pub username: Option<String>,

    /// Basic-auth password; supports `${VAR}` expansion.
    pub password: Option<String>,

    /// Per-request timeout (default: "10s").
    #[serde(default = "default_sink_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".to_string(),
            database: "system_stats".to_string(),
            username: Some("root".to_string()),
            password: Some("root".to_string()),
            timeout: DEFAULT_SINK_TIMEOUT,
        }
    }
}

// =============================================================================
// Provider Configuration
// =============================================================================

/// Disk usage provider settings.
///
/// An empty `paths` list disables the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    pub enabled: bool,

    /// Mount points to report (default: `["/"]`).
    pub paths: Vec<String>,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            paths: vec!["/".to_string()],
        }
    }
}

/// Which built-in providers run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_true")]
    pub cpu: bool,
    #[serde(default = "default_true")]
    pub memory: bool,
    #[serde(default)]
    pub disk: DiskConfig,
    #[serde(default = "default_true")]
    pub diskio: bool,
    #[serde(default = "default_true")]
    pub network: bool,
    #[serde(default = "default_true")]
    pub load: bool,
    #[serde(default = "default_true")]
    pub sensors: bool,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            cpu: true,
            memory: true,
            disk: DiskConfig::default(),
            diskio: true,
            network: true,
            load: true,
            sensors: true,
        }
    }
}

// =============================================================================
// Agent Configuration
// =============================================================================

/// Top-level agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Seconds between cycles (default: 1, at most one day).
    pub collect_interval: u64,

    /// Consecutive failing cycles or writes before exiting; 0 disables.
    pub max_consecutive_errors: u32,

    /// Print batches to stdout instead of writing to the sink.
    pub dry_run: bool,

    /// File receiving the process id while running.
    pub pidfile: Option<PathBuf>,

    pub sink: SinkConfig,

    pub providers: ProvidersConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            collect_interval: DEFAULT_COLLECT_INTERVAL_SECS,
            max_consecutive_errors: 0,
            dry_run: false,
            pidfile: None,
            sink: SinkConfig::default(),
            providers: ProvidersConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from a YAML file.
    ///
    /// Credentials are env-expanded and disk paths normalised before
    /// validation.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::read(path)?.finalize()
    }

    /// Parse a YAML file without validating it, so overrides can be applied
    /// before [`AgentConfig::finalize`].
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Expand credentials, normalise disk paths and validate.
    pub fn finalize(mut self) -> Result<Self, ConfigError> {
        self.sink.username = self.sink.username.as_deref().map(expand_env_vars);
        self.sink.password = self.sink.password.as_deref().map(expand_env_vars);
        self.providers.disk.paths = self
            .providers
            .disk
            .paths
            .iter()
            .map(|p| normalize_mount_path(p))
            .collect::<Result<_, _>>()?;
        self.validate()?;
        Ok(self)
    }

    /// The collection interval as a duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.collect_interval)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collect_interval == 0 {
            return Err(ConfigError::ValidationError(
                "collect_interval must be a positive number of seconds".to_string(),
            ));
        }

        if self.collect_interval > MAX_COLLECT_INTERVAL_SECS {
            return Err(ConfigError::ValidationError(format!(
                "collect_interval must be at most {MAX_COLLECT_INTERVAL_SECS} seconds"
            )));
        }

        if !self.dry_run {
            if self.sink.database.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "sink database must not be empty".to_string(),
                ));
            }
            if self.sink.url.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "sink url must not be empty".to_string(),
                ));
            }
        }

        if self.sink.timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "sink timeout must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
