//! Configuration module for the metronome agent.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Cadence settings (collection interval, error threshold, dry run)
//! - Sink settings (InfluxDB url, database, credentials, timeout)
//! - Built-in provider selection (disk mount paths)

mod app;
mod validation;

pub use app::{AgentConfig, DiskConfig, ProvidersConfig, SinkConfig};
pub use validation::{ConfigError, expand_env_vars, normalize_mount_path};

pub use app::{DEFAULT_COLLECT_INTERVAL_SECS, DEFAULT_SINK_TIMEOUT, MAX_COLLECT_INTERVAL_SECS};
