//! Configuration management.
//!
//! Values come from an optional file plus `REPLOG__*` environment variables,
//! e.g. `REPLOG__SNAPSHOT__MAX_PARALLEL_BUILDS=8`. Durations use humantime
//! notation (`"7days"`, `"15m"`).

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ReplogError, Result};
use crate::telemetry::LoggingConfig;

const ENV_PREFIX: &str = "REPLOG";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Event log configuration
    #[serde(default)]
    pub replication_log: ReplicationLogConfig,

    /// Redis configuration (used when the log backend is `redis`)
    #[serde(default)]
    pub redis: RedisConfig,

    /// Snapshot service configuration
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Blob storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Leader election configuration
    #[serde(default)]
    pub leader: LeaderConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which event log implementation backs the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogBackendKind {
    /// Process-local, no TTL
    #[default]
    Memory,
    /// TTL-partitioned Redis keyspace
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplicationLogConfig {
    /// Backend selection
    #[serde(default)]
    pub backend: LogBackendKind,

    /// How long events stay readable
    #[serde(default = "default_retention", with = "humantime_serde")]
    pub retention: Duration,

    /// Hard outer bound on bucket discovery, independent of `retention`
    #[serde(default = "default_max_discovery_window", with = "humantime_serde")]
    pub max_discovery_window: Duration,

    /// Events fetched per backend round trip
    #[serde(default = "default_read_page_size")]
    pub read_page_size: usize,
}

impl Default for ReplicationLogConfig {
    fn default() -> Self {
        Self {
            backend: LogBackendKind::default(),
            retention: default_retention(),
            max_discovery_window: default_max_discovery_window(),
            read_page_size: default_read_page_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Prefix applied to every key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotConfig {
    /// Run the periodic snapshot service
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Period between service cycles
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// A namespace whose latest snapshot is younger than this is skipped
    #[serde(default = "default_refresh_interval", with = "humantime_serde")]
    pub refresh_interval: Duration,

    /// Registered snapshots kept per namespace
    #[serde(default = "default_max_snapshots")]
    pub max_snapshots_per_namespace: usize,

    /// Namespaces built concurrently
    #[serde(default = "default_max_parallel_builds")]
    pub max_parallel_builds: usize,

    /// Blob namespace that receives snapshot blobs
    #[serde(default = "default_storage_namespace")]
    pub storage_namespace: String,

    /// Directory for scratch files; the OS temp dir when unset
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: default_poll_interval(),
            refresh_interval: default_refresh_interval(),
            max_snapshots_per_namespace: default_max_snapshots(),
            max_parallel_builds: default_max_parallel_builds(),
            storage_namespace: default_storage_namespace(),
            scratch_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the filesystem blob store
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeaderConfig {
    /// Whether this instance runs cluster-wide work
    #[serde(default)]
    pub is_leader: bool,
}

// Default value functions
fn default_true() -> bool { true }
fn default_retention() -> Duration { Duration::from_secs(7 * 24 * 3600) }
fn default_max_discovery_window() -> Duration { Duration::from_secs(14 * 24 * 3600) }
fn default_read_page_size() -> usize { 1000 }
fn default_redis_url() -> String { "redis://localhost:6379".to_string() }
fn default_key_prefix() -> String { "replog:".to_string() }
fn default_poll_interval() -> Duration { Duration::from_secs(15 * 60) }
fn default_refresh_interval() -> Duration { Duration::from_secs(24 * 3600) }
fn default_max_snapshots() -> usize { 10 }
fn default_max_parallel_builds() -> usize { 4 }
fn default_storage_namespace() -> String { "replication-snapshots".to_string() }
fn default_storage_root() -> PathBuf { PathBuf::from("./data/blobs") }

impl Config {
    /// Load configuration from the environment only.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would stall or disable the engine silently.
    pub fn validate(&self) -> Result<()> {
        let log = &self.replication_log;
        let snapshot = &self.snapshot;

        if log.retention.is_zero() {
            return Err(ReplogError::configuration("replication_log.retention must be positive"));
        }
        if log.max_discovery_window.is_zero() {
            return Err(ReplogError::configuration(
                "replication_log.max_discovery_window must be positive",
            ));
        }
        if log.read_page_size == 0 {
            return Err(ReplogError::configuration("replication_log.read_page_size must be positive"));
        }
        if snapshot.poll_interval.is_zero() || snapshot.refresh_interval.is_zero() {
            return Err(ReplogError::configuration("snapshot intervals must be positive"));
        }
        if snapshot.max_snapshots_per_namespace == 0 {
            return Err(ReplogError::configuration(
                "snapshot.max_snapshots_per_namespace must be positive",
            ));
        }
        if snapshot.max_parallel_builds == 0 {
            return Err(ReplogError::configuration("snapshot.max_parallel_builds must be positive"));
        }
        if snapshot.storage_namespace.is_empty() {
            return Err(ReplogError::configuration("snapshot.storage_namespace must not be empty"));
        }
        Ok(())
    }
}
