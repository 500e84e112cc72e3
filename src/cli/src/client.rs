//! Connection to a live replication log.

use anyhow::{Context, Result};
use std::sync::Arc;

use replog_core::clock::SystemClock;
use replog_core::config::Config;
use replog_core::replication::{RedisLogConfig, RedisReplicationLog};

/// Open the Redis replication log.
///
/// Retention and page size come from the regular `REPLOG` configuration so
/// bucket discovery matches the server's view; `url` and `key_prefix`
/// override it when given.
pub async fn connect(url: Option<String>, key_prefix: Option<String>) -> Result<RedisReplicationLog> {
    let config = Config::load().unwrap_or_default();
    let mut log_config = RedisLogConfig::from_config(&config);
    if let Some(url) = url {
        log_config.url = url;
    }
    if let Some(prefix) = key_prefix {
        log_config.key_prefix = prefix;
    }

    RedisReplicationLog::connect(log_config, Arc::new(SystemClock))
        .await
        .context("Failed to open the replication log")
}
