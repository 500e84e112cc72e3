//! Replog Server - snapshot service host process.
//!
//! Opens the configured replication log and blob store and runs the
//! periodic snapshot service until interrupted.

use std::sync::Arc;

use anyhow::Context;

use replog_core::{
    clock::{Clock, SystemClock},
    config::{Config, LogBackendKind},
    leader::StaticLeaderElection,
    replication::{InMemoryLogConfig, InMemoryReplicationLog, RedisLogConfig, RedisReplicationLog, ReplicationLog},
    snapshot::{SnapshotBuilder, SnapshotBuilderConfig, SnapshotService, SnapshotServiceConfig},
    storage::FilesystemStore,
    telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::load().context("Invalid configuration")?;

    telemetry::init_logging(&config.logging)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Replog Server"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Open the replication log
    let log: Arc<dyn ReplicationLog> = match config.replication_log.backend {
        LogBackendKind::Memory => Arc::new(InMemoryReplicationLog::new(
            InMemoryLogConfig {
                max_snapshots_per_namespace: config.snapshot.max_snapshots_per_namespace,
            },
            clock.clone(),
        )),
        LogBackendKind::Redis => {
            Arc::new(RedisReplicationLog::connect(RedisLogConfig::from_config(&config), clock.clone()).await?)
        }
    };
    tracing::info!(backend = log.name(), "Replication log ready");

    // Blob and ref storage
    let store = Arc::new(FilesystemStore::new(config.storage.root.clone()));
    tracing::info!(root = %config.storage.root.display(), "Blob store ready");

    let leader = Arc::new(StaticLeaderElection::new(config.leader.is_leader));

    let builder = Arc::new(SnapshotBuilder::new(
        log.clone(),
        store.clone(),
        store,
        clock.clone(),
        SnapshotBuilderConfig::from_config(&config.snapshot)?,
    ));
    let service = Arc::new(SnapshotService::new(
        builder,
        log,
        leader,
        clock,
        SnapshotServiceConfig::from(&config.snapshot),
    ));

    let handle = service.start();

    shutdown_signal().await;

    handle.shutdown().await;
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
