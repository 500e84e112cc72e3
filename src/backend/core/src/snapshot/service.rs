//! Leader-gated periodic snapshot refresh.
//!
//! Every poll interval the leader walks all namespaces and rebuilds the
//! snapshot of each one whose latest snapshot is older than the refresh
//! interval. Builds run concurrently up to `max_parallel_builds`. A failure
//! in one namespace is logged and never stops the cycle.

use futures::StreamExt;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::builder::SnapshotBuilder;
use crate::clock::Clock;
use crate::config::SnapshotConfig;
use crate::error::{ReplogError, Result};
use crate::leader::LeaderElection;
use crate::replication::ReplicationLog;
use crate::types::NamespaceId;

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct SnapshotServiceConfig {
    /// Run the periodic loop at all
    pub enabled: bool,
    /// Period between cycles
    pub poll_interval: Duration,
    /// Snapshots younger than this are left alone
    pub refresh_interval: Duration,
    /// Namespaces built concurrently
    pub max_parallel_builds: usize,
}

impl Default for SnapshotServiceConfig {
    fn default() -> Self {
        Self::from(&SnapshotConfig::default())
    }
}

impl From<&SnapshotConfig> for SnapshotServiceConfig {
    fn from(config: &SnapshotConfig) -> Self {
        Self {
            enabled: config.enabled,
            poll_interval: config.poll_interval,
            refresh_interval: config.refresh_interval,
            max_parallel_builds: config.max_parallel_builds,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Run Summary
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome counts of one service cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotRunSummary {
    /// Whether this instance led during the cycle
    pub leader: bool,
    /// Whether the cycle was dropped because the previous one was still running
    pub overlapped: bool,
    pub built: usize,
    /// Latest snapshot still within the refresh interval
    pub fresh: usize,
    /// Nothing newer than the latest snapshot
    pub unchanged: usize,
    /// Resume point evicted from the log
    pub log_unavailable: usize,
    pub cancelled: usize,
    pub failed: usize,
}

impl SnapshotRunSummary {
    /// Namespaces that were looked at but not rebuilt.
    pub fn skipped(&self) -> usize {
        self.fresh + self.unchanged + self.log_unavailable + self.cancelled
    }

    fn record(&mut self, outcome: NamespaceOutcome) {
        match outcome {
            NamespaceOutcome::Built => self.built += 1,
            NamespaceOutcome::Fresh => self.fresh += 1,
            NamespaceOutcome::Unchanged => self.unchanged += 1,
            NamespaceOutcome::LogUnavailable => self.log_unavailable += 1,
            NamespaceOutcome::Cancelled => self.cancelled += 1,
            NamespaceOutcome::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NamespaceOutcome {
    Built,
    Fresh,
    Unchanged,
    LogUnavailable,
    Cancelled,
    Failed,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Service
// ═══════════════════════════════════════════════════════════════════════════════

pub struct SnapshotService {
    builder: Arc<SnapshotBuilder>,
    log: Arc<dyn ReplicationLog>,
    leader: Arc<dyn LeaderElection>,
    clock: Arc<dyn Clock>,
    config: SnapshotServiceConfig,
    running: AtomicBool,
}

/// Clears the running flag when a cycle ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SnapshotService {
    pub fn new(
        builder: Arc<SnapshotBuilder>,
        log: Arc<dyn ReplicationLog>,
        leader: Arc<dyn LeaderElection>,
        clock: Arc<dyn Clock>,
        config: SnapshotServiceConfig,
    ) -> Self {
        Self {
            builder,
            log,
            leader,
            clock,
            config,
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SnapshotServiceConfig {
        &self.config
    }

    /// Run one refresh cycle over every namespace.
    ///
    /// Returns immediately with `leader: false` on a follower and with
    /// `overlapped: true` when another cycle is still in flight.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<SnapshotRunSummary> {
        let mut summary = SnapshotRunSummary::default();
        if !self.leader.is_this_instance_the_leader() {
            debug!("Not the leader, skipping snapshot cycle");
            return Ok(summary);
        }
        summary.leader = true;

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Previous snapshot cycle still running, skipping");
            summary.overlapped = true;
            return Ok(summary);
        }
        let _guard = RunGuard(&self.running);

        let namespaces = self.log.namespaces().await?;
        let parallelism = self.config.max_parallel_builds.max(1);
        debug!(namespaces = namespaces.len(), parallelism, "Starting snapshot cycle");

        let outcomes: Vec<NamespaceOutcome> = futures::stream::iter(namespaces)
            .map(|namespace| async move { self.refresh_namespace(&namespace, cancel).await })
            .buffer_unordered(parallelism)
            .collect()
            .await;

        for outcome in outcomes {
            summary.record(outcome);
        }

        info!(
            built = summary.built,
            skipped = summary.skipped(),
            failed = summary.failed,
            "Snapshot cycle finished"
        );
        Ok(summary)
    }

    async fn refresh_namespace(&self, namespace: &NamespaceId, cancel: &CancellationToken) -> NamespaceOutcome {
        if cancel.is_cancelled() {
            return NamespaceOutcome::Cancelled;
        }

        match self.is_fresh(namespace).await {
            Ok(true) => {
                debug!(namespace = %namespace, "Latest snapshot is fresh");
                return NamespaceOutcome::Fresh;
            }
            Ok(false) => {}
            Err(e) => {
                error!(namespace = %namespace, error = %e, "Failed to read latest snapshot");
                return NamespaceOutcome::Failed;
            }
        }

        match self.builder.build(namespace, cancel).await {
            Ok(Some(_)) => NamespaceOutcome::Built,
            Ok(None) => NamespaceOutcome::Unchanged,
            Err(e) if e.is_log_not_available() => {
                warn!(
                    namespace = %namespace,
                    error = %e,
                    "Snapshot cursor fell out of the retained log, leaving namespace for backfill"
                );
                NamespaceOutcome::LogUnavailable
            }
            Err(e) if e.is_cancelled() => {
                debug!(namespace = %namespace, "Snapshot build cancelled");
                NamespaceOutcome::Cancelled
            }
            Err(e) => {
                self.log_failure(namespace, &e).await;
                NamespaceOutcome::Failed
            }
        }
    }

    async fn is_fresh(&self, namespace: &NamespaceId) -> Result<bool> {
        let Some(latest) = self.log.latest_snapshot(namespace).await? else {
            return Ok(false);
        };
        let age = self.clock.now().signed_duration_since(latest.timestamp);
        Ok(age.to_std().map_or(true, |age| age < self.config.refresh_interval))
    }

    async fn log_failure(&self, namespace: &NamespaceId, e: &ReplogError) {
        let prior = match self.log.latest_snapshot(namespace).await {
            Ok(Some(info)) => info.snapshot_blob_id.to_string(),
            _ => "none".to_string(),
        };
        error!(
            namespace = %namespace,
            prior_snapshot = %prior,
            cursor = ?e.details().context.get("cursor"),
            error_code = %e.code(),
            error = %e,
            "Snapshot build failed"
        );
    }

    /// Spawn the periodic loop.
    pub fn start(self: Arc<Self>) -> SnapshotServiceHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let join = tokio::spawn(async move {
            if !self.config.enabled {
                info!("Snapshot service disabled");
                return;
            }

            info!(
                poll_interval = ?self.config.poll_interval,
                refresh_interval = ?self.config.refresh_interval,
                max_parallel_builds = self.config.max_parallel_builds,
                "Snapshot service started"
            );

            let mut ticker = tokio::time::interval(self.config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once(&token).await {
                            e.log();
                        }
                    }
                }
            }
            info!("Snapshot service stopped");
        });

        SnapshotServiceHandle { cancel, join }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Handle
// ═══════════════════════════════════════════════════════════════════════════════

/// Control handle for a running snapshot service.
pub struct SnapshotServiceHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl SnapshotServiceHandle {
    /// Cancel outstanding work and wait for in-flight builds to return.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            error!(error = %e, "Snapshot service task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::leader::StaticLeaderElection;
    use crate::replication::InMemoryReplicationLog;
    use crate::snapshot::SnapshotBuilderConfig;
    use crate::storage::InMemoryStore;
    use crate::types::{BlobId, IoHashKey, RefBucket};
    use chrono::Utc;

    struct Fixture {
        log: Arc<InMemoryReplicationLog>,
        leader: Arc<StaticLeaderElection>,
        clock: Arc<ManualClock>,
        service: Arc<SnapshotService>,
    }

    fn fixture(leader: bool) -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let log = Arc::new(InMemoryReplicationLog::new(Default::default(), clock.clone()));
        let store = Arc::new(InMemoryStore::new());
        let leader = Arc::new(StaticLeaderElection::new(leader));
        let config = SnapshotBuilderConfig::new(NamespaceId::new("replication-snapshots").unwrap()).unwrap();
        let builder = Arc::new(SnapshotBuilder::new(
            log.clone(),
            store.clone(),
            store,
            clock.clone(),
            config,
        ));
        let service = Arc::new(SnapshotService::new(
            builder,
            log.clone(),
            leader.clone(),
            clock.clone(),
            SnapshotServiceConfig::default(),
        ));
        Fixture {
            log,
            leader,
            clock,
            service,
        }
    }

    async fn add(log: &InMemoryReplicationLog, namespace: &str, key: u8) {
        log.insert_add(
            &NamespaceId::new(namespace).unwrap(),
            &RefBucket::new("default").unwrap(),
            IoHashKey::from_bytes([key; 20]),
            BlobId::from_bytes([key; 20]),
            None,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_follower_does_nothing() {
        let f = fixture(false);
        add(&f.log, "a", 1).await;

        let summary = f.service.run_once(&CancellationToken::new()).await.unwrap();
        assert!(!summary.leader);
        assert_eq!(summary.built, 0);
        assert!(f.log.latest_snapshot(&NamespaceId::new("a").unwrap()).await.unwrap().is_none());

        f.leader.set_leader(true);
        let summary = f.service.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.built, 1);
    }

    #[tokio::test]
    async fn test_fresh_snapshots_are_skipped() {
        let f = fixture(true);
        add(&f.log, "a", 1).await;
        add(&f.log, "b", 2).await;

        let cancel = CancellationToken::new();
        assert_eq!(f.service.run_once(&cancel).await.unwrap().built, 2);

        add(&f.log, "a", 3).await;
        let summary = f.service.run_once(&cancel).await.unwrap();
        assert_eq!(summary.fresh, 2);
        assert_eq!(summary.built, 0);

        f.clock.advance(chrono::Duration::hours(25));
        let summary = f.service.run_once(&cancel).await.unwrap();
        assert_eq!(summary.built, 1);
        assert_eq!(summary.unchanged, 1);
    }

    #[tokio::test]
    async fn test_cancelled_cycle_builds_nothing() {
        let f = fixture(true);
        add(&f.log, "a", 1).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = f.service.run_once(&cancel).await.unwrap();
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let f = fixture(true);
        add(&f.log, "a", 1).await;

        let handle = f.service.clone().start();
        // the first tick fires immediately
        for _ in 0..50 {
            if f.log.latest_snapshot(&NamespaceId::new("a").unwrap()).await.unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.shutdown().await;

        assert!(f.log.latest_snapshot(&NamespaceId::new("a").unwrap()).await.unwrap().is_some());
    }
}
