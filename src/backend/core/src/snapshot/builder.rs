//! Folds new log events into the latest snapshot of a namespace and
//! publishes the result.

use futures::StreamExt;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::format::SnapshotHeader;
use super::log_snapshot::ReplicationLogSnapshot;
use crate::clock::Clock;
use crate::config::SnapshotConfig;
use crate::error::{ErrorCode, ReplogError, Result};
use crate::replication::{ReplicationLog, SnapshotInfo};
use crate::storage::{scratch_file, BlobStore, BufferedPayload, RefStore};
use crate::types::{IoHashKey, NamespaceId, RefBucket};

/// Ref bucket holding the keep-alive pointers of snapshot blobs.
pub const SNAPSHOT_REF_BUCKET: &str = "replication-snapshots";

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct SnapshotBuilderConfig {
    /// Namespace snapshot blobs and their refs are written to
    pub storage_namespace: NamespaceId,
    /// Ref bucket for the keep-alive pointers
    pub ref_bucket: RefBucket,
    /// Directory for scratch files (OS temp dir when unset)
    pub scratch_dir: Option<PathBuf>,
}

impl SnapshotBuilderConfig {
    pub fn new(storage_namespace: NamespaceId) -> Result<Self> {
        Ok(Self {
            storage_namespace,
            ref_bucket: RefBucket::new(SNAPSHOT_REF_BUCKET)?,
            scratch_dir: None,
        })
    }

    pub fn from_config(config: &SnapshotConfig) -> Result<Self> {
        Ok(Self::new(NamespaceId::new(config.storage_namespace.clone())?)?.with_scratch_dir(config.scratch_dir.clone()))
    }

    pub fn with_scratch_dir(mut self, scratch_dir: Option<PathBuf>) -> Self {
        self.scratch_dir = scratch_dir;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Builder
// ═══════════════════════════════════════════════════════════════════════════════

pub struct SnapshotBuilder {
    log: Arc<dyn ReplicationLog>,
    blobs: Arc<dyn BlobStore>,
    refs: Arc<dyn RefStore>,
    clock: Arc<dyn Clock>,
    config: SnapshotBuilderConfig,
}

impl SnapshotBuilder {
    pub fn new(
        log: Arc<dyn ReplicationLog>,
        blobs: Arc<dyn BlobStore>,
        refs: Arc<dyn RefStore>,
        clock: Arc<dyn Clock>,
        config: SnapshotBuilderConfig,
    ) -> Self {
        Self {
            log,
            blobs,
            refs,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &SnapshotBuilderConfig {
        &self.config
    }

    /// Build, upload and register a new snapshot of `namespace`.
    ///
    /// Returns `None` when no event is newer than the latest snapshot.
    /// Registration happens last; a failed build leaves the previous
    /// snapshot as the latest.
    ///
    /// # Errors
    ///
    /// - `IncrementalLogNotAvailable` when the prior snapshot's cursor has
    ///   been evicted from the log
    /// - `Cancelled` when `cancel` fires before registration
    /// - `MissingReferences` when blob storage does not hold the uploaded blob
    pub async fn build(&self, namespace: &NamespaceId, cancel: &CancellationToken) -> Result<Option<SnapshotInfo>> {
        // The prior body is read lazily, so its scratch file must outlive the fold.
        let (mut snapshot, _prior_payload) = self.open_prior(namespace).await?;
        let start = snapshot.cursor();

        let mut events = self
            .log
            .get(namespace, start.map(|c| c.bucket), start.map(|c| c.event))
            .await?;

        let mut applied = 0u64;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(ReplogError::cancelled(format!("snapshot build of {}", namespace)));
                }
                next = events.next() => next,
            };
            let Some(event) = next else { break };
            match event.and_then(|event| snapshot.process_event(&event)) {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(e) => return Err(e.with_context("cursor", snapshot.cursor().map(|c| c.to_string()))),
            }
        }
        drop(events);

        if applied == 0 {
            debug!(namespace = %namespace, cursor = ?start, "No new events since last snapshot");
            return Ok(None);
        }

        let scratch_dir = self.config.scratch_dir.clone();
        let (header, payload) = tokio::task::spawn_blocking(move || serialize_to_scratch(snapshot, scratch_dir))
            .await??;

        if cancel.is_cancelled() {
            return Err(ReplogError::cancelled(format!("snapshot upload of {}", namespace)));
        }

        let info = self.publish(namespace, &header, &payload).await?;
        info!(
            namespace = %namespace,
            blob_id = %info.snapshot_blob_id,
            bucket = %header.last_bucket,
            event_id = %header.last_event,
            live_count = header.live_count,
            applied,
            size = payload.len(),
            "Registered replication snapshot"
        );
        Ok(Some(info))
    }

    /// Seed state from the latest registered snapshot, or start empty.
    async fn open_prior(&self, namespace: &NamespaceId) -> Result<(ReplicationLogSnapshot, Option<BufferedPayload>)> {
        let Some(prior) = self.log.latest_snapshot(namespace).await? else {
            debug!(namespace = %namespace, "No prior snapshot, starting from the oldest retained bucket");
            return Ok((ReplicationLogSnapshot::new(namespace.clone()), None));
        };

        let body = self
            .blobs
            .get_blob(&prior.blob_namespace, &prior.snapshot_blob_id)
            .await?;
        let payload = BufferedPayload::from_reader(body, self.config.scratch_dir.as_deref()).await?;
        let file = payload.open()?;
        let snapshot = tokio::task::spawn_blocking(move || ReplicationLogSnapshot::deserialize(file)).await??;

        if snapshot.namespace() != namespace {
            return Err(ReplogError::invalid_snapshot(format!(
                "Snapshot blob {} holds namespace {}, registered for {}",
                prior.snapshot_blob_id,
                snapshot.namespace(),
                namespace
            )));
        }

        debug!(
            namespace = %namespace,
            blob_id = %prior.snapshot_blob_id,
            cursor = ?snapshot.cursor(),
            prior_live_count = snapshot.prior_live_count(),
            "Opened prior snapshot"
        );
        Ok((snapshot, Some(payload)))
    }

    /// Upload the blob, pin it with a ref, then register it.
    async fn publish(
        &self,
        namespace: &NamespaceId,
        header: &SnapshotHeader,
        payload: &BufferedPayload,
    ) -> Result<SnapshotInfo> {
        let storage_namespace = &self.config.storage_namespace;
        let blob = self.blobs.put_blob(storage_namespace, payload).await?;

        let missing = self
            .refs
            .put_ref(storage_namespace, &self.config.ref_bucket, IoHashKey::from(blob), blob)
            .await?;
        if !missing.is_empty() {
            let missing: Vec<String> = missing.iter().map(|b| b.to_hex()).collect();
            error!(
                namespace = %namespace,
                blob_id = %blob,
                cursor = %header.cursor(),
                missing = ?missing,
                "Snapshot ref points at blobs missing from storage"
            );
            return Err(ReplogError::new(
                ErrorCode::MissingReferences,
                format!("Snapshot of {} references missing blobs", namespace),
            )
            .with_context("missing", missing));
        }

        let info = SnapshotInfo {
            snapshotted_namespace: namespace.clone(),
            blob_namespace: storage_namespace.clone(),
            snapshot_blob_id: blob,
            timestamp: self.clock.now(),
        };
        let pruned = self.log.add_snapshot(info.clone()).await?;
        self.release_pruned(namespace, &info, pruned).await;
        Ok(info)
    }

    /// Drop the keep-alive refs of snapshots pruned from the registry.
    ///
    /// Registration has already committed, so a failed delete only leaves the
    /// blob pinned until the next prune; it does not fail the build.
    async fn release_pruned(&self, namespace: &NamespaceId, registered: &SnapshotInfo, pruned: Vec<SnapshotInfo>) {
        for old in pruned {
            if old.snapshot_blob_id == registered.snapshot_blob_id {
                continue;
            }
            let key = IoHashKey::from(old.snapshot_blob_id);
            match self.refs.delete_ref(&old.blob_namespace, &self.config.ref_bucket, key).await {
                Ok(existed) => debug!(
                    namespace = %namespace,
                    blob_id = %old.snapshot_blob_id,
                    existed,
                    "Released pruned snapshot ref"
                ),
                Err(e) => warn!(
                    namespace = %namespace,
                    blob_id = %old.snapshot_blob_id,
                    error = %e,
                    "Failed to release pruned snapshot ref"
                ),
            }
        }
    }
}

fn serialize_to_scratch(
    snapshot: ReplicationLogSnapshot,
    scratch_dir: Option<PathBuf>,
) -> Result<(SnapshotHeader, BufferedPayload)> {
    let mut file = scratch_file(scratch_dir.as_deref())?;
    let header = snapshot.serialize(BufWriter::new(file.as_file_mut()), scratch_dir.as_deref())?;
    Ok((header, BufferedPayload::from_file(file)?))
}
