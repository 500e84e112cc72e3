//! The replication log contract shared by every backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use super::bucket::BucketId;
use super::event::{ReplicationLogEvent, ReplicatorState, SnapshotInfo};
use crate::error::Result;
use crate::types::{BlobId, EventId, IoHashKey, NamespaceId, RefBucket};

/// Lazy, ordered, single-pass sequence of log events.
///
/// Items are fetched from the backend as the consumer polls; dropping the
/// stream abandons the read without side effects.
pub type EventStream = BoxStream<'static, Result<ReplicationLogEvent>>;

// ═══════════════════════════════════════════════════════════════════════════════
// Replication Log Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Durable, namespace-scoped, time-bucketed mutation log.
#[async_trait]
pub trait ReplicationLog: Send + Sync {
    /// Every namespace that has ever had an event written.
    async fn namespaces(&self) -> Result<Vec<NamespaceId>>;

    /// Record that `key` in `bucket` now points at `blob`.
    ///
    /// `timestamp` defaults to the backend clock. Registers the namespace.
    async fn insert_add(
        &self,
        namespace: &NamespaceId,
        bucket: &RefBucket,
        key: IoHashKey,
        blob: BlobId,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(BucketId, EventId)>;

    /// Record that `key` in `bucket` was removed.
    async fn insert_delete(
        &self,
        namespace: &NamespaceId,
        bucket: &RefBucket,
        key: IoHashKey,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(BucketId, EventId)>;

    /// Events after the cursor, oldest first.
    ///
    /// With no `last_bucket` the read starts at the oldest retained bucket
    /// and `last_event` is ignored. With a `last_bucket` and no `last_event`
    /// the whole resume bucket is returned.
    ///
    /// # Errors
    ///
    /// - `NamespaceNotFound` when nothing was ever written to `namespace`
    /// - `IncrementalLogNotAvailable` when `last_bucket` is no longer retained
    async fn get(
        &self,
        namespace: &NamespaceId,
        last_bucket: Option<BucketId>,
        last_event: Option<EventId>,
    ) -> Result<EventStream>;

    /// Register a snapshot, pruning the oldest beyond the retention cap.
    ///
    /// Returns the pruned snapshots so their blobs can be released.
    async fn add_snapshot(&self, info: SnapshotInfo) -> Result<Vec<SnapshotInfo>>;

    /// Newest registered snapshot of `namespace`.
    async fn latest_snapshot(&self, namespace: &NamespaceId) -> Result<Option<SnapshotInfo>>;

    /// Registered snapshots of `namespace`, newest first.
    async fn snapshots(&self, namespace: &NamespaceId) -> Result<Vec<SnapshotInfo>>;

    async fn update_replicator_state(
        &self,
        namespace: &NamespaceId,
        replicator: &str,
        state: ReplicatorState,
    ) -> Result<()>;

    async fn replicator_state(
        &self,
        namespace: &NamespaceId,
        replicator: &str,
    ) -> Result<Option<ReplicatorState>>;

    /// Get the backend name.
    fn name(&self) -> &'static str;
}

/// Whether `event_id` lies past the resume point of its bucket.
pub(crate) fn is_after_cursor(event_id: &EventId, last_event: Option<&EventId>) -> bool {
    match last_event {
        Some(last) => event_id > last,
        None => true,
    }
}
