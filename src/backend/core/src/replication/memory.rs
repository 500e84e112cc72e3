//! In-memory replication log.
//!
//! Reference implementation and test double. Nothing expires on its own;
//! [`InMemoryReplicationLog::evict_before`] stands in for backend TTL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use tracing::debug;

use super::bucket::{BucketId, EventIdGenerator};
use super::event::{insert_capped, ReplicationLogEvent, ReplicationOp, ReplicatorState, SnapshotInfo};
use super::store::{is_after_cursor, EventStream, ReplicationLog};
use crate::clock::{Clock, SystemClock};
use crate::error::{ReplogError, Result};
use crate::types::{BlobId, EventId, IoHashKey, NamespaceId, RefBucket};

/// Buckets of one namespace, each holding its events sorted by id.
type BucketMap = BTreeMap<BucketId, Vec<ReplicationLogEvent>>;

/// Configuration for the in-memory log.
#[derive(Debug, Clone)]
pub struct InMemoryLogConfig {
    /// Registered snapshots kept per namespace
    pub max_snapshots_per_namespace: usize,
}

impl Default for InMemoryLogConfig {
    fn default() -> Self {
        Self {
            max_snapshots_per_namespace: 10,
        }
    }
}

/// Process-local replication log.
pub struct InMemoryReplicationLog {
    /// Namespace -> bucket -> ordered events
    logs: DashMap<NamespaceId, Arc<RwLock<BucketMap>>>,

    /// Namespace -> snapshots, newest first
    snapshots: DashMap<NamespaceId, Vec<SnapshotInfo>>,

    /// (namespace, replicator) -> bookmark
    replicators: DashMap<(NamespaceId, String), ReplicatorState>,

    ids: EventIdGenerator,
    clock: Arc<dyn Clock>,
    config: InMemoryLogConfig,
}

impl Default for InMemoryReplicationLog {
    fn default() -> Self {
        Self::new(InMemoryLogConfig::default(), Arc::new(SystemClock))
    }
}

impl InMemoryReplicationLog {
    pub fn new(config: InMemoryLogConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            logs: DashMap::new(),
            snapshots: DashMap::new(),
            replicators: DashMap::new(),
            ids: EventIdGenerator::new(),
            clock,
            config,
        }
    }

    /// Drop every bucket that starts before the bucket containing `cutoff`.
    ///
    /// Returns the number of buckets removed across all namespaces.
    pub fn evict_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let keep_from = BucketId::from_timestamp(cutoff)?;
        let mut evicted = 0;
        for entry in self.logs.iter() {
            let mut buckets = entry.value().write();
            let kept = buckets.split_off(&keep_from);
            evicted += buckets.len();
            *buckets = kept;
        }
        debug!(cutoff = %keep_from, evicted = evicted, "Evicted in-memory log buckets");
        Ok(evicted)
    }

    /// Buckets currently held for `namespace`, oldest first.
    pub fn buckets(&self, namespace: &NamespaceId) -> Vec<BucketId> {
        self.logs
            .get(namespace)
            .map(|log| log.read().keys().copied().collect())
            .unwrap_or_default()
    }

    fn append(
        &self,
        namespace: &NamespaceId,
        bucket: &RefBucket,
        key: IoHashKey,
        blob: Option<BlobId>,
        op: ReplicationOp,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(BucketId, EventId)> {
        let timestamp = timestamp.unwrap_or_else(|| self.clock.now());
        let time_bucket = BucketId::from_timestamp(timestamp)?;
        let event_id = self.ids.generate(timestamp);

        let event = ReplicationLogEvent {
            namespace: namespace.clone(),
            bucket: bucket.clone(),
            key,
            blob,
            event_id,
            time_bucket,
            timestamp,
            op,
        };

        let log = self.logs.entry(namespace.clone()).or_default().clone();
        let mut buckets = log.write();
        let events = buckets.entry(time_bucket).or_default();
        let position = events.partition_point(|existing| existing.event_id < event_id);
        events.insert(position, event);

        Ok((time_bucket, event_id))
    }
}

#[async_trait]
impl ReplicationLog for InMemoryReplicationLog {
    async fn namespaces(&self) -> Result<Vec<NamespaceId>> {
        let mut namespaces: Vec<_> = self.logs.iter().map(|entry| entry.key().clone()).collect();
        namespaces.sort();
        Ok(namespaces)
    }

    async fn insert_add(
        &self,
        namespace: &NamespaceId,
        bucket: &RefBucket,
        key: IoHashKey,
        blob: BlobId,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(BucketId, EventId)> {
        self.append(namespace, bucket, key, Some(blob), ReplicationOp::Added, timestamp)
    }

    async fn insert_delete(
        &self,
        namespace: &NamespaceId,
        bucket: &RefBucket,
        key: IoHashKey,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(BucketId, EventId)> {
        self.append(namespace, bucket, key, None, ReplicationOp::Deleted, timestamp)
    }

    async fn get(
        &self,
        namespace: &NamespaceId,
        last_bucket: Option<BucketId>,
        last_event: Option<EventId>,
    ) -> Result<EventStream> {
        let log = self
            .logs
            .get(namespace)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ReplogError::namespace_not_found(namespace))?;

        if let Some(bucket) = last_bucket {
            if !log.read().contains_key(&bucket) {
                return Err(ReplogError::incremental_log_not_available(namespace, bucket));
            }
        }

        let walk = BucketWalk {
            log,
            lower: last_bucket.map_or(Bound::Unbounded, Bound::Included),
            resume: last_bucket.map(|bucket| (bucket, last_event)),
            pending: Vec::new().into_iter(),
        };
        Ok(futures::stream::iter(walk.map(Ok)).boxed())
    }

    async fn add_snapshot(&self, info: SnapshotInfo) -> Result<Vec<SnapshotInfo>> {
        let mut snapshots = self
            .snapshots
            .entry(info.snapshotted_namespace.clone())
            .or_default();
        Ok(insert_capped(&mut snapshots, info, self.config.max_snapshots_per_namespace))
    }

    async fn latest_snapshot(&self, namespace: &NamespaceId) -> Result<Option<SnapshotInfo>> {
        Ok(self
            .snapshots
            .get(namespace)
            .and_then(|snapshots| snapshots.first().cloned()))
    }

    async fn snapshots(&self, namespace: &NamespaceId) -> Result<Vec<SnapshotInfo>> {
        Ok(self
            .snapshots
            .get(namespace)
            .map(|snapshots| snapshots.clone())
            .unwrap_or_default())
    }

    async fn update_replicator_state(
        &self,
        namespace: &NamespaceId,
        replicator: &str,
        state: ReplicatorState,
    ) -> Result<()> {
        self.replicators
            .insert((namespace.clone(), replicator.to_string()), state);
        Ok(())
    }

    async fn replicator_state(
        &self,
        namespace: &NamespaceId,
        replicator: &str,
    ) -> Result<Option<ReplicatorState>> {
        Ok(self
            .replicators
            .get(&(namespace.clone(), replicator.to_string()))
            .map(|state| state.clone()))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Walks buckets forward one at a time, copying a bucket only when the
/// previous one is drained.
struct BucketWalk {
    log: Arc<RwLock<BucketMap>>,
    lower: Bound<BucketId>,
    resume: Option<(BucketId, Option<EventId>)>,
    pending: std::vec::IntoIter<ReplicationLogEvent>,
}

impl Iterator for BucketWalk {
    type Item = ReplicationLogEvent;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.pending.next() {
                return Some(event);
            }

            let (bucket, events) = {
                let buckets = self.log.read();
                let (bucket, events) = buckets.range((self.lower, Bound::Unbounded)).next()?;
                (*bucket, events.clone())
            };
            self.lower = Bound::Excluded(bucket);

            let after = match self.resume {
                Some((resume_bucket, last_event)) if resume_bucket == bucket => last_event,
                _ => None,
            };
            self.pending = events
                .into_iter()
                .filter(|event| is_after_cursor(&event.event_id, after.as_ref()))
                .collect::<Vec<_>>()
                .into_iter();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, TimeZone};
    use futures::TryStreamExt;

    fn ns() -> NamespaceId {
        NamespaceId::new("test-ns").unwrap()
    }

    fn refs() -> RefBucket {
        RefBucket::new("default").unwrap()
    }

    fn key(n: u8) -> IoHashKey {
        IoHashKey::from_bytes([n; 20])
    }

    fn blob(n: u8) -> BlobId {
        BlobId::from_bytes([n; 20])
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_namespace() {
        let log = InMemoryReplicationLog::default();
        let err = log.get(&ns(), None, None).await.err().unwrap();
        assert_eq!(err.code(), crate::error::ErrorCode::NamespaceNotFound);
    }

    #[tokio::test]
    async fn test_insert_registers_namespace() {
        let log = InMemoryReplicationLog::default();
        log.insert_add(&ns(), &refs(), key(1), blob(1), None).await.unwrap();
        assert_eq!(log.namespaces().await.unwrap(), vec![ns()]);
    }

    #[tokio::test]
    async fn test_late_insert_keeps_bucket_sorted() {
        let log = InMemoryReplicationLog::default();
        log.insert_add(&ns(), &refs(), key(2), blob(2), Some(start() + Duration::minutes(30)))
            .await
            .unwrap();
        log.insert_add(&ns(), &refs(), key(1), blob(1), Some(start() + Duration::minutes(10)))
            .await
            .unwrap();

        let events: Vec<_> = log.get(&ns(), None, None).await.unwrap().try_collect().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].key, key(1));
        assert_eq!(events[1].key, key(2));
    }

    #[tokio::test]
    async fn test_resume_skips_through_last_event() {
        let log = InMemoryReplicationLog::default();
        let (bucket, first) = log
            .insert_add(&ns(), &refs(), key(1), blob(1), Some(start()))
            .await
            .unwrap();
        log.insert_delete(&ns(), &refs(), key(1), Some(start() + Duration::minutes(1)))
            .await
            .unwrap();
        log.insert_add(&ns(), &refs(), key(3), blob(3), Some(start() + Duration::hours(2)))
            .await
            .unwrap();

        let events: Vec<_> = log
            .get(&ns(), Some(bucket), Some(first))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].op, ReplicationOp::Deleted);
        assert_eq!(events[1].key, key(3));
    }

    #[tokio::test]
    async fn test_evicted_bucket_is_not_available() {
        let clock = Arc::new(ManualClock::new(start()));
        let log = InMemoryReplicationLog::new(InMemoryLogConfig::default(), clock.clone());
        let (old_bucket, old_event) = log.insert_add(&ns(), &refs(), key(1), blob(1), None).await.unwrap();
        clock.advance(Duration::hours(3));
        log.insert_add(&ns(), &refs(), key(2), blob(2), None).await.unwrap();

        assert_eq!(log.evict_before(start() + Duration::hours(1)).unwrap(), 1);
        let err = log
            .get(&ns(), Some(old_bucket), Some(old_event))
            .await
            .err()
            .unwrap();
        assert!(err.is_log_not_available());
        assert_eq!(log.buckets(&ns()).len(), 1);
    }

    #[tokio::test]
    async fn test_far_future_insert_is_rejected() {
        let log = InMemoryReplicationLog::default();
        let far = Utc.with_ymd_and_hms(40000, 1, 1, 0, 0, 0).unwrap();
        let err = log.insert_add(&ns(), &refs(), key(1), blob(1), Some(far)).await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidInput);
        assert!(log.namespaces().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_snapshot_cap_keeps_latest() {
        let config = InMemoryLogConfig {
            max_snapshots_per_namespace: 0,
        };
        let log = InMemoryReplicationLog::new(config, Arc::new(SystemClock));
        let info = |n: u8| SnapshotInfo {
            snapshotted_namespace: ns(),
            blob_namespace: ns(),
            snapshot_blob_id: blob(n),
            timestamp: start() + Duration::minutes(n as i64),
        };

        assert!(log.add_snapshot(info(1)).await.unwrap().is_empty());
        let pruned = log.add_snapshot(info(2)).await.unwrap();
        assert_eq!(pruned, vec![info(1)]);
        assert_eq!(log.snapshots(&ns()).await.unwrap(), vec![info(2)]);
        assert_eq!(log.latest_snapshot(&ns()).await.unwrap(), Some(info(2)));
    }

    #[tokio::test]
    async fn test_replicator_state_round_trip() {
        let log = InMemoryReplicationLog::default();
        assert!(log.replicator_state(&ns(), "eu-west").await.unwrap().is_none());

        let (bucket, event) = log.insert_add(&ns(), &refs(), key(1), blob(1), None).await.unwrap();
        let state = ReplicatorState {
            last_bucket: Some(bucket),
            last_event: Some(event),
        };
        log.update_replicator_state(&ns(), "eu-west", state.clone()).await.unwrap();
        assert_eq!(log.replicator_state(&ns(), "eu-west").await.unwrap(), Some(state));
        assert!(log.replicator_state(&ns(), "us-east").await.unwrap().is_none());
    }
}
