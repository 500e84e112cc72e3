//! Read facade exposed to replication consumers.
//!
//! Consumers page the log from a resume cursor. When the resume point has
//! been evicted (`IncrementalLogNotAvailable`) they fall back to the latest
//! snapshot and continue paging from the cursor stored in its header.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::io::SyncIoBridge;
use tracing::debug;

use super::event::{LogCursor, ReplicationLogEvent, ReplicatorState};
use super::store::ReplicationLog;
use crate::error::{ReplogError, Result};
use crate::snapshot::ReplicationLogSnapshot;
use crate::storage::BlobStore;
use crate::types::{BlobId, NamespaceId};

/// Default page size when the caller passes zero.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// One bounded page of log events.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPage {
    pub events: Vec<ReplicationLogEvent>,
    /// Cursor to pass for the next page
    pub next_cursor: Option<LogCursor>,
    /// Whether the log held more events than the page limit
    pub has_more: bool,
}

/// Where to fetch a snapshot and where to resume the log after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotLocator {
    pub blob_namespace: NamespaceId,
    pub blob_id: BlobId,
    pub cursor: LogCursor,
    pub live_count: u64,
    pub timestamp: DateTime<Utc>,
}

pub struct ReplicationReader {
    log: Arc<dyn ReplicationLog>,
    blobs: Arc<dyn BlobStore>,
}

impl ReplicationReader {
    pub fn new(log: Arc<dyn ReplicationLog>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { log, blobs }
    }

    pub async fn namespaces(&self) -> Result<Vec<NamespaceId>> {
        self.log.namespaces().await
    }

    /// Read up to `limit` events after `cursor`.
    ///
    /// # Errors
    ///
    /// Propagates `NamespaceNotFound` and `IncrementalLogNotAvailable`
    /// from the log unchanged.
    pub async fn get_log(
        &self,
        namespace: &NamespaceId,
        cursor: Option<LogCursor>,
        limit: usize,
    ) -> Result<LogPage> {
        let limit = if limit == 0 { DEFAULT_PAGE_SIZE } else { limit };
        let mut stream = self
            .log
            .get(namespace, cursor.map(|c| c.bucket), cursor.map(|c| c.event))
            .await?;

        let mut events = Vec::with_capacity(limit.min(DEFAULT_PAGE_SIZE));
        let mut has_more = false;
        while let Some(event) = stream.next().await {
            let event = event?;
            if events.len() == limit {
                has_more = true;
                break;
            }
            events.push(event);
        }

        let next_cursor = events.last().map(ReplicationLogEvent::cursor).or(cursor);
        debug!(
            namespace = %namespace,
            count = events.len(),
            has_more,
            "Read replication log page"
        );

        Ok(LogPage {
            events,
            next_cursor,
            has_more,
        })
    }

    /// Locate the newest snapshot of `namespace`.
    ///
    /// Only the snapshot header is read; the body stays in blob storage.
    pub async fn latest_snapshot(&self, namespace: &NamespaceId) -> Result<Option<SnapshotLocator>> {
        let Some(info) = self.log.latest_snapshot(namespace).await? else {
            return Ok(None);
        };

        let body = self
            .blobs
            .get_blob(&info.blob_namespace, &info.snapshot_blob_id)
            .await?;
        let header = tokio::task::spawn_blocking(move || ReplicationLogSnapshot::read_header(SyncIoBridge::new(body)))
            .await??;

        if header.namespace != info.snapshotted_namespace {
            return Err(ReplogError::invalid_snapshot(format!(
                "Snapshot blob {} holds namespace {}, registered for {}",
                info.snapshot_blob_id, header.namespace, info.snapshotted_namespace
            )));
        }

        Ok(Some(SnapshotLocator {
            blob_namespace: info.blob_namespace,
            blob_id: info.snapshot_blob_id,
            cursor: header.cursor(),
            live_count: header.live_count,
            timestamp: info.timestamp,
        }))
    }

    pub async fn replicator_state(
        &self,
        namespace: &NamespaceId,
        replicator: &str,
    ) -> Result<Option<ReplicatorState>> {
        self.log.replicator_state(namespace, replicator).await
    }

    pub async fn update_replicator_state(
        &self,
        namespace: &NamespaceId,
        replicator: &str,
        state: ReplicatorState,
    ) -> Result<()> {
        if replicator.is_empty() {
            return Err(ReplogError::invalid_input("Replicator name must not be empty"));
        }
        self.log.update_replicator_state(namespace, replicator, state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::InMemoryReplicationLog;
    use crate::storage::InMemoryStore;
    use crate::types::{IoHashKey, RefBucket};

    fn ns() -> NamespaceId {
        NamespaceId::new("ue4-ddc").unwrap()
    }

    async fn reader_with_events(count: u8) -> ReplicationReader {
        let log = Arc::new(InMemoryReplicationLog::default());
        let bucket = RefBucket::new("default").unwrap();
        for i in 0..count {
            log.insert_add(&ns(), &bucket, IoHashKey::from_bytes([i; 20]), BlobId::from_bytes([i; 20]), None)
                .await
                .unwrap();
        }
        ReplicationReader::new(log, Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn test_pages_cover_every_event_once() {
        let reader = reader_with_events(5).await;

        let first = reader.get_log(&ns(), None, 2).await.unwrap();
        assert_eq!(first.events.len(), 2);
        assert!(first.has_more);

        let second = reader.get_log(&ns(), first.next_cursor, 2).await.unwrap();
        let third = reader.get_log(&ns(), second.next_cursor, 2).await.unwrap();
        assert_eq!(third.events.len(), 1);
        assert!(!third.has_more);

        let keys: Vec<u8> = first
            .events
            .iter()
            .chain(&second.events)
            .chain(&third.events)
            .map(|e| e.key.as_bytes()[0])
            .collect();
        assert_eq!(keys, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_empty_page_keeps_request_cursor() {
        let reader = reader_with_events(1).await;
        let page = reader.get_log(&ns(), None, 10).await.unwrap();
        let cursor = page.next_cursor;

        let empty = reader.get_log(&ns(), cursor, 10).await.unwrap();
        assert!(empty.events.is_empty());
        assert_eq!(empty.next_cursor, cursor);
    }

    #[tokio::test]
    async fn test_no_snapshot_registered() {
        let reader = reader_with_events(1).await;
        assert!(reader.latest_snapshot(&ns()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replicator_name_required() {
        let reader = reader_with_events(1).await;
        assert!(reader
            .update_replicator_state(&ns(), "", ReplicatorState::default())
            .await
            .is_err());
    }
}
