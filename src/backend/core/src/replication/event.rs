//! Replication log records: events, snapshot registrations, replicator bookmarks.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use super::bucket::BucketId;
use crate::error::{ReplogError, Result};
use crate::types::{BlobId, EventId, IoHashKey, NamespaceId, RefBucket};

// =============================================================================
// Log Events
// =============================================================================

/// Kind of ref mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationOp {
    Added,
    Deleted,
}

/// One immutable entry of the replication log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationLogEvent {
    pub namespace: NamespaceId,
    pub bucket: RefBucket,
    pub key: IoHashKey,
    /// `None` for deletes.
    pub blob: Option<BlobId>,
    pub event_id: EventId,
    pub time_bucket: BucketId,
    pub timestamp: DateTime<Utc>,
    pub op: ReplicationOp,
}

impl ReplicationLogEvent {
    /// Position of this event in the log.
    pub fn cursor(&self) -> LogCursor {
        LogCursor::new(self.time_bucket, self.event_id)
    }
}

// =============================================================================
// Cursor
// =============================================================================

/// Resume point of a replication consumer: a time bucket and the last event
/// consumed inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogCursor {
    pub bucket: BucketId,
    pub event: EventId,
}

impl LogCursor {
    pub fn new(bucket: BucketId, event: EventId) -> Self {
        Self { bucket, event }
    }

    /// Opaque token handed across the RPC boundary.
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}:{}", self.bucket.label(), self.event))
    }

    /// Parse a token produced by [`LogCursor::encode`].
    pub fn decode(token: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| ReplogError::invalid_input(format!("Invalid cursor encoding: {}", e)))?;
        let raw = String::from_utf8(bytes)
            .map_err(|_| ReplogError::invalid_input("Cursor is not valid UTF-8"))?;
        let (bucket, event) = raw
            .split_once(':')
            .ok_or_else(|| ReplogError::invalid_input("Cursor is missing the event part"))?;
        Ok(Self {
            bucket: BucketId::parse(bucket)?,
            event: event.parse()?,
        })
    }
}

impl PartialOrd for LogCursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LogCursor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bucket
            .cmp(&other.bucket)
            .then_with(|| self.event.cmp(&other.event))
    }
}

impl fmt::Display for LogCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.event)
    }
}

// =============================================================================
// Snapshot registrations
// =============================================================================

/// Registration of an uploaded snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    /// Namespace whose log the snapshot compacts.
    pub snapshotted_namespace: NamespaceId,
    /// Namespace the snapshot blob is stored in.
    pub blob_namespace: NamespaceId,
    pub snapshot_blob_id: BlobId,
    pub timestamp: DateTime<Utc>,
}

/// Insert `info` into a newest-first list and drop everything beyond `cap`.
///
/// On equal timestamps the later registration counts as newer. A cap of zero
/// keeps one entry. Returns the dropped entries.
pub fn insert_capped(snapshots: &mut Vec<SnapshotInfo>, info: SnapshotInfo, cap: usize) -> Vec<SnapshotInfo> {
    let position = snapshots
        .iter()
        .position(|existing| existing.timestamp <= info.timestamp)
        .unwrap_or(snapshots.len());
    snapshots.insert(position, info);
    snapshots.split_off(cap.max(1).min(snapshots.len()))
}

// =============================================================================
// Replicator bookmarks
// =============================================================================

/// Durable resume bookmark of one downstream consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicatorState {
    pub last_bucket: Option<BucketId>,
    pub last_event: Option<EventId>,
}

impl ReplicatorState {
    pub fn cursor(&self) -> Option<LogCursor> {
        match (self.last_bucket, self.last_event) {
            (Some(bucket), Some(event)) => Some(LogCursor::new(bucket, event)),
            _ => None,
        }
    }
}

impl From<LogCursor> for ReplicatorState {
    fn from(cursor: LogCursor) -> Self {
        Self {
            last_bucket: Some(cursor.bucket),
            last_event: Some(cursor.event),
        }
    }
}
