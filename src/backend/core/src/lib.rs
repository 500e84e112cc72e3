#![allow(clippy::result_large_err)]
//! # Replog Core
//!
//! Replication log and snapshot engine for a content-addressed cache.
//!
//! ## Architecture
//!
//! - **Replication Log**: namespace-scoped, hourly-bucketed Add/Delete event log
//!   with in-memory and Redis backends
//! - **Reader**: cursor-paged log reads, snapshot lookup and replicator bookmarks
//! - **Snapshots**: compacted live-object views in a streaming binary format
//! - **Snapshot Builder**: folds new events into the latest snapshot and publishes it
//! - **Snapshot Service**: leader-gated periodic refresh across namespaces
//! - **Storage**: blob and ref store seams with in-memory and filesystem stores
//! - **Telemetry**: structured logging initialisation

pub mod clock;
pub mod config;
pub mod error;
pub mod leader;
pub mod replication;
pub mod snapshot;
pub mod storage;
pub mod telemetry;
pub mod types;

pub use error::{ErrorCode, ErrorDetails, ErrorSeverity, ReplogError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::Config;
    pub use crate::error::{ErrorCode, ErrorDetails, ErrorSeverity, ReplogError, Result};
    pub use crate::leader::{LeaderElection, StaticLeaderElection};
    pub use crate::replication::{
        BucketId, EventStream, InMemoryLogConfig, InMemoryReplicationLog, LogCursor, LogPage, RedisLogConfig,
        RedisReplicationLog, ReplicationLog, ReplicationLogEvent, ReplicationOp, ReplicationReader, ReplicatorState,
        SnapshotInfo, SnapshotLocator,
    };
    pub use crate::snapshot::{
        ReplicationLogSnapshot, SnapshotBuilder, SnapshotBuilderConfig, SnapshotHeader, SnapshotLiveObject,
        SnapshotRunSummary, SnapshotService, SnapshotServiceConfig, SnapshotServiceHandle,
    };
    pub use crate::storage::{BlobStore, BufferedPayload, FilesystemStore, InMemoryStore, RefStore};
    pub use crate::types::{BlobId, EventId, IoHashKey, NamespaceId, RefBucket};
}
