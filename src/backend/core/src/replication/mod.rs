//! Time-bucketed replication log.
//!
//! - **bucket**: hourly partition keys and event id generation
//! - **event**: log records, cursors, snapshot registrations, bookmarks
//! - **store**: the [`ReplicationLog`] contract
//! - **memory** / **redis**: backends
//! - **reader**: the read surface exposed to replication consumers

pub mod bucket;
pub mod event;
pub mod memory;
pub mod reader;
pub mod redis;
pub mod store;

pub use bucket::{BucketId, EventIdGenerator};
pub use event::{LogCursor, ReplicationLogEvent, ReplicationOp, ReplicatorState, SnapshotInfo};
pub use memory::{InMemoryLogConfig, InMemoryReplicationLog};
pub use reader::{LogPage, ReplicationReader, SnapshotLocator};
pub use redis::{RedisLogConfig, RedisReplicationLog};
pub use store::{EventStream, ReplicationLog};
