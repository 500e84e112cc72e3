//! Snapshots of the replication log.
//!
//! - **format**: the binary wire format and the legacy JSON reader
//! - **log_snapshot**: folding events into a snapshot and writing it out
//! - **builder**: refreshing one namespace's snapshot end to end
//! - **service**: leader-gated periodic refresh across namespaces

pub mod builder;
pub mod format;
pub mod log_snapshot;
pub mod service;

pub use builder::{SnapshotBuilder, SnapshotBuilderConfig};
pub use format::{SnapshotHeader, SnapshotLiveObject};
pub use log_snapshot::{LiveObjects, PriorObjects, ReplicationLogSnapshot};
pub use service::{SnapshotRunSummary, SnapshotService, SnapshotServiceConfig, SnapshotServiceHandle};
