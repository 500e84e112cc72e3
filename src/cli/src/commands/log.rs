//! Live replication log commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use tabled::Tabled;

use replog_core::replication::{LogCursor, ReplicationLog, ReplicationLogEvent, SnapshotInfo};
use replog_core::types::NamespaceId;

use crate::client;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct LogArgs {
    /// Redis URL of the replication log
    #[arg(long, env = "REPLOG_REDIS__URL")]
    redis_url: Option<String>,

    /// Key prefix of the replication log
    #[arg(long, env = "REPLOG_REDIS__KEY_PREFIX")]
    key_prefix: Option<String>,

    #[command(subcommand)]
    command: LogCommands,
}

#[derive(Subcommand)]
enum LogCommands {
    /// List namespaces that have a log
    Namespaces,

    /// Read events after a cursor
    Read {
        /// Namespace to read
        namespace: NamespaceId,

        /// Resume token; reads from the oldest retained bucket when omitted
        #[arg(short, long)]
        cursor: Option<String>,

        /// Maximum number of events
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// List registered snapshots, newest first
    Snapshots {
        /// Namespace to list
        namespace: NamespaceId,
    },

    /// Show a replicator's bookmark
    Replicator {
        /// Namespace the replicator follows
        namespace: NamespaceId,

        /// Replicator name
        name: String,
    },
}

// ── Output types ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Tabled)]
struct NamespaceRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
}

#[derive(Debug, Serialize, Tabled)]
struct EventRow {
    #[tabled(rename = "Bucket")]
    bucket: String,
    #[tabled(rename = "Event")]
    event: String,
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Op")]
    op: String,
    #[tabled(rename = "Ref Bucket")]
    ref_bucket: String,
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Blob")]
    blob: String,
}

impl From<&ReplicationLogEvent> for EventRow {
    fn from(event: &ReplicationLogEvent) -> Self {
        Self {
            bucket: event.time_bucket.label(),
            event: event.event_id.to_string(),
            timestamp: event.timestamp.to_rfc3339(),
            op: format!("{:?}", event.op),
            ref_bucket: event.bucket.to_string(),
            key: event.key.to_hex(),
            blob: event.blob.map(|b| b.to_hex()).unwrap_or_else(|| "-".to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventPage {
    events: Vec<ReplicationLogEvent>,
    next_cursor: Option<String>,
}

#[derive(Debug, Serialize, Tabled)]
struct SnapshotRow {
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Blob Namespace")]
    blob_namespace: String,
    #[tabled(rename = "Blob")]
    blob: String,
}

impl From<&SnapshotInfo> for SnapshotRow {
    fn from(info: &SnapshotInfo) -> Self {
        Self {
            timestamp: info.timestamp.to_rfc3339(),
            blob_namespace: info.blob_namespace.to_string(),
            blob: info.snapshot_blob_id.to_hex(),
        }
    }
}

// ── Execution ───────────────────────────────────────────────────────────────

pub async fn execute(args: LogArgs, format: OutputFormat) -> Result<()> {
    let log = client::connect(args.redis_url, args.key_prefix).await?;

    match args.command {
        LogCommands::Namespaces => {
            let rows: Vec<NamespaceRow> = log
                .namespaces()
                .await?
                .into_iter()
                .map(|namespace| NamespaceRow {
                    namespace: namespace.to_string(),
                })
                .collect();
            output::print_rows(&rows, format)?;
        }

        LogCommands::Read {
            namespace,
            cursor,
            limit,
        } => {
            let cursor = cursor.as_deref().map(LogCursor::decode).transpose()?;
            let events: Vec<ReplicationLogEvent> = log
                .get(&namespace, cursor.map(|c| c.bucket), cursor.map(|c| c.event))
                .await?
                .take(limit)
                .try_collect()
                .await?;
            let next_cursor = events.last().map(ReplicationLogEvent::cursor).or(cursor).map(|c| c.encode());

            match format {
                OutputFormat::Table => {
                    let rows: Vec<EventRow> = events.iter().map(EventRow::from).collect();
                    output::print_rows(&rows, format)?;
                    if let Some(token) = &next_cursor {
                        output::print_note(&format!("Next cursor: {}", token));
                    }
                }
                _ => output::print_record(&EventPage { events, next_cursor }, format)?,
            }
        }

        LogCommands::Snapshots { namespace } => {
            let snapshots = log.snapshots(&namespace).await?;
            match format {
                OutputFormat::Table => {
                    let rows: Vec<SnapshotRow> = snapshots.iter().map(SnapshotRow::from).collect();
                    output::print_rows(&rows, format)?;
                }
                _ => output::print_record(&snapshots, format)?,
            }
        }

        LogCommands::Replicator { namespace, name } => match log.replicator_state(&namespace, &name).await? {
            Some(state) => match (format, state.cursor()) {
                (OutputFormat::Table, Some(cursor)) => {
                    output::print_details(
                        &format!("Replicator: {}", name),
                        &[
                            ("Last Bucket", cursor.bucket.label()),
                            ("Last Event", cursor.event.to_string()),
                            ("Cursor", cursor.encode()),
                        ],
                    );
                }
                _ => output::print_record(&state, format)?,
            },
            None => output::print_note(&format!("No bookmark for replicator {} in {}", name, namespace)),
        },
    }

    Ok(())
}
