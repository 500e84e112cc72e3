//! Offline snapshot file commands.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tabled::Tabled;

use replog_core::snapshot::{ReplicationLogSnapshot, SnapshotHeader, SnapshotLiveObject};

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum SnapshotCommands {
    /// Show the header of a snapshot file
    Inspect {
        /// Path to a binary or legacy snapshot
        file: PathBuf,
    },

    /// List the live objects of a snapshot file
    Dump {
        /// Path to a binary or legacy snapshot
        file: PathBuf,

        /// Maximum number of objects to print
        #[arg(short, long, default_value = "100")]
        limit: usize,
    },
}

// ── Output types ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HeaderView {
    #[serde(flatten)]
    header: SnapshotHeader,
    bucket_start: String,
    cursor_token: String,
}

#[derive(Debug, Serialize, Tabled)]
struct ObjectRow {
    #[tabled(rename = "Ref Bucket")]
    bucket: String,
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Blob")]
    blob: String,
}

impl From<SnapshotLiveObject> for ObjectRow {
    fn from(object: SnapshotLiveObject) -> Self {
        Self {
            bucket: object.bucket.to_string(),
            key: object.key.to_hex(),
            blob: object.blob.to_hex(),
        }
    }
}

fn open(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    Ok(BufReader::new(file))
}

// ── Execution ───────────────────────────────────────────────────────────────

pub fn execute(cmd: SnapshotCommands, format: OutputFormat) -> Result<()> {
    match cmd {
        SnapshotCommands::Inspect { file } => {
            let header = ReplicationLogSnapshot::read_header(open(&file)?)?;
            let view = HeaderView {
                bucket_start: header.last_bucket.start().to_rfc3339(),
                cursor_token: header.cursor().encode(),
                header,
            };

            match format {
                OutputFormat::Table => {
                    let format_name = if view.header.legacy { "legacy (gzip JSON)" } else { "binary" };
                    output::print_details(
                        &format!("Snapshot: {}", file.display()),
                        &[
                            ("Namespace", view.header.namespace.to_string()),
                            ("Format", format_name.to_string()),
                            ("Last Bucket", view.header.last_bucket.label()),
                            ("Bucket Start", view.bucket_start.clone()),
                            ("Last Event", view.header.last_event.to_string()),
                            ("Live Objects", view.header.live_count.to_string()),
                            ("Cursor", view.cursor_token.clone()),
                        ],
                    );
                }
                _ => output::print_record(&view, format)?,
            }
        }

        SnapshotCommands::Dump { file, limit } => {
            let snapshot = ReplicationLogSnapshot::deserialize(open(&file)?)?;
            let total = snapshot.prior_live_count();
            let rows = snapshot
                .into_live_objects()
                .take(limit)
                .map(|object| object.map(ObjectRow::from))
                .collect::<replog_core::Result<Vec<_>>>()?;

            output::print_rows(&rows, format)?;
            if matches!(format, OutputFormat::Table) && (rows.len() as u64) < total {
                output::print_note(&format!("Showing {} of {} live objects", rows.len(), total));
            }
        }
    }

    Ok(())
}
