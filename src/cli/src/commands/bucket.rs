//! Time bucket conversions.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use replog_core::replication::BucketId;

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum BucketCommands {
    /// Show the bucket an instant falls into
    At {
        /// RFC 3339 timestamp, e.g. 2024-05-17T10:15:00Z
        timestamp: String,
    },

    /// Decode a bucket label such as rep-133602840000000000
    Parse {
        /// Bucket label
        label: String,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct BucketRow {
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "Filetime")]
    filetime: i64,
    #[tabled(rename = "Start")]
    start: String,
    #[tabled(rename = "End")]
    end: String,
}

impl From<BucketId> for BucketRow {
    fn from(bucket: BucketId) -> Self {
        Self {
            label: bucket.label(),
            filetime: bucket.filetime(),
            start: bucket.start().to_rfc3339(),
            end: bucket.next().start().to_rfc3339(),
        }
    }
}

pub fn execute(cmd: BucketCommands, format: OutputFormat) -> Result<()> {
    let bucket = match cmd {
        BucketCommands::At { timestamp } => {
            let at = DateTime::parse_from_rfc3339(&timestamp)
                .with_context(|| format!("{} is not an RFC 3339 timestamp", timestamp))?;
            BucketId::from_timestamp(at.with_timezone(&Utc))?
        }
        BucketCommands::Parse { label } => BucketId::parse(&label)?,
    };

    output::print_rows(&[BucketRow::from(bucket)], format)
}
