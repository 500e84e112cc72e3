//! Resume cursor token conversions.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use replog_core::replication::{BucketId, LogCursor};
use replog_core::types::EventId;

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum CursorCommands {
    /// Decode an opaque cursor token
    Decode {
        /// Token as returned by a log read
        token: String,
    },

    /// Build a cursor token from a bucket label and an event id
    Encode {
        /// Bucket label, e.g. rep-133602840000000000
        bucket: String,

        /// Event UUID
        event: String,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct CursorRow {
    #[tabled(rename = "Bucket")]
    bucket: String,
    #[tabled(rename = "Bucket Start")]
    bucket_start: String,
    #[tabled(rename = "Event")]
    event: String,
    #[tabled(rename = "Token")]
    token: String,
}

impl From<LogCursor> for CursorRow {
    fn from(cursor: LogCursor) -> Self {
        Self {
            bucket: cursor.bucket.label(),
            bucket_start: cursor.bucket.start().to_rfc3339(),
            event: cursor.event.to_string(),
            token: cursor.encode(),
        }
    }
}

pub fn execute(cmd: CursorCommands, format: OutputFormat) -> Result<()> {
    let cursor = match cmd {
        CursorCommands::Decode { token } => LogCursor::decode(&token)?,
        CursorCommands::Encode { bucket, event } => {
            LogCursor::new(BucketId::parse(&bucket)?, event.parse::<EventId>()?)
        }
    };

    output::print_rows(&[CursorRow::from(cursor)], format)
}
