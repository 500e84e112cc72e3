//! Point-in-time live-object view of a namespace, anchored to a log cursor.
//!
//! A snapshot is read once and folded forward: the prior snapshot's objects
//! stay on disk and are streamed lazily, while events processed since then
//! are held as an in-memory diff. Serializing merges the two into a new
//! snapshot.

use std::collections::{HashMap, HashSet};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use tracing::trace;

use super::format::{
    read_legacy, sniff, write_record, BinaryObjects, SnapshotHeader, SnapshotLiveObject, COMPRESSION_LEVEL,
};
use crate::error::{ErrorCode, ReplogError, Result};
use crate::replication::{LogCursor, ReplicationLogEvent, ReplicationOp};
use crate::storage::scratch_file;
use crate::types::{BlobId, IoHashKey, NamespaceId, RefBucket};

type RefKey = (RefBucket, IoHashKey);

// ═══════════════════════════════════════════════════════════════════════════════
// Prior Objects
// ═══════════════════════════════════════════════════════════════════════════════

/// Live objects of the snapshot this one was deserialized from.
pub enum PriorObjects {
    /// Fresh snapshot with no predecessor
    Empty,
    /// Streamed from a binary snapshot body
    Binary(BinaryObjects<Box<dyn Read + Send>>),
    /// Parsed from a legacy JSON snapshot
    Legacy(std::vec::IntoIter<SnapshotLiveObject>),
}

impl Iterator for PriorObjects {
    type Item = Result<SnapshotLiveObject>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Empty => None,
            Self::Binary(objects) => objects.next(),
            Self::Legacy(objects) => objects.next().map(Ok),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Snapshot
// ═══════════════════════════════════════════════════════════════════════════════

/// A replication log snapshot being folded forward.
pub struct ReplicationLogSnapshot {
    namespace: NamespaceId,
    cursor: Option<LogCursor>,
    prior_live_count: u64,
    prior: PriorObjects,

    /// Latest add per ref since the prior snapshot, with the order it arrived in
    pending_added: HashMap<RefKey, (u64, BlobId)>,

    /// Refs whose copy in the prior snapshot must be dropped
    pending_deleted: HashSet<RefKey>,

    next_sequence: u64,
}

impl ReplicationLogSnapshot {
    /// Empty, cursor-less snapshot.
    pub fn new(namespace: NamespaceId) -> Self {
        Self {
            namespace,
            cursor: None,
            prior_live_count: 0,
            prior: PriorObjects::Empty,
            pending_added: HashMap::new(),
            pending_deleted: HashSet::new(),
            next_sequence: 0,
        }
    }

    /// Open a serialized snapshot. The body is read lazily.
    pub fn deserialize<R>(mut reader: R) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        let (binary, prefix) = sniff(&mut reader)?;
        let (header, prior) = if binary {
            let header = SnapshotHeader::read_after_magic(&mut reader)?;
            let body: Box<dyn Read + Send> = Box::new(reader);
            let objects = BinaryObjects::new(body, header.live_count)?;
            (header, PriorObjects::Binary(objects))
        } else {
            let (header, objects) = read_legacy(io::Cursor::new(prefix).chain(reader))?;
            (header, PriorObjects::Legacy(objects.into_iter()))
        };

        Ok(Self {
            namespace: header.namespace.clone(),
            cursor: Some(header.cursor()),
            prior_live_count: header.live_count,
            prior,
            pending_added: HashMap::new(),
            pending_deleted: HashSet::new(),
            next_sequence: 0,
        })
    }

    /// Parse only the header; the body is left unread.
    pub fn read_header<R: Read>(mut reader: R) -> Result<SnapshotHeader> {
        let (binary, prefix) = sniff(&mut reader)?;
        if binary {
            SnapshotHeader::read_after_magic(&mut reader)
        } else {
            read_legacy(io::Cursor::new(prefix).chain(reader)).map(|(header, _)| header)
        }
    }

    pub fn namespace(&self) -> &NamespaceId {
        &self.namespace
    }

    /// Position of the last event folded into this snapshot.
    pub fn cursor(&self) -> Option<LogCursor> {
        self.cursor
    }

    /// Live objects in the snapshot this one was opened from.
    pub fn prior_live_count(&self) -> u64 {
        self.prior_live_count
    }

    /// Fold one log event into the snapshot.
    ///
    /// Events at or before the cursor were already folded in and are
    /// skipped; returns whether the event was applied.
    pub fn process_event(&mut self, event: &ReplicationLogEvent) -> Result<bool> {
        if event.namespace != self.namespace {
            return Err(ReplogError::invalid_input(format!(
                "Event for namespace {} folded into snapshot of {}",
                event.namespace, self.namespace
            )));
        }

        let position = event.cursor();
        if matches!(self.cursor, Some(cursor) if position <= cursor) {
            trace!(namespace = %self.namespace, event_id = %event.event_id, "Skipping already folded event");
            return Ok(false);
        }

        let ref_key = (event.bucket.clone(), event.key);
        match (event.op, event.blob) {
            (ReplicationOp::Added, Some(blob)) => {
                let sequence = self.next_sequence;
                self.next_sequence += 1;
                self.pending_added.insert(ref_key.clone(), (sequence, blob));
                self.pending_deleted.insert(ref_key);
            }
            (ReplicationOp::Added, None) => {
                return Err(ReplogError::invalid_input(format!(
                    "Add event {} carries no blob",
                    event.event_id
                )));
            }
            (ReplicationOp::Deleted, _) => {
                self.pending_added.remove(&ref_key);
                self.pending_deleted.insert(ref_key);
            }
        }

        self.cursor = Some(position);
        Ok(true)
    }

    /// Every live object: surviving prior objects first, then new adds in
    /// arrival order. Consumes the snapshot.
    pub fn into_live_objects(self) -> LiveObjects {
        let mut added: Vec<_> = self.pending_added.into_iter().collect();
        added.sort_by_key(|(_, (sequence, _))| *sequence);

        LiveObjects {
            prior: self.prior,
            pending_deleted: self.pending_deleted,
            added: added.into_iter(),
        }
    }

    /// Write the snapshot in binary format.
    ///
    /// The body is compressed into a scratch file first so the header can be
    /// written with its final live count; `writer` never needs to seek.
    ///
    /// # Errors
    ///
    /// `SnapshotCursorMissing` when no event was ever folded in.
    pub fn serialize<W: Write>(self, mut writer: W, scratch_dir: Option<&Path>) -> Result<SnapshotHeader> {
        let cursor = self.cursor.ok_or_else(|| {
            ReplogError::new(
                ErrorCode::SnapshotCursorMissing,
                format!("Snapshot of {} has no cursor to serialize against", self.namespace),
            )
        })?;
        let namespace = self.namespace.clone();

        let scratch = scratch_file(scratch_dir)?;
        let mut live_count = 0u64;
        {
            let mut encoder = zstd::stream::write::Encoder::new(BufWriter::new(scratch.as_file()), COMPRESSION_LEVEL)?;
            for object in self.into_live_objects() {
                write_record(&mut encoder, &object?)?;
                live_count += 1;
            }
            encoder.finish()?.flush()?;
        }

        let header = SnapshotHeader {
            namespace,
            last_bucket: cursor.bucket,
            last_event: cursor.event,
            live_count,
            legacy: false,
        };
        header.write_to(&mut writer)?;
        io::copy(&mut scratch.reopen()?, &mut writer)?;
        writer.flush()?;

        Ok(header)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Live Objects
// ═══════════════════════════════════════════════════════════════════════════════

/// Single-pass merge of prior objects and pending changes.
pub struct LiveObjects {
    prior: PriorObjects,
    pending_deleted: HashSet<RefKey>,
    added: std::vec::IntoIter<(RefKey, (u64, BlobId))>,
}

impl Iterator for LiveObjects {
    type Item = Result<SnapshotLiveObject>;

    fn next(&mut self) -> Option<Self::Item> {
        for object in self.prior.by_ref() {
            let object = match object {
                Ok(object) => object,
                Err(e) => return Some(Err(e)),
            };
            // Each prior ref appears once, so the marker is spent after one hit.
            if self
                .pending_deleted
                .remove(&(object.bucket.clone(), object.key))
            {
                continue;
            }
            return Some(Ok(object));
        }

        self.added
            .next()
            .map(|((bucket, key), (_, blob))| Ok(SnapshotLiveObject { bucket, key, blob }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::{BucketId, EventIdGenerator};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    struct Events {
        generator: EventIdGenerator,
        now: DateTime<Utc>,
    }

    impl Events {
        fn new() -> Self {
            Self {
                generator: EventIdGenerator::new(),
                now: Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap(),
            }
        }

        fn next(&mut self, op: ReplicationOp, key: u8, blob: Option<u8>) -> ReplicationLogEvent {
            self.now += Duration::seconds(1);
            ReplicationLogEvent {
                namespace: NamespaceId::new("ns").unwrap(),
                bucket: RefBucket::new("refs").unwrap(),
                key: IoHashKey::from_bytes([key; 20]),
                blob: blob.map(|b| BlobId::from_bytes([b; 20])),
                event_id: self.generator.generate(self.now),
                time_bucket: BucketId::from_timestamp(self.now).unwrap(),
                timestamp: self.now,
                op,
            }
        }

        fn add(&mut self, key: u8, blob: u8) -> ReplicationLogEvent {
            self.next(ReplicationOp::Added, key, Some(blob))
        }

        fn delete(&mut self, key: u8) -> ReplicationLogEvent {
            self.next(ReplicationOp::Deleted, key, None)
        }
    }

    fn live(snapshot: ReplicationLogSnapshot) -> Vec<(u8, u8)> {
        snapshot
            .into_live_objects()
            .map(|o| {
                let o = o.unwrap();
                (o.key.as_bytes()[0], o.blob.as_bytes()[0])
            })
            .collect()
    }

    fn round_trip(snapshot: ReplicationLogSnapshot) -> ReplicationLogSnapshot {
        let mut bytes = Vec::new();
        snapshot.serialize(&mut bytes, None).unwrap();
        ReplicationLogSnapshot::deserialize(io::Cursor::new(bytes)).unwrap()
    }

    #[test]
    fn test_serialize_without_cursor_fails() {
        let snapshot = ReplicationLogSnapshot::new(NamespaceId::new("ns").unwrap());
        let err = snapshot.serialize(Vec::new(), None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SnapshotCursorMissing);
    }

    #[test]
    fn test_add_then_delete_in_one_pass() {
        let mut events = Events::new();
        let mut snapshot = ReplicationLogSnapshot::new(NamespaceId::new("ns").unwrap());
        snapshot.process_event(&events.add(1, 10)).unwrap();
        snapshot.process_event(&events.delete(1)).unwrap();
        snapshot.process_event(&events.add(2, 20)).unwrap();
        assert_eq!(live(round_trip(snapshot)), vec![(2, 20)]);
    }

    #[test]
    fn test_delete_then_readd_across_passes() {
        let mut events = Events::new();
        let mut first = ReplicationLogSnapshot::new(NamespaceId::new("ns").unwrap());
        first.process_event(&events.add(1, 10)).unwrap();
        first.process_event(&events.add(2, 20)).unwrap();

        let mut second = round_trip(first);
        second.process_event(&events.delete(1)).unwrap();
        second.process_event(&events.add(1, 11)).unwrap();
        second.process_event(&events.add(2, 21)).unwrap();

        let mut objects = live(round_trip(second));
        objects.sort();
        assert_eq!(objects, vec![(1, 11), (2, 21)]);
    }

    #[test]
    fn test_cursor_never_moves_backwards() {
        let mut events = Events::new();
        let early = events.add(1, 10);
        let late = events.add(2, 20);

        let mut snapshot = ReplicationLogSnapshot::new(NamespaceId::new("ns").unwrap());
        assert!(snapshot.process_event(&late).unwrap());
        assert!(!snapshot.process_event(&early).unwrap());
        assert!(!snapshot.process_event(&late).unwrap());
        assert_eq!(snapshot.cursor(), Some(late.cursor()));
    }

    #[test]
    fn test_foreign_namespace_rejected() {
        let mut events = Events::new();
        let mut snapshot = ReplicationLogSnapshot::new(NamespaceId::new("other").unwrap());
        assert!(snapshot.process_event(&events.add(1, 1)).is_err());
    }

    #[test]
    fn test_header_only_read() {
        let mut events = Events::new();
        let mut snapshot = ReplicationLogSnapshot::new(NamespaceId::new("ns").unwrap());
        let first = events.add(1, 10);
        let last = events.add(3, 30);
        snapshot.process_event(&first).unwrap();
        snapshot.process_event(&last).unwrap();

        let mut bytes = Vec::new();
        let written = snapshot.serialize(&mut bytes, None).unwrap();
        let header = ReplicationLogSnapshot::read_header(&bytes[..]).unwrap();
        assert_eq!(header, written);
        assert_eq!(header.live_count, 2);
        assert_eq!(header.cursor(), last.cursor());
    }
}
