//! Snapshot wire format.
//!
//! ```text
//! magic        4 bytes  "SNAP"
//! namespace    LEB128 length + UTF-8
//! lastBucket   LEB128 length + UTF-8 ("rep-<filetime>")
//! lastEvent    16 bytes, RFC 4122 byte order
//! liveCount    u64 little endian
//! body         one zstd frame of liveCount records:
//!              refBucket (LEB128 length + UTF-8), key (20 bytes), blob (20 bytes)
//! ```
//!
//! Anything that does not start with the magic is read as a legacy gzip JSON
//! document. Legacy snapshots are never written.

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::io::{self, BufReader, Read, Write};

use crate::error::{ReplogError, Result};
use crate::replication::{BucketId, LogCursor};
use crate::types::{BlobId, EventId, IoHashKey, NamespaceId, RefBucket, HASH_LEN};

pub const MAGIC: &[u8; 4] = b"SNAP";

/// zstd level used for snapshot bodies.
pub const COMPRESSION_LEVEL: i32 = 3;

/// Upper bound for any length-prefixed string.
const MAX_STRING_LEN: u64 = 64 * 1024;

/// LEB128 never needs more than 10 bytes for a u64.
const MAX_VARINT_BYTES: usize = 10;

// ═══════════════════════════════════════════════════════════════════════════════
// Records
// ═══════════════════════════════════════════════════════════════════════════════

/// Decoded snapshot header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotHeader {
    pub namespace: NamespaceId,
    pub last_bucket: BucketId,
    pub last_event: EventId,
    pub live_count: u64,
    /// Whether the snapshot was read from the legacy JSON format
    pub legacy: bool,
}

impl SnapshotHeader {
    pub fn cursor(&self) -> LogCursor {
        LogCursor::new(self.last_bucket, self.last_event)
    }

    /// Write magic plus header fields.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(MAGIC)?;
        write_string(writer, self.namespace.as_str())?;
        write_string(writer, &self.last_bucket.label())?;
        writer.write_all(self.last_event.as_bytes())?;
        writer.write_all(&self.live_count.to_le_bytes())
    }

    /// Read the header fields that follow the magic.
    pub fn read_after_magic<R: Read>(reader: &mut R) -> Result<Self> {
        let namespace = NamespaceId::new(read_string(reader)?)
            .map_err(|e| ReplogError::invalid_snapshot(format!("Bad namespace in header: {}", e)))?;
        let last_bucket = BucketId::parse(&read_string(reader)?)
            .map_err(|e| ReplogError::invalid_snapshot(format!("Bad bucket in header: {}", e)))?;

        let mut event = [0u8; 16];
        reader.read_exact(&mut event)?;
        let mut count = [0u8; 8];
        reader.read_exact(&mut count)?;

        Ok(Self {
            namespace,
            last_bucket,
            last_event: EventId::from_bytes(event),
            live_count: u64::from_le_bytes(count),
            legacy: false,
        })
    }
}

/// A ref that is live as of the snapshot cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotLiveObject {
    pub bucket: RefBucket,
    pub key: IoHashKey,
    pub blob: BlobId,
}

pub fn write_record<W: Write>(writer: &mut W, object: &SnapshotLiveObject) -> io::Result<()> {
    write_string(writer, object.bucket.as_str())?;
    writer.write_all(object.key.as_bytes())?;
    writer.write_all(object.blob.as_bytes())
}

pub fn read_record<R: Read>(reader: &mut R) -> Result<SnapshotLiveObject> {
    let bucket = RefBucket::new(read_string(reader)?)
        .map_err(|e| ReplogError::invalid_snapshot(format!("Bad ref bucket in record: {}", e)))?;
    let mut key = [0u8; HASH_LEN];
    reader.read_exact(&mut key)?;
    let mut blob = [0u8; HASH_LEN];
    reader.read_exact(&mut blob)?;
    Ok(SnapshotLiveObject {
        bucket,
        key: IoHashKey::from_bytes(key),
        blob: BlobId::from_bytes(blob),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Primitives
// ─────────────────────────────────────────────────────────────────────────────

pub fn write_varint<W: Write>(writer: &mut W, mut value: u64) -> io::Result<()> {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            return writer.write_all(&[byte]);
        }
        writer.write_all(&[byte | 0x80])?;
    }
}

pub fn read_varint<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut value = 0u64;
    for index in 0..MAX_VARINT_BYTES {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        value |= u64::from(byte[0] & 0x7F) << (7 * index);
        if byte[0] & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(io::Error::new(io::ErrorKind::InvalidData, "varint longer than 10 bytes"))
}

fn write_string<W: Write>(writer: &mut W, value: &str) -> io::Result<()> {
    write_varint(writer, value.len() as u64)?;
    writer.write_all(value.as_bytes())
}

fn read_string<R: Read>(reader: &mut R) -> Result<String> {
    let len = read_varint(reader)?;
    if len > MAX_STRING_LEN {
        return Err(ReplogError::invalid_snapshot(format!(
            "String length {} exceeds limit {}",
            len, MAX_STRING_LEN
        )));
    }
    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| ReplogError::invalid_snapshot("String is not valid UTF-8"))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Body Reader
// ═══════════════════════════════════════════════════════════════════════════════

/// Lazily decompresses and yields the records of a binary snapshot body.
pub struct BinaryObjects<R: Read> {
    decoder: zstd::stream::read::Decoder<'static, BufReader<R>>,
    remaining: u64,
}

impl<R: Read> BinaryObjects<R> {
    /// `reader` must be positioned at the start of the body.
    pub fn new(reader: R, live_count: u64) -> Result<Self> {
        let decoder = zstd::stream::read::Decoder::new(reader)
            .map_err(|e| ReplogError::invalid_snapshot(format!("Cannot open snapshot body: {}", e)))?;
        Ok(Self {
            decoder,
            remaining: live_count,
        })
    }
}

impl<R: Read> Iterator for BinaryObjects<R> {
    type Item = Result<SnapshotLiveObject>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        match read_record(&mut self.decoder) {
            Ok(object) => Some(Ok(object)),
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Legacy Format
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LegacySnapshotDocument {
    pub namespace: NamespaceId,
    pub last_bucket: BucketId,
    pub last_event: EventId,
    pub live_objects: Vec<SnapshotLiveObject>,
}

/// Parse a gzip JSON snapshot in full.
pub fn read_legacy<R: Read>(reader: R) -> Result<(SnapshotHeader, Vec<SnapshotLiveObject>)> {
    let document: LegacySnapshotDocument = serde_json::from_reader(GzDecoder::new(reader))
        .map_err(|e| ReplogError::invalid_snapshot(format!("Not a binary or legacy snapshot: {}", e)))?;

    let header = SnapshotHeader {
        namespace: document.namespace,
        last_bucket: document.last_bucket,
        last_event: document.last_event,
        live_count: document.live_objects.len() as u64,
        legacy: true,
    };
    Ok((header, document.live_objects))
}

/// Read the first four bytes and report whether they are the binary magic.
///
/// Returns the bytes read so a legacy reader can be chained behind them.
pub fn sniff<R: Read>(reader: &mut R) -> Result<(bool, [u8; 4])> {
    let mut prefix = [0u8; 4];
    reader
        .read_exact(&mut prefix)
        .map_err(|_| ReplogError::invalid_snapshot("Snapshot is shorter than its magic"))?;
    Ok((&prefix == MAGIC, prefix))
}
