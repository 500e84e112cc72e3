//! Integration tests for snapshot folding, serialization and the legacy reader.

use std::collections::BTreeMap;
use std::io::Write;

use chrono::{DateTime, Duration, TimeZone, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::TryStreamExt;

use replog_core::prelude::*;

fn ns() -> NamespaceId {
    NamespaceId::new("game-ddc").unwrap()
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 17, 8, 0, 0).unwrap()
}

/// Deterministic xorshift so interleavings are reproducible.
struct Ops(u64);

impl Ops {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }
}

type Model = BTreeMap<(String, IoHashKey), BlobId>;

/// Write `count` random adds and deletes over a small key space, seven
/// minutes apart starting at `first_slot`, and apply them to `model`.
async fn write_interleaving(log: &InMemoryReplicationLog, seed: u64, first_slot: i64, count: usize, model: &mut Model) {
    let buckets = [RefBucket::new("default").unwrap(), RefBucket::new("shaders").unwrap()];
    let mut ops = Ops(seed);
    for i in 0..count {
        let r = ops.next();
        let bucket = &buckets[(r % 2) as usize];
        let key = IoHashKey::from_bytes([(r >> 8) as u8 % 6; 20]);
        let at = t0() + Duration::minutes(7 * (first_slot + i as i64));
        if (r >> 16) % 3 == 0 {
            log.insert_delete(&ns(), bucket, key, Some(at)).await.unwrap();
            model.remove(&(bucket.to_string(), key));
        } else {
            let blob = BlobId::from_bytes([(r >> 24) as u8; 20]);
            log.insert_add(&ns(), bucket, key, blob, Some(at)).await.unwrap();
            model.insert((bucket.to_string(), key), blob);
        }
    }
}

fn live_set(objects: impl Iterator<Item = replog_core::Result<SnapshotLiveObject>>) -> Model {
    let mut live = Model::new();
    for object in objects {
        let object = object.unwrap();
        let previous = live.insert((object.bucket.to_string(), object.key), object.blob);
        assert!(previous.is_none(), "ref {} emitted twice", object.key);
    }
    live
}

async fn fold_from(
    log: &InMemoryReplicationLog,
    mut snapshot: ReplicationLogSnapshot,
) -> ReplicationLogSnapshot {
    let cursor = snapshot.cursor();
    let events: Vec<_> = log
        .get(&ns(), cursor.map(|c| c.bucket), cursor.map(|c| c.event))
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    for event in &events {
        snapshot.process_event(event).unwrap();
    }
    snapshot
}

fn round_trip(snapshot: ReplicationLogSnapshot) -> (SnapshotHeader, ReplicationLogSnapshot) {
    let mut bytes = Vec::new();
    let header = snapshot.serialize(&mut bytes, None).unwrap();
    assert_eq!(&bytes[..4], b"SNAP");
    let reopened = ReplicationLogSnapshot::deserialize(std::io::Cursor::new(bytes)).unwrap();
    (header, reopened)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Round Trips
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_serialized_snapshot_holds_adds_minus_later_deletes() {
    for seed in [1u64, 7, 42, 1337, 90210] {
        let log = InMemoryReplicationLog::default();
        let mut model = Model::new();
        write_interleaving(&log, seed, 0, 60, &mut model).await;

        let snapshot = fold_from(&log, ReplicationLogSnapshot::new(ns())).await;
        let (header, reopened) = round_trip(snapshot);

        assert_eq!(header.live_count as usize, model.len(), "seed {}", seed);
        assert_eq!(reopened.prior_live_count(), header.live_count);
        assert_eq!(reopened.cursor(), Some(header.cursor()));
        assert_eq!(live_set(reopened.into_live_objects()), model, "seed {}", seed);
    }
}

#[tokio::test]
async fn test_incremental_snapshots_match_a_full_fold() {
    let log = InMemoryReplicationLog::default();
    let mut model = Model::new();

    // Three rounds of writes, each folded into the previous snapshot.
    let mut snapshot = ReplicationLogSnapshot::new(ns());
    for (round, seed) in [3u64, 5, 11].into_iter().enumerate() {
        write_interleaving(&log, seed, 40 * round as i64, 40, &mut model).await;
        snapshot = fold_from(&log, snapshot).await;
        let (header, reopened) = round_trip(snapshot);
        assert_eq!(header.live_count as usize, model.len(), "round {}", round);
        snapshot = reopened;
    }

    let full = fold_from(&log, ReplicationLogSnapshot::new(ns())).await;
    assert_eq!(full.cursor(), snapshot.cursor());
    assert_eq!(live_set(snapshot.into_live_objects()), model);
    assert_eq!(live_set(full.into_live_objects()), model);
}

#[tokio::test]
async fn test_readd_after_delete_of_prior_object_survives() {
    let log = InMemoryReplicationLog::default();
    let bucket = RefBucket::new("default").unwrap();
    let key = IoHashKey::from_bytes([1; 20]);

    log.insert_add(&ns(), &bucket, key, BlobId::from_bytes([1; 20]), Some(t0()))
        .await
        .unwrap();
    let (_, first) = round_trip(fold_from(&log, ReplicationLogSnapshot::new(ns())).await);

    log.insert_delete(&ns(), &bucket, key, Some(t0() + Duration::minutes(1)))
        .await
        .unwrap();
    log.insert_add(&ns(), &bucket, key, BlobId::from_bytes([2; 20]), Some(t0() + Duration::minutes(2)))
        .await
        .unwrap();

    let (header, second) = round_trip(fold_from(&log, first).await);
    assert_eq!(header.live_count, 1);
    let live: Vec<_> = second.into_live_objects().map(|o| o.unwrap()).collect();
    assert_eq!(live[0].blob, BlobId::from_bytes([2; 20]));
}

#[tokio::test]
async fn test_cursor_never_moves_backward() {
    let log = InMemoryReplicationLog::default();
    let mut model = Model::new();
    write_interleaving(&log, 99, 0, 30, &mut model).await;
    let events: Vec<_> = log.get(&ns(), None, None).await.unwrap().try_collect().await.unwrap();

    let mut snapshot = ReplicationLogSnapshot::new(ns());
    let mut previous = None;

    // Forward, then replay everything again out of order.
    let replay = events.iter().chain(events.iter().rev()).chain(events.iter().step_by(3));
    for event in replay {
        snapshot.process_event(event).unwrap();
        let cursor = snapshot.cursor();
        assert!(cursor >= previous);
        previous = cursor;
    }
    assert_eq!(previous, events.last().map(ReplicationLogEvent::cursor));
}

#[test]
fn test_serialize_without_cursor_fails() {
    let err = ReplicationLogSnapshot::new(ns()).serialize(Vec::new(), None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::SnapshotCursorMissing);
}

#[test]
fn test_garbage_is_not_a_snapshot() {
    let err = ReplicationLogSnapshot::deserialize(std::io::Cursor::new(b"not a snapshot at all".to_vec()))
        .err()
        .unwrap();
    assert_eq!(err.code(), ErrorCode::InvalidSnapshot);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Legacy Snapshots
// ═══════════════════════════════════════════════════════════════════════════════

fn legacy_snapshot(last_bucket: BucketId, last_event: EventId) -> Vec<u8> {
    let document = serde_json::json!({
        "namespace": "game-ddc",
        "lastBucket": last_bucket.label(),
        "lastEvent": last_event.to_string(),
        "liveObjects": [
            {
                "bucket": "default",
                "key": "0101010101010101010101010101010101010101",
                "blob": "0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a"
            },
            {
                "bucket": "default",
                "key": "0202020202020202020202020202020202020202",
                "blob": "0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b"
            }
        ]
    });
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(document.to_string().as_bytes()).unwrap();
    encoder.finish().unwrap()
}

#[tokio::test]
async fn test_legacy_snapshot_is_read_and_rewritten_as_binary() {
    let log = InMemoryReplicationLog::default();
    let bucket = RefBucket::new("default").unwrap();
    let (last_bucket, last_event) = log
        .insert_add(&ns(), &bucket, IoHashKey::from_bytes([1; 20]), BlobId::from_bytes([10; 20]), Some(t0()))
        .await
        .unwrap();
    log.insert_delete(&ns(), &bucket, IoHashKey::from_bytes([2; 20]), Some(t0() + Duration::minutes(5)))
        .await
        .unwrap();

    let legacy = legacy_snapshot(last_bucket, last_event);
    let header = ReplicationLogSnapshot::read_header(&legacy[..]).unwrap();
    assert!(header.legacy);
    assert_eq!(header.live_count, 2);
    assert_eq!(header.cursor(), LogCursor::new(last_bucket, last_event));

    let snapshot = ReplicationLogSnapshot::deserialize(std::io::Cursor::new(legacy)).unwrap();
    let (header, reopened) = round_trip(fold_from(&log, snapshot).await);
    assert!(!header.legacy);
    assert_eq!(header.live_count, 1);

    let live: Vec<_> = reopened.into_live_objects().map(|o| o.unwrap()).collect();
    assert_eq!(live[0].key, IoHashKey::from_bytes([1; 20]));
    assert_eq!(live[0].blob, BlobId::from_bytes([10; 20]));
}
