//! Benchmarks for snapshot folding, serialization and log reads.
use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use futures::TryStreamExt;
use replog_core::prelude::*;
use replog_core::replication::EventIdGenerator;

fn ns() -> NamespaceId {
    NamespaceId::new("bench").unwrap()
}

fn events(count: usize) -> Vec<ReplicationLogEvent> {
    let start = Utc.with_ymd_and_hms(2024, 5, 17, 0, 0, 0).unwrap();
    let ids = EventIdGenerator::new();
    let bucket = RefBucket::new("default").unwrap();
    (0..count)
        .map(|i| {
            let timestamp = start + Duration::seconds(i as i64);
            let key = IoHashKey::from_bytes([(i % 251) as u8; 20]);
            let deleted = i % 5 == 4;
            ReplicationLogEvent {
                namespace: ns(),
                bucket: bucket.clone(),
                key,
                blob: (!deleted).then(|| BlobId::from_content(&i.to_le_bytes())),
                event_id: ids.generate(timestamp),
                time_bucket: BucketId::from_timestamp(timestamp).unwrap(),
                timestamp,
                op: if deleted { ReplicationOp::Deleted } else { ReplicationOp::Added },
            }
        })
        .collect()
}

fn folded(events: &[ReplicationLogEvent]) -> ReplicationLogSnapshot {
    let mut snapshot = ReplicationLogSnapshot::new(ns());
    for event in events {
        snapshot.process_event(event).unwrap();
    }
    snapshot
}

fn bench_process_event(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_process_event");
    for count in [1_000, 10_000] {
        let events = events(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &events, |b, events| { b.iter(|| black_box(folded(events))); });
    }
    group.finish();
}

fn bench_serialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_serialize");
    for count in [1_000, 10_000] {
        let events = events(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &events, |b, events| {
            b.iter(|| { let mut out = Vec::new(); folded(events).serialize(&mut out, None).unwrap(); black_box(out) });
        });
    }
    group.finish();
}

fn bench_deserialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_deserialize");
    for count in [1_000, 10_000] {
        let mut bytes = Vec::new();
        folded(&events(count)).serialize(&mut bytes, None).unwrap();
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &bytes, |b, bytes| {
            b.iter(|| {
                let snapshot = ReplicationLogSnapshot::deserialize(std::io::Cursor::new(bytes.clone())).unwrap();
                black_box(snapshot.into_live_objects().count())
            });
        });
    }
    group.finish();
}

fn bench_memory_log_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_log_read");
    let rt = tokio::runtime::Runtime::new().unwrap();
    let log = InMemoryReplicationLog::default();
    let bucket = RefBucket::new("default").unwrap();
    let start = Utc.with_ymd_and_hms(2024, 5, 17, 0, 0, 0).unwrap();
    rt.block_on(async {
        for i in 0..10_000u32 {
            let key = IoHashKey::from_bytes([(i % 251) as u8; 20]);
            log.insert_add(&ns(), &bucket, key, BlobId::from_content(&i.to_le_bytes()), Some(start + Duration::seconds(i64::from(i)))).await.unwrap();
        }
    });
    group.throughput(Throughput::Elements(10_000));
    group.bench_function("unbounded", |b| {
        b.iter(|| rt.block_on(async { black_box(log.get(&ns(), None, None).await.unwrap().try_collect::<Vec<_>>().await.unwrap().len()) }));
    });
    group.finish();
}

criterion_group!(benches, bench_process_event, bench_serialize, bench_deserialize, bench_memory_log_read);
criterion_main!(benches);
