//! Redis-backed replication log.
//!
//! Each (namespace, hour) pair is one sorted set whose members all score 0,
//! so lexicographic member order is event order. Every bucket key carries an
//! absolute expiry of `bucket start + retention + 1h`, which is the eviction
//! mechanism. A per-namespace index of bucket filetimes lists partitions
//! directly; a listed bucket whose key is gone has been evicted.
//!
//! Key layout (all under the configured prefix):
//!
//! | Key | Type | Content |
//! |---|---|---|
//! | `namespaces` | SET | namespaces with at least one write |
//! | `log:{ns}:{filetime}` | ZSET | `<event hex>\|<event json>` |
//! | `buckets:{ns}` | ZSET | bucket filetimes, score = filetime |
//! | `snapshots:{ns}` | ZSET | `SnapshotInfo` json, score = millis |
//! | `replicators:{ns}` | HASH | replicator name -> `ReplicatorState` json |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::bucket::{BucketId, EventIdGenerator};
use super::event::{ReplicationLogEvent, ReplicationOp, ReplicatorState, SnapshotInfo};
use super::store::{EventStream, ReplicationLog};
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{ErrorCode, ReplogError, Result};
use crate::telemetry::redact_url;
use crate::types::{BlobId, EventId, IoHashKey, NamespaceId, RefBucket};

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration for the Redis replication log.
#[derive(Debug, Clone)]
pub struct RedisLogConfig {
    /// Redis connection URL
    pub url: String,

    /// Key prefix
    pub key_prefix: String,

    /// How long a bucket stays readable after it closes
    pub retention: Duration,

    /// Hard outer bound on bucket discovery
    pub max_discovery_window: Duration,

    /// Members fetched per ZRANGEBYLEX round trip
    pub read_page_size: usize,

    /// Registered snapshots kept per namespace
    pub max_snapshots_per_namespace: usize,
}

impl Default for RedisLogConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RedisLogConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            url: config.redis.url.clone(),
            key_prefix: config.redis.key_prefix.clone(),
            retention: config.replication_log.retention,
            max_discovery_window: config.replication_log.max_discovery_window,
            read_page_size: config.replication_log.read_page_size,
            max_snapshots_per_namespace: config.snapshot.max_snapshots_per_namespace,
        }
    }

    /// Retention, clipped by the hard discovery cutoff.
    pub fn discovery_window(&self) -> Duration {
        self.retention.min(self.max_discovery_window)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Bucket Discovery
// ═══════════════════════════════════════════════════════════════════════════════

/// Bucket containing `now - window`.
fn floor_before(now: DateTime<Utc>, window: Duration) -> Result<BucketId> {
    let oldest = chrono::Duration::from_std(window)
        .ok()
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or_else(|| ReplogError::configuration(format!("Window {:?} reaches before the bucket range", window)))?;
    BucketId::from_timestamp(oldest)
}

/// Indexed buckets at or after `floor`, oldest first.
fn discoverable(filetimes: Vec<i64>, floor: BucketId) -> Vec<BucketId> {
    let mut buckets: Vec<BucketId> = filetimes
        .into_iter()
        .filter_map(|filetime| BucketId::from_filetime(filetime).ok())
        .filter(|bucket| *bucket >= floor)
        .collect();
    buckets.sort();
    buckets
}

/// Candidates whose log key still exists.
///
/// A failed EXISTS check is treated as "absent": discovery is best
/// effort, reading a bucket that was found is not.
fn confirmed(namespace: &NamespaceId, candidates: Vec<BucketId>, exists: redis::RedisResult<Vec<bool>>) -> Vec<BucketId> {
    match exists {
        Ok(exists) => candidates
            .into_iter()
            .zip(exists)
            .filter_map(|(bucket, present)| present.then_some(bucket))
            .collect(),
        Err(e) => {
            warn!(
                namespace = %namespace,
                candidates = candidates.len(),
                error = %e,
                "Bucket EXISTS check failed, treating buckets as absent"
            );
            Vec::new()
        }
    }
}

/// Buckets a read walks, given the retained buckets and the resume bucket.
fn resume_from(namespace: &NamespaceId, retained: Vec<BucketId>, last_bucket: Option<BucketId>) -> Result<Vec<BucketId>> {
    match last_bucket {
        Some(resume) if !retained.contains(&resume) => {
            Err(ReplogError::incremental_log_not_available(namespace, resume))
        }
        Some(resume) => Ok(retained.into_iter().filter(|bucket| *bucket >= resume).collect()),
        None => Ok(retained),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Key Layout
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct Keys {
    prefix: String,
}

impl Keys {
    fn namespaces(&self) -> String {
        format!("{}namespaces", self.prefix)
    }

    fn log(&self, namespace: &NamespaceId, bucket: BucketId) -> String {
        format!("{}log:{}:{}", self.prefix, namespace, bucket.filetime())
    }

    fn bucket_index(&self, namespace: &NamespaceId) -> String {
        format!("{}buckets:{}", self.prefix, namespace)
    }

    fn snapshots(&self, namespace: &NamespaceId) -> String {
        format!("{}snapshots:{}", self.prefix, namespace)
    }

    fn replicators(&self, namespace: &NamespaceId) -> String {
        format!("{}replicators:{}", self.prefix, namespace)
    }
}

fn encode_member(event: &ReplicationLogEvent) -> Result<String> {
    Ok(format!(
        "{}|{}",
        event.event_id.to_simple_hex(),
        serde_json::to_string(event)?
    ))
}

fn decode_member(member: &str) -> Result<ReplicationLogEvent> {
    let (_, json) = member
        .split_once('|')
        .ok_or_else(|| ReplogError::new(ErrorCode::DeserializationError, "Malformed log entry"))?;
    Ok(serde_json::from_str(json)?)
}

/// ZRANGEBYLEX lower bound that skips every member of `last_event`.
///
/// Members are `<hex>|...` and `'|' < '~'`, so `(<hex>~` sits after all of them.
fn resume_bound(last_event: &EventId) -> String {
    format!("({}~", last_event.to_simple_hex())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Redis Backend
// ═══════════════════════════════════════════════════════════════════════════════

/// Replication log stored in Redis.
pub struct RedisReplicationLog {
    conn: ConnectionManager,
    keys: Keys,
    config: RedisLogConfig,
    ids: EventIdGenerator,
    clock: Arc<dyn Clock>,
}

impl RedisReplicationLog {
    /// Connect and verify the server answers.
    pub async fn connect(config: RedisLogConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            ReplogError::with_internal(
                ErrorCode::StorageConnectionFailed,
                "Failed to create Redis client",
                e.to_string(),
            )
        })?;

        let mut conn = ConnectionManager::new(client).await.map_err(|e| {
            ReplogError::with_internal(
                ErrorCode::StorageConnectionFailed,
                "Failed to connect to Redis",
                e.to_string(),
            )
        })?;

        let _: String = redis::cmd("PING").query_async(&mut conn).await.map_err(|e| {
            ReplogError::with_internal(ErrorCode::StorageConnectionFailed, "Redis ping failed", e.to_string())
        })?;

        info!(url = %redact_url(&config.url), "Redis replication log connected");

        Ok(Self {
            conn,
            keys: Keys {
                prefix: config.key_prefix.clone(),
            },
            config,
            ids: EventIdGenerator::new(),
            clock,
        })
    }

    /// Buckets of `namespace` that are listed in the index, lie inside the
    /// discovery window and still exist, oldest first.
    pub async fn retained_buckets(&self, namespace: &NamespaceId) -> Result<Vec<BucketId>> {
        let floor = floor_before(self.clock.now(), self.config.discovery_window())?;
        let mut conn = self.conn.clone();

        let filetimes: Vec<i64> = conn.zrange(self.keys.bucket_index(namespace), 0, -1).await?;
        let candidates = discoverable(filetimes, floor);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for bucket in &candidates {
            pipe.cmd("EXISTS").arg(self.keys.log(namespace, *bucket));
        }
        let exists = pipe.query_async::<_, Vec<bool>>(&mut conn).await;
        Ok(confirmed(namespace, candidates, exists))
    }

    async fn append(
        &self,
        namespace: &NamespaceId,
        bucket: &RefBucket,
        key: IoHashKey,
        blob: Option<BlobId>,
        op: ReplicationOp,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(BucketId, EventId)> {
        let now = self.clock.now();
        let timestamp = timestamp.unwrap_or(now);
        let time_bucket = BucketId::from_timestamp(timestamp)?;
        let expire_at = chrono::Duration::from_std(self.config.retention)
            .ok()
            .and_then(|retention| retention.checked_add(&chrono::Duration::hours(1)))
            .and_then(|ttl| time_bucket.start().checked_add_signed(ttl))
            .ok_or_else(|| ReplogError::configuration("Retention reaches past the bucket range"))?
            .timestamp();
        let index_floor = floor_before(now, self.config.max_discovery_window)?;
        let event_id = self.ids.generate(timestamp);

        let event = ReplicationLogEvent {
            namespace: namespace.clone(),
            bucket: bucket.clone(),
            key,
            blob,
            event_id,
            time_bucket,
            timestamp,
            op,
        };
        let member = encode_member(&event)?;

        let log_key = self.keys.log(namespace, time_bucket);
        let index_key = self.keys.bucket_index(namespace);

        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .cmd("SADD").arg(self.keys.namespaces()).arg(namespace.as_str()).ignore()
            .cmd("ZADD").arg(&log_key).arg(0).arg(&member).ignore()
            .cmd("EXPIREAT").arg(&log_key).arg(expire_at).ignore()
            .cmd("ZADD").arg(&index_key).arg(time_bucket.filetime()).arg(time_bucket.filetime()).ignore()
            .cmd("ZREMRANGEBYSCORE").arg(&index_key).arg("-inf").arg(format!("({}", index_floor.filetime())).ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;

        debug!(
            namespace = %namespace,
            bucket = %time_bucket,
            event_id = %event_id,
            op = ?op,
            "Appended replication event"
        );

        Ok((time_bucket, event_id))
    }
}

#[async_trait]
impl ReplicationLog for RedisReplicationLog {
    async fn namespaces(&self) -> Result<Vec<NamespaceId>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(self.keys.namespaces()).await?;
        let mut namespaces = members
            .into_iter()
            .map(NamespaceId::new)
            .collect::<Result<Vec<_>>>()?;
        namespaces.sort();
        Ok(namespaces)
    }

    async fn insert_add(
        &self,
        namespace: &NamespaceId,
        bucket: &RefBucket,
        key: IoHashKey,
        blob: BlobId,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(BucketId, EventId)> {
        self.append(namespace, bucket, key, Some(blob), ReplicationOp::Added, timestamp)
            .await
    }

    async fn insert_delete(
        &self,
        namespace: &NamespaceId,
        bucket: &RefBucket,
        key: IoHashKey,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(BucketId, EventId)> {
        self.append(namespace, bucket, key, None, ReplicationOp::Deleted, timestamp)
            .await
    }

    async fn get(
        &self,
        namespace: &NamespaceId,
        last_bucket: Option<BucketId>,
        last_event: Option<EventId>,
    ) -> Result<EventStream> {
        let mut conn = self.conn.clone();
        let known: bool = conn
            .sismember(self.keys.namespaces(), namespace.as_str())
            .await?;
        if !known {
            return Err(ReplogError::namespace_not_found(namespace));
        }

        let retained = self.retained_buckets(namespace).await?;
        let buckets = resume_from(namespace, retained, last_bucket)?;

        let page_size = self.config.read_page_size.max(1);
        let reads: Vec<(String, String)> = buckets
            .into_iter()
            .map(|bucket| {
                let lower = match (last_bucket, last_event.as_ref()) {
                    (Some(resume), Some(event)) if resume == bucket => resume_bound(event),
                    _ => "-".to_string(),
                };
                (self.keys.log(namespace, bucket), lower)
            })
            .collect();

        let stream = async_stream::stream! {
            for (key, mut lower) in reads {
                loop {
                    let page: redis::RedisResult<Vec<String>> = redis::cmd("ZRANGEBYLEX")
                        .arg(&key)
                        .arg(&lower)
                        .arg("+")
                        .arg("LIMIT")
                        .arg(0)
                        .arg(page_size)
                        .query_async(&mut conn)
                        .await;
                    let page = match page {
                        Ok(page) => page,
                        Err(e) => {
                            yield Err(ReplogError::from(e));
                            return;
                        }
                    };

                    for member in &page {
                        match decode_member(member) {
                            Ok(event) => yield Ok(event),
                            Err(e) => {
                                yield Err(e);
                                return;
                            }
                        }
                    }

                    match page.last() {
                        Some(last) if page.len() == page_size => lower = format!("({}", last),
                        _ => break,
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn add_snapshot(&self, info: SnapshotInfo) -> Result<Vec<SnapshotInfo>> {
        let key = self.keys.snapshots(&info.snapshotted_namespace);
        let json = serde_json::to_string(&info)?;
        let keep = self.config.max_snapshots_per_namespace.max(1) as i64;

        let mut conn = self.conn.clone();
        let (pruned,): (Vec<String>,) = redis::pipe()
            .atomic()
            .cmd("ZADD").arg(&key).arg(info.timestamp.timestamp_millis()).arg(&json).ignore()
            .cmd("ZRANGE").arg(&key).arg(0).arg(-(keep + 1))
            .cmd("ZREMRANGEBYRANK").arg(&key).arg(0).arg(-(keep + 1)).ignore()
            .query_async(&mut conn)
            .await?;

        info!(
            namespace = %info.snapshotted_namespace,
            blob_id = %info.snapshot_blob_id,
            pruned = pruned.len(),
            "Registered snapshot"
        );
        pruned
            .iter()
            .map(|json| serde_json::from_str(json).map_err(ReplogError::from))
            .collect()
    }

    async fn latest_snapshot(&self, namespace: &NamespaceId) -> Result<Option<SnapshotInfo>> {
        let mut conn = self.conn.clone();
        let newest: Vec<String> = conn.zrevrange(self.keys.snapshots(namespace), 0, 0).await?;
        newest
            .first()
            .map(|json| serde_json::from_str(json).map_err(ReplogError::from))
            .transpose()
    }

    async fn snapshots(&self, namespace: &NamespaceId) -> Result<Vec<SnapshotInfo>> {
        let mut conn = self.conn.clone();
        let all: Vec<String> = conn.zrevrange(self.keys.snapshots(namespace), 0, -1).await?;
        all.iter()
            .map(|json| serde_json::from_str(json).map_err(ReplogError::from))
            .collect()
    }

    async fn update_replicator_state(
        &self,
        namespace: &NamespaceId,
        replicator: &str,
        state: ReplicatorState,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(&state)?;
        conn.hset::<_, _, _, ()>(self.keys.replicators(namespace), replicator, json)
            .await?;
        Ok(())
    }

    async fn replicator_state(
        &self,
        namespace: &NamespaceId,
        replicator: &str,
    ) -> Result<Option<ReplicatorState>> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.hget(self.keys.replicators(namespace), replicator).await?;
        json.map(|json| serde_json::from_str(&json).map_err(ReplogError::from))
            .transpose()
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
