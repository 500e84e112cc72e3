//! Hour-granularity time buckets and event id generation.
//!
//! A bucket is the timestamp truncated to the top of the hour. Its external
//! label is `rep-<filetime>`, where filetime counts 100ns ticks since
//! 1601-01-01 UTC. The label is opaque: ordering always uses the number.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU16, Ordering};

use crate::error::{ReplogError, Result};
use crate::types::EventId;

const LABEL_PREFIX: &str = "rep-";

/// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_OFFSET_SECS: i64 = 11_644_473_600;
const TICKS_PER_SECOND: i64 = 10_000_000;
const SECONDS_PER_HOUR: i64 = 3600;
const TICKS_PER_HOUR: i64 = TICKS_PER_SECOND * SECONDS_PER_HOUR;

// ═══════════════════════════════════════════════════════════════════════════════
// Bucket Id
// ═══════════════════════════════════════════════════════════════════════════════

/// Partition key of the event log.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketId {
    filetime: i64,
}

impl BucketId {
    /// Bucket containing `timestamp`.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when the hour start has no filetime representation.
    pub fn from_timestamp(timestamp: DateTime<Utc>) -> Result<Self> {
        let secs = timestamp.timestamp();
        let hour_start = secs - secs.rem_euclid(SECONDS_PER_HOUR);
        hour_start
            .checked_add(FILETIME_UNIX_OFFSET_SECS)
            .and_then(|secs| secs.checked_mul(TICKS_PER_SECOND))
            .map(|filetime| Self { filetime })
            .ok_or_else(|| {
                ReplogError::invalid_input(format!("Timestamp {} is outside the bucket range", timestamp.to_rfc3339()))
            })
    }

    /// Bucket from its numeric form; must sit on an hour boundary.
    pub fn from_filetime(filetime: i64) -> Result<Self> {
        if filetime.rem_euclid(TICKS_PER_HOUR) != 0 {
            return Err(ReplogError::invalid_input(format!(
                "Filetime {} is not aligned to an hour",
                filetime
            )));
        }
        Ok(Self { filetime })
    }

    /// Parse a `rep-<filetime>` label.
    pub fn parse(label: &str) -> Result<Self> {
        let digits = label.strip_prefix(LABEL_PREFIX).ok_or_else(|| {
            ReplogError::invalid_input(format!("Bucket label {} must start with {}", label, LABEL_PREFIX))
        })?;
        let filetime: i64 = digits
            .parse()
            .map_err(|_| ReplogError::invalid_input(format!("Bucket label {} is not numeric", label)))?;
        Self::from_filetime(filetime)
    }

    pub fn filetime(&self) -> i64 {
        self.filetime
    }

    /// First instant covered by this bucket.
    pub fn start(&self) -> DateTime<Utc> {
        let unix_secs = self.filetime / TICKS_PER_SECOND - FILETIME_UNIX_OFFSET_SECS;
        Utc.timestamp_opt(unix_secs, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    pub fn label(&self) -> String {
        format!("{}{}", LABEL_PREFIX, self.filetime)
    }

    pub fn next(&self) -> Self {
        Self {
            filetime: self.filetime + TICKS_PER_HOUR,
        }
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", LABEL_PREFIX, self.filetime)
    }
}

impl fmt::Debug for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BucketId({}, {})", self.label(), self.start().to_rfc3339())
    }
}

impl FromStr for BucketId {
    type Err = ReplogError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for BucketId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label())
    }
}

impl<'de> Deserialize<'de> for BucketId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Event Id Generation
// ═══════════════════════════════════════════════════════════════════════════════

/// Generates UUIDv7-layout event ids.
///
/// Layout: 48 bits of unix milliseconds from the event timestamp, a 12-bit
/// process-local sequence, then random bits. Ids from one writer within one
/// millisecond stay ordered until the sequence wraps; ids from different
/// writers are unique but only ordered to the millisecond.
#[derive(Debug, Default)]
pub struct EventIdGenerator {
    sequence: AtomicU16,
}

impl EventIdGenerator {
    pub const fn new() -> Self {
        Self {
            sequence: AtomicU16::new(0),
        }
    }

    pub fn generate(&self, timestamp: DateTime<Utc>) -> EventId {
        let millis = timestamp.timestamp_millis().max(0) as u64;
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) & 0x0FFF;
        let noise = uuid::Uuid::new_v4();

        let mut random = [0u8; 10];
        random[0] = (sequence >> 8) as u8;
        random[1] = (sequence & 0xFF) as u8;
        random[2..].copy_from_slice(&noise.as_bytes()[..8]);

        EventId(uuid::Builder::from_unix_timestamp_millis(millis, &random).into_uuid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 17, h, m, s).unwrap()
    }

    #[test]
    fn test_bucket_truncates_to_hour() {
        let a = BucketId::from_timestamp(at(10, 0, 0)).unwrap();
        let b = BucketId::from_timestamp(at(10, 59, 59)).unwrap();
        let c = BucketId::from_timestamp(at(11, 0, 0)).unwrap();
        assert_eq!(a, b);
        assert!(a < c);
        assert_eq!(a.start(), at(10, 0, 0));
        assert_eq!(a.next(), c);
    }

    #[test]
    fn test_label_round_trip_and_filetime() {
        let epoch = BucketId::from_timestamp(DateTime::<Utc>::UNIX_EPOCH).unwrap();
        assert_eq!(epoch.label(), "rep-116444736000000000");

        let bucket = BucketId::from_timestamp(at(13, 30, 0)).unwrap();
        assert_eq!(BucketId::parse(&bucket.label()).unwrap(), bucket);
    }

    #[test]
    fn test_label_rejects_garbage() {
        assert!(BucketId::parse("116444736000000000").is_err());
        assert!(BucketId::parse("rep-abc").is_err());
        // not on an hour boundary
        assert!(BucketId::parse("rep-116444736000000001").is_err());
    }

    #[test]
    fn test_ordering_is_numeric_not_lexicographic() {
        // "rep-324..." sorts after "rep-108..." as a string but is earlier in time.
        let early = BucketId::from_filetime(9 * TICKS_PER_HOUR).unwrap();
        let late = BucketId::from_filetime(30 * TICKS_PER_HOUR).unwrap();
        assert!(early.label() > late.label());
        assert!(early < late);
    }

    #[test]
    fn test_far_future_timestamp_is_rejected() {
        let far = Utc.with_ymd_and_hms(40000, 1, 1, 0, 0, 0).unwrap();
        let err = BucketId::from_timestamp(far).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidInput);

        let far_past = Utc.with_ymd_and_hms(-40000, 1, 1, 0, 0, 0).unwrap();
        assert!(BucketId::from_timestamp(far_past).is_err());
    }

    #[test]
    fn test_event_ids_sort_by_time_and_sequence() {
        let generator = EventIdGenerator::new();
        let t0 = at(10, 0, 0);
        let a = generator.generate(t0);
        let b = generator.generate(t0);
        let c = generator.generate(t0 + Duration::seconds(1));
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a.0.get_version_num(), 7);
    }
}
