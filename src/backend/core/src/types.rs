//! Identifier types shared by the log, the snapshot format and the storage seams.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{ReplogError, Result};

/// Byte length of ref keys and blob hashes.
pub const HASH_LEN: usize = 20;

// =============================================================================
// Namespaces and ref buckets
// =============================================================================

/// Tenant-scoped partition containing refs and their mutation log.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamespaceId(String);

impl NamespaceId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(ReplogError::invalid_input("Namespace must not be empty"));
        }
        // ':' separates key segments in the Redis backend.
        if id.contains(':') {
            return Err(ReplogError::invalid_input(format!(
                "Namespace {} must not contain ':'",
                id
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NamespaceId {
    type Err = ReplogError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Logical sub-category of refs within a namespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefBucket(String);

impl RefBucket {
    pub fn new(bucket: impl Into<String>) -> Result<Self> {
        let bucket = bucket.into();
        if bucket.is_empty() {
            return Err(ReplogError::invalid_input("Ref bucket must not be empty"));
        }
        Ok(Self(bucket))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RefBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RefBucket {
    type Err = ReplogError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

// =============================================================================
// 20-byte hashes
// =============================================================================

macro_rules! hash_type {
    ($(#[$meta:meta])* $name:ident, $what:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name([u8; HASH_LEN]);

        impl $name {
            pub const fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
                Self(bytes)
            }

            pub fn from_slice(bytes: &[u8]) -> Result<Self> {
                let array: [u8; HASH_LEN] = bytes.try_into().map_err(|_| {
                    ReplogError::invalid_input(format!(
                        concat!($what, " must be {} bytes, got {}"),
                        HASH_LEN,
                        bytes.len()
                    ))
                })?;
                Ok(Self(array))
            }

            pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl FromStr for $name {
            type Err = ReplogError;

            fn from_str(s: &str) -> Result<Self> {
                let bytes = hex::decode(s).map_err(|e| {
                    ReplogError::invalid_input(format!(concat!("Invalid ", $what, " {}: {}"), s, e))
                })?;
                Self::from_slice(&bytes)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.to_hex())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

hash_type!(
    /// Key of a ref within a ref bucket.
    IoHashKey,
    "ref key"
);

hash_type!(
    /// Content hash of a blob.
    BlobId,
    "blob id"
);

impl BlobId {
    /// Content address of `data`: BLAKE3 truncated to 20 bytes.
    pub fn from_content(data: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(data);
        Self::from_hasher(&hasher)
    }

    pub(crate) fn from_hasher(hasher: &blake3::Hasher) -> Self {
        let digest = hasher.finalize();
        let mut bytes = [0u8; HASH_LEN];
        bytes.copy_from_slice(&digest.as_bytes()[..HASH_LEN]);
        Self(bytes)
    }
}

impl From<BlobId> for IoHashKey {
    fn from(blob: BlobId) -> Self {
        Self(*blob.as_bytes())
    }
}

// =============================================================================
// Event ids
// =============================================================================

/// Time-ordered, globally unique identifier of a log event.
///
/// Byte order equals time order (see [`crate::replication::bucket::EventIdGenerator`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub uuid::Uuid);

impl EventId {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// 32 lowercase hex characters; sorts the same way as the bytes.
    pub fn to_simple_hex(&self) -> String {
        self.0.simple().to_string()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = ReplogError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(Self(uuid::Uuid::parse_str(s)?))
    }
}
