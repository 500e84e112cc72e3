//! Blob and ref storage seams consumed by the snapshot builder.
//!
//! - **BlobStore**: content-addressed blobs keyed by (namespace, blob id)
//! - **RefStore**: named pointers to blobs; a ref keeps its blob alive for GC
//! - **BufferedPayload**: a stream spooled to a local scratch file

pub mod filesystem;
pub mod memory;
pub mod payload;

pub use filesystem::FilesystemStore;
pub use memory::InMemoryStore;
pub use payload::{scratch_file, BufferedPayload};

use async_trait::async_trait;
use std::pin::Pin;
use tokio::io::AsyncRead;

use crate::error::Result;
use crate::types::{BlobId, IoHashKey, NamespaceId, RefBucket};

/// Readable body of a stored blob.
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

// ═══════════════════════════════════════════════════════════════════════════════
// Blob Store Trait
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `payload` under its content address.
    async fn put_blob(&self, namespace: &NamespaceId, payload: &BufferedPayload) -> Result<BlobId>;

    /// Open a stored blob.
    ///
    /// # Errors
    ///
    /// `BlobNotFound` when the blob is not present.
    async fn get_blob(&self, namespace: &NamespaceId, blob: &BlobId) -> Result<BlobReader>;

    async fn exists(&self, namespace: &NamespaceId, blob: &BlobId) -> Result<bool>;

    /// Get the store name.
    fn name(&self) -> &'static str;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Ref Store Trait
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
pub trait RefStore: Send + Sync {
    /// Point `key` in `bucket` at `blob`.
    ///
    /// Returns the referenced blobs that are not present in blob storage; an
    /// empty list means the ref is fully backed.
    async fn put_ref(
        &self,
        namespace: &NamespaceId,
        bucket: &RefBucket,
        key: IoHashKey,
        blob: BlobId,
    ) -> Result<Vec<BlobId>>;

    async fn get_ref(
        &self,
        namespace: &NamespaceId,
        bucket: &RefBucket,
        key: IoHashKey,
    ) -> Result<Option<BlobId>>;

    /// Remove a ref, leaving its blob to garbage collection.
    ///
    /// Returns whether the ref existed.
    async fn delete_ref(&self, namespace: &NamespaceId, bucket: &RefBucket, key: IoHashKey) -> Result<bool>;
}
