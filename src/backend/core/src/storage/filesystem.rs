//! Filesystem blob and ref store.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<namespace>/blobs/<hex[0..2]>/<hex>
//! <root>/<namespace>/refs/<ref bucket>/<key hex>     (file holds the blob hex)
//! ```
//!
//! Writes go to a temp file in the target directory and are renamed into
//! place, so readers never see a partial blob.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{BlobReader, BlobStore, BufferedPayload, RefStore};
use crate::error::{ReplogError, Result};
use crate::types::{BlobId, IoHashKey, NamespaceId, RefBucket};

pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, namespace: &NamespaceId, blob: &BlobId) -> Result<PathBuf> {
        let hex = blob.to_hex();
        Ok(self
            .root
            .join(path_segment("namespace", namespace.as_str())?)
            .join("blobs")
            .join(&hex[..2])
            .join(hex))
    }

    fn ref_path(&self, namespace: &NamespaceId, bucket: &RefBucket, key: &IoHashKey) -> Result<PathBuf> {
        Ok(self
            .root
            .join(path_segment("namespace", namespace.as_str())?)
            .join("refs")
            .join(path_segment("ref bucket", bucket.as_str())?)
            .join(key.to_hex()))
    }
}

/// Reject names that would leave their directory.
fn path_segment<'a>(kind: &str, value: &'a str) -> Result<&'a str> {
    if value.contains(['/', '\\']) || value == "." || value == ".." {
        return Err(ReplogError::invalid_input(format!(
            "{} {} is not a valid path segment",
            kind, value
        )));
    }
    Ok(value)
}

/// Write `source` to `target` through a sibling temp file and a rename.
fn persist_copy(source: &Path, target: &Path) -> Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| ReplogError::internal(format!("{} has no parent directory", target.display())))?;
    std::fs::create_dir_all(parent)?;
    let temp = tempfile::NamedTempFile::new_in(parent)?;
    std::fs::copy(source, temp.path())?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|e| ReplogError::from(e.error))?;
    Ok(())
}

fn persist_bytes(bytes: &[u8], target: &Path) -> Result<()> {
    use std::io::Write;

    let parent = target
        .parent()
        .ok_or_else(|| ReplogError::internal(format!("{} has no parent directory", target.display())))?;
    std::fs::create_dir_all(parent)?;
    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|e| ReplogError::from(e.error))?;
    Ok(())
}

#[async_trait]
impl BlobStore for FilesystemStore {
    async fn put_blob(&self, namespace: &NamespaceId, payload: &BufferedPayload) -> Result<BlobId> {
        let blob = payload.blob_id();
        let target = self.blob_path(namespace, &blob)?;
        if tokio::fs::try_exists(&target).await? {
            return Ok(blob);
        }

        let source = payload.path().to_path_buf();
        tokio::task::spawn_blocking(move || persist_copy(&source, &target)).await??;

        debug!(namespace = %namespace, blob_id = %blob, size = payload.len(), "Stored blob");
        Ok(blob)
    }

    async fn get_blob(&self, namespace: &NamespaceId, blob: &BlobId) -> Result<BlobReader> {
        match tokio::fs::File::open(self.blob_path(namespace, blob)?).await {
            Ok(file) => Ok(Box::pin(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ReplogError::blob_not_found(namespace, blob)),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, namespace: &NamespaceId, blob: &BlobId) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.blob_path(namespace, blob)?).await?)
    }

    fn name(&self) -> &'static str {
        "filesystem"
    }
}

#[async_trait]
impl RefStore for FilesystemStore {
    async fn put_ref(
        &self,
        namespace: &NamespaceId,
        bucket: &RefBucket,
        key: IoHashKey,
        blob: BlobId,
    ) -> Result<Vec<BlobId>> {
        let target = self.ref_path(namespace, bucket, &key)?;
        let body = blob.to_hex();
        tokio::task::spawn_blocking(move || persist_bytes(body.as_bytes(), &target)).await??;

        if self.exists(namespace, &blob).await? {
            Ok(Vec::new())
        } else {
            Ok(vec![blob])
        }
    }

    async fn get_ref(
        &self,
        namespace: &NamespaceId,
        bucket: &RefBucket,
        key: IoHashKey,
    ) -> Result<Option<BlobId>> {
        match tokio::fs::read_to_string(self.ref_path(namespace, bucket, &key)?).await {
            Ok(hex) => Ok(Some(hex.trim().parse()?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_ref(&self, namespace: &NamespaceId, bucket: &RefBucket, key: IoHashKey) -> Result<bool> {
        match tokio::fs::remove_file(self.ref_path(namespace, bucket, &key)?).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
