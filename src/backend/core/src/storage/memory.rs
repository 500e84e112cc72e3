//! In-memory blob and ref store for tests and single-process setups.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use super::{BlobReader, BlobStore, BufferedPayload, RefStore};
use crate::error::{ReplogError, Result};
use crate::types::{BlobId, IoHashKey, NamespaceId, RefBucket};

#[derive(Default)]
pub struct InMemoryStore {
    blobs: DashMap<(NamespaceId, BlobId), Arc<Vec<u8>>>,
    refs: DashMap<(NamespaceId, RefBucket, IoHashKey), BlobId>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs held across namespaces.
    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }

    /// Number of refs held across namespaces.
    pub fn ref_count(&self) -> usize {
        self.refs.len()
    }

    /// Store raw bytes directly, bypassing a scratch file.
    pub fn insert_bytes(&self, namespace: &NamespaceId, data: Vec<u8>) -> BlobId {
        let blob = BlobId::from_content(&data);
        self.blobs.insert((namespace.clone(), blob), Arc::new(data));
        blob
    }
}

#[async_trait]
impl BlobStore for InMemoryStore {
    async fn put_blob(&self, namespace: &NamespaceId, payload: &BufferedPayload) -> Result<BlobId> {
        let data = tokio::fs::read(payload.path()).await?;
        let blob = payload.blob_id();
        self.blobs.insert((namespace.clone(), blob), Arc::new(data));
        Ok(blob)
    }

    async fn get_blob(&self, namespace: &NamespaceId, blob: &BlobId) -> Result<BlobReader> {
        let data = self
            .blobs
            .get(&(namespace.clone(), *blob))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ReplogError::blob_not_found(namespace, blob))?;
        Ok(Box::pin(std::io::Cursor::new(data.as_ref().clone())))
    }

    async fn exists(&self, namespace: &NamespaceId, blob: &BlobId) -> Result<bool> {
        Ok(self.blobs.contains_key(&(namespace.clone(), *blob)))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl RefStore for InMemoryStore {
    async fn put_ref(
        &self,
        namespace: &NamespaceId,
        bucket: &RefBucket,
        key: IoHashKey,
        blob: BlobId,
    ) -> Result<Vec<BlobId>> {
        self.refs
            .insert((namespace.clone(), bucket.clone(), key), blob);
        if self.blobs.contains_key(&(namespace.clone(), blob)) {
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
        Ok(self
            .refs
            .get(&(namespace.clone(), bucket.clone(), key))
            .map(|entry| *entry.value()))
    }

    async fn delete_ref(&self, namespace: &NamespaceId, bucket: &RefBucket, key: IoHashKey) -> Result<bool> {
        Ok(self.refs.remove(&(namespace.clone(), bucket.clone(), key)).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn ns() -> NamespaceId {
        NamespaceId::new("replication-snapshots").unwrap()
    }

    #[tokio::test]
    async fn test_put_get_blob() {
        let store = InMemoryStore::new();
        let payload = BufferedPayload::from_reader(&b"blob body"[..], None).await.unwrap();
        let blob = store.put_blob(&ns(), &payload).await.unwrap();
        assert!(store.exists(&ns(), &blob).await.unwrap());

        let mut body = Vec::new();
        store.get_blob(&ns(), &blob).await.unwrap().read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"blob body");
    }

    #[tokio::test]
    async fn test_missing_blob() {
        let store = InMemoryStore::new();
        let err = store
            .get_blob(&ns(), &BlobId::from_bytes([9; 20]))
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), crate::error::ErrorCode::BlobNotFound);
    }

    #[tokio::test]
    async fn test_put_ref_reports_missing_blob() {
        let store = InMemoryStore::new();
        let bucket = RefBucket::new("snapshots").unwrap();
        let key = IoHashKey::from_bytes([1; 20]);

        let absent = BlobId::from_bytes([4; 20]);
        assert_eq!(store.put_ref(&ns(), &bucket, key, absent).await.unwrap(), vec![absent]);

        let present = store.insert_bytes(&ns(), b"present".to_vec());
        assert!(store.put_ref(&ns(), &bucket, key, present).await.unwrap().is_empty());
        assert_eq!(store.get_ref(&ns(), &bucket, key).await.unwrap(), Some(present));

        assert!(store.delete_ref(&ns(), &bucket, key).await.unwrap());
        assert!(!store.delete_ref(&ns(), &bucket, key).await.unwrap());
        assert_eq!(store.get_ref(&ns(), &bucket, key).await.unwrap(), None);
        assert!(store.exists(&ns(), &present).await.unwrap());
    }
}
