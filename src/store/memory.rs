//! In-memory cloud store for unit tests and deterministic simulation

use crate::store::{clamp_range, CloudStore, ETag, StoreFuture, WriteReceipt};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::{Error as IoError, ErrorKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    etag: ETag,
}

#[derive(Debug, Default)]
struct Inner {
    objects: RwLock<HashMap<String, StoredObject>>,
    /// Bumped on every write; ETags are never reused, even for identical bytes
    generation: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

/// In-memory cloud store
///
/// Clones share the same object map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCloudStore {
    inner: Arc<Inner>,
}

impl InMemoryCloudStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored objects (for testing)
    pub fn len(&self) -> usize {
        self.inner.objects.read().len()
    }

    /// Check if empty (for testing)
    pub fn is_empty(&self) -> bool {
        self.inner.objects.read().is_empty()
    }

    /// Whether an object exists at `path` (for testing)
    pub fn contains(&self, path: &str) -> bool {
        self.inner.objects.read().contains_key(path)
    }

    /// Total successful writes since creation
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::Relaxed)
    }

    /// Total delete calls since creation
    pub fn delete_count(&self) -> u64 {
        self.inner.deletes.load(Ordering::Relaxed)
    }

    /// Paths of all stored objects, sorted
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.inner.objects.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    fn next_etag(&self, data: &[u8]) -> ETag {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{:08x}-{}", crc32fast::hash(data), generation)
    }

    fn matching(&self, path: &str, etag: &str) -> Option<Bytes> {
        self.inner
            .objects
            .read()
            .get(path)
            .filter(|obj| obj.etag == etag)
            .map(|obj| obj.data.clone())
    }
}

impl CloudStore for InMemoryCloudStore {
    fn write_with_etag<'a>(&'a self, path: &'a str, data: Bytes) -> StoreFuture<'a, WriteReceipt> {
        Box::pin(async move {
            let etag = self.next_etag(&data);
            let size_bytes = data.len() as u64;
            self.inner.objects.write().insert(
                path.to_string(),
                StoredObject {
                    data,
                    etag: etag.clone(),
                },
            );
            self.inner.writes.fetch_add(1, Ordering::Relaxed);
            Ok(WriteReceipt { etag, size_bytes })
        })
    }

    fn read_with_etag<'a>(&'a self, path: &'a str, etag: &'a str) -> StoreFuture<'a, Option<Bytes>> {
        Box::pin(async move { Ok(self.matching(path, etag)) })
    }

    fn read_range_with_etag<'a>(
        &'a self,
        path: &'a str,
        etag: &'a str,
        start: u64,
        end: u64,
    ) -> StoreFuture<'a, Option<Bytes>> {
        Box::pin(async move {
            Ok(self
                .matching(path, etag)
                .map(|data| data.slice(clamp_range(data.len(), start, end))))
        })
    }

    fn try_get_etag<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Option<ETag>> {
        Box::pin(async move { Ok(self.inner.objects.read().get(path).map(|o| o.etag.clone())) })
    }

    fn get_size<'a>(&'a self, path: &'a str) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            self.inner
                .objects
                .read()
                .get(path)
                .map(|obj| obj.data.len() as u64)
                .ok_or_else(|| IoError::new(ErrorKind::NotFound, format!("Key not found: {}", path)))
        })
    }

    fn delete<'a>(&'a self, path: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.inner.deletes.fetch_add(1, Ordering::Relaxed);
            self.inner.objects.write().remove(path);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inmemory_write_read() {
        let store = InMemoryCloudStore::new();

        let receipt = store
            .write_with_etag("test/key1", Bytes::from_static(b"hello world"))
            .await
            .unwrap();
        assert_eq!(receipt.size_bytes, 11);

        let data = store.read_with_etag("test/key1", &receipt.etag).await.unwrap();
        assert_eq!(data.as_deref(), Some(&b"hello world"[..]));
    }

    #[tokio::test]
    async fn test_inmemory_etag_mismatch() {
        let store = InMemoryCloudStore::new();

        let first = store
            .write_with_etag("k", Bytes::from_static(b"data"))
            .await
            .unwrap();
        let second = store
            .write_with_etag("k", Bytes::from_static(b"data"))
            .await
            .unwrap();

        // Same bytes, new generation
        assert_ne!(first.etag, second.etag);
        assert!(store.read_with_etag("k", &first.etag).await.unwrap().is_none());
        assert!(store.read_with_etag("k", &second.etag).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_inmemory_range_read() {
        let store = InMemoryCloudStore::new();
        let receipt = store
            .write_with_etag("k", Bytes::from_static(b"0123456789"))
            .await
            .unwrap();

        let slice = store
            .read_range_with_etag("k", &receipt.etag, 3, 7)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&slice[..], b"3456");

        let tail = store
            .read_range_with_etag("k", &receipt.etag, 8, 100)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&tail[..], b"89");
    }

    #[tokio::test]
    async fn test_inmemory_delete_is_idempotent() {
        let store = InMemoryCloudStore::new();
        store
            .write_with_etag("k", Bytes::from_static(b"data"))
            .await
            .unwrap();

        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();

        assert!(store.try_get_etag("k").await.unwrap().is_none());
        assert!(store.get_size("k").await.is_err());
        assert_eq!(store.delete_count(), 2);
    }
}
