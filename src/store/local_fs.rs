//! Local filesystem cloud store for development
//!
//! ETags are derived from file metadata (modification time in nanoseconds and
//! length). Writes go to a temp file first and are renamed into place, so a
//! reader never sees a half-written object.

use crate::store::{clamp_range, CloudStore, ETag, StoreFuture, WriteReceipt};
use bytes::Bytes;
use std::fs::Metadata;
use std::io::{ErrorKind, Result as IoResult, SeekFrom};
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Local filesystem cloud store
#[derive(Debug, Clone)]
pub struct LocalFsCloudStore {
    base_path: PathBuf,
}

impl LocalFsCloudStore {
    /// Create a new local filesystem store rooted at `base_path`
    pub fn new(base_path: PathBuf) -> Self {
        LocalFsCloudStore { base_path }
    }

    /// Get the base path (for testing)
    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    fn full_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }

    fn etag_of(metadata: &Metadata) -> ETag {
        let mtime_nanos = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        format!("{:x}-{:x}", mtime_nanos, metadata.len())
    }

    async fn current_etag(&self, key: &str) -> IoResult<Option<ETag>> {
        match tokio::fs::metadata(self.full_path(key)).await {
            Ok(meta) => Ok(Some(Self::etag_of(&meta))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl CloudStore for LocalFsCloudStore {
    fn write_with_etag<'a>(&'a self, path: &'a str, data: Bytes) -> StoreFuture<'a, WriteReceipt> {
        Box::pin(async move {
            let target = self.full_path(path);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let temp = target.with_extension(format!("tmp-{:016x}", rand::random::<u64>()));
            tokio::fs::write(&temp, &data).await?;
            tokio::fs::rename(&temp, &target).await?;

            let meta = tokio::fs::metadata(&target).await?;
            Ok(WriteReceipt {
                etag: Self::etag_of(&meta),
                size_bytes: meta.len(),
            })
        })
    }

    fn read_with_etag<'a>(&'a self, path: &'a str, etag: &'a str) -> StoreFuture<'a, Option<Bytes>> {
        Box::pin(async move {
            if self.current_etag(path).await?.as_deref() != Some(etag) {
                return Ok(None);
            }
            let data = match tokio::fs::read(self.full_path(path)).await {
                Ok(data) => data,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e),
            };
            // Replaced between the metadata check and the read
            if self.current_etag(path).await?.as_deref() != Some(etag) {
                return Ok(None);
            }
            Ok(Some(Bytes::from(data)))
        })
    }

    fn read_range_with_etag<'a>(
        &'a self,
        path: &'a str,
        etag: &'a str,
        start: u64,
        end: u64,
    ) -> StoreFuture<'a, Option<Bytes>> {
        Box::pin(async move {
            let mut file = match tokio::fs::File::open(self.full_path(path)).await {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e),
            };
            let meta = file.metadata().await?;
            if Self::etag_of(&meta) != etag {
                return Ok(None);
            }

            let range = clamp_range(meta.len() as usize, start, end);
            let mut buf = vec![0u8; range.len()];
            file.seek(SeekFrom::Start(range.start as u64)).await?;
            file.read_exact(&mut buf).await?;
            Ok(Some(Bytes::from(buf)))
        })
    }

    fn try_get_etag<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Option<ETag>> {
        Box::pin(async move { self.current_etag(path).await })
    }

    fn get_size<'a>(&'a self, path: &'a str) -> StoreFuture<'a, u64> {
        Box::pin(async move { Ok(tokio::fs::metadata(self.full_path(path)).await?.len()) })
    }

    fn delete<'a>(&'a self, path: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            match tokio::fs::remove_file(self.full_path(path)).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()), // Already deleted
                Err(e) => Err(e),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_localfs_write_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsCloudStore::new(dir.path().to_path_buf());

        let receipt = store
            .write_with_etag("flows/part-1", Bytes::from_static(b"hello world"))
            .await
            .unwrap();
        assert_eq!(receipt.size_bytes, 11);
        assert_eq!(
            store.try_get_etag("flows/part-1").await.unwrap(),
            Some(receipt.etag.clone())
        );

        let data = store
            .read_with_etag("flows/part-1", &receipt.etag)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&data[..], b"hello world");

        let range = store
            .read_range_with_etag("flows/part-1", &receipt.etag, 6, 100)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&range[..], b"world");
    }

    #[tokio::test]
    async fn test_localfs_rejects_wrong_etag() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsCloudStore::new(dir.path().to_path_buf());

        store
            .write_with_etag("k", Bytes::from_static(b"data"))
            .await
            .unwrap();
        assert!(store.read_with_etag("k", "bogus").await.unwrap().is_none());
        assert!(store
            .read_range_with_etag("k", "bogus", 0, 2)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_localfs_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsCloudStore::new(dir.path().to_path_buf());

        store
            .write_with_etag("k", Bytes::from_static(b"data"))
            .await
            .unwrap();
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert!(store.try_get_etag("k").await.unwrap().is_none());
    }
}
