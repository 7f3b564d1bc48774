//! S3 Cloud Store Implementation
//!
//! Uses the `object_store` crate from the Arrow ecosystem. ETags come from the
//! service itself and reads are issued with `If-Match`, so a replaced object is
//! reported as a mismatch by S3 rather than by a separate metadata probe.
//!
//! Supports:
//! - AWS S3
//! - S3-compatible services (MinIO, LocalStack, etc.)
//! - Custom endpoints

use crate::config::S3Config;
use crate::store::{CloudStore, ETag, StoreFuture, WriteReceipt};
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{GetOptions, GetRange, ObjectStore as ObjectStoreTrait, PutPayload};
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::sync::Arc;

/// S3 cloud store for production deployments
#[derive(Clone)]
pub struct S3CloudStore {
    store: Arc<dyn ObjectStoreTrait>,
    prefix: String,
}

impl S3CloudStore {
    /// Create a new S3 store
    ///
    /// Credentials come from `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`.
    pub fn new(config: S3Config) -> IoResult<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region);

        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        builder = builder
            .with_access_key_id(std::env::var("AWS_ACCESS_KEY_ID").unwrap_or_default())
            .with_secret_access_key(std::env::var("AWS_SECRET_ACCESS_KEY").unwrap_or_default());

        let store = builder.build().map_err(|e| {
            IoError::new(
                ErrorKind::InvalidInput,
                format!("Failed to create S3 store: {}", e),
            )
        })?;

        Ok(S3CloudStore {
            store: Arc::new(store),
            prefix: config.prefix,
        })
    }

    /// Create from an existing object store (for testing)
    pub fn from_store(store: Arc<dyn ObjectStoreTrait>, prefix: String) -> Self {
        S3CloudStore { store, prefix }
    }

    fn full_path(&self, key: &str) -> ObjectPath {
        if self.prefix.is_empty() {
            ObjectPath::from(key)
        } else {
            ObjectPath::from(format!("{}/{}", self.prefix, key))
        }
    }

    fn map_error(err: object_store::Error) -> IoError {
        match &err {
            object_store::Error::NotFound { .. } => IoError::new(ErrorKind::NotFound, err.to_string()),
            object_store::Error::AlreadyExists { .. } => {
                IoError::new(ErrorKind::AlreadyExists, err.to_string())
            }
            _ => IoError::new(ErrorKind::Other, err.to_string()),
        }
    }

    async fn conditional_get(&self, key: &str, options: GetOptions) -> IoResult<Option<Bytes>> {
        match self.store.get_opts(&self.full_path(key), options).await {
            Ok(result) => Ok(Some(result.bytes().await.map_err(Self::map_error)?)),
            Err(object_store::Error::NotFound { .. })
            | Err(object_store::Error::Precondition { .. }) => Ok(None),
            Err(e) => Err(Self::map_error(e)),
        }
    }
}

impl std::fmt::Debug for S3CloudStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3CloudStore")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl CloudStore for S3CloudStore {
    fn write_with_etag<'a>(&'a self, path: &'a str, data: Bytes) -> StoreFuture<'a, WriteReceipt> {
        Box::pin(async move {
            let size_bytes = data.len() as u64;
            let result = self
                .store
                .put(&self.full_path(path), PutPayload::from(data))
                .await
                .map_err(Self::map_error)?;
            let etag = result.e_tag.ok_or_else(|| {
                IoError::new(ErrorKind::Other, format!("S3 returned no ETag for {}", path))
            })?;
            Ok(WriteReceipt { etag, size_bytes })
        })
    }

    fn read_with_etag<'a>(&'a self, path: &'a str, etag: &'a str) -> StoreFuture<'a, Option<Bytes>> {
        Box::pin(async move {
            let options = GetOptions {
                if_match: Some(etag.to_string()),
                ..Default::default()
            };
            self.conditional_get(path, options).await
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
            let size = match self.store.head(&self.full_path(path)).await {
                Ok(meta) => meta.size as u64,
                Err(object_store::Error::NotFound { .. }) => return Ok(None),
                Err(e) => return Err(Self::map_error(e)),
            };
            let end = end.min(size);
            let start = start.min(end);
            if start == end {
                // Zero-length ranges are rejected by S3; validate the ETag only
                return Ok(self
                    .try_get_etag(path)
                    .await?
                    .filter(|current| current == etag)
                    .map(|_| Bytes::new()));
            }
            let options = GetOptions {
                if_match: Some(etag.to_string()),
                range: Some(GetRange::Bounded(start as usize..end as usize)),
                ..Default::default()
            };
            self.conditional_get(path, options).await
        })
    }

    fn try_get_etag<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Option<ETag>> {
        Box::pin(async move {
            match self.store.head(&self.full_path(path)).await {
                Ok(meta) => Ok(meta.e_tag),
                Err(object_store::Error::NotFound { .. }) => Ok(None),
                Err(e) => Err(Self::map_error(e)),
            }
        })
    }

    fn get_size<'a>(&'a self, path: &'a str) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            let meta = self
                .store
                .head(&self.full_path(path))
                .await
                .map_err(Self::map_error)?;
            Ok(meta.size as u64)
        })
    }

    fn delete<'a>(&'a self, path: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            // S3 delete is idempotent - ignore not found errors
            match self.store.delete(&self.full_path(path)).await {
                Ok(()) => Ok(()),
                Err(object_store::Error::NotFound { .. }) => Ok(()),
                Err(e) => Err(Self::map_error(e)),
            }
        })
    }
}
