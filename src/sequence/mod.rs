//! Persisted Sequence
//!
//! One store object plus the ETag it was written (or attached) with. Iteration
//! is lazy and replayable: every `to_stream` call re-opens the object, and the
//! open fails with `StaleData` when the object no longer matches the ETag.
//!
//! ## Write paths
//!
//! - `new`: the whole input becomes one object
//! - `new_partitioned`: the input is cut into objects no larger than a byte
//!   threshold (a single oversize element still gets its own object)
//!
//! A failed write leaves any objects already written in place. A store that
//! keeps fewer bytes than were sent fails the write with `Corruption`.

pub mod lines;

pub use lines::{LinePartition, LineSequence, RangedLines};

use crate::cluster::StorageLevel;
use crate::codec::{BincodeCodec, CodecRef};
use crate::context::FlowContext;
use crate::error::{AggregateError, FlowError, FlowResult};
use crate::partition::StreamPartitioner;
use crate::store::{CloudStore, ETag, WriteReceipt};
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Element types the default codec can persist
pub trait Element: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T: Serialize + DeserializeOwned + Send + Sync + 'static> Element for T {}

fn default_codec<T: Element>() -> CodecRef<T> {
    Arc::new(BincodeCodec::new())
}

/// Options for [`PersistedSequence::new`]
pub struct WriteOptions<T> {
    /// Target path; a random path under the configured directory when `None`
    pub path: Option<String>,
    /// Codec; bincode records when `None`
    pub codec: Option<CodecRef<T>>,
}

impl<T> Default for WriteOptions<T> {
    fn default() -> Self {
        WriteOptions {
            path: None,
            codec: None,
        }
    }
}

/// Options for [`PersistedSequence::new_partitioned`]
pub struct PartitionOptions<T> {
    /// Directory for the random partition paths; the configured one when `None`
    pub directory: Option<String>,
    pub codec: Option<CodecRef<T>>,
}

impl<T> Default for PartitionOptions<T> {
    fn default() -> Self {
        PartitionOptions {
            directory: None,
            codec: None,
        }
    }
}

/// Options for [`PersistedSequence::of_store_object`]
pub struct AttachOptions<T> {
    pub codec: Option<CodecRef<T>>,
    /// Decode the whole object once while attaching (also caches the count)
    pub force_validate: bool,
}

impl<T> Default for AttachOptions<T> {
    fn default() -> Self {
        AttachOptions {
            codec: None,
            force_validate: false,
        }
    }
}

/// A lazily read, ETag-validated sequence stored in one object
pub struct PersistedSequence<T> {
    store: Arc<dyn CloudStore>,
    path: String,
    etag: ETag,
    /// Memoized element count; shared by clones, last write wins
    count: Arc<RwLock<Option<u64>>>,
    codec: CodecRef<T>,
    storage_level: StorageLevel,
}

impl<T> Clone for PersistedSequence<T> {
    fn clone(&self) -> Self {
        PersistedSequence {
            store: self.store.clone(),
            path: self.path.clone(),
            etag: self.etag.clone(),
            count: self.count.clone(),
            codec: self.codec.clone(),
            storage_level: self.storage_level,
        }
    }
}

impl<T> fmt::Debug for PersistedSequence<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedSequence")
            .field("path", &self.path)
            .field("etag", &self.etag)
            .field("count", &*self.count.read())
            .field("storage_level", &self.storage_level)
            .finish()
    }
}

impl<T> PersistedSequence<T> {
    fn from_parts(
        store: Arc<dyn CloudStore>,
        path: String,
        etag: ETag,
        count: Option<u64>,
        codec: CodecRef<T>,
        storage_level: StorageLevel,
    ) -> Self {
        PersistedSequence {
            store,
            path,
            etag,
            count: Arc::new(RwLock::new(count)),
            codec,
            storage_level,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn etag(&self) -> &str {
        &self.etag
    }

    /// Cache identifier: stable for one version of one object
    pub fn cache_id(&self) -> String {
        format!("{}@{}", self.path, self.etag)
    }

    pub fn storage_level(&self) -> StorageLevel {
        self.storage_level
    }

    pub fn with_storage_level(mut self, level: StorageLevel) -> Self {
        self.storage_level = level;
        self
    }

    /// Count if already known, without touching the store
    pub fn cached_count(&self) -> Option<u64> {
        *self.count.read()
    }

    /// Object size in bytes, queried from the store every time
    pub async fn size(&self, ctx: &FlowContext) -> FlowResult<u64> {
        ctx.cancellable(self.store.get_size(&self.path)).await
    }

    /// Delete the backing object
    pub async fn dispose(&self, ctx: &FlowContext) -> FlowResult<()> {
        ctx.cancellable(self.store.delete(&self.path)).await?;
        debug!(path = %self.path, "disposed persisted sequence");
        Ok(())
    }
}

/// Fails when the store kept fewer bytes than were sent
fn check_write_size(path: &str, sent: u64, receipt: &WriteReceipt) -> FlowResult<()> {
    if receipt.size_bytes == sent {
        Ok(())
    } else {
        Err(FlowError::Corruption {
            path: path.to_string(),
            reason: format!(
                "short write: store kept {} of {} bytes",
                receipt.size_bytes, sent
            ),
        })
    }
}

impl<T: Element> PersistedSequence<T> {
    /// Serialize `values` into a single object
    ///
    /// The element count is known after the write and is cached. A short
    /// write fails with `Corruption` and leaves the object in place.
    pub async fn new<I>(ctx: &FlowContext, values: I, options: WriteOptions<T>) -> FlowResult<Self>
    where
        I: IntoIterator<Item = T>,
    {
        ctx.check_cancelled()?;
        let codec = options.codec.unwrap_or_else(default_codec);
        let path = options
            .path
            .unwrap_or_else(|| ctx.store().random_path(&ctx.config().directory));

        let mut buf = codec.header();
        let mut count = 0u64;
        for value in values {
            buf.extend_from_slice(&codec.encode(&value)?);
            count += 1;
        }

        let sent = buf.len() as u64;
        let receipt = ctx
            .cancellable(ctx.store().write_with_etag(&path, Bytes::from(buf)))
            .await?;
        check_write_size(&path, sent, &receipt)?;
        debug!(
            path = %path,
            etag = %receipt.etag,
            count,
            size = receipt.size_bytes,
            "wrote persisted sequence"
        );
        Ok(Self::from_parts(
            ctx.store().clone(),
            path,
            receipt.etag,
            Some(count),
            codec,
            ctx.default_storage_level(),
        ))
    }

    /// Serialize `values` into as many objects as needed to keep each one at
    /// or under `max_partition_size` bytes
    ///
    /// Empty input produces no objects. When a partition fails after others
    /// were written, the error is an `Aggregate` listing the written paths.
    pub async fn new_partitioned<I>(
        ctx: &FlowContext,
        values: I,
        max_partition_size: u64,
        options: PartitionOptions<T>,
    ) -> FlowResult<Vec<Self>>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send,
    {
        if max_partition_size == 0 {
            return Err(FlowError::invalid_argument(
                "partition threshold must be positive",
            ));
        }
        ctx.check_cancelled()?;
        let codec = options.codec.unwrap_or_else(default_codec);
        let directory = options
            .directory
            .unwrap_or_else(|| ctx.config().directory.clone());
        let header = codec.header();
        let level = ctx.default_storage_level();

        // Bytes already in the current partition, and the size of the record
        // about to be appended
        let position = AtomicU64::new(0);
        let next_len = AtomicU64::new(0);

        let records = values.into_iter().map(|value| {
            let record = codec.encode(&value);
            if let Ok(bytes) = &record {
                next_len.store(bytes.len() as u64, Ordering::Relaxed);
            }
            record
        });
        let mut partitioner = StreamPartitioner::new(records, || {
            position.load(Ordering::Relaxed) + next_len.load(Ordering::Relaxed)
                > max_partition_size
        });

        let mut sequences: Vec<Self> = Vec::new();
        loop {
            let partition = sequences.len();
            let written = async {
                ctx.check_cancelled()?;
                let Some(chunk) = partitioner.next_partition() else {
                    return Ok(None);
                };
                let mut buf = header.clone();
                position.store(buf.len() as u64, Ordering::Relaxed);
                let mut count = 0u64;
                for record in chunk {
                    buf.extend_from_slice(&record?);
                    position.store(buf.len() as u64, Ordering::Relaxed);
                    count += 1;
                }

                let path = ctx.store().random_path(&directory);
                let sent = buf.len() as u64;
                let receipt = ctx
                    .cancellable(ctx.store().write_with_etag(&path, Bytes::from(buf)))
                    .await?;
                check_write_size(&path, sent, &receipt)?;
                debug!(
                    path = %path,
                    partition,
                    count,
                    size = receipt.size_bytes,
                    "wrote partition"
                );
                Ok::<_, FlowError>(Some(Self::from_parts(
                    ctx.store().clone(),
                    path,
                    receipt.etag,
                    Some(count),
                    codec.clone(),
                    level,
                )))
            }
            .await;

            match written {
                Ok(Some(sequence)) => sequences.push(sequence),
                Ok(None) => return Ok(sequences),
                Err(e) if sequences.is_empty() => return Err(e),
                Err(e) => {
                    return Err(FlowError::Aggregate(AggregateError {
                        operation: "write partitions",
                        succeeded: sequences.len(),
                        failures: vec![(format!("partition {}", partition), e)],
                        written: sequences.iter().map(|s| s.path.clone()).collect(),
                    }))
                }
            }
        }
    }

    /// Attach to an existing object at its current ETag
    ///
    /// The storage level is the context's default.
    pub async fn of_store_object(
        ctx: &FlowContext,
        path: impl Into<String>,
        options: AttachOptions<T>,
    ) -> FlowResult<Self> {
        let path = path.into();
        let etag = ctx
            .cancellable(ctx.store().try_get_etag(&path))
            .await?
            .ok_or_else(|| FlowError::NotFound(path.clone()))?;
        debug!(path = %path, etag = %etag, "attached to store object");

        let codec = options.codec.unwrap_or_else(default_codec);
        let sequence = Self::from_parts(
            ctx.store().clone(),
            path,
            etag,
            None,
            codec,
            ctx.default_storage_level(),
        );
        if options.force_validate {
            sequence.count(ctx).await?;
        }
        Ok(sequence)
    }

    /// Fresh lazy stream over the elements
    ///
    /// Nothing is read until the first poll. Each call re-opens the object.
    pub fn to_stream(&self, cancel: CancellationToken) -> BoxStream<'static, FlowResult<T>> {
        let store = self.store.clone();
        let path = self.path.clone();
        let etag = self.etag.clone();
        let codec = self.codec.clone();

        let open = async move {
            let data = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FlowError::Cancelled),
                data = store.read_with_etag(&path, &etag) => data?,
            };
            let data = data.ok_or_else(|| FlowError::StaleData {
                path: path.clone(),
                expected_etag: etag.clone(),
            })?;
            codec.decode(&path, data)
        };

        stream::once(open)
            .map_ok(stream::iter)
            .try_flatten()
            .boxed()
    }

    /// Element count; traverses the object once, then served from memory
    pub async fn count(&self, ctx: &FlowContext) -> FlowResult<u64> {
        if let Some(count) = self.cached_count() {
            return Ok(count);
        }
        let count = self
            .to_stream(ctx.cancellation_token().clone())
            .try_fold(0u64, |n, _| async move { Ok::<_, FlowError>(n + 1) })
            .await?;
        *self.count.write() = Some(count);
        Ok(count)
    }

    pub async fn to_vec(&self, ctx: &FlowContext) -> FlowResult<Vec<T>> {
        let items: Vec<T> = self
            .to_stream(ctx.cancellation_token().clone())
            .try_collect()
            .await?;
        if self.cached_count().is_none() {
            *self.count.write() = Some(items.len() as u64);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::LocalCluster;
    use crate::config::FlowConfig;
    use crate::store::{InMemoryCloudStore, SimulatedCloudStore, SimulatedStoreConfig};

    fn test_context(store: &InMemoryCloudStore) -> FlowContext {
        FlowContext::new(
            Arc::new(store.clone()),
            Arc::new(LocalCluster::new(2)),
            FlowConfig::test(),
        )
    }

    #[tokio::test]
    async fn test_new_round_trip() {
        let store = InMemoryCloudStore::new();
        let ctx = test_context(&store);

        let seq = PersistedSequence::new(&ctx, vec![3u32, 1, 4], WriteOptions::default())
            .await
            .unwrap();
        assert!(seq.path().starts_with("test/"));
        assert_eq!(seq.cached_count(), Some(3));
        assert_eq!(seq.to_vec(&ctx).await.unwrap(), vec![3, 1, 4]);
        // replayable
        assert_eq!(seq.to_vec(&ctx).await.unwrap(), vec![3, 1, 4]);
        assert_eq!(seq.cache_id(), format!("{}@{}", seq.path(), seq.etag()));
    }

    #[tokio::test]
    async fn test_new_with_explicit_path() {
        let store = InMemoryCloudStore::new();
        let ctx = test_context(&store);

        let seq = PersistedSequence::new(
            &ctx,
            vec!["a".to_string()],
            WriteOptions {
                path: Some("fixed/one".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(seq.path(), "fixed/one");
        assert!(store.contains("fixed/one"));
    }

    #[tokio::test]
    async fn test_partitioned_rejects_zero_threshold() {
        let store = InMemoryCloudStore::new();
        let ctx = test_context(&store);
        let err = PersistedSequence::new_partitioned(&ctx, vec![1u8], 0, PartitionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::InvalidArgument(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_partitioned_respects_threshold() {
        let store = InMemoryCloudStore::new();
        let ctx = test_context(&store);

        // header 5 bytes + 16 bytes per u64 record
        let parts = PersistedSequence::new_partitioned(
            &ctx,
            0u64..100,
            5 + 16 * 10,
            PartitionOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(parts.len(), 10);

        let mut all = Vec::new();
        for part in &parts {
            assert!(part.size(&ctx).await.unwrap() <= 5 + 16 * 10);
            assert_eq!(part.cached_count(), Some(10));
            all.extend(part.to_vec(&ctx).await.unwrap());
        }
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_partitioned_oversize_element_gets_own_partition() {
        let store = InMemoryCloudStore::new();
        let ctx = test_context(&store);

        let values = vec!["x".repeat(4), "y".repeat(100), "z".repeat(4)];
        let parts =
            PersistedSequence::new_partitioned(&ctx, values, 40, PartitionOptions::default())
                .await
                .unwrap();
        assert_eq!(parts.len(), 3);
        assert!(parts[1].size(&ctx).await.unwrap() > 40);
        assert!(parts[0].size(&ctx).await.unwrap() <= 40);
    }

    #[tokio::test]
    async fn test_partitioned_empty_input() {
        let store = InMemoryCloudStore::new();
        let ctx = test_context(&store);
        let parts = PersistedSequence::new_partitioned(
            &ctx,
            Vec::<u32>::new(),
            100,
            PartitionOptions::default(),
        )
        .await
        .unwrap();
        assert!(parts.is_empty());
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_attach_missing_is_not_found() {
        let store = InMemoryCloudStore::new();
        let ctx = test_context(&store);
        let err = PersistedSequence::<u32>::of_store_object(&ctx, "nope", AttachOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_attach_force_validate_populates_count() {
        let store = InMemoryCloudStore::new();
        let ctx = test_context(&store);
        let written = PersistedSequence::new(&ctx, 0u16..7, WriteOptions::default())
            .await
            .unwrap();

        let attached = PersistedSequence::<u16>::of_store_object(
            &ctx,
            written.path(),
            AttachOptions {
                force_validate: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(attached.etag(), written.etag());
        assert_eq!(attached.cached_count(), Some(7));
    }

    #[tokio::test]
    async fn test_stale_etag_detected_on_open() {
        let store = InMemoryCloudStore::new();
        let ctx = test_context(&store);
        let seq = PersistedSequence::new(&ctx, vec![1u32, 2], WriteOptions::default())
            .await
            .unwrap();

        store
            .write_with_etag(seq.path(), Bytes::from_static(b"overwritten"))
            .await
            .unwrap();

        let err = seq.to_vec(&ctx).await.unwrap_err();
        assert!(err.is_stale());
    }

    #[tokio::test]
    async fn test_stream_is_lazy() {
        let store = InMemoryCloudStore::new();
        let ctx = test_context(&store);
        let seq = PersistedSequence::new(&ctx, vec![1u32], WriteOptions::default())
            .await
            .unwrap();

        // Creating the stream does not read; deleting first makes the open fail
        let stream = seq.to_stream(ctx.cancellation_token().clone());
        seq.dispose(&ctx).await.unwrap();
        let result: FlowResult<Vec<u32>> = stream.try_collect().await;
        assert!(result.unwrap_err().is_stale());
    }

    #[tokio::test]
    async fn test_count_memoized_and_shared_by_clones() {
        let store = InMemoryCloudStore::new();
        let ctx = test_context(&store);
        let written = PersistedSequence::new(&ctx, 0u8..5, WriteOptions::default())
            .await
            .unwrap();
        let attached =
            PersistedSequence::<u8>::of_store_object(&ctx, written.path(), AttachOptions::default())
                .await
                .unwrap();
        let clone = attached.clone();
        assert_eq!(clone.cached_count(), None);

        assert_eq!(attached.count(&ctx).await.unwrap(), 5);
        assert_eq!(clone.cached_count(), Some(5));

        // Served from memory even after the object is gone
        attached.dispose(&ctx).await.unwrap();
        assert_eq!(clone.count(&ctx).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_cancelled_context() {
        let store = InMemoryCloudStore::new();
        let ctx = test_context(&store);
        let seq = PersistedSequence::new(&ctx, vec![1u32], WriteOptions::default())
            .await
            .unwrap();

        ctx.cancel();
        assert!(seq.to_vec(&ctx).await.unwrap_err().is_cancelled());
        assert!(seq.dispose(&ctx).await.unwrap_err().is_cancelled());
        let err = PersistedSequence::new(&ctx, vec![2u32], WriteOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    fn simulated_context(store: &SimulatedCloudStore<InMemoryCloudStore>) -> FlowContext {
        FlowContext::new(
            Arc::new(store.clone()),
            Arc::new(LocalCluster::new(2)),
            FlowConfig::test(),
        )
    }

    #[tokio::test]
    async fn test_short_write_fails() {
        let store = SimulatedCloudStore::new(
            InMemoryCloudStore::new(),
            7,
            SimulatedStoreConfig {
                partial_write_prob: 1.0,
                ..SimulatedStoreConfig::no_faults()
            },
        );
        let ctx = simulated_context(&store);

        let err = PersistedSequence::new(&ctx, 0u64..10, WriteOptions::default())
            .await
            .unwrap_err();
        let (path, reason) = match err {
            FlowError::Corruption { path, reason } => (path, reason),
            other => panic!("expected corruption, got {:?}", other),
        };
        assert!(reason.contains("short write"));
        // The truncated object stays where it was written
        assert!(store.inner().contains(&path));

        let err = PersistedSequence::new_partitioned(
            &ctx,
            0u64..10,
            5 + 16 * 2,
            PartitionOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FlowError::Corruption { .. }));
        assert_eq!(store.stats().partial_writes, 2);
    }

    #[tokio::test]
    async fn test_partitioned_failure_reports_written_paths() {
        let mut partial_failures = 0;
        for seed in 0..32 {
            let store = SimulatedCloudStore::new(
                InMemoryCloudStore::new(),
                seed,
                SimulatedStoreConfig {
                    write_fail_prob: 0.3,
                    ..SimulatedStoreConfig::no_faults()
                },
            );
            let ctx = simulated_context(&store);

            let result = PersistedSequence::new_partitioned(
                &ctx,
                0u64..40,
                5 + 16 * 4,
                PartitionOptions::default(),
            )
            .await;

            let mut stored = store.inner().paths();
            stored.sort();
            match result {
                Ok(parts) => assert_eq!(stored.len(), parts.len()),
                Err(FlowError::Aggregate(agg)) => {
                    partial_failures += 1;
                    assert_eq!(agg.failures.len(), 1);
                    assert_eq!(agg.succeeded, agg.written.len());
                    let mut written = agg.written.clone();
                    written.sort();
                    assert_eq!(written, stored, "seed {}", seed);
                }
                Err(e) => {
                    assert!(matches!(e, FlowError::Io(_)), "seed {}: {:?}", seed, e);
                    assert!(stored.is_empty(), "seed {}", seed);
                }
            }
        }
        assert!(partial_failures > 0);
    }

    #[tokio::test]
    async fn test_attached_storage_level_follows_cluster() {
        let store = InMemoryCloudStore::new();
        let ctx = FlowContext::new(
            Arc::new(store.clone()),
            Arc::new(LocalCluster::new(1).with_supported_levels(StorageLevel::MEMORY)),
            FlowConfig::test(),
        );
        let written = PersistedSequence::new(&ctx, vec![1u8], WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(written.storage_level(), StorageLevel::MEMORY);

        let attached =
            PersistedSequence::<u8>::of_store_object(&ctx, written.path(), AttachOptions::default())
                .await
                .unwrap();
        assert_eq!(attached.storage_level(), StorageLevel::MEMORY);
    }

    // Accessors need no codec bounds on the element type
    fn describe<T>(seq: &PersistedSequence<T>) -> String {
        format!("{} {}", seq.cache_id(), seq.storage_level())
    }

    #[tokio::test]
    async fn test_accessors_without_element_bounds() {
        let store = InMemoryCloudStore::new();
        let ctx = test_context(&store);
        let seq = PersistedSequence::new(&ctx, vec![1u8], WriteOptions::default())
            .await
            .unwrap();
        assert!(describe(&seq).ends_with("Memory|Disk"));
    }
}
