//! Line-oriented persisted sequences
//!
//! A text object holds one element per `\n`-terminated line. Besides plain
//! iteration it can be split by weights without decoding the whole object: the
//! byte extent is split with the weighted range partitioner, and each range
//! owns exactly the lines that *start* inside it.
//!
//! ```text
//!   bytes:   a a a \n b b b b \n c c \n
//!   ranges:  [----- r0 -----)[-- r1 --)
//!   r0 owns "aaa", "bbbb" (finishes "bbbb" past its end)
//!   r1 probes the byte before its start, skips the rest of "bbbb", owns "cc"
//! ```

use crate::codec::{CodecRef, LineCodec};
use crate::context::FlowContext;
use crate::error::{FlowError, FlowResult};
use crate::evaluate::{evaluate_partitions, CloudFlow, Collector, Evaluation};
use crate::partition::{split_weighted, split_weighted_range};
use crate::sequence::{AttachOptions, PersistedSequence, WriteOptions};
use crate::store::{CloudStore, ETag};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

fn line_codec() -> CodecRef<String> {
    Arc::new(LineCodec)
}

/// A persisted sequence of text lines
#[derive(Debug, Clone)]
pub struct LineSequence {
    sequence: PersistedSequence<String>,
}

impl LineSequence {
    /// Write `lines` as newline-terminated text
    pub async fn new<I>(ctx: &FlowContext, lines: I, path: Option<String>) -> FlowResult<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let sequence = PersistedSequence::new(
            ctx,
            lines,
            WriteOptions {
                path,
                codec: Some(line_codec()),
            },
        )
        .await?;
        Ok(LineSequence { sequence })
    }

    /// Attach to an existing text object
    pub async fn of_store_object(ctx: &FlowContext, path: impl Into<String>) -> FlowResult<Self> {
        let sequence = PersistedSequence::of_store_object(
            ctx,
            path,
            AttachOptions {
                codec: Some(line_codec()),
                force_validate: false,
            },
        )
        .await?;
        Ok(LineSequence { sequence })
    }

    pub fn sequence(&self) -> &PersistedSequence<String> {
        &self.sequence
    }

    pub fn lines(&self, cancel: CancellationToken) -> BoxStream<'static, FlowResult<String>> {
        self.sequence.to_stream(cancel)
    }

    /// Split the lines proportionally to `weights`
    ///
    /// Small objects with fewer lines than weights are split in memory;
    /// everything else is split by byte ranges. Empty slots are omitted, so
    /// the result may hold fewer partitions than weights. Concatenating the
    /// partitions in order yields the full sequence.
    pub async fn partition_by_weights(
        &self,
        ctx: &FlowContext,
        weights: &[u32],
    ) -> FlowResult<Vec<LinePartition>> {
        let size = self.sequence.size(ctx).await?;
        let config = ctx.config();

        if size < config.small_file_threshold {
            let few_lines = self
                .sequence
                .cached_count()
                .map_or(true, |count| count < weights.len() as u64);
            if few_lines {
                let lines = self.sequence.to_vec(ctx).await?;
                if lines.len() < weights.len() {
                    debug!(
                        path = %self.sequence.path(),
                        lines = lines.len(),
                        partitions = weights.len(),
                        "splitting small line object in memory"
                    );
                    return Ok(split_weighted(weights, lines)
                        .into_iter()
                        .filter(|part| !part.is_empty())
                        .map(LinePartition::InMemory)
                        .collect());
                }
            }
        }

        let read_chunk = config.range_read_chunk.max(1);
        let partitions: Vec<LinePartition> = split_weighted_range(weights, 0, size as i64)
            .into_iter()
            .flatten()
            .map(|(start, end)| {
                LinePartition::Range(RangedLines {
                    store: ctx.store().clone(),
                    path: self.sequence.path().to_string(),
                    etag: self.sequence.etag().to_string(),
                    start: start as u64,
                    end: end as u64,
                    read_chunk,
                })
            })
            .collect();
        debug!(
            path = %self.sequence.path(),
            size,
            partitions = partitions.len(),
            "split line object by byte ranges"
        );
        Ok(partitions)
    }
}

impl CloudFlow<String> for LineSequence {
    fn evaluate<'a, C, I, R>(
        &'a self,
        ctx: &'a FlowContext,
        evaluation: Evaluation<String, C, I, R>,
    ) -> BoxFuture<'a, FlowResult<R>>
    where
        C: Collector<String> + 'static,
        I: Send + 'static,
        R: Send + 'static,
    {
        Box::pin(async move {
            let dop = ctx.degree_of_parallelism(self.degree_of_parallelism());
            let partitions = self.partition_by_weights(ctx, &vec![1; dop]).await?;
            let place = ctx.placement();
            let sources = partitions
                .iter()
                .enumerate()
                .map(|(i, part)| {
                    (
                        place(i),
                        part.lines(ctx.cancellation_token().clone()),
                    )
                })
                .collect();
            evaluate_partitions(ctx, dop, sources, evaluation).await
        })
    }
}

/// One slice of a line sequence
#[derive(Debug, Clone)]
pub enum LinePartition {
    /// Lines already materialized in memory
    InMemory(Vec<String>),
    /// Lines starting inside a byte range of the object
    Range(RangedLines),
}

impl LinePartition {
    /// Fresh lazy stream over the partition's lines
    pub fn lines(&self, cancel: CancellationToken) -> BoxStream<'static, FlowResult<String>> {
        match self {
            LinePartition::InMemory(lines) => {
                stream::iter(lines.clone().into_iter().map(Ok::<_, FlowError>)).boxed()
            }
            LinePartition::Range(range) => range.lines(cancel),
        }
    }

    pub async fn to_vec(&self, cancel: CancellationToken) -> FlowResult<Vec<String>> {
        self.lines(cancel).try_collect().await
    }
}

/// Lines whose first byte lies in `[start, end)` of a text object
#[derive(Clone)]
pub struct RangedLines {
    store: Arc<dyn CloudStore>,
    path: String,
    etag: ETag,
    start: u64,
    end: u64,
    read_chunk: u64,
}

impl std::fmt::Debug for RangedLines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangedLines")
            .field("path", &self.path)
            .field("etag", &self.etag)
            .field("range", &(self.start..self.end))
            .finish()
    }
}

impl RangedLines {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn range(&self) -> (u64, u64) {
        (self.start, self.end)
    }

    /// Lazy stream; the range is read on first poll
    pub fn lines(&self, cancel: CancellationToken) -> BoxStream<'static, FlowResult<String>> {
        let this = self.clone();
        stream::once(async move { this.read_lines(&cancel).await })
            .map_ok(|lines| stream::iter(lines.into_iter().map(Ok::<_, FlowError>)))
            .try_flatten()
            .boxed()
    }

    async fn read(&self, cancel: &CancellationToken, start: u64, end: u64) -> FlowResult<Bytes> {
        let data = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FlowError::Cancelled),
            data = self.store.read_range_with_etag(&self.path, &self.etag, start, end) => data?,
        };
        data.ok_or_else(|| FlowError::StaleData {
            path: self.path.clone(),
            expected_etag: self.etag.clone(),
        })
    }

    async fn read_lines(&self, cancel: &CancellationToken) -> FlowResult<Vec<String>> {
        // Probe one byte back to learn whether a line starts exactly at `start`
        let probe = self.start.saturating_sub(1);
        let window = self.read(cancel, probe, self.end).await?;

        let first = if self.start == 0 {
            0
        } else if window.first() == Some(&b'\n') {
            1
        } else {
            match window.get(1..).and_then(|rest| memchr::memchr(b'\n', rest)) {
                Some(i) => i + 2,
                None => return Ok(Vec::new()),
            }
        };
        if first >= window.len() {
            return Ok(Vec::new());
        }

        let mut buf = window.slice(first..).to_vec();
        let mut cursor = self.end;
        while buf.last() != Some(&b'\n') {
            let next = self.read(cancel, cursor, cursor + self.read_chunk).await?;
            if next.is_empty() {
                break;
            }
            match memchr::memchr(b'\n', &next) {
                Some(i) => {
                    buf.extend_from_slice(&next[..=i]);
                    break;
                }
                None => {
                    buf.extend_from_slice(&next);
                    cursor += next.len() as u64;
                }
            }
        }

        LineCodec::split_lines(&self.path, &buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::LocalCluster;
    use crate::config::FlowConfig;
    use crate::store::InMemoryCloudStore;

    fn test_context(store: &InMemoryCloudStore) -> FlowContext {
        FlowContext::new(
            Arc::new(store.clone()),
            Arc::new(LocalCluster::new(3)),
            FlowConfig::test(),
        )
    }

    fn sample_lines(n: usize) -> Vec<String> {
        (0..n)
            .map(|i| format!("line-{}-{}", i, "x".repeat(i % 13)))
            .collect()
    }

    async fn concat(ctx: &FlowContext, parts: &[LinePartition]) -> Vec<String> {
        let mut all = Vec::new();
        for part in parts {
            all.extend(part.to_vec(ctx.cancellation_token().clone()).await.unwrap());
        }
        all
    }

    #[tokio::test]
    async fn test_write_and_read_lines() {
        let store = InMemoryCloudStore::new();
        let ctx = test_context(&store);
        let lines = sample_lines(5);
        let seq = LineSequence::new(&ctx, lines.clone(), Some("text/a.txt".to_string()))
            .await
            .unwrap();

        let read: Vec<String> = seq
            .lines(ctx.cancellation_token().clone())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(read, lines);
        let raw = store
            .read_with_etag("text/a.txt", seq.sequence().etag())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(raw, Bytes::from(lines.join("\n") + "\n"));
    }

    #[tokio::test]
    async fn test_range_partitions_concat_to_full_sequence() {
        let store = InMemoryCloudStore::new();
        let ctx = test_context(&store);
        let lines = sample_lines(200);
        let seq = LineSequence::new(&ctx, lines.clone(), None).await.unwrap();
        assert!(seq.sequence().size(&ctx).await.unwrap() >= ctx.config().small_file_threshold);

        for k in 1..24u32 {
            let weights: Vec<u32> = (0..k).map(|i| 1 + (i * 7) % 5).collect();
            let parts = seq.partition_by_weights(&ctx, &weights).await.unwrap();
            assert!(parts.iter().all(|p| matches!(p, LinePartition::Range(_))));
            assert_eq!(concat(&ctx, &parts).await, lines, "weights {:?}", weights);
        }
    }

    #[tokio::test]
    async fn test_ranges_with_long_lines_and_no_trailing_newline() {
        let store = InMemoryCloudStore::new();
        let ctx = test_context(&store);
        let mut text = String::new();
        let mut expected = Vec::new();
        for i in 0..40 {
            let line = format!("{}{}", i, "y".repeat(100 + i * 3));
            text.push_str(&line);
            text.push_str("\r\n");
            expected.push(line);
        }
        text.push_str("tail");
        expected.push("tail".to_string());
        store
            .write_with_etag("raw.txt", Bytes::from(text))
            .await
            .unwrap();

        let seq = LineSequence::of_store_object(&ctx, "raw.txt").await.unwrap();
        for weights in [vec![1u32], vec![1, 1], vec![3, 0, 1, 2], vec![1; 37]] {
            let parts = seq.partition_by_weights(&ctx, &weights).await.unwrap();
            assert_eq!(concat(&ctx, &parts).await, expected);
        }
    }

    #[tokio::test]
    async fn test_small_object_split_in_memory() {
        let store = InMemoryCloudStore::new();
        let ctx = test_context(&store);
        let lines = sample_lines(3);
        let seq = LineSequence::new(&ctx, lines.clone(), None).await.unwrap();

        let parts = seq.partition_by_weights(&ctx, &[1, 1, 1, 1, 1]).await.unwrap();
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| matches!(p, LinePartition::InMemory(_))));
        assert_eq!(concat(&ctx, &parts).await, lines);

        // Enough lines for every weight: byte ranges even though small
        let parts = seq.partition_by_weights(&ctx, &[1, 1]).await.unwrap();
        assert!(parts.iter().all(|p| matches!(p, LinePartition::Range(_))));
        assert_eq!(concat(&ctx, &parts).await, lines);
    }

    #[tokio::test]
    async fn test_range_read_detects_overwrite() {
        let store = InMemoryCloudStore::new();
        let ctx = test_context(&store);
        let seq = LineSequence::new(&ctx, sample_lines(200), None).await.unwrap();
        let parts = seq.partition_by_weights(&ctx, &[1, 1]).await.unwrap();

        store
            .write_with_etag(seq.sequence().path(), Bytes::from_static(b"changed\n"))
            .await
            .unwrap();
        let err = parts[1]
            .to_vec(ctx.cancellation_token().clone())
            .await
            .unwrap_err();
        assert!(err.is_stale());
    }
}
