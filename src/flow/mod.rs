//! Partitioned Persisted Flow
//!
//! An ordered list of `(worker, persisted sequence)` pairs. Order defines
//! iteration order and partition indexing; the worker is a placement hint.
//!
//! - `persist`: split an input into threshold-bounded partitions on the current worker
//! - `of_existing`: wrap sequences, assigning workers round-robin
//! - `concat`: append partition lists in order
//! - `materialize`: persist any flow via the evaluator protocol
//! - `dispose`: delete every partition in parallel

pub mod materialize;
pub mod report;

pub use materialize::{materialize, MaterializeOptions};
pub use report::{FlowReport, PartitionReport};

use crate::cluster::{StorageLevel, WorkerRef};
use crate::codec::CodecRef;
use crate::context::FlowContext;
use crate::error::{AggregateError, FlowError, FlowResult};
use crate::evaluate::{evaluate_partitions, CloudFlow, Collector, Evaluation};
use crate::sequence::{Element, PartitionOptions, PersistedSequence};
use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::fmt;
use tracing::{debug, info, warn};

/// Options for [`PersistedFlow::persist`]
pub struct PersistOptions<T> {
    /// Storage level recorded on every partition; the context's default when `None`
    pub storage_level: Option<StorageLevel>,
    /// Maximum partition size in bytes; the configured threshold when `None`
    pub partition_threshold: Option<u64>,
    pub directory: Option<String>,
    pub codec: Option<CodecRef<T>>,
}

impl<T> Default for PersistOptions<T> {
    fn default() -> Self {
        PersistOptions {
            storage_level: None,
            partition_threshold: None,
            directory: None,
            codec: None,
        }
    }
}

pub struct PersistedFlow<T> {
    partitions: Vec<(WorkerRef, PersistedSequence<T>)>,
}

impl<T> Clone for PersistedFlow<T> {
    fn clone(&self) -> Self {
        PersistedFlow {
            partitions: self.partitions.clone(),
        }
    }
}

impl<T> fmt::Debug for PersistedFlow<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.partitions).finish()
    }
}

impl<T> PersistedFlow<T> {
    pub fn from_partitions(partitions: Vec<(WorkerRef, PersistedSequence<T>)>) -> Self {
        PersistedFlow { partitions }
    }

    /// Flow with no partitions
    pub fn empty() -> Self {
        PersistedFlow {
            partitions: Vec::new(),
        }
    }

    pub fn partitions(&self) -> &[(WorkerRef, PersistedSequence<T>)] {
        &self.partitions
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Append the partitions of every flow, preserving order
    pub fn concat<I>(flows: I) -> Self
    where
        I: IntoIterator<Item = PersistedFlow<T>>,
    {
        PersistedFlow {
            partitions: flows.into_iter().flat_map(|f| f.partitions).collect(),
        }
    }

    /// Capabilities shared by every partition
    ///
    /// A flow with no partitions lives in memory only. `None` when the
    /// partitions share no capability.
    pub fn storage_level(&self) -> Option<StorageLevel> {
        let mut levels = self.partitions.iter().map(|(_, p)| p.storage_level());
        let Some(first) = levels.next() else {
            return Some(StorageLevel::MEMORY);
        };
        levels.try_fold(first, |acc, level| acc.intersect(level))
    }
}

impl<T: Element> PersistedFlow<T> {
    /// Persist `values` on the current worker, split by the partition threshold
    pub async fn persist<I>(ctx: &FlowContext, values: I, options: PersistOptions<T>) -> FlowResult<Self>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send,
    {
        let threshold = options
            .partition_threshold
            .unwrap_or(ctx.config().partition_threshold);
        let level = options
            .storage_level
            .unwrap_or_else(|| ctx.default_storage_level());

        let sequences = PersistedSequence::new_partitioned(
            ctx,
            values,
            threshold,
            PartitionOptions {
                directory: options.directory,
                codec: options.codec,
            },
        )
        .await?;

        info!(
            worker = %ctx.worker(),
            partitions = sequences.len(),
            threshold,
            storage_level = %level,
            "persisted flow"
        );
        let worker = ctx.worker().clone();
        Ok(PersistedFlow {
            partitions: sequences
                .into_iter()
                .map(|s| (worker.clone(), s.with_storage_level(level)))
                .collect(),
        })
    }

    /// Wrap existing sequences, placing them round-robin on the available workers
    pub fn of_existing<I>(ctx: &FlowContext, sequences: I) -> Self
    where
        I: IntoIterator<Item = PersistedSequence<T>>,
    {
        let place = ctx.placement();
        PersistedFlow {
            partitions: sequences
                .into_iter()
                .enumerate()
                .map(|(i, s)| (place(i), s))
                .collect(),
        }
    }

    /// Persist `source` unless it already is a persisted flow
    pub async fn materialize<F>(
        ctx: &FlowContext,
        source: &F,
        options: MaterializeOptions,
    ) -> FlowResult<Self>
    where
        F: CloudFlow<T>,
    {
        materialize(ctx, source, options).await
    }

    /// Total element count
    pub async fn count(&self, ctx: &FlowContext) -> FlowResult<u64> {
        let counts =
            future::try_join_all(self.partitions.iter().map(|(_, p)| p.count(ctx))).await?;
        Ok(counts.into_iter().sum())
    }

    /// Total size in bytes of the backing objects
    pub async fn size(&self, ctx: &FlowContext) -> FlowResult<u64> {
        let sizes =
            future::try_join_all(self.partitions.iter().map(|(_, p)| p.size(ctx))).await?;
        Ok(sizes.into_iter().sum())
    }

    /// Delete every partition concurrently
    ///
    /// Every delete is attempted. Failures are reported together; when all
    /// of them are cancellations the result is `Cancelled`.
    pub async fn dispose(&self, ctx: &FlowContext) -> FlowResult<()> {
        let outcomes = future::join_all(
            self.partitions
                .iter()
                .map(|(_, p)| async move { (p.path().to_string(), p.dispose(ctx).await) }),
        )
        .await;

        match AggregateError::collect("dispose", outcomes) {
            None => {
                debug!(partitions = self.partitions.len(), "disposed flow");
                Ok(())
            }
            Some(agg) if agg.all_cancelled() => Err(FlowError::Cancelled),
            Some(agg) => {
                warn!(
                    failed = agg.failures.len(),
                    succeeded = agg.succeeded,
                    "flow disposal incomplete"
                );
                Err(agg.into())
            }
        }
    }

    /// All elements, partition by partition, read lazily
    pub fn to_stream(&self, ctx: &FlowContext) -> BoxStream<'static, FlowResult<T>> {
        let cancel = ctx.cancellation_token().clone();
        let streams: Vec<_> = self
            .partitions
            .iter()
            .map(|(_, p)| p.to_stream(cancel.clone()))
            .collect();
        stream::iter(streams).flatten().boxed()
    }

    pub async fn to_vec(&self, ctx: &FlowContext) -> FlowResult<Vec<T>> {
        self.to_stream(ctx).try_collect().await
    }
}

impl<T: Element> CloudFlow<T> for PersistedFlow<T> {
    fn evaluate<'a, C, I, R>(
        &'a self,
        ctx: &'a FlowContext,
        evaluation: Evaluation<T, C, I, R>,
    ) -> BoxFuture<'a, FlowResult<R>>
    where
        C: Collector<T> + 'static,
        I: Send + 'static,
        R: Send + 'static,
    {
        let dop = ctx.degree_of_parallelism(self.degree_of_parallelism());
        let sources = self
            .partitions
            .iter()
            .map(|(worker, p)| {
                (
                    worker.clone(),
                    p.to_stream(ctx.cancellation_token().clone()),
                )
            })
            .collect();
        evaluate_partitions(ctx, dop, sources, evaluation).boxed()
    }

    fn as_persisted(&self) -> Option<&PersistedFlow<T>> {
        Some(self)
    }

    fn known_count(&self) -> Option<u64> {
        self.partitions
            .iter()
            .map(|(_, p)| p.cached_count())
            .sum::<Option<u64>>()
    }
}
