//! Materialization: turn any flow into a persisted flow
//!
//! Each partition is buffered by a `ListCollector`, the buffer is persisted on
//! the worker that collected it, and the per-partition flows are concatenated
//! in partition order.
//!
//! A failed materialization reports every partition failure in one
//! `Aggregate`, together with the paths of the objects it already wrote.

use crate::cluster::{StorageLevel, WorkerRef};
use crate::context::FlowContext;
use crate::error::{AggregateError, FlowError, FlowResult};
use crate::evaluate::{CloudFlow, Evaluation, ListCollector};
use crate::flow::{PersistOptions, PersistedFlow};
use crate::sequence::Element;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Options for [`materialize`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterializeOptions {
    /// Storage level for the output; the context's default when `None`
    pub storage_level: Option<StorageLevel>,
    /// Per-output-partition byte threshold; the configured one when `None`
    pub partition_threshold: Option<u64>,
}

/// Persist `source`, or return it unchanged when it is already persisted
pub async fn materialize<T, F>(
    ctx: &FlowContext,
    source: &F,
    options: MaterializeOptions,
) -> FlowResult<PersistedFlow<T>>
where
    T: Element,
    F: CloudFlow<T>,
{
    if let Some(persisted) = source.as_persisted() {
        debug!(
            partitions = persisted.partition_count(),
            "flow already persisted"
        );
        return Ok(persisted.clone());
    }

    let level = options
        .storage_level
        .unwrap_or_else(|| ctx.default_storage_level());
    if !ctx.cluster().is_storage_level_supported(level) {
        return Err(FlowError::invalid_argument(format!(
            "storage level {} is not supported by the cluster",
            level
        )));
    }
    let threshold = options
        .partition_threshold
        .unwrap_or(ctx.config().partition_threshold);
    if threshold == 0 {
        return Err(FlowError::invalid_argument(
            "partition threshold must be positive",
        ));
    }

    let progress = Arc::new(Mutex::new(Progress::default()));
    let persist_ctx = ctx.clone();
    let tracked = progress.clone();
    let evaluation = Evaluation::new(
        ListCollector::<T>::new,
        move |(worker, items): (WorkerRef, Vec<T>)| {
            let ctx = persist_ctx.with_worker(worker);
            let progress = tracked.clone();
            async move {
                let persisted = PersistedFlow::persist(
                    &ctx,
                    items,
                    PersistOptions {
                        storage_level: Some(level),
                        partition_threshold: Some(threshold),
                        ..Default::default()
                    },
                )
                .await;
                progress.lock().record(&persisted);
                persisted
            }
        },
        |flows: Vec<PersistedFlow<T>>| Ok(PersistedFlow::concat(flows)),
    );

    let flow = match source.evaluate(ctx, evaluation).await {
        Ok(flow) => flow,
        Err(e) => {
            let progress = std::mem::take(&mut *progress.lock());
            return Err(progress.into_error(e));
        }
    };
    info!(
        partitions = flow.partition_count(),
        storage_level = %level,
        threshold,
        "materialized flow"
    );
    Ok(flow)
}

/// Objects written by the per-partition persists of one materialization
#[derive(Default)]
struct Progress {
    succeeded: usize,
    written: Vec<String>,
}

impl Progress {
    fn record<T>(&mut self, persisted: &FlowResult<PersistedFlow<T>>) {
        match persisted {
            Ok(flow) => {
                self.succeeded += 1;
                self.written
                    .extend(flow.partitions().iter().map(|(_, s)| s.path().to_string()));
            }
            Err(e) => self.written.extend(e.written_paths().iter().cloned()),
        }
    }

    /// Every failure as one `Aggregate` naming the objects left behind
    ///
    /// A cancellation that wrote nothing stays `Cancelled`.
    fn into_error(self, error: FlowError) -> FlowError {
        if error.is_cancelled() && self.written.is_empty() {
            return error;
        }
        let failures = match error {
            FlowError::Aggregate(agg) => agg.failures,
            other => vec![("materialize".to_string(), other)],
        };
        warn!(
            failures = failures.len(),
            written = self.written.len(),
            "materialize failed, leaving written objects in place"
        );
        FlowError::Aggregate(AggregateError {
            operation: "materialize",
            succeeded: self.succeeded,
            failures,
            written: self.written,
        })
    }
}
