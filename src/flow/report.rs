//! Per-partition report of a persisted flow

use crate::context::FlowContext;
use crate::error::{FlowError, FlowResult};
use crate::flow::PersistedFlow;
use crate::sequence::Element;
use futures::future;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionReport {
    pub index: usize,
    pub worker: String,
    pub count: u64,
    pub size_bytes: u64,
    pub storage_level: String,
    pub cache_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowReport {
    pub partitions: Vec<PartitionReport>,
    pub total_count: u64,
    pub total_size_bytes: u64,
}

impl FlowReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for FlowReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let worker_width = self
            .partitions
            .iter()
            .map(|p| p.worker.len())
            .chain(std::iter::once("Worker".len()))
            .max()
            .unwrap_or(0);

        writeln!(
            f,
            "{:>5}  {:<ww$}  {:>10}  {:>12}  {:<16}  Cache Id",
            "Index",
            "Worker",
            "Count",
            "Size",
            "Storage Level",
            ww = worker_width
        )?;
        for p in &self.partitions {
            writeln!(
                f,
                "{:>5}  {:<ww$}  {:>10}  {:>12}  {:<16}  {}",
                p.index,
                p.worker,
                p.count,
                p.size_bytes,
                p.storage_level,
                p.cache_id,
                ww = worker_width
            )?;
        }
        write!(
            f,
            "{} partitions, {} elements, {} bytes",
            self.partitions.len(),
            self.total_count,
            self.total_size_bytes
        )
    }
}

impl<T: Element> PersistedFlow<T> {
    /// Gather counts and sizes of every partition
    pub async fn report(&self, ctx: &FlowContext) -> FlowResult<FlowReport> {
        let partitions = future::try_join_all(self.partitions().iter().enumerate().map(
            |(index, (worker, seq))| async move {
                Ok::<_, FlowError>(PartitionReport {
                    index,
                    worker: worker.to_string(),
                    count: seq.count(ctx).await?,
                    size_bytes: seq.size(ctx).await?,
                    storage_level: seq.storage_level().to_string(),
                    cache_id: seq.cache_id(),
                })
            },
        ))
        .await?;

        Ok(FlowReport {
            total_count: partitions.iter().map(|p| p.count).sum(),
            total_size_bytes: partitions.iter().map(|p| p.size_bytes).sum(),
            partitions,
        })
    }
}
