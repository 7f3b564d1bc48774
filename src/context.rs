//! Ambient context threaded through every flow operation
//!
//! Bundles the store adapter, the cluster services, the configuration, the
//! current worker and a cancellation token. Cloning is cheap; derived contexts
//! (`with_worker`, `child`) share the store and cluster.

use crate::cluster::{Cluster, LocalCluster, StorageLevel, WorkerRef};
use crate::config::FlowConfig;
use crate::error::{FlowError, FlowResult};
use crate::store::CloudStore;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct FlowContext {
    store: Arc<dyn CloudStore>,
    cluster: Arc<dyn Cluster>,
    config: Arc<FlowConfig>,
    worker: WorkerRef,
    cancel: CancellationToken,
}

impl FlowContext {
    pub fn new(store: Arc<dyn CloudStore>, cluster: Arc<dyn Cluster>, config: FlowConfig) -> Self {
        let worker = cluster.current_worker();
        FlowContext {
            store,
            cluster,
            config: Arc::new(config),
            worker,
            cancel: CancellationToken::new(),
        }
    }

    /// Single-worker context with default configuration
    pub fn local(store: Arc<dyn CloudStore>) -> Self {
        Self::new(store, Arc::new(LocalCluster::new(1)), FlowConfig::default())
    }

    pub fn store(&self) -> &Arc<dyn CloudStore> {
        &self.store
    }

    pub fn cluster(&self) -> &Arc<dyn Cluster> {
        &self.cluster
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Worker the current computation runs on
    pub fn worker(&self) -> &WorkerRef {
        &self.worker
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Same context, running on `worker`
    pub fn with_worker(&self, worker: WorkerRef) -> Self {
        FlowContext {
            worker,
            ..self.clone()
        }
    }

    /// Same context with a replaced cancellation token
    pub fn with_cancellation(&self, cancel: CancellationToken) -> Self {
        FlowContext {
            cancel,
            ..self.clone()
        }
    }

    /// Context whose token is cancelled with ours but can also be cancelled alone
    pub fn child(&self) -> Self {
        self.with_cancellation(self.cancel.child_token())
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn check_cancelled(&self) -> FlowResult<()> {
        if self.cancel.is_cancelled() {
            Err(FlowError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Effective degree of parallelism: explicit hint, then configuration,
    /// then the number of available workers
    pub fn degree_of_parallelism(&self, hint: Option<usize>) -> usize {
        hint.or(self.config.degree_of_parallelism)
            .unwrap_or_else(|| self.cluster.available_workers().len())
            .max(1)
    }

    /// Storage level for operations that do not name one: the configured
    /// level, then the cluster's default
    pub fn default_storage_level(&self) -> StorageLevel {
        self.config
            .default_storage_level
            .unwrap_or_else(|| self.cluster.default_storage_level())
    }

    /// Round-robin placement over the available workers
    ///
    /// Falls back to the current worker when the cluster reports none.
    pub fn placement(&self) -> impl Fn(usize) -> WorkerRef {
        let workers = self.cluster.available_workers();
        let current = self.worker.clone();
        move |i| {
            if workers.is_empty() {
                current.clone()
            } else {
                workers[i % workers.len()].clone()
            }
        }
    }

    /// Drive a store future, abandoning it when the context is cancelled
    pub async fn cancellable<T, F>(&self, fut: F) -> FlowResult<T>
    where
        F: Future<Output = std::io::Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(FlowError::Cancelled),
            result = fut => result.map_err(FlowError::from),
        }
    }
}

impl std::fmt::Debug for FlowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowContext")
            .field("worker", &self.worker)
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
