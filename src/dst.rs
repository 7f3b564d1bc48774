//! Deterministic Simulation Testing for persisted flows
//!
//! Shadow-state harness that drives random flow operations against a
//! fault-injecting store and checks invariants as it goes:
//! - Deterministic random workload generation
//! - Fault injection at the store layer
//! - Invariant checking after each operation and at the end of a run
//! - Seed-based reproducibility for debugging
//!
//! ```text
//! for seed in 0..1000 {
//!     let mut harness = FlowDSTHarness::new(FlowDSTConfig::moderate(seed));
//!     harness.run(200).await;
//!     harness.check_invariants().await;
//!     assert!(harness.result().is_success(), "seed {}", seed);
//! }
//! ```
//!
//! Writes that fail part-way must say so: every path a failed persist or
//! materialize reports as written has to exist, and an injected short write
//! must never end up inside a flow that was returned as written.

use crate::cluster::LocalCluster;
use crate::config::FlowConfig;
use crate::context::FlowContext;
use crate::error::FlowError;
use crate::evaluate::{CloudFlow, InMemoryFlow};
use crate::flow::{materialize, MaterializeOptions, PersistOptions, PersistedFlow};
use crate::rng::DeterministicRng;
use crate::sequence::{AttachOptions, PersistedSequence};
use crate::store::{
    CloudStore, InMemoryCloudStore, SimulatedCloudStore, SimulatedStoreConfig,
    SimulatedStoreStats,
};
use bytes::Bytes;
use std::sync::Arc;
use tracing::warn;

/// Configuration for flow DST
#[derive(Debug, Clone)]
pub struct FlowDSTConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Store fault configuration
    pub store_config: SimulatedStoreConfig,
    /// Flow configuration used by the harness context
    pub flow_config: FlowConfig,
    /// Number of workers in the simulated cluster
    pub workers: usize,
    pub persist_probability: f64,
    pub materialize_probability: f64,
    pub dispose_probability: f64,
    pub attach_probability: f64,
    /// Probability of overwriting a partition behind the flow's back
    pub overwrite_probability: f64,
    /// Largest number of elements in one persisted input
    pub max_values: u64,
}

impl Default for FlowDSTConfig {
    fn default() -> Self {
        FlowDSTConfig {
            seed: 0,
            store_config: SimulatedStoreConfig::default(),
            flow_config: FlowConfig::test(),
            workers: 3,
            persist_probability: 0.3,
            materialize_probability: 0.1,
            dispose_probability: 0.1,
            attach_probability: 0.15,
            overwrite_probability: 0.03,
            max_values: 200,
        }
    }
}

impl FlowDSTConfig {
    pub fn new(seed: u64) -> Self {
        FlowDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// Calm mode - no fault injection
    pub fn calm(seed: u64) -> Self {
        FlowDSTConfig {
            seed,
            store_config: SimulatedStoreConfig::no_faults(),
            ..Default::default()
        }
    }

    /// Moderate fault injection
    pub fn moderate(seed: u64) -> Self {
        FlowDSTConfig {
            seed,
            store_config: SimulatedStoreConfig::default(),
            ..Default::default()
        }
    }

    /// Chaos mode - aggressive fault injection
    pub fn chaos(seed: u64) -> Self {
        FlowDSTConfig {
            seed,
            store_config: SimulatedStoreConfig::high_chaos(),
            overwrite_probability: 0.05,
            ..Default::default()
        }
    }
}

/// Flow operation type
#[derive(Debug, Clone)]
pub enum FlowOperation {
    /// Persist values with a partition threshold
    Persist { values: Vec<u64>, threshold: u64 },
    /// Materialize an in-memory flow
    Materialize {
        values: Vec<u64>,
        degree_of_parallelism: usize,
        threshold: u64,
    },
    /// Read every element of a tracked flow
    Read { slot: usize },
    /// Attach to the first partition of a tracked flow
    Attach { slot: usize },
    /// Dispose a tracked flow
    Dispose { slot: usize },
    /// Replace the first partition's object out of band
    Overwrite { slot: usize },
}

/// Outcome of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Success,
    /// Operation failed (expected under fault injection)
    Failed(String),
}

/// Recorded operation for history tracking
#[derive(Debug, Clone)]
pub struct RecordedOperation {
    pub id: u64,
    pub operation: FlowOperation,
    pub outcome: OperationOutcome,
}

/// Workload generator
pub struct FlowWorkload {
    rng: DeterministicRng,
    config: FlowDSTConfig,
    operation_counter: u64,
}

impl FlowWorkload {
    pub fn new(config: FlowDSTConfig) -> Self {
        FlowWorkload {
            rng: DeterministicRng::new(config.seed),
            config,
            operation_counter: 0,
        }
    }

    /// Generate the next operation given how many flows are tracked
    pub fn next_operation(&mut self, tracked_flows: usize) -> FlowOperation {
        self.operation_counter += 1;
        let roll = self.rng.next_u64() as f64 / u64::MAX as f64;
        let c = &self.config;

        let persist = c.persist_probability;
        let materialize = persist + c.materialize_probability;
        let dispose = materialize + c.dispose_probability;
        let attach = dispose + c.attach_probability;
        let overwrite = attach + c.overwrite_probability;

        if roll < persist || tracked_flows == 0 {
            FlowOperation::Persist {
                values: self.next_values(),
                threshold: self.next_threshold(),
            }
        } else if roll < materialize {
            FlowOperation::Materialize {
                values: self.next_values(),
                degree_of_parallelism: self.rng.gen_range(1, 6) as usize,
                threshold: self.next_threshold(),
            }
        } else {
            let slot = self.rng.gen_range(0, tracked_flows as u64) as usize;
            if roll < dispose {
                FlowOperation::Dispose { slot }
            } else if roll < attach {
                FlowOperation::Attach { slot }
            } else if roll < overwrite {
                FlowOperation::Overwrite { slot }
            } else {
                FlowOperation::Read { slot }
            }
        }
    }

    fn next_values(&mut self) -> Vec<u64> {
        let len = self.rng.gen_range(0, self.config.max_values + 1);
        let base = self.operation_counter * 1_000_000;
        (base..base + len).collect()
    }

    fn next_threshold(&mut self) -> u64 {
        // 16-byte records behind a 5-byte header
        const THRESHOLDS: [u64; 4] = [16, 64, 256, 4096];
        THRESHOLDS[self.rng.gen_range(0, THRESHOLDS.len() as u64) as usize]
    }
}

/// Result of a DST run
#[derive(Debug, Clone)]
pub struct FlowDSTResult {
    /// Seed used
    pub seed: u64,
    pub total_operations: u64,
    pub successful_operations: u64,
    /// Failed operations (expected under faults)
    pub failed_operations: u64,
    pub persists: u64,
    pub materializes: u64,
    pub disposes: u64,
    /// Reads rejected because the object changed underneath
    pub stale_reads: u64,
    /// Objects failed writes reported as left in the store
    pub orphaned_objects: u64,
    /// Store fault statistics
    pub store_stats: SimulatedStoreStats,
    /// Invariant violations found
    pub invariant_violations: Vec<String>,
    /// Operation history
    pub history: Vec<RecordedOperation>,
}

impl FlowDSTResult {
    pub fn new(seed: u64) -> Self {
        FlowDSTResult {
            seed,
            total_operations: 0,
            successful_operations: 0,
            failed_operations: 0,
            persists: 0,
            materializes: 0,
            disposes: 0,
            stale_reads: 0,
            orphaned_objects: 0,
            store_stats: SimulatedStoreStats::default(),
            invariant_violations: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} ops ({} ok, {} failed), {} persists, {} materializes, {} disposes, {} stale reads, {} orphaned objects, {} violations",
            self.seed,
            self.total_operations,
            self.successful_operations,
            self.failed_operations,
            self.persists,
            self.materializes,
            self.disposes,
            self.stale_reads,
            self.orphaned_objects,
            self.invariant_violations.len()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShadowState {
    Live,
    Disposed,
    /// First partition replaced out of band
    Overwritten,
    /// Disposal failed part-way
    Unknown,
}

struct ShadowFlow {
    flow: PersistedFlow<u64>,
    expected: Vec<u64>,
    state: ShadowState,
}

type DSTStore = SimulatedCloudStore<InMemoryCloudStore>;

/// Main DST harness for persisted flows
pub struct FlowDSTHarness {
    config: FlowDSTConfig,
    store: DSTStore,
    inner_store: InMemoryCloudStore,
    ctx: FlowContext,
    workload: FlowWorkload,
    flows: Vec<ShadowFlow>,
    result: FlowDSTResult,
}

impl FlowDSTHarness {
    pub fn new(config: FlowDSTConfig) -> Self {
        let inner_store = InMemoryCloudStore::new();
        // Different seed for the store than for the workload
        let store = SimulatedCloudStore::new(
            inner_store.clone(),
            config.seed.wrapping_add(1),
            config.store_config.clone(),
        );
        let ctx = FlowContext::new(
            Arc::new(store.clone()),
            Arc::new(LocalCluster::new(config.workers)),
            config.flow_config.clone(),
        );

        FlowDSTHarness {
            workload: FlowWorkload::new(config.clone()),
            result: FlowDSTResult::new(config.seed),
            config,
            store,
            inner_store,
            ctx,
            flows: Vec::new(),
        }
    }

    /// Run the workload for a specified number of operations
    pub async fn run(&mut self, operations: usize) {
        for _ in 0..operations {
            let op = self.workload.next_operation(self.flows.len());
            self.execute_operation(op).await;
        }
    }

    async fn execute_operation(&mut self, op: FlowOperation) {
        self.result.total_operations += 1;
        let id = self.result.total_operations;

        let outcome = match &op {
            FlowOperation::Persist { values, threshold } => {
                self.execute_persist(values, *threshold).await
            }
            FlowOperation::Materialize {
                values,
                degree_of_parallelism,
                threshold,
            } => {
                self.execute_materialize(values, *degree_of_parallelism, *threshold)
                    .await
            }
            FlowOperation::Read { slot } => self.execute_read(*slot).await,
            FlowOperation::Attach { slot } => self.execute_attach(*slot).await,
            FlowOperation::Dispose { slot } => self.execute_dispose(*slot).await,
            FlowOperation::Overwrite { slot } => self.execute_overwrite(*slot).await,
        };

        match &outcome {
            OperationOutcome::Success => self.result.successful_operations += 1,
            OperationOutcome::Failed(_) => self.result.failed_operations += 1,
        }
        self.result.history.push(RecordedOperation {
            id,
            operation: op,
            outcome,
        });
    }

    fn violation(&mut self, msg: String) {
        warn!(seed = self.config.seed, "{}", msg);
        self.result.invariant_violations.push(msg);
    }

    async fn execute_persist(&mut self, values: &[u64], threshold: u64) -> OperationOutcome {
        let short_writes = self.store.stats().partial_writes;
        let persisted = PersistedFlow::persist(
            &self.ctx,
            values.to_vec(),
            PersistOptions {
                partition_threshold: Some(threshold),
                ..Default::default()
            },
        )
        .await;

        match persisted {
            Ok(flow) => {
                self.result.persists += 1;
                self.check_no_short_write(short_writes, "persist");
                self.track(flow, values.to_vec(), threshold).await;
                OperationOutcome::Success
            }
            Err(e) => self.failed_write(e).await,
        }
    }

    async fn execute_materialize(
        &mut self,
        values: &[u64],
        degree_of_parallelism: usize,
        threshold: u64,
    ) -> OperationOutcome {
        let short_writes = self.store.stats().partial_writes;
        let source =
            InMemoryFlow::new(values.to_vec()).with_degree_of_parallelism(degree_of_parallelism);
        let materialized = materialize(
            &self.ctx,
            &source,
            MaterializeOptions {
                partition_threshold: Some(threshold),
                ..Default::default()
            },
        )
        .await;

        match materialized {
            Ok(flow) => {
                self.result.materializes += 1;
                self.check_no_short_write(short_writes, "materialize");
                if source.known_count() != Some(values.len() as u64) {
                    self.violation("in-memory source lost its element count".to_string());
                }
                self.track(flow, values.to_vec(), threshold).await;
                OperationOutcome::Success
            }
            Err(e) => self.failed_write(e).await,
        }
    }

    /// Every evaluation task has finished by the time a write returns, so a
    /// short write injected since `before` belongs to this operation
    fn check_no_short_write(&mut self, before: u64, operation: &str) {
        let injected = self.store.stats().partial_writes - before;
        if injected > 0 {
            self.violation(format!(
                "{} succeeded despite {} short writes",
                operation, injected
            ));
        }
    }

    /// Objects a failed write reports as written must exist
    async fn failed_write(&mut self, error: FlowError) -> OperationOutcome {
        for path in error.written_paths() {
            self.result.orphaned_objects += 1;
            if !self.inner_store.contains(path) {
                self.violation(format!("reported written object {} is missing", path));
            }
        }
        OperationOutcome::Failed(error.to_string())
    }

    /// Check a freshly written flow, then start tracking it
    async fn track(&mut self, flow: PersistedFlow<u64>, expected: Vec<u64>, threshold: u64) {
        // Invariant: count recorded at write time is exact
        if flow.known_count() != Some(expected.len() as u64) {
            self.violation(format!(
                "flow of {} elements reports count {:?}",
                expected.len(),
                flow.known_count()
            ));
        }

        // Invariant: partitions respect the threshold unless they hold one element
        for (index, (_, seq)) in flow.partitions().iter().enumerate() {
            if seq.cached_count() == Some(0) {
                self.violation(format!("partition {} of {} is empty", index, seq.path()));
            }
            if let Ok(size) = self.inner_store.get_size(seq.path()).await {
                if size > threshold && seq.cached_count() != Some(1) {
                    self.violation(format!(
                        "partition {} is {} bytes, over threshold {}",
                        seq.path(),
                        size,
                        threshold
                    ));
                }
            }
        }

        self.flows.push(ShadowFlow {
            flow,
            expected,
            state: ShadowState::Live,
        });
    }

    async fn execute_read(&mut self, slot: usize) -> OperationOutcome {
        let flow = self.flows[slot].flow.clone();
        let read = flow.to_vec(&self.ctx).await;
        self.check_read(slot, read.as_ref().ok().map(Vec::as_slice));
        match read {
            Ok(_) => OperationOutcome::Success,
            Err(e) => {
                if e.is_stale() {
                    self.result.stale_reads += 1;
                }
                OperationOutcome::Failed(e.to_string())
            }
        }
    }

    /// Invariants for a read of a tracked flow; `None` when the read failed
    fn check_read(&mut self, slot: usize, read: Option<&[u64]>) {
        let shadow = &self.flows[slot];
        let has_partitions = shadow.flow.partition_count() > 0;
        let msg = match (shadow.state, read) {
            (ShadowState::Live, Some(values)) => (values != shadow.expected.as_slice()).then(|| {
                format!(
                    "flow {} read {} elements, expected {}",
                    slot,
                    values.len(),
                    shadow.expected.len()
                )
            }),
            (ShadowState::Disposed | ShadowState::Overwritten, Some(_)) if has_partitions => {
                Some(format!("flow {} read after its data was removed", slot))
            }
            _ => None,
        };
        if let Some(msg) = msg {
            self.violation(msg);
        }
    }

    async fn execute_attach(&mut self, slot: usize) -> OperationOutcome {
        let shadow = &self.flows[slot];
        let Some((_, first)) = shadow.flow.partitions().first() else {
            return OperationOutcome::Success;
        };
        let (path, etag, state) = (first.path().to_string(), first.etag().to_string(), shadow.state);

        let attached =
            PersistedSequence::<u64>::of_store_object(&self.ctx, path.clone(), AttachOptions::default())
                .await;
        match (state, &attached) {
            (ShadowState::Live, Ok(seq)) if seq.etag() != etag => {
                self.violation(format!("attach to {} saw a different ETag", path))
            }
            (ShadowState::Live, Err(e)) if e.is_not_found() => {
                self.violation(format!("live partition {} not found", path))
            }
            (ShadowState::Disposed, Ok(_)) => {
                self.violation(format!("disposed partition {} still attachable", path))
            }
            (ShadowState::Overwritten, Ok(seq)) if seq.etag() == etag => {
                self.violation(format!("overwritten partition {} kept its ETag", path))
            }
            _ => {}
        }

        match attached {
            Ok(_) => OperationOutcome::Success,
            Err(e) => OperationOutcome::Failed(e.to_string()),
        }
    }

    async fn execute_dispose(&mut self, slot: usize) -> OperationOutcome {
        let flow = self.flows[slot].flow.clone();
        match flow.dispose(&self.ctx).await {
            Ok(()) => {
                self.result.disposes += 1;
                self.flows[slot].state = ShadowState::Disposed;
                for (_, seq) in flow.partitions() {
                    if self.inner_store.contains(seq.path()) {
                        self.violation(format!("disposed partition {} still stored", seq.path()));
                    }
                }
                OperationOutcome::Success
            }
            Err(e) => {
                if self.flows[slot].state != ShadowState::Disposed {
                    self.flows[slot].state = ShadowState::Unknown;
                }
                OperationOutcome::Failed(e.to_string())
            }
        }
    }

    async fn execute_overwrite(&mut self, slot: usize) -> OperationOutcome {
        let shadow = &self.flows[slot];
        if shadow.state != ShadowState::Live {
            return OperationOutcome::Success;
        }
        let Some((_, first)) = shadow.flow.partitions().first() else {
            return OperationOutcome::Success;
        };
        let path = first.path().to_string();

        // Out of band and fault-free: the flow's ETag is now stale
        match self
            .inner_store
            .write_with_etag(&path, Bytes::from_static(b"replaced out of band"))
            .await
        {
            Ok(_) => {
                self.flows[slot].state = ShadowState::Overwritten;
                OperationOutcome::Success
            }
            Err(e) => OperationOutcome::Failed(e.to_string()),
        }
    }

    /// Check end-of-run invariants against the fault-free store
    pub async fn check_invariants(&mut self) {
        let verify_ctx = FlowContext::new(
            Arc::new(self.inner_store.clone()),
            Arc::new(LocalCluster::new(self.config.workers)),
            self.config.flow_config.clone(),
        );

        for slot in 0..self.flows.len() {
            let flow = self.flows[slot].flow.clone();
            match self.flows[slot].state {
                ShadowState::Live => {
                    let read = flow.to_vec(&verify_ctx).await;
                    if let Err(e) = &read {
                        self.violation(format!(
                            "live flow {} unreadable without faults: {}",
                            slot, e
                        ));
                    }
                    self.check_read(slot, read.as_ref().ok().map(Vec::as_slice));
                }
                ShadowState::Overwritten => {
                    let read = flow.to_vec(&verify_ctx).await;
                    if !matches!(&read, Err(e) if e.is_stale()) {
                        self.violation(format!("overwritten flow {} not detected as stale", slot));
                    }
                }
                ShadowState::Disposed => {
                    for (_, seq) in flow.partitions() {
                        if self.inner_store.contains(seq.path()) {
                            self.violation(format!(
                                "disposed partition {} reappeared",
                                seq.path()
                            ));
                        }
                    }
                }
                ShadowState::Unknown => {}
            }
        }

        self.result.store_stats = self.store.stats();
    }

    pub fn result(&self) -> &FlowDSTResult {
        &self.result
    }

    pub fn into_result(self) -> FlowDSTResult {
        self.result
    }
}

/// Run a batch of DST runs with consecutive seeds
pub async fn run_dst_batch(
    base_seed: u64,
    count: usize,
    ops_per_run: usize,
    config_fn: impl Fn(u64) -> FlowDSTConfig,
) -> Vec<FlowDSTResult> {
    let mut results = Vec::with_capacity(count);

    for i in 0..count {
        let seed = base_seed + i as u64;
        let mut harness = FlowDSTHarness::new(config_fn(seed));
        harness.run(ops_per_run).await;
        harness.check_invariants().await;
        results.push(harness.into_result());
    }

    results
}

/// Summary of batch results
pub fn summarize_batch(results: &[FlowDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed_seeds: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();

    let total_ops: u64 = results.iter().map(|r| r.total_operations).sum();
    let total_persists: u64 = results.iter().map(|r| r.persists + r.materializes).sum();
    let total_disposes: u64 = results.iter().map(|r| r.disposes).sum();

    let mut summary = format!(
        "Batch: {}/{} passed, {} total ops, {} flows written, {} disposed",
        passed, total, total_ops, total_persists, total_disposes
    );

    if !failed_seeds.is_empty() {
        summary.push_str(&format!("\nFailed seeds: {:?}", failed_seeds));
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dst_harness_calm() {
        let mut harness = FlowDSTHarness::new(FlowDSTConfig::calm(42));
        harness.run(100).await;
        harness.check_invariants().await;

        let result = harness.result();
        assert!(
            result.is_success(),
            "Calm mode should not have invariant violations: {:?}",
            result.invariant_violations
        );
        assert_eq!(result.total_operations, 100);
        assert_eq!(result.store_stats.write_failures, 0, "{}", result.summary());
        assert!(result.persists > 0);
    }

    #[tokio::test]
    async fn test_dst_harness_with_faults() {
        let mut harness = FlowDSTHarness::new(FlowDSTConfig::moderate(123));
        harness.run(200).await;
        harness.check_invariants().await;

        let result = harness.result();
        assert!(
            result.is_success(),
            "{}: {:?}",
            result.summary(),
            result.invariant_violations
        );
        assert!(result.store_stats.write_attempts > 0);
    }

    #[tokio::test]
    async fn test_dst_deterministic() {
        let seed = 12345;

        let mut harness1 = FlowDSTHarness::new(FlowDSTConfig::calm(seed));
        harness1.run(50).await;
        let mut harness2 = FlowDSTHarness::new(FlowDSTConfig::calm(seed));
        harness2.run(50).await;

        let r1 = harness1.result();
        let r2 = harness2.result();
        assert_eq!(r1.successful_operations, r2.successful_operations);
        assert_eq!(r1.persists, r2.persists);
        assert_eq!(r1.disposes, r2.disposes);
        assert_eq!(r1.store_stats, r2.store_stats);
    }

    #[tokio::test]
    async fn test_dst_batch_calm() {
        let results = run_dst_batch(1000, 10, 50, FlowDSTConfig::calm).await;
        println!("{}", summarize_batch(&results));
        assert!(results.iter().all(|r| r.is_success()), "All calm runs should pass");
    }

    #[tokio::test]
    async fn test_dst_batch_chaos() {
        let results = run_dst_batch(2000, 10, 100, FlowDSTConfig::chaos).await;
        println!("{}", summarize_batch(&results));
        for r in &results {
            assert!(r.is_success(), "{}: {:?}", r.summary(), r.invariant_violations);
        }
    }

    #[tokio::test]
    async fn test_dst_short_writes_never_become_flows() {
        let config = FlowDSTConfig {
            store_config: SimulatedStoreConfig {
                partial_write_prob: 0.2,
                ..SimulatedStoreConfig::no_faults()
            },
            ..FlowDSTConfig::calm(31337)
        };
        let mut harness = FlowDSTHarness::new(config);
        harness.run(150).await;
        harness.check_invariants().await;

        let result = harness.result();
        assert!(result.is_success(), "{:?}", result.invariant_violations);
        assert!(result.store_stats.partial_writes > 0);
        assert!(result.failed_operations > 0);
    }

    #[test]
    fn test_workload_generator() {
        let mut workload = FlowWorkload::new(FlowDSTConfig::new(42));

        assert!(matches!(workload.next_operation(0), FlowOperation::Persist { .. }));

        let (mut persists, mut materializes, mut reads, mut disposes) = (0, 0, 0, 0);
        for _ in 0..1000 {
            match workload.next_operation(5) {
                FlowOperation::Persist { .. } => persists += 1,
                FlowOperation::Materialize { .. } => materializes += 1,
                FlowOperation::Read { slot } => {
                    assert!(slot < 5);
                    reads += 1;
                }
                FlowOperation::Dispose { .. } => disposes += 1,
                FlowOperation::Attach { .. } | FlowOperation::Overwrite { .. } => {}
            }
        }
        assert!(persists > 200);
        assert!(materializes > 0);
        assert!(reads > 200);
        assert!(disposes > 0);
    }
}
