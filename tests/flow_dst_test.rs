//! Persisted Flow DST Tests
//!
//! Seed-based simulation of persist, materialize, read, attach, dispose and
//! out-of-band overwrite against a fault-injecting store.
//!
//! - **Calm tests**: No faults, every read must match what was written
//! - **Moderate tests**: Some faults, failures surface as errors, never as wrong data
//! - **Chaos tests**: Many faults, same invariants under stress
//! - **Short writes**: Truncated objects fail the write and never become flows

use cloud_flow::dst::{run_dst_batch, summarize_batch, FlowDSTConfig, FlowDSTHarness};
use cloud_flow::store::SimulatedStoreConfig;

// =============================================================================
// Single Seed Tests
// =============================================================================

#[tokio::test]
async fn test_flow_dst_single_calm() {
    let mut harness = FlowDSTHarness::new(FlowDSTConfig::calm(12345));

    harness.run(300).await;
    harness.check_invariants().await;

    let result = harness.result();
    println!("{}", result.summary());

    assert!(
        result.is_success(),
        "Calm mode should not violate invariants: {:?}",
        result.invariant_violations
    );
    assert_eq!(result.total_operations, 300);
    assert!(result.persists + result.materializes > 0);
}

#[tokio::test]
async fn test_flow_dst_single_moderate() {
    let mut harness = FlowDSTHarness::new(FlowDSTConfig::moderate(54321));

    harness.run(300).await;
    harness.check_invariants().await;

    let result = harness.result();
    println!("{}", result.summary());

    assert!(
        result.is_success(),
        "Faults must never surface as wrong data: {:?}",
        result.invariant_violations
    );
}

#[tokio::test]
async fn test_flow_dst_single_chaos() {
    let mut harness = FlowDSTHarness::new(FlowDSTConfig::chaos(99999));

    harness.run(200).await;
    harness.check_invariants().await;

    let result = harness.result();
    println!("{}", result.summary());
    println!("Store stats: {:?}", result.store_stats);

    assert!(result.is_success(), "{:?}", result.invariant_violations);
    assert!(result.failed_operations > 0, "chaos should inject failures");
}

// =============================================================================
// Multi-Seed Batch Tests
// =============================================================================

#[tokio::test]
async fn test_flow_dst_batch_calm() {
    let results = run_dst_batch(0, 25, 100, FlowDSTConfig::calm).await;
    println!("{}", summarize_batch(&results));

    for result in &results {
        assert!(
            result.is_success(),
            "Seed {} failed: {:?}",
            result.seed,
            result.invariant_violations
        );
    }
}

#[tokio::test]
async fn test_flow_dst_batch_moderate() {
    let results = run_dst_batch(10_000, 25, 100, FlowDSTConfig::moderate).await;
    println!("{}", summarize_batch(&results));

    let failed: Vec<_> = results.iter().filter(|r| !r.is_success()).collect();
    assert!(
        failed.is_empty(),
        "Seeds with violations: {:?}",
        failed.iter().map(|r| (r.seed, &r.invariant_violations)).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_flow_dst_batch_chaos() {
    let results = run_dst_batch(50_000, 15, 100, FlowDSTConfig::chaos).await;
    println!("{}", summarize_batch(&results));

    assert!(results.iter().all(|r| r.is_success()), "{}", summarize_batch(&results));
}

#[tokio::test]
async fn test_flow_dst_batch_short_writes() {
    let results = run_dst_batch(70_000, 15, 100, |seed| FlowDSTConfig {
        store_config: SimulatedStoreConfig {
            partial_write_prob: 0.1,
            write_fail_prob: 0.05,
            ..SimulatedStoreConfig::no_faults()
        },
        ..FlowDSTConfig::calm(seed)
    })
    .await;
    println!("{}", summarize_batch(&results));

    for result in &results {
        assert!(
            result.is_success(),
            "Seed {}: {:?}",
            result.seed,
            result.invariant_violations
        );
    }
    assert!(results.iter().any(|r| r.orphaned_objects > 0));
}

// =============================================================================
// Reproducibility
// =============================================================================

#[tokio::test]
async fn test_flow_dst_same_seed_same_history() {
    let run = |seed| async move {
        let mut harness = FlowDSTHarness::new(FlowDSTConfig::calm(seed));
        harness.run(80).await;
        harness.check_invariants().await;
        harness.into_result()
    };

    let first = run(777).await;
    let second = run(777).await;

    assert_eq!(first.history.len(), second.history.len());
    for (a, b) in first.history.iter().zip(&second.history) {
        assert_eq!(format!("{:?}", a.operation), format!("{:?}", b.operation));
        // Failure messages name random object paths
        assert_eq!(
            std::mem::discriminant(&a.outcome),
            std::mem::discriminant(&b.outcome)
        );
    }
    assert_eq!(first.store_stats, second.store_stats);
}

#[tokio::test]
async fn test_flow_dst_custom_config_without_overwrites() {
    let config = FlowDSTConfig {
        overwrite_probability: 0.0,
        dispose_probability: 0.0,
        ..FlowDSTConfig::calm(4242)
    };
    let mut harness = FlowDSTHarness::new(config);
    harness.run(100).await;
    harness.check_invariants().await;

    let result = harness.result();
    assert!(result.is_success(), "{:?}", result.invariant_violations);
    // Nothing removed or replaced, so every operation succeeds
    assert_eq!(result.failed_operations, 0, "{}", result.summary());
    assert_eq!(result.stale_reads, 0);
}
