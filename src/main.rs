//! Persisted flow walkthrough
//!
//! Persists a range of numbers into the configured store, prints the
//! partition report, runs a parallel sum, materializes an in-memory flow,
//! splits a line file by weights, then disposes everything it wrote.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | CLOUDFLOW_STORE_TYPE | memory | memory or localfs |
//! | CLOUDFLOW_DATA_PATH | /tmp/cloudflow | LocalFs root |
//! | CLOUDFLOW_CONFIG | - | TOML file with `FlowConfig` overrides |
//! | CLOUDFLOW_WORKERS | 4 | Workers in the local cluster |
//! | CLOUDFLOW_ELEMENTS | 100000 | Numbers to persist |
//! | RUST_LOG | info | Log filter |

use cloud_flow::evaluate::{CollectorContext, Evaluation, FoldCollector};
use cloud_flow::{
    materialize, CloudFlow, FlowConfig, FlowContext, InMemoryFlow, LineSequence, LocalCluster,
    MaterializeOptions, ObjectStoreType, PersistOptions, PersistedFlow, StoreConfig,
};
use futures::future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_WORKERS: usize = 4;
const DEFAULT_ELEMENTS: u64 = 100_000;

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn store_config() -> StoreConfig {
    match std::env::var("CLOUDFLOW_STORE_TYPE").as_deref() {
        Ok("localfs") => StoreConfig::local(PathBuf::from(env_or(
            "CLOUDFLOW_DATA_PATH",
            "/tmp/cloudflow".to_string(),
        ))),
        _ => StoreConfig::default(),
    }
}

fn flow_config() -> std::io::Result<FlowConfig> {
    match std::env::var("CLOUDFLOW_CONFIG") {
        Ok(path) => FlowConfig::load(std::path::Path::new(&path)),
        Err(_) => Ok(FlowConfig {
            // Small enough that the walkthrough produces several partitions
            partition_threshold: 256 * 1024,
            ..FlowConfig::default()
        }),
    }
}

fn add(sum: &mut u64, x: u64) {
    *sum += x;
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let store_config = store_config();
    let store = store_config.build()?;
    let workers = env_or("CLOUDFLOW_WORKERS", DEFAULT_WORKERS).max(1);
    let elements = env_or("CLOUDFLOW_ELEMENTS", DEFAULT_ELEMENTS);
    let ctx = FlowContext::new(store, Arc::new(LocalCluster::new(workers)), flow_config()?);

    info!(
        store = ?store_config.store_type,
        workers,
        elements,
        threshold = ctx.config().partition_threshold,
        "starting walkthrough"
    );
    if store_config.store_type == ObjectStoreType::LocalFs {
        info!(path = ?store_config.local_path, "objects are kept on the local filesystem until disposed");
    }

    // Persist and report
    let numbers = PersistedFlow::persist(&ctx, 0..elements, PersistOptions::default()).await?;
    println!("{}\n", numbers.report(&ctx).await?);

    // Parallel sum, one fold per partition
    let sum = numbers
        .evaluate(
            &ctx,
            Evaluation::new(
                |cx: CollectorContext| FoldCollector::new(cx, 0u64, add as fn(&mut u64, u64)),
                |partial: u64| future::ready(Ok(partial)),
                |partials: Vec<u64>| Ok(partials.into_iter().sum::<u64>()),
            ),
        )
        .await?;
    println!("sum of 0..{} = {}", elements, sum);

    // Materialize an in-memory flow of squares
    let squares = InMemoryFlow::new((0..1000u64).map(|x| x * x).collect())
        .with_degree_of_parallelism(workers * 2);
    let persisted_squares = materialize(&ctx, &squares, MaterializeOptions::default()).await?;
    println!(
        "materialized {} squares into {} partitions",
        persisted_squares.count(&ctx).await?,
        persisted_squares.partition_count()
    );

    // Line file split by weights
    let text: Vec<String> = (0..200).map(|i| format!("line {} of the sample", i)).collect();
    let lines = LineSequence::new(&ctx, text, None).await?;
    let weights = vec![1u32; workers];
    let parts = lines.partition_by_weights(&ctx, &weights).await?;
    for (i, part) in parts.iter().enumerate() {
        let part_lines = part.to_vec(ctx.cancellation_token().clone()).await?;
        println!(
            "line partition {}: {} lines, first {:?}",
            i,
            part_lines.len(),
            part_lines.first()
        );
    }
    println!("lines via flow: {}", lines.collect(&ctx).await?.len());

    numbers.dispose(&ctx).await?;
    persisted_squares.dispose(&ctx).await?;
    lines.sequence().dispose(&ctx).await?;
    info!("disposed all objects");

    Ok(())
}
