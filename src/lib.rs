//! Partitioned, store-backed persisted collections
//!
//! Values are serialized into immutable objects in a cloud store, read back
//! lazily under an ETag guard, split into partitions by size, and evaluated
//! in parallel with a collector per partition.

pub mod cluster;
pub mod codec;
pub mod config;
pub mod context;
pub mod dst;
pub mod error;
pub mod evaluate;
pub mod flow;
pub mod partition;
pub mod rng;
pub mod sequence;
pub mod store;

pub use cluster::{Cluster, LocalCluster, StorageLevel, WorkerRef};
pub use codec::{BincodeCodec, CodecRef, LineCodec, SequenceCodec};
pub use config::{FlowConfig, ObjectStoreType, StoreConfig};
pub use context::FlowContext;
pub use error::{AggregateError, FlowError, FlowResult};
pub use evaluate::{
    CloudFlow, Collector, CollectorContext, Evaluation, FoldCollector, InMemoryFlow,
    ListCollector,
};
pub use flow::{materialize, FlowReport, MaterializeOptions, PersistOptions, PersistedFlow};
pub use partition::{partition, split_weighted, split_weighted_range, StreamPartitioner};
pub use sequence::{
    AttachOptions, Element, LinePartition, LineSequence, PartitionOptions, PersistedSequence,
    WriteOptions,
};
pub use store::{CloudStore, ETag, InMemoryCloudStore, LocalFsCloudStore, WriteReceipt};
