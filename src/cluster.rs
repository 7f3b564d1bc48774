//! Cluster context consumed by the flow layer
//!
//! Worker references are placement hints only. Storage levels are capability
//! flags; a flow reports the intersection of its partitions' levels.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Logical identifier of a compute node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerRef(Arc<str>);

impl WorkerRef {
    pub fn new(id: impl AsRef<str>) -> Self {
        WorkerRef(Arc::from(id.as_ref()))
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a partition's data may be materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageLevel(u8);

impl StorageLevel {
    /// Deserialized objects held in memory
    pub const MEMORY: StorageLevel = StorageLevel(1);
    /// Serialized bytes held in memory
    pub const MEMORY_SERIALIZED: StorageLevel = StorageLevel(2);
    /// Local disk cache
    pub const DISK: StorageLevel = StorageLevel(4);
    pub const MEMORY_AND_DISK: StorageLevel = StorageLevel(1 | 4);
    pub const MEMORY_AND_DISK_SERIALIZED: StorageLevel = StorageLevel(2 | 4);

    const ALL: u8 = 1 | 2 | 4;

    pub fn from_bits(bits: u8) -> Option<StorageLevel> {
        if bits == 0 || bits & !Self::ALL != 0 {
            None
        } else {
            Some(StorageLevel(bits))
        }
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: StorageLevel) -> bool {
        self.0 & other.0 == other.0
    }

    /// Capabilities guaranteed by both levels; `None` when they share none
    pub fn intersect(self, other: StorageLevel) -> Option<StorageLevel> {
        StorageLevel::from_bits(self.0 & other.0)
    }
}

impl fmt::Display for StorageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.contains(StorageLevel::MEMORY) {
            parts.push("Memory");
        }
        if self.contains(StorageLevel::MEMORY_SERIALIZED) {
            parts.push("MemorySerialized");
        }
        if self.contains(StorageLevel::DISK) {
            parts.push("Disk");
        }
        f.write_str(&parts.join("|"))
    }
}

/// Runtime services the flow layer needs from the cluster
pub trait Cluster: Send + Sync + 'static {
    /// Worker the calling computation runs on
    fn current_worker(&self) -> WorkerRef;

    /// Workers available for placement, in a stable order
    fn available_workers(&self) -> Vec<WorkerRef>;

    fn default_storage_level(&self) -> StorageLevel;

    fn is_storage_level_supported(&self, level: StorageLevel) -> bool;
}

/// In-process cluster with a fixed worker list
#[derive(Debug, Clone)]
pub struct LocalCluster {
    workers: Vec<WorkerRef>,
    current: usize,
    supported: StorageLevel,
    default_level: StorageLevel,
}

impl LocalCluster {
    /// Cluster of `worker_count` workers named `worker-0`, `worker-1`, ...
    pub fn new(worker_count: usize) -> Self {
        let workers = (0..worker_count.max(1))
            .map(|i| WorkerRef::new(format!("worker-{}", i)))
            .collect();
        LocalCluster {
            workers,
            current: 0,
            supported: StorageLevel::MEMORY_AND_DISK,
            default_level: StorageLevel::MEMORY_AND_DISK,
        }
    }

    /// Restrict which storage-level capabilities the cluster accepts
    pub fn with_supported_levels(mut self, supported: StorageLevel) -> Self {
        self.supported = supported;
        if !supported.contains(self.default_level) {
            self.default_level = supported;
        }
        self
    }

    /// The same cluster seen from another worker
    pub fn on_worker(&self, index: usize) -> Self {
        LocalCluster {
            current: index % self.workers.len(),
            ..self.clone()
        }
    }
}

impl Cluster for LocalCluster {
    fn current_worker(&self) -> WorkerRef {
        self.workers[self.current].clone()
    }

    fn available_workers(&self) -> Vec<WorkerRef> {
        self.workers.clone()
    }

    fn default_storage_level(&self) -> StorageLevel {
        self.default_level
    }

    fn is_storage_level_supported(&self, level: StorageLevel) -> bool {
        self.supported.contains(level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_level_intersection() {
        let both = StorageLevel::MEMORY_AND_DISK;
        assert_eq!(both.intersect(StorageLevel::DISK), Some(StorageLevel::DISK));
        assert_eq!(StorageLevel::MEMORY.intersect(StorageLevel::DISK), None);
        assert!(both.contains(StorageLevel::MEMORY));
        assert!(!StorageLevel::MEMORY.contains(both));
        assert_eq!(both.to_string(), "Memory|Disk");
    }

    #[test]
    fn test_storage_level_from_bits() {
        assert_eq!(StorageLevel::from_bits(0), None);
        assert_eq!(StorageLevel::from_bits(8), None);
        assert_eq!(StorageLevel::from_bits(6), Some(StorageLevel::MEMORY_AND_DISK_SERIALIZED));
    }

    #[test]
    fn test_local_cluster_supported_levels() {
        let cluster = LocalCluster::new(3).with_supported_levels(StorageLevel::DISK);
        assert!(cluster.is_storage_level_supported(StorageLevel::DISK));
        assert!(!cluster.is_storage_level_supported(StorageLevel::MEMORY));
        assert_eq!(cluster.default_storage_level(), StorageLevel::DISK);
        assert_eq!(cluster.available_workers().len(), 3);
        assert_eq!(cluster.on_worker(4).current_worker().id(), "worker-1");
    }
}
