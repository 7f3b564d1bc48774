//! Configuration for persisted flows
//!
//! `FlowConfig` carries the defaults every optional parameter falls back to;
//! `StoreConfig` selects the store adapter.

use crate::cluster::StorageLevel;
use crate::store::{CloudStore, InMemoryCloudStore, LocalFsCloudStore};
use serde::{Deserialize, Serialize};
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::PathBuf;
use std::sync::Arc;

/// 1 GiB
pub const DEFAULT_PARTITION_THRESHOLD: u64 = 1024 * 1024 * 1024;
/// 512 KiB
pub const DEFAULT_SMALL_FILE_THRESHOLD: u64 = 512 * 1024;
/// 64 KiB
pub const DEFAULT_RANGE_READ_CHUNK: u64 = 64 * 1024;

/// Defaults for flow and sequence operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Maximum serialized size of a persisted partition (default: 1 GiB)
    pub partition_threshold: u64,
    /// Line sequences below this size may be split in memory (default: 512 KiB)
    pub small_file_threshold: u64,
    /// Store directory for randomly named partitions
    pub directory: String,
    /// Read-ahead used to finish a line that crosses a range boundary (default: 64 KiB)
    pub range_read_chunk: u64,
    /// Degree of parallelism for evaluation; `None` uses the worker count
    pub degree_of_parallelism: Option<usize>,
    /// Storage level used when an operation does not name one; `None` uses
    /// the cluster's default
    pub default_storage_level: Option<StorageLevel>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        FlowConfig {
            partition_threshold: DEFAULT_PARTITION_THRESHOLD,
            small_file_threshold: DEFAULT_SMALL_FILE_THRESHOLD,
            directory: "cloudflow".to_string(),
            range_read_chunk: DEFAULT_RANGE_READ_CHUNK,
            degree_of_parallelism: None,
            default_storage_level: None,
        }
    }
}

impl FlowConfig {
    /// Configuration for tests (small partitions, tiny read-ahead)
    pub fn test() -> Self {
        FlowConfig {
            partition_threshold: 64 * 1024,
            small_file_threshold: 1024,
            directory: "test".to_string(),
            range_read_chunk: 16,
            degree_of_parallelism: Some(4),
            default_storage_level: None,
        }
    }

    /// Parse from TOML; missing keys take their defaults
    pub fn from_toml_str(s: &str) -> IoResult<Self> {
        toml::from_str(s).map_err(|e| IoError::new(ErrorKind::InvalidData, e.to_string()))
    }

    /// Load from a TOML file
    pub fn load(path: &std::path::Path) -> IoResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

/// Type of store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectStoreType {
    /// In-memory store (for tests)
    InMemory,
    /// Local filesystem
    LocalFs,
    /// Amazon S3 or compatible
    #[cfg(feature = "s3")]
    S3,
}

/// S3 configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,
    /// Key prefix within bucket
    pub prefix: String,
    /// AWS region
    pub region: String,
    /// Custom endpoint (for S3-compatible services like MinIO)
    pub endpoint: Option<String>,
}

/// Store adapter selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub store_type: ObjectStoreType,
    /// Local filesystem root (for LocalFs store)
    pub local_path: Option<PathBuf>,
    /// S3 configuration (for S3 store)
    pub s3: Option<S3Config>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            store_type: ObjectStoreType::InMemory,
            local_path: None,
            s3: None,
        }
    }
}

impl StoreConfig {
    /// Create config for local development
    pub fn local(path: PathBuf) -> Self {
        StoreConfig {
            store_type: ObjectStoreType::LocalFs,
            local_path: Some(path),
            s3: None,
        }
    }

    /// Build the configured adapter
    pub fn build(&self) -> IoResult<Arc<dyn CloudStore>> {
        match self.store_type {
            ObjectStoreType::InMemory => Ok(Arc::new(InMemoryCloudStore::new())),
            ObjectStoreType::LocalFs => {
                let path = self.local_path.clone().ok_or_else(|| {
                    IoError::new(ErrorKind::InvalidInput, "LocalFs store requires local_path")
                })?;
                Ok(Arc::new(LocalFsCloudStore::new(path)))
            }
            #[cfg(feature = "s3")]
            ObjectStoreType::S3 => {
                let s3 = self.s3.clone().ok_or_else(|| {
                    IoError::new(ErrorKind::InvalidInput, "S3 store requires s3 settings")
                })?;
                Ok(Arc::new(crate::store::S3CloudStore::new(s3)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FlowConfig::default();
        assert_eq!(config.partition_threshold, 1024 * 1024 * 1024);
        assert_eq!(config.small_file_threshold, 512 * 1024);
        assert_eq!(config.degree_of_parallelism, None);
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = FlowConfig::test();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: FlowConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = FlowConfig::from_toml_str(
            r#"
            partition_threshold = 4096
            directory = "jobs/42"
            "#,
        )
        .unwrap();
        assert_eq!(config.partition_threshold, 4096);
        assert_eq!(config.directory, "jobs/42");
        assert_eq!(config.small_file_threshold, DEFAULT_SMALL_FILE_THRESHOLD);
        assert_eq!(config.default_storage_level, None);
    }

    #[test]
    fn test_local_store_requires_path() {
        let config = StoreConfig {
            store_type: ObjectStoreType::LocalFs,
            local_path: None,
            s3: None,
        };
        assert!(config.build().is_err());
        assert!(StoreConfig::local(PathBuf::from("/tmp/cloud-flow")).build().is_ok());
    }
}
