//! Cloud Store Abstraction
//!
//! The store adapter the persisted collection layer consumes. Every write
//! returns a version token (ETag); every read is conditional on one, so a
//! reader never observes bytes other than the ones it attached to.
//!
//! Implementations:
//! - `InMemoryCloudStore`: For unit tests and DST
//! - `LocalFsCloudStore`: For development and local testing
//! - `SimulatedCloudStore`: Fault-injecting wrapper for DST
//! - `S3CloudStore`: For production (feature-gated)

pub mod local_fs;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;
pub mod simulated;

pub use local_fs::LocalFsCloudStore;
pub use memory::InMemoryCloudStore;
#[cfg(feature = "s3")]
pub use s3::S3CloudStore;
pub use simulated::{SimulatedCloudStore, SimulatedStoreConfig, SimulatedStoreStats};

use bytes::Bytes;
use std::future::Future;
use std::io::Result as IoResult;
use std::pin::Pin;

/// Opaque version token returned by a write
pub type ETag = String;

/// Boxed future returned by store operations
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = IoResult<T>> + Send + 'a>>;

/// Result of a completed write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    /// Version token of the object as written
    pub etag: ETag,
    /// Number of bytes written
    pub size_bytes: u64,
}

/// Store adapter trait
///
/// Follows the boxed-future pattern so implementations stay object safe and
/// can be shared as `Arc<dyn CloudStore>`.
pub trait CloudStore: Send + Sync + 'static {
    /// Create or overwrite an object, returning its new ETag
    fn write_with_etag<'a>(&'a self, path: &'a str, data: Bytes) -> StoreFuture<'a, WriteReceipt>;

    /// Read an object if its current ETag matches `etag`
    ///
    /// `Ok(None)` signals a missing object or an ETag mismatch.
    fn read_with_etag<'a>(&'a self, path: &'a str, etag: &'a str) -> StoreFuture<'a, Option<Bytes>>;

    /// Read bytes `[start, end)` of an object if its current ETag matches
    ///
    /// `end` is clamped to the object size.
    fn read_range_with_etag<'a>(
        &'a self,
        path: &'a str,
        etag: &'a str,
        start: u64,
        end: u64,
    ) -> StoreFuture<'a, Option<Bytes>>;

    /// Current ETag of an object, `None` if it does not exist
    fn try_get_etag<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Option<ETag>>;

    /// Size of an object in bytes
    fn get_size<'a>(&'a self, path: &'a str) -> StoreFuture<'a, u64>;

    /// Delete an object; deleting a missing object succeeds
    fn delete<'a>(&'a self, path: &'a str) -> StoreFuture<'a, ()>;

    /// Generate a fresh, unused path under `directory`
    fn random_path(&self, directory: &str) -> String {
        random_path(directory)
    }
}

/// Random object path under `directory`
pub fn random_path(directory: &str) -> String {
    let id: u128 = rand::random();
    let directory = directory.trim_end_matches('/');
    if directory.is_empty() {
        format!("{:032x}", id)
    } else {
        format!("{}/{:032x}", directory, id)
    }
}

/// Clamp a requested byte range to an object of `len` bytes
pub(crate) fn clamp_range(len: usize, start: u64, end: u64) -> std::ops::Range<usize> {
    let end = (end.min(len as u64)) as usize;
    let start = (start as usize).min(end);
    start..end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_path_under_directory() {
        let a = random_path("flows/");
        let b = random_path("flows");
        assert!(a.starts_with("flows/"));
        assert!(b.starts_with("flows/"));
        assert_ne!(a, b);
        assert!(!random_path("").contains('/'));
    }

    #[test]
    fn test_clamp_range() {
        assert_eq!(clamp_range(10, 2, 5), 2..5);
        assert_eq!(clamp_range(10, 2, 50), 2..10);
        assert_eq!(clamp_range(10, 20, 50), 10..10);
    }
}
