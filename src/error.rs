//! Error types for the persisted collection layer
//!
//! Store adapters speak `std::io::Result`. The core adds semantic conditions on
//! top (argument checks, ETag validation, aggregation of concurrent failures)
//! and never retries store I/O itself.

use std::io::{Error as IoError, ErrorKind};

/// Result alias used throughout the crate
pub type FlowResult<T> = Result<T, FlowError>;

/// Error type for persisted sequence and flow operations
#[derive(Debug)]
pub enum FlowError {
    /// Caller supplied an argument the operation cannot accept
    InvalidArgument(String),
    /// Store object has no current version token
    NotFound(String),
    /// Store object changed (or vanished) since its ETag was recorded
    StaleData { path: String, expected_etag: String },
    /// Persisted bytes could not be decoded
    Corruption { path: String, reason: String },
    /// Element could not be serialized
    Serialization(String),
    /// I/O error from the store adapter
    Io(IoError),
    /// One or more sub-operations of a parallel operation failed
    Aggregate(AggregateError),
    /// The ambient cancellation token was signaled
    Cancelled,
    /// A spawned evaluation task panicked or was aborted
    Task(String),
}

impl FlowError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        FlowError::InvalidArgument(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FlowError::Cancelled)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FlowError::NotFound(_))
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, FlowError::StaleData { .. })
    }

    /// Objects written before the failure and left in the store
    pub fn written_paths(&self) -> &[String] {
        match self {
            FlowError::Aggregate(e) => &e.written,
            _ => &[],
        }
    }
}

impl std::fmt::Display for FlowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            FlowError::NotFound(path) => write!(f, "Store object not found: {}", path),
            FlowError::StaleData {
                path,
                expected_etag,
            } => write!(
                f,
                "Stale data: store object {} no longer matches ETag {}",
                path, expected_etag
            ),
            FlowError::Corruption { path, reason } => {
                write!(f, "Corrupt store object {}: {}", path, reason)
            }
            FlowError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            FlowError::Io(e) => write!(f, "I/O error: {}", e),
            FlowError::Aggregate(e) => write!(f, "{}", e),
            FlowError::Cancelled => write!(f, "Operation cancelled"),
            FlowError::Task(msg) => write!(f, "Evaluation task failed: {}", msg),
        }
    }
}

impl std::error::Error for FlowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FlowError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IoError> for FlowError {
    fn from(e: IoError) -> Self {
        match e.kind() {
            ErrorKind::NotFound => FlowError::NotFound(e.to_string()),
            _ => FlowError::Io(e),
        }
    }
}

impl From<bincode::Error> for FlowError {
    fn from(e: bincode::Error) -> Self {
        FlowError::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for FlowError {
    fn from(e: tokio::task::JoinError) -> Self {
        FlowError::Task(e.to_string())
    }
}

impl From<AggregateError> for FlowError {
    fn from(e: AggregateError) -> Self {
        FlowError::Aggregate(e)
    }
}

/// Failures collected from a fan-out operation
///
/// `succeeded` counts the sub-operations that completed, so partial success
/// stays visible to the caller. Write operations list the objects they had
/// already created in `written`; nothing deletes them.
#[derive(Debug)]
pub struct AggregateError {
    /// Name of the fan-out operation ("dispose", "materialize", ...)
    pub operation: &'static str,
    /// Number of sub-operations that succeeded
    pub succeeded: usize,
    /// Failed sub-operations keyed by the store path or partition they touched
    pub failures: Vec<(String, FlowError)>,
    /// Store paths written before the failure
    pub written: Vec<String>,
}

impl AggregateError {
    /// Build from per-target outcomes; `None` when nothing failed
    pub fn collect<I>(operation: &'static str, outcomes: I) -> Option<AggregateError>
    where
        I: IntoIterator<Item = (String, Result<(), FlowError>)>,
    {
        let mut succeeded = 0;
        let mut failures = Vec::new();
        for (target, outcome) in outcomes {
            match outcome {
                Ok(()) => succeeded += 1,
                Err(e) => failures.push((target, e)),
            }
        }
        if failures.is_empty() {
            None
        } else {
            Some(AggregateError {
                operation,
                succeeded,
                failures,
                written: Vec::new(),
            })
        }
    }

    /// True when every failure is a cancellation
    pub fn all_cancelled(&self) -> bool {
        self.failures.iter().all(|(_, e)| e.is_cancelled())
    }
}

impl std::fmt::Display for AggregateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} failed for {} of {} targets",
            self.operation,
            self.failures.len(),
            self.failures.len() + self.succeeded
        )?;
        for (target, e) in &self.failures {
            write!(f, "; {}: {}", target, e)?;
        }
        if !self.written.is_empty() {
            write!(f, "; {} objects left in the store", self.written.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_not_found_maps_to_not_found() {
        let err: FlowError = IoError::new(ErrorKind::NotFound, "gone").into();
        assert!(err.is_not_found());

        let err: FlowError = IoError::new(ErrorKind::TimedOut, "slow").into();
        assert!(matches!(err, FlowError::Io(_)));
    }

    #[test]
    fn test_aggregate_collects_all_failures() {
        let outcomes = vec![
            ("a".to_string(), Ok(())),
            ("b".to_string(), Err(FlowError::Cancelled)),
            ("c".to_string(), Err(FlowError::invalid_argument("bad"))),
        ];
        let agg = AggregateError::collect("dispose", outcomes).unwrap();
        assert_eq!(agg.succeeded, 1);
        assert_eq!(agg.failures.len(), 2);
        assert!(!agg.all_cancelled());

        let msg = agg.to_string();
        assert!(msg.contains("dispose failed for 2 of 3 targets"));
        assert!(msg.contains("b: Operation cancelled"));
    }

    #[test]
    fn test_aggregate_none_when_all_succeed() {
        let outcomes = vec![("a".to_string(), Ok(())), ("b".to_string(), Ok(()))];
        assert!(AggregateError::collect("dispose", outcomes).is_none());
    }
}
