use std::path::Path;

use thiserror::Error;

/// Signal record rejection reasons
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignalError {
    #[error("JSON error: {0}")]
    Json(String),
    #[error("Non-finite {field}")]
    NonFinite { field: &'static str },
    #[error("{field} out of range: {value} (allowed {min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("Empty scope identifier")]
    EmptyScope,
}

/// Persistence and parsing errors
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },
    #[error("JSON error on {path}: {message}")]
    Json { path: String, message: String },
    #[error("Missing or malformed header in {0}")]
    Header(String),
    #[error("Writer lock already held: {0}")]
    Locked(String),
    #[error("Backup already exists: {0}")]
    BackupExists(String),
}

/// Main engine error type.
///
/// Every variant here aborts the current cycle. Recoverable per-constituency
/// conditions (data gaps, unreadable rows) are logged and counted instead.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Stored model schema differs from the feature store schema
    #[error("Schema mismatch: model expects [{expected}], store provides [{found}]")]
    SchemaMismatch { expected: String, found: String },

    /// Candidate calibration is not monotonic or misses the quality gate;
    /// the refresh was discarded
    #[error("Calibration regression in candidate v{candidate_version}: {reason}")]
    CalibrationRegression {
        candidate_version: u64,
        reason: String,
    },

    /// Training window cannot produce a usable classifier
    #[error("Insufficient training data: {0}")]
    InsufficientTrainingData(String),

    /// No model snapshot has been saved yet
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Feature store has never been committed
    #[error("Feature store is empty: {0}")]
    StoreEmpty(String),

    /// Baseline rows contain the same constituency twice
    #[error("Duplicate constituency id: {0}")]
    DuplicateConstituency(String),

    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Inputs handed to a component are unusable
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Signal record rejected at the ingestion boundary
    #[error("Signal rejected: {0}")]
    Signal(#[from] SignalError),

    /// Store / registry / report persistence failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Worker pool construction failure
    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

// Convenience constructors for common error patterns
impl Error {
    /// Wrap an I/O failure with the path it happened on
    pub fn io(path: &Path, err: std::io::Error) -> Self {
        Error::Storage(StorageError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        })
    }

    /// Wrap a serde_json failure with the path it happened on
    pub fn json(path: &Path, err: serde_json::Error) -> Self {
        Error::Storage(StorageError::Json {
            path: path.display().to_string(),
            message: err.to_string(),
        })
    }

    /// Create a schema mismatch error from two name lists
    pub fn schema_mismatch(expected: &[String], found: &[String]) -> Self {
        Error::SchemaMismatch {
            expected: expected.join(","),
            found: found.join(","),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Error::InvalidConfig(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// True for errors that invalidate the whole cycle's forecast
    /// (as opposed to rejecting one optional change).
    pub fn is_cycle_fatal(&self) -> bool {
        !matches!(self, Error::CalibrationRegression { .. })
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_mismatch_message_lists_both_sides() {
        let err = Error::schema_mismatch(
            &["a".to_string(), "b".to_string()],
            &["a".to_string()],
        );
        let msg = err.to_string();
        assert!(msg.contains("[a,b]"));
        assert!(msg.contains("[a]"));
        assert!(err.is_cycle_fatal());
    }

    #[test]
    fn test_calibration_regression_is_not_cycle_fatal() {
        let err = Error::CalibrationRegression {
            candidate_version: 3,
            reason: "decreasing".to_string(),
        };
        assert!(!err.is_cycle_fatal());
    }
}
