//! Error types for cratekeeper
//!
//! Each subsystem surfaces a small typed enum; `CleanupError` is the
//! umbrella the orchestrator and binary work with.

use std::path::PathBuf;
use thiserror::Error;

/// Result type used across the engine
pub type Result<T> = std::result::Result<T, CleanupError>;

/// Unified store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Referential-integrity or constraint violation; indicates a bug
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// Underlying database I/O failure
    #[error("database I/O error: {0}")]
    Io(String),

    /// SQLITE_BUSY / locked; retried with backoff before surfacing
    #[error("database busy")]
    Busy,
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                if msg.contains("database is locked") || msg.contains("database table is locked") {
                    StoreError::Busy
                } else if msg.contains("FOREIGN KEY constraint")
                    || msg.contains("UNIQUE constraint")
                    || msg.contains("CHECK constraint")
                    || msg.contains("NOT NULL constraint")
                {
                    StoreError::Integrity(msg.to_string())
                } else {
                    StoreError::Io(msg.to_string())
                }
            }
            _ => StoreError::Io(err.to_string()),
        }
    }
}

/// Discovery errors; reported and skipped at the path, never fatal to a batch
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("file access error {0}: {1}")]
    FileAccess(PathBuf, String),
}

/// Per-file analyzer failures
///
/// Hash failure is fatal for the file; the rest degrade individual
/// capabilities (see the corruption filter and grouper).
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("hash failed: {0}")]
    Hash(String),

    #[error("metadata read failed: {0}")]
    Metadata(String),

    #[error("fingerprint failed: {0}")]
    Fingerprint(String),

    #[error("defect detection failed: {0}")]
    DefectDetection(String),

    #[error("{0} timed out after {1}s")]
    Timeout(&'static str, u64),

    /// Persistence failed; fatal to the pipeline, not just the file
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AnalyzerError {
    /// Short stable kind tag recorded on the file row
    pub fn kind(&self) -> &'static str {
        match self {
            AnalyzerError::Hash(_) => "hash",
            AnalyzerError::Metadata(_) => "metadata",
            AnalyzerError::Fingerprint(_) => "fingerprint",
            AnalyzerError::DefectDetection(_) => "defect_detection",
            AnalyzerError::Timeout(..) => "timeout",
            AnalyzerError::Store(_) => "store",
        }
    }
}

/// External-interface failures (fingerprinter, tag reader/writer, defect probe)
#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("unsupported format: {0}")]
    Unsupported(PathBuf),

    #[error("parse failed: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Atomic transaction manager errors
#[derive(Debug, Error)]
pub enum TransactionError {
    /// Prepare-step validation failed; nothing was performed
    #[error("prepare failed: {0}")]
    Prepare(String),

    /// A perform step failed; the transaction is rolled back
    #[error("perform failed: {0}")]
    Perform(String),

    #[error("commit failed: {0}")]
    Commit(String),

    #[error("rollback failed: {0}")]
    Rollback(String),

    /// Post-copy verification found different content at the destination
    #[error("hash mismatch after copy: {path} expected {expected} got {actual}")]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// A write was staged against a protected prefix
    #[error("refusing to write under protected root: {0}")]
    ProtectedPath(PathBuf),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Umbrella error for the orchestrator and binary
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("recovery error: {0}")]
    Recovery(String),

    /// Controlled shutdown; not a failure
    #[error("cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for CleanupError {
    fn from(err: sqlx::Error) -> Self {
        CleanupError::Store(StoreError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_classification_io() {
        let err = sqlx::Error::PoolTimedOut;
        match StoreError::from(err) {
            StoreError::Io(_) => {}
            other => panic!("expected Io, got {other:?}"),
        }
    }

    #[test]
    fn test_analyzer_error_kinds() {
        assert_eq!(AnalyzerError::Hash("x".into()).kind(), "hash");
        assert_eq!(AnalyzerError::Timeout("fingerprint", 30).kind(), "timeout");
    }
}
