use std::fmt;

use thiserror::Error;

use crate::classifier::ClassifierFailure;
use crate::db::DatabaseError;
use crate::error::QueueError;

/// Category of a per-record classification failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationErrorKind {
    Unreachable,
    Timeout,
    InvalidOutput,
    Rejected,
    /// The batch was claimed too many times without finishing.
    RetryLimitExceeded,
}

impl fmt::Display for ClassificationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClassificationErrorKind::Unreachable => "unreachable",
            ClassificationErrorKind::Timeout => "timeout",
            ClassificationErrorKind::InvalidOutput => "invalid output",
            ClassificationErrorKind::Rejected => "rejected",
            ClassificationErrorKind::RetryLimitExceeded => "retry limit exceeded",
        };
        f.write_str(s)
    }
}

/// A record could not be classified. Recorded on the record, never fatal.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Classification of record {record_id} failed ({kind}): {cause}")]
pub struct ClassificationError {
    pub record_id: String,
    pub kind: ClassificationErrorKind,
    pub cause: String,
}

impl ClassificationError {
    pub fn from_failure(record_id: &str, failure: ClassifierFailure) -> Self {
        let (kind, cause) = match failure {
            ClassifierFailure::Unreachable(c) => (ClassificationErrorKind::Unreachable, c),
            ClassifierFailure::InvalidOutput(c) => (ClassificationErrorKind::InvalidOutput, c),
            ClassifierFailure::Rejected(c) => (ClassificationErrorKind::Rejected, c),
        };
        Self {
            record_id: record_id.to_string(),
            kind,
            cause,
        }
    }

    /// Text stored as the divergence reason of the FAILED record.
    pub fn reason(&self) -> String {
        format!("Classification failed ({}): {}", self.kind, self.cause)
    }
}

/// The batch itself could not be loaded; the run stops before any record.
#[derive(Error, Debug)]
pub enum BatchLoadError {
    #[error("Batch {0} not found")]
    NotFound(String),

    #[error("Failed to load batch {batch_id}: {source}")]
    Database {
        batch_id: String,
        #[source]
        source: DatabaseError,
    },
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("Batch load failed: {0}")]
    Load(#[from] BatchLoadError),

    #[error("Failed to persist progress: {0}")]
    Persist(#[from] DatabaseError),

    #[error("Queue error during run: {0}")]
    Queue(#[from] QueueError),
}
