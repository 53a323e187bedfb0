//! Error types for validation, transaction bookkeeping and rollback.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::model::{Operation, OperationStatus, TransactionStatus};
use crate::rollback::RollbackReport;

pub type Result<T, E = TxnError> = std::result::Result<T, E>;

/// Errors surfaced by the transaction core.
#[derive(Debug, Error)]
pub enum TxnError {
    /// Pre-flight rejection of an operation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No record exists for the id.
    #[error("transaction not found: {id}")]
    NotFound { id: String },

    /// The transaction's status forbids the requested action.
    #[error("cannot {action} transaction {id}: status is {status}")]
    State {
        id: String,
        status: TransactionStatus,
        action: &'static str,
    },

    #[error("operation index {index} out of range (transaction has {len} operations)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("operation {index} cannot move from {from} to {to}")]
    InvalidTransition {
        index: usize,
        from: OperationStatus,
        to: OperationStatus,
    },

    /// Ids are used as file names, so anything that is not a plain name is refused.
    #[error("invalid transaction id: {0:?}")]
    InvalidId(String),

    /// The OS random source failed and weak ids are not allowed.
    #[error("random source unavailable: {0}")]
    RandomUnavailable(String),

    /// A rollback pass finished but some operations could not be reversed.
    #[error(transparent)]
    Rollback(#[from] RollbackError),

    /// The on-disk record exists but does not parse.
    #[error("transaction record {id} is corrupt")]
    Corrupt {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl TxnError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Why a path failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidPath {
    #[error("path is empty")]
    Empty,
    #[error("path contains invalid character {0:?}")]
    ForbiddenChar(char),
    #[error("filename {0:?} is hidden (starts with '.')")]
    HiddenName(String),
    #[error("filename {0:?} starts or ends with a space")]
    SurroundingSpace(String),
    #[error("filename {0:?} ends with '.'")]
    TrailingDot(String),
}

/// Why an operation was rejected before execution.
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("source path is required for {0}")]
    MissingSource(crate::model::OperationKind),
    #[error("source does not exist")]
    SourceMissing,
    #[error("source is a directory")]
    SourceIsDirectory,
    #[error("source is not a regular file")]
    SourceNotFile,
    #[error("source is not readable: {0}")]
    SourceUnreadable(#[source] std::io::Error),
    #[error("invalid destination: {0}")]
    InvalidDestination(#[from] InvalidPath),
    #[error("destination has no parent directory")]
    NoParent,
    #[error("destination already exists")]
    DestinationExists,
    #[error("directory {} is not writable: {source}", path.display())]
    NotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("insufficient disk space at {}: need {required}, have {available}", path.display())]
    InsufficientSpace {
        path: PathBuf,
        required: bytesize::ByteSize,
        available: bytesize::ByteSize,
    },
    #[error("unknown operation type")]
    UnknownKind,
}

/// An operation that failed pre-flight checks. Never mutates state.
#[derive(Debug, Error)]
#[error("validation failed for {} {}: {reason}", operation.kind, operation.destination.display())]
pub struct ValidationError {
    pub operation: Operation,
    #[source]
    pub reason: Rejection,
}

impl ValidationError {
    pub fn new(operation: &Operation, reason: impl Into<Rejection>) -> Self {
        Self {
            operation: operation.clone(),
            reason: reason.into(),
        }
    }
}

/// Failure to undo one operation during rollback.
#[derive(Debug, Error)]
pub enum ReversalError {
    #[error("operation {index}: destination no longer exists: {}", path.display())]
    DestinationMissing { index: usize, path: PathBuf },

    #[error("operation {index}: source location already occupied: {}", path.display())]
    SourceOccupied { index: usize, path: PathBuf },

    #[error("operation {index}: unknown operation type")]
    UnknownKind { index: usize },

    #[error("operation {index}: failed to {action} {}: {source}", path.display())]
    Io {
        index: usize,
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ReversalError {
    pub fn index(&self) -> usize {
        match self {
            Self::DestinationMissing { index, .. }
            | Self::SourceOccupied { index, .. }
            | Self::UnknownKind { index }
            | Self::Io { index, .. } => *index,
        }
    }
}

/// Aggregate of every reversal that failed in one rollback pass.
#[derive(Debug)]
pub struct RollbackError {
    pub transaction_id: String,
    pub failures: Vec<ReversalError>,
    pub report: RollbackReport,
    /// Set when the final rolled-back state could not be written to the log.
    pub record_error: Option<Box<TxnError>>,
}

impl fmt::Display for RollbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rollback of transaction {} finished with {} failure(s)",
            self.transaction_id,
            self.failures.len()
        )?;
        for failure in &self.failures {
            write!(f, "; {failure}")?;
        }
        if let Some(e) = &self.record_error {
            write!(f, "; transaction record not updated: {e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RollbackError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_error_lists_every_failure() {
        let err = RollbackError {
            transaction_id: "abc".into(),
            failures: vec![
                ReversalError::DestinationMissing {
                    index: 1,
                    path: "/lib/b.mkv".into(),
                },
                ReversalError::SourceOccupied {
                    index: 0,
                    path: "/in/a.mkv".into(),
                },
            ],
            report: RollbackReport::new("abc"),
            record_error: None,
        };
        let msg = err.to_string();
        assert!(msg.contains("2 failure(s)"));
        assert!(msg.contains("/lib/b.mkv"));
        assert!(msg.contains("already occupied"));
    }

    #[test]
    fn validation_error_message_names_destination() {
        let op = Operation::create_file("/lib/.hidden");
        let err = ValidationError::new(&op, InvalidPath::HiddenName(".hidden".into()));
        let msg = err.to_string();
        assert!(msg.contains("create_file"));
        assert!(msg.contains("/lib/.hidden"));
    }
}
