use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Structured event emitted by the command handlers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    PlanValidated {
        operations: usize,
    },
    ValidationFailed {
        index: usize,
        destination: PathBuf,
        reason: String,
    },
    OpPlanned {
        index: usize,
        kind: String,
        src: Option<PathBuf>,
        dst: PathBuf,
    },
    TxnStarted {
        transaction_id: String,
    },
    OpStarted {
        index: usize,
    },
    OpCompleted {
        index: usize,
        bytes_copied: u64,
        dst: PathBuf,
    },
    OpFailed {
        index: usize,
        error: String,
    },
    TxnCommitted {
        transaction_id: String,
    },
    TxnFailed {
        transaction_id: String,
        error: String,
    },
    RollbackStarted {
        transaction_id: String,
    },
    OpReversed {
        index: usize,
        outcome: String,
    },
    ReversalFailed {
        index: usize,
        error: String,
    },
    RollbackCompleted {
        transaction_id: String,
        failures: usize,
    },
}
