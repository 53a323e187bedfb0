use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Result, TxnError};

/// Kind of filesystem mutation an [`Operation`] performs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Move a file to a new location.
    Move,
    /// Rename a file. Handled exactly like `move`.
    Rename,
    /// Create a single directory.
    CreateDirectory,
    /// Create a file (e.g. a metadata sidecar).
    CreateFile,
    /// Any kind this build does not understand.
    #[serde(other)]
    #[schemars(skip)]
    Unknown,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Move => "move",
            OperationKind::Rename => "rename",
            OperationKind::CreateDirectory => "create_directory",
            OperationKind::CreateFile => "create_file",
            OperationKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a single operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

impl OperationStatus {
    /// Whether moving from `self` to `next` is a legal forward transition.
    ///
    /// Replacing an operation without changing its status is always allowed.
    pub fn can_transition_to(self, next: OperationStatus) -> bool {
        use OperationStatus::*;
        self == next
            || matches!(
                (self, next),
                (Pending, InProgress | Completed | Failed)
                    | (InProgress, Completed | Failed)
                    | (Completed | Failed, RolledBack)
            )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationStatus::Pending => "pending",
            OperationStatus::InProgress => "in_progress",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

/// A single planned filesystem mutation, as recorded in a transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Operation {
    pub kind: OperationKind,
    /// Empty for `create_directory` and `create_file`.
    #[serde(default)]
    pub source: PathBuf,
    pub destination: PathBuf,
    pub status: OperationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Operation {
    pub fn new(kind: OperationKind, source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            source: source.into(),
            destination: destination.into(),
            status: OperationStatus::Pending,
            error: None,
        }
    }

    pub fn move_file(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::new(OperationKind::Move, source, destination)
    }

    pub fn rename(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::new(OperationKind::Rename, source, destination)
    }

    pub fn create_directory(destination: impl Into<PathBuf>) -> Self {
        Self::new(OperationKind::CreateDirectory, PathBuf::new(), destination)
    }

    pub fn create_file(destination: impl Into<PathBuf>) -> Self {
        Self::new(OperationKind::CreateFile, PathBuf::new(), destination)
    }

    /// Builder-style status override.
    pub fn with_status(mut self, status: OperationStatus) -> Self {
        self.status = status;
        self
    }

    pub fn source(&self) -> Option<&Path> {
        if self.source.as_os_str().is_empty() {
            None
        } else {
            Some(&self.source)
        }
    }
}

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    RolledBack,
}

impl TransactionStatus {
    /// Only closed, not yet reversed transactions may be rolled back.
    pub fn is_rollback_eligible(self) -> bool {
        matches!(self, TransactionStatus::Completed | TransactionStatus::Failed)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

/// An ordered batch of operations sharing one commit/rollback unit.
///
/// Insertion order is application order; rollback walks it backwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub operations: Vec<Operation>,
    pub status: TransactionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<String>,
    /// Set when the id came from the timestamp fallback instead of the OS
    /// random source.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub weak_id: bool,
}

impl Transaction {
    pub(crate) fn new(id: String, weak_id: bool) -> Self {
        Self {
            id,
            timestamp: Utc::now(),
            operations: Vec::new(),
            status: TransactionStatus::Pending,
            completed_at: None,
            error_summary: None,
            weak_id,
        }
    }

    pub fn count_with_status(&self, status: OperationStatus) -> usize {
        self.operations.iter().filter(|op| op.status == status).count()
    }
}

/// Root manifest consumed by `apply` and `validate`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Plan {
    /// Absolute directory that relative paths in the manifest are resolved against.
    pub root: PathBuf,
    /// Transaction mode.
    #[serde(default = "default_transaction_mode")]
    pub transaction: TransactionMode,
    /// Operations to execute, in order.
    pub operations: Vec<PlanOperation>,
}

fn default_transaction_mode() -> TransactionMode {
    TransactionMode::All
}

impl Plan {
    /// Basic sanity checks that do not touch the filesystem.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.root.is_absolute() {
            anyhow::bail!("root must be an absolute path");
        }
        if self.operations.is_empty() {
            anyhow::bail!("plan has no operations");
        }
        Ok(())
    }
}

/// Transaction atomicity mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum TransactionMode {
    /// The first failure rolls back everything applied so far.
    #[serde(rename = "all")]
    All,
    /// Keep going past failures; the transaction is marked failed at the end.
    #[serde(rename = "op")]
    Op,
}

/// A single operation as written in a manifest.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlanOperation {
    /// Operation kind.
    pub kind: OperationKind,
    /// Source path (relative to root), required for `move` and `rename`.
    #[serde(default)]
    pub source: Option<PathBuf>,
    /// Destination path (relative to root).
    pub destination: PathBuf,
}

/// Generate JSON Schema for the Plan type.
pub fn generate_schema() -> Result<String> {
    let schema = schemars::schema_for!(Plan);
    Ok(serde_json::to_string_pretty(&schema)?)
}

/// Load a Plan from a JSON file.
pub fn load_plan(path: &Path) -> Result<Plan> {
    let file = std::fs::File::open(path).map_err(|source| TxnError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = std::io::BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}
