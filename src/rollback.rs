//! Reversal of completed or failed transactions.
//!
//! Rollback is best-effort and single-attempt: every completed operation is
//! tried in reverse insertion order, failures are collected rather than
//! aborting the pass, and the transaction is marked rolled back at the end
//! no matter how many reversals failed.
//!
//! The "source occupied" check and the move back are not guarded by any
//! lock, so a writer landing on the source path between the two can still
//! race the rollback.

use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Result, ReversalError, RollbackError, TxnError};
use crate::fsops;
use crate::model::{Operation, OperationKind, OperationStatus};
use crate::transaction::TransactionManager;

/// What happened to one operation during rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReversalOutcome {
    /// A moved file is back at its source.
    Restored,
    /// A created file or empty directory was deleted.
    Removed,
    /// The created path had already been removed by someone else.
    AlreadyGone,
    /// A created directory now holds other data and was left in place.
    KeptNonEmpty,
}

impl fmt::Display for ReversalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReversalOutcome::Restored => "restored",
            ReversalOutcome::Removed => "removed",
            ReversalOutcome::AlreadyGone => "already_gone",
            ReversalOutcome::KeptNonEmpty => "kept_non_empty",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReversedOperation {
    pub index: usize,
    pub kind: OperationKind,
    pub outcome: ReversalOutcome,
}

/// Per-operation results of one rollback pass, in the order they ran.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    pub transaction_id: String,
    pub reversed: Vec<ReversedOperation>,
    /// Operations that were never applied and so had nothing to undo.
    pub skipped: Vec<usize>,
}

impl RollbackReport {
    pub fn new(transaction_id: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            ..Self::default()
        }
    }

    /// Indices visited, in the order they were reversed.
    pub fn order(&self) -> Vec<usize> {
        self.reversed.iter().map(|r| r.index).collect()
    }
}

/// Reverses transactions recorded by a [`TransactionManager`].
pub struct RollbackEngine<'a> {
    manager: &'a TransactionManager,
    boundary: Option<PathBuf>,
}

impl<'a> RollbackEngine<'a> {
    pub fn new(manager: &'a TransactionManager) -> Self {
        Self {
            manager,
            boundary: None,
        }
    }

    /// Never remove `dir` or anything above it while reclaiming empty
    /// directories.
    pub fn with_boundary(mut self, dir: impl Into<PathBuf>) -> Self {
        self.boundary = Some(dir.into());
        self
    }

    /// Reverse every completed operation of transaction `id`.
    ///
    /// Returns [`TxnError::Rollback`] when some reversals failed; the
    /// transaction is marked rolled back either way.
    pub fn rollback(&self, id: &str) -> Result<RollbackReport> {
        let mut txn = self.manager.load(id)?;
        if !txn.status.is_rollback_eligible() {
            return Err(TxnError::State {
                id: txn.id,
                status: txn.status,
                action: "roll back",
            });
        }

        tracing::info!(id = %txn.id, operations = txn.operations.len(), "rolling back transaction");
        let mut report = RollbackReport::new(&txn.id);
        let mut failures = Vec::new();

        for index in (0..txn.operations.len()).rev() {
            let op = &txn.operations[index];
            if op.status != OperationStatus::Completed {
                report.skipped.push(index);
                continue;
            }
            match self.reverse(index, op) {
                Ok(outcome) => {
                    report.reversed.push(ReversedOperation {
                        index,
                        kind: op.kind,
                        outcome,
                    });
                    let done = op.clone().with_status(OperationStatus::RolledBack);
                    // The final mark below rewrites the record anyway.
                    if let Err(e) = self.manager.update_operation(&mut txn, index, done) {
                        tracing::warn!(id = %txn.id, index, error = %e, "failed to persist reversal");
                    }
                }
                Err(e) => {
                    tracing::warn!(id = %txn.id, error = %e, "reversal failed");
                    txn.operations[index].error = Some(e.to_string());
                    failures.push(e);
                }
            }
        }

        let marked = self.manager.mark_rolled_back(&mut txn);

        if failures.is_empty() {
            marked?;
            tracing::info!(id = %txn.id, reversed = report.reversed.len(), "rollback complete");
            Ok(report)
        } else {
            tracing::warn!(id = %txn.id, failures = failures.len(), "rollback finished with failures");
            Err(RollbackError {
                transaction_id: txn.id,
                failures,
                report,
                record_error: marked.err().map(Box::new),
            }
            .into())
        }
    }

    fn reverse(&self, index: usize, op: &Operation) -> Result<ReversalOutcome, ReversalError> {
        match op.kind {
            OperationKind::Move | OperationKind::Rename => self.reverse_move(index, op),
            OperationKind::CreateDirectory => reverse_create_dir(index, &op.destination),
            OperationKind::CreateFile => reverse_create_file(index, &op.destination),
            OperationKind::Unknown => Err(ReversalError::UnknownKind { index }),
        }
    }

    fn reverse_move(&self, index: usize, op: &Operation) -> Result<ReversalOutcome, ReversalError> {
        let dst = &op.destination;
        let src = &op.source;
        if !exists(dst) {
            return Err(ReversalError::DestinationMissing {
                index,
                path: dst.clone(),
            });
        }
        if exists(src) {
            return Err(ReversalError::SourceOccupied {
                index,
                path: src.clone(),
            });
        }
        let io_err = |action, path: &Path| {
            let path = path.to_path_buf();
            move |source| ReversalError::Io {
                index,
                action,
                path,
                source,
            }
        };
        if let Some(parent) = src.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err("recreate source directory", parent))?;
        }
        fsops::mv(dst, src).map_err(io_err("move back", dst))?;
        tracing::debug!(index, from = %dst.display(), to = %src.display(), "restored file");

        if let Some(parent) = dst.parent() {
            fsops::remove_empty_dirs(parent, self.boundary.as_deref());
        }
        Ok(ReversalOutcome::Restored)
    }
}

fn reverse_create_dir(index: usize, dir: &Path) -> Result<ReversalOutcome, ReversalError> {
    let io_err = |action, source| ReversalError::Io {
        index,
        action,
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ReversalOutcome::AlreadyGone),
        Err(e) => return Err(io_err("read directory", e)),
    };
    if entries.next().is_some() {
        tracing::warn!(dir = %dir.display(), "directory is not empty, leaving it in place");
        return Ok(ReversalOutcome::KeptNonEmpty);
    }
    match fs::remove_dir(dir) {
        Ok(()) => Ok(ReversalOutcome::Removed),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(ReversalOutcome::AlreadyGone),
        Err(e) => Err(io_err("remove directory", e)),
    }
}

fn reverse_create_file(index: usize, file: &Path) -> Result<ReversalOutcome, ReversalError> {
    match fs::remove_file(file) {
        Ok(()) => Ok(ReversalOutcome::Removed),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(ReversalOutcome::AlreadyGone),
        Err(source) => Err(ReversalError::Io {
            index,
            action: "remove file",
            path: file.to_path_buf(),
            source,
        }),
    }
}

/// Existence without following a final symlink, so dangling links count as
/// occupying the path.
fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TransactionStatus;

    fn setup() -> (tempfile::TempDir, TransactionManager) {
        let dir = tempfile::tempdir().unwrap();
        let mgr = TransactionManager::open(dir.path().join(".log")).unwrap();
        (dir, mgr)
    }

    fn completed(op: Operation) -> Operation {
        op.with_status(OperationStatus::Completed)
    }

    #[test]
    fn create_file_already_gone_is_success() {
        let (dir, mgr) = setup();
        let nfo = dir.path().join("movie.nfo");
        let mut txn = mgr.begin().unwrap();
        mgr.add_operation(&mut txn, completed(Operation::create_file(&nfo))).unwrap();
        mgr.complete(&mut txn).unwrap();

        let report = RollbackEngine::new(&mgr).rollback(&txn.id).unwrap();
        assert_eq!(report.reversed[0].outcome, ReversalOutcome::AlreadyGone);
    }

    #[test]
    fn create_dir_already_gone_is_success() {
        let (dir, mgr) = setup();
        let mut txn = mgr.begin().unwrap();
        let op = completed(Operation::create_directory(dir.path().join("Season 01")));
        mgr.add_operation(&mut txn, op).unwrap();
        mgr.complete(&mut txn).unwrap();

        let report = RollbackEngine::new(&mgr).rollback(&txn.id).unwrap();
        assert_eq!(report.reversed[0].outcome, ReversalOutcome::AlreadyGone);
    }

    #[test]
    fn non_completed_operations_are_skipped() {
        let (dir, mgr) = setup();
        let never = dir.path().join("never.nfo");
        fs::write(&never, "left alone").unwrap();
        let mut txn = mgr.begin().unwrap();
        mgr.add_operation(&mut txn, Operation::create_file(&never)).unwrap();
        mgr.add_operation(
            &mut txn,
            Operation::create_file(&never).with_status(OperationStatus::Failed),
        )
        .unwrap();
        mgr.fail(&mut txn, "boom").unwrap();

        let report = RollbackEngine::new(&mgr).rollback(&txn.id).unwrap();
        assert!(report.reversed.is_empty());
        assert_eq!(report.skipped, vec![1, 0]);
        assert!(never.exists());
        assert_eq!(mgr.load(&txn.id).unwrap().status, TransactionStatus::RolledBack);
    }

    #[test]
    fn reversed_operations_are_marked() {
        let (dir, mgr) = setup();
        let season = dir.path().join("Season 01");
        fs::create_dir(&season).unwrap();
        let mut txn = mgr.begin().unwrap();
        mgr.add_operation(&mut txn, completed(Operation::create_directory(&season)))
            .unwrap();
        mgr.complete(&mut txn).unwrap();

        RollbackEngine::new(&mgr).rollback(&txn.id).unwrap();
        let loaded = mgr.load(&txn.id).unwrap();
        assert_eq!(loaded.operations[0].status, OperationStatus::RolledBack);
        assert!(!season.exists());
        assert_eq!(loaded.count_with_status(OperationStatus::Completed), 0);
    }

    #[test]
    fn unknown_kind_is_a_reversal_failure() {
        let (dir, mgr) = setup();
        let mut txn = mgr.begin().unwrap();
        let op = completed(Operation::new(OperationKind::Unknown, "", dir.path().join("x")));
        mgr.add_operation(&mut txn, op).unwrap();
        mgr.complete(&mut txn).unwrap();

        let err = RollbackEngine::new(&mgr).rollback(&txn.id).unwrap_err();
        match err {
            TxnError::Rollback(e) => {
                assert_eq!(e.failures.len(), 1);
                assert!(matches!(e.failures[0], ReversalError::UnknownKind { index: 0 }));
            }
            other => panic!("unexpected error: {other}"),
        }
        let loaded = mgr.load(&txn.id).unwrap();
        assert_eq!(loaded.status, TransactionStatus::RolledBack);
        assert!(loaded.operations[0].error.is_some());
    }

    #[cfg(unix)]
    fn set_mode(path: &Path, mode: u32) {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
    }

    #[test]
    #[cfg(unix)]
    fn io_failure_is_reported_per_operation() {
        let (dir, mgr) = setup();
        let movie_dir = dir.path().join("Movie (2023)");
        fs::create_dir(&movie_dir).unwrap();
        let nfo = movie_dir.join("movie.nfo");
        fs::write(&nfo, "<movie/>").unwrap();
        let mut txn = mgr.begin().unwrap();
        mgr.add_operation(&mut txn, completed(Operation::create_file(&nfo))).unwrap();
        mgr.complete(&mut txn).unwrap();

        set_mode(&movie_dir, 0o555);
        // Root ignores permission bits; nothing to assert in that case.
        if tempfile::tempfile_in(&movie_dir).is_ok() {
            set_mode(&movie_dir, 0o755);
            return;
        }
        let err = RollbackEngine::new(&mgr).rollback(&txn.id).unwrap_err();
        set_mode(&movie_dir, 0o755);

        let TxnError::Rollback(err) = err else {
            panic!("expected aggregate rollback error, got {err}");
        };
        assert!(matches!(
            err.failures[0],
            ReversalError::Io {
                index: 0,
                action: "remove file",
                ..
            }
        ));
        assert!(err.record_error.is_none());
        assert!(nfo.exists());
        let loaded = mgr.load(&txn.id).unwrap();
        assert_eq!(loaded.status, TransactionStatus::RolledBack);
        assert_eq!(loaded.operations[0].status, OperationStatus::Completed);
    }

    #[test]
    #[cfg(unix)]
    fn unwritable_log_keeps_reversal_failures() {
        let (dir, mgr) = setup();
        let nfo = dir.path().join("movie.nfo");
        fs::write(&nfo, "<movie/>").unwrap();
        let mut txn = mgr.begin().unwrap();
        mgr.add_operation(&mut txn, completed(Operation::create_file(&nfo))).unwrap();
        mgr.add_operation(
            &mut txn,
            completed(Operation::move_file(
                dir.path().join("in/a.mkv"),
                dir.path().join("gone.mkv"),
            )),
        )
        .unwrap();
        mgr.complete(&mut txn).unwrap();

        let log_dir = dir.path().join(".log");
        set_mode(&log_dir, 0o555);
        if tempfile::tempfile_in(&log_dir).is_ok() {
            set_mode(&log_dir, 0o755);
            return;
        }
        let err = RollbackEngine::new(&mgr).rollback(&txn.id).unwrap_err();
        set_mode(&log_dir, 0o755);

        let TxnError::Rollback(err) = err else {
            panic!("expected aggregate rollback error, got {err}");
        };
        assert_eq!(err.failures.len(), 1);
        assert!(matches!(err.failures[0], ReversalError::DestinationMissing { index: 1, .. }));
        assert_eq!(err.report.order(), vec![0]);
        assert!(matches!(err.record_error.as_deref(), Some(TxnError::Io { .. })));
        assert!(err.to_string().contains("transaction record not updated"));
        assert!(!nfo.exists());
        // The record still holds the last state that could be written.
        assert_eq!(mgr.load(&txn.id).unwrap().status, TransactionStatus::Completed);
    }
}
