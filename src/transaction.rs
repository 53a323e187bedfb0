use chrono::Utc;
use std::fmt::Display;
use std::path::PathBuf;

use crate::error::{Result, TxnError};
use crate::journal::TransactionLog;
use crate::model::{Operation, Transaction, TransactionStatus};

/// Bytes of OS randomness behind each transaction id.
const ID_BYTES: usize = 16;

/// Owns the transaction log and every write to it.
///
/// Each mutating call updates the in-memory handle and then rewrites the
/// whole record, so the store always holds the latest known state. Callers
/// sharing one handle across threads must serialize access themselves;
/// distinct transactions never contend.
#[derive(Debug, Clone)]
pub struct TransactionManager {
    log: TransactionLog,
    require_strong_ids: bool,
}

impl TransactionManager {
    /// Open (and create if needed) the log directory.
    pub fn open(log_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            log: TransactionLog::open(log_dir)?,
            require_strong_ids: false,
        })
    }

    /// Refuse to begin transactions when the OS random source fails,
    /// instead of falling back to timestamp ids.
    pub fn require_strong_ids(mut self, require: bool) -> Self {
        self.require_strong_ids = require;
        self
    }

    /// Start a new, empty transaction and persist it immediately.
    pub fn begin(&self) -> Result<Transaction> {
        let (id, weak_id) = self.new_id(getrandom::fill)?;
        let txn = Transaction::new(id, weak_id);
        self.log.save(&txn)?;
        tracing::info!(id = %txn.id, "transaction started");
        Ok(txn)
    }

    /// Append an operation; its position fixes its place in rollback order.
    pub fn add_operation(&self, txn: &mut Transaction, op: Operation) -> Result<()> {
        require_status(txn, "add an operation to", |s| s == TransactionStatus::Pending)?;
        txn.operations.push(op);
        self.log.save(txn)
    }

    /// Replace the operation at `index`, typically after it was executed.
    pub fn update_operation(&self, txn: &mut Transaction, index: usize, op: Operation) -> Result<()> {
        require_status(txn, "update an operation in", |s| {
            s != TransactionStatus::RolledBack
        })?;
        let len = txn.operations.len();
        let current = txn
            .operations
            .get_mut(index)
            .ok_or(TxnError::IndexOutOfRange { index, len })?;
        if !current.status.can_transition_to(op.status) {
            return Err(TxnError::InvalidTransition {
                index,
                from: current.status,
                to: op.status,
            });
        }
        *current = op;
        self.log.save(txn)
    }

    pub fn complete(&self, txn: &mut Transaction) -> Result<()> {
        require_status(txn, "complete", |s| s == TransactionStatus::Pending)?;
        txn.status = TransactionStatus::Completed;
        txn.completed_at = Some(Utc::now());
        self.log.save(txn)?;
        tracing::info!(id = %txn.id, operations = txn.operations.len(), "transaction completed");
        Ok(())
    }

    pub fn fail(&self, txn: &mut Transaction, error: impl Display) -> Result<()> {
        require_status(txn, "fail", |s| s == TransactionStatus::Pending)?;
        let summary = error.to_string();
        txn.status = TransactionStatus::Failed;
        txn.completed_at = Some(Utc::now());
        txn.error_summary = Some(summary.clone());
        self.log.save(txn)?;
        tracing::info!(id = %txn.id, error = %summary, "transaction failed");
        Ok(())
    }

    /// Record that a rollback pass ran over every completed operation.
    pub fn mark_rolled_back(&self, txn: &mut Transaction) -> Result<()> {
        require_status(txn, "roll back", TransactionStatus::is_rollback_eligible)?;
        txn.status = TransactionStatus::RolledBack;
        self.log.save(txn)
    }

    pub fn load(&self, id: &str) -> Result<Transaction> {
        self.log.load(id)
    }

    pub fn list(&self) -> Result<Vec<String>> {
        self.log.list()
    }

    fn new_id<F>(&self, fill: F) -> Result<(String, bool)>
    where
        F: FnOnce(&mut [u8]) -> std::result::Result<(), getrandom::Error>,
    {
        let mut bytes = [0u8; ID_BYTES];
        match fill(&mut bytes) {
            Ok(()) => Ok((hex::encode(bytes), false)),
            Err(e) if self.require_strong_ids => Err(TxnError::RandomUnavailable(e.to_string())),
            Err(e) => {
                let now = Utc::now();
                let id = format!(
                    "{}-{:09}-{}",
                    now.format("%Y%m%d%H%M%S"),
                    now.timestamp_subsec_nanos(),
                    std::process::id()
                );
                tracing::warn!(
                    error = %e,
                    %id,
                    "random source unavailable, falling back to timestamp id with weak collision resistance"
                );
                Ok((id, true))
            }
        }
    }
}

fn require_status(
    txn: &Transaction,
    action: &'static str,
    allowed: impl Fn(TransactionStatus) -> bool,
) -> Result<()> {
    if allowed(txn.status) {
        Ok(())
    } else {
        Err(TxnError::State {
            id: txn.id.clone(),
            status: txn.status,
            action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OperationStatus;
    use pretty_assertions::assert_eq;

    fn manager() -> (tempfile::TempDir, TransactionManager) {
        let dir = tempfile::tempdir().unwrap();
        let mgr = TransactionManager::open(dir.path().join("log")).unwrap();
        (dir, mgr)
    }

    #[test]
    fn begin_persists_immediately() {
        let (_dir, mgr) = manager();
        let txn = mgr.begin().unwrap();
        assert_eq!(txn.id.len(), ID_BYTES * 2);
        assert!(!txn.weak_id);
        assert_eq!(mgr.load(&txn.id).unwrap(), txn);
        assert_eq!(mgr.list().unwrap(), vec![txn.id.clone()]);
    }

    #[test]
    fn ids_are_unique() {
        let (_dir, mgr) = manager();
        let a = mgr.begin().unwrap();
        let b = mgr.begin().unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn every_mutation_is_durable() {
        let (_dir, mgr) = manager();
        let mut txn = mgr.begin().unwrap();
        let op = Operation::move_file("/in/a.mkv", "/lib/A (2020)/A (2020).mkv")
            .with_status(OperationStatus::InProgress);
        mgr.add_operation(&mut txn, op.clone()).unwrap();
        assert_eq!(mgr.load(&txn.id).unwrap().operations, vec![op.clone()]);

        let done = op.with_status(OperationStatus::Completed);
        mgr.update_operation(&mut txn, 0, done.clone()).unwrap();
        assert_eq!(mgr.load(&txn.id).unwrap().operations, vec![done]);

        mgr.fail(&mut txn, "disk on fire").unwrap();
        let loaded = mgr.load(&txn.id).unwrap();
        assert_eq!(loaded.status, TransactionStatus::Failed);
        assert_eq!(loaded.error_summary.as_deref(), Some("disk on fire"));
        assert!(loaded.completed_at.is_some());
    }

    #[test]
    fn update_checks_index_and_transition() {
        let (_dir, mgr) = manager();
        let mut txn = mgr.begin().unwrap();
        let op = Operation::create_file("/lib/a.nfo").with_status(OperationStatus::Completed);
        mgr.add_operation(&mut txn, op.clone()).unwrap();

        let err = mgr.update_operation(&mut txn, 3, op.clone()).unwrap_err();
        assert!(matches!(err, TxnError::IndexOutOfRange { index: 3, len: 1 }));

        let err = mgr
            .update_operation(&mut txn, 0, op.with_status(OperationStatus::Pending))
            .unwrap_err();
        assert!(matches!(err, TxnError::InvalidTransition { .. }));
    }

    #[test]
    fn lifecycle_guards() {
        let (_dir, mgr) = manager();
        let mut txn = mgr.begin().unwrap();

        assert!(matches!(
            mgr.mark_rolled_back(&mut txn),
            Err(TxnError::State { .. })
        ));

        mgr.complete(&mut txn).unwrap();
        assert!(matches!(
            mgr.add_operation(&mut txn, Operation::create_file("/lib/x.nfo")),
            Err(TxnError::State { .. })
        ));
        assert!(matches!(mgr.fail(&mut txn, "late"), Err(TxnError::State { .. })));

        mgr.mark_rolled_back(&mut txn).unwrap();
        assert_eq!(mgr.load(&txn.id).unwrap().status, TransactionStatus::RolledBack);
    }

    #[test]
    fn weak_id_fallback_is_flagged() {
        let (_dir, mgr) = manager();
        let (id, weak) = mgr.new_id(|_| Err(getrandom::Error::UNSUPPORTED)).unwrap();
        assert!(weak);
        // Must still be usable as a record name.
        mgr.log.record_path(&id).unwrap();

        let strict = mgr.clone().require_strong_ids(true);
        assert!(matches!(
            strict.new_id(|_| Err(getrandom::Error::UNSUPPORTED)),
            Err(TxnError::RandomUnavailable(_))
        ));
    }

    #[test]
    fn distinct_transactions_from_many_threads() {
        let (_dir, mgr) = manager();
        let ids: Vec<String> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let mgr = &mgr;
                    s.spawn(move || {
                        let mut txn = mgr.begin().unwrap();
                        let op = Operation::create_directory(format!("/lib/Show {i}"))
                            .with_status(OperationStatus::Completed);
                        mgr.add_operation(&mut txn, op).unwrap();
                        mgr.complete(&mut txn).unwrap();
                        txn.id
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let mut listed = mgr.list().unwrap();
        let mut expected = ids.clone();
        listed.sort();
        expected.sort();
        assert_eq!(listed, expected);
        for id in ids {
            let txn = mgr.load(&id).unwrap();
            assert_eq!(txn.status, TransactionStatus::Completed);
            assert_eq!(txn.operations.len(), 1);
        }
    }
}
