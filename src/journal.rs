use std::fs;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use crate::error::{Result, TxnError};
use crate::model::Transaction;

const RECORD_EXTENSION: &str = "json";

/// Durable store holding one JSON snapshot per transaction.
///
/// Every save rewrites the whole record. Writes go to a temporary file in the
/// same directory, are flushed to disk, then renamed over the old record, so a
/// crash leaves either the previous snapshot or the new one.
#[derive(Debug, Clone)]
pub struct TransactionLog {
    dir: PathBuf,
}

impl TransactionLog {
    /// Open the store, creating the directory if it is absent.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| TxnError::io(&dir, e))?;
        Ok(Self { dir })
    }

    /// Path of the record for `id`.
    pub fn record_path(&self, id: &str) -> Result<PathBuf> {
        check_id(id)?;
        Ok(self.dir.join(format!("{id}.{RECORD_EXTENSION}")))
    }

    /// Overwrite the snapshot for `txn`.
    pub fn save(&self, txn: &Transaction) -> Result<()> {
        let path = self.record_path(&txn.id)?;
        let tmp = tempfile::Builder::new()
            .prefix(".txn-")
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .map_err(|e| TxnError::io(&self.dir, e))?;

        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer_pretty(&mut writer, txn)?;
        writer.flush().map_err(|e| TxnError::io(tmp.path(), e))?;
        drop(writer);
        tmp.as_file()
            .sync_all()
            .map_err(|e| TxnError::io(tmp.path(), e))?;
        tmp.persist(&path).map_err(|e| TxnError::io(&path, e.error))?;

        tracing::debug!(
            id = %txn.id,
            status = %txn.status,
            operations = txn.operations.len(),
            "persisted transaction"
        );
        Ok(())
    }

    /// Read the snapshot for `id`.
    pub fn load(&self, id: &str) -> Result<Transaction> {
        let path = self.record_path(id)?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TxnError::NotFound { id: id.to_string() });
            }
            Err(e) => return Err(TxnError::io(&path, e)),
        };
        serde_json::from_str(&content).map_err(|source| TxnError::Corrupt {
            id: id.to_string(),
            source,
        })
    }

    /// All ids with a record in the store, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| TxnError::io(&self.dir, e))?;
        let mut ids = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| TxnError::io(&self.dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && check_id(stem).is_ok()
            {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Ids become file names; anything that could escape the log directory or
/// hide as a dotfile is refused.
fn check_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(TxnError::InvalidId(id.to_string()))
    }
}
