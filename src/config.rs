use anyhow::{Context, Result};
use bytesize::ByteSize;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::transaction::TransactionManager;
use crate::validate::{DEFAULT_MIN_FREE_SPACE, Validator};

/// Runtime settings, read from an optional JSON file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Directory holding one record per transaction.
    pub log_dir: PathBuf,
    /// Free space that must remain at a destination regardless of file size.
    pub min_free_space: ByteSize,
    /// Refuse to start transactions when the OS random source fails.
    pub require_strong_ids: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from(".mediamove/transactions"),
            min_free_space: DEFAULT_MIN_FREE_SPACE,
            require_strong_ids: false,
        }
    }
}

impl Settings {
    /// Load settings from `path`, or defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn with_log_dir(mut self, log_dir: Option<PathBuf>) -> Self {
        if let Some(dir) = log_dir {
            self.log_dir = dir;
        }
        self
    }

    pub fn manager(&self) -> Result<TransactionManager> {
        let manager = TransactionManager::open(&self.log_dir)
            .with_context(|| format!("failed to open transaction log {}", self.log_dir.display()))?;
        Ok(manager.require_strong_ids(self.require_strong_ids))
    }

    pub fn validator(&self) -> Validator {
        Validator::new(self.min_free_space)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "min_free_space": "2 GiB" }"#).unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.min_free_space, ByteSize::gib(2));
        assert_eq!(settings.log_dir, Settings::default().log_dir);
        assert!(!settings.require_strong_ids);
    }

    #[test]
    fn unknown_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "log_directory": "/x" }"#).unwrap();
        assert!(Settings::load(Some(&path)).is_err());
    }

    #[test]
    fn cli_override_wins() {
        let settings = Settings::default().with_log_dir(Some("/var/lib/mediamove".into()));
        assert_eq!(settings.log_dir, PathBuf::from("/var/lib/mediamove"));
    }
}
