//! Free-space reporting for the pre-flight disk check.
//!
//! The check is best-effort: a reporter that cannot tell how much space is
//! left returns `None` and the validator skips the check.

use std::path::Path;

/// Reports the bytes available to an unprivileged writer on the filesystem
/// holding `path`.
pub trait FreeSpaceReporter: Send + Sync {
    fn available_bytes(&self, path: &Path) -> Option<u64>;
}

/// Never knows; disables the disk-space check.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl FreeSpaceReporter for NullReporter {
    fn available_bytes(&self, _path: &Path) -> Option<u64> {
        None
    }
}

/// Always reports the same figure.
#[derive(Debug, Clone, Copy)]
pub struct FixedReporter(pub u64);

impl FreeSpaceReporter for FixedReporter {
    fn available_bytes(&self, _path: &Path) -> Option<u64> {
        Some(self.0)
    }
}

/// Asks the operating system for the space left on the volume.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsReporter;

impl FreeSpaceReporter for OsReporter {
    fn available_bytes(&self, path: &Path) -> Option<u64> {
        match fs2::available_space(path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "cannot query free space");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_and_fixed() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(NullReporter.available_bytes(dir.path()), None);
        assert_eq!(FixedReporter(42).available_bytes(dir.path()), Some(42));
    }

    #[test]
    fn os_reporter_reports_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(OsReporter.available_bytes(dir.path()).is_some());
        assert_eq!(
            OsReporter.available_bytes(&dir.path().join("missing/deeper")),
            None
        );
    }
}
