//! Pre-flight safety checks for planned operations.
//!
//! Nothing here mutates user data. A zero-byte probe file is created and
//! removed again before the check returns. The default validator also
//! creates a missing destination parent directory; a [`Validator::check_only`]
//! validator leaves the tree exactly as it found it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bytesize::ByteSize;

use crate::error::{InvalidPath, Rejection, ValidationError};
use crate::model::{Operation, OperationKind};
use crate::space::{FreeSpaceReporter, OsReporter};

/// Free space that must remain available regardless of file size.
pub const DEFAULT_MIN_FREE_SPACE: ByteSize = ByteSize::mib(100);

/// Headroom over the file size (10%), for filesystem overhead and concurrent writers.
const SPACE_MARGIN_DIVISOR: u64 = 10;

/// Characters unsafe on at least one of the platforms a library is shared with.
const FORBIDDEN_CHARS: [char; 7] = ['<', '>', ':', '"', '|', '?', '*'];

/// Checks whether operations are safe to execute.
pub struct Validator {
    min_free_space: ByteSize,
    space: Box<dyn FreeSpaceReporter>,
    create_parents: bool,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_FREE_SPACE)
    }
}

impl Validator {
    /// Validator backed by the OS free-space reporter.
    pub fn new(min_free_space: ByteSize) -> Self {
        Self {
            min_free_space,
            space: Box::new(OsReporter),
            create_parents: true,
        }
    }

    /// Never create missing parent directories; probe the nearest existing
    /// ancestor instead.
    pub fn check_only(mut self) -> Self {
        self.create_parents = false;
        self
    }

    /// Replace the free-space reporter.
    pub fn with_reporter(mut self, reporter: impl FreeSpaceReporter + 'static) -> Self {
        self.space = Box::new(reporter);
        self
    }

    /// Check a single operation.
    pub fn validate_operation(&self, op: &Operation) -> Result<(), ValidationError> {
        let reject = |reason: Rejection| ValidationError::new(op, reason);
        match op.kind {
            OperationKind::Move | OperationKind::Rename => {
                let source = op.source().ok_or_else(|| reject(Rejection::MissingSource(op.kind)))?;
                let size = check_source(source).map_err(reject)?;
                validate_path(&op.destination).map_err(|e| reject(e.into()))?;
                let parent = parent_of(&op.destination).map_err(reject)?;
                let probed = ensure_writable(parent, self.create_parents).map_err(reject)?;
                self.check_space(probed, size).map_err(reject)?;
            }
            OperationKind::CreateDirectory | OperationKind::CreateFile => {
                validate_path(&op.destination).map_err(|e| reject(e.into()))?;
                if fs::symlink_metadata(&op.destination).is_ok() {
                    return Err(reject(Rejection::DestinationExists));
                }
                let parent = parent_of(&op.destination).map_err(reject)?;
                ensure_writable(parent, self.create_parents).map_err(reject)?;
            }
            OperationKind::Unknown => return Err(reject(Rejection::UnknownKind)),
        }
        Ok(())
    }

    /// Check every operation independently and collect all failures, each
    /// with the position of the operation it rejects.
    pub fn validate_plan<'a, I>(&self, operations: I) -> Vec<(usize, ValidationError)>
    where
        I: IntoIterator<Item = &'a Operation>,
    {
        operations
            .into_iter()
            .enumerate()
            .filter_map(|(index, op)| self.validate_operation(op).err().map(|e| (index, e)))
            .collect()
    }

    fn check_space(&self, dir: &Path, file_size: u64) -> Result<(), Rejection> {
        let Some(available) = self.space.available_bytes(dir) else {
            tracing::debug!(dir = %dir.display(), "free space unknown, skipping disk space check");
            return Ok(());
        };
        let with_margin = file_size.saturating_add(file_size / SPACE_MARGIN_DIVISOR);
        let required = with_margin.max(self.min_free_space.as_u64());
        if available <= required {
            return Err(Rejection::InsufficientSpace {
                path: dir.to_path_buf(),
                required: ByteSize::b(required),
                available: ByteSize::b(available),
            });
        }
        Ok(())
    }
}

/// Check a destination path against the media server's naming rules.
///
/// Only the final component is subject to the filename rules; directory
/// segments are checked for forbidden characters alone.
pub fn validate_path(path: &Path) -> Result<(), InvalidPath> {
    if path.as_os_str().is_empty() {
        return Err(InvalidPath::Empty);
    }
    let text = path.to_string_lossy();
    if let Some(c) = text.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(InvalidPath::ForbiddenChar(c));
    }
    // `file_name` is `None` for paths ending in `.` or `..`, which are allowed.
    let Some(name) = path.file_name() else {
        return Ok(());
    };
    let name = name.to_string_lossy();
    if name.starts_with('.') {
        return Err(InvalidPath::HiddenName(name.into_owned()));
    }
    if name.starts_with(' ') || name.ends_with(' ') {
        return Err(InvalidPath::SurroundingSpace(name.into_owned()));
    }
    if name.ends_with('.') {
        return Err(InvalidPath::TrailingDot(name.into_owned()));
    }
    Ok(())
}

/// Returns the source's size once it is known to be a readable regular file.
fn check_source(source: &Path) -> Result<u64, Rejection> {
    let meta = fs::metadata(source).map_err(|_| Rejection::SourceMissing)?;
    if meta.is_dir() {
        return Err(Rejection::SourceIsDirectory);
    }
    if !meta.is_file() {
        return Err(Rejection::SourceNotFile);
    }
    fs::File::open(source).map_err(Rejection::SourceUnreadable)?;
    Ok(meta.len())
}

fn parent_of(path: &Path) -> Result<&Path, Rejection> {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => Ok(p),
        _ => Err(Rejection::NoParent),
    }
}

/// Prove new files can be created under `dir`, returning the directory that
/// was actually probed.
///
/// With `create` set, `dir` is created first if missing. Otherwise the nearest
/// existing ancestor stands in for it. The probe file is deleted when it goes
/// out of scope, on every path.
fn ensure_writable(dir: &Path, create: bool) -> Result<&Path, Rejection> {
    let target = if create {
        fs::create_dir_all(dir).map_err(|e| not_writable(dir, e))?;
        dir
    } else {
        nearest_existing(dir)?
    };
    let probe = tempfile::Builder::new()
        .prefix(".write-probe-")
        .tempfile_in(target)
        .map_err(|e| not_writable(target, e))?;
    probe.close().map_err(|e| not_writable(target, e))?;
    Ok(target)
}

fn nearest_existing(dir: &Path) -> Result<&Path, Rejection> {
    let found = dir
        .ancestors()
        .find(|p| !p.as_os_str().is_empty() && fs::symlink_metadata(p).is_ok());
    match found {
        Some(p) if p.is_dir() => Ok(p),
        Some(p) => Err(not_writable(
            p,
            io::Error::new(io::ErrorKind::NotADirectory, "not a directory"),
        )),
        None => Err(not_writable(
            dir,
            io::Error::new(io::ErrorKind::NotFound, "no existing ancestor"),
        )),
    }
}

fn not_writable(path: &Path, source: io::Error) -> Rejection {
    Rejection::NotWritable {
        path: PathBuf::from(path),
        source,
    }
}
