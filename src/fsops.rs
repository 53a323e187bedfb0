use std::fs;
use std::io;
use std::path::Path;

/// Create a single directory. The parent must already exist.
pub fn mkdir(dst: &Path) -> io::Result<()> {
    fs::create_dir(dst)
}

/// Create an empty file, refusing to clobber an existing one.
pub fn touch(dst: &Path) -> io::Result<()> {
    fs::OpenOptions::new().write(true).create_new(true).open(dst)?;
    Ok(())
}

/// Check if two paths are on the same filesystem.
#[cfg(unix)]
fn same_filesystem(src: &Path, dst: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;
    let src_meta = fs::metadata(src)?;
    let dst_parent = dst.parent().unwrap_or_else(|| Path::new("."));
    let dst_parent_meta = fs::metadata(dst_parent)?;
    Ok(src_meta.dev() == dst_parent_meta.dev())
}

#[cfg(not(unix))]
fn same_filesystem(_src: &Path, _dst: &Path) -> io::Result<bool> {
    // Let rename decide; cross-volume failures fall back to copy+remove.
    Ok(true)
}

/// Move a regular file, returning the bytes copied (0 for a plain rename).
///
/// Within one filesystem this is an atomic rename. Across filesystems the
/// file is copied, synced, and only then removed from its old location.
pub fn mv(src: &Path, dst: &Path) -> io::Result<u64> {
    if same_filesystem(src, dst)? {
        match fs::rename(src, dst) {
            Ok(()) => return Ok(0),
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {}
            Err(e) => return Err(e),
        }
    }
    copy_then_remove(src, dst)
}

fn copy_then_remove(src: &Path, dst: &Path) -> io::Result<u64> {
    let bytes = fs::copy(src, dst)?;
    if let Err(e) = fs::File::open(dst).and_then(|f| f.sync_all()) {
        let _ = fs::remove_file(dst);
        return Err(e);
    }
    fs::remove_file(src)?;
    tracing::debug!(
        src = %src.display(),
        dst = %dst.display(),
        bytes,
        "moved across filesystems"
    );
    Ok(bytes)
}

/// Remove `dir` if it is empty, then keep climbing through parents that
/// became empty.
///
/// Stops at the first non-empty directory, the filesystem root, or
/// `boundary` (which is never removed). Failures are logged and swallowed.
pub fn remove_empty_dirs(dir: &Path, boundary: Option<&Path>) {
    let mut current = dir;
    loop {
        if current.as_os_str().is_empty() || current == Path::new(".") || current.parent().is_none() {
            return;
        }
        if boundary.is_some_and(|b| current == b || !current.starts_with(b)) {
            return;
        }
        let mut entries = match fs::read_dir(current) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(dir = %current.display(), error = %e, "cannot read directory, stopping cleanup");
                return;
            }
        };
        if entries.next().is_some() {
            return;
        }
        if let Err(e) = fs::remove_dir(current) {
            tracing::warn!(dir = %current.display(), error = %e, "failed to remove empty directory");
            return;
        }
        tracing::debug!(dir = %current.display(), "removed empty directory");
        match current.parent() {
            Some(parent) => current = parent,
            None => return,
        }
    }
}
