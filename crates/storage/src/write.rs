//! Whole-file writes that readers can never observe half-done.
//!
//! Data goes to a uniquely named temporary sibling first (same directory, so
//! same file system) and is then renamed over the target. Temporary files are
//! created owner-only (`0o600`), and missing parent directories owner-only
//! (`0o700`).

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Create `dir` and any missing parents, owner-only on Unix.
pub fn create_dir_all(dir: &Path) -> Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    std::os::unix::fs::DirBuilderExt::mode(&mut builder, 0o700);
    builder.create(dir).map_err(|err| ErrorKind::from_io(err, dir))?;
    Ok(())
}

/// Blocking atomic write. Call from a blocking context.
pub fn persist(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| ErrorKind::InvalidPath(path.to_path_buf()))?;
    create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|err| ErrorKind::from_io(err, parent))?;
    tmp.write_all(data).map_err(ErrorKind::Io)?;
    tmp.as_file().sync_all().map_err(ErrorKind::Io)?;
    // On failure the temporary file is handed back inside the error and
    // deleted when it drops.
    tmp.persist(path).map_err(|err| ErrorKind::Io(err.error))?;
    Ok(())
}

/// Async wrapper around [`persist`], run on the blocking pool.
pub async fn write_atomic(path: impl Into<PathBuf>, data: Vec<u8>) -> Result<()> {
    let path = path.into();
    match tokio::task::spawn_blocking(move || persist(&path, &data)).await {
        Ok(result) => result,
        Err(err) => exn::bail!(ErrorKind::Io(std::io::Error::other(err))),
    }
}
