//! Recursive, non-blocking directory traversal.
//!
//! The walk is driven by an explicit stack of pending directories rather than
//! recursion, so a directory is only "finished" once every directory pushed
//! beneath it has been drained. Each `read_dir`/stat goes through `tokio::fs`,
//! which keeps independent walks (and request handling) from blocking each
//! other.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use async_stream::stream;
use futures::{Stream, StreamExt};
use tokio::fs::{self, DirEntry};

use crate::error::{ErrorKind, Result};

/// What kind of thing a walked path is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    /// A symbolic link that resolves to a directory. Traversed like a
    /// directory, but only once per canonical target.
    LinkedDirectory,
}

/// A single path discovered by the walker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Absolute (or root-joined) path of the entry.
    pub path: PathBuf,
    pub kind: EntryKind,
}
impl Entry {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Directory | EntryKind::LinkedDirectory)
    }

    /// Path of the entry relative to `base`, if it lives beneath it.
    pub fn relative_to(&self, base: &Path) -> Option<&Path> {
        self.path.strip_prefix(base).ok()
    }
}

/// Totals reported once a walk completes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalkSummary {
    pub files: usize,
    pub directories: usize,
}

pub type EntryStream = Pin<Box<dyn Stream<Item = Result<Entry>> + Send>>;

enum Visit {
    Yield(Entry),
    Skip,
}

async fn classify(entry: &DirEntry) -> std::io::Result<Visit> {
    let path = entry.path();
    let file_type = entry.file_type().await?;
    if file_type.is_symlink() {
        return Ok(match fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Visit::Yield(Entry { path, kind: EntryKind::LinkedDirectory }),
            Ok(meta) if meta.is_file() => Visit::Yield(Entry { path, kind: EntryKind::File }),
            // Dangling link or something exotic on the other end.
            _ => Visit::Skip,
        });
    }
    Ok(match file_type {
        t if t.is_dir() => Visit::Yield(Entry { path, kind: EntryKind::Directory }),
        t if t.is_file() => Visit::Yield(Entry { path, kind: EntryKind::File }),
        // Sockets, FIFOs, devices.
        _ => Visit::Skip,
    })
}

/// Stream every entry beneath `root`, depth-first.
///
/// Sibling order follows whatever the file system returns and is not stable.
/// The stream ends after the first error:
///
/// - [`ErrorKind::NotFound`] if `root` does not exist,
/// - [`ErrorKind::Empty`] if `root` itself has no entries (empty
///   subdirectories are fine),
/// - [`ErrorKind::Io`] for any other read or stat failure, anywhere.
pub fn entries(root: impl Into<PathBuf>) -> EntryStream {
    let root = root.into();
    Box::pin(stream! {
        let canonical_root = match fs::canonicalize(&root).await {
            Ok(path) => path,
            Err(err) => {
                yield Err(exn::Exn::from(ErrorKind::from_io(err, &root)));
                return;
            },
        };
        let mut visited = HashSet::from([canonical_root]);
        let mut stack = vec![root.clone()];

        while let Some(current) = stack.pop() {
            let is_root = current == root;
            let mut reader = match fs::read_dir(&current).await {
                Ok(reader) => reader,
                Err(err) if is_root => {
                    yield Err(exn::Exn::from(ErrorKind::from_io(err, &root)));
                    return;
                },
                Err(err) => {
                    yield Err(exn::Exn::from(ErrorKind::Io(err)));
                    return;
                },
            };

            let mut seen_any = false;
            loop {
                let entry = match reader.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(err) => {
                        yield Err(exn::Exn::from(ErrorKind::Io(err)));
                        return;
                    },
                };
                seen_any = true;
                let entry = match classify(&entry).await {
                    Ok(Visit::Yield(entry)) => entry,
                    Ok(Visit::Skip) => continue,
                    Err(err) => {
                        yield Err(exn::Exn::from(ErrorKind::Io(err)));
                        return;
                    },
                };
                if entry.is_dir() {
                    match fs::canonicalize(&entry.path).await {
                        Ok(target) => {
                            if visited.insert(target) {
                                stack.push(entry.path.clone());
                            } else {
                                tracing::debug!(path = %entry.path.display(), "Directory already visited; not descending");
                            }
                        },
                        Err(err) => {
                            yield Err(exn::Exn::from(ErrorKind::Io(err)));
                            return;
                        },
                    }
                }
                yield Ok(entry);
            }

            if is_root && !seen_any {
                yield Err(exn::Exn::from(ErrorKind::Empty(root.clone())));
                return;
            }
        }
    })
}

/// Walk `root`, handing every entry to `visitor` in traversal order.
///
/// Visitor side effects that happened before an error are not undone.
pub async fn walk<F>(root: impl Into<PathBuf>, mut visitor: F) -> Result<WalkSummary>
where
    F: FnMut(&Entry),
{
    let mut summary = WalkSummary::default();
    let mut stream = entries(root);
    while let Some(entry) = stream.next().await {
        let entry = entry?;
        match entry.is_dir() {
            true => summary.directories += 1,
            false => summary.files += 1,
        }
        visitor(&entry);
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as sync_fs;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        sync_fs::create_dir_all(path.parent().unwrap()).unwrap();
        sync_fs::write(path, b"x").unwrap();
    }

    #[tokio::test]
    async fn test_visits_every_entry_once() {
        let temp_dir = tempfile::tempdir().unwrap();
        touch(temp_dir.path(), "a.txt");
        touch(temp_dir.path(), "sub/b.txt");
        touch(temp_dir.path(), "sub/deeper/c.txt");
        sync_fs::create_dir(temp_dir.path().join("empty")).unwrap();

        let mut seen = Vec::new();
        let summary = walk(temp_dir.path(), |entry| {
            seen.push(entry.relative_to(temp_dir.path()).unwrap().to_path_buf())
        })
        .await
        .unwrap();

        seen.sort();
        let expected: Vec<PathBuf> =
            ["a.txt", "empty", "sub", "sub/b.txt", "sub/deeper", "sub/deeper/c.txt"].iter().map(PathBuf::from).collect();
        assert_eq!(seen, expected);
        assert_eq!(summary, WalkSummary { files: 3, directories: 3 });
    }

    #[tokio::test]
    async fn test_missing_root_is_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = walk(temp_dir.path().join("nope"), |_| {}).await.unwrap_err();
        assert!(matches!(*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_empty_root_is_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = walk(temp_dir.path(), |_| {}).await.unwrap_err();
        assert!(matches!(*err, ErrorKind::Empty(_)));
    }

    #[tokio::test]
    async fn test_empty_subdirectory_is_not_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        sync_fs::create_dir(temp_dir.path().join("only")).unwrap();
        let summary = walk(temp_dir.path(), |_| {}).await.unwrap();
        assert_eq!(summary, WalkSummary { files: 0, directories: 1 });
    }

    #[tokio::test]
    async fn test_file_root_is_io_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        touch(temp_dir.path(), "file.txt");
        let err = walk(temp_dir.path().join("file.txt"), |_| {}).await.unwrap_err();
        assert!(matches!(*err, ErrorKind::Io(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_directories_are_traversed_once() {
        let temp_dir = tempfile::tempdir().unwrap();
        touch(temp_dir.path(), "real/photo.jpg");
        std::os::unix::fs::symlink(temp_dir.path().join("real"), temp_dir.path().join("alias")).unwrap();
        // A loop back up to the root must not recurse forever.
        std::os::unix::fs::symlink(temp_dir.path(), temp_dir.path().join("real/up")).unwrap();

        let mut kinds = Vec::new();
        walk(temp_dir.path(), |entry| kinds.push(entry.kind)).await.unwrap();

        assert_eq!(kinds.iter().filter(|k| **k == EntryKind::LinkedDirectory).count(), 2);
        // `photo.jpg` is reached through whichever of `real`/`alias` is walked
        // first, and never twice.
        assert_eq!(kinds.iter().filter(|k| **k == EntryKind::File).count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dangling_symlinks_are_skipped() {
        let temp_dir = tempfile::tempdir().unwrap();
        touch(temp_dir.path(), "a.txt");
        std::os::unix::fs::symlink(temp_dir.path().join("gone"), temp_dir.path().join("broken")).unwrap();
        let summary = walk(temp_dir.path(), |_| {}).await.unwrap();
        assert_eq!(summary, WalkSummary { files: 1, directories: 0 });
    }
}
