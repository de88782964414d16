//! Build-once, serve-until-expired archives.
//!
//! An archive of `<served>/a/b` lives at `<archives>/a/b.zip`. If it exists it
//! is served as-is; otherwise it is built, and deleted again once the
//! retention window has passed. Requests for the same archive are serialised,
//! so a burst of them results in a single build.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use exn::ResultExt;
use tokio::fs;
use trove_storage::KeyedLocks;
use trove_storage::error::ErrorKind as StorageErrorKind;

use crate::archiver::{Archiver, Summary};
use crate::error::{ErrorKind, Result};

/// Default time a built archive is kept around.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Outcome of a start-up [`sweep`](ArchiveLifecycle::sweep).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    /// Leftover `.part` files deleted.
    pub discarded: usize,
    /// Existing archives whose expiry was (re)scheduled.
    pub scheduled: usize,
}

#[derive(Clone)]
pub struct ArchiveLifecycle {
    served_root: PathBuf,
    archive_root: PathBuf,
    retention: Duration,
    locks: KeyedLocks,
    builds: Arc<AtomicU64>,
}

impl ArchiveLifecycle {
    pub fn new(served_root: impl Into<PathBuf>, archive_root: impl Into<PathBuf>, retention: Duration) -> Self {
        Self {
            served_root: served_root.into(),
            archive_root: archive_root.into(),
            retention,
            locks: KeyedLocks::new(),
            builds: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of archive builds started since construction.
    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::SeqCst)
    }

    /// Where the archive for `relative` is (or would be) published.
    pub fn destination(&self, relative: &Path) -> PathBuf {
        let mut name = self.archive_root.join(relative).into_os_string();
        name.push(".zip");
        PathBuf::from(name)
    }

    /// Path to a ready archive of the served directory `relative`, building
    /// it first if necessary.
    ///
    /// The work runs on its own task. A caller that goes away mid-build
    /// leaves it to finish, so the archive is still published (or cleaned up).
    pub async fn request(&self, relative: &Path) -> Result<PathBuf> {
        if relative.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Forbidden);
        }
        let this = self.clone();
        let relative = relative.to_path_buf();
        tokio::spawn(async move { this.reuse_or_build(&relative).await })
            .await
            .or_raise(|| ErrorKind::Task)?
    }

    async fn reuse_or_build(&self, relative: &Path) -> Result<PathBuf> {
        let source = self.served_root.join(relative);
        let destination = self.destination(relative);

        let _guard = self.locks.lock(&destination).await;
        if fs::try_exists(&destination).await.unwrap_or(false) {
            tracing::info!(archive = %destination.display(), "Serving existing archive");
            return Ok(destination);
        }
        match fs::metadata(&source).await {
            Ok(meta) if meta.is_dir() => {},
            Ok(_) => exn::bail!(ErrorKind::NotFound(relative.to_path_buf())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => exn::bail!(ErrorKind::NotFound(relative.to_path_buf())),
            Err(err) => return Err(err).or_raise(|| ErrorKind::Io),
        }

        self.builds.fetch_add(1, Ordering::SeqCst);
        let summary = Self::build(&source, &destination).await?;
        tracing::info!(
            archive = %destination.display(),
            files = summary.files_added,
            size = summary.archive_size,
            created = %summary.created,
            "Archive built"
        );
        self.schedule_expiry(destination.clone(), self.retention);
        Ok(destination)
    }

    async fn build(source: &Path, destination: &Path) -> Result<Summary> {
        let mut archiver = Archiver::begin(source, destination).await?;
        let built = match archiver.package_recursively(source).await {
            Ok(()) => archiver.finalize().await,
            Err(err) => Err(err),
        };
        if built.is_err() {
            archiver.cleanup().await;
        }
        built
    }

    /// Delete `archive` once `after` has elapsed.
    pub fn schedule_expiry(&self, archive: PathBuf, after: Duration) {
        let locks = self.locks.clone();
        tracing::info!(archive = %archive.display(), after_secs = after.as_secs(), "Archive deletion scheduled");
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _guard = locks.lock(&archive).await;
            match fs::remove_file(&archive).await {
                Ok(()) => tracing::info!(archive = %archive.display(), "Expired archive deleted"),
                Err(err) => tracing::warn!(error = %err, archive = %archive.display(), "Could not delete expired archive"),
            }
        });
    }

    /// Start-up maintenance of the archive directory: leftover `.zip.part`
    /// files are deleted and existing archives are scheduled for deletion at
    /// the end of their remaining retention window.
    pub async fn sweep(&self) -> Result<SweepSummary> {
        let mut files = Vec::new();
        let walked = trove_storage::walk(&self.archive_root, |entry| {
            if !entry.is_dir() {
                files.push(entry.path.clone());
            }
        })
        .await;
        match walked {
            Ok(_) => {},
            Err(err) if matches!(&*err, StorageErrorKind::Empty(_) | StorageErrorKind::NotFound(_)) => {},
            Err(err) => return Err(err).or_raise(|| ErrorKind::Io),
        }

        let mut summary = SweepSummary::default();
        for file in files {
            let name = file.to_string_lossy();
            if name.ends_with(".zip.part") {
                match fs::remove_file(&file).await {
                    Ok(()) => summary.discarded += 1,
                    Err(err) => tracing::warn!(error = %err, path = %file.display(), "Could not remove partial archive"),
                }
            } else if name.ends_with(".zip") {
                let age = fs::metadata(&file)
                    .await
                    .and_then(|meta| meta.modified())
                    .ok()
                    .and_then(|modified| SystemTime::now().duration_since(modified).ok())
                    .unwrap_or_default();
                self.schedule_expiry(file, self.retention.saturating_sub(age));
                summary.scheduled += 1;
            }
        }
        tracing::info!(discarded = summary.discarded, scheduled = summary.scheduled, "Archive directory swept");
        Ok(summary)
    }
}
