//! Background cache warming.
//!
//! One worker per process. It scans a directory for eligible sources whose
//! derivatives are missing, queues a [`WorkItem`] for each, and then drains
//! the backlog one item at a time. New scan requests (from the tree watcher)
//! are picked up between items, so a long drain never delays discovery.
//! Sources the encoder rejected are remembered and not queued again by later
//! scans; requests for them still get the original.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use trove_codec::Profile;
use trove_storage::error::ErrorKind as StorageErrorKind;

use crate::derived::{DerivedCache, WorkItem};
use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
    #[default]
    Idle,
    Scanning,
    Draining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerStatus {
    pub state: WorkerState,
    /// Completed scans, including ones that found nothing.
    pub scans: u64,
    pub built: u64,
    pub failed: u64,
    /// Items still waiting in the backlog.
    pub pending: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Built,
    /// Someone else built it since the scan.
    Present,
    /// The source could not be read.
    Unreadable,
    /// The encoder rejected the source.
    Failed,
}

pub struct PrecacheWorker {
    cache: Arc<DerivedCache>,
    targets: Vec<Profile>,
}

/// Talks to a running [`PrecacheWorker`].
pub struct PrecacheHandle {
    requests: mpsc::UnboundedSender<PathBuf>,
    status: watch::Receiver<WorkerStatus>,
    task: JoinHandle<()>,
}

impl PrecacheWorker {
    /// `targets` are the profiles every eligible source should have.
    pub fn new(cache: Arc<DerivedCache>, targets: Vec<Profile>) -> Self {
        Self { cache, targets }
    }

    /// Find every eligible source beneath `dir` that is missing one of the
    /// target derivatives.
    ///
    /// A directory that vanished or is empty yields nothing; any other walk
    /// failure is logged and whatever was found before it is returned.
    pub async fn discover(&self, dir: &Path) -> Vec<WorkItem> {
        let layout = self.cache.layout();
        let mut sources = Vec::new();
        let walked = trove_storage::walk(dir, |entry| {
            if !entry.is_dir()
                && let Some(relative) = layout.relative(&entry.path)
                && layout.is_eligible(relative)
            {
                sources.push(relative.to_path_buf());
            }
        })
        .await;
        match walked {
            Ok(_) => {},
            Err(err) if matches!(&*err, StorageErrorKind::Empty(_) | StorageErrorKind::NotFound(_)) => {},
            Err(err) => tracing::warn!(error = %err, dir = %dir.display(), "Scan aborted early"),
        }

        let mut missing = Vec::new();
        for source in sources {
            for profile in &self.targets {
                let item = self.cache.work_item(&source, *profile);
                if !fs::try_exists(&item.destination).await.unwrap_or(false) {
                    missing.push(item);
                }
            }
        }
        missing
    }

    /// Build one backlog item. Failures are logged and never stop the drain.
    async fn process(&self, item: &WorkItem) -> Outcome {
        match self.cache.warm(item).await {
            Ok(true) => Outcome::Built,
            Ok(false) => Outcome::Present,
            Err(err) => {
                match &*err {
                    ErrorKind::NotFound(_) | ErrorKind::Io => {
                        tracing::warn!(error = %err, source = %item.source.display(), "Could not read source; skipping");
                        Outcome::Unreadable
                    },
                    _ => {
                        tracing::warn!(error = %err, source = %item.source.display(), "Could not build derived image; skipping");
                        Outcome::Failed
                    },
                }
            },
        }
    }

    /// Start the worker with a full scan of the served root.
    pub fn spawn(self) -> PrecacheHandle {
        let (requests, mut incoming) = mpsc::unbounded_channel::<PathBuf>();
        let (publish, status) = watch::channel(WorkerStatus::default());
        let root = self.cache.layout().served_root().to_path_buf();

        let task = tokio::spawn(async move {
            let mut scans = VecDeque::from([root]);
            let mut backlog: VecDeque<WorkItem> = VecDeque::new();
            let mut rejected: HashSet<PathBuf> = HashSet::new();
            loop {
                while let Ok(dir) = incoming.try_recv() {
                    scans.push_back(dir);
                }

                if let Some(dir) = scans.pop_front() {
                    publish.send_modify(|s| s.state = WorkerState::Scanning);
                    let mut found = self.discover(&dir).await;
                    found.retain(|item| !rejected.contains(&item.destination));
                    tracing::info!(dir = %dir.display(), missing = found.len(), "Precache scan finished");
                    backlog.extend(found);
                    publish.send_modify(|s| {
                        s.scans += 1;
                        s.pending = backlog.len();
                    });
                    continue;
                }

                if let Some(item) = backlog.pop_front() {
                    publish.send_modify(|s| s.state = WorkerState::Draining);
                    let outcome = self.process(&item).await;
                    if outcome == Outcome::Failed {
                        rejected.insert(item.destination.clone());
                    }
                    publish.send_modify(|s| {
                        s.pending = backlog.len();
                        match outcome {
                            Outcome::Built => s.built += 1,
                            Outcome::Present => {},
                            Outcome::Unreadable | Outcome::Failed => s.failed += 1,
                        }
                    });
                    continue;
                }

                publish.send_modify(|s| s.state = WorkerState::Idle);
                match incoming.recv().await {
                    Some(dir) => scans.push_back(dir),
                    None => break,
                }
            }
        });

        PrecacheHandle { requests, status, task }
    }
}

impl PrecacheHandle {
    /// Queue a re-scan of `dir` (absolute, beneath the served root).
    pub fn rescan(&self, dir: impl Into<PathBuf>) {
        if self.requests.send(dir.into()).is_err() {
            tracing::warn!("Precache worker has stopped; rescan dropped");
        }
    }

    /// Sender for whoever produces scan requests (the tree watcher).
    pub fn requests(&self) -> mpsc::UnboundedSender<PathBuf> {
        self.requests.clone()
    }

    pub fn status(&self) -> WorkerStatus {
        *self.status.borrow()
    }

    /// Wait until at least `scans` scans have completed and the backlog is drained.
    pub async fn wait_idle(&mut self, scans: u64) -> WorkerStatus {
        if let Ok(status) = self.status.wait_for(|s| s.state == WorkerState::Idle && s.scans >= scans).await {
            return *status;
        }
        // The worker is gone; report the last thing it said.
        *self.status.borrow()
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::CacheLayout;
    use trove_codec::{Codec, MockEncoder, Profiles, Role};

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        encoder: Arc<MockEncoder>,
        worker: PrecacheWorker,
    }

    fn fixture(files: &[(&str, &[u8])]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        std::fs::create_dir_all(root.join("files")).unwrap();
        for (name, data) in files {
            let path = root.join("files").join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, data).unwrap();
        }
        let layout = CacheLayout::new(root.join("files"), root.join("thumbs"), root.join("lossy"));
        let encoder = Arc::new(MockEncoder::default());
        let profiles = Profiles::default();
        let cache = Arc::new(DerivedCache::new(layout, profiles.clone(), encoder.clone()));
        let targets = vec![profiles.get(Role::Thumbnail, Codec::Avif), profiles.get(Role::Lossy, Codec::Webp)];
        Fixture { _dir: dir, root, encoder, worker: PrecacheWorker::new(cache, targets) }
    }

    #[tokio::test]
    async fn test_discover_skips_ineligible_and_existing() {
        let f = fixture(&[("a.jpg", b"a"), ("sub/b.png", b"bb"), ("notes.txt", b"t")]);
        std::fs::create_dir_all(f.root.join("thumbs")).unwrap();
        std::fs::write(f.root.join("thumbs/a.avif"), b"done").unwrap();

        let mut found: Vec<_> =
            f.worker.discover(&f.root.join("files")).await.into_iter().map(|item| item.destination).collect();
        found.sort();
        assert_eq!(
            found,
            vec![f.root.join("lossy/webp/a.webp"), f.root.join("lossy/webp/sub/b.webp"), f.root.join("thumbs/sub/b.avif"),]
        );
    }

    #[tokio::test]
    async fn test_discover_tolerates_missing_and_empty_directories() {
        let f = fixture(&[]);
        assert!(f.worker.discover(&f.root.join("files")).await.is_empty());
        assert!(f.worker.discover(&f.root.join("files/gone")).await.is_empty());
    }

    #[tokio::test]
    async fn test_initial_scan_drains_and_skips_failures() {
        let f = fixture(&[("a.jpg", b"a"), ("bad.jpg", MockEncoder::CORRUPT), ("c.webp", b"c")]);
        let root = f.root.clone();
        let encoder = f.encoder.clone();
        let mut handle = f.worker.spawn();

        let status = handle.wait_idle(1).await;
        assert_eq!(status.built, 4);
        assert_eq!(status.failed, 2);
        assert_eq!(status.pending, 0);
        assert_eq!(encoder.calls(), 6);
        assert!(root.join("thumbs/c.avif").is_file());
        assert!(root.join("lossy/webp/a.webp").is_file());
        handle.abort();
    }

    #[tokio::test]
    async fn test_vanished_source_is_skipped() {
        let f = fixture(&[("a.jpg", b"a"), ("c.webp", b"c")]);
        let backlog = f.worker.discover(&f.root.join("files")).await;
        assert_eq!(backlog.len(), 4);
        std::fs::remove_file(f.root.join("files/a.jpg")).unwrap();

        let mut outcomes = Vec::new();
        for item in &backlog {
            outcomes.push((item.source.clone(), f.worker.process(item).await));
        }
        for (source, outcome) in &outcomes {
            let expected = if source == Path::new("a.jpg") { Outcome::Unreadable } else { Outcome::Built };
            assert_eq!(*outcome, expected, "{}", source.display());
        }
        assert_eq!(f.encoder.calls(), 2);
        assert!(f.root.join("thumbs/c.avif").is_file());
        assert!(!f.root.join("thumbs/a.avif").exists());

        let built = backlog.iter().find(|item| item.source == Path::new("c.webp")).unwrap();
        assert_eq!(f.worker.process(built).await, Outcome::Present);
        assert_eq!(f.encoder.calls(), 2);
    }

    #[tokio::test]
    async fn test_rejected_sources_are_not_retried() {
        let f = fixture(&[("a.jpg", b"a"), ("bad.jpg", MockEncoder::CORRUPT)]);
        let root = f.root.clone();
        let encoder = f.encoder.clone();
        let mut handle = f.worker.spawn();
        let first = handle.wait_idle(1).await;
        assert_eq!((first.built, first.failed), (2, 2));
        assert_eq!(encoder.calls(), 4);

        handle.rescan(root.join("files"));
        let second = handle.wait_idle(2).await;
        assert_eq!((second.built, second.failed), (2, 2));
        assert_eq!(encoder.calls(), 4);
        handle.abort();
    }

    #[tokio::test]
    async fn test_rescan_picks_up_new_files_only() {
        let f = fixture(&[("a.jpg", b"a")]);
        let root = f.root.clone();
        let encoder = f.encoder.clone();
        let mut handle = f.worker.spawn();
        handle.wait_idle(1).await;
        assert_eq!(encoder.calls(), 2);

        std::fs::create_dir_all(root.join("files/new")).unwrap();
        std::fs::write(root.join("files/new/b.png"), b"b").unwrap();
        handle.rescan(root.join("files"));
        let status = handle.wait_idle(2).await;

        assert_eq!(status.built, 4);
        assert_eq!(encoder.calls(), 4);
        handle.abort();
    }
}
