//! Keeps the precache backlog in step with the served tree.
//!
//! Every directory gets its own non-recursive watch. Structural events
//! (create, remove, rename) restart a single shared debounce timer; when it
//! finally fires, the deepest directory covering the whole burst is re-scanned
//! and any directories that appeared in the meantime are watched too.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use exn::ResultExt;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};

use crate::error::{ErrorKind, Result};

const EVENT_BUFFER: usize = 1024;

/// Changes collected during one quiet period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Burst {
    /// Deepest directory containing every change in the burst.
    pub scope: PathBuf,
    /// Paths reported as removed.
    pub removed: Vec<PathBuf>,
}

fn is_structural(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)))
}

fn common_ancestor(a: &Path, b: &Path) -> PathBuf {
    a.components().zip(b.components()).take_while(|(x, y)| x == y).map(|(x, _)| x).collect()
}

/// Collapse raw watcher events into [`Burst`]s.
///
/// Each structural event (re)starts the `delay` timer; a burst is emitted only
/// once no structural event has arrived for a full `delay`. Scopes never climb
/// above `root`. Anything still pending when `events` closes is flushed.
pub async fn debounce(
    mut events: mpsc::Receiver<Event>,
    root: PathBuf,
    delay: Duration,
    bursts: mpsc::UnboundedSender<Burst>,
) {
    let timer = sleep(delay);
    tokio::pin!(timer);
    let mut pending: Option<Burst> = None;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if !is_structural(&event.kind) {
                    continue;
                }
                for path in &event.paths {
                    let dir = path.parent().unwrap_or(&root);
                    let burst = pending.get_or_insert_with(|| Burst { scope: dir.to_path_buf(), removed: Vec::new() });
                    burst.scope = common_ancestor(&burst.scope, dir);
                    if !burst.scope.starts_with(&root) {
                        burst.scope = root.clone();
                    }
                    if matches!(event.kind, EventKind::Remove(_)) {
                        burst.removed.push(path.clone());
                    }
                }
                timer.as_mut().reset(Instant::now() + delay);
            },
            () = &mut timer, if pending.is_some() => {
                if let Some(burst) = pending.take() && bursts.send(burst).is_err() {
                    return;
                }
            },
        }
    }

    if let Some(burst) = pending.take() {
        let _ = bursts.send(burst);
    }
}

pub struct TreeWatcher {
    root: PathBuf,
    delay: Duration,
    watcher: RecommendedWatcher,
    events: Option<mpsc::Receiver<Event>>,
    watched: HashSet<PathBuf>,
}

impl TreeWatcher {
    pub fn new(root: impl Into<PathBuf>, delay: Duration) -> Result<Self> {
        let (sender, events) = mpsc::channel(EVENT_BUFFER);
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let _ = sender.blocking_send(event);
            },
            Err(err) => tracing::warn!(error = %err, "File system watcher error"),
        })
        .or_raise(|| ErrorKind::Watch)?;
        Ok(Self { root: root.into(), delay, watcher, events: Some(events), watched: HashSet::new() })
    }

    /// Directories currently holding a watch.
    pub fn watched(&self) -> usize {
        self.watched.len()
    }

    /// Watch `dir` and every directory beneath it that isn't watched yet.
    /// Returns how many new watches were added; failures are logged and skipped.
    pub async fn register(&mut self, dir: &Path) -> usize {
        let mut dirs = vec![dir.to_path_buf()];
        if let Err(err) = trove_storage::walk(dir, |entry| {
            if entry.is_dir() {
                dirs.push(entry.path.clone());
            }
        })
        .await
        {
            tracing::debug!(error = %err, dir = %dir.display(), "Walk for watch registration stopped early");
        }

        let mut added = 0;
        for dir in dirs {
            if self.watched.contains(&dir) {
                continue;
            }
            match self.watcher.watch(&dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    self.watched.insert(dir);
                    added += 1;
                },
                Err(err) => tracing::warn!(error = %err, dir = %dir.display(), "Could not watch directory"),
            }
        }
        added
    }

    fn forget(&mut self, removed: &Path) {
        let gone: Vec<_> = self.watched.iter().filter(|dir| dir.starts_with(removed)).cloned().collect();
        for dir in gone {
            // The kernel has usually dropped the watch already.
            let _ = self.watcher.unwatch(&dir);
            self.watched.remove(&dir);
        }
    }

    /// Watch the whole tree and forward each debounced burst's scope to `rescans`.
    pub fn spawn(mut self, rescans: mpsc::UnboundedSender<PathBuf>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let root = self.root.clone();
            let added = self.register(&root).await;
            tracing::info!(root = %root.display(), watches = added, "Watching served tree");

            let Some(events) = self.events.take() else { return };
            let (burst_sender, mut bursts) = mpsc::unbounded_channel();
            let debouncer = tokio::spawn(debounce(events, root, self.delay, burst_sender));

            while let Some(burst) = bursts.recv().await {
                for removed in &burst.removed {
                    self.forget(removed);
                }
                tracing::debug!(scope = %burst.scope.display(), "Tree changed; queueing rescan");
                if rescans.send(burst.scope.clone()).is_err() {
                    break;
                }
                self.register(&burst.scope).await;
            }
            debouncer.abort();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use rstest::rstest;

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[rstest]
    #[case("/srv/a/b", "/srv/a/c", "/srv/a")]
    #[case("/srv/a/b", "/srv/a/b/c", "/srv/a/b")]
    #[case("/srv/a", "/srv/z", "/srv")]
    fn test_common_ancestor(#[case] a: &str, #[case] b: &str, #[case] expected: &str) {
        assert_eq!(common_ancestor(Path::new(a), Path::new(b)), Path::new(expected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_one_rescan() {
        let (events_tx, events_rx) = mpsc::channel(16);
        let (bursts_tx, mut bursts_rx) = mpsc::unbounded_channel();
        tokio::spawn(debounce(events_rx, PathBuf::from("/srv"), Duration::from_secs(1), bursts_tx));

        for i in 0..5 {
            events_tx.send(event(EventKind::Create(CreateKind::File), &format!("/srv/album/{i}.jpg"))).await.unwrap();
            sleep(Duration::from_millis(200)).await;
        }
        sleep(Duration::from_secs(2)).await;

        assert_eq!(bursts_rx.try_recv().unwrap(), Burst { scope: PathBuf::from("/srv/album"), removed: vec![] });
        assert!(bursts_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_quiet_periods() {
        let (events_tx, events_rx) = mpsc::channel(16);
        let (bursts_tx, mut bursts_rx) = mpsc::unbounded_channel();
        tokio::spawn(debounce(events_rx, PathBuf::from("/srv"), Duration::from_secs(1), bursts_tx));

        events_tx.send(event(EventKind::Create(CreateKind::Folder), "/srv/a/new")).await.unwrap();
        sleep(Duration::from_secs(2)).await;
        events_tx.send(event(EventKind::Remove(RemoveKind::Any), "/srv/b/old.png")).await.unwrap();
        events_tx.send(event(EventKind::Create(CreateKind::File), "/srv/c/x.png")).await.unwrap();
        sleep(Duration::from_secs(2)).await;

        assert_eq!(bursts_rx.try_recv().unwrap().scope, PathBuf::from("/srv/a"));
        let second = bursts_rx.try_recv().unwrap();
        assert_eq!(second.scope, PathBuf::from("/srv"));
        assert_eq!(second.removed, vec![PathBuf::from("/srv/b/old.png")]);
        assert!(bursts_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_content_changes_are_ignored_and_pending_flushes_on_close() {
        let (events_tx, events_rx) = mpsc::channel(16);
        let (bursts_tx, mut bursts_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(debounce(events_rx, PathBuf::from("/srv"), Duration::from_secs(1), bursts_tx));

        events_tx
            .send(event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), "/srv/a/x.jpg"))
            .await
            .unwrap();
        sleep(Duration::from_secs(2)).await;
        assert!(bursts_rx.try_recv().is_err());

        events_tx.send(event(EventKind::Create(CreateKind::File), "/srv/a/y.jpg")).await.unwrap();
        drop(events_tx);
        task.await.unwrap();
        assert_eq!(bursts_rx.try_recv().unwrap().scope, PathBuf::from("/srv/a"));
    }

    #[tokio::test]
    async fn test_register_watches_every_directory_once() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("a/b")).unwrap();
        std::fs::create_dir_all(temp_dir.path().join("c")).unwrap();
        std::fs::write(temp_dir.path().join("a/file.jpg"), b"x").unwrap();

        let mut watcher = TreeWatcher::new(temp_dir.path(), Duration::from_millis(50)).unwrap();
        assert_eq!(watcher.register(temp_dir.path()).await, 4);
        assert_eq!(watcher.register(temp_dir.path()).await, 0);

        std::fs::create_dir(temp_dir.path().join("c/d")).unwrap();
        assert_eq!(watcher.register(&temp_dir.path().join("c")).await, 1);
        assert_eq!(watcher.watched(), 5);

        watcher.forget(&temp_dir.path().join("a"));
        assert_eq!(watcher.watched(), 3);
    }
}
