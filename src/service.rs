//! Everything a request handler needs, behind one object.
//!
//! Every fetch validates the raw request path and passes the [`AccessGate`]
//! before touching the file system. Derived images degrade to the original
//! file when they cannot be produced; archives and access failures do not.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use exn::ResultExt;
use serde::Serialize;
use tokio::fs;
use tokio::task::JoinHandle;
use trove_access::AccessGate;
use trove_archive::ArchiveLifecycle;
use trove_archive::error::ErrorKind as ArchiveErrorKind;
use trove_cache::error::ErrorKind as CacheErrorKind;
use trove_cache::{CacheLayout, Delivery, Derived, DerivedCache, PrecacheHandle, PrecacheWorker, TreeWatcher, WorkerState};
use trove_codec::{Codec, Encoder, Role};
use trove_config::{Codecs, Config};
use trove_storage::{EntryClass, Listed};

use crate::error::{ErrorKind, Result};

/// What to send back for an image request.
#[derive(Debug, PartialEq, Eq)]
pub enum Fetched {
    Derived(Derived),
    /// Serve this file untouched.
    Original(PathBuf),
}

/// A path under `/files`.
#[derive(Debug, PartialEq, Eq)]
pub enum Opened {
    /// Directory contents the caller may see.
    Directory(Vec<Listed>),
    File(PathBuf),
}

#[derive(Debug, Serialize)]
pub struct PrecacheStats {
    pub state: &'static str,
    pub scans: u64,
    pub built: u64,
    pub failed: u64,
    pub pending: usize,
}

#[derive(Debug, Serialize)]
pub struct Stats {
    pub uptime_secs: u64,
    pub archive_builds: u64,
    pub precache: Option<PrecacheStats>,
}

pub struct Service {
    gate: Arc<AccessGate>,
    cache: Arc<DerivedCache>,
    archives: ArchiveLifecycle,
    codecs: Codecs,
    lossy: bool,
    precache: Option<PrecacheHandle>,
    watcher: Option<JoinHandle<()>>,
    started: Instant,
}

impl Service {
    pub fn new(config: &Config, gate: Arc<AccessGate>, encoder: Arc<dyn Encoder>) -> Result<Self> {
        let codecs = config.codecs().or_raise(|| ErrorKind::Startup)?;
        let layout = CacheLayout::new(&config.served_root, &config.thumbnail_root, &config.lossy_root)
            .with_eligible(&config.eligible_extensions);
        let cache = Arc::new(DerivedCache::new(layout, config.profiles.clone(), encoder));
        let archives = ArchiveLifecycle::new(&config.served_root, &config.archive_root, config.archive_retention());
        Ok(Self {
            gate,
            cache,
            archives,
            codecs,
            lossy: config.lossy,
            precache: None,
            watcher: None,
            started: Instant::now(),
        })
    }

    pub fn archives(&self) -> &ArchiveLifecycle {
        &self.archives
    }

    /// Start warming the cache, and keep it warm as the tree changes.
    ///
    /// A watcher that cannot be created is logged; the initial scan still runs.
    pub fn spawn_background(&mut self, debounce: std::time::Duration) {
        let mut targets = vec![self.cache.profile(Role::Thumbnail, self.codecs.thumbnail)];
        if self.lossy {
            targets.extend(self.codecs.warm.iter().map(|codec| self.cache.profile(Role::Lossy, *codec)));
        }
        let handle = PrecacheWorker::new(self.cache.clone(), targets).spawn();
        let root = self.cache.layout().served_root().to_path_buf();
        match TreeWatcher::new(&root, debounce) {
            Ok(watcher) => self.watcher = Some(watcher.spawn(handle.requests())),
            Err(err) => tracing::warn!(error = ?err, root = %root.display(), "Could not watch served tree; precaching once"),
        }
        self.precache = Some(handle);
    }

    pub fn shutdown(&self) {
        if let Some(handle) = &self.precache {
            handle.abort();
        }
        if let Some(watcher) = &self.watcher {
            watcher.abort();
        }
    }

    fn authorize(&self, raw: &str, credential: Option<&str>) -> Result<PathBuf> {
        let relative = trove_storage::validate_request(raw).or_raise(|| ErrorKind::Malformed)?;
        if !self.gate.check(&trove_storage::slash_path(&relative), credential).is_allowed() {
            exn::bail!(ErrorKind::Forbidden);
        }
        Ok(relative)
    }

    fn original(&self, relative: &Path) -> Fetched {
        Fetched::Original(self.cache.layout().source_path(relative))
    }

    /// A thumbnail in the hinted codec (or the configured one). Falls back to
    /// the original when the thumbnail can't be built.
    pub async fn fetch_thumbnail(&self, raw: &str, hint: Option<&str>, credential: Option<&str>) -> Result<Fetched> {
        let relative = self.authorize(raw, credential)?;
        let codec = Codec::from_hint(hint, self.codecs.thumbnail);
        match self.cache.thumbnail(&relative, codec).await {
            Ok(derived) => Ok(Fetched::Derived(derived)),
            Err(err) if matches!(&*err, CacheErrorKind::NotFound(_)) => Err(err).or_raise(|| ErrorKind::NotFound),
            Err(err) => {
                tracing::warn!(error = %err, path = %relative.display(), "Could not create thumbnail; serving original");
                Ok(self.original(&relative))
            },
        }
    }

    /// A full-size re-encode, or the original when asked for (`original`),
    /// when re-encoding is switched off, for GIFs, and when encoding fails.
    pub async fn fetch_lossy(
        &self,
        raw: &str,
        hint: Option<&str>,
        original: bool,
        credential: Option<&str>,
    ) -> Result<Fetched> {
        let relative = self.authorize(raw, credential)?;
        if original || !self.lossy {
            return Ok(self.original(&relative));
        }
        if !self.cache.layout().is_eligible(&relative) {
            return match trove_storage::extension(&relative).as_deref() {
                Some("gif") => Ok(self.original(&relative)),
                _ => exn::bail!(ErrorKind::NotFound),
            };
        }

        let codec = Codec::from_hint(hint, self.codecs.lossy);
        match self.cache.lossy(&relative, codec, Delivery::Return).await {
            Ok(Some(derived)) => Ok(Fetched::Derived(derived)),
            Ok(None) => Ok(self.original(&relative)),
            Err(err) if matches!(&*err, CacheErrorKind::NotFound(_)) => Err(err).or_raise(|| ErrorKind::NotFound),
            Err(err) => {
                tracing::warn!(error = %err, path = %relative.display(), "Could not create lossy image; serving original");
                Ok(self.original(&relative))
            },
        }
    }

    /// Path of a ready zip of the requested directory. Refused when anything
    /// inside it is protected by a secret the caller doesn't have.
    pub async fn fetch_archive(&self, raw: &str, credential: Option<&str>) -> Result<PathBuf> {
        let relative = self.authorize(raw, credential)?;
        for prefix in self.gate.locked_below(&trove_storage::slash_path(&relative), credential) {
            let inner = self.cache.layout().source_path(Path::new(&prefix));
            if fs::try_exists(&inner).await.unwrap_or(true) {
                tracing::warn!(path = %relative.display(), protected = %prefix, "Archive would include protected paths");
                exn::bail!(ErrorKind::Forbidden);
            }
        }
        match self.archives.request(&relative).await {
            Ok(archive) => Ok(archive),
            Err(err) => {
                let kind = match &*err {
                    ArchiveErrorKind::Forbidden => ErrorKind::Forbidden,
                    ArchiveErrorKind::EmptyDirectory(_) => ErrorKind::EmptyDirectory,
                    ArchiveErrorKind::NotFound(_) => ErrorKind::NotFound,
                    _ => ErrorKind::Internal,
                };
                Err(err).or_raise(|| kind)
            },
        }
    }

    /// Directory enumeration with anything the caller can't open left out.
    pub async fn enumerate(&self, raw: &str, credential: Option<&str>) -> Result<Vec<Listed>> {
        match self.open(raw, credential).await? {
            Opened::Directory(listed) => Ok(listed),
            Opened::File(_) => exn::bail!(ErrorKind::NotFound),
        }
    }

    pub async fn open(&self, raw: &str, credential: Option<&str>) -> Result<Opened> {
        let relative = self.authorize(raw, credential)?;
        let path = self.cache.layout().source_path(&relative);
        let meta = match fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => exn::bail!(ErrorKind::NotFound),
            Err(err) => return Err(err).or_raise(|| ErrorKind::Internal),
        };
        if !meta.is_dir() {
            return Ok(Opened::File(path));
        }

        let mut listed = trove_storage::list_directory(&path).await.or_raise(|| ErrorKind::Internal)?;
        listed.retain(|entry| {
            entry.class != EntryClass::Directory
                || self.gate.permits(&trove_storage::slash_path(relative.join(&entry.name)), credential)
        });
        Ok(Opened::Directory(listed))
    }

    pub fn stats(&self) -> Stats {
        let precache = self.precache.as_ref().map(|handle| {
            let status = handle.status();
            PrecacheStats {
                state: match status.state {
                    WorkerState::Idle => "idle",
                    WorkerState::Scanning => "scanning",
                    WorkerState::Draining => "draining",
                },
                scans: status.scans,
                built: status.built,
                failed: status.failed,
                pending: status.pending,
            }
        });
        Stats { uptime_secs: self.started.elapsed().as_secs(), archive_builds: self.archives.builds(), precache }
    }
}
