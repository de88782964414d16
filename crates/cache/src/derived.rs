//! Get-or-build for derived images.
//!
//! A derivative is valid for as long as its output file exists; nothing else
//! (source mtime, content hash) is consulted. Builds for the same output path
//! are serialised through [`KeyedLocks`], and the loser of the race re-checks
//! the cache instead of encoding a second time. Outputs are written through a
//! temporary sibling and renamed into place.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use exn::ResultExt;
use tokio::fs;
use tracing::instrument;
use trove_codec::{Codec, Encoder, Profile, Profiles, Role};
use trove_storage::KeyedLocks;

use crate::error::{ErrorKind, Result};
use crate::layout::CacheLayout;

/// Whether the caller wants the bytes back or only wants the cache populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Return,
    Warm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Read from an existing cache file.
    Cached,
    /// Encoded by this call.
    Built,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derived {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub origin: Origin,
}

/// A pending derivation: `source` (relative to the served root) rendered
/// with `profile` into `destination`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub profile: Profile,
    pub source: PathBuf,
    pub destination: PathBuf,
}

pub struct DerivedCache {
    layout: CacheLayout,
    profiles: Profiles,
    encoder: Arc<dyn Encoder>,
    locks: KeyedLocks,
}

impl DerivedCache {
    pub fn new(layout: CacheLayout, profiles: Profiles, encoder: Arc<dyn Encoder>) -> Self {
        Self { layout, profiles, encoder, locks: KeyedLocks::new() }
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    pub fn profile(&self, role: Role, codec: Codec) -> Profile {
        self.profiles.get(role, codec)
    }

    pub fn work_item(&self, source: &Path, profile: Profile) -> WorkItem {
        WorkItem { profile, source: source.to_path_buf(), destination: self.layout.output_path(source, &profile) }
    }

    /// Thumbnail of `source` that fits inside the thumbnail box.
    pub async fn thumbnail(&self, source: &Path, codec: Codec) -> Result<Derived> {
        let item = self.work_item(source, self.profile(Role::Thumbnail, codec));
        let (origin, bytes) = self.get_or_build(&item, Delivery::Return).await?;
        Ok(Derived { bytes: bytes.unwrap_or_default(), content_type: item.profile.mime(), origin })
    }

    /// Full-size re-encode of `source`. Returns `None` for [`Delivery::Warm`].
    pub async fn lossy(&self, source: &Path, codec: Codec, delivery: Delivery) -> Result<Option<Derived>> {
        let item = self.work_item(source, self.profile(Role::Lossy, codec));
        let (origin, bytes) = self.get_or_build(&item, delivery).await?;
        Ok(bytes.map(|bytes| Derived { bytes, content_type: item.profile.mime(), origin }))
    }

    /// Build `item` if its output is missing. Returns whether anything was built.
    pub async fn warm(&self, item: &WorkItem) -> Result<bool> {
        let (origin, _) = self.get_or_build(item, Delivery::Warm).await?;
        Ok(origin == Origin::Built)
    }

    /// `Some(bytes)` on a hit; for [`Delivery::Warm`] the bytes are not read.
    async fn cached(destination: &Path, delivery: Delivery) -> Option<Vec<u8>> {
        match delivery {
            Delivery::Warm => match fs::try_exists(destination).await {
                Ok(true) => Some(Vec::new()),
                _ => None,
            },
            Delivery::Return => fs::read(destination).await.ok(),
        }
    }

    #[instrument(skip(self, item), fields(source = %item.source.display(), role = %item.profile.role, codec = %item.profile.codec))]
    async fn get_or_build(&self, item: &WorkItem, delivery: Delivery) -> Result<(Origin, Option<Vec<u8>>)> {
        if !self.layout.is_eligible(&item.source) {
            exn::bail!(ErrorKind::Ineligible(item.source.clone()));
        }
        let deliver = |bytes: Vec<u8>| (delivery == Delivery::Return).then_some(bytes);

        if let Some(bytes) = Self::cached(&item.destination, delivery).await {
            return Ok((Origin::Cached, deliver(bytes)));
        }
        let _guard = self.locks.lock(&item.destination).await;
        if let Some(bytes) = Self::cached(&item.destination, delivery).await {
            tracing::debug!("Built by a concurrent request");
            return Ok((Origin::Cached, deliver(bytes)));
        }

        let source_path = self.layout.source_path(&item.source);
        let source = match fs::read(&source_path).await {
            Ok(source) => source,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                exn::bail!(ErrorKind::NotFound(item.source.clone()))
            },
            Err(err) => return Err(err).or_raise(|| ErrorKind::Io),
        };

        let encoder = self.encoder.clone();
        let profile = item.profile;
        let destination = item.destination.clone();
        let bytes = tokio::task::spawn_blocking(move || {
            let bytes = encoder.encode(&source, &profile).or_raise(|| ErrorKind::Encode)?;
            if let Err(err) = trove_storage::persist(&destination, &bytes) {
                // The caller still gets its image; the next request retries the write.
                tracing::warn!(error = %err, destination = %destination.display(), "Could not write derived image");
            }
            Ok::<_, crate::error::Error>(bytes)
        })
        .await
        .or_raise(|| ErrorKind::Task)??;

        tracing::info!(destination = %item.destination.display(), size = bytes.len(), "Derived image built");
        Ok((Origin::Built, deliver(bytes)))
    }
}
