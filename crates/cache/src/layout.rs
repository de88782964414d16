//! Where sources live and where their derivatives go.
//!
//! ```text
//! <served>/holiday/beach.png
//! <thumbnails>/holiday/beach.avif
//! <lossy>/webp/holiday/beach.webp
//! <lossy>/jpeg/holiday/beach.jpg
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use trove_codec::{Codec, Profile, Role};
use trove_storage::extension;

/// Extensions derived images are built from. Not all of them decode with
/// every encoder; see `trove_codec::ImageEncoder`.
pub const DEFAULT_ELIGIBLE: [&str; 8] = ["jpg", "jpeg", "png", "dng", "avif", "jxl", "webp", "heic"];

#[derive(Debug, Clone)]
pub struct CacheLayout {
    served_root: PathBuf,
    thumbnail_root: PathBuf,
    lossy_root: PathBuf,
    eligible: HashSet<String>,
}

impl CacheLayout {
    pub fn new(served_root: impl Into<PathBuf>, thumbnail_root: impl Into<PathBuf>, lossy_root: impl Into<PathBuf>) -> Self {
        Self {
            served_root: served_root.into(),
            thumbnail_root: thumbnail_root.into(),
            lossy_root: lossy_root.into(),
            eligible: DEFAULT_ELIGIBLE.iter().map(|ext| ext.to_string()).collect(),
        }
    }

    /// Replace the eligible extension list. Matching is case-insensitive.
    pub fn with_eligible<S: AsRef<str>>(mut self, extensions: impl IntoIterator<Item = S>) -> Self {
        self.eligible = extensions.into_iter().map(|ext| ext.as_ref().trim_start_matches('.').to_lowercase()).collect();
        self
    }

    pub fn served_root(&self) -> &Path {
        &self.served_root
    }

    pub fn is_eligible(&self, path: impl AsRef<Path>) -> bool {
        extension(path).is_some_and(|ext| self.eligible.contains(&ext))
    }

    pub fn source_path(&self, relative: &Path) -> PathBuf {
        self.served_root.join(relative)
    }

    /// Relative path of something inside the served root.
    pub fn relative<'a>(&self, absolute: &'a Path) -> Option<&'a Path> {
        absolute.strip_prefix(&self.served_root).ok()
    }

    pub fn thumbnail_path(&self, relative: &Path, codec: Codec) -> PathBuf {
        self.thumbnail_root.join(relative).with_extension(codec.extension())
    }

    pub fn lossy_path(&self, relative: &Path, codec: Codec) -> PathBuf {
        self.lossy_root.join(codec.as_str()).join(relative).with_extension(codec.extension())
    }

    pub fn output_path(&self, relative: &Path, profile: &Profile) -> PathBuf {
        match profile.role {
            Role::Thumbnail => self.thumbnail_path(relative, profile.codec),
            Role::Lossy => self.lossy_path(relative, profile.codec),
        }
    }
}
