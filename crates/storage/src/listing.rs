//! Directory enumeration, classified by extension.

use std::path::Path;

use tokio::fs;

use crate::error::{ErrorKind, Result};
use crate::path::extension;

const IMAGE: &[&str] = &["jpg", "png", "gif", "jpeg", "dng", "avif", "jxl", "webp", "heic"];
const AUDIO: &[&str] = &["mp3", "opus", "wav", "ogg", "flac", "m4a"];
const VIDEO: &[&str] = &["m4v", "mp4", "mkv", "webm"];

/// Listing group. Declaration order is listing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryClass {
    Directory,
    Image,
    Other,
    Audio,
    Video,
}
impl EntryClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Directory => "dir",
            Self::Image => "image",
            Self::Other => "other",
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    /// Classify a non-directory by its file name.
    pub fn of_file(name: impl AsRef<Path>) -> Self {
        let Some(ext) = extension(name) else {
            return Self::Other;
        };
        match ext.as_str() {
            e if IMAGE.contains(&e) => Self::Image,
            e if AUDIO.contains(&e) => Self::Audio,
            e if VIDEO.contains(&e) => Self::Video,
            _ => Self::Other,
        }
    }
}
impl std::fmt::Display for EntryClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listed {
    pub name: String,
    pub class: EntryClass,
}

/// Immediate children of `dir`, grouped by [`EntryClass`].
///
/// Within a group, entries keep the order the file system returned them in.
/// Symbolic links to directories count as directories; links that can't be
/// resolved are classified by name.
pub async fn list_directory(dir: &Path) -> Result<Vec<Listed>> {
    let mut reader = fs::read_dir(dir).await.map_err(|err| ErrorKind::from_io(err, dir))?;
    let mut listed = Vec::new();
    while let Some(entry) = reader.next_entry().await.map_err(ErrorKind::Io)? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let class = match fs::metadata(entry.path()).await {
            Ok(meta) if meta.is_dir() => EntryClass::Directory,
            _ => EntryClass::of_file(&name),
        };
        listed.push(Listed { name, class });
    }
    listed.sort_by_key(|entry| entry.class);
    Ok(listed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("cat.JPG", EntryClass::Image)]
    #[case("anim.gif", EntryClass::Image)]
    #[case("raw.dng", EntryClass::Image)]
    #[case("song.flac", EntryClass::Audio)]
    #[case("voice.opus", EntryClass::Audio)]
    #[case("clip.webm", EntryClass::Video)]
    #[case("notes.txt", EntryClass::Other)]
    #[case("Makefile", EntryClass::Other)]
    fn test_of_file(#[case] name: &str, #[case] expected: EntryClass) {
        assert_eq!(EntryClass::of_file(name), expected);
    }

    #[tokio::test]
    async fn test_listing_order() {
        let temp_dir = tempfile::tempdir().unwrap();
        for name in ["z.mp4", "b.mp3", "a.txt", "p.png"] {
            std::fs::write(temp_dir.path().join(name), b"").unwrap();
        }
        std::fs::create_dir(temp_dir.path().join("sub")).unwrap();

        let classes: Vec<_> = list_directory(temp_dir.path()).await.unwrap().into_iter().map(|l| l.class).collect();
        assert_eq!(
            classes,
            vec![EntryClass::Directory, EntryClass::Image, EntryClass::Other, EntryClass::Audio, EntryClass::Video]
        );
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = list_directory(&temp_dir.path().join("gone")).await.unwrap_err();
        assert!(matches!(*err, ErrorKind::NotFound(_)));
    }
}
