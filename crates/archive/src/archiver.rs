//! Streaming zip builder.
//!
//! The archive is written to `<destination>.part` and only renamed to its
//! final name once the central directory is on disk, so nothing ever observes
//! a half-written archive under the real name. File contents are streamed
//! entry by entry; the writer is moved onto the blocking pool for each entry
//! and moved back afterwards, which keeps writes to it strictly sequential.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use exn::ResultExt;
use futures::StreamExt;
use time::OffsetDateTime;
use tokio::fs;
use tracing::instrument;
use trove_storage::error::ErrorKind as StorageErrorKind;
use trove_storage::slash_path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{Error, ErrorKind, Result};

type Writer = ZipWriter<BufWriter<File>>;

const PROVISIONAL_SUFFIX: &str = ".part";
const FILE_MODE: u32 = 0o600;
const DIR_MODE: u32 = 0o700;

/// `archive.zip` becomes `archive.zip.part`.
pub fn provisional_path(destination: &Path) -> PathBuf {
    let mut name = OsString::from(destination.as_os_str());
    name.push(PROVISIONAL_SUFFIX);
    PathBuf::from(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveState {
    Opened,
    Packaging,
    Ready,
    Failed,
    CleanedUp,
}

/// What a finished archive contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub destination: PathBuf,
    pub files_added: usize,
    pub dirs_added: usize,
    /// Size of the published file, in bytes.
    pub archive_size: u64,
    pub created: OffsetDateTime,
}

pub struct Archiver {
    base: PathBuf,
    destination: PathBuf,
    provisional: PathBuf,
    writer: Option<Writer>,
    state: ArchiveState,
    /// Every entry name written or pending, files and directories alike.
    names: BTreeSet<String>,
    directories: Vec<String>,
    files_added: usize,
    created: OffsetDateTime,
}

impl Archiver {
    /// Open `<destination>.part` for writing. Entry names will be relative to `base`.
    pub async fn begin(base: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Result<Self> {
        let destination = destination.into();
        let provisional = provisional_path(&destination);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Io)?;
        }
        let file = fs::File::create(&provisional).await.or_raise(|| ErrorKind::Io)?.into_std().await;
        tracing::debug!(path = %provisional.display(), "Archive opened");
        Ok(Self {
            base: base.into(),
            destination,
            provisional,
            writer: Some(ZipWriter::new(BufWriter::new(file))),
            state: ArchiveState::Opened,
            names: BTreeSet::new(),
            directories: Vec::new(),
            files_added: 0,
            created: OffsetDateTime::now_utc(),
        })
    }

    pub fn state(&self) -> ArchiveState {
        self.state
    }

    pub fn provisional(&self) -> &Path {
        &self.provisional
    }

    fn entry_name(&self, path: &Path) -> Result<String> {
        let relative = path.strip_prefix(&self.base).map_err(|_| ErrorKind::OutsideBase(path.to_path_buf()))?;
        let name = slash_path(relative);
        if name.is_empty() {
            exn::bail!(ErrorKind::OutsideBase(path.to_path_buf()));
        }
        Ok(name)
    }

    /// Run `op` against the writer on the blocking pool.
    async fn with_writer<T, F>(&mut self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Writer) -> Result<T> + Send + 'static,
    {
        let mut writer = self.writer.take().ok_or(ErrorKind::Closed)?;
        let (writer, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut writer);
            (writer, result)
        })
        .await
        .or_raise(|| ErrorKind::Task)?;
        self.writer = Some(writer);
        result
    }

    /// Stream the file at `path` into the archive.
    pub async fn add_file(&mut self, path: &Path) -> Result<()> {
        let name = self.entry_name(path)?;
        self.state = ArchiveState::Packaging;
        let source = path.to_path_buf();
        let entry = name.clone();
        self.with_writer(move |writer| {
            let mut file = File::open(&source).or_raise(|| ErrorKind::Io)?;
            let size = file.metadata().or_raise(|| ErrorKind::Io)?.len();
            let options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .unix_permissions(FILE_MODE)
                .large_file(size >= u64::from(u32::MAX));
            writer.start_file(entry, options).or_raise(|| ErrorKind::Io)?;
            io::copy(&mut file, writer).or_raise(|| ErrorKind::Io)?;
            Ok(())
        })
        .await?;
        self.names.insert(name);
        self.files_added += 1;
        Ok(())
    }

    /// Note a directory. Only directories that end up with nothing beneath
    /// them get a record of their own; the rest are implied by their entries.
    pub async fn add_directory(&mut self, path: &Path) -> Result<()> {
        let name = self.entry_name(path)?;
        if self.writer.is_none() {
            exn::bail!(ErrorKind::Closed);
        }
        self.state = ArchiveState::Packaging;
        self.names.insert(name.clone());
        self.directories.push(name);
        Ok(())
    }

    /// Add everything beneath `top`.
    #[instrument(skip(self, top), fields(top = %top.display()))]
    pub async fn package_recursively(&mut self, top: &Path) -> Result<()> {
        let mut entries = trove_storage::entries(top);
        while let Some(entry) = entries.next().await {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => match &*err {
                    StorageErrorKind::Empty(_) => exn::bail!(ErrorKind::EmptyDirectory(top.to_path_buf())),
                    StorageErrorKind::NotFound(_) => exn::bail!(ErrorKind::NotFound(top.to_path_buf())),
                    _ => return Err(err).or_raise(|| ErrorKind::Io),
                },
            };
            match entry.is_dir() {
                true => self.add_directory(&entry.path).await?,
                false => self.add_file(&entry.path).await?,
            }
        }
        Ok(())
    }

    fn leaf_directories(&self) -> Vec<String> {
        self.directories
            .iter()
            .filter(|dir| {
                let prefix = format!("{dir}/");
                !self.names.range(prefix.clone()..).next().is_some_and(|name| name.starts_with(&prefix))
            })
            .cloned()
            .collect()
    }

    /// Close the archive and publish it under its final name.
    #[instrument(skip(self), fields(destination = %self.destination.display()))]
    pub async fn finalize(&mut self) -> Result<Summary> {
        let leaves = self.leaf_directories();
        let mut writer = self.writer.take().ok_or(ErrorKind::Closed)?;
        let archive_size = tokio::task::spawn_blocking(move || {
            let options = SimpleFileOptions::default().unix_permissions(DIR_MODE);
            for dir in leaves {
                writer.add_directory(dir, options).or_raise(|| ErrorKind::Io)?;
            }
            let mut buffered = writer.finish().or_raise(|| ErrorKind::Io)?;
            buffered.flush().or_raise(|| ErrorKind::Io)?;
            let file = buffered.into_inner().map_err(|err| err.into_error()).or_raise(|| ErrorKind::Io)?;
            file.sync_all().or_raise(|| ErrorKind::Io)?;
            Ok::<_, Error>(file.metadata().or_raise(|| ErrorKind::Io)?.len())
        })
        .await
        .or_raise(|| ErrorKind::Task)??;

        match fs::remove_file(&self.destination).await {
            Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err).or_raise(|| ErrorKind::Io),
            _ => {},
        }
        fs::rename(&self.provisional, &self.destination).await.or_raise(|| ErrorKind::Io)?;
        self.state = ArchiveState::Ready;

        let summary = Summary {
            destination: self.destination.clone(),
            files_added: self.files_added,
            dirs_added: self.directories.len(),
            archive_size,
            created: self.created,
        };
        tracing::info!(
            files = summary.files_added,
            dirs = summary.dirs_added,
            size = summary.archive_size,
            "Archive published"
        );
        Ok(summary)
    }

    /// Drop the writer and delete the provisional file. Never fails; problems
    /// are logged.
    pub async fn cleanup(&mut self) {
        if self.state == ArchiveState::Ready {
            return;
        }
        self.state = ArchiveState::Failed;
        drop(self.writer.take());
        match fs::remove_file(&self.provisional).await {
            Ok(()) => tracing::debug!(path = %self.provisional.display(), "Provisional archive removed"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {},
            Err(err) => {
                tracing::warn!(error = %err, path = %self.provisional.display(), "Could not remove provisional archive")
            },
        }
        self.state = ArchiveState::CleanedUp;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(root: &Path, rel: &str, data: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    fn entry_names(path: &Path) -> Vec<String> {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut names: Vec<_> = (0..archive.len()).map(|i| archive.by_index(i).unwrap().name().to_string()).collect();
        names.sort();
        names
    }

    #[test]
    fn test_provisional_path() {
        assert_eq!(provisional_path(Path::new("/tmp/a/b.zip")), Path::new("/tmp/a/b.zip.part"));
    }

    #[tokio::test]
    async fn test_round_trip_entry_names() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path().join("served/album");
        touch(&base, "a.txt", b"alpha");
        touch(&base, "sub/b.txt", b"bravo");
        let destination = temp_dir.path().join("out/album.zip");

        let mut archiver = Archiver::begin(&base, &destination).await.unwrap();
        assert!(archiver.provisional().is_file());
        archiver.package_recursively(&base).await.unwrap();
        let summary = archiver.finalize().await.unwrap();

        assert_eq!(archiver.state(), ArchiveState::Ready);
        assert_eq!(entry_names(&destination), vec!["a.txt", "sub/b.txt"]);
        assert_eq!((summary.files_added, summary.dirs_added), (2, 1));
        assert_eq!(std::fs::metadata(&destination).unwrap().len(), summary.archive_size);
        assert!(!provisional_path(&destination).exists());
    }

    #[tokio::test]
    async fn test_contents_and_permissions() {
        use std::io::Read;
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path().join("served");
        touch(&base, "note.txt", b"hello archive");
        let destination = temp_dir.path().join("served.zip");

        let mut archiver = Archiver::begin(&base, &destination).await.unwrap();
        archiver.add_file(&base.join("note.txt")).await.unwrap();
        archiver.finalize().await.unwrap();

        let mut archive = zip::ZipArchive::new(File::open(&destination).unwrap()).unwrap();
        let mut entry = archive.by_name("note.txt").unwrap();
        assert_eq!(entry.unix_mode().map(|mode| mode & 0o777), Some(FILE_MODE));
        let mut contents = String::new();
        entry.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "hello archive");
    }

    #[tokio::test]
    async fn test_only_empty_subdirectory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path().join("served");
        std::fs::create_dir_all(base.join("nothing/here")).unwrap();
        let destination = temp_dir.path().join("served.zip");

        let mut archiver = Archiver::begin(&base, &destination).await.unwrap();
        archiver.package_recursively(&base).await.unwrap();
        let summary = archiver.finalize().await.unwrap();

        assert_eq!(entry_names(&destination), vec!["nothing/here/"]);
        assert_eq!((summary.files_added, summary.dirs_added), (0, 2));
    }

    #[tokio::test]
    async fn test_empty_directory_and_cleanup() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path().join("served");
        std::fs::create_dir_all(&base).unwrap();
        let destination = temp_dir.path().join("served.zip");

        let mut archiver = Archiver::begin(&base, &destination).await.unwrap();
        let err = archiver.package_recursively(&base).await.unwrap_err();
        assert!(matches!(*err, ErrorKind::EmptyDirectory(_)));

        archiver.cleanup().await;
        assert_eq!(archiver.state(), ArchiveState::CleanedUp);
        assert!(!provisional_path(&destination).exists());
        assert!(!destination.exists());
        assert!(matches!(*archiver.add_file(&base.join("x")).await.unwrap_err(), ErrorKind::Closed));
    }

    #[tokio::test]
    async fn test_finalize_replaces_existing_archive() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path().join("served");
        touch(&base, "fresh.txt", b"new");
        let destination = temp_dir.path().join("served.zip");
        std::fs::write(&destination, b"stale").unwrap();

        let mut archiver = Archiver::begin(&base, &destination).await.unwrap();
        archiver.package_recursively(&base).await.unwrap();
        archiver.finalize().await.unwrap();
        assert_eq!(entry_names(&destination), vec!["fresh.txt"]);
    }

    #[tokio::test]
    async fn test_rejects_paths_outside_base() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path().join("served");
        std::fs::create_dir_all(&base).unwrap();
        let mut archiver = Archiver::begin(&base, temp_dir.path().join("x.zip")).await.unwrap();
        let err = archiver.add_file(&temp_dir.path().join("elsewhere.txt")).await.unwrap_err();
        assert!(matches!(*err, ErrorKind::OutsideBase(_)));
        archiver.cleanup().await;
    }
}
