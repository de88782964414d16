//! Archive Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Archiving the whole served tree is refused.
    #[display("refusing to archive the served root")]
    Forbidden,
    /// The requested directory has no entries at all.
    #[display("directory is empty: {}", _0.display())]
    EmptyDirectory(#[error(not(source))] PathBuf),
    #[display("not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// A path handed to the archiver does not live under its base directory.
    #[display("not inside the archived directory: {}", _0.display())]
    OutsideBase(#[error(not(source))] PathBuf),
    /// The archive was already finalized or cleaned up.
    #[display("archive is closed")]
    Closed,
    #[display("archive I/O error")]
    Io,
    /// A blocking task panicked or was cancelled.
    #[display("background task failed")]
    Task,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io | Self::Task)
    }
}
