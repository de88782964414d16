//! Cache Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The source file does not exist.
    #[display("source not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// The source's extension is not one the cache derives from.
    #[display("not an eligible source: {}", _0.display())]
    Ineligible(#[error(not(source))] PathBuf),
    #[display("cache I/O error")]
    Io,
    /// The transcoder rejected the source or failed to produce output.
    #[display("could not encode derived image")]
    Encode,
    /// A blocking task panicked or was cancelled.
    #[display("background task failed")]
    Task,
    #[display("could not watch directory")]
    Watch,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io | Self::Task)
    }
}
