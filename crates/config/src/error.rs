//! Config Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// An explicitly requested configuration file does not exist.
    #[display("configuration file not found: {}", _0.display())]
    Missing(#[error(not(source))] PathBuf),
    /// The merged sources could not be deserialized.
    #[display("invalid configuration")]
    Invalid,
    #[display("invalid codec in configuration: {_0}")]
    Codec(#[error(not(source))] String),
    /// Directory roots overlap or could not be resolved.
    #[display("invalid directory layout: {_0}")]
    Roots(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
