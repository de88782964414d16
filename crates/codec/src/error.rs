//! Codec Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A codec error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Source bytes could not be decoded as an image. Don't retry with the same input.
    #[display("unreadable or unsupported source image")]
    Decode,
    /// The encoder rejected the image or its parameters.
    #[display("encoder failure")]
    Encoder,
    /// The requested codec is not known at all.
    #[display("unsupported codec: {_0}")]
    UnsupportedFormat(#[error(not(source))] String),
    /// The requested codec is known but cannot be produced by this build.
    #[display("disabled codec: {_0}")]
    DisabledFormat(#[error(not(source))] String),
    /// An I/O operation failed while writing encoded output.
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exn::ResultExt;

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::Decode.to_string(), "unreadable or unsupported source image");
        assert_eq!(ErrorKind::UnsupportedFormat("bmp".to_string()).to_string(), "unsupported codec: bmp");
        assert_eq!(ErrorKind::DisabledFormat("jxl".to_string()).to_string(), "disabled codec: jxl");
    }

    #[test]
    fn error_kind_retryable() {
        assert!(!ErrorKind::Decode.is_retryable());
        assert!(!ErrorKind::Encoder.is_retryable());
        assert!(ErrorKind::Io.is_retryable());
    }

    #[test]
    fn error_from_result() {
        let result: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::WriteZero, "disk full"));
        let err: Result<()> = result.or_raise(|| ErrorKind::Io);
        // Exn<E> implements Deref<Target = E>
        assert_eq!(*err.unwrap_err(), ErrorKind::Io);
    }
}
