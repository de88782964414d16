//! Request-level errors.
//!
//! Library errors are folded into a handful of kinds that map one-to-one onto
//! HTTP status codes. The full `exn` tree is kept for logging.

use axum::http::StatusCode;
use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request path contains `//` or `..`, or is otherwise unusable.
    #[display("malformed request path")]
    Malformed,
    #[display("invalid credentials")]
    Forbidden,
    #[display("not found")]
    NotFound,
    /// Archive requested for a directory with nothing in it.
    #[display("directory is empty")]
    EmptyDirectory,
    #[display("internal server error")]
    Internal,
    /// Something went wrong before the server started listening.
    #[display("could not start server")]
    Startup,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            Self::Malformed | Self::EmptyDirectory => StatusCode::BAD_REQUEST,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal | Self::Startup => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
