//! Access Error Types

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The secret table could not be fetched.
    #[display("could not read secret table: {_0}")]
    Source(std::io::Error),
    /// The secret table was fetched but is not a `{"prefix": "secret"}` object.
    #[display("invalid secret table: {_0}")]
    InvalidTable(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Source(_))
    }
}
