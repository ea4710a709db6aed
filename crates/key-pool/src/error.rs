//! Error types for key pool operations

/// Errors from the credential store and pool administration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("credential store error: {0}")]
    Store(String),

    #[error("invalid period: {0}")]
    InvalidPeriod(String),
}

impl From<common::Error> for Error {
    fn from(err: common::Error) -> Self {
        Error::Store(err.to_string())
    }
}

/// Result alias for key pool operations.
pub type Result<T> = std::result::Result<T, Error>;
