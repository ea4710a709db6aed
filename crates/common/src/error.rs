//! Common error types

use thiserror::Error;

/// Errors shared by configuration loading and file-backed stores
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid path: {0}")]
    Path(String),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;
