//! Error types for image payload handling

/// Errors decoding or validating image payloads.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid data URL: {0}")]
    InvalidDataUrl(String),

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("empty image payload")]
    EmptyImage,
}

/// Result alias for image payload handling.
pub type Result<T> = std::result::Result<T, Error>;
