//! Common types shared by the leave-consent workspace
//!
//! Secrets (provider API keys) are wrapped so they never reach logs, and every
//! file-backed store persists through the same atomic write helper.

mod error;
pub mod fs;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
