//! Background removal with rotating, quota-tracked provider keys
//!
//! `RemovalClient` owns the per-request retry loop:
//! 1. Ask the key pool for the least-used key not yet tried in this request
//! 2. POST the image to the provider with that key
//! 3. 2xx → count the call against the key, return the processed image
//! 4. Out-of-credits rejection → force the key exhausted, try the next key
//! 5. Transient failure → retry the same key a bounded number of times, then move on
//! 6. No key left (or none configured) → tagged failure, caller keeps the original image
//!
//! The loop itself is the pure state machine in `machine`; the client only
//! performs the I/O each transition asks for.

pub mod classify;
pub mod client;
pub mod error;
pub mod image;
pub mod machine;

pub use classify::{ErrorClassification, classify_status};
pub use client::{
    ProcessedImage, REMOVE_BG_ENDPOINT, RemovalClient, RemovalConfig, RemovalOutcome,
};
pub use error::{Error, Result};
pub use image::{DataUrl, parse_data_url, sniff_mime, to_data_url};
pub use machine::{FailureReason, RemovalAction, RemovalEvent, RemovalPolicy, RemovalState};
