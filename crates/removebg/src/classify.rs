//! Provider error classification
//!
//! Only a credits/quota rejection penalizes a key. Invalid keys are skipped for
//! the request, bad images fail fast, and everything else is retried.

/// What a failed provider call means for the key that made it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    /// Network error, timeout, 5xx, rate limit: retry the same key, then move on
    Transient,
    /// Key is out of credits for the month: force it exhausted, try the next key
    QuotaExceeded,
    /// Key rejected outright (revoked or mistyped): skip it, don't account
    InvalidKey,
    /// Provider refused the image itself: other keys won't help
    BadImage,
}

impl ErrorClassification {
    /// Metric/log label.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorClassification::Transient => "transient",
            ErrorClassification::QuotaExceeded => "quota_exceeded",
            ErrorClassification::InvalidKey => "invalid_key",
            ErrorClassification::BadImage => "bad_image",
        }
    }
}

/// Body phrases that mark a 403/429 as an out-of-credits condition.
const CREDIT_PATTERNS: &[&str] = &[
    "insufficient credits",
    "insufficient_credits",
    "not enough credits",
    "credits",
    "quota",
    "payment required",
    "limit reached",
    "monthly limit",
];

/// Whether a response body describes the key running out of credits.
pub fn mentions_credits(body: &str) -> bool {
    let lower = body.to_lowercase();
    CREDIT_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Classify a non-2xx provider response by status and body.
pub fn classify_status(status: u16, body: &str) -> ErrorClassification {
    match status {
        402 => ErrorClassification::QuotaExceeded,
        403 | 429 if mentions_credits(body) => ErrorClassification::QuotaExceeded,
        401 | 403 => ErrorClassification::InvalidKey,
        400 | 413 | 415 | 422 => ErrorClassification::BadImage,
        _ => ErrorClassification::Transient,
    }
}
