//! Per-request removal state machine
//!
//! Pure: receives events, returns (new_state, action). `RemovalClient` runs
//! the I/O each action implies and feeds the result back as the next event.

use std::time::Duration;

use key_pool::SelectionResult;

use crate::classify::ErrorClassification;

/// Why a removal request ended without a processed image.
///
/// Every variant is a fallback for the caller: the form proceeds with the
/// unprocessed signature.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    #[error("no background-removal keys are configured")]
    NoCredentials,

    #[error("every background-removal key has used its monthly quota")]
    QuotaExhausted,

    #[error("key store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("provider rejected the image (HTTP {status}): {detail}")]
    ImageRejected { status: u16, detail: String },

    #[error("provider unavailable after {attempts} attempts: {last_error}")]
    ProviderUnavailable { attempts: u32, last_error: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl FailureReason {
    /// Stable machine-readable code for API responses and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::NoCredentials => "no_credentials",
            FailureReason::QuotaExhausted => "quota_exhausted",
            FailureReason::StoreUnavailable(_) => "store_unavailable",
            FailureReason::ImageRejected { .. } => "image_rejected",
            FailureReason::ProviderUnavailable { .. } => "provider_unavailable",
            FailureReason::Internal(_) => "internal",
        }
    }

    /// Whether an operator has to act (seed keys, fix the store) before
    /// removal can work again.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            FailureReason::NoCredentials | FailureReason::StoreUnavailable(_)
        )
    }
}

/// Most recent reason a key was given up on in this request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastError {
    /// The provider said the key is out of credits
    Quota,
    /// Anything else (transient, invalid key)
    Provider(String),
}

/// Request states.
#[derive(Debug, Clone, PartialEq)]
pub enum RemovalState {
    /// Waiting for the pool to hand out the next untried key
    Selecting {
        tried: Vec<String>,
        attempts: u32,
        last_error: Option<LastError>,
    },
    /// Provider call in flight with `key`
    Calling {
        key: SelectionResult,
        tried: Vec<String>,
        attempts: u32,
        retries: u32,
        last_error: Option<LastError>,
    },
    /// Terminal: processed image delivered
    Done { key_id: String, attempts: u32 },
    /// Terminal: fall back to the original image
    Failed(FailureReason),
}

impl RemovalState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RemovalState::Done { .. } | RemovalState::Failed(_))
    }
}

/// Results of the I/O the client performed for the previous action.
#[derive(Debug, Clone, PartialEq)]
pub enum RemovalEvent {
    /// Pool census read: `total` keys exist, `candidate` is the best untried one
    Selected {
        total: usize,
        candidate: Option<SelectionResult>,
    },
    /// Pool census could not be read
    StoreFailed(String),
    /// Provider returned a usable image
    Delivered,
    /// Provider call failed
    CallFailed {
        classification: ErrorClassification,
        status: Option<u16>,
        detail: String,
    },
}

/// I/O the client should perform next.
#[derive(Debug, Clone, PartialEq)]
pub enum RemovalAction {
    /// Read the pool and pick the best key not in `exclude`
    Select { exclude: Vec<String> },
    /// Call the provider with `key`
    Call { key: SelectionResult },
    /// Wait `delay`, then call the provider with `key` again
    Retry { key: SelectionResult, delay: Duration },
    /// Mark `key_id` exhausted, then select excluding `exclude`
    Exhaust { key_id: String, exclude: Vec<String> },
    /// Stop; the state holds the outcome
    Finish,
}

/// Limits for one removal request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalPolicy {
    /// Distinct keys tried before giving up
    pub max_keys: usize,
    /// Extra calls with the same key after a transient failure
    pub transient_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for RemovalPolicy {
    fn default() -> Self {
        Self {
            max_keys: 5,
            transient_retries: 1,
            retry_backoff: Duration::from_millis(250),
        }
    }
}

impl RemovalPolicy {
    /// Initial state and action for a new request.
    pub fn begin(&self) -> (RemovalState, RemovalAction) {
        (
            RemovalState::Selecting {
                tried: Vec::new(),
                attempts: 0,
                last_error: None,
            },
            RemovalAction::Select {
                exclude: Vec::new(),
            },
        )
    }

    /// Handle a state transition. Pure function: no I/O.
    pub fn handle_event(
        &self,
        state: RemovalState,
        event: RemovalEvent,
    ) -> (RemovalState, RemovalAction) {
        match (state, event) {
            // --- Selecting ---
            (RemovalState::Selecting { .. }, RemovalEvent::Selected { total: 0, .. }) => {
                fail(FailureReason::NoCredentials)
            }

            (
                RemovalState::Selecting {
                    tried,
                    attempts,
                    last_error,
                },
                RemovalEvent::Selected {
                    candidate: Some(key),
                    ..
                },
            ) if tried.len() < self.max_keys => {
                let mut tried = tried;
                tried.push(key.id.clone());
                (
                    RemovalState::Calling {
                        key: key.clone(),
                        tried,
                        attempts: attempts + 1,
                        retries: 0,
                        last_error,
                    },
                    RemovalAction::Call { key },
                )
            }

            // No untried key left, or the per-request cap is reached
            (
                RemovalState::Selecting {
                    attempts,
                    last_error,
                    ..
                },
                RemovalEvent::Selected { .. },
            ) => match last_error {
                None | Some(LastError::Quota) => fail(FailureReason::QuotaExhausted),
                Some(LastError::Provider(last_error)) => {
                    fail(FailureReason::ProviderUnavailable {
                        attempts,
                        last_error,
                    })
                }
            },

            (RemovalState::Selecting { .. }, RemovalEvent::StoreFailed(e)) => {
                fail(FailureReason::StoreUnavailable(e))
            }

            // --- Calling ---
            (RemovalState::Calling { key, attempts, .. }, RemovalEvent::Delivered) => (
                RemovalState::Done {
                    key_id: key.id,
                    attempts,
                },
                RemovalAction::Finish,
            ),

            (
                RemovalState::Calling {
                    key,
                    tried,
                    attempts,
                    ..
                },
                RemovalEvent::CallFailed {
                    classification: ErrorClassification::QuotaExceeded,
                    ..
                },
            ) => (
                RemovalState::Selecting {
                    tried: tried.clone(),
                    attempts,
                    last_error: Some(LastError::Quota),
                },
                RemovalAction::Exhaust {
                    key_id: key.id,
                    exclude: tried,
                },
            ),

            (
                RemovalState::Calling { .. },
                RemovalEvent::CallFailed {
                    classification: ErrorClassification::BadImage,
                    status,
                    detail,
                },
            ) => fail(FailureReason::ImageRejected {
                status: status.unwrap_or(400),
                detail,
            }),

            (
                RemovalState::Calling {
                    key,
                    tried,
                    attempts,
                    retries,
                    last_error,
                },
                RemovalEvent::CallFailed {
                    classification: ErrorClassification::Transient,
                    ..
                },
            ) if retries < self.transient_retries => (
                RemovalState::Calling {
                    key: key.clone(),
                    tried,
                    attempts: attempts + 1,
                    retries: retries + 1,
                    last_error,
                },
                RemovalAction::Retry {
                    key,
                    delay: self.retry_backoff,
                },
            ),

            // Transient retries used up, or the key itself was rejected
            (
                RemovalState::Calling {
                    tried, attempts, ..
                },
                RemovalEvent::CallFailed { detail, .. },
            ) => (
                RemovalState::Selecting {
                    tried: tried.clone(),
                    attempts,
                    last_error: Some(LastError::Provider(detail)),
                },
                RemovalAction::Select { exclude: tried },
            ),

            // --- Catch-all: invalid transitions ---
            (state, event) => fail(FailureReason::Internal(format!(
                "unexpected {event:?} in {}",
                state_name(&state)
            ))),
        }
    }
}

fn fail(reason: FailureReason) -> (RemovalState, RemovalAction) {
    (RemovalState::Failed(reason), RemovalAction::Finish)
}

fn state_name(state: &RemovalState) -> &'static str {
    match state {
        RemovalState::Selecting { .. } => "selecting",
        RemovalState::Calling { .. } => "calling",
        RemovalState::Done { .. } => "done",
        RemovalState::Failed(_) => "failed",
    }
}
