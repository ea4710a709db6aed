//! Stored credential records
//!
//! Wire shape per key:
//! `{id, apiKey, usage: {"YYYY-MM": n}, createdAt, lastUsed, exhaustedAt?}`

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::Secret;
use serde::{Deserialize, Serialize};

use crate::period::Period;

/// Successful calls allowed per key per period. Kept below the provider's
/// real monthly allowance to absorb miscounts and racing callers.
pub const QUOTA: u32 = 45;

/// Counter value written when the provider itself reports a key out of credits.
pub const EXHAUSTED_SENTINEL: u32 = 50;

/// One provider credential and its usage history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiKeyRecord {
    pub id: String,
    #[serde(rename = "apiKey")]
    pub secret: Secret<String>,
    #[serde(default)]
    pub usage: BTreeMap<Period, u32>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "lastUsed", default)]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(
        rename = "exhaustedAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub exhausted_at: Option<DateTime<Utc>>,
}

impl ApiKeyRecord {
    /// A fresh record with no usage.
    pub fn new(id: impl Into<String>, secret: Secret<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            secret,
            usage: BTreeMap::new(),
            created_at,
            last_used_at: None,
            exhausted_at: None,
        }
    }

    /// Calls accounted against this key in `period` (0 if none).
    pub fn usage_in(&self, period: &Period) -> u32 {
        self.usage.get(period).copied().unwrap_or(0)
    }

    /// Whether the key may still be selected in `period`.
    ///
    /// A forced exhaustion is expressed through the counter, so this is purely
    /// a quota check; `exhausted_at` is informational.
    pub fn has_capacity(&self, period: &Period) -> bool {
        self.usage_in(period) < QUOTA
    }

    /// Overlay a patch. Usage entries only ever move up.
    pub fn apply(&mut self, patch: &RecordPatch) {
        for (period, value) in &patch.usage {
            let slot = self.usage.entry(*period).or_insert(0);
            *slot = (*slot).max(*value);
        }
        if let Some(at) = patch.last_used_at {
            self.last_used_at = Some(at);
        }
        if let Some(at) = patch.exhausted_at {
            self.exhausted_at = Some(at);
        }
    }
}

/// Partial update merged into an existing record; absent fields are untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub usage: BTreeMap<Period, u32>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub exhausted_at: Option<DateTime<Utc>>,
}

impl RecordPatch {
    /// Patch that marks a key exhausted for `period` at `at`.
    pub fn exhausted(period: Period, at: DateTime<Utc>) -> Self {
        let mut usage = BTreeMap::new();
        usage.insert(period, EXHAUSTED_SENTINEL);
        Self {
            usage,
            last_used_at: Some(at),
            exhausted_at: Some(at),
        }
    }
}
