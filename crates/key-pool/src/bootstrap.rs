//! Operator utilities: seeding the store and reading pool status

use common::Secret;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::period::Period;
use crate::pool::KeyPool;
use crate::record::{ApiKeyRecord, QUOTA};

/// Which seeded ids were new and which already existed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub created: Vec<String>,
    pub skipped: Vec<String>,
}

/// Best current candidate, as shown to an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum KeyStatus {
    Candidate { id: String, usage: u32, quota: u32 },
    NoneAvailable,
}

/// Deterministic id for the secret at `index` in a seed list.
pub fn seed_id(index: usize) -> String {
    format!("key_{}", index + 1)
}

impl KeyPool {
    /// Create `key_1..key_n` for `secrets`, skipping ids that already exist.
    ///
    /// Re-seeding the same list is a no-op. Blank secrets are skipped but keep
    /// their index, so later ids don't shift.
    pub async fn seed(&self, secrets: &[Secret<String>]) -> Result<SeedReport> {
        let now = self.clock.now();
        let mut report = SeedReport::default();

        for (index, secret) in secrets.iter().enumerate() {
            let id = seed_id(index);
            if secret.is_blank() {
                warn!(key_id = %id, "skipping blank secret in seed list");
                report.skipped.push(id);
                continue;
            }
            let record = ApiKeyRecord::new(id.clone(), secret.clone(), now);
            if self.store.create_if_absent(record).await? {
                report.created.push(id);
            } else {
                report.skipped.push(id);
            }
        }

        info!(
            created = report.created.len(),
            skipped = report.skipped.len(),
            "seeded key store"
        );
        Ok(report)
    }

    /// The key the selector would hand out next for `period`.
    pub async fn status(&self, period: &Period) -> KeyStatus {
        match self.pick_one(period).await {
            Some(candidate) => KeyStatus::Candidate {
                id: candidate.id,
                usage: candidate.usage,
                quota: QUOTA,
            },
            None => KeyStatus::NoneAvailable,
        }
    }

    /// Per-key usage summary for `period`. Never includes secrets.
    ///
    /// `status` is `healthy` when every key has capacity, `degraded` when some
    /// do, `unhealthy` when none do (including an empty store).
    pub async fn report(&self, period: &Period) -> Result<serde_json::Value> {
        let records = self.store.fetch_all().await?;
        let total = records.len();
        let mut available = 0usize;
        let mut keys = Vec::with_capacity(total);

        for record in &records {
            let usage = record.usage_in(period);
            let has_capacity = record.has_capacity(period);
            if has_capacity {
                available += 1;
            }
            keys.push(serde_json::json!({
                "id": record.id,
                "usage": usage,
                "available": has_capacity,
                "last_used": record.last_used_at,
                "exhausted_at": record.exhausted_at,
            }));
        }

        let status = if available == total && total > 0 {
            "healthy"
        } else if available > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        Ok(serde_json::json!({
            "status": status,
            "period": period.to_string(),
            "quota": QUOTA,
            "keys_total": total,
            "keys_available": available,
            "keys_exhausted": total - available,
            "keys": keys,
        }))
    }
}
