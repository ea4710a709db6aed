//! Usage accounting
//!
//! Both operations are best-effort: a failed write is logged and reported as
//! `false`, never raised, so accounting can't undo an image the provider
//! already returned.

use tracing::{info, warn};

use crate::period::Period;
use crate::pool::KeyPool;
use crate::record::{EXHAUSTED_SENTINEL, QUOTA, RecordPatch};

impl KeyPool {
    /// Count one successful provider call against `id` in `period`.
    ///
    /// The increment runs inside the store, so concurrent callers never lose
    /// an update. It does not stop two callers pushing a key past `QUOTA`.
    pub async fn record_success(&self, id: &str, period: &Period) -> bool {
        let now = self.clock.now();
        match self.store.increment_usage(id, *period, now).await {
            Ok(usage) => {
                metrics::counter!("key_usage_recorded_total").increment(1);
                if usage >= QUOTA {
                    info!(key_id = id, %period, usage, quota = QUOTA, "key reached quota");
                } else {
                    info!(key_id = id, %period, usage, "recorded key usage");
                }
                true
            }
            Err(e) => {
                warn!(key_id = id, %period, error = %e, "failed to record key usage");
                false
            }
        }
    }

    /// Mark `id` exhausted for `period` after the provider refused it for credits.
    ///
    /// Writes `EXHAUSTED_SENTINEL` (never lowering a higher count) and stamps
    /// `exhaustedAt`/`lastUsed`. Repeating the call rewrites the same state.
    pub async fn force_exhaust(&self, id: &str, period: &Period) -> bool {
        let now = self.clock.now();
        match self
            .store
            .upsert_merge(id, RecordPatch::exhausted(*period, now))
            .await
        {
            Ok(()) => {
                metrics::counter!("key_force_exhausted_total").increment(1);
                warn!(
                    key_id = id,
                    %period,
                    sentinel = EXHAUSTED_SENTINEL,
                    "provider reported key out of credits, marked exhausted"
                );
                true
            }
            Err(e) => {
                warn!(key_id = id, %period, error = %e, "failed to mark key exhausted");
                false
            }
        }
    }
}
