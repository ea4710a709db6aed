//! Key selection: least-used key under quota wins
//!
//! Selection is a read-only view. Handing out a `SelectionResult` reserves
//! nothing; two callers may receive the same key at the same time.

use common::Secret;
use tracing::{debug, warn};

use crate::error::Result;
use crate::period::Period;
use crate::pool::KeyPool;

/// A candidate key handed to the removal client.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionResult {
    pub id: String,
    pub secret: Secret<String>,
    pub usage: u32,
}

/// Snapshot of the pool for one period: how many keys exist at all, and the
/// ones still under quota, least used first.
#[derive(Debug, Clone, Default)]
pub struct Census {
    pub total: usize,
    pub candidates: Vec<SelectionResult>,
}

impl Census {
    /// The best candidate whose id is not in `exclude`.
    pub fn first_excluding(&self, exclude: &[String]) -> Option<&SelectionResult> {
        self.candidates
            .iter()
            .find(|c| !exclude.iter().any(|id| id == &c.id))
    }
}

impl KeyPool {
    /// Read every record and rank the ones under quota for `period`.
    ///
    /// Ties keep store iteration order (the sort is stable).
    pub async fn census(&self, period: &Period) -> Result<Census> {
        let records = self.store.fetch_all().await?;
        let total = records.len();
        let mut candidates: Vec<SelectionResult> = records
            .into_iter()
            .filter(|r| r.has_capacity(period))
            .map(|r| SelectionResult {
                usage: r.usage_in(period),
                id: r.id,
                secret: r.secret,
            })
            .collect();
        candidates.sort_by_key(|c| c.usage);
        debug!(
            %period,
            total,
            available = candidates.len(),
            "key census"
        );
        Ok(Census { total, candidates })
    }

    /// Keys under quota for `period`, least used first.
    ///
    /// A store read failure is logged and reported as an empty list; callers
    /// treat it the same as every key being exhausted.
    pub async fn list_available(&self, period: &Period) -> Vec<SelectionResult> {
        match self.census(period).await {
            Ok(census) => census.candidates,
            Err(e) => {
                warn!(%period, error = %e, "key store read failed, reporting no available keys");
                Vec::new()
            }
        }
    }

    /// The least-used key under quota, if any.
    pub async fn pick_one(&self, period: &Period) -> Option<SelectionResult> {
        self.list_available(period).await.into_iter().next()
    }

    /// The least-used key under quota that is not in `exclude`.
    pub async fn pick_excluding(
        &self,
        period: &Period,
        exclude: &[String],
    ) -> Option<SelectionResult> {
        self.list_available(period)
            .await
            .into_iter()
            .find(|c| !exclude.iter().any(|id| id == &c.id))
    }
}
