//! Credential store: durable keyed storage for `ApiKeyRecord`
//!
//! `KeyStore` is the seam between the pool and wherever the records live. The
//! bundled `FileKeyStore` keeps a JSON file mapping id → record; it is loaded
//! once and every mutation is persisted with an atomic temp-file + rename
//! before the call returns. A tokio Mutex serializes writers, which is what
//! makes `increment_usage` a store-side atomic increment.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::period::Period;
use crate::record::{ApiKeyRecord, RecordPatch};

/// Boxed future returned by `KeyStore` methods (keeps the trait dyn-compatible).
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Durable storage for API key records, addressable by id.
///
/// Only the pool's accountant and bootstrap paths write through this trait.
pub trait KeyStore: Send + Sync {
    /// Every record, in the store's iteration order.
    fn fetch_all(&self) -> StoreFuture<'_, Vec<ApiKeyRecord>>;

    /// One record by id.
    fn fetch_one<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<ApiKeyRecord>>;

    /// Merge `patch` into an existing record. Unknown ids are `NotFound`.
    fn upsert_merge<'a>(&'a self, id: &'a str, patch: RecordPatch) -> StoreFuture<'a, ()>;

    /// Insert `record` unless its id already exists. Returns whether it was created.
    fn create_if_absent(&self, record: ApiKeyRecord) -> StoreFuture<'_, bool>;

    /// Atomically add one to the `period` counter and stamp `lastUsed`.
    /// Returns the new count.
    fn increment_usage<'a>(
        &'a self,
        id: &'a str,
        period: Period,
        at: DateTime<Utc>,
    ) -> StoreFuture<'a, u32>;
}

/// JSON-file backed key store.
///
/// Records iterate in id order. A failed write leaves both the file and the
/// in-memory state as they were.
pub struct FileKeyStore {
    path: PathBuf,
    state: Mutex<BTreeMap<String, ApiKeyRecord>>,
}

impl FileKeyStore {
    /// Load records from `path`, creating an empty store file if missing.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state: BTreeMap<String, ApiKeyRecord> = common::fs::load_or_init(&path).await?;
        info!(path = %path.display(), keys = state.len(), "loaded key store");
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Apply `mutate` to a copy of the state, persist it, then commit.
    async fn commit<T>(
        &self,
        mutate: impl FnOnce(&mut BTreeMap<String, ApiKeyRecord>) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let out = mutate(&mut next)?;
        common::fs::write_atomic(&self.path, &next).await?;
        *state = next;
        Ok(out)
    }
}

impl KeyStore for FileKeyStore {
    fn fetch_all(&self) -> StoreFuture<'_, Vec<ApiKeyRecord>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.values().cloned().collect())
        })
    }

    fn fetch_one<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<ApiKeyRecord>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.get(id).cloned())
        })
    }

    fn upsert_merge<'a>(&'a self, id: &'a str, patch: RecordPatch) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.commit(|records| {
                let record = records
                    .get_mut(id)
                    .ok_or_else(|| Error::NotFound(id.to_string()))?;
                record.apply(&patch);
                Ok(())
            })
            .await?;
            debug!(key_id = id, "merged key record");
            Ok(())
        })
    }

    fn create_if_absent(&self, record: ApiKeyRecord) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            {
                let state = self.state.lock().await;
                if state.contains_key(&record.id) {
                    return Ok(false);
                }
            }
            let id = record.id.clone();
            let created = self
                .commit(|records| {
                    if records.contains_key(&record.id) {
                        return Ok(false);
                    }
                    records.insert(record.id.clone(), record);
                    Ok(true)
                })
                .await?;
            if created {
                debug!(key_id = %id, "created key record");
            }
            Ok(created)
        })
    }

    fn increment_usage<'a>(
        &'a self,
        id: &'a str,
        period: Period,
        at: DateTime<Utc>,
    ) -> StoreFuture<'a, u32> {
        Box::pin(async move {
            self.commit(|records| {
                let record = records
                    .get_mut(id)
                    .ok_or_else(|| Error::NotFound(id.to_string()))?;
                let count = record.usage.entry(period).or_insert(0);
                *count += 1;
                record.last_used_at = Some(at);
                Ok(*count)
            })
            .await
        })
    }
}
