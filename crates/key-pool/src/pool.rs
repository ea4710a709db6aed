//! The key pool service object
//!
//! `KeyPool` bundles the credential store with a clock. Selection, accounting
//! and bootstrap live in their own modules as `impl KeyPool` blocks; every one
//! of those operations takes the accounting period explicitly.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::period::Period;
use crate::store::KeyStore;

/// Shared handle to the credential pool. Construct once, wrap in `Arc`.
pub struct KeyPool {
    pub(crate) store: Arc<dyn KeyStore>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl KeyPool {
    /// Pool over `store` using the given time source.
    pub fn new(store: Arc<dyn KeyStore>, clock: Arc<dyn Clock>) -> Self {
        info!("key pool initialized");
        Self { store, clock }
    }

    /// Pool over `store` on wall-clock time.
    pub fn with_system_clock(store: Arc<dyn KeyStore>) -> Self {
        Self::new(store, Arc::new(SystemClock))
    }

    /// The accounting period the clock is currently in.
    pub fn current_period(&self) -> Period {
        Period::containing(self.clock.now())
    }

    /// Current time according to the pool's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn KeyStore> {
        &self.store
    }
}
