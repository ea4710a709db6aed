//! Rotating API-key pool for the background-removal provider
//!
//! A process-wide set of provider credentials, each with a hard monthly quota.
//! The pool is an explicit service object built once per process and shared by
//! `Arc`; the `KeyStore` behind it is the single source of truth.
//!
//! Key lifecycle:
//! 1. Operator seeds secrets → records `key_1..key_n` created if absent
//! 2. Selector ranks keys under `QUOTA` for the period, least used first
//! 3. Provider accepts a call → store-side atomic increment of the period counter
//! 4. Provider reports the key out of credits → counter forced to `EXHAUSTED_SENTINEL`
//! 5. Next calendar month → fresh period key, every key is a candidate again
//!
//! Selection and accounting are separate round trips. Two concurrent callers can
//! both pick the same least-used key, so a key can overshoot `QUOTA` by the number
//! of racing callers. The atomic increment guarantees no increment is lost; it
//! does not reserve capacity.

pub mod accountant;
pub mod bootstrap;
pub mod clock;
pub mod error;
pub mod period;
pub mod pool;
pub mod record;
pub mod selector;
pub mod store;

pub use bootstrap::{KeyStatus, SeedReport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use period::Period;
pub use pool::KeyPool;
pub use record::{ApiKeyRecord, EXHAUSTED_SENTINEL, QUOTA, RecordPatch};
pub use selector::{Census, SelectionResult};
pub use store::{FileKeyStore, KeyStore, StoreFuture};
