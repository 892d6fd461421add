//! Quote store contract.
//!
//! The store is an external fast KV keyed by fingerprint, holding
//! serialized cache entries with a TTL. It is volatile by design: the
//! relay carries `inserted_at_ms` inside each entry so freshness checks
//! never depend on store-side expiry (the store TTL is only an upper
//! bound on retention).

use async_trait::async_trait;
use std::time::Duration;

use crate::error::QuoteError;
use crate::types::CacheEntry;

mod memory;

pub use memory::MemoryQuoteStore;

/// Contract consumed by the caching core.
///
/// Both operations may fail transiently; callers treat read failures as
/// a miss and write failures as best-effort, never propagating them as
/// request errors. Writes are last-write-wins.
#[async_trait]
pub trait QuoteStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, QuoteError>;

    async fn set(&self, key: &str, entry: CacheEntry, ttl: Duration) -> Result<(), QuoteError>;
}
