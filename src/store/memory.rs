//! In-memory quote store backed by moka.
//!
//! Satisfies the store contract for single-process deployments and for
//! tests. A networked KV client slots in behind the same trait.

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use std::time::{Duration, Instant};
use tracing::info;

use super::QuoteStore;
use crate::error::QuoteError;
use crate::types::CacheEntry;

#[derive(Clone)]
struct StoredEntry {
    entry: CacheEntry,
    ttl: Duration,
}

/// Per-entry expiry: each write carries its own TTL.
struct EntryTtl;

impl Expiry<String, StoredEntry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Moka-backed quote store with per-entry TTL and LRU eviction.
pub struct MemoryQuoteStore {
    cache: Cache<String, StoredEntry>,
}

impl MemoryQuoteStore {
    pub fn new(max_entries: u64) -> Self {
        info!(max_entries, "Initializing in-memory quote store");
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(EntryTtl)
            .build();
        Self { cache }
    }

    /// Run pending cache maintenance so entry counts are observable.
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl QuoteStore for MemoryQuoteStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, QuoteError> {
        Ok(self.cache.get(key).await.map(|stored| stored.entry))
    }

    async fn set(&self, key: &str, entry: CacheEntry, ttl: Duration) -> Result<(), QuoteError> {
        self.cache
            .insert(key.to_string(), StoredEntry { entry, ttl })
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiers::TierLabel;
    use serde_json::json;

    fn entry(tag: &str) -> CacheEntry {
        CacheEntry::new(json!({ "tag": tag }), TierLabel::T1)
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = MemoryQuoteStore::new(100);
        store
            .set("price:ethereum:usdc:weth:1000:exactin", entry("a"), Duration::from_secs(60))
            .await
            .unwrap();

        let got = store
            .get("price:ethereum:usdc:weth:1000:exactin")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.quote["tag"], json!("a"));
        assert_eq!(got.tier, TierLabel::T1);
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let store = MemoryQuoteStore::new(100);
        assert!(store.get("price:nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn last_write_wins() {
        let store = MemoryQuoteStore::new(100);
        store
            .set("k", entry("first"), Duration::from_secs(60))
            .await
            .unwrap();
        store
            .set("k", entry("second"), Duration::from_secs(60))
            .await
            .unwrap();
        let got = store.get("k").await.unwrap().unwrap();
        assert_eq!(got.quote["tag"], json!("second"));
    }

    #[tokio::test]
    async fn entries_expire_at_their_own_ttl() {
        let store = MemoryQuoteStore::new(100);
        store
            .set("short", entry("short"), Duration::from_millis(50))
            .await
            .unwrap();
        store
            .set("long", entry("long"), Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(store.get("short").await.unwrap().is_none());
        assert!(store.get("long").await.unwrap().is_some());
    }
}
