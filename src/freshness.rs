//! Freshness decisions over cached entries.
//!
//! Two boundaries govern serving: the tier TTL (proactive freshness) and
//! the global max-stale floor (the absolute limit for emergency serving).
//! A fresh entry is always servable-stale, because every tier TTL is
//! required to sit at or below the max-stale floor.

use std::sync::Arc;
use std::time::Duration;

use crate::tiers::TierConfig;
use crate::types::CacheEntry;

/// Default upper bound past which a cached entry is too stale to serve.
pub const DEFAULT_MAX_STALE_AGE: Duration = Duration::from_secs(3600);

/// Pure freshness predicates parameterized by tier schedules and the
/// max-stale floor. All checks take `now_ms` explicitly so they stay
/// deterministic under test.
#[derive(Clone)]
pub struct FreshnessPolicy {
    tiers: Arc<TierConfig>,
    max_stale_age: Duration,
}

impl FreshnessPolicy {
    pub fn new(tiers: Arc<TierConfig>, max_stale_age: Duration) -> Self {
        Self {
            tiers,
            max_stale_age,
        }
    }

    pub fn max_stale_age(&self) -> Duration {
        self.max_stale_age
    }

    /// Entry age is within its tier TTL.
    pub fn is_fresh(&self, entry: &CacheEntry, now_ms: u64) -> bool {
        let ttl_ms = self.tiers.ttl(entry.tier).as_millis() as u64;
        entry.age_ms(now_ms) <= ttl_ms
    }

    /// Entry age is within the max-stale floor; orthogonal to tier TTL.
    pub fn is_servable_stale(&self, entry: &CacheEntry, now_ms: u64) -> bool {
        entry.age_ms(now_ms) <= self.max_stale_age.as_millis() as u64
    }

    pub fn is_too_stale(&self, entry: &CacheEntry, now_ms: u64) -> bool {
        !self.is_servable_stale(entry, now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiers::TierLabel;
    use serde_json::json;

    fn policy() -> FreshnessPolicy {
        FreshnessPolicy::new(Arc::new(TierConfig::default()), DEFAULT_MAX_STALE_AGE)
    }

    fn entry_at(tier: TierLabel, inserted_at_ms: u64) -> CacheEntry {
        CacheEntry {
            quote: json!({}),
            inserted_at_ms,
            tier,
        }
    }

    #[test]
    fn fresh_within_tier_ttl() {
        let policy = policy();
        let entry = entry_at(TierLabel::T1, 1_000_000);
        // T1 TTL is 10s
        assert!(policy.is_fresh(&entry, 1_000_000 + 9_999));
        assert!(policy.is_fresh(&entry, 1_000_000 + 10_000));
        assert!(!policy.is_fresh(&entry, 1_000_000 + 10_001));
    }

    #[test]
    fn freshness_is_monotonic_in_time() {
        // If fresh at t1, fresh at any t2 <= t1.
        let policy = policy();
        let entry = entry_at(TierLabel::T2, 500_000);
        let t1 = 500_000 + 55_000;
        assert!(policy.is_fresh(&entry, t1));
        for t2 in [500_000, 510_000, 540_000, t1] {
            assert!(policy.is_fresh(&entry, t2));
        }
    }

    #[test]
    fn fresh_implies_servable_stale() {
        // Every tier TTL <= max stale age, so freshness implies
        // servability for each tier at its TTL boundary.
        let policy = policy();
        let tiers = Arc::new(TierConfig::default());
        for label in TierLabel::ALL {
            assert!(tiers.ttl(label) <= policy.max_stale_age());
            let entry = entry_at(label, 0);
            let at_ttl = tiers.ttl(label).as_millis() as u64;
            assert!(policy.is_fresh(&entry, at_ttl));
            assert!(policy.is_servable_stale(&entry, at_ttl));
        }
    }

    #[test]
    fn too_stale_past_floor() {
        let policy = policy();
        let entry = entry_at(TierLabel::T1, 0);
        let floor_ms = DEFAULT_MAX_STALE_AGE.as_millis() as u64;
        assert!(policy.is_servable_stale(&entry, floor_ms));
        assert!(!policy.is_too_stale(&entry, floor_ms));
        assert!(policy.is_too_stale(&entry, floor_ms + 1));
    }

    #[test]
    fn clock_skew_counts_as_fresh() {
        // An entry stamped in the future has saturated age zero.
        let policy = policy();
        let entry = entry_at(TierLabel::T1, 2_000_000);
        assert!(policy.is_fresh(&entry, 1_000_000));
    }
}
