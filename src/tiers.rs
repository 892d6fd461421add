//! Freshness tiers and the pair-to-tier registry.
//!
//! A tier controls how long a cached quote counts as fresh and how often
//! the sweeper proactively refreshes the tier's members. Hotter tiers
//! refresh faster so they amortize upstream fetches over more reads.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::QuoteError;

/// Freshness class for a trading pair. `T1` is hottest; `T4` is the
/// default for unassigned pairs and is refreshed on demand only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TierLabel {
    T1,
    T2,
    T3,
    T4,
}

impl TierLabel {
    pub const ALL: [TierLabel; 4] = [TierLabel::T1, TierLabel::T2, TierLabel::T3, TierLabel::T4];
}

impl fmt::Display for TierLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierLabel::T1 => f.write_str("T1"),
            TierLabel::T2 => f.write_str("T2"),
            TierLabel::T3 => f.write_str("T3"),
            TierLabel::T4 => f.write_str("T4"),
        }
    }
}

impl FromStr for TierLabel {
    type Err = QuoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "T1" => Ok(TierLabel::T1),
            "T2" => Ok(TierLabel::T2),
            "T3" => Ok(TierLabel::T3),
            "T4" => Ok(TierLabel::T4),
            other => Err(QuoteError::BadRequest(format!("unknown tier: {}", other))),
        }
    }
}

/// Per-tier freshness schedule.
#[derive(Debug, Clone)]
pub struct TierSchedule {
    /// How long an entry in this tier counts as fresh.
    pub ttl: Duration,
    /// Sweeper cadence for this tier; `None` means on-demand only.
    pub refresh_period: Option<Duration>,
}

/// Freshness schedules for all tiers.
#[derive(Debug, Clone)]
pub struct TierConfig {
    t1: TierSchedule,
    t2: TierSchedule,
    t3: TierSchedule,
    t4: TierSchedule,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            t1: TierSchedule {
                ttl: Duration::from_secs(10),
                refresh_period: Some(Duration::from_secs(5)),
            },
            t2: TierSchedule {
                ttl: Duration::from_secs(60),
                refresh_period: Some(Duration::from_secs(30)),
            },
            t3: TierSchedule {
                ttl: Duration::from_secs(300),
                refresh_period: Some(Duration::from_secs(180)),
            },
            t4: TierSchedule {
                ttl: Duration::from_secs(600),
                refresh_period: None,
            },
        }
    }
}

impl TierConfig {
    pub fn schedule(&self, label: TierLabel) -> &TierSchedule {
        match label {
            TierLabel::T1 => &self.t1,
            TierLabel::T2 => &self.t2,
            TierLabel::T3 => &self.t3,
            TierLabel::T4 => &self.t4,
        }
    }

    pub fn ttl(&self, label: TierLabel) -> Duration {
        self.schedule(label).ttl
    }

    /// Tiers with a sweep cadence, hottest first.
    pub fn refreshable(&self) -> Vec<(TierLabel, Duration)> {
        TierLabel::ALL
            .iter()
            .filter_map(|&label| {
                self.schedule(label)
                    .refresh_period
                    .map(|period| (label, period))
            })
            .collect()
    }

    /// Largest tier TTL, used to validate the max-stale floor.
    pub fn max_ttl(&self) -> Duration {
        TierLabel::ALL
            .iter()
            .map(|&label| self.ttl(label))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Replace one tier's schedule, keeping the others.
    pub fn with_schedule(mut self, label: TierLabel, schedule: TierSchedule) -> Self {
        match label {
            TierLabel::T1 => self.t1 = schedule,
            TierLabel::T2 => self.t2 = schedule,
            TierLabel::T3 => self.t3 = schedule,
            TierLabel::T4 => self.t4 = schedule,
        }
        self
    }
}

/// Mapping from pair-key to tier, with `T4` for unassigned pairs.
///
/// A pair lives in at most one tier: assignment is a plain map insert,
/// so any prior membership is replaced atomically. Reads always see a
/// consistent label.
pub struct TierRegistry {
    assignments: RwLock<HashMap<String, TierLabel>>,
}

impl TierRegistry {
    pub fn new() -> Self {
        Self {
            assignments: RwLock::new(HashMap::new()),
        }
    }

    /// Assign a pair to a tier, replacing any previous assignment.
    /// Assigning to `T4` removes the pair from scheduled refresh.
    pub async fn assign(&self, pair_key: &str, tier: TierLabel) {
        let mut assignments = self.assignments.write().await;
        let previous = assignments.insert(pair_key.to_string(), tier);
        if previous != Some(tier) {
            info!(pair = %pair_key, tier = %tier, previous = ?previous, "Tier assignment updated");
        }
    }

    /// Remove an explicit assignment, returning the pair to the default
    /// tier.
    pub async fn unassign(&self, pair_key: &str) -> bool {
        self.assignments.write().await.remove(pair_key).is_some()
    }

    /// Tier for a pair; `T4` when unassigned.
    pub async fn tier_of(&self, pair_key: &str) -> TierLabel {
        self.assignments
            .read()
            .await
            .get(pair_key)
            .copied()
            .unwrap_or(TierLabel::T4)
    }

    /// Snapshot of the pairs currently assigned to a tier.
    pub async fn members_of(&self, tier: TierLabel) -> Vec<String> {
        self.assignments
            .read()
            .await
            .iter()
            .filter(|(_, &label)| label == tier)
            .map(|(pair, _)| pair.clone())
            .collect()
    }

    pub async fn assigned_count(&self) -> usize {
        self.assignments.read().await.len()
    }
}

impl Default for TierRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_matches_policy_table() {
        let config = TierConfig::default();
        assert_eq!(config.ttl(TierLabel::T1), Duration::from_secs(10));
        assert_eq!(config.ttl(TierLabel::T2), Duration::from_secs(60));
        assert_eq!(config.ttl(TierLabel::T3), Duration::from_secs(300));
        assert_eq!(config.ttl(TierLabel::T4), Duration::from_secs(600));

        let refreshable = config.refreshable();
        assert_eq!(refreshable.len(), 3);
        assert_eq!(refreshable[0], (TierLabel::T1, Duration::from_secs(5)));
        assert!(config.schedule(TierLabel::T4).refresh_period.is_none());
    }

    #[test]
    fn tier_label_parsing() {
        assert_eq!("t1".parse::<TierLabel>().unwrap(), TierLabel::T1);
        assert_eq!("T4".parse::<TierLabel>().unwrap(), TierLabel::T4);
        assert!("T9".parse::<TierLabel>().is_err());
    }

    #[tokio::test]
    async fn unassigned_pairs_default_to_t4() {
        let registry = TierRegistry::new();
        assert_eq!(registry.tier_of("ethereum:usdc:weth").await, TierLabel::T4);
    }

    #[tokio::test]
    async fn pair_is_in_at_most_one_tier() {
        let registry = TierRegistry::new();
        registry.assign("ethereum:usdc:weth", TierLabel::T1).await;
        registry.assign("ethereum:usdc:weth", TierLabel::T3).await;
        registry.assign("ethereum:dai:weth", TierLabel::T1).await;

        assert_eq!(registry.tier_of("ethereum:usdc:weth").await, TierLabel::T3);

        let mut seen = 0;
        for tier in TierLabel::ALL {
            let members = registry.members_of(tier).await;
            seen += members
                .iter()
                .filter(|p| p.as_str() == "ethereum:usdc:weth")
                .count();
        }
        assert_eq!(seen, 1);
        assert_eq!(registry.members_of(TierLabel::T1).await, vec!["ethereum:dai:weth"]);
    }

    #[tokio::test]
    async fn unassign_returns_pair_to_default() {
        let registry = TierRegistry::new();
        registry.assign("ethereum:usdc:weth", TierLabel::T2).await;
        assert!(registry.unassign("ethereum:usdc:weth").await);
        assert_eq!(registry.tier_of("ethereum:usdc:weth").await, TierLabel::T4);
        assert!(!registry.unassign("ethereum:usdc:weth").await);
    }
}
