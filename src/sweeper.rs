//! Periodic tier sweeper.
//!
//! One recurring timer per refreshable tier, firing at the tier's
//! refresh period. Each tick snapshots the tier's members and enqueues
//! Background refreshes at the standard amount. Ticks are independent;
//! enqueues dropped under saturation are retried on the next tick.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::engine::Engine;

/// Spawn one sweep task per refreshable tier (`T1`–`T3` by default).
pub fn spawn_sweepers(engine: Arc<Engine>) -> Vec<JoinHandle<()>> {
    let schedules = engine.tiers().refreshable();
    info!(tiers = schedules.len(), "Starting tier sweepers");

    schedules
        .into_iter()
        .map(|(tier, period)| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let cancel = engine.cancel_token();
                let mut ticker = interval(period);
                // A slow tick must not stack up catch-up ticks behind it.
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                // The first tick fires immediately; skip it so sweeps
                // start one period after startup, once warmup has run.
                ticker.tick().await;

                debug!(tier = %tier, period_secs = period.as_secs(), "Tier sweeper started");
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!(tier = %tier, "Tier sweeper stopping");
                            break;
                        }
                        _ = ticker.tick() => {
                            engine.sweep_tier(tier).await;
                        }
                    }
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;
    use crate::engine::EngineConfig;
    use crate::store::MemoryQuoteStore;
    use crate::tiers::{TierConfig, TierLabel, TierSchedule};
    use crate::types::{PairKey, Quote, TradeDirection};
    use crate::upstream::QuoteSource;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct OkSource;

    #[async_trait]
    impl QuoteSource for OkSource {
        async fn fetch_quote(
            &self,
            _chain: &str,
            _token_in: &str,
            _token_out: &str,
            _amount: &str,
            _direction: TradeDirection,
        ) -> anyhow::Result<Quote> {
            Ok(json!({ "amountOut": "1" }))
        }
    }

    fn fast_t1(period: Duration) -> TierConfig {
        TierConfig::default().with_schedule(
            TierLabel::T1,
            TierSchedule {
                ttl: period,
                refresh_period: Some(period),
            },
        )
    }

    #[tokio::test]
    async fn sweeper_enqueues_tier_members() {
        let tiers = fast_t1(Duration::from_millis(50));
        let engine = Engine::new(
            EngineConfig::default(),
            tiers,
            BreakerConfig::default(),
            Arc::new(MemoryQuoteStore::new(16)),
            Arc::new(OkSource),
        )
        .unwrap();

        let pair = PairKey::new("ethereum", "usdc", "weth").unwrap();
        engine.assign_tier(&pair, TierLabel::T1).await;

        // No workers running, so swept jobs stay queued.
        let handles = spawn_sweepers(engine.clone());
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(
            !engine.queue().is_empty().await,
            "sweeper should have enqueued a refresh for the T1 member"
        );
        let job = engine.queue().try_dequeue().await.unwrap();
        assert_eq!(job.pair, pair);
        assert_eq!(job.amount, "1000");

        engine.cancel_token().cancel();
        for handle in handles {
            let _ = handle.await;
        }
    }

    #[tokio::test]
    async fn sweeper_ignores_empty_tiers() {
        let tiers = fast_t1(Duration::from_millis(50));
        let engine = Engine::new(
            EngineConfig::default(),
            tiers,
            BreakerConfig::default(),
            Arc::new(MemoryQuoteStore::new(16)),
            Arc::new(OkSource),
        )
        .unwrap();

        let handles = spawn_sweepers(engine.clone());
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(engine.queue().is_empty().await);

        engine.cancel_token().cancel();
        for handle in handles {
            let _ = handle.await;
        }
    }
}
