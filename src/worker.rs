//! Refresh worker pool.
//!
//! A fixed number of workers drain the refresh queue independently of
//! request-path load; a worker blocked on a slow upstream call never
//! prevents the others from making progress. Workers stop at the
//! engine's cancellation token but let in-flight jobs run to
//! completion.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::Engine;

/// Spawn the refresh worker pool. Returns one handle per worker for the
/// shutdown coordinator.
pub fn spawn_workers(engine: Arc<Engine>) -> Vec<JoinHandle<()>> {
    let count = engine.config().worker_count.max(1);
    info!(workers = count, "Starting refresh worker pool");

    (0..count)
        .map(|worker_id| {
            let engine = engine.clone();
            tokio::spawn(async move {
                run_worker(engine, worker_id).await;
            })
        })
        .collect()
}

async fn run_worker(engine: Arc<Engine>, worker_id: usize) {
    let cancel = engine.cancel_token();
    debug!(worker_id, "Refresh worker started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(worker_id, "Refresh worker stopping");
                break;
            }
            job = engine.queue().dequeue() => {
                engine.process_refresh_job(job).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;
    use crate::engine::EngineConfig;
    use crate::queue::{JobPriority, RefreshJob};
    use crate::store::{MemoryQuoteStore, QuoteStore};
    use crate::tiers::TierConfig;
    use crate::types::{PairKey, Quote, TradeDirection};
    use crate::upstream::QuoteSource;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct CountingSource {
        calls: AtomicU32,
    }

    #[async_trait]
    impl QuoteSource for CountingSource {
        async fn fetch_quote(
            &self,
            _chain: &str,
            token_in: &str,
            _token_out: &str,
            _amount: &str,
            _direction: TradeDirection,
        ) -> anyhow::Result<Quote> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "tokenIn": token_in, "amountOut": "123" }))
        }
    }

    #[tokio::test]
    async fn workers_drain_jobs_and_write_store() {
        let store = Arc::new(MemoryQuoteStore::new(100));
        let source = Arc::new(CountingSource {
            calls: AtomicU32::new(0),
        });
        let engine = Engine::new(
            EngineConfig {
                worker_count: 2,
                ..Default::default()
            },
            TierConfig::default(),
            BreakerConfig::default(),
            store.clone(),
            source.clone(),
        )
        .unwrap();

        let handles = spawn_workers(engine.clone());

        let job = RefreshJob::new(
            PairKey::new("ethereum", "usdc", "weth").unwrap(),
            "1000".to_string(),
            TradeDirection::ExactIn,
            JobPriority::Background,
            3,
        );
        let key = job.fingerprint();
        engine.queue().enqueue(job).await.unwrap();

        // Give the pool a moment to pick the job up.
        for _ in 0..50 {
            if store.get(&key).await.unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let entry = store.get(&key).await.unwrap().expect("job should write store");
        assert_eq!(entry.quote["amountOut"], json!("123"));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.metrics().snapshot().jobs.completed, 1);

        engine.cancel_token().cancel();
        for handle in handles {
            let _ = handle.await;
        }
    }
}
