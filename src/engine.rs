//! Composition root for the quote relay.
//!
//! A single [`Engine`] value owns the quote store, upstream source, tier
//! registry, refresh queue, circuit breaker, and metrics; it is built at
//! startup and passed explicitly. The read path implements
//! lookup → freshness decision → (serve | serve + background refresh |
//! fetch-now | error-with-fallback), with single-flight coalescing on
//! the synchronous fetch so concurrent cold readers share one upstream
//! call.

use anyhow::{bail, Result};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::error::QuoteError;
use crate::freshness::{FreshnessPolicy, DEFAULT_MAX_STALE_AGE};
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::queue::{EnqueueOutcome, JobPriority, RefreshJob, RefreshQueue};
use crate::store::QuoteStore;
use crate::tiers::{TierConfig, TierLabel, TierRegistry};
use crate::types::{
    now_millis, CacheEntry, PairKey, Quote, QuoteRequest, ServedQuote, TradeDirection,
    STANDARD_REFRESH_AMOUNT,
};
use crate::upstream::QuoteSource;

/// Pair pre-assigned to a tier and refreshed eagerly at startup.
#[derive(Debug, Clone)]
pub struct WarmupPair {
    pub chain: String,
    pub token_in: String,
    pub token_out: String,
    pub tier: TierLabel,
}

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Refresh worker concurrency.
    pub worker_count: usize,
    /// Refresh queue capacity across all bands.
    pub queue_capacity: usize,
    /// Attempts per refresh job, including the first.
    pub max_attempts: u32,
    /// Base delay for job retry backoff.
    pub retry_base_delay: Duration,
    /// Cap on job retry backoff.
    pub retry_max_delay: Duration,
    /// Absolute floor past which cached entries are unservable. Also
    /// used as the store-side TTL upper bound.
    pub max_stale_age: Duration,
    /// Pairs warmed at startup.
    pub warmup: Vec<WarmupPair>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 10,
            queue_capacity: 1000,
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(2),
            retry_max_delay: Duration::from_secs(60),
            max_stale_age: DEFAULT_MAX_STALE_AGE,
            warmup: Vec::new(),
        }
    }
}

type InflightFetch = broadcast::Sender<Result<Quote, QuoteError>>;

/// The caching and refresh engine.
pub struct Engine {
    store: Arc<dyn QuoteStore>,
    source: Arc<dyn QuoteSource>,
    registry: TierRegistry,
    tiers: Arc<TierConfig>,
    freshness: FreshnessPolicy,
    queue: RefreshQueue,
    breaker: CircuitBreaker,
    metrics: Arc<EngineMetrics>,
    inflight: Mutex<HashMap<String, InflightFetch>>,
    config: EngineConfig,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        tiers: TierConfig,
        breaker_config: BreakerConfig,
        store: Arc<dyn QuoteStore>,
        source: Arc<dyn QuoteSource>,
    ) -> Result<Arc<Self>> {
        if tiers.max_ttl() > config.max_stale_age {
            bail!(
                "tier TTL {:?} exceeds max stale age {:?}",
                tiers.max_ttl(),
                config.max_stale_age
            );
        }

        let metrics = Arc::new(EngineMetrics::new()?);
        let tiers = Arc::new(tiers);
        let freshness = FreshnessPolicy::new(tiers.clone(), config.max_stale_age);
        let queue = RefreshQueue::new(config.queue_capacity, metrics.clone());

        info!(
            workers = config.worker_count,
            queue_capacity = config.queue_capacity,
            max_stale_secs = config.max_stale_age.as_secs(),
            "Initializing quote engine"
        );

        Ok(Arc::new(Self {
            store,
            source,
            registry: TierRegistry::new(),
            tiers,
            freshness,
            queue,
            breaker: CircuitBreaker::new(breaker_config),
            metrics,
            inflight: Mutex::new(HashMap::new()),
            config,
            cancel: CancellationToken::new(),
        }))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tiers(&self) -> &TierConfig {
        &self.tiers
    }

    pub fn registry(&self) -> &TierRegistry {
        &self.registry
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn queue(&self) -> &RefreshQueue {
        &self.queue
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Serve a quote for a validated request, recording latency for
    /// every outcome.
    pub async fn get_quote(&self, req: &QuoteRequest) -> Result<ServedQuote, QuoteError> {
        let started = Instant::now();
        let result = self.serve(req).await;
        self.metrics.record_request_latency(started.elapsed());
        result
    }

    async fn serve(&self, req: &QuoteRequest) -> Result<ServedQuote, QuoteError> {
        let key = req.fingerprint();

        if let Some(entry) = self.store_get(&key).await {
            let now = now_millis();
            if self.freshness.is_fresh(&entry, now) {
                self.metrics.cache_hits.inc();
                debug!(key = %key, tier = %entry.tier, "Cache hit (fresh)");
                return Ok(ServedQuote::fresh(entry.quote, true));
            }
            if self.freshness.is_servable_stale(&entry, now) {
                // Serve immediately, revalidate behind the request.
                self.schedule_revalidate(req).await;
                self.metrics.cache_hits.inc();
                debug!(key = %key, age_ms = entry.age_ms(now), "Cache hit (stale, revalidating)");
                return Ok(ServedQuote::stale(entry.quote));
            }
        }

        self.metrics.cache_misses.inc();
        match self.fetch_now(&key, req).await {
            Ok(quote) => Ok(ServedQuote::fresh(quote, false)),
            Err(err) => {
                if matches!(err, QuoteError::CircuitOpen(_)) {
                    self.metrics.circuit_rejections.inc();
                }
                self.metrics.errors.inc();
                // Fallback re-read: a very stale entry beats an error.
                if let Some(entry) = self.store_get(&key).await {
                    warn!(key = %key, error = %err, "Serving very stale entry after upstream failure");
                    return Ok(ServedQuote::very_stale(entry.quote, err.to_string()));
                }
                Err(err)
            }
        }
    }

    /// Synchronous fetch with single-flight per fingerprint: one
    /// outstanding upstream call per key; concurrent callers await the
    /// leader's result.
    async fn fetch_now(&self, key: &str, req: &QuoteRequest) -> Result<Quote, QuoteError> {
        let follower_rx = {
            let mut inflight = self.inflight.lock().await;
            match inflight.get(key) {
                Some(tx) => Some(tx.subscribe()),
                None => {
                    let (tx, _rx) = broadcast::channel(1);
                    inflight.insert(key.to_string(), tx);
                    None
                }
            }
        };

        if let Some(mut rx) = follower_rx {
            debug!(key = %key, "Awaiting in-flight upstream fetch");
            return match rx.recv().await {
                Ok(result) => result,
                Err(_) => Err(QuoteError::Upstream(
                    "in-flight upstream fetch was abandoned".to_string(),
                )),
            };
        }

        let result = self.fetch_and_store(req).await;
        let tx = self.inflight.lock().await.remove(key);
        if let Some(tx) = tx {
            let _ = tx.send(result.clone());
        }
        result
    }

    /// Fetch through the breaker and write the store under the pair's
    /// current tier.
    async fn fetch_and_store(&self, req: &QuoteRequest) -> Result<Quote, QuoteError> {
        let quote = self
            .breaker
            .call(&req.pair.chain, || {
                self.source.fetch_quote(
                    &req.pair.chain,
                    &req.pair.token_in,
                    &req.pair.token_out,
                    &req.amount,
                    req.direction,
                )
            })
            .await?;

        let tier = self.registry.tier_of(&req.pair.as_key()).await;
        let entry = CacheEntry::new(quote.clone(), tier);
        self.store_set(&req.fingerprint(), entry).await;
        Ok(quote)
    }

    /// Best-effort background revalidation for a stale serve. Queue
    /// saturation and coalescing are both fine here.
    async fn schedule_revalidate(&self, req: &QuoteRequest) {
        let job = RefreshJob::new(
            req.pair.clone(),
            req.amount.clone(),
            req.direction,
            JobPriority::Background,
            self.config.max_attempts,
        );
        if let Err(err) = self.queue.enqueue(job).await {
            debug!(key = %req.fingerprint(), error = %err, "Revalidation enqueue dropped");
        }
    }

    /// Admin force-refresh: High priority, never silently dropped.
    pub async fn force_refresh(&self, req: &QuoteRequest) -> Result<EnqueueOutcome, QuoteError> {
        let job = RefreshJob::new(
            req.pair.clone(),
            req.amount.clone(),
            req.direction,
            JobPriority::High,
            self.config.max_attempts,
        );
        self.queue.enqueue(job).await
    }

    /// Assign a pair to a tier. The pair becomes eligible for scheduled
    /// refresh from this point.
    pub async fn assign_tier(&self, pair: &PairKey, tier: TierLabel) {
        self.registry.assign(&pair.as_key(), tier).await;
    }

    /// One sweep tick: enqueue a Background refresh for every member of
    /// the tier at the standard amount. Saturation drops are silent and
    /// retried on the next tick.
    pub async fn sweep_tier(&self, tier: TierLabel) {
        let members = self.registry.members_of(tier).await;
        if members.is_empty() {
            return;
        }

        let mut enqueued = 0usize;
        for pair_key in &members {
            let Some(pair) = PairKey::from_key(pair_key) else {
                warn!(pair = %pair_key, "Skipping malformed pair key in tier sweep");
                continue;
            };
            let job = RefreshJob::new(
                pair,
                STANDARD_REFRESH_AMOUNT.to_string(),
                TradeDirection::ExactIn,
                JobPriority::Background,
                self.config.max_attempts,
            );
            match self.queue.enqueue(job).await {
                Ok(EnqueueOutcome::Enqueued) => enqueued += 1,
                Ok(EnqueueOutcome::Coalesced) => {}
                Err(_) => {
                    debug!(tier = %tier, "Queue saturated during sweep, remaining refreshes dropped")
                }
            }
        }
        debug!(tier = %tier, members = members.len(), enqueued, "Tier sweep tick");
    }

    /// Execute one refresh job: breaker-gated fetch, tier resolve, store
    /// write. Failed jobs re-enqueue with exponential backoff until
    /// their attempts run out.
    pub async fn process_refresh_job(self: &Arc<Self>, mut job: RefreshJob) {
        self.metrics.jobs_active.inc();
        let key = job.fingerprint();

        let result = self
            .breaker
            .call(&job.pair.chain, || {
                self.source.fetch_quote(
                    &job.pair.chain,
                    &job.pair.token_in,
                    &job.pair.token_out,
                    &job.amount,
                    job.direction,
                )
            })
            .await;

        match result {
            Ok(quote) => {
                let tier = self.registry.tier_of(&job.pair.as_key()).await;
                self.store_set(&key, CacheEntry::new(quote, tier)).await;
                self.metrics.jobs_completed.inc();
                debug!(key = %key, tier = %tier, "Refresh job completed");
            }
            Err(err) => {
                job.attempts_remaining = job.attempts_remaining.saturating_sub(1);
                if job.attempts_remaining > 0 {
                    let attempt = self.config.max_attempts.saturating_sub(job.attempts_remaining);
                    let delay = retry_delay(
                        attempt,
                        self.config.retry_base_delay,
                        self.config.retry_max_delay,
                    );
                    debug!(
                        key = %key,
                        error = %err,
                        attempts_left = job.attempts_remaining,
                        delay_ms = delay.as_millis() as u64,
                        "Refresh job failed, retrying with backoff"
                    );
                    self.requeue_after(job, delay);
                } else {
                    self.metrics.jobs_failed.inc();
                    warn!(key = %key, error = %err, "Refresh job failed permanently");
                }
            }
        }

        self.metrics.jobs_active.dec();
    }

    fn requeue_after(self: &Arc<Self>, job: RefreshJob, delay: Duration) {
        // The retry survives the enqueuing worker but not shutdown.
        let engine = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = engine.cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = engine.queue.enqueue(job).await;
                }
            }
        });
    }

    /// Assign warmup pairs to their tiers and enqueue eager refreshes.
    /// Failures log and never block startup.
    pub async fn warm_up(&self) {
        if self.config.warmup.is_empty() {
            return;
        }
        info!(pairs = self.config.warmup.len(), "Warming up hot pairs");

        for warm in self.config.warmup.clone() {
            let pair = match PairKey::new(&warm.chain, &warm.token_in, &warm.token_out) {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(chain = %warm.chain, error = %err, "Skipping invalid warmup pair");
                    continue;
                }
            };
            self.registry.assign(&pair.as_key(), warm.tier).await;

            let job = RefreshJob::new(
                pair.clone(),
                STANDARD_REFRESH_AMOUNT.to_string(),
                TradeDirection::ExactIn,
                JobPriority::High,
                self.config.max_attempts,
            );
            if let Err(err) = self.queue.enqueue(job).await {
                warn!(pair = %pair, error = %err, "Warmup refresh not enqueued");
            }
        }
    }

    async fn store_get(&self, key: &str) -> Option<CacheEntry> {
        match self.store.get(key).await {
            Ok(entry) => entry,
            Err(err) => {
                // Store trouble is a cache miss, never a request error.
                warn!(key = %key, error = %err, "Quote store read failed, treating as miss");
                None
            }
        }
    }

    async fn store_set(&self, key: &str, entry: CacheEntry) {
        if let Err(err) = self
            .store
            .set(key, entry, self.config.max_stale_age)
            .await
        {
            warn!(key = %key, error = %err, "Quote store write failed, dropping entry");
        }
    }
}

/// Exponential backoff with ±30% jitter for job retries: the first
/// retry waits the base delay, doubling on each further attempt.
fn retry_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(20);
    let exp = base.as_millis().saturating_mul(1u128 << exponent);
    let capped = exp.min(max.as_millis()) as u64;
    let jitter = rand::thread_rng().gen_range(0.7..=1.3);
    Duration::from_millis((capped as f64 * jitter) as u64)
}

/// Tracks spawned background tasks and coordinates graceful shutdown.
pub struct ShutdownCoordinator {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl ShutdownCoordinator {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            handles: Vec::new(),
        }
    }

    pub fn add_handle(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    pub fn extend(&mut self, handles: Vec<JoinHandle<()>>) {
        self.handles.extend(handles);
    }

    /// Cancel all tasks and wait up to `grace` for them to drain,
    /// aborting stragglers.
    pub async fn shutdown(self, grace: Duration) {
        info!(components = self.handles.len(), "Initiating graceful shutdown");
        self.cancel.cancel();

        let deadline = Instant::now() + grace;
        for mut handle in self.handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                warn!("Shutdown grace period elapsed, aborting task");
                handle.abort();
            }
        }
        info!("Shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryQuoteStore;
    use async_trait::async_trait;

    struct NeverSource;

    #[async_trait]
    impl QuoteSource for NeverSource {
        async fn fetch_quote(
            &self,
            _chain: &str,
            _token_in: &str,
            _token_out: &str,
            _amount: &str,
            _direction: TradeDirection,
        ) -> anyhow::Result<Quote> {
            anyhow::bail!("unreachable in this test")
        }
    }

    #[test]
    fn retry_delay_doubles_with_attempts() {
        let base = Duration::from_secs(2);
        let max = Duration::from_secs(60);
        // Jitter is ±30%, so check the envelope per attempt.
        for (attempt, expected_ms) in [(1u32, 2000u64), (2, 4000), (3, 8000)] {
            let delay = retry_delay(attempt, base, max).as_millis() as u64;
            let low = expected_ms * 7 / 10;
            let high = expected_ms * 13 / 10;
            assert!(
                (low..=high).contains(&delay),
                "attempt {}: delay {}ms outside [{}, {}]",
                attempt,
                delay,
                low,
                high
            );
        }
    }

    #[test]
    fn retry_delay_is_capped() {
        let delay = retry_delay(15, Duration::from_secs(2), Duration::from_secs(60));
        assert!(delay <= Duration::from_millis(78_000)); // 60s * 1.3
    }

    #[test]
    fn engine_rejects_ttl_above_max_stale() {
        let config = EngineConfig {
            max_stale_age: Duration::from_secs(30),
            ..Default::default()
        };
        // Default T4 TTL is 600s, above the 30s floor.
        let result = Engine::new(
            config,
            TierConfig::default(),
            BreakerConfig::default(),
            Arc::new(MemoryQuoteStore::new(16)),
            Arc::new(NeverSource),
        );
        assert!(result.is_err());
    }
}
