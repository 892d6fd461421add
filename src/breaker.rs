//! Circuit breaker for upstream router calls.
//!
//! One breaker shard per logical upstream (the relay shards per chain).
//! After `failure_threshold` consecutive failures a shard opens and
//! rejects calls until `reset_timeout` elapses, then admits a single
//! half-open probe: success closes the circuit, failure re-opens it.
//! Every call is bounded by a per-call timeout; timeouts count as
//! failures.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::QuoteError;

/// Breaker tuning knobs.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before a shard opens.
    pub failure_threshold: u32,
    /// How long an open shard rejects calls before probing.
    pub reset_timeout: Duration,
    /// Deadline applied to every guarded call.
    pub call_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Observable state of a breaker shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
enum ShardState {
    Closed { consecutive_failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { probe_in_flight: bool },
}

impl ShardState {
    fn as_public(&self) -> CircuitState {
        match self {
            ShardState::Closed { .. } => CircuitState::Closed,
            ShardState::Open { .. } => CircuitState::Open,
            ShardState::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

/// Per-upstream circuit breaker.
pub struct CircuitBreaker {
    shards: RwLock<HashMap<String, ShardState>>,
    config: BreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            shards: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Run `op` through the breaker for `shard`.
    ///
    /// Rejects immediately with `CircuitOpen` when the shard is open (or
    /// a half-open probe is already out). Applies the per-call timeout
    /// and records the outcome against the shard.
    pub async fn call<T, F, Fut>(&self, shard: &str, op: F) -> Result<T, QuoteError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.try_acquire(shard).await?;

        match timeout(self.config.call_timeout, op()).await {
            Ok(Ok(value)) => {
                self.record_success(shard).await;
                Ok(value)
            }
            Ok(Err(err)) => {
                self.record_failure(shard).await;
                Err(QuoteError::Upstream(err.to_string()))
            }
            Err(_) => {
                self.record_failure(shard).await;
                Err(QuoteError::Timeout(self.config.call_timeout))
            }
        }
    }

    /// Admission check; transitions Open → HalfOpen when the reset
    /// window has elapsed.
    pub async fn try_acquire(&self, shard: &str) -> Result<(), QuoteError> {
        let mut shards = self.shards.write().await;
        let state = shards
            .entry(shard.to_string())
            .or_insert(ShardState::Closed {
                consecutive_failures: 0,
            });

        match state {
            ShardState::Closed { .. } => Ok(()),
            ShardState::Open { opened_at } => {
                if opened_at.elapsed() >= self.config.reset_timeout {
                    info!(upstream = %shard, "Circuit half-open, admitting probe");
                    *state = ShardState::HalfOpen {
                        probe_in_flight: true,
                    };
                    Ok(())
                } else {
                    Err(QuoteError::CircuitOpen(shard.to_string()))
                }
            }
            ShardState::HalfOpen { probe_in_flight } => {
                if *probe_in_flight {
                    Err(QuoteError::CircuitOpen(shard.to_string()))
                } else {
                    *probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub async fn record_success(&self, shard: &str) {
        let mut shards = self.shards.write().await;
        let state = shards
            .entry(shard.to_string())
            .or_insert(ShardState::Closed {
                consecutive_failures: 0,
            });
        if state.as_public() != CircuitState::Closed {
            info!(upstream = %shard, "Circuit closed after successful call");
        }
        *state = ShardState::Closed {
            consecutive_failures: 0,
        };
    }

    pub async fn record_failure(&self, shard: &str) {
        let mut shards = self.shards.write().await;
        let state = shards
            .entry(shard.to_string())
            .or_insert(ShardState::Closed {
                consecutive_failures: 0,
            });

        match state {
            ShardState::Closed {
                consecutive_failures,
            } => {
                *consecutive_failures += 1;
                if *consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        upstream = %shard,
                        failures = *consecutive_failures,
                        reset_secs = self.config.reset_timeout.as_secs(),
                        "Circuit opened"
                    );
                    *state = ShardState::Open {
                        opened_at: Instant::now(),
                    };
                } else {
                    debug!(upstream = %shard, failures = *consecutive_failures, "Upstream failure recorded");
                }
            }
            ShardState::HalfOpen { .. } => {
                warn!(upstream = %shard, "Half-open probe failed, circuit re-opened");
                *state = ShardState::Open {
                    opened_at: Instant::now(),
                };
            }
            // A call admitted before the transition can report late.
            ShardState::Open { .. } => {}
        }
    }

    pub async fn state(&self, shard: &str) -> CircuitState {
        self.shards
            .read()
            .await
            .get(shard)
            .map(|s| s.as_public())
            .unwrap_or(CircuitState::Closed)
    }
}
