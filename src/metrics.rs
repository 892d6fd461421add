//! Engine metrics: prometheus counters/gauges plus a fixed-capacity
//! latency window.
//!
//! Recording is lock-free (prometheus counters are atomic, the latency
//! ring uses plain atomics) so observability never blocks the request
//! path. Snapshots are computed on demand for the metrics endpoint.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, IntCounter,
    IntGauge, Opts, Registry, TextEncoder,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::error;

/// Number of request latencies retained for percentile calculation.
pub const LATENCY_WINDOW: usize = 1000;

/// Fixed-capacity ring of recent request latencies in milliseconds.
///
/// `record` is O(1) and wait-free: a slot index is claimed with a single
/// fetch-add and the value stored with a relaxed write. Snapshots may
/// observe a torn window under heavy concurrency, which is acceptable
/// for percentile reporting.
struct LatencyRing {
    slots: Vec<AtomicU64>,
    next: AtomicUsize,
}

impl LatencyRing {
    fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| AtomicU64::new(0)).collect();
        Self {
            slots,
            next: AtomicUsize::new(0),
        }
    }

    fn record(&self, millis: u64) {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        self.slots[idx].store(millis, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LatencySnapshot {
        let written = self.next.load(Ordering::Relaxed);
        let filled = written.min(self.slots.len());
        let mut samples: Vec<u64> = self.slots[..filled]
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed))
            .collect();
        samples.sort_unstable();

        let average_ms = if samples.is_empty() {
            0.0
        } else {
            samples.iter().sum::<u64>() as f64 / samples.len() as f64
        };

        LatencySnapshot {
            count: filled as u64,
            average_ms,
            p50_ms: percentile(&samples, 50.0),
            p95_ms: percentile(&samples, 95.0),
            p99_ms: percentile(&samples, 99.0),
        }
    }
}

fn percentile(sorted: &[u64], pct: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let index = ((sorted.len() as f64 - 1.0) * pct / 100.0) as usize;
    sorted[index]
}

/// Metrics owned by the engine, registered in a private prometheus
/// registry for text exposition.
pub struct EngineMetrics {
    registry: Registry,
    pub cache_hits: IntCounter,
    pub cache_misses: IntCounter,
    pub errors: IntCounter,
    pub circuit_rejections: IntCounter,
    pub jobs_active: IntGauge,
    pub jobs_waiting: IntGauge,
    pub jobs_completed: IntCounter,
    pub jobs_failed: IntCounter,
    pub jobs_coalesced: IntCounter,
    pub jobs_dropped: IntCounter,
    latencies: LatencyRing,
}

impl EngineMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let cache_hits = register_int_counter_with_registry!(
            Opts::new("quote_cache_hits_total", "Quote requests served from cache"),
            &registry
        )
        .context("register cache_hits")?;
        let cache_misses = register_int_counter_with_registry!(
            Opts::new("quote_cache_misses_total", "Quote requests requiring a synchronous fetch"),
            &registry
        )
        .context("register cache_misses")?;
        let errors = register_int_counter_with_registry!(
            Opts::new("quote_errors_total", "Quote requests that hit an upstream error"),
            &registry
        )
        .context("register errors")?;
        let circuit_rejections = register_int_counter_with_registry!(
            Opts::new(
                "quote_circuit_rejections_total",
                "Quote requests rejected by an open circuit"
            ),
            &registry
        )
        .context("register circuit_rejections")?;
        let jobs_active = register_int_gauge_with_registry!(
            Opts::new("refresh_jobs_active", "Refresh jobs currently executing"),
            &registry
        )
        .context("register jobs_active")?;
        let jobs_waiting = register_int_gauge_with_registry!(
            Opts::new("refresh_jobs_waiting", "Refresh jobs waiting in the queue"),
            &registry
        )
        .context("register jobs_waiting")?;
        let jobs_completed = register_int_counter_with_registry!(
            Opts::new("refresh_jobs_completed_total", "Refresh jobs completed successfully"),
            &registry
        )
        .context("register jobs_completed")?;
        let jobs_failed = register_int_counter_with_registry!(
            Opts::new(
                "refresh_jobs_failed_total",
                "Refresh jobs failed after exhausting retries"
            ),
            &registry
        )
        .context("register jobs_failed")?;
        let jobs_coalesced = register_int_counter_with_registry!(
            Opts::new(
                "refresh_jobs_coalesced_total",
                "Refresh submissions coalesced into a pending job"
            ),
            &registry
        )
        .context("register jobs_coalesced")?;
        let jobs_dropped = register_int_counter_with_registry!(
            Opts::new(
                "refresh_jobs_dropped_total",
                "Refresh jobs dropped by the queue overflow policy"
            ),
            &registry
        )
        .context("register jobs_dropped")?;

        Ok(Self {
            registry,
            cache_hits,
            cache_misses,
            errors,
            circuit_rejections,
            jobs_active,
            jobs_waiting,
            jobs_completed,
            jobs_failed,
            jobs_coalesced,
            jobs_dropped,
            latencies: LatencyRing::new(LATENCY_WINDOW),
        })
    }

    /// Record a request latency. O(1), never blocks.
    pub fn record_request_latency(&self, elapsed: Duration) {
        self.latencies.record(elapsed.as_millis() as u64);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let hits = self.cache_hits.get() as u64;
        let misses = self.cache_misses.get() as u64;
        let hit_rate = if hits + misses == 0 {
            0.0
        } else {
            hits as f64 / (hits + misses) as f64
        };

        MetricsSnapshot {
            cache_hits: hits,
            cache_misses: misses,
            hit_rate,
            errors: self.errors.get() as u64,
            circuit_rejections: self.circuit_rejections.get() as u64,
            jobs: JobsSnapshot {
                active: self.jobs_active.get(),
                waiting: self.jobs_waiting.get(),
                completed: self.jobs_completed.get() as u64,
                failed: self.jobs_failed.get() as u64,
                coalesced: self.jobs_coalesced.get() as u64,
                dropped: self.jobs_dropped.get() as u64,
            },
            latency: self.latencies.snapshot(),
            timestamp: Utc::now(),
        }
    }

    /// Prometheus text exposition of all registered metrics.
    pub fn export_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            error!(error = %e, "Failed to encode prometheus metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Point-in-time view served by `GET /metrics`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub hit_rate: f64,
    pub errors: u64,
    pub circuit_rejections: u64,
    pub jobs: JobsSnapshot,
    pub latency: LatencySnapshot,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobsSnapshot {
    pub active: i64,
    pub waiting: i64,
    pub completed: u64,
    pub failed: u64,
    pub coalesced: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySnapshot {
    pub count: u64,
    pub average_ms: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}
