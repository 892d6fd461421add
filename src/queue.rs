//! Bounded priority queue for background refresh jobs.
//!
//! Three bands (High > Normal > Background), FIFO within a band.
//! Structurally identical submissions coalesce so at most one job is
//! pending per fingerprint per band. When the queue is full the oldest
//! Background job is dropped to make room; if nothing can be dropped
//! the submission is refused, which callers on the admin path surface
//! and callers on best-effort paths ignore.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::error::QuoteError;
use crate::metrics::EngineMetrics;
use crate::types::{fingerprint, now_millis, PairKey, TradeDirection};

/// Scheduling band for a refresh job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobPriority {
    High,
    Normal,
    Background,
}

impl JobPriority {
    fn band(self) -> usize {
        match self {
            JobPriority::High => 0,
            JobPriority::Normal => 1,
            JobPriority::Background => 2,
        }
    }
}

/// A unit of refresh work targeting one `(pair, amount, direction)`.
#[derive(Debug, Clone)]
pub struct RefreshJob {
    pub pair: PairKey,
    pub amount: String,
    pub direction: TradeDirection,
    pub priority: JobPriority,
    pub attempts_remaining: u32,
    pub submitted_at_ms: u64,
}

impl RefreshJob {
    pub fn new(
        pair: PairKey,
        amount: String,
        direction: TradeDirection,
        priority: JobPriority,
        attempts: u32,
    ) -> Self {
        Self {
            pair,
            amount,
            direction,
            priority,
            attempts_remaining: attempts.max(1),
            submitted_at_ms: now_millis(),
        }
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(
            &self.pair.chain,
            &self.pair.token_in,
            &self.pair.token_out,
            &self.amount,
            self.direction,
        )
    }

    fn coalesce_key(&self) -> String {
        format!("{}|{}", self.priority.band(), self.fingerprint())
    }
}

/// Result of a successful enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// A structurally identical job was already pending in this band.
    Coalesced,
}

struct QueueInner {
    bands: [VecDeque<RefreshJob>; 3],
    pending: HashSet<String>,
}

impl QueueInner {
    fn len(&self) -> usize {
        self.bands.iter().map(|band| band.len()).sum()
    }

    fn drop_oldest_background(&mut self) -> bool {
        if let Some(dropped) = self.bands[JobPriority::Background.band()].pop_front() {
            self.pending.remove(&dropped.coalesce_key());
            true
        } else {
            false
        }
    }
}

/// MPMC refresh queue with bounded capacity.
pub struct RefreshQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
    metrics: Arc<EngineMetrics>,
}

impl RefreshQueue {
    pub fn new(capacity: usize, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                bands: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
                pending: HashSet::new(),
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
            metrics,
        }
    }

    /// Submit a job.
    ///
    /// Returns `Coalesced` without queueing when an identical job is
    /// already pending in the same band. Returns `QueueFull` only when
    /// the queue is at capacity and holds no Background job to evict.
    pub async fn enqueue(&self, job: RefreshJob) -> Result<EnqueueOutcome, QuoteError> {
        let mut inner = self.inner.lock().await;

        let key = job.coalesce_key();
        if inner.pending.contains(&key) {
            self.metrics.jobs_coalesced.inc();
            return Ok(EnqueueOutcome::Coalesced);
        }

        if inner.len() >= self.capacity {
            if inner.drop_oldest_background() {
                self.metrics.jobs_dropped.inc();
                debug!(fingerprint = %job.fingerprint(), "Queue full, dropped oldest background job");
            } else {
                return Err(QuoteError::QueueFull);
            }
        }

        debug!(
            fingerprint = %job.fingerprint(),
            priority = ?job.priority,
            "Enqueued refresh job"
        );
        inner.pending.insert(key);
        inner.bands[job.priority.band()].push_back(job);
        self.metrics.jobs_waiting.set(inner.len() as i64);
        drop(inner);

        self.notify.notify_one();
        Ok(EnqueueOutcome::Enqueued)
    }

    /// Take the highest-priority job, waiting until one is available.
    pub async fn dequeue(&self) -> RefreshJob {
        loop {
            if let Some(job) = self.try_dequeue().await {
                return job;
            }
            self.notify.notified().await;
        }
    }

    /// Take the highest-priority job if one is queued.
    pub async fn try_dequeue(&self) -> Option<RefreshJob> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let job = inner.bands.iter_mut().find_map(|band| band.pop_front())?;
        let key = job.coalesce_key();
        inner.pending.remove(&key);
        self.metrics.jobs_waiting.set(inner.len() as i64);
        Some(job)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> Arc<EngineMetrics> {
        Arc::new(EngineMetrics::new().unwrap())
    }

    fn job(token_in: &str, priority: JobPriority) -> RefreshJob {
        RefreshJob::new(
            PairKey::new("ethereum", token_in, "weth").unwrap(),
            "1000".to_string(),
            TradeDirection::ExactIn,
            priority,
            3,
        )
    }

    #[tokio::test]
    async fn high_priority_dispatches_before_background() {
        let queue = RefreshQueue::new(100, metrics());
        queue
            .enqueue(job("usdc", JobPriority::Background))
            .await
            .unwrap();
        queue.enqueue(job("dai", JobPriority::Normal)).await.unwrap();
        queue.enqueue(job("wbtc", JobPriority::High)).await.unwrap();

        assert_eq!(queue.dequeue().await.pair.token_in, "wbtc");
        assert_eq!(queue.dequeue().await.pair.token_in, "dai");
        assert_eq!(queue.dequeue().await.pair.token_in, "usdc");
    }

    #[tokio::test]
    async fn fifo_within_a_band() {
        let queue = RefreshQueue::new(100, metrics());
        for token in ["a", "b", "c"] {
            queue
                .enqueue(job(token, JobPriority::Background))
                .await
                .unwrap();
        }
        assert_eq!(queue.dequeue().await.pair.token_in, "a");
        assert_eq!(queue.dequeue().await.pair.token_in, "b");
        assert_eq!(queue.dequeue().await.pair.token_in, "c");
    }

    #[tokio::test]
    async fn identical_jobs_coalesce_per_band() {
        let queue = RefreshQueue::new(100, metrics());
        assert_eq!(
            queue
                .enqueue(job("usdc", JobPriority::Background))
                .await
                .unwrap(),
            EnqueueOutcome::Enqueued
        );
        assert_eq!(
            queue
                .enqueue(job("usdc", JobPriority::Background))
                .await
                .unwrap(),
            EnqueueOutcome::Coalesced
        );
        // A different band holds its own pending job.
        assert_eq!(
            queue.enqueue(job("usdc", JobPriority::High)).await.unwrap(),
            EnqueueOutcome::Enqueued
        );
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn dequeued_job_can_be_resubmitted() {
        let queue = RefreshQueue::new(100, metrics());
        queue
            .enqueue(job("usdc", JobPriority::Background))
            .await
            .unwrap();
        let taken = queue.dequeue().await;
        assert_eq!(
            queue.enqueue(taken).await.unwrap(),
            EnqueueOutcome::Enqueued
        );
    }

    #[tokio::test]
    async fn overflow_drops_oldest_background() {
        let queue = RefreshQueue::new(2, metrics());
        queue.enqueue(job("a", JobPriority::Background)).await.unwrap();
        queue.enqueue(job("b", JobPriority::Background)).await.unwrap();
        queue.enqueue(job("c", JobPriority::High)).await.unwrap();

        assert_eq!(queue.len().await, 2);
        assert_eq!(queue.dequeue().await.pair.token_in, "c");
        // "a" was the oldest background job and got dropped.
        assert_eq!(queue.dequeue().await.pair.token_in, "b");
    }

    #[tokio::test]
    async fn full_queue_without_background_refuses() {
        let queue = RefreshQueue::new(2, metrics());
        queue.enqueue(job("a", JobPriority::High)).await.unwrap();
        queue.enqueue(job("b", JobPriority::High)).await.unwrap();

        let result = queue.enqueue(job("c", JobPriority::High)).await;
        assert!(matches!(result, Err(QuoteError::QueueFull)));
    }

    #[tokio::test]
    async fn dequeue_wakes_on_enqueue() {
        let queue = Arc::new(RefreshQueue::new(10, metrics()));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        queue.enqueue(job("usdc", JobPriority::Background)).await.unwrap();

        let got = tokio::time::timeout(std::time::Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.pair.token_in, "usdc");
    }
}
