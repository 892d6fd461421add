//! Error kinds visible to the caching core.
//!
//! Store failures are always recovered locally (miss on read, dropped
//! write) and never reach clients; only upstream-driven errors surface,
//! and only after fallback paths are exhausted.

use std::time::Duration;
use thiserror::Error;

/// Core error type for the quote relay.
///
/// Cloneable so a single in-flight fetch result can be fanned out to
/// every coalesced waiter.
#[derive(Debug, Clone, Error)]
pub enum QuoteError {
    /// The quote store could not be reached. Treated as a cache miss on
    /// read and a dropped write on write; never surfaced to callers.
    #[error("quote store unavailable: {0}")]
    StoreUnavailable(String),

    /// The upstream router returned an error for this call.
    #[error("upstream quote fetch failed: {0}")]
    Upstream(String),

    /// The circuit breaker is open for this upstream; the call was
    /// rejected without reaching the router.
    #[error("circuit open for upstream {0}")]
    CircuitOpen(String),

    /// Malformed caller input: unknown tier, empty pair component,
    /// non-numeric amount, unknown trade type.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The upstream call exceeded its per-call deadline. Behaves as an
    /// upstream failure for fallback purposes.
    #[error("upstream call timed out after {0:?}")]
    Timeout(Duration),

    /// The refresh queue is at capacity and nothing could be evicted.
    /// Only surfaced for admin force-refresh; background enqueues drop
    /// silently instead.
    #[error("refresh queue full")]
    QueueFull,
}

impl QuoteError {
    /// Whether this error counts against the upstream circuit breaker.
    pub fn is_upstream_failure(&self) -> bool {
        matches!(self, QuoteError::Upstream(_) | QuoteError::Timeout(_))
    }
}
