//! quote-relay - Read-through price-quote cache for on-chain router quotes
//!
//! Sits in front of a slow router (2-5s per quote) and serves sub-second
//! responses from a tiered cache: hot pairs are refreshed proactively by
//! a sweeper, stale entries are served while a background refresh runs,
//! and a circuit breaker with very-stale fallback keeps the service
//! answering while the router is down.

pub mod breaker;
pub mod config;
pub mod engine;
pub mod error;
pub mod freshness;
pub mod metrics;
pub mod queue;
pub mod server;
pub mod store;
pub mod sweeper;
pub mod tiers;
pub mod types;
pub mod upstream;
pub mod worker;

// Re-export the types most callers need
pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use config::RelayConfig;
pub use engine::{Engine, EngineConfig, ShutdownCoordinator, WarmupPair};
pub use error::QuoteError;
pub use queue::{EnqueueOutcome, JobPriority, RefreshJob};
pub use store::{MemoryQuoteStore, QuoteStore};
pub use tiers::{TierConfig, TierLabel, TierRegistry};
pub use types::{CacheEntry, PairKey, Quote, QuoteRequest, ServedQuote, TradeDirection};
pub use upstream::{QuoteSource, RouterApiClient, RouterClientConfig};
