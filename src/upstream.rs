//! Upstream quote source.
//!
//! The router is consumed as an opaque `fetch_quote` call: the relay
//! never inspects the returned payload beyond treating it as JSON.
//! Upstream calls are slow (seconds) and fail at a bounded rate; the
//! circuit breaker and per-call timeout live above this layer.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{direct::NotKeyed, InMemoryState},
    Quota, RateLimiter,
};
use reqwest::Client;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, info};

use crate::types::{Quote, TradeDirection};

/// Opaque upstream quote function.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch_quote(
        &self,
        chain: &str,
        token_in: &str,
        token_out: &str,
        amount: &str,
        direction: TradeDirection,
    ) -> Result<Quote>;
}

/// Configuration for the HTTP router client.
#[derive(Debug, Clone)]
pub struct RouterClientConfig {
    /// Base URL of the router quote API.
    pub base_url: String,
    /// Optional API key sent as `X-API-KEY`.
    pub api_key: Option<String>,
    /// HTTP request timeout. The breaker's per-call timeout sits above
    /// this; keeping both bounds the slowest failure path.
    pub request_timeout: Duration,
    /// Requests per minute against the router; 0 disables limiting.
    pub rate_limit_per_minute: u32,
}

impl Default for RouterClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8545".to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(30),
            rate_limit_per_minute: 0,
        }
    }
}

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// HTTP client for the on-chain router's quote endpoint.
pub struct RouterApiClient {
    config: RouterClientConfig,
    http: Client,
    limiter: Option<DirectLimiter>,
}

impl RouterApiClient {
    pub fn new(config: RouterClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build router HTTP client")?;

        let limiter = NonZeroU32::new(config.rate_limit_per_minute)
            .map(|limit| RateLimiter::direct(Quota::per_minute(limit)));

        info!(
            base_url = %config.base_url,
            timeout_secs = config.request_timeout.as_secs(),
            rate_limit_per_minute = config.rate_limit_per_minute,
            "Initialized router quote client"
        );

        Ok(Self {
            config,
            http,
            limiter,
        })
    }
}

#[async_trait]
impl QuoteSource for RouterApiClient {
    async fn fetch_quote(
        &self,
        chain: &str,
        token_in: &str,
        token_out: &str,
        amount: &str,
        direction: TradeDirection,
    ) -> Result<Quote> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let url = format!("{}/quote", self.config.base_url.trim_end_matches('/'));
        debug!(chain, token_in, token_out, amount, %direction, "Fetching quote from router");

        let mut request = self.http.get(&url).query(&[
            ("chain", chain),
            ("tokenIn", token_in),
            ("tokenOut", token_out),
            ("amount", amount),
            ("tradeType", direction.as_wire()),
        ]);
        if let Some(api_key) = &self.config.api_key {
            request = request.header("X-API-KEY", api_key);
        }

        let response = request
            .send()
            .await
            .context("Failed to send quote request to router")?;

        if !response.status().is_success() {
            return Err(anyhow!("router API error: {}", response.status()));
        }

        let quote: Quote = response
            .json()
            .await
            .context("Failed to parse router quote response")?;

        Ok(quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_builds_without_rate_limit() {
        let client = RouterApiClient::new(RouterClientConfig::default()).unwrap();
        assert!(client.limiter.is_none());
    }

    #[test]
    fn client_builds_with_rate_limit() {
        let client = RouterApiClient::new(RouterClientConfig {
            rate_limit_per_minute: 120,
            ..Default::default()
        })
        .unwrap();
        assert!(client.limiter.is_some());
    }
}
