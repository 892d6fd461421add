//! Service configuration: TOML file with environment overrides for
//! secrets and deployment knobs, plus logging initialization.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::breaker::BreakerConfig;
use crate::engine::{EngineConfig, WarmupPair};
use crate::upstream::RouterClientConfig;

/// Top-level configuration for the relay process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Bind address for the HTTP surface.
    pub listen_addr: String,
    /// Fallback log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Grace window for draining in-flight work at shutdown.
    pub shutdown_grace_secs: u64,
    pub upstream: UpstreamSettings,
    pub store: StoreSettings,
    pub refresh: RefreshSettings,
    pub breaker: BreakerSettings,
    /// Hot pairs assigned and refreshed before first client traffic.
    pub warmup: Vec<WarmupEntry>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            log_level: "info".to_string(),
            shutdown_grace_secs: 15,
            upstream: UpstreamSettings::default(),
            store: StoreSettings::default(),
            refresh: RefreshSettings::default(),
            breaker: BreakerSettings::default(),
            warmup: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSettings {
    pub base_url: String,
    /// Prefer `ROUTER_API_KEY` in the environment over this field.
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    /// 0 disables client-side rate limiting.
    pub rate_limit_per_minute: u32,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8545".to_string(),
            api_key: None,
            request_timeout_secs: 30,
            rate_limit_per_minute: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub max_entries: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    pub max_attempts: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    pub max_stale_age_secs: u64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            workers: 10,
            queue_capacity: 1000,
            max_attempts: 3,
            retry_base_ms: 2000,
            retry_max_ms: 60_000,
            max_stale_age_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
    pub call_timeout_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_secs: 60,
            call_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupEntry {
    pub chain: String,
    pub token_in: String,
    pub token_out: String,
    pub tier: String,
}

impl RelayConfig {
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {:?}", path.as_ref()))?;
        let mut config: RelayConfig =
            toml::from_str(&contents).context("Failed to parse config file")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment variables win over the file for secrets and
    /// deployment-specific values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("ROUTER_API_URL") {
            self.upstream.base_url = url;
        }
        if let Ok(key) = std::env::var("ROUTER_API_KEY") {
            if !key.is_empty() {
                self.upstream.api_key = Some(key);
            }
        }
        if let Ok(port) = std::env::var("QUOTE_RELAY_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                let host = self
                    .listen_addr
                    .rsplit_once(':')
                    .map(|(host, _)| host.to_string())
                    .unwrap_or_else(|| "0.0.0.0".to_string());
                self.listen_addr = format!("{}:{}", host, port);
            }
        }
    }

    pub fn init_logging(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.log_level.clone()));
        // try_init so tests can call this repeatedly.
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn engine_config(&self) -> Result<EngineConfig> {
        let mut warmup = Vec::with_capacity(self.warmup.len());
        for entry in &self.warmup {
            let tier = entry
                .tier
                .parse()
                .with_context(|| format!("Invalid warmup tier {:?}", entry.tier))?;
            warmup.push(WarmupPair {
                chain: entry.chain.clone(),
                token_in: entry.token_in.clone(),
                token_out: entry.token_out.clone(),
                tier,
            });
        }

        Ok(EngineConfig {
            worker_count: self.refresh.workers,
            queue_capacity: self.refresh.queue_capacity,
            max_attempts: self.refresh.max_attempts,
            retry_base_delay: Duration::from_millis(self.refresh.retry_base_ms),
            retry_max_delay: Duration::from_millis(self.refresh.retry_max_ms),
            max_stale_age: Duration::from_secs(self.refresh.max_stale_age_secs),
            warmup,
        })
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.breaker.failure_threshold,
            reset_timeout: Duration::from_secs(self.breaker.reset_timeout_secs),
            call_timeout: Duration::from_secs(self.breaker.call_timeout_secs),
        }
    }

    pub fn router_config(&self) -> RouterClientConfig {
        RouterClientConfig {
            base_url: self.upstream.base_url.clone(),
            api_key: self.upstream.api_key.clone(),
            request_timeout: Duration::from_secs(self.upstream.request_timeout_secs),
            rate_limit_per_minute: self.upstream.rate_limit_per_minute,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiers::TierLabel;

    #[test]
    fn defaults_match_policy() {
        let config = RelayConfig::default();
        assert_eq!(config.refresh.workers, 10);
        assert_eq!(config.refresh.max_attempts, 3);
        assert_eq!(config.refresh.max_stale_age_secs, 3600);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.reset_timeout_secs, 60);
        assert_eq!(config.breaker.call_timeout_secs, 30);
    }

    #[test]
    fn parses_partial_toml() {
        let raw = r#"
            listen_addr = "127.0.0.1:8080"

            [upstream]
            base_url = "https://router.example.com"
            rate_limit_per_minute = 120

            [[warmup]]
            chain = "ethereum"
            token_in = "USDC"
            token_out = "WETH"
            tier = "T1"
        "#;
        let config: RelayConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.upstream.base_url, "https://router.example.com");
        // Unspecified sections keep their defaults.
        assert_eq!(config.refresh.workers, 10);

        let engine_config = config.engine_config().unwrap();
        assert_eq!(engine_config.warmup.len(), 1);
        assert_eq!(engine_config.warmup[0].tier, TierLabel::T1);
    }

    #[test]
    fn invalid_warmup_tier_is_an_error() {
        let config = RelayConfig {
            warmup: vec![WarmupEntry {
                chain: "ethereum".to_string(),
                token_in: "usdc".to_string(),
                token_out: "weth".to_string(),
                tier: "T7".to_string(),
            }],
            ..Default::default()
        };
        assert!(config.engine_config().is_err());
    }
}
