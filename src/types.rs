//! Core data model: trading pairs, cache keys, cached entries, and the
//! shapes served back to callers.
//!
//! Quotes themselves are opaque JSON payloads produced by the upstream
//! router. The relay never interprets quote fields; it only attaches
//! staleness flags on the way out.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::QuoteError;
use crate::tiers::TierLabel;

/// Opaque quote payload from the upstream router.
pub type Quote = serde_json::Value;

/// Namespace prefix for all quote cache keys.
pub const KEY_NAMESPACE: &str = "price";

/// Standard amount used for proactive tier refreshes. Matches the
/// default amount of client requests so sweeps populate the keys
/// clients actually hit.
pub const STANDARD_REFRESH_AMOUNT: &str = "1000";

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Swap direction for a quote request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeDirection {
    #[serde(rename = "exactIn")]
    ExactIn,
    #[serde(rename = "exactOut")]
    ExactOut,
}

impl TradeDirection {
    /// Canonical lowercase form used inside fingerprints.
    pub fn as_key(&self) -> &'static str {
        match self {
            TradeDirection::ExactIn => "exactin",
            TradeDirection::ExactOut => "exactout",
        }
    }

    /// Wire form used by the upstream router API.
    pub fn as_wire(&self) -> &'static str {
        match self {
            TradeDirection::ExactIn => "exactIn",
            TradeDirection::ExactOut => "exactOut",
        }
    }
}

impl FromStr for TradeDirection {
    type Err = QuoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exactin" => Ok(TradeDirection::ExactIn),
            "exactout" => Ok(TradeDirection::ExactOut),
            other => Err(QuoteError::BadRequest(format!(
                "unknown trade type: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// A trading pair in a chain scope, case-normalized on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairKey {
    pub chain: String,
    pub token_in: String,
    pub token_out: String,
}

impl PairKey {
    pub fn new(chain: &str, token_in: &str, token_out: &str) -> Result<Self, QuoteError> {
        if chain.trim().is_empty() || token_in.trim().is_empty() || token_out.trim().is_empty() {
            return Err(QuoteError::BadRequest(
                "chain, tokenIn and tokenOut must be non-empty".to_string(),
            ));
        }
        Ok(Self {
            chain: chain.trim().to_ascii_lowercase(),
            token_in: token_in.trim().to_ascii_lowercase(),
            token_out: token_out.trim().to_ascii_lowercase(),
        })
    }

    /// Canonical `chain:tokenIn:tokenOut` identity for tier membership.
    pub fn as_key(&self) -> String {
        format!("{}:{}:{}", self.chain, self.token_in, self.token_out)
    }

    /// Parse a canonical pair-key back into its components.
    pub fn from_key(key: &str) -> Option<Self> {
        let mut parts = key.splitn(3, ':');
        let chain = parts.next()?;
        let token_in = parts.next()?;
        let token_out = parts.next()?;
        PairKey::new(chain, token_in, token_out).ok()
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.chain, self.token_in, self.token_out)
    }
}

/// A fully validated quote request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuoteRequest {
    pub pair: PairKey,
    pub amount: String,
    pub direction: TradeDirection,
}

impl QuoteRequest {
    /// Validate raw request parameters into a canonical request.
    ///
    /// `amount` defaults to [`STANDARD_REFRESH_AMOUNT`] and must parse as
    /// a positive number; `trade_type` defaults to `exactIn`.
    pub fn parse(
        chain: &str,
        token_in: &str,
        token_out: &str,
        amount: Option<&str>,
        trade_type: Option<&str>,
    ) -> Result<Self, QuoteError> {
        let pair = PairKey::new(chain, token_in, token_out)?;
        let amount = amount.unwrap_or(STANDARD_REFRESH_AMOUNT).trim().to_string();
        match amount.parse::<f64>() {
            Ok(v) if v > 0.0 && v.is_finite() => {}
            _ => {
                return Err(QuoteError::BadRequest(format!(
                    "amount must be a positive number, got {:?}",
                    amount
                )))
            }
        }
        let direction = match trade_type {
            Some(raw) => raw.parse()?,
            None => TradeDirection::ExactIn,
        };
        Ok(Self {
            pair,
            amount,
            direction,
        })
    }

    /// Full cache key for this request.
    pub fn fingerprint(&self) -> String {
        fingerprint(
            &self.pair.chain,
            &self.pair.token_in,
            &self.pair.token_out,
            &self.amount,
            self.direction,
        )
    }
}

/// Canonical cache key over the full request tuple.
///
/// Case-folds every string input and joins with `:` under the `price`
/// namespace. Equal tuples (after case normalization) always produce
/// equal keys; the key is used verbatim against the quote store.
pub fn fingerprint(
    chain: &str,
    token_in: &str,
    token_out: &str,
    amount: &str,
    direction: TradeDirection,
) -> String {
    format!(
        "{}:{}:{}:{}:{}:{}",
        KEY_NAMESPACE,
        chain.to_ascii_lowercase(),
        token_in.to_ascii_lowercase(),
        token_out.to_ascii_lowercase(),
        amount.to_ascii_lowercase(),
        direction.as_key()
    )
}

/// A cached quote as held by the quote store.
///
/// `inserted_at_ms` is the wall clock at which the producing upstream
/// fetch completed. Entries are overwritten whole, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub quote: Quote,
    pub inserted_at_ms: u64,
    pub tier: TierLabel,
}

impl CacheEntry {
    pub fn new(quote: Quote, tier: TierLabel) -> Self {
        Self {
            quote,
            inserted_at_ms: now_millis(),
            tier,
        }
    }

    /// Age of this entry at `now_ms`, saturating for clock skew.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.inserted_at_ms)
    }
}

/// A quote on its way out of the engine, with staleness flags.
#[derive(Debug, Clone)]
pub struct ServedQuote {
    pub quote: Quote,
    /// Whether the payload came out of the cache (false for a quote
    /// fetched synchronously on this request).
    pub cached: bool,
    /// Served past its tier TTL but within the max-stale floor.
    pub stale: bool,
    /// Served as an emergency fallback after an upstream failure.
    pub very_stale: bool,
    /// Upstream error message, present only with `very_stale`.
    pub error: Option<String>,
}

impl ServedQuote {
    pub fn fresh(quote: Quote, cached: bool) -> Self {
        Self {
            quote,
            cached,
            stale: false,
            very_stale: false,
            error: None,
        }
    }

    pub fn stale(quote: Quote) -> Self {
        Self {
            quote,
            cached: true,
            stale: true,
            very_stale: false,
            error: None,
        }
    }

    pub fn very_stale(quote: Quote, error: String) -> Self {
        Self {
            quote,
            cached: true,
            stale: true,
            very_stale: true,
            error: Some(error),
        }
    }

    /// The outgoing payload: the opaque quote with the relay's envelope
    /// flags injected when the payload is a JSON object. Non-object
    /// payloads are passed through untouched (the flags still appear in
    /// response metadata).
    pub fn decorated_quote(&self) -> Quote {
        let mut quote = self.quote.clone();
        if let Some(obj) = quote.as_object_mut() {
            if self.stale {
                obj.insert("stale".to_string(), serde_json::Value::Bool(true));
            }
            if self.very_stale {
                obj.insert("veryStale".to_string(), serde_json::Value::Bool(true));
            }
            if let Some(err) = &self.error {
                obj.insert(
                    "error".to_string(),
                    serde_json::Value::String(err.clone()),
                );
            }
        }
        quote
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fingerprint_is_case_insensitive() {
        let a = fingerprint("Ethereum", "USDC", "WeTH", "1000", TradeDirection::ExactIn);
        let b = fingerprint("ethereum", "usdc", "weth", "1000", TradeDirection::ExactIn);
        assert_eq!(a, b);
        assert_eq!(a, "price:ethereum:usdc:weth:1000:exactin");
    }

    #[test]
    fn fingerprint_distinguishes_tuples() {
        let base = fingerprint("ethereum", "usdc", "weth", "1000", TradeDirection::ExactIn);
        assert_ne!(
            base,
            fingerprint("ethereum", "usdc", "weth", "2000", TradeDirection::ExactIn)
        );
        assert_ne!(
            base,
            fingerprint("ethereum", "usdc", "weth", "1000", TradeDirection::ExactOut)
        );
        assert_ne!(
            base,
            fingerprint("ethereum", "weth", "usdc", "1000", TradeDirection::ExactIn)
        );
    }

    #[test]
    fn request_parse_applies_defaults() {
        let req = QuoteRequest::parse("Ethereum", "USDC", "WETH", None, None).unwrap();
        assert_eq!(req.amount, STANDARD_REFRESH_AMOUNT);
        assert_eq!(req.direction, TradeDirection::ExactIn);
        assert_eq!(req.pair.as_key(), "ethereum:usdc:weth");
    }

    #[test]
    fn request_parse_rejects_bad_amount() {
        for bad in ["abc", "-5", "0", "NaN", ""] {
            let err = QuoteRequest::parse("ethereum", "usdc", "weth", Some(bad), None);
            assert!(
                matches!(err, Err(QuoteError::BadRequest(_))),
                "amount {:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn request_parse_rejects_unknown_trade_type() {
        let err = QuoteRequest::parse("ethereum", "usdc", "weth", None, Some("sideways"));
        assert!(matches!(err, Err(QuoteError::BadRequest(_))));
    }

    #[test]
    fn pair_key_rejects_empty_components() {
        assert!(PairKey::new("", "usdc", "weth").is_err());
        assert!(PairKey::new("ethereum", " ", "weth").is_err());
    }

    #[test]
    fn served_quote_decoration() {
        let served = ServedQuote::very_stale(json!({"amountOut": "42"}), "boom".to_string());
        let decorated = served.decorated_quote();
        assert_eq!(decorated["stale"], json!(true));
        assert_eq!(decorated["veryStale"], json!(true));
        assert_eq!(decorated["error"], json!("boom"));
        assert_eq!(decorated["amountOut"], json!("42"));
    }

    #[test]
    fn non_object_quote_passes_through() {
        let served = ServedQuote::stale(json!([1, 2, 3]));
        assert_eq!(served.decorated_quote(), json!([1, 2, 3]));
    }

    #[test]
    fn cache_entry_age_saturates() {
        let entry = CacheEntry {
            quote: json!({}),
            inserted_at_ms: 10_000,
            tier: TierLabel::T1,
        };
        assert_eq!(entry.age_ms(10_500), 500);
        assert_eq!(entry.age_ms(9_000), 0);
    }
}
