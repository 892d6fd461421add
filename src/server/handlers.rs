//! Route handlers and response envelopes.

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::engine::Engine;
use crate::error::QuoteError;
use crate::metrics::MetricsSnapshot;
use crate::queue::EnqueueOutcome;
use crate::tiers::TierLabel;
use crate::types::{QuoteRequest, ServedQuote};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
    })
}

#[derive(Debug, Deserialize)]
pub struct PriceQuery {
    pub amount: Option<String>,
    #[serde(rename = "tradeType")]
    pub trade_type: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceMetadata {
    pub cached: bool,
    pub stale: bool,
    pub very_stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl PriceMetadata {
    fn from_served(served: &ServedQuote) -> Self {
        Self {
            cached: served.cached,
            stale: served.stale,
            very_stale: served.very_stale,
            error: served.error.clone(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PriceEnvelope {
    pub success: bool,
    pub data: serde_json::Value,
    pub metadata: PriceMetadata,
}

impl PriceEnvelope {
    fn from_served(served: &ServedQuote) -> Self {
        Self {
            success: true,
            data: served.decorated_quote(),
            metadata: PriceMetadata::from_served(served),
        }
    }
}

/// Browser/CDN cache hints degrade with staleness.
fn cache_control(served: &ServedQuote) -> &'static str {
    if served.very_stale {
        "max-age=1"
    } else if served.stale {
        "max-age=5"
    } else {
        "max-age=30"
    }
}

pub async fn get_price(
    State(engine): State<Arc<Engine>>,
    Path((chain, token_in, token_out)): Path<(String, String, String)>,
    Query(query): Query<PriceQuery>,
) -> Result<Response, QuoteError> {
    let request = QuoteRequest::parse(
        &chain,
        &token_in,
        &token_out,
        query.amount.as_deref(),
        query.trade_type.as_deref(),
    )?;

    let served = engine.get_quote(&request).await?;
    let headers = [(header::CACHE_CONTROL, cache_control(&served))];
    Ok((headers, Json(PriceEnvelope::from_served(&served))).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPair {
    pub chain_name: String,
    pub token_in: String,
    pub token_out: String,
    pub amount: Option<String>,
    pub trade_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub pairs: Vec<BatchPair>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub success: bool,
    pub chain_name: String,
    pub token_in: String,
    pub token_out: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PriceMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Batch lookup; each pair succeeds or fails independently.
pub async fn batch_prices(
    State(engine): State<Arc<Engine>>,
    Json(body): Json<BatchRequest>,
) -> Json<serde_json::Value> {
    let mut results = Vec::with_capacity(body.pairs.len());

    for pair in body.pairs {
        let outcome = match QuoteRequest::parse(
            &pair.chain_name,
            &pair.token_in,
            &pair.token_out,
            pair.amount.as_deref(),
            pair.trade_type.as_deref(),
        ) {
            Ok(request) => engine.get_quote(&request).await,
            Err(err) => Err(err),
        };

        results.push(match outcome {
            Ok(served) => BatchResult {
                success: true,
                chain_name: pair.chain_name,
                token_in: pair.token_in,
                token_out: pair.token_out,
                data: Some(served.decorated_quote()),
                metadata: Some(PriceMetadata::from_served(&served)),
                error: None,
            },
            Err(err) => BatchResult {
                success: false,
                chain_name: pair.chain_name,
                token_in: pair.token_in,
                token_out: pair.token_out,
                data: None,
                metadata: None,
                error: Some(err.to_string()),
            },
        });
    }

    Json(json!({ "success": true, "data": results }))
}

pub async fn metrics_snapshot(State(engine): State<Arc<Engine>>) -> Json<MetricsSnapshot> {
    Json(engine.metrics_snapshot())
}

pub async fn metrics_prometheus(State(engine): State<Arc<Engine>>) -> Response {
    let text = engine.metrics().export_prometheus();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], text).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairBody {
    pub chain_name: String,
    pub token_in: String,
    pub token_out: String,
}

pub async fn assign_tier(
    State(engine): State<Arc<Engine>>,
    Path(tier): Path<String>,
    Json(body): Json<PairBody>,
) -> Result<Json<serde_json::Value>, QuoteError> {
    let tier: TierLabel = tier.parse()?;
    let pair =
        crate::types::PairKey::new(&body.chain_name, &body.token_in, &body.token_out)?;

    engine.assign_tier(&pair, tier).await;
    Ok(Json(json!({
        "success": true,
        "data": { "pair": pair.as_key(), "tier": tier.to_string() },
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshBody {
    pub chain_name: String,
    pub token_in: String,
    pub token_out: String,
    pub amount: Option<String>,
    pub trade_type: Option<String>,
}

pub async fn force_refresh(
    State(engine): State<Arc<Engine>>,
    Json(body): Json<RefreshBody>,
) -> Result<Json<serde_json::Value>, QuoteError> {
    let request = QuoteRequest::parse(
        &body.chain_name,
        &body.token_in,
        &body.token_out,
        body.amount.as_deref(),
        body.trade_type.as_deref(),
    )?;

    let outcome = engine.force_refresh(&request).await?;
    let status = match outcome {
        EnqueueOutcome::Enqueued => "enqueued",
        EnqueueOutcome::Coalesced => "coalesced",
    };
    Ok(Json(json!({
        "success": true,
        "data": { "fingerprint": request.fingerprint(), "status": status },
    })))
}
