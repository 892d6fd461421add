//! HTTP surface for the quote relay.
//!
//! Routes:
//! - `GET  /health`
//! - `GET  /price/:chain/:token_in/:token_out`
//! - `POST /prices` (batch, partial failures allowed)
//! - `GET  /metrics` (JSON snapshot)
//! - `GET  /metrics/prometheus` (text exposition)
//! - `POST /admin/tiers/:tier/pairs`
//! - `POST /admin/refresh`

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

use crate::engine::Engine;
use crate::error::QuoteError;

mod handlers;

/// Build the router over a shared engine.
pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/price/:chain/:token_in/:token_out",
            get(handlers::get_price),
        )
        .route("/prices", post(handlers::batch_prices))
        .route("/metrics", get(handlers::metrics_snapshot))
        .route("/metrics/prometheus", get(handlers::metrics_prometheus))
        .route("/admin/tiers/:tier/pairs", post(handlers::assign_tier))
        .route("/admin/refresh", post(handlers::force_refresh))
        .with_state(engine)
}

/// Bind and serve until the shutdown future resolves; in-flight
/// requests drain before return.
pub async fn serve<F>(engine: Arc<Engine>, addr: &str, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(addr = %addr, "Quote relay HTTP server listening");

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server error")?;
    Ok(())
}

impl IntoResponse for QuoteError {
    fn into_response(self) -> Response {
        let status = match &self {
            QuoteError::BadRequest(_) => StatusCode::BAD_REQUEST,
            QuoteError::CircuitOpen(_) | QuoteError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            QuoteError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            QuoteError::Upstream(_) => StatusCode::BAD_GATEWAY,
            QuoteError::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}
