//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::chain::ChainClient;
use crate::claim::{self, ClaimSettings};
use crate::errors::EngineError;

pub struct ApiState {
    pub pool: SqlitePool,
    pub chain: Arc<dyn ChainClient>,
    pub settings: ClaimSettings,
    pub duplicate_window_secs: i64,
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ClaimRequest {
    pub destination_account: String,
    pub requesting_handle: String,
}

#[derive(Deserialize)]
pub struct ManualPaymentRequest {
    pub sender: String,
    pub recipient: String,
    pub amount: Decimal,
    pub external_id: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowance: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<i64>,
}

/// Map engine errors to HTTP status codes. `PaymentRequired` carries the
/// fresh balance/allowance/required figures so the recipient can explain a
/// blocked claim to the sender.
fn error_response(e: EngineError) -> axum::response::Response {
    let (status, balance, allowance, required) = match &e {
        EngineError::Validation(_) => (StatusCode::BAD_REQUEST, None, None, None),
        EngineError::NotFound => (StatusCode::NOT_FOUND, None, None, None),
        EngineError::Forbidden => (StatusCode::FORBIDDEN, None, None, None),
        EngineError::AlreadyClaimed => (StatusCode::CONFLICT, None, None, None),
        EngineError::PaymentRequired {
            balance,
            allowance,
            required,
        } => (
            StatusCode::PAYMENT_REQUIRED,
            Some(*balance),
            Some(*allowance),
            Some(*required),
        ),
        EngineError::UpstreamUnavailable(_) => (StatusCode::BAD_GATEWAY, None, None, None),
        EngineError::ConfirmationTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, None, None, None),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, None, None, None),
    };

    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            balance,
            allowance,
            required,
        }),
    )
        .into_response()
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /claims/:handle`
///
/// All payments addressed to the handle, each with the sender's current
/// authorization standing.
pub async fn list_claims(
    State(state): State<Arc<ApiState>>,
    Path(handle): Path<String>,
) -> impl IntoResponse {
    match claim::list_claims(&state.pool, state.chain.as_ref(), &state.settings, &handle).await {
        Ok(views) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "recipient": handle,
                "count": views.len(),
                "claims": views,
            })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// `POST /claims/:external_id/claim`
///
/// Execute the claim protocol for one payment.
pub async fn claim_payment(
    State(state): State<Arc<ApiState>>,
    Path(external_id): Path<String>,
    Json(req): Json<ClaimRequest>,
) -> impl IntoResponse {
    match claim::claim(
        &state.pool,
        state.chain.as_ref(),
        &state.settings,
        &external_id,
        &req.destination_account,
        &req.requesting_handle,
    )
    .await
    {
        Ok(receipt) => (StatusCode::OK, Json(receipt)).into_response(),
        Err(e) => error_response(e),
    }
}

/// `POST /payments`
///
/// Manual ingestion path bypassing the feed.
pub async fn record_manual(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<ManualPaymentRequest>,
) -> impl IntoResponse {
    match claim::record_manual(
        &state.pool,
        &req.sender,
        &req.recipient,
        req.amount,
        &req.external_id,
        state.duplicate_window_secs,
    )
    .await
    {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(e) => error_response(e),
    }
}
