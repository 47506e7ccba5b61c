//! Transfer service handlers

use std::sync::Arc;

use axum::{Json, extract::State};
use serde::Serialize;
use utoipa::ToSchema;

use super::state::AppState;
use super::types::{ApiError, ApiResult, ok};
use crate::core_types::{LedgerRecord, TransactionDetails};
use crate::sequencer::LedgerStatus;

/// Transfer submitted by the demo endpoint
pub const DEMO_SOURCE_ACCOUNT: &str = "123";
pub const DEMO_DESTINATION_ACCOUNT: &str = "456";
pub const DEMO_AMOUNT: u64 = 42;

/// Submit a transfer request
///
/// Returns the ledger record as soon as the request is recorded. The transfer
/// itself runs later and its outcome is not reflected here.
#[utoipa::path(
    post,
    path = "/v1/service/transfer",
    request_body = TransactionDetails,
    responses(
        (status = 200, description = "Transfer recorded", body = LedgerRecord, content_type = "application/json"),
        (status = 400, description = "Invalid transfer request"),
        (status = 503, description = "Ledger unavailable")
    ),
    tag = "Transfer"
)]
pub async fn create_transfer(
    State(state): State<Arc<AppState>>,
    Json(details): Json<TransactionDetails>,
) -> ApiResult<LedgerRecord> {
    if details.source_account_id.trim().is_empty() {
        return ApiError::bad_request("sourceAccountId must not be empty").into_err();
    }
    if details.destination_account_id.trim().is_empty() {
        return ApiError::bad_request("destinationAccountId must not be empty").into_err();
    }

    let record = state.ledger.enqueue(details).await?;
    tracing::info!(record_id = %record.id, "Transfer request accepted");
    ok(record)
}

/// Submit the fixed demo transfer (123 → 456, amount 42)
#[utoipa::path(
    get,
    path = "/v1/service/transfer",
    responses(
        (status = 200, description = "Demo transfer recorded", body = LedgerRecord, content_type = "application/json"),
        (status = 503, description = "Ledger unavailable")
    ),
    tag = "Transfer"
)]
pub async fn demo_transfer(State(state): State<Arc<AppState>>) -> ApiResult<LedgerRecord> {
    let details =
        TransactionDetails::new(DEMO_SOURCE_ACCOUNT, DEMO_DESTINATION_ACCOUNT, DEMO_AMOUNT);
    let record = state.ledger.enqueue(details).await?;
    tracing::info!(record_id = %record.id, "Demo transfer accepted");
    ok(record)
}

/// Full ledger history in id order
///
/// Lists requested transfers, not settled ones.
#[utoipa::path(
    get,
    path = "/v1/service/history",
    responses(
        (status = 200, description = "Ledger history", body = Vec<LedgerRecord>, content_type = "application/json"),
        (status = 503, description = "Ledger unavailable")
    ),
    tag = "Transfer"
)]
pub async fn get_history(State(state): State<Arc<AppState>>) -> ApiResult<Vec<LedgerRecord>> {
    let history = state.ledger.history().await?;
    ok(history)
}

/// Health check response data
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "0.1.0")]
    pub version: String,
    #[schema(example = "a1b2c3d4")]
    pub git_hash: String,
    pub uptime_secs: u64,
    pub ledger: LedgerStatus,
}

#[utoipa::path(
    get,
    path = "/v1/service/health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse, content_type = "application/json"),
        (status = 503, description = "Ledger unavailable")
    ),
    tag = "System"
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> ApiResult<HealthResponse> {
    let ledger = state.ledger.status().await?;
    ok(HealthResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        uptime_secs: state.uptime_secs(),
        ledger,
    })
}
