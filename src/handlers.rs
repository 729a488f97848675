//! HTTP endpoints (§6). Grounded on
//! `examples/x402-rs-x402-rs/src/handlers.rs` (`routes()`, `IntoResponse`
//! error-body pattern, `#[instrument(skip_all)]` handlers), expanded with
//! the webhook/discovery/audit routes this facilitator's expanded surface
//! needs.

use crate::audit_log::AuditLog;
use crate::discovery::{DiscoveryCatalog, DiscoveryFilters};
use crate::error::{ErrorReason, FacilitatorError};
use crate::facilitator::Facilitator;
use crate::types::{ErrorResponse, SettleRequest, SettleResponse, VerifyRequest, VerifyResponse};
use crate::webhook::WebhookRegistry;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

#[derive(Clone)]
pub struct AppState {
    pub facilitator: Arc<dyn Facilitator>,
    pub audit_log: Arc<dyn AuditLog>,
    pub webhooks: Arc<WebhookRegistry>,
    pub discovery: Arc<DiscoveryCatalog>,
    pub ready: Arc<std::sync::atomic::AtomicBool>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/supported", get(get_supported))
        .route("/verify", post(post_verify))
        .route("/verify/quick", post(post_verify_quick))
        .route("/settle", post(post_settle))
        .route("/settle/recent", get(get_settle_recent))
        .route("/settle/stats", get(get_settle_stats))
        .route("/webhooks", post(post_webhook).get(get_webhooks))
        .route("/webhooks/{id}", delete(delete_webhook))
        .route("/discovery/resources", get(get_discovery_resources))
        .route("/health", get(get_health))
        .with_state(state)
}

impl IntoResponse for FacilitatorError {
    fn into_response(self) -> Response {
        let reason = self.reason_code();
        let status = StatusCode::from_u16(reason.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorResponse { error: reason, message: self.to_string() })).into_response()
    }
}

/// Picks the requirements-matching payload from either accepted field name
/// (§6 "Request compatibility").
fn require_payload(body: &VerifyRequest) -> Result<&crate::types::RawPaymentPayload, Response> {
    body.take_payload().ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse { error: ErrorReason::InvalidPayload, message: "missing payload or paymentPayload".into() }),
        )
            .into_response()
    })
}

#[instrument(skip_all)]
pub async fn get_supported(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.facilitator.supported().await)).into_response()
}

/// `POST /verify`: 200 with `isValid` always, except the `outer_allowance_required`
/// case, which is surfaced as 412 (§6 "Response status conventions").
#[instrument(skip_all)]
pub async fn post_verify(State(state): State<AppState>, Json(body): Json<VerifyRequest>) -> Response {
    let payload = match require_payload(&body) {
        Ok(p) => p,
        Err(response) => return response,
    };
    match state.facilitator.verify(payload, &body.payment_requirements).await {
        Ok(response) => verify_response_status(&response, response.clone()),
        Err(err) => err.into_response(),
    }
}

#[instrument(skip_all)]
pub async fn post_verify_quick(State(state): State<AppState>, Json(body): Json<VerifyRequest>) -> Response {
    let payload = match require_payload(&body) {
        Ok(p) => p,
        Err(response) => return response,
    };
    match state.facilitator.verify_quick(payload, &body.payment_requirements).await {
        Ok(response) => verify_response_status(&response, response.clone()),
        Err(err) => err.into_response(),
    }
}

fn verify_response_status(response: &VerifyResponse, body: VerifyResponse) -> Response {
    let status = match response.invalid_reason {
        Some(ErrorReason::OuterAllowanceRequired) => StatusCode::PRECONDITION_FAILED,
        _ => StatusCode::OK,
    };
    (status, Json(body)).into_response()
}

/// `POST /settle`: always 200, `success` flag carries the outcome, except
/// `facilitator_not_configured` which surfaces as 503.
#[instrument(skip_all)]
pub async fn post_settle(State(state): State<AppState>, Json(body): Json<SettleRequest>) -> Response {
    let payload = match require_payload(&body) {
        Ok(p) => p,
        Err(response) => return response,
    };
    match state.facilitator.settle(payload, &body.payment_requirements).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(SettleResponse {
                success: outcome.success,
                payer: outcome.payer.map(|p| p.to_string()),
                ledger_tx_id: outcome.ledger_tx_id,
                block_number: outcome.block_number,
                fee: outcome.fee.map(|f| f.to_string()),
                protocol: outcome.protocol,
                transaction_id: outcome.transaction_id,
                error_reason: outcome.error_reason,
            }),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    #[serde(default = "default_recent_limit")]
    limit: usize,
}

fn default_recent_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
struct RedactedRecord {
    id: String,
    payer: String,
    receiver: String,
    #[serde(rename = "tokenSymbol")]
    token_symbol: String,
    amount: String,
    fee: String,
    network: String,
    status: &'static str,
    protocol: &'static str,
    #[serde(rename = "ledgerTxId", skip_serializing_if = "Option::is_none")]
    ledger_tx_id: Option<String>,
    #[serde(rename = "errorReason", skip_serializing_if = "Option::is_none")]
    error_reason: Option<ErrorReason>,
}

#[instrument(skip_all)]
pub async fn get_settle_recent(State(state): State<AppState>, Query(query): Query<RecentQuery>) -> impl IntoResponse {
    let records = state.audit_log.recent(query.limit).await;
    let redacted: Vec<RedactedRecord> = records
        .into_iter()
        .map(|r| RedactedRecord {
            id: r.id,
            payer: crate::util::redact::Redacted(&r.payer).to_string(),
            receiver: crate::util::redact::Redacted(&r.receiver).to_string(),
            token_symbol: r.token_symbol,
            amount: r.amount,
            fee: r.fee,
            network: r.network,
            status: match r.status {
                crate::audit_log::TransactionStatus::Pending => "pending",
                crate::audit_log::TransactionStatus::Success => "success",
                crate::audit_log::TransactionStatus::Failed => "failed",
            },
            protocol: match r.protocol {
                crate::audit_log::Protocol::WitnessSpend => "witness-spend",
                crate::audit_log::Protocol::DirectAuth => "direct-auth",
            },
            ledger_tx_id: r.ledger_tx_id,
            error_reason: r.error_reason,
        })
        .collect();
    (StatusCode::OK, Json(json!({ "records": redacted }))).into_response()
}

#[instrument(skip_all)]
pub async fn get_settle_stats(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.audit_log.stats().await)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct RegisterWebhookRequest {
    pub url: url::Url,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct WebhookView {
    pub id: String,
    pub url: String,
    pub events: Vec<String>,
    pub active: bool,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

#[instrument(skip_all)]
pub async fn post_webhook(State(state): State<AppState>, Json(body): Json<RegisterWebhookRequest>) -> Response {
    match state.webhooks.register(body.url, body.secret, body.events) {
        Ok(id) => (StatusCode::OK, Json(json!({ "id": id }))).into_response(),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse { error: ErrorReason::InvalidPayload, message: err.to_string() }),
        )
            .into_response(),
    }
}

#[instrument(skip_all)]
pub async fn get_webhooks(State(state): State<AppState>) -> impl IntoResponse {
    let views: Vec<WebhookView> = state
        .webhooks
        .list()
        .into_iter()
        .map(|r| WebhookView { id: r.id, url: r.url.to_string(), events: r.events, active: r.active, created_at: r.created_at })
        .collect();
    (StatusCode::OK, Json(json!({ "webhooks": views }))).into_response()
}

#[instrument(skip_all)]
pub async fn delete_webhook(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    if state.webhooks.deactivate(&id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[instrument(skip_all)]
pub async fn get_discovery_resources(State(state): State<AppState>, Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
    let filters = DiscoveryFilters {
        resource_type: params.get("type").and_then(|t| match t.as_str() {
            "http" => Some("http"),
            "api" => Some("api"),
            _ => None,
        }),
        limit: params.get("limit").and_then(|l| l.parse().ok()),
        offset: params.get("offset").and_then(|o| o.parse().ok()),
    };
    (StatusCode::OK, Json(state.discovery.list(filters))).into_response()
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    warnings: Vec<String>,
}

/// `GET /health`: 503 when the facilitator isn't yet initialized (§6); once
/// ready, 200 with any non-fatal configuration warnings attached.
#[instrument(skip_all)]
pub async fn get_health(State(state): State<AppState>) -> Response {
    if !state.ready.load(std::sync::atomic::Ordering::Acquire) {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(HealthResponse { status: "initializing", warnings: vec![] })).into_response();
    }
    (StatusCode::OK, Json(HealthResponse { status: "ok", warnings: vec![] })).into_response()
}
