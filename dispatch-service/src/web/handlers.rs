//! HTTP endpoint handlers.
//!
//! Every write endpoint:
//! 1. Verifies the API key
//! 2. Deserializes the body into recipient requests
//! 3. Hands them to the dispatch engine
//!
//! The single-send routes are batches of one with the template fixed by route.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::dispatch::{DispatchEngine, DispatchError};
use crate::model::{
    BatchSummary, DispatchOutcome, DispatchStatus, ErrorKind, RecipientRequest, TemplateKind,
};
use crate::web::auth::{verify_api_key, AuthDecision};
use crate::Config;

/// Header carrying the caller's idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Set on responses served from the idempotency cache.
pub const IDEMPOTENT_REPLAY_HEADER: &str = "idempotent-replayed";

const SERVICE_NAME: &str = "dispatch-service";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<DispatchEngine>,
}

impl AppState {
    pub fn new(config: Config, engine: DispatchEngine) -> Self {
        Self {
            config: Arc::new(config),
            engine: Arc::new(engine),
        }
    }
}

/// Error body shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            success: false,
            message: message.into(),
            error: error.into(),
        }),
    )
        .into_response()
}

fn authorize(state: &AppState, headers: &HeaderMap, route: &str) -> Result<(), Response> {
    match verify_api_key(&state.config.api_keys, headers) {
        AuthDecision::Allowed => Ok(()),
        AuthDecision::NotConfigured if state.config.allow_unauthenticated => {
            debug!(route = route, "api_key_check_skipped");
            Ok(())
        }
        AuthDecision::NotConfigured => {
            warn!(route = route, "api_key_not_configured");
            Err(error_response(
                StatusCode::UNAUTHORIZED,
                "API key authentication is not configured",
                "Unauthorized",
            ))
        }
        AuthDecision::Missing => {
            warn!(route = route, "api_key_missing");
            Err(error_response(
                StatusCode::UNAUTHORIZED,
                "API key required",
                "Unauthorized",
            ))
        }
        AuthDecision::Invalid => {
            warn!(route = route, "api_key_invalid");
            Err(error_response(
                StatusCode::UNAUTHORIZED,
                "Invalid API key",
                "Unauthorized",
            ))
        }
    }
}

/// Idempotency key scoped to the route so single and bulk calls never collide.
fn idempotency_key(headers: &HeaderMap, route: &str) -> Option<String> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|key| format!("{}:{}", route, key))
}

fn dispatch_error_response(err: DispatchError) -> Response {
    let status = match &err {
        DispatchError::InvalidBatch(_) => StatusCode::BAD_REQUEST,
        DispatchError::IdempotencyConflict => StatusCode::UNPROCESSABLE_ENTITY,
        DispatchError::IdempotencyInProgress => StatusCode::CONFLICT,
        DispatchError::Configuration(_) | DispatchError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let error = match &err {
        DispatchError::InvalidBatch(_) => "InvalidBatch",
        DispatchError::IdempotencyConflict => "IdempotencyConflict",
        DispatchError::IdempotencyInProgress => "IdempotencyInProgress",
        DispatchError::Configuration(_) => "Configuration",
        DispatchError::Internal(_) => "Internal",
    };
    error_response(status, err.to_string(), error)
}

fn mark_replayed(mut response: Response, replayed: bool) -> Response {
    if replayed {
        response
            .headers_mut()
            .insert(IDEMPOTENT_REPLAY_HEADER, HeaderValue::from_static("true"));
    }
    response
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub service: &'static str,
    pub provider_reachable: bool,
}

/// Health check endpoint. Always 200; `status` reports provider reachability.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let provider_reachable = state.engine.health().await;

    Json(HealthResponse {
        status: if provider_reachable { "ok" } else { "degraded" },
        timestamp: Utc::now().to_rfc3339(),
        service: SERVICE_NAME,
        provider_reachable,
    })
}

// =============================================================================
// Single Send
// =============================================================================

/// Body of the single-send routes: the address plus flat template fields.
#[derive(Debug, Deserialize)]
pub struct SingleSendBody {
    #[serde(alias = "to", alias = "address")]
    pub email: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
}

/// Response of the single-send routes.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

fn label(kind: TemplateKind) -> &'static str {
    match kind {
        TemplateKind::StartupInvite => "Startup invite",
        TemplateKind::TeamInvite => "Team invite",
        TemplateKind::Welcome => "Welcome email",
    }
}

fn outcome_status(outcome: &DispatchOutcome) -> StatusCode {
    match (outcome.status(), outcome.error_kind()) {
        (DispatchStatus::Sent, _) => StatusCode::OK,
        (DispatchStatus::Rejected, Some(ErrorKind::ProviderRejected)) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        (DispatchStatus::Rejected, _) => StatusCode::BAD_REQUEST,
        (DispatchStatus::Failed, Some(ErrorKind::Timeout | ErrorKind::DeadlineExceeded)) => {
            StatusCode::GATEWAY_TIMEOUT
        }
        (DispatchStatus::Failed, _) => StatusCode::BAD_GATEWAY,
    }
}

fn send_response(kind: TemplateKind, outcome: &DispatchOutcome) -> SendResponse {
    if outcome.is_sent() {
        SendResponse {
            success: true,
            message: format!("{} sent successfully", label(kind)),
            recipient: Some(outcome.address().to_string()),
            message_id: outcome.provider_message_id().map(str::to_string),
            error: None,
            details: None,
        }
    } else {
        SendResponse {
            success: false,
            message: format!("Failed to send {}", label(kind).to_lowercase()),
            recipient: Some(outcome.address().to_string()),
            message_id: None,
            error: outcome.error_kind(),
            details: Some(outcome.detail().to_string()),
        }
    }
}

async fn send_single(
    state: AppState,
    headers: HeaderMap,
    kind: TemplateKind,
    route: &'static str,
    body: Result<Json<SingleSendBody>, JsonRejection>,
) -> Response {
    if let Err(response) = authorize(&state, &headers, route) {
        return response;
    }

    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(route = route, error = %rejection.body_text(), "request_body_invalid");
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text(), "InvalidRequest");
        }
    };

    info!(route = route, to = %body.email, field_count = body.fields.len(), "single_send_received");

    let request = RecipientRequest {
        address: body.email,
        template_kind: kind,
        fields: body.fields,
    };

    let key = idempotency_key(&headers, route);
    match state.engine.send_one_idempotent(key.as_deref(), request).await {
        Ok((outcome, replayed)) => mark_replayed(
            (outcome_status(&outcome), Json(send_response(kind, &outcome))).into_response(),
            replayed,
        ),
        Err(e) => {
            error!(route = route, error = %e, "single_send_failed");
            dispatch_error_response(e)
        }
    }
}

/// `POST /send-startup-invite`
pub async fn send_startup_invite(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<SingleSendBody>, JsonRejection>,
) -> Response {
    send_single(state, headers, TemplateKind::StartupInvite, "send_startup_invite", body).await
}

/// `POST /send-team-invite`
pub async fn send_team_invite(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<SingleSendBody>, JsonRejection>,
) -> Response {
    send_single(state, headers, TemplateKind::TeamInvite, "send_team_invite", body).await
}

/// `POST /send-welcome-email`
pub async fn send_welcome_email(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<SingleSendBody>, JsonRejection>,
) -> Response {
    send_single(state, headers, TemplateKind::Welcome, "send_welcome_email", body).await
}

// =============================================================================
// Bulk Send
// =============================================================================

/// Body of `POST /bulk-send`.
#[derive(Debug, Deserialize)]
pub struct BulkSendBody {
    pub emails: Vec<RecipientRequest>,
}

/// Response of `POST /bulk-send`.
#[derive(Debug, Serialize)]
pub struct BulkSendResponse {
    pub success: bool,
    pub message: String,
    pub results: Vec<DispatchOutcome>,
    pub summary: BatchSummary,
}

/// `POST /bulk-send`
///
/// Returns 200 whenever the batch was processed; per-recipient failures are
/// reported in `results` and `summary`.
pub async fn bulk_send(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<BulkSendBody>, JsonRejection>,
) -> Response {
    const ROUTE: &str = "bulk_send";

    if let Err(response) = authorize(&state, &headers, ROUTE) {
        return response;
    }

    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(route = ROUTE, error = %rejection.body_text(), "request_body_invalid");
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text(), "InvalidRequest");
        }
    };

    info!(route = ROUTE, recipients = body.emails.len(), "bulk_send_received");

    let key = idempotency_key(&headers, ROUTE);
    match state.engine.dispatch_idempotent(key.as_deref(), body.emails).await {
        Ok(result) => {
            let summary = result.report.summary;
            let response = BulkSendResponse {
                success: true,
                message: format!(
                    "Processed {} emails: {} sent, {} failed",
                    summary.total, summary.successful, summary.failed
                ),
                results: result.report.outcomes,
                summary,
            };
            mark_replayed((StatusCode::OK, Json(response)).into_response(), result.replayed)
        }
        Err(e) => {
            warn!(route = ROUTE, error = %e, "bulk_send_rejected");
            dispatch_error_response(e)
        }
    }
}
