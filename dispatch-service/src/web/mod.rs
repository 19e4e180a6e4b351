//! Web server module exposing the dispatch API.
//!
//! Routes:
//! - `GET /health`
//! - `POST /send-startup-invite`, `/send-team-invite`, `/send-welcome-email`
//! - `POST /bulk-send`

pub mod auth;
pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use auth::{is_api_key_auth_enabled, verify_api_key, AuthDecision, API_KEY_HEADER};
pub use handlers::{
    bulk_send, health, send_startup_invite, send_team_invite, send_welcome_email, AppState,
    BulkSendBody, BulkSendResponse, HealthResponse, SendResponse, SingleSendBody,
};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/send-startup-invite", post(send_startup_invite))
        .route("/send-team-invite", post(send_team_invite))
        .route("/send-welcome-email", post(send_welcome_email))
        .route("/bulk-send", post(bulk_send))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
