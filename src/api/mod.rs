//! Thin HTTP host: a health check, a telemetry snapshot, and the §6.2
//! command surface passed straight through to `Site::apply_command`. No
//! protocol detail (OCPP/Modbus) lives at this layer — that belongs to
//! the adapters behind the capability traits, not the host.

mod commands;

use crate::events::LogLevel;
use crate::site::Site;
use axum::{
    extract::State,
    http::{header::AUTHORIZATION, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

pub use commands::CommandRequest;

#[derive(Clone)]
pub struct ApiState {
    pub site: Arc<Mutex<Site>>,
    pub auth_token: Option<Arc<str>>,
}

pub fn router(state: ApiState) -> Router {
    let protected = Router::new()
        .route("/api/v1/telemetry", get(telemetry_snapshot))
        .route("/api/v1/commands", post(commands::submit))
        .layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .route("/healthz", get(health))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn telemetry_snapshot(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = state.site.lock().await.events.snapshot().await;
    Json::<std::collections::HashMap<String, Value>>(snapshot)
}

/// Rejects requests missing `Authorization: Bearer <token>` when a token
/// is configured; a `None` token disables auth entirely, for local/dev
/// deployments.
async fn require_bearer(
    State(state): State<ApiState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.auth_token.as_deref() else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => next.run(request).await,
        _ => {
            state.site.lock().await.events.log(LogLevel::Warn, "rejected unauthenticated API request");
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}
