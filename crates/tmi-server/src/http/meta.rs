//! Public, unauthenticated endpoints: client configuration, OIDC discovery
//! stubs, and the admin-only logging/metrics surface.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

use crate::cache::metrics::StatsSnapshot;
use crate::error::ApiError;

use super::extract::AuthUser;
use super::state::AppState;

/// `GET /config` — the environment-facing subset the UI needs at boot,
/// cached by clients for 5 minutes.
pub async fn config(State(state): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("public, max-age=300"));
    (headers, Json(state.config.public())).into_response()
}

/// `GET /.well-known/openid-configuration` — TMI only validates externally
/// issued tokens, so this advertises the configured issuer and the local
/// JWKS mirror rather than running a real discovery document generator.
pub async fn openid_configuration(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let issuer = &state.config.oidc_issuer;
    Json(json!({
        "issuer": issuer,
        "jwks_uri": format!("{}/.well-known/jwks.json", issuer.trim_end_matches('/')),
    }))
}

/// TMI never mints its own signing keys — it only validates tokens issued
/// by an external provider — so this always mirrors an empty key set.
pub async fn jwks() -> Json<serde_json::Value> {
    Json(json!({ "keys": [] }))
}

#[derive(Debug, Deserialize)]
pub struct LogLevelParams {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub reset: bool,
}

pub async fn get_log_level() -> Result<Json<serde_json::Value>, ApiError> {
    let filter = tmi_core::telemetry::get_current_loglevel().map_err(|e| ApiError::ServerError(Some(e)))?;
    Ok(Json(json!({ "filter": filter })))
}

pub async fn set_log_level(
    _user: AuthUser,
    Query(params): Query<LogLevelParams>,
) -> Result<StatusCode, ApiError> {
    tmi_core::telemetry::set_level(params.reset, params.level.as_deref().unwrap_or("info"))
        .map_err(|e| ApiError::InvalidInput(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> Result<Json<StatsSnapshot>, ApiError> {
    state.cache.metrics.export().map(Json).map_err(|e| ApiError::ServerError(Some(anyhow::anyhow!(e))))
}

/// Stub handlers for the auth-flow routes the rate limiter classifies;
/// the identity providers themselves are a different system.
pub mod authflow {
    use super::*;

    pub async fn unavailable() -> Response {
        ApiError::ServiceUnavailable("identity provider integration is not part of this service".to_string())
            .into_response()
    }
}
