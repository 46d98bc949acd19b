//! Request-wide middleware ordering: IP limiter → auth-flow limiter (on
//! auth-flow paths only) → per-user API limiter. Authentication proper and
//! authorization happen downstream, in the `AuthUser` extractor and each
//! handler's `load_authorized` check — this layer only has to decide
//! admit/reject before either of those runs.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::ratelimit::{ApiRateLimiterConfig, AuthFlowCheckInput, classify};

use super::state::AppState;

pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ct = CancellationToken::new();
    let path = request.uri().path().to_string();
    let ip = classify::extract_ip(request.headers(), Some(peer.ip()));

    if let Some(ip) = ip.as_deref() {
        let decision = state.ip_limiter.check(&ct, ip).await;
        if !decision.admitted {
            return ApiError::RateLimitExceeded(decision).into_response();
        }
    }

    if classify::is_auth_flow_endpoint(&path) {
        let query = request.uri().query().unwrap_or("");
        let session = extract_query_param(query, "state").or_else(|| extract_query_param(query, "RelayState"));
        let code = extract_query_param(query, "code");
        let login_hint = extract_query_param(query, "login_hint").map(|s| s.to_lowercase());
        let input = AuthFlowCheckInput {
            session: session.as_deref().or(code.as_deref()),
            ip: ip.as_deref(),
            login_hint: login_hint.as_deref(),
        };
        let decision = state.auth_flow_limiter.check(&ct, input).await;
        if !decision.admitted {
            return ApiError::RateLimitExceeded(decision.decision).into_response();
        }
    } else if !classify::is_public_endpoint(&path) {
        if let Some(user_id) = bearer_subject(&request, &state) {
            let cfg = ApiRateLimiterConfig { per_min: state.config.rate_limits.api_per_min, per_hour: state.config.rate_limits.api_per_hour };
            let decision = state.api_limiter.check(&ct, &user_id, &cfg).await;
            if !decision.admitted {
                return ApiError::RateLimitExceeded(decision).into_response();
            }
        }
    }

    next.run(request).await
}

/// Cheap subject lookup for rate-limit bucketing only; full claim
/// validation and user/group resolution happens in `AuthUser`.
fn bearer_subject(request: &Request<Body>, state: &AppState) -> Option<String> {
    let jwt = state.jwt.as_ref()?;
    let header = request.headers().get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?;
    jwt.validate_claims(token).ok()?.sub().map(str::to_string)
}

fn extract_query_param(query: &str, name: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
}
