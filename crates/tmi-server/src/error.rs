//! Taxonomy of kinds (not type names) from the error handling design: each
//! variant maps to exactly one HTTP status and a `{error, error_description}`
//! body, mirroring the teacher's per-concern `thiserror` enums.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::ratelimit::Decision;

/// Rate-limit response header names, not present in `http::header`'s const set.
mod x_headers {
    use axum::http::HeaderName;

    pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
    pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
    pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("invalid uuid: {0}")]
    InvalidUuid(String),
    #[error("missing parameters: {0}")]
    MissingParameters(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("reserved key: {0}")]
    ReservedKey(String),
    #[error("rate limit exceeded")]
    RateLimitExceeded(Decision),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("internal error")]
    ServerError(#[source] Option<anyhow::Error>),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) => "invalid_input",
            ApiError::InvalidUuid(_) => "invalid_uuid",
            ApiError::MissingParameters(_) => "missing_parameters",
            ApiError::NotFound(_) => "not_found",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::Conflict(_) => "conflict",
            ApiError::ReservedKey(_) => "reserved_key",
            ApiError::RateLimitExceeded(_) => "rate_limit_exceeded",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
            ApiError::ServerError(_) => "server_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_)
            | ApiError::InvalidUuid(_)
            | ApiError::MissingParameters(_)
            | ApiError::ReservedKey(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn description(&self) -> String {
        match self {
            ApiError::ServerError(_) => "an internal error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    error_description: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::ServerError(Some(err)) = &self {
            tracing::error!(error = %err, "server_error");
        }
        let decision = match &self {
            ApiError::RateLimitExceeded(d) => Some(*d),
            _ => None,
        };
        let body = ErrorBody { error: self.kind(), error_description: self.description() };
        let mut resp = (self.status(), Json(body)).into_response();
        if let Some(d) = decision {
            let headers = resp.headers_mut();
            if let Ok(val) = http::HeaderValue::from_str(&d.retry_after_secs().to_string()) {
                headers.insert(http::header::RETRY_AFTER, val);
            }
            if let Ok(val) = http::HeaderValue::from_str(&d.limit.to_string()) {
                headers.insert(x_headers::X_RATELIMIT_LIMIT, val);
            }
            if let Ok(val) = http::HeaderValue::from_str(&d.remaining.to_string()) {
                headers.insert(x_headers::X_RATELIMIT_REMAINING, val);
            }
            if let Ok(val) = http::HeaderValue::from_str(&d.reset_at_ns.to_string()) {
                headers.insert(x_headers::X_RATELIMIT_RESET, val);
            }
        }
        resp
    }
}

/// Store-level sentinels recognized by the propagation policy; anything else
/// from `sqlx`/`anyhow` folds to `ServerError`.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("duplicate membership")]
    DuplicateMembership,
    #[error("principal is already a member of itself")]
    SelfGroupMember,
    #[error("relationship would create a cycle")]
    Cycle,
    #[error("security reviewer conflict")]
    SecurityReviewerConflict,
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::NotFound(e.to_string()),
            StoreError::DuplicateMembership | StoreError::SelfGroupMember | StoreError::Cycle => {
                ApiError::Conflict(e.to_string())
            },
            StoreError::SecurityReviewerConflict => {
                ApiError::Conflict("security_reviewer_conflict".to_string())
            },
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => ApiError::NotFound("not found".to_string()),
            other => ApiError::ServerError(Some(other.into())),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::ServerError(Some(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(ApiError::InvalidInput("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Forbidden("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::ReservedKey("migrate".into()).status(), StatusCode::BAD_REQUEST);
        let decision = Decision { admitted: false, limit: 3, remaining: 0, reset_at_ns: 1 };
        assert_eq!(ApiError::RateLimitExceeded(decision).status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ApiError::ServiceUnavailable("x".into()).status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ApiError::ServerError(None).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn store_error_security_reviewer_conflict_maps_to_conflict() {
        let api: ApiError = StoreError::SecurityReviewerConflict.into();
        assert_eq!(api.status(), StatusCode::CONFLICT);
        assert_eq!(api.kind(), "conflict");
    }

    #[test]
    fn rate_limit_response_carries_ratelimit_headers() {
        let decision = Decision { admitted: false, limit: 3, remaining: 0, reset_at_ns: 1_700_000_000_000_000_000 };
        let resp = ApiError::RateLimitExceeded(decision).into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = resp.headers();
        assert_eq!(headers.get(x_headers::X_RATELIMIT_LIMIT).unwrap(), "3");
        assert_eq!(headers.get(x_headers::X_RATELIMIT_REMAINING).unwrap(), "0");
        assert!(headers.contains_key(x_headers::X_RATELIMIT_RESET));
        assert!(headers.contains_key(http::header::RETRY_AFTER));
    }
}
