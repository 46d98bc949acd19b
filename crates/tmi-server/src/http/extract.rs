//! The `AuthUser` extractor resolves a validated JWT into a local user
//! record and that user's group memberships, in one place so every handler
//! sees the same shape.

use std::sync::Arc;

use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use uuid::Uuid;

use crate::error::ApiError;

use super::jwt::Claims;
use super::state::AppState;

pub struct AuthUser {
    pub user_id: Uuid,
    pub groups: Vec<Uuid>,
    pub claims: Claims,
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let jwt = state.jwt.as_ref().ok_or_else(|| {
            ApiError::ServiceUnavailable("authentication is not configured".to_string())
        })?;

        let header = TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state).await.ok();
        let claims = jwt
            .authenticate(header)
            .await
            .map_err(|_| ApiError::Forbidden("invalid or expired token".to_string()))?
            .ok_or_else(|| ApiError::Forbidden("authentication required".to_string()))?;

        let State(state) = State::<Arc<AppState>>::from_request_parts(parts, state)
            .await
            .map_err(|_| ApiError::ServerError(None))?;

        let provider = claims.inner.get("iss").and_then(|v| v.as_str()).unwrap_or("external");
        let provider_id = claims.sub().ok_or_else(|| ApiError::Forbidden("token has no subject".to_string()))?;
        let email = claims.email().unwrap_or_default();
        let name = claims.inner.get("name").and_then(|v| v.as_str()).unwrap_or(email);
        let email_verified = claims.inner.get("email_verified").and_then(|v| v.as_bool()).unwrap_or(false);

        let user = state.users.upsert_from_claims(provider, provider_id, email, name, email_verified).await?;
        let groups = state.groups.members_of(user.id).await?;

        Ok(AuthUser { user_id: user.id, groups, claims })
    }
}
