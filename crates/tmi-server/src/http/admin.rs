//! `/admin/*` — restricted to recorded administrator principals. Every
//! handler here re-checks admin status itself rather than relying on a
//! shared middleware gate, since the resources differ enough (users,
//! groups, settings, administrators) that no single authorization check
//! covers all of them.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ApiError;
use crate::model::{Administrator, Group, Principal, SettingType, SystemSetting, User};

use super::extract::AuthUser;
use super::state::AppState;
use super::threat_models::ListParams;

async fn require_admin(state: &AppState, user: &AuthUser) -> Result<(), ApiError> {
    if state.administrators.is_admin(user.user_id, &user.groups).await? {
        Ok(())
    } else {
        Err(ApiError::Forbidden("administrator access required".to_string()))
    }
}

pub mod users {
    use super::*;

    pub async fn list(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Query(params): Query<ListParams>,
    ) -> Result<Json<Vec<User>>, ApiError> {
        require_admin(&state, &user).await?;
        Ok(Json(state.users.list(params.limit, params.offset).await?))
    }

    pub async fn get(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(id): Path<Uuid>,
    ) -> Result<Json<User>, ApiError> {
        require_admin(&state, &user).await?;
        Ok(Json(state.users.get(id).await?))
    }

    pub async fn delete(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(id): Path<Uuid>,
    ) -> Result<axum::http::StatusCode, ApiError> {
        require_admin(&state, &user).await?;
        state.users.delete(id).await?;
        Ok(axum::http::StatusCode::NO_CONTENT)
    }
}

pub mod groups {
    use super::*;

    #[derive(Debug, Deserialize)]
    pub struct CreateGroup {
        pub provider: String,
        pub group_name: String,
    }

    pub async fn list(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Query(params): Query<ListParams>,
    ) -> Result<Json<Vec<Group>>, ApiError> {
        require_admin(&state, &user).await?;
        Ok(Json(state.groups.list(params.limit, params.offset).await?))
    }

    pub async fn create(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Json(body): Json<CreateGroup>,
    ) -> Result<Json<Group>, ApiError> {
        require_admin(&state, &user).await?;
        Ok(Json(state.groups.create(&body.provider, &body.group_name).await?))
    }

    pub async fn get(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(id): Path<Uuid>,
    ) -> Result<Json<Group>, ApiError> {
        require_admin(&state, &user).await?;
        Ok(Json(state.groups.get(id).await?))
    }

    #[derive(Debug, Deserialize)]
    pub struct RenameGroup {
        pub group_name: String,
    }

    pub async fn put(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(id): Path<Uuid>,
        Json(body): Json<RenameGroup>,
    ) -> Result<Json<Group>, ApiError> {
        require_admin(&state, &user).await?;
        Ok(Json(state.groups.rename(id, &body.group_name).await?))
    }

    pub async fn patch(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(id): Path<Uuid>,
        Json(raw): Json<Map<String, Value>>,
    ) -> Result<Json<Group>, ApiError> {
        require_admin(&state, &user).await?;
        let group = state.groups.get(id).await?;
        let group_name = raw.get("group_name").and_then(Value::as_str).unwrap_or(&group.group_name);
        Ok(Json(state.groups.rename(id, group_name).await?))
    }

    pub async fn delete(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(id): Path<Uuid>,
    ) -> Result<axum::http::StatusCode, ApiError> {
        require_admin(&state, &user).await?;
        state.groups.delete(id).await?;
        Ok(axum::http::StatusCode::NO_CONTENT)
    }
}

pub mod settings {
    use super::*;

    #[derive(Debug, Deserialize)]
    pub struct UpsertSetting {
        pub value: String,
        pub setting_type: SettingType,
        pub description: Option<String>,
    }

    pub async fn get(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(key): Path<String>,
    ) -> Result<Json<SystemSetting>, ApiError> {
        require_admin(&state, &user).await?;
        Ok(Json(state.settings.get(&key).await?))
    }

    pub async fn put(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(key): Path<String>,
        Json(body): Json<UpsertSetting>,
    ) -> Result<Json<SystemSetting>, ApiError> {
        require_admin(&state, &user).await?;
        Ok(Json(state.settings.upsert(&key, &body.value, body.setting_type, body.description.as_deref(), user.user_id).await?))
    }

    pub async fn patch(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(key): Path<String>,
        Json(raw): Json<Map<String, Value>>,
    ) -> Result<Json<SystemSetting>, ApiError> {
        require_admin(&state, &user).await?;
        let existing = state.settings.get(&key).await?;
        let value = raw.get("value").and_then(Value::as_str).unwrap_or(&existing.value);
        let description = raw
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(existing.description);
        Ok(Json(state.settings.upsert(&key, value, existing.setting_type, description.as_deref(), user.user_id).await?))
    }

    pub async fn delete(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(key): Path<String>,
    ) -> Result<axum::http::StatusCode, ApiError> {
        require_admin(&state, &user).await?;
        state.settings.delete(&key).await?;
        Ok(axum::http::StatusCode::NO_CONTENT)
    }

    #[derive(Debug, Deserialize)]
    pub struct MigrateParams {
        #[serde(default)]
        pub overwrite: bool,
    }

    pub async fn migrate(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Query(params): Query<MigrateParams>,
    ) -> Result<axum::http::StatusCode, ApiError> {
        require_admin(&state, &user).await?;
        state.settings.migrate(params.overwrite).await?;
        Ok(axum::http::StatusCode::ACCEPTED)
    }
}

pub mod administrators {
    use super::*;

    #[derive(Debug, Deserialize)]
    pub struct GrantAdministrator {
        pub principal: Principal,
        pub provider_namespace: String,
    }

    pub async fn list(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Query(params): Query<ListParams>,
    ) -> Result<Json<Vec<Administrator>>, ApiError> {
        require_admin(&state, &user).await?;
        Ok(Json(state.administrators.list(params.limit, params.offset).await?))
    }

    pub async fn create(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Json(body): Json<GrantAdministrator>,
    ) -> Result<Json<Administrator>, ApiError> {
        require_admin(&state, &user).await?;
        Ok(Json(state.administrators.grant(body.principal, &body.provider_namespace, user.user_id).await?))
    }

    pub async fn delete(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(id): Path<Uuid>,
    ) -> Result<axum::http::StatusCode, ApiError> {
        require_admin(&state, &user).await?;
        state.administrators.revoke(id).await?;
        Ok(axum::http::StatusCode::NO_CONTENT)
    }
}
