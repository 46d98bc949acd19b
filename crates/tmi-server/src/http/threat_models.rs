//! `/threat_models` and its nested sub-resource surface.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::authz::{self};
use crate::error::ApiError;
use crate::model::{AuthorizationEntry, Principal, Role, Severity, ThreatModel};
use crate::validation::{self, ValidatorConfig};

use super::extract::AuthUser;
use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}
fn default_limit() -> i64 {
    20
}

/// A principal's role must be resolved from the record itself; this loads
/// one threat model and checks the caller holds at least `required`.
async fn load_authorized(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    required: Role,
) -> Result<ThreatModel, ApiError> {
    let tm = state.threat_models.get(id).await?;
    if !authz::check_resource_access(user.user_id, &user.groups, &tm, required) {
        return Err(ApiError::Forbidden("insufficient role on this threat model".to_string()));
    }
    Ok(tm)
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<ThreatModel>>, ApiError> {
    let all = state.threat_models.list(params.limit, params.offset).await?;
    let visible: Vec<ThreatModel> = all
        .into_iter()
        .filter(|tm| authz::check_resource_access(user.user_id, &user.groups, tm, Role::Reader))
        .collect();
    Ok(Json(visible))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(raw): Json<Map<String, Value>>,
) -> Result<Json<ThreatModel>, ApiError> {
    validation::validate_request(&ValidatorConfig::THREAT_MODEL_CREATE, &raw)?;
    let name = raw.get("name").and_then(Value::as_str).unwrap_or_default();
    let framework = raw.get("framework").and_then(Value::as_str).unwrap_or_default();
    let description = raw.get("description").and_then(Value::as_str);
    let project_id = raw.get("project_id").and_then(Value::as_str).and_then(|s| Uuid::parse_str(s).ok());

    let tm = state.threat_models.create(name, description, framework, user.user_id, project_id).await?;
    state
        .events
        .emit(&Default::default(), crate::events::EventPayload {
            event_type: crate::events::EventType::ThreatModelCreated,
            threat_model_id: Some(tm.id),
            resource_id: tm.id,
            resource_type: "threat_model",
            owner_id: user.user_id,
            timestamp: None,
            data: serde_json::json!({ "name": tm.name }),
        })
        .await
        .ok();
    Ok(Json(tm))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ThreatModel>, ApiError> {
    Ok(Json(load_authorized(&state, &user, id, Role::Reader).await?))
}

#[derive(Debug, Deserialize)]
pub struct PutBody {
    pub name: String,
    pub description: Option<String>,
    pub framework: String,
    pub owner: Option<Principal>,
    pub authorization: Vec<AuthorizationEntry>,
    pub security_reviewer: Option<Uuid>,
    pub project_id: Option<Uuid>,
}

pub async fn put(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(raw): Json<Map<String, Value>>,
) -> Result<Json<ThreatModel>, ApiError> {
    validation::validate_request(&ValidatorConfig::THREAT_MODEL_UPDATE, &raw)?;
    let body: PutBody = serde_json::from_value(Value::Object(raw)).map_err(|e| ApiError::InvalidInput(e.to_string()))?;

    let mut tm = load_authorized(&state, &user, id, Role::Writer).await?;
    let role = authz::resolve_role(user.user_id, &user.groups, &tm).unwrap();
    authz::guard_owner_only_fields(role, &tm, body.owner.as_ref(), &body.authorization, body.security_reviewer)?;

    if let Some(new_owner) = body.owner {
        if new_owner.identity() != tm.owner.identity() {
            authz::apply_owner_transfer(user.user_id, &mut tm, new_owner)?;
        }
    }
    authz::validate_authorization_patch(tm.security_reviewer, body.security_reviewer, &body.authorization)?;

    tm.name = body.name;
    tm.description = body.description;
    tm.framework = body.framework;
    tm.authorization = body.authorization;
    tm.security_reviewer = body.security_reviewer;
    tm.project_id = body.project_id;

    let updated = state.threat_models.update(&tm).await?;
    state
        .events
        .emit(&Default::default(), crate::events::EventPayload {
            event_type: crate::events::EventType::ThreatModelUpdated,
            threat_model_id: Some(updated.id),
            resource_id: updated.id,
            resource_type: "threat_model",
            owner_id: user.user_id,
            timestamp: None,
            data: serde_json::json!({}),
        })
        .await
        .ok();
    Ok(Json(updated))
}

/// A patch is a partial merge of the same fields `put` accepts; authorization
/// and security-reviewer rules apply identically.
pub async fn patch(
    state: State<Arc<AppState>>,
    user: AuthUser,
    path: Path<Uuid>,
    Json(raw): Json<Map<String, Value>>,
) -> Result<Json<ThreatModel>, ApiError> {
    let State(ref app) = state;
    let Path(id) = path;
    let mut tm = load_authorized(app, &user, id, Role::Writer).await?;
    let role = authz::resolve_role(user.user_id, &user.groups, &tm).unwrap();

    if let Some(name) = raw.get("name").and_then(Value::as_str) {
        tm.name = name.to_string();
    }
    if raw.contains_key("description") {
        tm.description = raw.get("description").and_then(Value::as_str).map(str::to_string);
    }
    if let Some(framework) = raw.get("framework").and_then(Value::as_str) {
        tm.framework = framework.to_string();
    }

    let new_owner: Option<Principal> = raw
        .get("owner")
        .map(|v| serde_json::from_value(v.clone()).map_err(|e| ApiError::InvalidInput(e.to_string())))
        .transpose()?;
    let new_authorization: Vec<AuthorizationEntry> = match raw.get("authorization") {
        Some(auth_val) => serde_json::from_value(auth_val.clone()).map_err(|e| ApiError::InvalidInput(e.to_string()))?,
        None => tm.authorization.clone(),
    };
    let new_security_reviewer = if raw.contains_key("security_reviewer") {
        raw.get("security_reviewer").and_then(Value::as_str).and_then(|s| Uuid::parse_str(s).ok())
    } else {
        tm.security_reviewer
    };
    authz::guard_owner_only_fields(role, &tm, new_owner.as_ref(), &new_authorization, new_security_reviewer)?;

    if let Some(new_owner) = new_owner {
        if new_owner.identity() != tm.owner.identity() {
            authz::apply_owner_transfer(user.user_id, &mut tm, new_owner)?;
        }
    }
    if raw.contains_key("authorization") || raw.contains_key("security_reviewer") {
        authz::validate_authorization_patch(tm.security_reviewer, new_security_reviewer, &new_authorization)?;
        tm.authorization = new_authorization;
        tm.security_reviewer = new_security_reviewer;
    }

    let updated = app.threat_models.update(&tm).await?;
    Ok(Json(updated))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<axum::http::StatusCode, ApiError> {
    load_authorized(&state, &user, id, Role::Owner).await?;
    state.threat_models.delete(id).await?;
    state
        .events
        .emit(&Default::default(), crate::events::EventPayload {
            event_type: crate::events::EventType::ThreatModelDeleted,
            threat_model_id: Some(id),
            resource_id: id,
            resource_type: "threat_model",
            owner_id: user.user_id,
            timestamp: None,
            data: serde_json::json!({}),
        })
        .await
        .ok();
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// Threats are representative of the threats/documents/repositorys/diagrams
/// nested surface — the bulk/batch variants in [`super::batch`] generalize
/// over the same four resource kinds.
pub mod threats {
    use super::*;
    use crate::model::Threat;

    pub async fn list(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(tm_id): Path<Uuid>,
        Query(params): Query<ListParams>,
    ) -> Result<Json<Vec<Threat>>, ApiError> {
        load_authorized(&state, &user, tm_id, Role::Reader).await?;
        Ok(Json(state.threats.list(tm_id, params.limit, params.offset).await?))
    }

    pub async fn create(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(tm_id): Path<Uuid>,
        Json(raw): Json<Map<String, Value>>,
    ) -> Result<Json<Threat>, ApiError> {
        load_authorized(&state, &user, tm_id, Role::Writer).await?;
        validation::validate_request(&ValidatorConfig::THREAT_CREATE, &raw)?;
        let severity: Severity = raw
            .get("severity")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ApiError::InvalidInput("severity must be one of low|medium|high|critical".to_string()))?;
        let name = raw.get("name").and_then(Value::as_str).unwrap_or_default();
        let description = raw.get("description").and_then(Value::as_str);

        let threat = state.threats.create(tm_id, name, description, severity).await?;
        Ok(Json(threat))
    }

    pub async fn get(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path((tm_id, id)): Path<(Uuid, Uuid)>,
    ) -> Result<Json<Threat>, ApiError> {
        load_authorized(&state, &user, tm_id, Role::Reader).await?;
        Ok(Json(state.threats.get(id).await?))
    }

    pub async fn delete(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path((tm_id, id)): Path<(Uuid, Uuid)>,
    ) -> Result<axum::http::StatusCode, ApiError> {
        load_authorized(&state, &user, tm_id, Role::Writer).await?;
        state.threats.delete(id).await?;
        Ok(axum::http::StatusCode::NO_CONTENT)
    }

    pub async fn bulk_create(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(tm_id): Path<Uuid>,
        Json(items): Json<Vec<Map<String, Value>>>,
    ) -> Result<(axum::http::StatusCode, Json<Vec<super::super::batch::ItemOutcome<Threat>>>), ApiError> {
        load_authorized(&state, &user, tm_id, Role::Writer).await?;
        let outcomes = super::super::batch::execute_sequential(items, crate::store::BULK_MAX, |raw| {
            let state = state.clone();
            async move {
                validation::validate_request(&ValidatorConfig::THREAT_CREATE, &raw)?;
                let severity: Severity = raw
                    .get("severity")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| ApiError::InvalidInput("severity must be one of low|medium|high|critical".to_string()))?;
                let name = raw.get("name").and_then(Value::as_str).unwrap_or_default();
                let description = raw.get("description").and_then(Value::as_str);
                state.threats.create(tm_id, name, description, severity).await
            }
        })
        .await?;
        Ok(super::super::batch::respond(outcomes))
    }

    #[derive(Debug, Deserialize)]
    pub struct BatchDeleteBody {
        pub ids: Vec<Uuid>,
    }

    pub async fn batch_delete(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(tm_id): Path<Uuid>,
        Json(body): Json<BatchDeleteBody>,
    ) -> Result<(axum::http::StatusCode, Json<Vec<super::super::batch::ItemOutcome<()>>>), ApiError> {
        load_authorized(&state, &user, tm_id, Role::Writer).await?;
        let outcomes = super::super::batch::execute_sequential(body.ids, crate::store::BATCH_DELETE_MAX, |id| {
            let state = state.clone();
            async move { state.threats.delete(id).await }
        })
        .await?;
        Ok(super::super::batch::respond(outcomes))
    }

    #[derive(Debug, Deserialize)]
    pub struct BatchPatchItem {
        pub id: Uuid,
        #[serde(flatten)]
        pub fields: Map<String, Value>,
    }

    pub async fn batch_patch(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(tm_id): Path<Uuid>,
        Json(items): Json<Vec<BatchPatchItem>>,
    ) -> Result<(axum::http::StatusCode, Json<Vec<super::super::batch::ItemOutcome<Threat>>>), ApiError> {
        load_authorized(&state, &user, tm_id, Role::Writer).await?;
        let outcomes = super::super::batch::execute_sequential(items, crate::store::BULK_PATCH_MAX, |item| {
            let state = state.clone();
            async move {
                let mut threat = state.threats.get(item.id).await?;
                if let Some(name) = item.fields.get("name").and_then(Value::as_str) {
                    threat.name = name.to_string();
                }
                if let Some(severity) = item.fields.get("severity").and_then(Value::as_str) {
                    threat.severity = severity
                        .parse()
                        .map_err(|_| ApiError::InvalidInput("severity must be one of low|medium|high|critical".to_string()))?;
                }
                if item.fields.contains_key("mitigated") {
                    threat.mitigated = item.fields.get("mitigated").and_then(Value::as_bool).unwrap_or(false);
                }
                state.threats.update(&threat).await
            }
        })
        .await?;
        Ok(super::super::batch::respond(outcomes))
    }
}

/// Documents follow the same list/create/get/delete/bulk/batch-delete shape
/// as [`threats`]; a document's required fields are `name` and `uri`.
pub mod documents {
    use super::*;
    use crate::model::Document;

    pub async fn list(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(tm_id): Path<Uuid>,
        Query(params): Query<ListParams>,
    ) -> Result<Json<Vec<Document>>, ApiError> {
        load_authorized(&state, &user, tm_id, Role::Reader).await?;
        Ok(Json(state.documents.list(tm_id, params.limit, params.offset).await?))
    }

    pub async fn create(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(tm_id): Path<Uuid>,
        Json(raw): Json<Map<String, Value>>,
    ) -> Result<Json<Document>, ApiError> {
        load_authorized(&state, &user, tm_id, Role::Writer).await?;
        validation::validate_request(&ValidatorConfig::DOCUMENT_CREATE, &raw)?;
        let name = raw.get("name").and_then(Value::as_str).unwrap_or_default();
        let uri = raw.get("uri").and_then(Value::as_str).unwrap_or_default();
        let description = raw.get("description").and_then(Value::as_str);
        Ok(Json(state.documents.create(tm_id, name, uri, description).await?))
    }

    pub async fn get(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path((tm_id, id)): Path<(Uuid, Uuid)>,
    ) -> Result<Json<Document>, ApiError> {
        load_authorized(&state, &user, tm_id, Role::Reader).await?;
        Ok(Json(state.documents.get(id).await?))
    }

    pub async fn delete(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path((tm_id, id)): Path<(Uuid, Uuid)>,
    ) -> Result<axum::http::StatusCode, ApiError> {
        load_authorized(&state, &user, tm_id, Role::Writer).await?;
        state.documents.delete(id).await?;
        Ok(axum::http::StatusCode::NO_CONTENT)
    }

    pub async fn bulk_create(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(tm_id): Path<Uuid>,
        Json(items): Json<Vec<Map<String, Value>>>,
    ) -> Result<(axum::http::StatusCode, Json<Vec<super::super::batch::ItemOutcome<Document>>>), ApiError> {
        load_authorized(&state, &user, tm_id, Role::Writer).await?;
        let outcomes = super::super::batch::execute_sequential(items, crate::store::BULK_MAX, |raw| {
            let state = state.clone();
            async move {
                validation::validate_request(&ValidatorConfig::DOCUMENT_CREATE, &raw)?;
                let name = raw.get("name").and_then(Value::as_str).unwrap_or_default();
                let uri = raw.get("uri").and_then(Value::as_str).unwrap_or_default();
                let description = raw.get("description").and_then(Value::as_str);
                state.documents.create(tm_id, name, uri, description).await
            }
        })
        .await?;
        Ok(super::super::batch::respond(outcomes))
    }

    pub async fn batch_delete(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(tm_id): Path<Uuid>,
        Json(body): Json<threats::BatchDeleteBody>,
    ) -> Result<(axum::http::StatusCode, Json<Vec<super::super::batch::ItemOutcome<()>>>), ApiError> {
        load_authorized(&state, &user, tm_id, Role::Writer).await?;
        let outcomes = super::super::batch::execute_sequential(body.ids, crate::store::BATCH_DELETE_MAX, |id| {
            let state = state.clone();
            async move { state.documents.delete(id).await }
        })
        .await?;
        Ok(super::super::batch::respond(outcomes))
    }

    pub async fn batch_patch(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(tm_id): Path<Uuid>,
        Json(items): Json<Vec<threats::BatchPatchItem>>,
    ) -> Result<(axum::http::StatusCode, Json<Vec<super::super::batch::ItemOutcome<Document>>>), ApiError> {
        load_authorized(&state, &user, tm_id, Role::Writer).await?;
        let outcomes = super::super::batch::execute_sequential(items, crate::store::BULK_PATCH_MAX, |item| {
            let state = state.clone();
            async move {
                let mut document = state.documents.get(item.id).await?;
                if let Some(name) = item.fields.get("name").and_then(Value::as_str) {
                    document.name = name.to_string();
                }
                if let Some(uri) = item.fields.get("uri").and_then(Value::as_str) {
                    document.uri = uri.to_string();
                }
                if item.fields.contains_key("description") {
                    document.description = item.fields.get("description").and_then(Value::as_str).map(str::to_string);
                }
                state.documents.update(&document).await
            }
        })
        .await?;
        Ok(super::super::batch::respond(outcomes))
    }
}

/// Repositories add a `repo_type` ("type" on the wire) field over the
/// document shape.
pub mod repositories {
    use super::*;
    use crate::model::Repository;

    pub async fn list(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(tm_id): Path<Uuid>,
        Query(params): Query<ListParams>,
    ) -> Result<Json<Vec<Repository>>, ApiError> {
        load_authorized(&state, &user, tm_id, Role::Reader).await?;
        Ok(Json(state.repositories.list(tm_id, params.limit, params.offset).await?))
    }

    pub async fn create(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(tm_id): Path<Uuid>,
        Json(raw): Json<Map<String, Value>>,
    ) -> Result<Json<Repository>, ApiError> {
        load_authorized(&state, &user, tm_id, Role::Writer).await?;
        validation::validate_request(&ValidatorConfig::REPOSITORY_CREATE, &raw)?;
        let name = raw.get("name").and_then(Value::as_str).unwrap_or_default();
        let uri = raw.get("uri").and_then(Value::as_str).unwrap_or_default();
        let repo_type = raw.get("type").and_then(Value::as_str).unwrap_or_default();
        let description = raw.get("description").and_then(Value::as_str);
        Ok(Json(state.repositories.create(tm_id, name, uri, repo_type, description).await?))
    }

    pub async fn get(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path((tm_id, id)): Path<(Uuid, Uuid)>,
    ) -> Result<Json<Repository>, ApiError> {
        load_authorized(&state, &user, tm_id, Role::Reader).await?;
        Ok(Json(state.repositories.get(id).await?))
    }

    pub async fn delete(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path((tm_id, id)): Path<(Uuid, Uuid)>,
    ) -> Result<axum::http::StatusCode, ApiError> {
        load_authorized(&state, &user, tm_id, Role::Writer).await?;
        state.repositories.delete(id).await?;
        Ok(axum::http::StatusCode::NO_CONTENT)
    }

    pub async fn bulk_create(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(tm_id): Path<Uuid>,
        Json(items): Json<Vec<Map<String, Value>>>,
    ) -> Result<(axum::http::StatusCode, Json<Vec<super::super::batch::ItemOutcome<Repository>>>), ApiError> {
        load_authorized(&state, &user, tm_id, Role::Writer).await?;
        let outcomes = super::super::batch::execute_sequential(items, crate::store::BULK_MAX, |raw| {
            let state = state.clone();
            async move {
                validation::validate_request(&ValidatorConfig::REPOSITORY_CREATE, &raw)?;
                let name = raw.get("name").and_then(Value::as_str).unwrap_or_default();
                let uri = raw.get("uri").and_then(Value::as_str).unwrap_or_default();
                let repo_type = raw.get("type").and_then(Value::as_str).unwrap_or_default();
                let description = raw.get("description").and_then(Value::as_str);
                state.repositories.create(tm_id, name, uri, repo_type, description).await
            }
        })
        .await?;
        Ok(super::super::batch::respond(outcomes))
    }

    pub async fn batch_delete(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(tm_id): Path<Uuid>,
        Json(body): Json<threats::BatchDeleteBody>,
    ) -> Result<(axum::http::StatusCode, Json<Vec<super::super::batch::ItemOutcome<()>>>), ApiError> {
        load_authorized(&state, &user, tm_id, Role::Writer).await?;
        let outcomes = super::super::batch::execute_sequential(body.ids, crate::store::BATCH_DELETE_MAX, |id| {
            let state = state.clone();
            async move { state.repositories.delete(id).await }
        })
        .await?;
        Ok(super::super::batch::respond(outcomes))
    }

    pub async fn batch_patch(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(tm_id): Path<Uuid>,
        Json(items): Json<Vec<threats::BatchPatchItem>>,
    ) -> Result<(axum::http::StatusCode, Json<Vec<super::super::batch::ItemOutcome<Repository>>>), ApiError> {
        load_authorized(&state, &user, tm_id, Role::Writer).await?;
        let outcomes = super::super::batch::execute_sequential(items, crate::store::BULK_PATCH_MAX, |item| {
            let state = state.clone();
            async move {
                let mut repository = state.repositories.get(item.id).await?;
                if let Some(name) = item.fields.get("name").and_then(Value::as_str) {
                    repository.name = name.to_string();
                }
                if let Some(uri) = item.fields.get("uri").and_then(Value::as_str) {
                    repository.uri = uri.to_string();
                }
                if let Some(repo_type) = item.fields.get("type").and_then(Value::as_str) {
                    repository.repo_type = repo_type.to_string();
                }
                if item.fields.contains_key("description") {
                    repository.description = item.fields.get("description").and_then(Value::as_str).map(str::to_string);
                }
                state.repositories.update(&repository).await
            }
        })
        .await?;
        Ok(super::super::batch::respond(outcomes))
    }
}

/// Diagrams carry a `cells` array instead of free-form metadata-first
/// fields; node cells are normalized to the minimum size floor on create.
pub mod diagrams {
    use super::*;
    use crate::model::{Cell, Diagram};

    pub async fn list(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(tm_id): Path<Uuid>,
        Query(params): Query<ListParams>,
    ) -> Result<Json<Vec<Diagram>>, ApiError> {
        load_authorized(&state, &user, tm_id, Role::Reader).await?;
        Ok(Json(state.diagrams.list(tm_id, params.limit, params.offset).await?))
    }

    pub async fn create(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(tm_id): Path<Uuid>,
        Json(raw): Json<Map<String, Value>>,
    ) -> Result<Json<Diagram>, ApiError> {
        load_authorized(&state, &user, tm_id, Role::Writer).await?;
        validation::validate_request(&ValidatorConfig::DIAGRAM_CREATE, &raw)?;
        let name = raw.get("name").and_then(Value::as_str).unwrap_or_default();
        let diagram_type = raw.get("type").and_then(Value::as_str).unwrap_or_default();
        let cells: Vec<Cell> = raw
            .get("cells")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e: serde_json::Error| ApiError::InvalidInput(e.to_string()))?
            .unwrap_or_default();
        Ok(Json(state.diagrams.create(tm_id, name, diagram_type, cells).await?))
    }

    pub async fn get(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path((tm_id, id)): Path<(Uuid, Uuid)>,
    ) -> Result<Json<Diagram>, ApiError> {
        load_authorized(&state, &user, tm_id, Role::Reader).await?;
        Ok(Json(state.diagrams.get(id).await?))
    }

    pub async fn delete(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path((tm_id, id)): Path<(Uuid, Uuid)>,
    ) -> Result<axum::http::StatusCode, ApiError> {
        load_authorized(&state, &user, tm_id, Role::Writer).await?;
        state.diagrams.delete(id).await?;
        Ok(axum::http::StatusCode::NO_CONTENT)
    }

    pub async fn bulk_create(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(tm_id): Path<Uuid>,
        Json(items): Json<Vec<Map<String, Value>>>,
    ) -> Result<(axum::http::StatusCode, Json<Vec<super::super::batch::ItemOutcome<Diagram>>>), ApiError> {
        load_authorized(&state, &user, tm_id, Role::Writer).await?;
        let outcomes = super::super::batch::execute_sequential(items, crate::store::BULK_MAX, |raw| {
            let state = state.clone();
            async move {
                validation::validate_request(&ValidatorConfig::DIAGRAM_CREATE, &raw)?;
                let name = raw.get("name").and_then(Value::as_str).unwrap_or_default();
                let diagram_type = raw.get("type").and_then(Value::as_str).unwrap_or_default();
                let cells: Vec<Cell> = raw
                    .get("cells")
                    .cloned()
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(|e: serde_json::Error| ApiError::InvalidInput(e.to_string()))?
                    .unwrap_or_default();
                state.diagrams.create(tm_id, name, diagram_type, cells).await
            }
        })
        .await?;
        Ok(super::super::batch::respond(outcomes))
    }

    pub async fn batch_delete(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(tm_id): Path<Uuid>,
        Json(body): Json<threats::BatchDeleteBody>,
    ) -> Result<(axum::http::StatusCode, Json<Vec<super::super::batch::ItemOutcome<()>>>), ApiError> {
        load_authorized(&state, &user, tm_id, Role::Writer).await?;
        let outcomes = super::super::batch::execute_sequential(body.ids, crate::store::BATCH_DELETE_MAX, |id| {
            let state = state.clone();
            async move { state.diagrams.delete(id).await }
        })
        .await?;
        Ok(super::super::batch::respond(outcomes))
    }

    pub async fn batch_patch(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(tm_id): Path<Uuid>,
        Json(items): Json<Vec<threats::BatchPatchItem>>,
    ) -> Result<(axum::http::StatusCode, Json<Vec<super::super::batch::ItemOutcome<Diagram>>>), ApiError> {
        load_authorized(&state, &user, tm_id, Role::Writer).await?;
        let outcomes = super::super::batch::execute_sequential(items, crate::store::BULK_PATCH_MAX, |item| {
            let state = state.clone();
            async move {
                let mut diagram = state.diagrams.get(item.id).await?;
                if let Some(name) = item.fields.get("name").and_then(Value::as_str) {
                    diagram.name = name.to_string();
                }
                if let Some(cells) = item.fields.get("cells") {
                    diagram.cells = serde_json::from_value(cells.clone())
                        .map_err(|e| ApiError::InvalidInput(e.to_string()))?;
                }
                state.diagrams.update(&diagram).await
            }
        })
        .await?;
        Ok(super::super::batch::respond(outcomes))
    }
}

/// Notes carry markdown content validated against the template-expression
/// rule; they have no PUT/PATCH surface, matching the append-oriented shape
/// of the rest of the data model's free-text fields.
pub mod notes {
    use super::*;
    use crate::model::Note;

    pub async fn list(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(tm_id): Path<Uuid>,
        Query(params): Query<ListParams>,
    ) -> Result<Json<Vec<Note>>, ApiError> {
        load_authorized(&state, &user, tm_id, Role::Reader).await?;
        Ok(Json(state.notes.list(tm_id, params.limit, params.offset).await?))
    }

    pub async fn create(
        State(state): State<Arc<AppState>>,
        user: AuthUser,
        Path(tm_id): Path<Uuid>,
        Json(raw): Json<Map<String, Value>>,
    ) -> Result<Json<Note>, ApiError> {
        load_authorized(&state, &user, tm_id, Role::Writer).await?;
        let content = raw.get("content").and_then(Value::as_str).unwrap_or_default();
        Ok(Json(state.notes.create(tm_id, content).await?))
    }
}
