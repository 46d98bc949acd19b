//! Diagram collaboration session-lifecycle surface. The WS transport and
//! its CRDT/OT message semantics are a different system; what lives here
//! is just enough to let a client discover, join, and leave a session.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::authz;
use crate::error::ApiError;
use crate::kv::KeyBuilder;
use crate::model::Role;

use super::extract::AuthUser;
use super::state::AppState;

const SESSION_TTL: std::time::Duration = std::time::Duration::from_secs(60 * 30);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationSession {
    pub session_id: Uuid,
    pub diagram_id: Uuid,
    pub participants: Vec<Uuid>,
}

async fn load_session(state: &AppState, diagram_id: Uuid) -> Result<Option<CollaborationSession>, ApiError> {
    let ct = CancellationToken::new();
    let key = KeyBuilder::collab_session(&diagram_id.to_string());
    let Some(raw) = state.kv.get(&ct, &key).await.map_err(|e| ApiError::ServerError(Some(e.into())))? else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_str(&raw).map_err(|e| ApiError::ServerError(Some(e.into())))?))
}

async fn save_session(state: &AppState, session: &CollaborationSession) -> Result<(), ApiError> {
    let ct = CancellationToken::new();
    let key = KeyBuilder::collab_session(&session.diagram_id.to_string());
    let raw = serde_json::to_string(session).map_err(|e| ApiError::ServerError(Some(e.into())))?;
    state.kv.set_ex(&ct, &key, &raw, SESSION_TTL).await.map_err(|e| ApiError::ServerError(Some(e.into())))?;
    Ok(())
}

async fn authorize(state: &AppState, user: &AuthUser, tm_id: Uuid, did: Uuid) -> Result<(), ApiError> {
    let tm = state.threat_models.get(tm_id).await?;
    if !authz::check_resource_access(user.user_id, &user.groups, &tm, Role::Reader) {
        return Err(ApiError::Forbidden("insufficient role on this threat model".to_string()));
    }
    state.diagrams.get(did).await?;
    Ok(())
}

/// `GET` — current session status, or 404 if no one has started one yet.
pub async fn status(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((tm_id, did)): Path<(Uuid, Uuid)>,
) -> Result<Json<CollaborationSession>, ApiError> {
    authorize(&state, &user, tm_id, did).await?;
    let session = load_session(&state, did).await?.ok_or_else(|| {
        ApiError::NotFound(format!("no active collaboration session for diagram {did}"))
    })?;
    Ok(Json(session))
}

/// `POST` — join the session, starting one if none exists yet.
pub async fn join(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((tm_id, did)): Path<(Uuid, Uuid)>,
) -> Result<Json<CollaborationSession>, ApiError> {
    authorize(&state, &user, tm_id, did).await?;
    let mut session = load_session(&state, did).await?.unwrap_or_else(|| CollaborationSession {
        session_id: Uuid::new_v4(),
        diagram_id: did,
        participants: Vec::new(),
    });
    if !session.participants.contains(&user.user_id) {
        session.participants.push(user.user_id);
    }
    save_session(&state, &session).await?;
    Ok(Json(session))
}

/// `DELETE` — leave the session; the session itself is dropped once empty.
pub async fn leave(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((tm_id, did)): Path<(Uuid, Uuid)>,
) -> Result<axum::http::StatusCode, ApiError> {
    authorize(&state, &user, tm_id, did).await?;
    let Some(mut session) = load_session(&state, did).await? else {
        return Ok(axum::http::StatusCode::NO_CONTENT);
    };
    session.participants.retain(|id| *id != user.user_id);
    if session.participants.is_empty() {
        let ct = CancellationToken::new();
        state
            .kv
            .del(&ct, &KeyBuilder::collab_session(&did.to_string()))
            .await
            .map_err(|e| ApiError::ServerError(Some(e.into())))?;
    } else {
        save_session(&state, &session).await?;
    }
    Ok(axum::http::StatusCode::NO_CONTENT)
}
