pub mod admin;
pub mod batch;
pub mod collaborate;
pub mod extract;
pub mod jwt;
pub mod meta;
pub mod middleware;
pub mod state;
pub mod threat_models;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, patch, post, put};

use state::AppState;

/// Assembles the full `/` router. `tmi-app` nests this under its bind
/// address; the admin-only surface (`/logging`, `/metrics`) is mounted
/// separately by the caller on `admin_addr` if it wants the two ports
/// split, matching the teacher's dual-listener pattern.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/config", get(meta::config))
        .route("/.well-known/openid-configuration", get(meta::openid_configuration))
        .route("/.well-known/jwks.json", get(meta::jwks))
        .route("/logging", get(meta::get_log_level).post(meta::set_log_level))
        .route("/metrics", get(meta::metrics))
        .nest("/oauth2", auth_flow_stub_router())
        .nest("/saml", auth_flow_stub_router())
        .nest("/threat_models", threat_model_router())
        .nest("/admin", admin_router())
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), middleware::rate_limit))
        .with_state(state)
}

fn auth_flow_stub_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/authorize", get(meta::authflow::unavailable))
        .route("/callback", get(meta::authflow::unavailable))
        .route("/token", post(meta::authflow::unavailable))
        .route("/refresh", post(meta::authflow::unavailable))
        .route("/introspect", post(meta::authflow::unavailable))
        .route("/login", get(meta::authflow::unavailable))
        .route("/acs", post(meta::authflow::unavailable))
        .route("/slo", get(meta::authflow::unavailable))
}

fn threat_model_router() -> Router<Arc<AppState>> {
    use threat_models::{diagrams, documents, notes, repositories, threats};

    Router::new()
        .route("/", get(threat_models::list).post(threat_models::create))
        .route(
            "/{id}",
            get(threat_models::get).put(threat_models::put).patch(threat_models::patch).delete(threat_models::delete),
        )
        .route("/{id}/threats", get(threats::list).post(threats::create))
        .route("/{id}/threats/bulk", post(threats::bulk_create))
        .route("/{id}/threats/batch/delete", post(threats::batch_delete))
        .route("/{id}/threats/batch/patch", patch(threats::batch_patch))
        .route("/{id}/threats/{tid}", get(threats::get).delete(threats::delete))
        .route("/{id}/documents", get(documents::list).post(documents::create))
        .route("/{id}/documents/bulk", post(documents::bulk_create))
        .route("/{id}/documents/batch/delete", post(documents::batch_delete))
        .route("/{id}/documents/batch/patch", patch(documents::batch_patch))
        .route("/{id}/documents/{did}", get(documents::get).delete(documents::delete))
        .route("/{id}/repositorys", get(repositories::list).post(repositories::create))
        .route("/{id}/repositorys/bulk", post(repositories::bulk_create))
        .route("/{id}/repositorys/batch/delete", post(repositories::batch_delete))
        .route("/{id}/repositorys/batch/patch", patch(repositories::batch_patch))
        .route("/{id}/repositorys/{rid}", get(repositories::get).delete(repositories::delete))
        .route("/{id}/diagrams", get(diagrams::list).post(diagrams::create))
        .route("/{id}/diagrams/bulk", post(diagrams::bulk_create))
        .route("/{id}/diagrams/batch/delete", post(diagrams::batch_delete))
        .route("/{id}/diagrams/batch/patch", patch(diagrams::batch_patch))
        .route("/{id}/diagrams/{did}", get(diagrams::get).delete(diagrams::delete))
        .route(
            "/{id}/diagrams/{did}/collaborate",
            get(collaborate::status).post(collaborate::join).delete(collaborate::leave),
        )
        .route("/{id}/notes", get(notes::list).post(notes::create))
}

fn admin_router() -> Router<Arc<AppState>> {
    use admin::{administrators, groups, settings, users};

    Router::new()
        .route("/users", get(users::list))
        .route("/users/{id}", get(users::get).delete(users::delete))
        .route("/groups", get(groups::list).post(groups::create))
        .route("/groups/{id}", get(groups::get).put(groups::put).patch(groups::patch).delete(groups::delete))
        .route("/settings/migrate", post(settings::migrate))
        .route("/settings/{key}", get(settings::get).put(settings::put).patch(settings::patch).delete(settings::delete))
        .route("/administrators", get(administrators::list).post(administrators::create))
        .route("/administrators/{id}", delete(administrators::delete))
}
