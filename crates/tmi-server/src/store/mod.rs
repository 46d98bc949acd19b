//! One store per entity class, each backed by `sqlx::PgPool`. Stores expose
//! `Create/Get/Update/Patch/Delete/List/BulkCreate/BulkUpdate/
//! InvalidateCache/WarmCache`; multi-row mutations run inside a transaction.

pub mod administrator;
pub mod group;
pub mod project;
pub mod settings;
pub mod sub_resource;
pub mod team;
pub mod threat_model;
pub mod user;
pub mod webhook;

pub use administrator::AdministratorStore;
pub use group::GroupStore;
pub use project::ProjectStore;
pub use settings::SystemSettingStore;
pub use team::TeamStore;
pub use threat_model::ThreatModelStore;
pub use user::UserStore;
pub use webhook::{AddonStore, InvocationStore, WebhookStore};

/// `limit ∈ [1,100]`, `offset ≥ 0`.
pub fn clamp_pagination(limit: i64, offset: i64) -> (i64, i64) {
    (limit.clamp(1, 100), offset.max(0))
}

/// Bulk create/update caps at 50 items per call (20 for patch).
pub const BULK_MAX: usize = 50;
pub const BULK_PATCH_MAX: usize = 20;
pub const BATCH_DELETE_MAX: usize = 50;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_clamps_to_documented_bounds() {
        assert_eq!(clamp_pagination(0, -5), (1, 0));
        assert_eq!(clamp_pagination(500, 10), (100, 10));
        assert_eq!(clamp_pagination(30, 10), (30, 10));
    }
}
