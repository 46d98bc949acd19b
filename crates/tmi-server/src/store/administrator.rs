use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{ApiError, StoreError};
use crate::model::{Administrator, Principal};

use super::clamp_pagination;

#[derive(sqlx::FromRow)]
struct AdministratorRow {
    id: Uuid,
    principal: serde_json::Value,
    provider_namespace: String,
    granted_at: DateTime<Utc>,
    granted_by: Uuid,
}

impl TryFrom<AdministratorRow> for Administrator {
    type Error = ApiError;
    fn try_from(row: AdministratorRow) -> Result<Self, ApiError> {
        let principal: Principal =
            serde_json::from_value(row.principal).map_err(|e| ApiError::ServerError(Some(e.into())))?;
        Ok(Administrator {
            id: row.id,
            principal,
            provider_namespace: row.provider_namespace,
            granted_at: row.granted_at,
            granted_by: row.granted_by,
        })
    }
}

#[derive(Clone)]
pub struct AdministratorStore {
    pool: PgPool,
}

impl AdministratorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn grant(&self, principal: Principal, provider_namespace: &str, granted_by: Uuid) -> Result<Administrator, ApiError> {
        let row: AdministratorRow = sqlx::query_as(
            "INSERT INTO administrators (principal, provider_namespace, granted_by)
             VALUES ($1,$2,$3) RETURNING id, principal, provider_namespace, granted_at, granted_by",
        )
        .bind(serde_json::to_value(&principal).map_err(|e| ApiError::ServerError(Some(e.into())))?)
        .bind(provider_namespace)
        .bind(granted_by)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Administrator>, ApiError> {
        let (limit, offset) = clamp_pagination(limit, offset);
        let rows: Vec<AdministratorRow> = sqlx::query_as(
            "SELECT id, principal, provider_namespace, granted_at, granted_by FROM administrators
             ORDER BY granted_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Administrator::try_from).collect()
    }

    pub async fn revoke(&self, id: Uuid) -> Result<(), ApiError> {
        let res = sqlx::query("DELETE FROM administrators WHERE id = $1").bind(id).execute(&self.pool).await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound.into());
        }
        Ok(())
    }

    /// True if `user_id` or any of `groups` is recorded as an administrator
    /// principal.
    pub async fn is_admin(&self, user_id: Uuid, groups: &[Uuid]) -> Result<bool, ApiError> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM administrators WHERE (principal->>'id')::uuid = $1 OR (principal->>'id')::uuid = ANY($2) LIMIT 1",
        )
        .bind(user_id)
        .bind(groups)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }
}
