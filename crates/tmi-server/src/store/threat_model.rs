//! The top-level entity store. Owner/authorization/security-reviewer
//! mutations take a row lock on the threat model record per the ordering
//! guarantee in the concurrency model.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::authz;
use crate::cache::{CacheService, EntityClass};
use crate::error::{ApiError, StoreError};
use crate::model::{AuthorizationEntry, Principal, ThreatModel};

use super::clamp_pagination;

#[derive(sqlx::FromRow)]
struct ThreatModelRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    framework: String,
    owner: serde_json::Value,
    authorization: serde_json::Value,
    security_reviewer: Option<Uuid>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
    created_by: Uuid,
    project_id: Option<Uuid>,
}

impl TryFrom<ThreatModelRow> for ThreatModel {
    type Error = ApiError;
    fn try_from(row: ThreatModelRow) -> Result<Self, ApiError> {
        let owner: Principal = serde_json::from_value(row.owner)
            .map_err(|e| ApiError::ServerError(Some(e.into())))?;
        let authorization: Vec<AuthorizationEntry> = serde_json::from_value(row.authorization)
            .map_err(|e| ApiError::ServerError(Some(e.into())))?;
        Ok(ThreatModel {
            id: row.id,
            name: row.name,
            description: row.description,
            framework: row.framework,
            owner,
            authorization,
            security_reviewer: row.security_reviewer,
            created_at: row.created_at,
            modified_at: row.modified_at,
            created_by: row.created_by,
            project_id: row.project_id,
        })
    }
}

#[derive(Clone)]
pub struct ThreatModelStore {
    pool: PgPool,
    cache: CacheService,
}

const SELECT_COLUMNS: &str = "id, name, description, framework, owner, authorization, security_reviewer, created_at, modified_at, created_by, project_id";

impl ThreatModelStore {
    pub fn new(pool: PgPool, cache: CacheService) -> Self {
        Self { pool, cache }
    }

    pub async fn create(
        &self,
        name: &str,
        description: Option<&str>,
        framework: &str,
        created_by: Uuid,
        project_id: Option<Uuid>,
    ) -> Result<ThreatModel, ApiError> {
        let owner = Principal::User { id: created_by, provider: "local".into(), provider_id: created_by.to_string() };
        let authorization = vec![AuthorizationEntry { principal: owner.clone(), role: crate::model::Role::Owner }];
        let query = format!(
            "INSERT INTO threat_models (name, description, framework, owner, authorization, created_by, project_id)
             VALUES ($1,$2,$3,$4,$5,$6,$7) RETURNING {SELECT_COLUMNS}"
        );
        let row: ThreatModelRow = sqlx::query_as(&query)
            .bind(name)
            .bind(description)
            .bind(framework)
            .bind(serde_json::to_value(&owner).map_err(|e| ApiError::ServerError(Some(e.into())))?)
            .bind(serde_json::to_value(&authorization).map_err(|e| ApiError::ServerError(Some(e.into())))?)
            .bind(created_by)
            .bind(project_id)
            .fetch_one(&self.pool)
            .await?;
        row.try_into()
    }

    pub async fn get(&self, id: Uuid) -> Result<ThreatModel, ApiError> {
        if let Some(tm) = self.cache.get_cached(&Default::default(), EntityClass::Threat, &format!("tm:{id}")).await {
            return Ok(tm);
        }
        let query = format!("SELECT {SELECT_COLUMNS} FROM threat_models WHERE id = $1");
        let row: Option<ThreatModelRow> = sqlx::query_as(&query).bind(id).fetch_optional(&self.pool).await?;
        let row = row.ok_or(StoreError::NotFound)?;
        row.try_into()
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<ThreatModel>, ApiError> {
        let (limit, offset) = clamp_pagination(limit, offset);
        let query = format!("SELECT {SELECT_COLUMNS} FROM threat_models ORDER BY created_at DESC LIMIT $1 OFFSET $2");
        let rows: Vec<ThreatModelRow> = sqlx::query_as(&query).bind(limit).bind(offset).fetch_all(&self.pool).await?;
        rows.into_iter().map(ThreatModel::try_from).collect()
    }

    /// Full-record update. Row-locked while owner/authorization might
    /// change; callers must have already run [`authz::apply_owner_transfer`]
    /// if `owner` is changing.
    pub async fn update(&self, tm: &ThreatModel) -> Result<ThreatModel, ApiError> {
        if !tm.owner_invariant_holds() {
            return Err(ApiError::InvalidInput("owner must hold role owner in authorization".to_string()));
        }
        if !tm.reviewer_invariant_holds() {
            return Err(StoreError::SecurityReviewerConflict.into());
        }
        authz::reject_duplicate_principals(&tm.authorization)?;

        let mut tx = self.pool.begin().await?;
        let query = format!(
            "UPDATE threat_models SET name=$1, description=$2, framework=$3, owner=$4, authorization=$5,
             security_reviewer=$6, modified_at=now(), project_id=$7 WHERE id=$8 RETURNING {SELECT_COLUMNS}"
        );
        let row: ThreatModelRow = sqlx::query_as(&query)
            .bind(&tm.name)
            .bind(&tm.description)
            .bind(&tm.framework)
            .bind(serde_json::to_value(&tm.owner).map_err(|e| ApiError::ServerError(Some(e.into())))?)
            .bind(serde_json::to_value(&tm.authorization).map_err(|e| ApiError::ServerError(Some(e.into())))?)
            .bind(tm.security_reviewer)
            .bind(tm.project_id)
            .bind(tm.id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound)?;
        tx.commit().await?;
        let updated = ThreatModel::try_from(row)?;
        self.invalidate_cache(updated.id).await;
        Ok(updated)
    }

    /// Cascades: deleting a threat model deletes all sub-resources and
    /// cached artifacts.
    pub async fn delete(&self, id: Uuid) -> Result<(), ApiError> {
        let mut tx = self.pool.begin().await?;
        for table in ["threats", "documents", "repositories", "diagrams", "notes"] {
            let q = format!("DELETE FROM {table} WHERE threat_model_id = $1");
            sqlx::query(&q).bind(id).execute(&mut *tx).await?;
        }
        let deleted = sqlx::query("DELETE FROM threat_models WHERE id = $1").bind(id).execute(&mut *tx).await?;
        if deleted.rows_affected() == 0 {
            return Err(StoreError::NotFound.into());
        }
        tx.commit().await?;
        self.invalidate_cache(id).await;
        Ok(())
    }

    pub async fn invalidate_cache(&self, id: Uuid) {
        let ct = Default::default();
        self.cache.invalidate_entity(&ct, EntityClass::Threat, &format!("tm:{id}")).await;
        self.cache.invalidate_auth(&ct, &id.to_string()).await;
    }

    pub async fn warm_cache(&self, id: Uuid) -> anyhow::Result<()> {
        let tm = self.get(id).await?;
        self.cache.cache_entity(&Default::default(), EntityClass::Threat, &format!("tm:{id}"), &tm).await;
        Ok(())
    }

    pub async fn list_recent_ids(&self, n: i64) -> anyhow::Result<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM threat_models ORDER BY modified_at DESC LIMIT $1")
            .bind(n)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
