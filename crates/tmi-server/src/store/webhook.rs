//! Webhooks, the add-ons that bind them to a threat model, and the
//! invocations add-ons spawn. Deleting a webhook cascades to its add-ons
//! and fails if active invocations remain.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{ApiError, StoreError};
use crate::model::{Addon, Invocation, InvocationStatus, Webhook};

#[derive(sqlx::FromRow)]
struct WebhookRow {
    id: Uuid,
    url: String,
    secret: Option<String>,
    created_at: DateTime<Utc>,
}
impl From<WebhookRow> for Webhook {
    fn from(row: WebhookRow) -> Self {
        Webhook { id: row.id, url: row.url, secret: row.secret, created_at: row.created_at }
    }
}

#[derive(Clone)]
pub struct WebhookStore {
    pool: PgPool,
}

impl WebhookStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, url: &str, secret: Option<&str>) -> Result<Webhook, ApiError> {
        let row: WebhookRow = sqlx::query_as(
            "INSERT INTO webhooks (url, secret) VALUES ($1,$2) RETURNING id, url, secret, created_at",
        )
        .bind(url)
        .bind(secret)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    /// Fails if any add-on bound to this webhook has an active invocation.
    pub async fn delete(&self, id: Uuid) -> Result<(), ApiError> {
        let active: (i64,) = sqlx::query_as(
            "SELECT count(*) FROM invocations i JOIN addons a ON a.id = i.addon_id
             WHERE a.webhook_id = $1 AND i.status IN ('pending','in_progress')",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        if active.0 > 0 {
            return Err(ApiError::Conflict("webhook has add-ons with active invocations".to_string()));
        }
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM addons WHERE webhook_id = $1").bind(id).execute(&mut *tx).await?;
        let res = sqlx::query("DELETE FROM webhooks WHERE id = $1").bind(id).execute(&mut *tx).await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound.into());
        }
        tx.commit().await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct AddonRow {
    id: Uuid,
    webhook_id: Uuid,
    threat_model_id: Option<Uuid>,
    name: String,
    created_at: DateTime<Utc>,
}
impl From<AddonRow> for Addon {
    fn from(row: AddonRow) -> Self {
        Addon { id: row.id, webhook_id: row.webhook_id, threat_model_id: row.threat_model_id, name: row.name, created_at: row.created_at }
    }
}

#[derive(Clone)]
pub struct AddonStore {
    pool: PgPool,
}

impl AddonStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, webhook_id: Uuid, threat_model_id: Option<Uuid>, name: &str) -> Result<Addon, ApiError> {
        let row: AddonRow = sqlx::query_as(
            "INSERT INTO addons (webhook_id, threat_model_id, name) VALUES ($1,$2,$3)
             RETURNING id, webhook_id, threat_model_id, name, created_at",
        )
        .bind(webhook_id)
        .bind(threat_model_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }
}

#[derive(sqlx::FromRow)]
struct InvocationRow {
    id: Uuid,
    addon_id: Uuid,
    status: String,
    created_at: DateTime<Utc>,
}
impl TryFrom<InvocationRow> for Invocation {
    type Error = ApiError;
    fn try_from(row: InvocationRow) -> Result<Self, ApiError> {
        let status = match row.status.as_str() {
            "pending" => InvocationStatus::Pending,
            "in_progress" => InvocationStatus::InProgress,
            "succeeded" => InvocationStatus::Succeeded,
            "failed" => InvocationStatus::Failed,
            other => return Err(ApiError::ServerError(Some(anyhow::anyhow!("unknown invocation status {other}")))),
        };
        Ok(Invocation { id: row.id, addon_id: row.addon_id, status, created_at: row.created_at })
    }
}

/// Active invocation counts are read through the KV store per the spec's
/// data model note; this falls back to a SQL count when KV is absent.
#[derive(Clone)]
pub struct InvocationStore {
    pool: PgPool,
    kv: crate::kv::KvClient,
}

impl InvocationStore {
    pub fn new(pool: PgPool, kv: crate::kv::KvClient) -> Self {
        Self { pool, kv }
    }

    pub async fn create(&self, addon_id: Uuid) -> Result<Invocation, ApiError> {
        let row: InvocationRow = sqlx::query_as(
            "INSERT INTO invocations (addon_id, status) VALUES ($1,'pending')
             RETURNING id, addon_id, status, created_at",
        )
        .bind(addon_id)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    pub async fn set_status(&self, id: Uuid, status: InvocationStatus) -> Result<Invocation, ApiError> {
        let status_str = match status {
            InvocationStatus::Pending => "pending",
            InvocationStatus::InProgress => "in_progress",
            InvocationStatus::Succeeded => "succeeded",
            InvocationStatus::Failed => "failed",
        };
        let row: InvocationRow = sqlx::query_as(
            "UPDATE invocations SET status = $1 WHERE id = $2 RETURNING id, addon_id, status, created_at",
        )
        .bind(status_str)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;
        row.try_into()
    }

    pub async fn active_count(&self, addon_id: Uuid) -> Result<i64, ApiError> {
        if self.kv.is_present() {
            let ct = Default::default();
            let key = format!("tmi:invocations:active:{addon_id}");
            if let Ok(Some(v)) = self.kv.get(&ct, &key).await {
                if let Ok(n) = v.parse::<i64>() {
                    return Ok(n);
                }
            }
        }
        let row: (i64,) = sqlx::query_as(
            "SELECT count(*) FROM invocations WHERE addon_id = $1 AND status IN ('pending','in_progress')",
        )
        .bind(addon_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }
}
