use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{ApiError, StoreError};
use crate::model::User;

use super::clamp_pagination;

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    provider: String,
    provider_id: String,
    email: String,
    name: String,
    email_verified: bool,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            provider: row.provider,
            provider_id: row.provider_id,
            email: row.email,
            name: row.name,
            email_verified: row.email_verified,
        }
    }
}

#[derive(Clone)]
pub struct UserStore {
    pool: PgPool,
}

impl UserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upserts on `(provider, provider_id)`, the natural key for an
    /// externally-issued JWT's claims.
    pub async fn upsert_from_claims(
        &self,
        provider: &str,
        provider_id: &str,
        email: &str,
        name: &str,
        email_verified: bool,
    ) -> Result<User, ApiError> {
        let row: UserRow = sqlx::query_as(
            "INSERT INTO users (provider, provider_id, email, name, email_verified)
             VALUES ($1,$2,$3,$4,$5)
             ON CONFLICT (provider, provider_id) DO UPDATE SET email = excluded.email, name = excluded.name, email_verified = excluded.email_verified
             RETURNING id, provider, provider_id, email, name, email_verified",
        )
        .bind(provider)
        .bind(provider_id)
        .bind(email)
        .bind(name)
        .bind(email_verified)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    pub async fn get(&self, id: Uuid) -> Result<User, ApiError> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, provider, provider_id, email, name, email_verified FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.ok_or(StoreError::NotFound)?.into())
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<User>, ApiError> {
        let (limit, offset) = clamp_pagination(limit, offset);
        let rows: Vec<UserRow> = sqlx::query_as(
            "SELECT id, provider, provider_id, email, name, email_verified FROM users ORDER BY email LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), ApiError> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1").bind(id).execute(&self.pool).await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound.into());
        }
        Ok(())
    }
}
