use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{ApiError, StoreError};
use crate::model::{EVERYONE_ID, Group};

use super::clamp_pagination;

#[derive(sqlx::FromRow)]
struct GroupRow {
    id: Uuid,
    provider: String,
    group_name: String,
    first_used: Option<DateTime<Utc>>,
    last_used: Option<DateTime<Utc>>,
    usage_count: i64,
}

impl From<GroupRow> for Group {
    fn from(row: GroupRow) -> Self {
        Group {
            id: row.id,
            provider: row.provider,
            group_name: row.group_name,
            first_used: row.first_used,
            last_used: row.last_used,
            usage_count: row.usage_count,
        }
    }
}

#[derive(Clone)]
pub struct GroupStore {
    pool: PgPool,
}

impl GroupStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, provider: &str, group_name: &str) -> Result<Group, ApiError> {
        let row: GroupRow = sqlx::query_as(
            "INSERT INTO groups (provider, group_name, usage_count) VALUES ($1,$2,0)
             RETURNING id, provider, group_name, first_used, last_used, usage_count",
        )
        .bind(provider)
        .bind(group_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    pub async fn get(&self, id: Uuid) -> Result<Group, ApiError> {
        let row: Option<GroupRow> = sqlx::query_as(
            "SELECT id, provider, group_name, first_used, last_used, usage_count FROM groups WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.ok_or(StoreError::NotFound)?.into())
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Group>, ApiError> {
        let (limit, offset) = clamp_pagination(limit, offset);
        let rows: Vec<GroupRow> = sqlx::query_as(
            "SELECT id, provider, group_name, first_used, last_used, usage_count FROM groups
             ORDER BY group_name LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Group::from).collect())
    }

    /// The "everyone" pseudo-group cannot receive membership mutations;
    /// rejected before reaching the database.
    pub async fn add_member(&self, group_id: Uuid, user_id: Uuid) -> Result<(), ApiError> {
        crate::authz::reject_everyone_membership_mutation(group_id)?;
        if group_id == EVERYONE_ID {
            unreachable!("rejected above");
        }
        let existing: Option<(Uuid,)> =
            sqlx::query_as("SELECT user_id FROM group_members WHERE group_id = $1 AND user_id = $2")
                .bind(group_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        if existing.is_some() {
            return Err(crate::error::StoreError::DuplicateMembership.into());
        }
        sqlx::query("INSERT INTO group_members (group_id, user_id) VALUES ($1,$2)")
            .bind(group_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("UPDATE groups SET usage_count = usage_count + 1, last_used = now(), first_used = COALESCE(first_used, now()) WHERE id = $1")
            .bind(group_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_member(&self, group_id: Uuid, user_id: Uuid) -> Result<(), ApiError> {
        crate::authz::reject_everyone_membership_mutation(group_id)?;
        let res = sqlx::query("DELETE FROM group_members WHERE group_id = $1 AND user_id = $2")
            .bind(group_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound.into());
        }
        Ok(())
    }

    pub async fn rename(&self, id: Uuid, group_name: &str) -> Result<Group, ApiError> {
        let row: Option<GroupRow> = sqlx::query_as(
            "UPDATE groups SET group_name = $1 WHERE id = $2
             RETURNING id, provider, group_name, first_used, last_used, usage_count",
        )
        .bind(group_name)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.ok_or(StoreError::NotFound)?.into())
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), ApiError> {
        let res = sqlx::query("DELETE FROM groups WHERE id = $1").bind(id).execute(&self.pool).await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound.into());
        }
        Ok(())
    }

    pub async fn members_of(&self, user_id: Uuid) -> Result<Vec<Uuid>, ApiError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as("SELECT group_id FROM group_members WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
