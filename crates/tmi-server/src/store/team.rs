use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{ApiError, StoreError};
use crate::model::{Team, TeamMember};

use super::clamp_pagination;

#[derive(sqlx::FromRow)]
struct TeamRow {
    id: Uuid,
    name: String,
    members: serde_json::Value,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

impl TryFrom<TeamRow> for Team {
    type Error = ApiError;
    fn try_from(row: TeamRow) -> Result<Self, ApiError> {
        let members: Vec<TeamMember> =
            serde_json::from_value(row.members).map_err(|e| ApiError::ServerError(Some(e.into())))?;
        Ok(Team { id: row.id, name: row.name, members, created_at: row.created_at, modified_at: row.modified_at })
    }
}

#[derive(Clone)]
pub struct TeamStore {
    pool: PgPool,
}

impl TeamStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, name: &str) -> Result<Team, ApiError> {
        let row: TeamRow = sqlx::query_as(
            "INSERT INTO teams (name, members) VALUES ($1, '[]'::jsonb)
             RETURNING id, name, members, created_at, modified_at",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    pub async fn get(&self, id: Uuid) -> Result<Team, ApiError> {
        let row: Option<TeamRow> =
            sqlx::query_as("SELECT id, name, members, created_at, modified_at FROM teams WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.ok_or(StoreError::NotFound)?.try_into()
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Team>, ApiError> {
        let (limit, offset) = clamp_pagination(limit, offset);
        let rows: Vec<TeamRow> = sqlx::query_as(
            "SELECT id, name, members, created_at, modified_at FROM teams ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Team::try_from).collect()
    }

    pub async fn add_member(&self, team_id: Uuid, member: TeamMember) -> Result<Team, ApiError> {
        let mut team = self.get(team_id).await?;
        if team.members.iter().any(|m| m.user_id == member.user_id) {
            return Err(ApiError::Conflict("user is already a team member".to_string()));
        }
        team.members.push(member);
        let row: TeamRow = sqlx::query_as(
            "UPDATE teams SET members = $1, modified_at = now() WHERE id = $2
             RETURNING id, name, members, created_at, modified_at",
        )
        .bind(serde_json::to_value(&team.members).map_err(|e| ApiError::ServerError(Some(e.into())))?)
        .bind(team_id)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }
}
