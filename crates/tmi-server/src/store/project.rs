//! Projects form a directed graph over typed relationships. Cycle
//! detection is a plain BFS over an adjacency query, depth-capped at 10;
//! no in-memory reference cycles are used to represent the graph.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{ApiError, StoreError};
use crate::model::{Project, RelationshipType};

use super::clamp_pagination;

const MAX_CYCLE_DEPTH: usize = 10;

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: Uuid,
    team_id: Uuid,
    name: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Project {
            id: row.id,
            team_id: row.team_id,
            name: row.name,
            description: row.description,
            created_at: row.created_at,
            modified_at: row.modified_at,
        }
    }
}

#[derive(Clone)]
pub struct ProjectStore {
    pool: PgPool,
}

impl ProjectStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, team_id: Uuid, name: &str, description: Option<&str>) -> Result<Project, ApiError> {
        let row: ProjectRow = sqlx::query_as(
            "INSERT INTO projects (team_id, name, description) VALUES ($1,$2,$3)
             RETURNING id, team_id, name, description, created_at, modified_at",
        )
        .bind(team_id)
        .bind(name)
        .bind(description)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    pub async fn get(&self, id: Uuid) -> Result<Project, ApiError> {
        let row: Option<ProjectRow> = sqlx::query_as(
            "SELECT id, team_id, name, description, created_at, modified_at FROM projects WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.ok_or(StoreError::NotFound)?.into())
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Project>, ApiError> {
        let (limit, offset) = clamp_pagination(limit, offset);
        let rows: Vec<ProjectRow> = sqlx::query_as(
            "SELECT id, team_id, name, description, created_at, modified_at FROM projects
             ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Project::from).collect())
    }

    async fn neighbors(&self, id: Uuid, relationship_type: RelationshipType) -> Result<Vec<Uuid>, ApiError> {
        let type_str = format!("{relationship_type:?}");
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT to_project_id FROM project_relationships WHERE from_project_id = $1 AND relationship_type = $2",
        )
        .bind(id)
        .bind(type_str)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// BFS from `to` back toward `from` over `relationship_type`, depth ≤ 10.
    /// A path back to `from` means adding `from -> to` would create a cycle.
    async fn would_cycle(&self, from: Uuid, to: Uuid, relationship_type: RelationshipType) -> Result<bool, ApiError> {
        if from == to {
            return Ok(true);
        }
        let mut visited: HashSet<Uuid> = HashSet::new();
        let mut queue: VecDeque<(Uuid, usize)> = VecDeque::new();
        queue.push_back((to, 0));
        visited.insert(to);
        while let Some((node, depth)) = queue.pop_front() {
            if depth >= MAX_CYCLE_DEPTH {
                continue;
            }
            for next in self.neighbors(node, relationship_type).await? {
                if next == from {
                    return Ok(true);
                }
                if visited.insert(next) {
                    queue.push_back((next, depth + 1));
                }
            }
        }
        Ok(false)
    }

    /// Inserts both the relationship and its symmetric inverse (when one
    /// exists) in a single transaction.
    pub async fn add_relationship(&self, from: Uuid, to: Uuid, relationship_type: RelationshipType) -> Result<(), ApiError> {
        if from == to {
            return Err(ApiError::InvalidInput("a project cannot relate to itself".to_string()));
        }
        if self.would_cycle(from, to, relationship_type).await? {
            return Err(StoreError::Cycle.into());
        }
        let mut tx = self.pool.begin().await?;
        let type_str = format!("{relationship_type:?}");
        sqlx::query("INSERT INTO project_relationships (from_project_id, to_project_id, relationship_type) VALUES ($1,$2,$3)")
            .bind(from)
            .bind(to)
            .bind(&type_str)
            .execute(&mut *tx)
            .await?;
        if let Some(inverse) = relationship_type.inverse() {
            let inverse_str = format!("{inverse:?}");
            sqlx::query("INSERT INTO project_relationships (from_project_id, to_project_id, relationship_type) VALUES ($1,$2,$3)")
                .bind(to)
                .bind(from)
                .bind(&inverse_str)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relationship_debug_strings_are_stable_identifiers() {
        assert_eq!(format!("{:?}", RelationshipType::Parent), "Parent");
        assert_eq!(format!("{:?}", RelationshipType::SupersededBy), "SupersededBy");
    }
}
