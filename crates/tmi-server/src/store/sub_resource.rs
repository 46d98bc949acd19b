//! Threats, documents, and repositories share enough shape that the
//! concrete stores here are generated from one macro rather than copied by
//! hand three times; diagrams and notes have distinct column shapes and
//! live in their own modules-worth of code within this file too.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::cache::{CacheService, EntityClass};
use crate::error::{ApiError, StoreError};
use crate::model::{Cell, Diagram, Document, Metadata, Note, Repository, Threat};

use super::{BULK_MAX, clamp_pagination};

macro_rules! sub_resource_store {
    ($store:ident, $table:literal, $row:ident, $model:ty, $class:expr, $columns:literal, $from_row:expr) => {
        #[derive(sqlx::FromRow)]
        struct $row {
            id: Uuid,
            threat_model_id: Uuid,
            rest: serde_json::Value,
            created_at: DateTime<Utc>,
            modified_at: DateTime<Utc>,
        }

        #[derive(Clone)]
        pub struct $store {
            pool: PgPool,
            cache: CacheService,
        }

        impl $store {
            pub fn new(pool: PgPool, cache: CacheService) -> Self {
                Self { pool, cache }
            }

            pub async fn list(&self, threat_model_id: Uuid, limit: i64, offset: i64) -> Result<Vec<$model>, ApiError> {
                let (limit, offset) = clamp_pagination(limit, offset);
                let query = format!(
                    "SELECT {} FROM {} WHERE threat_model_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
                    $columns, $table
                );
                let rows: Vec<$row> = sqlx::query_as(&query)
                    .bind(threat_model_id)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?;
                rows.into_iter().map($from_row).collect()
            }

            pub async fn get(&self, id: Uuid) -> Result<$model, ApiError> {
                let query = format!("SELECT {} FROM {} WHERE id = $1", $columns, $table);
                let row: Option<$row> = sqlx::query_as(&query).bind(id).fetch_optional(&self.pool).await?;
                let row = row.ok_or(StoreError::NotFound)?;
                $from_row(row)
            }

            pub async fn delete(&self, id: Uuid) -> Result<(), ApiError> {
                let query = format!("DELETE FROM {} WHERE id = $1", $table);
                let res = sqlx::query(&query).bind(id).execute(&self.pool).await?;
                if res.rows_affected() == 0 {
                    return Err(StoreError::NotFound.into());
                }
                self.invalidate_cache(id).await;
                Ok(())
            }

            pub async fn invalidate_cache(&self, id: Uuid) {
                self.cache.invalidate_entity(&Default::default(), $class, &id.to_string()).await;
            }

            /// Bulk create caps at 50 items per call.
            pub fn bulk_limit_ok(items_len: usize) -> bool {
                items_len <= BULK_MAX
            }
        }
    };
}

sub_resource_store!(
    ThreatStore,
    "threats",
    ThreatRow,
    Threat,
    EntityClass::Threat,
    "id, threat_model_id, row_to_json(threats.*) as rest, created_at, modified_at",
    row_to_threat
);

fn row_to_threat(row: ThreatRow) -> Result<Threat, ApiError> {
    let mut v = row.rest;
    let obj = v.as_object_mut().ok_or_else(|| ApiError::ServerError(None))?;
    obj.insert("id".into(), serde_json::json!(row.id));
    obj.insert("threat_model_id".into(), serde_json::json!(row.threat_model_id));
    obj.insert("created_at".into(), serde_json::json!(row.created_at));
    obj.insert("modified_at".into(), serde_json::json!(row.modified_at));
    serde_json::from_value(v).map_err(|e| ApiError::ServerError(Some(e.into())))
}

impl ThreatStore {
    pub async fn create(
        &self,
        threat_model_id: Uuid,
        name: &str,
        description: Option<&str>,
        severity: crate::model::Severity,
    ) -> Result<Threat, ApiError> {
        let severity_str = match severity {
            crate::model::Severity::Low => "low",
            crate::model::Severity::Medium => "medium",
            crate::model::Severity::High => "high",
            crate::model::Severity::Critical => "critical",
        };
        let (id,): (Uuid,) = sqlx::query_as(
            "INSERT INTO threats (threat_model_id, name, description, severity, mitigated)
             VALUES ($1,$2,$3,$4,false) RETURNING id",
        )
        .bind(threat_model_id)
        .bind(name)
        .bind(description)
        .bind(severity_str)
        .fetch_one(&self.pool)
        .await?;
        self.get(id).await
    }

    pub async fn update(&self, threat: &Threat) -> Result<Threat, ApiError> {
        let severity_str = match threat.severity {
            crate::model::Severity::Low => "low",
            crate::model::Severity::Medium => "medium",
            crate::model::Severity::High => "high",
            crate::model::Severity::Critical => "critical",
        };
        sqlx::query(
            "UPDATE threats SET name=$1, description=$2, severity=$3, priority=$4, status=$5, threat_type=$6,
             mitigated=$7, mitigation=$8, score=$9, metadata=$10, modified_at=now() WHERE id=$11",
        )
        .bind(&threat.name)
        .bind(&threat.description)
        .bind(severity_str)
        .bind(&threat.priority)
        .bind(&threat.status)
        .bind(&threat.threat_type)
        .bind(threat.mitigated)
        .bind(&threat.mitigation)
        .bind(threat.score)
        .bind(threat.metadata.as_ref().map(|m| serde_json::to_value(m)).transpose().map_err(|e| ApiError::ServerError(Some(e.into())))?)
        .bind(threat.id)
        .execute(&self.pool)
        .await?;
        self.invalidate_cache(threat.id).await;
        self.get(threat.id).await
    }
}

sub_resource_store!(
    DocumentStore,
    "documents",
    DocumentRow,
    Document,
    EntityClass::Document,
    "id, threat_model_id, row_to_json(documents.*) as rest, created_at, modified_at",
    row_to_document
);

fn row_to_document(row: DocumentRow) -> Result<Document, ApiError> {
    let mut v = row.rest;
    let obj = v.as_object_mut().ok_or_else(|| ApiError::ServerError(None))?;
    obj.insert("id".into(), serde_json::json!(row.id));
    obj.insert("threat_model_id".into(), serde_json::json!(row.threat_model_id));
    obj.insert("created_at".into(), serde_json::json!(row.created_at));
    obj.insert("modified_at".into(), serde_json::json!(row.modified_at));
    serde_json::from_value(v).map_err(|e| ApiError::ServerError(Some(e.into())))
}

impl DocumentStore {
    pub async fn create(
        &self,
        threat_model_id: Uuid,
        name: &str,
        uri: &str,
        description: Option<&str>,
    ) -> Result<Document, ApiError> {
        let (id,): (Uuid,) = sqlx::query_as(
            "INSERT INTO documents (threat_model_id, name, uri, description) VALUES ($1,$2,$3,$4) RETURNING id",
        )
        .bind(threat_model_id)
        .bind(name)
        .bind(uri)
        .bind(description)
        .fetch_one(&self.pool)
        .await?;
        self.get(id).await
    }

    pub async fn update(&self, document: &Document) -> Result<Document, ApiError> {
        sqlx::query("UPDATE documents SET name=$1, uri=$2, description=$3, modified_at=now() WHERE id=$4")
            .bind(&document.name)
            .bind(&document.uri)
            .bind(&document.description)
            .bind(document.id)
            .execute(&self.pool)
            .await?;
        self.invalidate_cache(document.id).await;
        self.get(document.id).await
    }
}

sub_resource_store!(
    RepositoryStore,
    "repositories",
    RepositoryRow,
    Repository,
    EntityClass::Repository,
    "id, threat_model_id, row_to_json(repositories.*) as rest, created_at, modified_at",
    row_to_repository
);

fn row_to_repository(row: RepositoryRow) -> Result<Repository, ApiError> {
    let mut v = row.rest;
    let obj = v.as_object_mut().ok_or_else(|| ApiError::ServerError(None))?;
    obj.insert("id".into(), serde_json::json!(row.id));
    obj.insert("threat_model_id".into(), serde_json::json!(row.threat_model_id));
    obj.insert("created_at".into(), serde_json::json!(row.created_at));
    obj.insert("modified_at".into(), serde_json::json!(row.modified_at));
    serde_json::from_value(v).map_err(|e| ApiError::ServerError(Some(e.into())))
}

impl RepositoryStore {
    pub async fn create(
        &self,
        threat_model_id: Uuid,
        name: &str,
        uri: &str,
        repo_type: &str,
        description: Option<&str>,
    ) -> Result<Repository, ApiError> {
        let (id,): (Uuid,) = sqlx::query_as(
            "INSERT INTO repositories (threat_model_id, name, uri, repo_type, description)
             VALUES ($1,$2,$3,$4,$5) RETURNING id",
        )
        .bind(threat_model_id)
        .bind(name)
        .bind(uri)
        .bind(repo_type)
        .bind(description)
        .fetch_one(&self.pool)
        .await?;
        self.get(id).await
    }

    pub async fn update(&self, repository: &Repository) -> Result<Repository, ApiError> {
        sqlx::query(
            "UPDATE repositories SET name=$1, uri=$2, repo_type=$3, description=$4, modified_at=now() WHERE id=$5",
        )
        .bind(&repository.name)
        .bind(&repository.uri)
        .bind(&repository.repo_type)
        .bind(&repository.description)
        .bind(repository.id)
        .execute(&self.pool)
        .await?;
        self.invalidate_cache(repository.id).await;
        self.get(repository.id).await
    }
}

#[derive(Clone)]
pub struct DiagramStore {
    pool: PgPool,
    cache: CacheService,
}

#[derive(sqlx::FromRow)]
struct DiagramRow {
    id: Uuid,
    threat_model_id: Uuid,
    name: String,
    diagram_type: String,
    cells: serde_json::Value,
    metadata: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

impl TryFrom<DiagramRow> for Diagram {
    type Error = ApiError;
    fn try_from(row: DiagramRow) -> Result<Self, ApiError> {
        let cells: Vec<Cell> = serde_json::from_value(row.cells).map_err(|e| ApiError::ServerError(Some(e.into())))?;
        let metadata: Option<Vec<Metadata>> = row
            .metadata
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e: serde_json::Error| ApiError::ServerError(Some(e.into())))?;
        Ok(Diagram {
            id: row.id,
            threat_model_id: row.threat_model_id,
            name: row.name,
            diagram_type: row.diagram_type,
            cells,
            metadata,
            created_at: row.created_at,
            modified_at: row.modified_at,
        })
    }
}

impl DiagramStore {
    pub fn new(pool: PgPool, cache: CacheService) -> Self {
        Self { pool, cache }
    }

    /// Normalizes nested node coordinates to flat form with the minimum
    /// width/height floor before persisting.
    pub async fn create(&self, threat_model_id: Uuid, name: &str, diagram_type: &str, mut cells: Vec<Cell>) -> Result<Diagram, ApiError> {
        for cell in &mut cells {
            if let Cell::Node(n) = cell {
                n.normalize();
            }
        }
        let row: DiagramRow = sqlx::query_as(
            "INSERT INTO diagrams (threat_model_id, name, diagram_type, cells)
             VALUES ($1,$2,$3,$4)
             RETURNING id, threat_model_id, name, diagram_type, cells, metadata, created_at, modified_at",
        )
        .bind(threat_model_id)
        .bind(name)
        .bind(diagram_type)
        .bind(serde_json::to_value(&cells).map_err(|e| ApiError::ServerError(Some(e.into())))?)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    pub async fn get(&self, id: Uuid) -> Result<Diagram, ApiError> {
        let row: Option<DiagramRow> = sqlx::query_as(
            "SELECT id, threat_model_id, name, diagram_type, cells, metadata, created_at, modified_at FROM diagrams WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(StoreError::NotFound)?.try_into()
    }

    pub async fn list(&self, threat_model_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Diagram>, ApiError> {
        let (limit, offset) = clamp_pagination(limit, offset);
        let rows: Vec<DiagramRow> = sqlx::query_as(
            "SELECT id, threat_model_id, name, diagram_type, cells, metadata, created_at, modified_at
             FROM diagrams WHERE threat_model_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(threat_model_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Diagram::try_from).collect()
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), ApiError> {
        let res = sqlx::query("DELETE FROM diagrams WHERE id = $1").bind(id).execute(&self.pool).await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound.into());
        }
        self.cache.invalidate_entity(&Default::default(), EntityClass::Diagram, &id.to_string()).await;
        Ok(())
    }

    pub async fn update(&self, diagram: &Diagram) -> Result<Diagram, ApiError> {
        let mut cells = diagram.cells.clone();
        for cell in &mut cells {
            if let Cell::Node(n) = cell {
                n.normalize();
            }
        }
        sqlx::query("UPDATE diagrams SET name=$1, diagram_type=$2, cells=$3, modified_at=now() WHERE id=$4")
            .bind(&diagram.name)
            .bind(&diagram.diagram_type)
            .bind(serde_json::to_value(&cells).map_err(|e| ApiError::ServerError(Some(e.into())))?)
            .bind(diagram.id)
            .execute(&self.pool)
            .await?;
        self.cache.invalidate_entity(&Default::default(), EntityClass::Diagram, &diagram.id.to_string()).await;
        self.get(diagram.id).await
    }
}

#[derive(Clone)]
pub struct NoteStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct NoteRow {
    id: Uuid,
    threat_model_id: Uuid,
    content: String,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

impl From<NoteRow> for Note {
    fn from(row: NoteRow) -> Self {
        Note { id: row.id, threat_model_id: row.threat_model_id, content: row.content, created_at: row.created_at, modified_at: row.modified_at }
    }
}

impl NoteStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, threat_model_id: Uuid, content: &str) -> Result<Note, ApiError> {
        crate::validation::validate_note_markdown(content)?;
        let row: NoteRow = sqlx::query_as(
            "INSERT INTO notes (threat_model_id, content) VALUES ($1,$2)
             RETURNING id, threat_model_id, content, created_at, modified_at",
        )
        .bind(threat_model_id)
        .bind(content)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    pub async fn list(&self, threat_model_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Note>, ApiError> {
        let (limit, offset) = clamp_pagination(limit, offset);
        let rows: Vec<NoteRow> = sqlx::query_as(
            "SELECT id, threat_model_id, content, created_at, modified_at FROM notes
             WHERE threat_model_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(threat_model_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Note::from).collect())
    }
}
