//! Bridges the store layer to [`crate::cache::warmer::WarmTarget`] without
//! the warmer depending on concrete store types.

use uuid::Uuid;

use crate::cache::warmer::{EntityType, WarmTarget};
use crate::store::ThreatModelStore;
use crate::store::sub_resource::{DocumentStore, RepositoryStore, ThreatStore};

pub struct ThreatModelWarmTarget {
    threat_models: ThreatModelStore,
    threats: ThreatStore,
    documents: DocumentStore,
    repositories: RepositoryStore,
}

impl ThreatModelWarmTarget {
    pub fn new(
        threat_models: ThreatModelStore,
        threats: ThreatStore,
        documents: DocumentStore,
        repositories: RepositoryStore,
    ) -> Self {
        Self { threat_models, threats, documents, repositories }
    }
}

#[async_trait::async_trait]
impl WarmTarget for ThreatModelWarmTarget {
    async fn list_recent_threat_models(&self, n: usize) -> anyhow::Result<Vec<Uuid>> {
        self.threat_models.list_recent_ids(n as i64).await
    }

    async fn warm_threats(&self, tm_id: Uuid) -> anyhow::Result<()> {
        self.threats.list(tm_id, 100, 0).await?;
        Ok(())
    }

    async fn warm_documents(&self, tm_id: Uuid) -> anyhow::Result<()> {
        self.documents.list(tm_id, 100, 0).await?;
        Ok(())
    }

    async fn warm_repositories(&self, tm_id: Uuid) -> anyhow::Result<()> {
        self.repositories.list(tm_id, 100, 0).await?;
        Ok(())
    }

    async fn warm_auth(&self, tm_id: Uuid) -> anyhow::Result<()> {
        self.threat_models.warm_cache(tm_id).await
    }

    async fn warm_entity(&self, entity_type: EntityType, entity_id: Uuid) -> anyhow::Result<()> {
        match entity_type {
            EntityType::Threat => {
                self.threats.get(entity_id).await?;
            },
            EntityType::Document => {
                self.documents.get(entity_id).await?;
            },
            EntityType::Repository => {
                self.repositories.get(entity_id).await?;
            },
            EntityType::ThreatModel => {
                self.threat_models.warm_cache(entity_id).await?;
            },
        }
        Ok(())
    }
}
