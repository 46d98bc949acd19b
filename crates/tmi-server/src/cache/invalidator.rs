//! Conceptually subscribes to store mutations: on sub-resource
//! create/update/delete, invalidates the entity, its metadata, the parent
//! threat model's sub-resource list, and its auth snapshot. Failures are
//! logged but never propagated as request failures.

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{CacheService, EntityClass};

#[derive(Clone)]
pub struct CacheInvalidator {
    cache: CacheService,
}

impl CacheInvalidator {
    pub fn new(cache: CacheService) -> Self {
        Self { cache }
    }

    pub async fn on_sub_resource_mutated(&self, class: EntityClass, id: Uuid, threat_model_id: Uuid) {
        let ct = CancellationToken::new();
        self.cache.invalidate_entity(&ct, class, &id.to_string()).await;
        // the threat model's own sub-resource listing cache is keyed by
        // metadata-of-the-threat-model-class
        self.cache.invalidate_metadata(&ct, class, &threat_model_id.to_string()).await;
        self.cache.invalidate_auth(&ct, &threat_model_id.to_string()).await;
    }

    pub async fn on_threat_model_mutated(&self, threat_model_id: Uuid) {
        let ct = CancellationToken::new();
        self.cache.invalidate_auth(&ct, &threat_model_id.to_string()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::KvClient;

    #[tokio::test]
    async fn invalidation_never_panics_with_absent_kv() {
        let invalidator = CacheInvalidator::new(CacheService::new(KvClient::absent()));
        invalidator
            .on_sub_resource_mutated(EntityClass::Threat, Uuid::new_v4(), Uuid::new_v4())
            .await;
        invalidator.on_threat_model_mutated(Uuid::new_v4()).await;
    }
}
