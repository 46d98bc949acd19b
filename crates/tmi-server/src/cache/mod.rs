//! Write-through cache for sub-resources, metadata, and authorization
//! snapshots, fronting the durable stores behind [`crate::kv::KvClient`].

pub mod invalidator;
pub mod metrics;
pub mod warmer;

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::kv::{KeyBuilder, KvClient};

pub use metrics::CacheMetrics;

#[derive(Debug, Clone, Copy)]
pub enum EntityClass {
    Threat,
    Document,
    Repository,
    Diagram,
}

impl EntityClass {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityClass::Threat => "threat",
            EntityClass::Document => "document",
            EntityClass::Repository => "repository",
            EntityClass::Diagram => "diagram",
        }
    }

    /// Per-entity-class TTL: sub-resources 15 min, metadata 5 min (handled
    /// separately), authorization 10 min (handled separately).
    pub fn ttl(self) -> Duration {
        Duration::from_secs(15 * 60)
    }
}

pub const METADATA_TTL: Duration = Duration::from_secs(5 * 60);
pub const AUTH_TTL: Duration = Duration::from_secs(10 * 60);
pub const SETTINGS_TTL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct CacheService {
    kv: KvClient,
    pub metrics: CacheMetrics,
}

impl CacheService {
    pub fn new(kv: KvClient) -> Self {
        Self { kv, metrics: CacheMetrics::new() }
    }

    /// JSON-encodes `entity` and writes it with the class TTL. An entity
    /// whose id is the nil UUID is a usage error handled by the caller
    /// before reaching here.
    pub async fn cache_entity<T: Serialize>(
        &self,
        ct: &CancellationToken,
        class: EntityClass,
        id: &str,
        entity: &T,
    ) {
        let key = KeyBuilder::cache_entity(class.as_str(), id);
        match serde_json::to_string(entity) {
            Ok(payload) => match self.kv.set_ex(ct, &key, &payload, class.ttl()).await {
                Ok(()) => self.metrics.record_write(),
                Err(e) => {
                    warn!(error = %e, class = class.as_str(), "cache write failed");
                    self.metrics.record_error(metrics::ErrorKind::from_kv(&e));
                },
            },
            Err(e) => warn!(error = %e, "failed to encode entity for cache"),
        }
    }

    /// Decode failures are treated as a miss and logged, never surfaced.
    pub async fn get_cached<T: DeserializeOwned>(
        &self,
        ct: &CancellationToken,
        class: EntityClass,
        id: &str,
    ) -> Option<T> {
        let key = KeyBuilder::cache_entity(class.as_str(), id);
        let raw = match self.kv.get(ct, &key).await {
            Ok(v) => v,
            Err(e) => {
                self.metrics.record_error(metrics::ErrorKind::from_kv(&e));
                None
            },
        };
        match raw {
            None => {
                self.metrics.record_miss(class.as_str());
                None
            },
            Some(s) => match serde_json::from_str(&s) {
                Ok(v) => {
                    self.metrics.record_hit(class.as_str());
                    Some(v)
                },
                Err(e) => {
                    warn!(error = %e, class = class.as_str(), "cache decode failed, treating as miss");
                    self.metrics.record_miss(class.as_str());
                    None
                },
            },
        }
    }

    pub async fn invalidate_entity(&self, ct: &CancellationToken, class: EntityClass, id: &str) {
        let entity_key = KeyBuilder::cache_entity(class.as_str(), id);
        let meta_key = KeyBuilder::cache_metadata(class.as_str(), id);
        if let Err(e) = self.kv.del(ct, &entity_key).await {
            warn!(error = %e, "invalidate entity failed");
            self.metrics.record_error(metrics::ErrorKind::from_kv(&e));
        } else {
            self.metrics.record_invalidation();
        }
        if let Err(e) = self.kv.del(ct, &meta_key).await {
            warn!(error = %e, "invalidate metadata failed");
            self.metrics.record_error(metrics::ErrorKind::from_kv(&e));
        }
    }

    pub async fn invalidate_metadata(&self, ct: &CancellationToken, class: EntityClass, id: &str) {
        let meta_key = KeyBuilder::cache_metadata(class.as_str(), id);
        if let Err(e) = self.kv.del(ct, &meta_key).await {
            warn!(error = %e, "invalidate metadata failed");
            self.metrics.record_error(metrics::ErrorKind::from_kv(&e));
        } else {
            self.metrics.record_invalidation();
        }
    }

    pub async fn cache_auth(&self, ct: &CancellationToken, tm_id: &str, snapshot: &impl Serialize) {
        let key = KeyBuilder::cache_auth(tm_id);
        if let Ok(payload) = serde_json::to_string(snapshot) {
            if let Err(e) = self.kv.set_ex(ct, &key, &payload, AUTH_TTL).await {
                warn!(error = %e, "cache auth write failed");
                self.metrics.record_error(metrics::ErrorKind::from_kv(&e));
            } else {
                self.metrics.record_write();
            }
        }
    }

    pub async fn get_cached_auth<T: DeserializeOwned>(&self, ct: &CancellationToken, tm_id: &str) -> Option<T> {
        let key = KeyBuilder::cache_auth(tm_id);
        match self.kv.get(ct, &key).await.ok().flatten() {
            Some(s) => {
                let parsed = serde_json::from_str(&s).ok();
                if parsed.is_some() {
                    self.metrics.record_hit("auth");
                } else {
                    self.metrics.record_miss("auth");
                }
                parsed
            },
            None => {
                self.metrics.record_miss("auth");
                None
            },
        }
    }

    pub async fn cache_setting<T: Serialize>(&self, ct: &CancellationToken, key: &str, value: &T) {
        let cache_key = KeyBuilder::settings(key);
        if let Ok(payload) = serde_json::to_string(value) {
            if let Err(e) = self.kv.set_ex(ct, &cache_key, &payload, SETTINGS_TTL).await {
                warn!(error = %e, "cache setting write failed");
                self.metrics.record_error(metrics::ErrorKind::from_kv(&e));
            } else {
                self.metrics.record_write();
            }
        }
    }

    pub async fn get_cached_setting<T: DeserializeOwned>(&self, ct: &CancellationToken, key: &str) -> Option<T> {
        let cache_key = KeyBuilder::settings(key);
        match self.kv.get(ct, &cache_key).await.ok().flatten() {
            Some(s) => {
                let parsed = serde_json::from_str(&s).ok();
                if parsed.is_some() {
                    self.metrics.record_hit("settings");
                } else {
                    self.metrics.record_miss("settings");
                }
                parsed
            },
            None => {
                self.metrics.record_miss("settings");
                None
            },
        }
    }

    pub async fn invalidate_setting(&self, ct: &CancellationToken, key: &str) {
        let cache_key = KeyBuilder::settings(key);
        if let Err(e) = self.kv.del(ct, &cache_key).await {
            warn!(error = %e, "invalidate setting failed");
            self.metrics.record_error(metrics::ErrorKind::from_kv(&e));
        } else {
            self.metrics.record_invalidation();
        }
    }

    pub async fn invalidate_auth(&self, ct: &CancellationToken, tm_id: &str) {
        let key = KeyBuilder::cache_auth(tm_id);
        if let Err(e) = self.kv.del(ct, &key).await {
            warn!(error = %e, "invalidate auth failed");
            self.metrics.record_error(metrics::ErrorKind::from_kv(&e));
        } else {
            self.metrics.record_invalidation();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        name: String,
    }

    #[tokio::test]
    async fn absent_kv_cache_get_is_a_miss() {
        let svc = CacheService::new(KvClient::absent());
        let ct = CancellationToken::new();
        let got: Option<Sample> = svc.get_cached(&ct, EntityClass::Threat, "1").await;
        assert_eq!(got, None);
        assert_eq!(svc.metrics.snapshot().misses_total, 1);
    }
}
