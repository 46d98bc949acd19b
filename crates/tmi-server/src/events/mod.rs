//! Append-only event stream with a 5-second dedup window. Graceful no-op
//! when KV is absent.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::kv::{KeyBuilder, KvClient};

const DEDUP_WINDOW: std::time::Duration = std::time::Duration::from_secs(5);

/// Closed set of supported event types, checked at compile time.
macro_rules! event_types {
    ($($name:ident => $lit:literal),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum EventType {
            $($name),+
        }
        impl EventType {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(EventType::$name => $lit),+
                }
            }
        }
    };
}

event_types! {
    ThreatModelCreated => "threat_model.created",
    ThreatModelUpdated => "threat_model.updated",
    ThreatModelDeleted => "threat_model.deleted",
    ThreatCreated => "threat.created",
    ThreatUpdated => "threat.updated",
    ThreatDeleted => "threat.deleted",
    DocumentCreated => "document.created",
    DocumentUpdated => "document.updated",
    DocumentDeleted => "document.deleted",
    RepositoryCreated => "repository.created",
    RepositoryUpdated => "repository.updated",
    RepositoryDeleted => "repository.deleted",
    DiagramCreated => "diagram.created",
    DiagramUpdated => "diagram.updated",
    DiagramDeleted => "diagram.deleted",
}

#[derive(Debug, Clone)]
pub struct EventPayload {
    pub event_type: EventType,
    pub threat_model_id: Option<Uuid>,
    pub resource_id: Uuid,
    pub resource_type: &'static str,
    pub owner_id: Uuid,
    pub timestamp: Option<DateTime<Utc>>,
    pub data: serde_json::Value,
}

#[derive(Clone)]
pub struct EventEmitter {
    kv: KvClient,
    stream_key: String,
}

impl EventEmitter {
    pub fn new(kv: KvClient, stream_key: impl Into<String>) -> Self {
        Self { kv, stream_key: stream_key.into() }
    }

    pub fn default_stream(kv: KvClient) -> Self {
        Self::new(kv, KeyBuilder::events_stream())
    }

    /// Returns `Ok(())` whether or not the event was actually written —
    /// absent KV and dedup suppression are both graceful no-ops.
    pub async fn emit(&self, ct: &CancellationToken, mut payload: EventPayload) -> anyhow::Result<()> {
        if !self.kv.is_present() {
            return Ok(());
        }
        if payload.timestamp.is_none() {
            payload.timestamp = Some(Utc::now());
        }
        let dedup_key = KeyBuilder::events_dedup(payload.event_type.as_str(), &payload.resource_id.to_string());
        let acquired = self.kv.set_nx_ex(ct, &dedup_key, "1", DEDUP_WINDOW).await?;
        if !acquired {
            return Ok(());
        }

        let timestamp = payload.timestamp.unwrap();
        let fields = vec![
            ("event_type".to_string(), payload.event_type.as_str().to_string()),
            ("threat_model_id".to_string(), payload.threat_model_id.map(|u| u.to_string()).unwrap_or_default()),
            ("resource_id".to_string(), payload.resource_id.to_string()),
            ("resource_type".to_string(), payload.resource_type.to_string()),
            ("owner_id".to_string(), payload.owner_id.to_string()),
            ("timestamp".to_string(), timestamp.to_rfc3339()),
            ("data".to_string(), payload.data.to_string()),
        ];
        if let Err(e) = self.kv.xadd(ct, &self.stream_key, &fields).await {
            warn!(error = %e, "event emit failed");
        }
        Ok(())
    }

    pub async fn stream_len(&self, ct: &CancellationToken) -> anyhow::Result<i64> {
        Ok(self.kv.xlen(ct, &self.stream_key).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_is_a_no_op_when_kv_absent() {
        let emitter = EventEmitter::default_stream(KvClient::absent());
        let ct = CancellationToken::new();
        let payload = EventPayload {
            event_type: EventType::ThreatCreated,
            threat_model_id: Some(Uuid::new_v4()),
            resource_id: Uuid::new_v4(),
            resource_type: "threat",
            owner_id: Uuid::new_v4(),
            timestamp: None,
            data: serde_json::json!({}),
        };
        assert!(emitter.emit(&ct, payload).await.is_ok());
    }

    #[test]
    fn event_type_strings_are_the_closed_set() {
        assert_eq!(EventType::ThreatModelCreated.as_str(), "threat_model.created");
        assert_eq!(EventType::DiagramDeleted.as_str(), "diagram.deleted");
    }
}
