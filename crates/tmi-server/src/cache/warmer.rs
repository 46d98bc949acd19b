//! Proactive periodic warming plus on-demand requests. A worker is a
//! cooperative task with a stop signal; it does not rely on process
//! teardown to end it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

/// Implemented by `tmi_server::store` to let the warmer list and refresh
/// threat-model sub-resources without depending on the store module's
/// concrete types.
#[async_trait::async_trait]
pub trait WarmTarget: Send + Sync {
    async fn list_recent_threat_models(&self, n: usize) -> anyhow::Result<Vec<Uuid>>;
    async fn warm_threats(&self, tm_id: Uuid) -> anyhow::Result<()>;
    async fn warm_documents(&self, tm_id: Uuid) -> anyhow::Result<()>;
    async fn warm_repositories(&self, tm_id: Uuid) -> anyhow::Result<()>;
    async fn warm_auth(&self, tm_id: Uuid) -> anyhow::Result<()>;
    async fn warm_entity(&self, entity_type: EntityType, entity_id: Uuid) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
    Threat,
    Document,
    Repository,
    ThreatModel,
}

impl std::str::FromStr for EntityType {
    type Err = WarmError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "threat" => Ok(EntityType::Threat),
            "document" => Ok(EntityType::Document),
            "repository" => Ok(EntityType::Repository),
            "threat_model" => Ok(EntityType::ThreatModel),
            other => Err(WarmError::Unsupported(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Lazy,
    Eager,
}

#[derive(Debug, Clone)]
pub struct WarmOnDemandRequest {
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub threat_model_id: Option<Uuid>,
    pub priority: Priority,
    pub strategy: Strategy,
    pub ttl_override: Option<Duration>,
    pub force_refresh: bool,
}

#[derive(thiserror::Error, Debug)]
pub enum WarmError {
    #[error("unsupported entity type: {0}")]
    Unsupported(String),
    #[error("failed to warm {0}: {1}")]
    SubTask(&'static str, anyhow::Error),
}

pub struct CacheWarmer<T: WarmTarget + 'static> {
    target: Arc<T>,
    interval: Duration,
    in_progress: Arc<AtomicBool>,
    stop_tx: Arc<std::sync::Mutex<Option<watch::Sender<bool>>>>,
}

impl<T: WarmTarget + 'static> CacheWarmer<T> {
    pub fn new(target: Arc<T>, interval: Duration) -> Self {
        Self {
            target,
            interval,
            in_progress: Arc::new(AtomicBool::new(false)),
            stop_tx: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// Starts the background loop; a second call while already running is a
    /// no-op. A worker exits within the next interval tick after a stop
    /// signal.
    pub fn start_proactive_warming(&self) {
        let mut guard = self.stop_tx.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let (stop_tx, mut stop_rx) = watch::channel(false);
        *guard = Some(stop_tx);
        drop(guard);

        let target = self.target.clone();
        let interval = self.interval;
        let in_progress = self.in_progress.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if in_progress.swap(true, Ordering::SeqCst) {
                            // a prior pass is still running; coalesce this tick.
                            continue;
                        }
                        if let Err(e) = run_proactive_pass(&target).await {
                            warn!(error = %e, "proactive cache warming pass failed");
                        }
                        in_progress.store(false, Ordering::SeqCst);
                    },
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            info!("cache warmer stop signal received");
                            break;
                        }
                    },
                }
            }
        });
    }

    pub fn stop_proactive_warming(&self) {
        if let Some(tx) = self.stop_tx.lock().unwrap().take() {
            let _ = tx.send(true);
        }
    }

    pub async fn warm_on_demand(&self, req: WarmOnDemandRequest) -> Result<(), WarmError> {
        match req.entity_type {
            EntityType::ThreatModel => {
                self.warm_threat_model_data(req.entity_id).await
            },
            other => self
                .target
                .warm_entity(other, req.entity_id)
                .await
                .map_err(|e| WarmError::SubTask("entity", e)),
        }
    }

    /// Runs the four sub-tasks in parallel and joins their errors.
    pub async fn warm_threat_model_data(&self, tm_id: Uuid) -> Result<(), WarmError> {
        let (threats, documents, repositories, auth) = tokio::join!(
            self.target.warm_threats(tm_id),
            self.target.warm_documents(tm_id),
            self.target.warm_repositories(tm_id),
            self.target.warm_auth(tm_id),
        );
        let mut errors = Vec::new();
        if let Err(e) = threats {
            errors.push(format!("failed to warm threats: {e}"));
        }
        if let Err(e) = documents {
            errors.push(format!("failed to warm documents: {e}"));
        }
        if let Err(e) = repositories {
            errors.push(format!("failed to warm repositories: {e}"));
        }
        if let Err(e) = auth {
            errors.push(format!("failed to warm auth data: {e}"));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(WarmError::SubTask("threat_model", anyhow::anyhow!(errors.join("; "))))
        }
    }
}

async fn run_proactive_pass<T: WarmTarget + ?Sized>(target: &T) -> anyhow::Result<()> {
    const RECENT_N: usize = 50;
    let recent = target.list_recent_threat_models(RECENT_N).await?;
    let mut errors = Vec::new();
    for tm_id in recent {
        let (threats, documents, repositories, auth) = tokio::join!(
            target.warm_threats(tm_id),
            target.warm_documents(tm_id),
            target.warm_repositories(tm_id),
            target.warm_auth(tm_id),
        );
        for (label, res) in [("threats", threats), ("documents", documents), ("repositories", repositories), ("auth", auth)] {
            if let Err(e) = res {
                errors.push(format!("{tm_id}: failed to warm {label}: {e}"));
            }
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        warn!(count = errors.len(), "proactive warming encountered errors");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct FakeTarget {
        fail_documents: bool,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl WarmTarget for FakeTarget {
        async fn list_recent_threat_models(&self, _n: usize) -> anyhow::Result<Vec<Uuid>> {
            Ok(vec![])
        }
        async fn warm_threats(&self, _tm_id: Uuid) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn warm_documents(&self, _tm_id: Uuid) -> anyhow::Result<()> {
            if self.fail_documents {
                anyhow::bail!("document store unavailable")
            }
            Ok(())
        }
        async fn warm_repositories(&self, _tm_id: Uuid) -> anyhow::Result<()> {
            Ok(())
        }
        async fn warm_auth(&self, _tm_id: Uuid) -> anyhow::Result<()> {
            Ok(())
        }
        async fn warm_entity(&self, _entity_type: EntityType, _entity_id: Uuid) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn warm_threat_model_data_aggregates_document_failure() {
        let target = Arc::new(FakeTarget { fail_documents: true, calls: AtomicUsize::new(0) });
        let warmer = CacheWarmer::new(target, Duration::from_secs(900));
        let err = warmer.warm_threat_model_data(Uuid::new_v4()).await.unwrap_err();
        assert!(err.to_string().contains("failed to warm documents"));
    }

    #[tokio::test]
    async fn warm_on_demand_rejects_bad_entity_type_at_parse() {
        let res = "bogus".parse::<EntityType>();
        assert!(matches!(res, Err(WarmError::Unsupported(_))));
    }

    #[tokio::test]
    async fn start_stop_proactive_warming_is_idempotent() {
        let target = Arc::new(FakeTarget { fail_documents: false, calls: AtomicUsize::new(0) });
        let warmer = CacheWarmer::new(target, Duration::from_millis(10));
        warmer.start_proactive_warming();
        warmer.start_proactive_warming();
        tokio::time::sleep(Duration::from_millis(30)).await;
        warmer.stop_proactive_warming();
    }
}
