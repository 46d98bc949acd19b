//! Shared application state handed to every handler via `State<Arc<AppState>>`.

use std::sync::Arc;

use sqlx::PgPool;

use crate::cache::CacheService;
use crate::cache::warmer::CacheWarmer;
use crate::config::Config;
use crate::events::EventEmitter;
use crate::kv::KvClient;
use crate::ratelimit::{ApiRateLimiter, AuthFlowRateLimiter, IpRateLimiter};
use crate::store::{
    AddonStore, AdministratorStore, GroupStore, InvocationStore, ProjectStore, SystemSettingStore, TeamStore,
    ThreatModelStore, UserStore, WebhookStore,
};
use crate::store::sub_resource::{DiagramStore, DocumentStore, NoteStore, RepositoryStore, ThreatStore};
use crate::warming::ThreatModelWarmTarget;

use super::jwt::Jwt;

pub struct AppState {
    pub config: Arc<Config>,
    pub kv: KvClient,
    pub cache: CacheService,
    pub events: EventEmitter,
    pub jwt: Option<Jwt>,

    pub api_limiter: ApiRateLimiter,
    pub ip_limiter: IpRateLimiter,
    pub auth_flow_limiter: AuthFlowRateLimiter,

    pub threat_models: ThreatModelStore,
    pub threats: ThreatStore,
    pub documents: DocumentStore,
    pub repositories: RepositoryStore,
    pub diagrams: DiagramStore,
    pub notes: NoteStore,
    pub projects: ProjectStore,
    pub teams: TeamStore,
    pub groups: GroupStore,
    pub users: UserStore,
    pub administrators: AdministratorStore,
    pub settings: SystemSettingStore,
    pub webhooks: WebhookStore,
    pub addons: AddonStore,
    pub invocations: InvocationStore,

    pub warmer: CacheWarmer<ThreatModelWarmTarget>,
    pub build_info: tmi_core::version::BuildInfo,
}

impl AppState {
    pub fn new(pool: PgPool, kv: KvClient, config: Config, jwt: Option<Jwt>) -> Arc<Self> {
        let cache = CacheService::new(kv.clone());
        let events = EventEmitter::default_stream(kv.clone());
        let api_limiter = ApiRateLimiter::new(kv.clone());
        let ip_limiter = IpRateLimiter::new(kv.clone(), config.rate_limits.ip_per_min);
        let auth_flow_limiter = AuthFlowRateLimiter::new(kv.clone(), crate::ratelimit::AuthFlowLimits {
            session_per_10min: config.rate_limits.auth_session_per_10min,
            ip_per_hour: config.rate_limits.auth_ip_per_hour,
            user_per_hour: config.rate_limits.auth_user_per_hour,
        });

        let threat_models = ThreatModelStore::new(pool.clone(), cache.clone());
        let threats = ThreatStore::new(pool.clone(), cache.clone());
        let documents = DocumentStore::new(pool.clone(), cache.clone());
        let repositories = RepositoryStore::new(pool.clone(), cache.clone());
        let diagrams = DiagramStore::new(pool.clone(), cache.clone());
        let notes = NoteStore::new(pool.clone());
        let projects = ProjectStore::new(pool.clone());
        let teams = TeamStore::new(pool.clone());
        let groups = GroupStore::new(pool.clone());
        let users = UserStore::new(pool.clone());
        let administrators = AdministratorStore::new(pool.clone());
        let settings = SystemSettingStore::new(pool.clone(), cache.clone());
        let webhooks = WebhookStore::new(pool.clone());
        let addons = AddonStore::new(pool.clone());
        let invocations = InvocationStore::new(pool.clone(), kv.clone());

        let warm_target = Arc::new(ThreatModelWarmTarget::new(
            threat_models.clone(),
            threats.clone(),
            documents.clone(),
            repositories.clone(),
        ));
        let warmer = CacheWarmer::new(warm_target, std::time::Duration::from_secs(config.warming_interval_secs));

        Arc::new(Self {
            config: Arc::new(config),
            kv,
            cache,
            events,
            jwt,
            api_limiter,
            ip_limiter,
            auth_flow_limiter,
            threat_models,
            threats,
            documents,
            repositories,
            diagrams,
            notes,
            projects,
            teams,
            groups,
            users,
            administrators,
            settings,
            webhooks,
            addons,
            invocations,
            warmer,
            build_info: tmi_core::version::BuildInfo::new(),
        })
    }
}
