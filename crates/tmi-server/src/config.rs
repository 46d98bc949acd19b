//! Environment-driven configuration, overlaid by `tmi-app`'s CLI flags.
//! Grounded on the teacher's `LocalJwtConfig`/env-var conventions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_admin_addr")]
    pub admin_addr: String,
    pub database_url: String,
    /// Unset means KV is absent; every higher layer must degrade gracefully.
    pub redis_url: Option<String>,
    #[serde(default = "default_warming_interval_secs")]
    pub warming_interval_secs: u64,
    #[serde(default)]
    pub rate_limits: RateLimitDefaults,
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub upload: Upload,
    #[serde(default)]
    pub websocket: WebSocket,
    #[serde(default)]
    pub ui: Ui,
    #[serde(default = "default_termination_min_deadline_secs")]
    pub termination_min_deadline_secs: u64,
    #[serde(default = "default_issuer")]
    pub oidc_issuer: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_admin_addr() -> String {
    "0.0.0.0:8081".to_string()
}
fn default_warming_interval_secs() -> u64 {
    900
}
fn default_termination_min_deadline_secs() -> u64 {
    10
}
fn default_issuer() -> String {
    "https://tmi.local/".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitDefaults {
    #[serde(default = "default_api_per_min")]
    pub api_per_min: u32,
    #[serde(default)]
    pub api_per_hour: Option<u32>,
    #[serde(default = "default_ip_per_min")]
    pub ip_per_min: u32,
    #[serde(default = "default_auth_session_per_10min")]
    pub auth_session_per_10min: u32,
    #[serde(default = "default_auth_ip_per_hour")]
    pub auth_ip_per_hour: u32,
    #[serde(default = "default_auth_user_per_hour")]
    pub auth_user_per_hour: u32,
}

fn default_api_per_min() -> u32 {
    60
}
fn default_ip_per_min() -> u32 {
    10
}
fn default_auth_session_per_10min() -> u32 {
    5
}
fn default_auth_ip_per_hour() -> u32 {
    100
}
fn default_auth_user_per_hour() -> u32 {
    10
}

impl Default for RateLimitDefaults {
    fn default() -> Self {
        Self {
            api_per_min: default_api_per_min(),
            api_per_hour: None,
            ip_per_min: default_ip_per_min(),
            auth_session_per_10min: default_auth_session_per_10min(),
            auth_ip_per_hour: default_auth_ip_per_hour(),
            auth_user_per_hour: default_auth_user_per_hour(),
        }
    }
}

/// `GET /config`'s public subset, per spec's environment-facing
/// configuration list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Features {
    #[serde(default)]
    pub saml_enabled: bool,
    #[serde(default = "default_true")]
    pub webhooks_enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u32,
}
fn default_max_file_size_mb() -> u32 {
    25
}
impl Default for Upload {
    fn default() -> Self {
        Self { max_file_size_mb: default_max_file_size_mb() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocket {
    #[serde(default = "default_max_participants")]
    pub max_participants: u32,
}
fn default_max_participants() -> u32 {
    16
}
impl Default for WebSocket {
    fn default() -> Self {
        Self { max_participants: default_max_participants() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Auto,
    Light,
    Dark,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ui {
    #[serde(default = "default_theme")]
    pub default_theme: Theme,
}
fn default_theme() -> Theme {
    Theme::Auto
}
impl Default for Ui {
    fn default() -> Self {
        Self { default_theme: default_theme() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicConfig<'a> {
    pub features: &'a Features,
    pub upload: &'a Upload,
    pub websocket: &'a WebSocket,
    pub ui: &'a Ui,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
        let redis_url = std::env::var("REDIS_URL").ok();
        Ok(Config {
            bind_addr: std::env::var("TMI_BIND_ADDR").unwrap_or_else(|_| default_bind_addr()),
            admin_addr: std::env::var("TMI_ADMIN_ADDR").unwrap_or_else(|_| default_admin_addr()),
            database_url,
            redis_url,
            warming_interval_secs: std::env::var("TMI_WARMING_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_warming_interval_secs),
            rate_limits: RateLimitDefaults::default(),
            features: Features::default(),
            upload: Upload::default(),
            websocket: WebSocket::default(),
            ui: Ui::default(),
            termination_min_deadline_secs: default_termination_min_deadline_secs(),
            oidc_issuer: std::env::var("TMI_OIDC_ISSUER").unwrap_or_else(|_| default_issuer()),
        })
    }

    pub fn public(&self) -> PublicConfig<'_> {
        PublicConfig {
            features: &self.features,
            upload: &self.upload,
            websocket: &self.websocket,
            ui: &self.ui,
        }
    }
}
