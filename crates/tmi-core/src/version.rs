//! Build metadata surfaced on the admin config-dump endpoint.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct BuildInfo {
    pub version: &'static str,
    pub rust_version: &'static str,
    pub build_profile: &'static str,
    pub git_sha: &'static str,
}

impl BuildInfo {
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            rust_version: env!("CARGO_PKG_RUST_VERSION"),
            build_profile: if cfg!(debug_assertions) { "debug" } else { "release" },
            git_sha: option_env!("TMI_GIT_SHA").unwrap_or("unknown"),
        }
    }
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self::new()
    }
}
