//! Tracing subscriber setup with a runtime-reloadable filter, mirroring the
//! `/logging` admin endpoint contract: `GET` lists the current filter,
//! `POST ?level=...` changes it without a restart.

use std::str::FromStr;
use std::sync::OnceLock;

use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter as Targets, Layer};

type ReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

static FILTER_HANDLE: OnceLock<ReloadHandle> = OnceLock::new();

/// JSON vs. human-readable formatting, selected by `TMI_LOG_FORMAT=json`.
pub fn init() {
    let default_directive = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse_lossy(&default_directive);
    let (filter_layer, handle) = reload::Layer::new(filter);
    let _ = FILTER_HANDLE.set(handle);

    let json = std::env::var("TMI_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter_layer);
    if json {
        let _ = registry.with(tracing_subscriber::fmt::layer().json()).try_init();
    } else {
        let _ = registry.with(tracing_subscriber::fmt::layer()).try_init();
    }
}

pub fn get_current_loglevel() -> anyhow::Result<String> {
    let handle = FILTER_HANDLE
        .get()
        .ok_or_else(|| anyhow::anyhow!("telemetry not initialized"))?;
    handle
        .with_current(|f| f.to_string())
        .map_err(|e| anyhow::anyhow!("failed to read filter: {e}"))
}

/// `reset=true` restores `RUST_LOG`/`info`; otherwise `level` is either a
/// single global level (`debug`) or a comma-separated `module=level` list.
pub fn set_level(reset: bool, level: &str) -> anyhow::Result<()> {
    let handle = FILTER_HANDLE
        .get()
        .ok_or_else(|| anyhow::anyhow!("telemetry not initialized"))?;
    let new_filter = if reset {
        let default_directive = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .parse_lossy(&default_directive)
    } else {
        validate_log_level(level)?;
        Targets::new(level)
    };
    handle
        .reload(new_filter)
        .map_err(|e| anyhow::anyhow!("failed to reload filter: {e}"))
}

pub fn validate_log_level(level: &str) -> anyhow::Result<()> {
    for clause in level.split(',') {
        match clause {
            "off" | "error" | "warn" | "info" | "debug" | "trace" => continue,
            s if s.contains('=') => {
                EnvFilter::from_str(s).map_err(|e| anyhow::anyhow!("invalid directive {s}: {e}"))?;
            },
            s => anyhow::bail!("level {s} is invalid"),
        }
    }
    Ok(())
}
