//! Thin CLI entry point: load configuration, wire `AppState`, serve the
//! public and admin HTTP surfaces, and drain gracefully on SIGTERM/SIGINT.

use std::net::SocketAddr;

use clap::Parser;
use tmi_core::{signal, telemetry};
use tmi_server::config::Config;
use tmi_server::http::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "tmi-app", version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Path to a `.env`-style file to load before reading the environment.
    #[arg(long)]
    env_file: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();
    let cli = Cli::parse();
    if let Some(path) = &cli.env_file {
        dotenv_like(path)?;
    }

    let config = Config::from_env()?;
    let pool = sqlx::postgres::PgPoolOptions::new().max_connections(20).connect(&config.database_url).await?;
    let kv = tmi_server::kv::KvClient::connect(config.redis_url.as_deref()).await;
    let jwt = None; // populated once an issuer JWKS is configured; absent means `AuthUser` rejects every request.

    let bind_addr: SocketAddr = config.bind_addr.parse()?;
    let admin_addr: SocketAddr = config.admin_addr.parse()?;
    let state = AppState::new(pool, kv, config, jwt);

    let shutdown = signal::ShutdownTrigger::new();
    state.warmer.start_proactive_warming();

    let app_router = tmi_server::http::router(state.clone())
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(%bind_addr, %admin_addr, "tmi-app listening");

    let signal_waiter = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { shutdown.wait_for_signal().await })
    };

    let shutdown_token = shutdown.token();
    axum::serve(listener, app_router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move { shutdown_token.cancelled().await })
        .await?;

    signal_waiter.abort();
    state.warmer.stop_proactive_warming();
    shutdown.wait_with_timeout(std::time::Duration::from_secs(state.config.termination_min_deadline_secs)).await;
    shutdown.mark_done();
    Ok(())
}

/// Minimal `KEY=VALUE` loader so the binary doesn't pull in a dedicated
/// dotenv crate for a handful of local-dev convenience vars.
fn dotenv_like(path: &std::path::Path) -> anyhow::Result<()> {
    let contents = std::fs::read_to_string(path)?;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if std::env::var(key).is_err() {
                unsafe { std::env::set_var(key, value) };
            }
        }
    }
    Ok(())
}
