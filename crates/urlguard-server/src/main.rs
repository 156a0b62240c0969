//! URLGuard Server - Main Entry Point

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use urlguard_core::config::{CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use urlguard_core::{build_orchestrator, GuardConfig, GuardError};
use urlguard_server::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("URLGuard v{}", urlguard_core::VERSION);

    // Load config
    let config_path = std::env::var(CONFIG_PATH_ENV)
        .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());

    let mut config = match GuardConfig::load(&config_path) {
        Ok(config) => config,
        Err(GuardError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("Config not found at {}, using defaults", config_path);
            GuardConfig::default()
        }
        Err(e) => return Err(e).context(format!("failed to load {}", config_path)),
    };
    config.apply_env();
    config.validate().context("invalid configuration")?;

    let orchestrator = build_orchestrator(&config).context("failed to build probes")?;
    tracing::info!(
        "Probes: {:?}, cache TTL {}s, overall deadline {:?}",
        orchestrator.probe_kinds().iter().map(|k| k.label()).collect::<Vec<_>>(),
        config.cache.ttl_secs,
        orchestrator.overall_deadline()
    );

    let app = build_router(AppState::new(orchestrator));

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    tracing::info!("URLGuard listening on {}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("URLGuard stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
