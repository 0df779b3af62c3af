mod audit;
mod bootstrap;
mod health;
mod routes;

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use leadline_agent::spawn_periodic;
use leadline_core::config::{AppConfig, LoadOptions};
use tracing_subscriber::EnvFilter;

const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60);

fn init_logging(config: &AppConfig) {
    use leadline_core::config::LogFormat::*;

    // RUST_LOG wins over the configured level when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let server = &app.config.server;
    let address = format!("{}:{}", server.bind_address, server.port);

    let router = routes::router(routes::AppState {
        orchestrator: app.orchestrator.clone(),
        ghost: app.ghost.clone(),
        webhook_secret: server.webhook_secret.clone(),
    })
    .merge(health::router(app.db_pool.clone()));

    let ghost_task = app.config.ghost.enabled.then(|| app.ghost.spawn());
    let orchestrator = app.orchestrator.clone();
    let housekeeping = spawn_periodic("housekeeping", HOUSEKEEPING_INTERVAL, move || {
        let orchestrator = orchestrator.clone();
        async move {
            if let Err(error) = orchestrator.housekeeping(Utc::now()).await {
                tracing::warn!(event_name = "system.housekeeping.failed", error = %error);
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("could not bind {address}"))?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        ghost_enabled = ghost_task.is_some(),
        "leadline-server listening"
    );

    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "draining background tasks"
    );
    let grace = Duration::from_secs(server.graceful_shutdown_secs.max(1));
    let drain = async {
        housekeeping.stop().await;
        if let Some(task) = ghost_task {
            task.stop().await;
        }
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        tracing::warn!(
            event_name = "system.server.drain_timed_out",
            grace_secs = grace.as_secs(),
            "background tasks did not stop in time"
        );
    }
    app.db_pool.close().await;

    tracing::info!(event_name = "system.server.stopped", correlation_id = "shutdown");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(event_name = "system.signal.ctrl_c_failed", error = %error);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(event_name = "system.signal.sigterm_failed", error = %error);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!(event_name = "system.signal.received", signal = "ctrl_c"),
        _ = terminate => tracing::info!(event_name = "system.signal.received", signal = "sigterm"),
    }
}
