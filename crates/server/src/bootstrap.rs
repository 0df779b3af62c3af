use std::sync::Arc;

use leadline_agent::extraction::{client_from_config, ExtractionError};
use leadline_agent::{
    GhostScheduler, Orchestrator, OrchestratorParts, OrchestratorSettings, ReplyTemplates,
    TemplateError,
};
use leadline_channels::{sender_from_config, DeliveryError};
use leadline_core::config::{AppConfig, ConfigError, LoadOptions};
use leadline_core::matching::MatchingEngine;
use leadline_core::scoring::LeadScorer;
use leadline_db::repositories::{
    SqlConversationRepository, SqlInventoryRepository, SqlLeadRepository, SqlTenantRepository,
};
use leadline_db::{connect_with_settings, migrations, DbPool};
use thiserror::Error;
use tracing::info;

use crate::audit::TracingAuditSink;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub orchestrator: Arc<Orchestrator>,
    pub ghost: Arc<GhostScheduler>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("extraction client setup failed: {0}")]
    Extraction(#[source] ExtractionError),
    #[error("outbound channel setup failed: {0}")]
    Delivery(#[source] DeliveryError),
    #[error("reply templates failed to load: {0}")]
    Templates(#[source] TemplateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let templates = Arc::new(ReplyTemplates::embedded().map_err(BootstrapError::Templates)?);
    let extractor = client_from_config(&config.extraction).map_err(BootstrapError::Extraction)?;
    let leads = Arc::new(SqlLeadRepository::new(db_pool.clone()));

    let orchestrator = Orchestrator::new(
        OrchestratorParts {
            tenants: Arc::new(SqlTenantRepository::new(db_pool.clone())),
            conversations: Arc::new(SqlConversationRepository::new(db_pool.clone())),
            leads: leads.clone(),
            inventory: Arc::new(SqlInventoryRepository::new(db_pool.clone())),
            extractor: extractor.clone(),
            audit: Arc::new(TracingAuditSink),
            templates: templates.clone(),
            scorer: LeadScorer::new(config.scoring.clone()),
            matching: MatchingEngine::new(config.matching.clone()),
        },
        OrchestratorSettings::from_config(&config.conversation, &config.extraction),
    );

    let sender = sender_from_config(&config.channels).map_err(BootstrapError::Delivery)?;
    let ghost =
        GhostScheduler::from_config(leads, sender, templates, &config.ghost, &config.channels);

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        extractor = extractor.name(),
        outbound = if config.channels.outbound_url.is_some() { "relay" } else { "log" },
        ghost_enabled = config.ghost.enabled,
        "application components wired"
    );

    Ok(Application {
        config,
        db_pool,
        orchestrator: Arc::new(orchestrator),
        ghost: Arc::new(ghost),
    })
}
