use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use leadline_agent::{GhostRunResult, GhostScheduler, ReplyTemplates};
use leadline_channels::sender_from_config;
use leadline_core::config::AppConfig;
use leadline_core::ghost::GhostCycleReport;
use leadline_db::repositories::SqlLeadRepository;
use leadline_db::DbPool;

use crate::commands::{load_config, open_database, runtime, CommandResult, StepFailure};

/// Runs a single cycle regardless of `ghost.enabled`; the flag only gates the server's timer.
pub fn run(config_path: Option<&Path>) -> CommandResult {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "ghost",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let result = runtime().and_then(|runtime| {
        runtime.block_on(async {
            let pool = open_database(&config).await?;
            let outcome = run_cycle(&config, &pool).await;
            pool.close().await;
            outcome
        })
    });

    match result {
        Ok(report) => CommandResult::success("ghost", summary(&report)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("ghost", error_class, message, exit_code)
        }
    }
}

async fn run_cycle(config: &AppConfig, pool: &DbPool) -> Result<GhostCycleReport, StepFailure> {
    let templates = ReplyTemplates::embedded()
        .map_err(|error| ("templates", error.to_string(), 6u8))?;
    let sender = sender_from_config(&config.channels)
        .map_err(|error| ("outbound_setup", error.to_string(), 6u8))?;

    let scheduler = GhostScheduler::from_config(
        Arc::new(SqlLeadRepository::new(pool.clone())),
        sender,
        Arc::new(templates),
        &config.ghost,
        &config.channels,
    );

    match scheduler.run_once(Utc::now()).await {
        Ok(GhostRunResult::Completed(report)) => Ok(report),
        Ok(GhostRunResult::AlreadyRunning) => {
            Err(("ghost_busy", "a ghost cycle is already running".to_string(), 7))
        }
        Err(error) => Err(("ghost_cycle", error.to_string(), 6)),
    }
}

fn summary(report: &GhostCycleReport) -> String {
    format!(
        "{}: {} batches, {} selected, {} delivered, {} exhausted, {} skipped, {} failed",
        report.cycle_id,
        report.batches,
        report.selected,
        report.delivered,
        report.exhausted,
        report.skipped,
        report.failed
    )
}
