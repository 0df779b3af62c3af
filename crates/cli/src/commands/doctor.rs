use std::path::Path;

use leadline_agent::extraction::client_from_config;
use leadline_channels::sender_from_config;
use leadline_core::config::AppConfig;
use leadline_db::migrations::MIGRATOR;
use leadline_db::{connect_with_settings, DbPool};
use serde::Serialize;

use crate::commands::{load_config, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn new(name: &'static str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name, status, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

/// Exit code 0 when nothing failed. Warnings do not fail the report.
pub fn run(config_path: Option<&Path>, json_output: bool) -> CommandResult {
    let report = build_report(config_path);
    let exit_code = if report.overall_status == CheckStatus::Fail { 1 } else { 0 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report(config_path: Option<&Path>) -> DoctorReport {
    let mut checks = Vec::new();

    match load_config(config_path) {
        Ok(config) => {
            checks.push(DoctorCheck::new(
                "config_validation",
                CheckStatus::Pass,
                "configuration loaded and validated",
            ));
            checks.extend(check_database(&config));
            checks.push(check_extraction(&config));
            checks.push(check_outbound(&config));
            checks.push(check_webhook_secret(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::new("config_validation", CheckStatus::Fail, error.to_string()));
            for name in [
                "database_connectivity",
                "schema_migrations",
                "extraction_readiness",
                "outbound_readiness",
                "webhook_signature",
            ] {
                checks.push(DoctorCheck::new(
                    name,
                    CheckStatus::Skipped,
                    "skipped because configuration did not load",
                ));
            }
        }
    }

    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let warned = checks.iter().any(|check| check.status == CheckStatus::Warn);
    let (overall_status, summary) = match (failed, warned) {
        (true, _) => (CheckStatus::Fail, "doctor: one or more readiness checks failed"),
        (false, true) => (CheckStatus::Warn, "doctor: ready with warnings"),
        (false, false) => (CheckStatus::Pass, "doctor: all readiness checks passed"),
    };

    DoctorReport { overall_status, summary: summary.to_string(), checks }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck::new(
                    "database_connectivity",
                    CheckStatus::Fail,
                    format!("failed to initialize async runtime: {error}"),
                ),
                DoctorCheck::new(
                    "schema_migrations",
                    CheckStatus::Skipped,
                    "skipped because the database was not reachable",
                ),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck::new(
                        "database_connectivity",
                        CheckStatus::Fail,
                        format!("failed to connect to database: {error}"),
                    ),
                    DoctorCheck::new(
                        "schema_migrations",
                        CheckStatus::Skipped,
                        "skipped because the database was not reachable",
                    ),
                ];
            }
        };

        let checks = vec![
            DoctorCheck::new(
                "database_connectivity",
                CheckStatus::Pass,
                format!("connected using `{}`", config.database.url),
            ),
            check_schema(&pool).await,
        ];
        pool.close().await;
        checks
    })
}

/// Compares applied migrations against the ones compiled into the binary without applying any.
/// The server migrates on startup, so a stale schema only warns.
async fn check_schema(pool: &DbPool) -> DoctorCheck {
    let known = MIGRATOR
        .iter()
        .filter(|migration| !migration.migration_type.is_down_migration())
        .count();

    let applied = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1",
    )
    .fetch_one(pool)
    .await;

    match applied {
        Ok(applied) if usize::try_from(applied).unwrap_or(0) >= known => DoctorCheck::new(
            "schema_migrations",
            CheckStatus::Pass,
            format!("{applied} of {known} migrations applied"),
        ),
        Ok(applied) => DoctorCheck::new(
            "schema_migrations",
            CheckStatus::Warn,
            format!("{applied} of {known} migrations applied; run `leadline migrate`"),
        ),
        Err(_) => DoctorCheck::new(
            "schema_migrations",
            CheckStatus::Warn,
            "schema not initialized; run `leadline migrate`",
        ),
    }
}

fn check_extraction(config: &AppConfig) -> DoctorCheck {
    match client_from_config(&config.extraction) {
        Ok(client) if config.extraction.base_url.is_some() => DoctorCheck::new(
            "extraction_readiness",
            CheckStatus::Pass,
            format!("{} client, timeout {} ms", client.name(), config.extraction.timeout_ms),
        ),
        Ok(client) => DoctorCheck::new(
            "extraction_readiness",
            CheckStatus::Warn,
            format!("extraction.base_url unset; using the {} fallback", client.name()),
        ),
        Err(error) => {
            DoctorCheck::new("extraction_readiness", CheckStatus::Fail, error.to_string())
        }
    }
}

fn check_outbound(config: &AppConfig) -> DoctorCheck {
    match sender_from_config(&config.channels) {
        Ok(_) if config.channels.outbound_url.is_some() => DoctorCheck::new(
            "outbound_readiness",
            CheckStatus::Pass,
            format!("relay sender, timeout {} ms", config.channels.send_timeout_ms),
        ),
        Ok(_) => DoctorCheck::new(
            "outbound_readiness",
            CheckStatus::Warn,
            "channels.outbound_url unset; ghost reminders are only logged",
        ),
        Err(error) => DoctorCheck::new("outbound_readiness", CheckStatus::Fail, error.to_string()),
    }
}

fn check_webhook_secret(config: &AppConfig) -> DoctorCheck {
    if config.server.webhook_secret.is_some() {
        DoctorCheck::new("webhook_signature", CheckStatus::Pass, "inbound webhooks must be signed")
    } else {
        DoctorCheck::new(
            "webhook_signature",
            CheckStatus::Warn,
            "server.webhook_secret unset; inbound webhooks are accepted unsigned",
        )
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
