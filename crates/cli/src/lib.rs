pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "leadline",
    about = "Leadline operator CLI",
    long_about = "Operate Leadline storage, demo data, config inspection, readiness checks, \
                  and on-demand ghost reminder cycles.",
    after_help = "Examples:\n  leadline doctor --json\n  leadline config\n  leadline seed\n  \
                  leadline ghost"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Config file to load instead of ./leadline.toml")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo tenants and listings, then verify them")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, database, schema, extraction and outbound readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Run one ghost reminder cycle now and print its report")]
    Ghost,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(config_path),
        Command::Seed => commands::seed::run(config_path),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(config_path) }
        }
        Command::Doctor { json } => commands::doctor::run(config_path, json),
        Command::Ghost => commands::ghost::run(config_path),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
