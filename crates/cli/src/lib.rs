pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "forecourt",
    about = "Forecourt operator CLI",
    long_about = "Operate the forecourt ledger: migrations, tank seeding, config inspection, readiness checks and approval backlog.",
    after_help = "Examples:\n  forecourt migrate\n  forecourt seed\n  forecourt doctor --json\n  forecourt backlog"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Register the default fuel tanks; tanks that already exist are left as-is")]
    Seed,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, DB connectivity, schema state and tank registry")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Print pending approval counts per role as reminder requests")]
    Backlog,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Backlog => commands::backlog::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
