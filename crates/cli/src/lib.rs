pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "shopclerk",
    about = "Shopclerk operator CLI",
    long_about = "Operate shopclerk runtime readiness, migrations, config inspection, and conversation maintenance.",
    after_help = "Examples:\n  shopclerk doctor --json\n  shopclerk config\n  shopclerk sweep --hours 24"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Register a deterministic demo store for local development")]
    Seed,
    #[command(about = "Close conversations with no activity beyond the idle window")]
    Sweep {
        #[arg(long, default_value_t = 24, help = "Idle hours before an active conversation closes")]
        hours: u32,
    },
    #[command(about = "Inspect effective configuration values with secrets redacted")]
    Config,
    #[command(about = "Validate config and database connectivity checks")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Sweep { hours } => commands::sweep::run(hours),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
