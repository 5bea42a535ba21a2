//! `omx`: minimal launcher surface over `omx-core`/`omx-orchestrator`.
//!
//! Every subcommand is a thin call into the library crates: argument
//! parsing and wiring only, no business logic.

mod commands;

use clap::{Parser, Subcommand};

/// Launch and operate omx coding-agent teams.
#[derive(Parser, Debug)]
#[command(name = "omx", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a new team and write its state tree.
    Start(commands::StartArgs),
    /// Print a team's current status as JSON.
    Status(commands::StatusArgs),
    /// Run the monitor loop against a team.
    Monitor(commands::MonitorArgs),
    /// Shut a team down, optionally forcing pane termination.
    Shutdown(commands::ShutdownArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    omx_core::logging::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Start(args) => commands::start(args).await,
        Commands::Status(args) => commands::status(args).await,
        Commands::Monitor(args) => commands::monitor(args).await,
        Commands::Shutdown(args) => commands::shutdown(args).await,
    }
}
