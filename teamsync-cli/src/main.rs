//! teamsync: incremental workspace checkout from a repository server.
//!
//! # Usage
//!
//! ```text
//! teamsync checkout --config <yaml> --workspace <dir> --build <n>
//! teamsync changes  --config <yaml> --build <n> [--json]
//! teamsync status   --config <yaml> [--build <n>] [--json]
//! teamsync submit   --config <yaml> --workspace <dir> --build <n>
//! teamsync worker start|stop|status
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    changes::ChangesArgs, checkout::CheckoutArgs, status::StatusArgs, submit::SubmitArgs,
    worker::WorkerCommand,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "teamsync",
    version,
    about = "Check out repository views into build workspaces, one run at a time",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bring a workspace up to date and record the run.
    Checkout(CheckoutArgs),

    /// Show what a checkout would change, without touching the workspace.
    Changes(ChangesArgs),

    /// Show the file points recorded by a run.
    Status(StatusArgs),

    /// Run a checkout on the local worker.
    Submit(SubmitArgs),

    /// Manage the checkout worker.
    Worker {
        #[command(subcommand)]
        command: WorkerCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Checkout(args) => {
            init_tracing();
            args.run()
        }
        Commands::Changes(args) => {
            init_tracing();
            args.run()
        }
        Commands::Status(args) => args.run(),
        Commands::Submit(args) => args.run(),
        // The worker installs its own subscriber.
        Commands::Worker { command } => commands::worker::run(command),
    }
}

/// Diagnostics on stderr; run output itself goes to stdout.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
