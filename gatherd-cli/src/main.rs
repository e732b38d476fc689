//! gatherd: local data-gathering agent CLI.
//!
//! # Usage
//!
//! ```text
//! gatherd run [--server URL] [--api-key KEY] [--server-binary PATH]
//! gatherd status [--json]
//! gatherd start|stop
//! gatherd sync start|stop
//! gatherd gatherer list|enable <name>|disable <name>
//! gatherd interval <seconds>
//! gatherd local-server on|off
//! gatherd shutdown
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    control::{GathererCommand, LocalServerCommand, SyncCommand},
    daemon::RunArgs,
    status::StatusArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "gatherd",
    version,
    about = "Run and control the local data-gathering agent",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the agent in the foreground (orchestrator + control socket).
    Run(RunArgs),

    /// Show acquisition, sync and gatherer state of the running agent.
    Status(StatusArgs),

    /// Start periodic acquisition.
    Start,

    /// Stop acquisition and remember that it is off.
    Stop,

    /// Turn background sync on or off.
    Sync {
        #[command(subcommand)]
        command: SyncCommand,
    },

    /// List, enable or disable gatherers.
    Gatherer {
        #[command(subcommand)]
        command: GathererCommand,
    },

    /// Set the gathering interval in seconds.
    Interval {
        /// Seconds between acquisition cycles.
        seconds: f64,
    },

    /// Turn the bundled local server on or off.
    LocalServer {
        #[command(subcommand)]
        command: LocalServerCommand,
    },

    /// Ask the running agent to exit.
    Shutdown,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Start => commands::control::start(),
        Commands::Stop => commands::control::stop(),
        Commands::Sync { command } => commands::control::sync(command),
        Commands::Gatherer { command } => commands::control::gatherer(command),
        Commands::Interval { seconds } => commands::control::interval(seconds),
        Commands::LocalServer { command } => commands::control::local_server(command),
        Commands::Shutdown => commands::daemon::shutdown(),
    }
}
