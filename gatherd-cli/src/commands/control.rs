//! Commands that change the running agent's state over the control socket.

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde_json::Value;

use gatherd_daemon::{request, ControlCommand, DaemonError, DaemonRequest};

use super::{home, status};

#[derive(Subcommand, Debug)]
pub enum SyncCommand {
    /// Start background sync.
    Start,
    /// Stop background sync.
    Stop,
}

#[derive(Subcommand, Debug)]
pub enum GathererCommand {
    /// List known gatherers and whether they are active.
    List,
    /// Enable a gatherer by stream name.
    Enable { name: String },
    /// Disable a gatherer by stream name.
    Disable { name: String },
}

#[derive(Subcommand, Debug)]
pub enum LocalServerCommand {
    /// Run the bundled local server.
    On,
    /// Stop the bundled local server.
    Off,
}

pub fn start() -> Result<()> {
    send(DaemonRequest::new(ControlCommand::Start))?;
    println!("acquisition {}", "started".green());
    Ok(())
}

pub fn stop() -> Result<()> {
    send(DaemonRequest::new(ControlCommand::Stop))?;
    println!("acquisition {}", "stopped".yellow());
    Ok(())
}

pub fn sync(command: SyncCommand) -> Result<()> {
    match command {
        SyncCommand::Start => {
            send(DaemonRequest::new(ControlCommand::StartSync))?;
            println!("background sync {}", "started".green());
        }
        SyncCommand::Stop => {
            send(DaemonRequest::new(ControlCommand::StopSync))?;
            println!("background sync {}", "stopped".yellow());
        }
    }
    Ok(())
}

pub fn gatherer(command: GathererCommand) -> Result<()> {
    match command {
        GathererCommand::List => status::print_gatherers(),
        GathererCommand::Enable { name } => {
            send(DaemonRequest::for_gatherer(ControlCommand::EnableGatherer, &name))?;
            println!("{name}: {}", "enabled".green());
            Ok(())
        }
        GathererCommand::Disable { name } => {
            send(DaemonRequest::for_gatherer(ControlCommand::DisableGatherer, &name))?;
            println!("{name}: {}", "disabled".yellow());
            Ok(())
        }
    }
}

pub fn interval(seconds: f64) -> Result<()> {
    if !seconds.is_finite() || seconds <= 0.0 {
        bail!("interval must be a positive number of seconds, got {seconds}");
    }
    send(DaemonRequest::with_value(ControlCommand::SetInterval, seconds))?;
    println!("gathering every {seconds}s");
    Ok(())
}

pub fn local_server(command: LocalServerCommand) -> Result<()> {
    let run_local = matches!(command, LocalServerCommand::On);
    let data = send(DaemonRequest::with_value(ControlCommand::SetRunLocal, run_local))?;
    let server_running = data
        .get("local_server_running")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    match (run_local, server_running) {
        (true, true) => println!("local server {}", "running".green()),
        (true, false) => println!(
            "local server {} (see agent log)",
            "failed to start".red()
        ),
        (false, _) => println!("local server {}", "off".yellow()),
    }
    Ok(())
}

fn send(req: DaemonRequest) -> Result<Value> {
    let home = home()?;
    match request(&home, &req) {
        Ok(data) => Ok(data),
        Err(DaemonError::DaemonNotRunning { socket }) => bail!(
            "agent is not running (no socket at {}); start it with `gatherd run`",
            socket.display()
        ),
        Err(err) => Err(err).with_context(|| format!("{:?} request failed", req.cmd)),
    }
}
