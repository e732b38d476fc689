//! `gatherd run` and `gatherd shutdown`: foreground agent lifecycle.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use gatherd_daemon::paths::DEFAULT_SERVER_BINARY;
use gatherd_daemon::{request, start_blocking, ControlCommand, DaemonError, DaemonOptions, DaemonRequest};

use super::home;

/// Arguments for `gatherd run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Remote server URL written into a freshly created config.
    #[arg(long)]
    pub server: Option<String>,

    /// API key written into a freshly created config.
    #[arg(long, env = "GATHERD_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Executable used to start and stop the local server.
    #[arg(long, default_value = DEFAULT_SERVER_BINARY)]
    pub server_binary: PathBuf,
}

impl RunArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let options = DaemonOptions {
            server_binary: self.server_binary,
            ..DaemonOptions::default()
        };
        let server = self.server;
        let api_key = self.api_key;

        start_blocking(&home, options, move |document| {
            if let Some(url) = server {
                document.server_url = url;
            }
            document.api_key = api_key;
            Ok(())
        })
        .context("agent exited with error")
    }
}

pub fn shutdown() -> Result<()> {
    let home = home()?;
    match request(&home, &DaemonRequest::new(ControlCommand::Shutdown)) {
        Ok(_) => println!("shutdown requested"),
        Err(DaemonError::DaemonNotRunning { .. }) => println!("agent is not running"),
        Err(err) => return Err(err).context("failed to request shutdown"),
    }
    Ok(())
}
