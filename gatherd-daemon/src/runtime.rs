use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use gatherd_core::{ConfigStore, Document, FileStore, GathererFactory, StoreError};

use crate::error::{io_err, DaemonError};
use crate::orchestrator::Orchestrator;
use crate::paths::{gatherd_root, local_server_dir, socket_path, DEFAULT_SERVER_BINARY};
use crate::plugins::BUILTIN_GATHERERS;
use crate::protocol::{ControlCommand, DaemonRequest, DaemonResponse};
use crate::registry::GathererRegistry;
use crate::supervisor::{CommandSupervisor, LocalServerSupervisor, StopOutcome};

/// Daemon wiring that differs between the installed agent and tests.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub server_binary: PathBuf,
    pub gatherers: &'static [GathererFactory],
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            server_binary: PathBuf::from(DEFAULT_SERVER_BINARY),
            gatherers: BUILTIN_GATHERERS,
        }
    }
}

/// Open the store, then run the daemon and block the current thread until it
/// exits. `on_create` runs only when no config exists yet; its failure aborts
/// startup.
pub fn start_blocking<F>(home: &Path, options: DaemonOptions, on_create: F) -> Result<(), DaemonError>
where
    F: FnOnce(&mut Document) -> Result<(), StoreError>,
{
    init_tracing();
    let root = gatherd_root(home);
    tracing::info!(path = %root.display(), "opening store");
    let store = Arc::new(FileStore::open_at(root, on_create)?);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), store, options))
}

/// Run the daemon: restore orchestration state, serve the control socket,
/// and shut down on `shutdown` or ctrl-c.
pub async fn run(
    home: PathBuf,
    store: Arc<dyn ConfigStore>,
    options: DaemonOptions,
) -> Result<(), DaemonError> {
    let root = gatherd_root(&home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }

    let registry = GathererRegistry::from_factories(options.gatherers)?;
    let supervisor = LocalServerSupervisor::new(
        local_server_dir(&home),
        Arc::new(CommandSupervisor::new(&options.server_binary)),
    );
    let handle = Handle::current();
    let core = tokio::task::spawn_blocking(move || {
        Orchestrator::new(store, registry, supervisor, handle)
    })
    .await
    .map_err(|err| DaemonError::Protocol(format!("startup join error: {err}")))??;

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let core = core.clone();
        tokio::spawn(async move {
            let result =
                socket_server_task(home, core, shutdown.clone(), shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (socket_result, signal_result) = tokio::join!(socket_handle, signal_handle);

    let outcome = tokio::task::spawn_blocking(move || shutdown_core(&core))
        .await
        .map_err(|err| DaemonError::Protocol(format!("shutdown join error: {err}")))?;
    tracing::info!(local_server = ?outcome, "daemon stopped");

    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

/// Stop polling without clearing the persisted intent, then release the
/// local server.
fn shutdown_core(core: &Orchestrator) -> StopOutcome {
    if let Err(err) = core.stop(true) {
        tracing::warn!(error = %err, "stopping acquisition on shutdown failed");
    }
    core.exit()
}

async fn socket_server_task(
    home: PathBuf,
    core: Orchestrator,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "control socket listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let core = core.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, core, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    core: Orchestrator,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        // Reply before signalling so the caller is not cut off by the exit.
        if request.cmd == ControlCommand::Shutdown {
            write_response(&mut writer, &DaemonResponse::ok(json!({ "stopping": true }))).await?;
            let _ = shutdown_tx.send(());
            break;
        }

        let core = core.clone();
        let response = match tokio::task::spawn_blocking(move || execute(&core, &request)).await {
            Ok(Ok(data)) => DaemonResponse::ok(data),
            Ok(Err(err)) => DaemonResponse::error(err.to_string()),
            Err(err) => DaemonResponse::error(format!("request join error: {err}")),
        };
        write_response(&mut writer, &response).await?;
    }

    Ok(())
}

/// Apply one control request to the orchestrator.
pub fn execute(core: &Orchestrator, request: &DaemonRequest) -> Result<Value, DaemonError> {
    match request.cmd {
        ControlCommand::Status => Ok(serde_json::to_value(core.status()?)?),
        ControlCommand::Start => {
            core.start()?;
            Ok(json!({ "running": true }))
        }
        ControlCommand::Stop => {
            core.stop(false)?;
            Ok(json!({ "running": false }))
        }
        ControlCommand::StartSync => {
            core.start_sync()?;
            Ok(json!({ "syncing": true }))
        }
        ControlCommand::StopSync => {
            core.stop_sync()?;
            Ok(json!({ "syncing": false }))
        }
        ControlCommand::EnableGatherer => {
            let name = required_gatherer(request)?;
            core.add_gatherer(name)?;
            Ok(json!({ "gatherer": name, "active": true }))
        }
        ControlCommand::DisableGatherer => {
            let name = required_gatherer(request)?;
            core.remove_gatherer(name)?;
            Ok(json!({ "gatherer": name, "active": false }))
        }
        ControlCommand::SetInterval => {
            let seconds = request
                .value
                .as_ref()
                .and_then(Value::as_f64)
                .ok_or_else(|| {
                    DaemonError::Protocol("set-interval requires a numeric value".to_string())
                })?;
            core.set_interval(seconds)?;
            Ok(json!({ "gather_interval_seconds": seconds }))
        }
        ControlCommand::SetRunLocal => {
            let run_local = request
                .value
                .as_ref()
                .and_then(Value::as_bool)
                .ok_or_else(|| {
                    DaemonError::Protocol("set-run-local requires a boolean value".to_string())
                })?;
            let server_running = core.set_run_local(run_local)?;
            Ok(json!({ "run_local": run_local, "local_server_running": server_running }))
        }
        ControlCommand::Shutdown => Ok(json!({ "stopping": true })),
    }
}

fn required_gatherer(request: &DaemonRequest) -> Result<&str, DaemonError> {
    request
        .gatherer
        .as_deref()
        .ok_or_else(|| DaemonError::Protocol("request is missing a gatherer name".to_string()))
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
