//! gatherd daemon: the orchestration core plus its control socket runtime.

mod error;
pub mod orchestrator;
pub mod paths;
pub mod plugins;
pub mod protocol;
pub mod registry;
mod runtime;
pub mod scheduler;
pub mod supervisor;
pub mod sync;

#[cfg(test)]
mod testing;

pub use error::DaemonError;
pub use orchestrator::{GathererStatus, Orchestrator, StatusReport};
pub use protocol::{
    request, request_status, send_request, ControlCommand, DaemonRequest, DaemonResponse,
};
pub use registry::{CycleReport, GathererRegistry};
pub use runtime::{execute, run, start_blocking, DaemonOptions};
pub use scheduler::PollScheduler;
pub use supervisor::{CommandSupervisor, LocalServerSupervisor, ProcessSupervisor, StopOutcome};
pub use sync::SyncController;
