//! The orchestration core: acquisition, background sync, and the local
//! server, all gated by the persisted document.
//!
//! Acquisition and sync are independent two-state machines:
//!
//! ```text
//! STOPPED --start()--> RUNNING --stop()--> STOPPED
//! ```
//!
//! # Locking
//!
//! The registry, the runtime running flag, and the poll timer live together
//! behind one mutex. A tick holds it for the whole cycle, so enable/disable
//! is atomic with respect to polling, and `stop()` cancels the timer under
//! the same lock a pending tick must take before it runs. Lock order is
//! acquisition → store document; the store never calls back into the core.

use std::path::Path;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use gatherd_core::store::with_config;
use gatherd_core::types::DEFAULT_GATHER_INTERVAL;
use gatherd_core::ConfigStore;

use crate::error::DaemonError;
use crate::registry::GathererRegistry;
use crate::scheduler::{interval_from_seconds, PollScheduler};
use crate::supervisor::{LocalServerSupervisor, StopOutcome};
use crate::sync::SyncController;

/// Cheaply cloneable handle to the single orchestration core of a process.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn ConfigStore>,
    acquisition: Mutex<Acquisition>,
    sync: Mutex<SyncController>,
    server: LocalServerSupervisor,
}

struct Acquisition {
    registry: GathererRegistry,
    running: bool,
    scheduler: PollScheduler,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GathererStatus {
    pub name: String,
    pub nickname: String,
    pub datatype: String,
    pub description: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub running: bool,
    pub syncing: bool,
    pub run_local: bool,
    pub local_server_running: bool,
    pub gather_interval_seconds: f64,
    pub gatherers: Vec<GathererStatus>,
}

impl Orchestrator {
    /// Build the core and restore the persisted state: apply the disabled
    /// list, start the local server if requested, then resume acquisition and
    /// sync if they were on when the process last ran.
    pub fn new(
        store: Arc<dyn ConfigStore>,
        mut registry: GathererRegistry,
        server: LocalServerSupervisor,
        handle: Handle,
    ) -> Result<Self, DaemonError> {
        let document = store.get()?;
        for name in &document.disabled_gatherers {
            registry.deactivate(name);
        }

        let orchestrator = Self {
            inner: Arc::new(Inner {
                store,
                acquisition: Mutex::new(Acquisition {
                    registry,
                    running: false,
                    scheduler: PollScheduler::new(handle),
                }),
                sync: Mutex::new(SyncController::default()),
                server,
            }),
        };

        orchestrator.inner.server.ensure_started(document.run_local);
        if document.is_running {
            orchestrator.start()?;
        }
        if document.is_background_sync {
            orchestrator.start_sync()?;
        }
        Ok(orchestrator)
    }

    /// Begin acquisition. No-op while already running.
    ///
    /// Streams for every known gatherer are registered before any gatherer
    /// is started, and the first cycle runs before this returns.
    pub fn start(&self) -> Result<(), DaemonError> {
        let inner = &self.inner;
        let mut acquisition = inner.acquisition.lock();
        if acquisition.running {
            return Ok(());
        }

        tracing::info!("starting acquisition");
        with_config(inner.store.as_ref(), |doc| doc.is_running = true)?;
        acquisition.registry.reconcile_streams(inner.store.as_ref())?;
        acquisition.registry.start_active(inner.store.as_ref());
        acquisition.running = true;

        Inner::run_cycle(inner, &mut acquisition);
        Ok(())
    }

    /// Stop acquisition. A `temporary` stop keeps the persisted running
    /// intent so the next process start resumes polling.
    pub fn stop(&self, temporary: bool) -> Result<(), DaemonError> {
        let inner = &self.inner;
        let mut acquisition = inner.acquisition.lock();

        tracing::info!(temporary, "stopping acquisition");
        acquisition.scheduler.cancel();
        if acquisition.running {
            acquisition.registry.stop_active();
        }
        acquisition.running = false;

        if !temporary {
            with_config(inner.store.as_ref(), |doc| doc.is_running = false)?;
        }
        Ok(())
    }

    pub fn add_gatherer(&self, name: &str) -> Result<(), DaemonError> {
        tracing::info!(gatherer = %name, "enabling gatherer");
        let mut acquisition = self.inner.acquisition.lock();
        let running = acquisition.running;
        acquisition
            .registry
            .enable(name, running, self.inner.store.as_ref())
    }

    pub fn remove_gatherer(&self, name: &str) -> Result<(), DaemonError> {
        tracing::info!(gatherer = %name, "disabling gatherer");
        let mut acquisition = self.inner.acquisition.lock();
        let running = acquisition.running;
        acquisition
            .registry
            .disable(name, running, self.inner.store.as_ref())
    }

    pub fn start_sync(&self) -> Result<(), DaemonError> {
        self.inner.sync.lock().start(self.inner.store.as_ref())
    }

    pub fn stop_sync(&self) -> Result<(), DaemonError> {
        self.inner.sync.lock().stop(self.inner.store.as_ref())
    }

    /// Persist a new polling interval; the next cycle picks it up.
    pub fn set_interval(&self, seconds: f64) -> Result<(), DaemonError> {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(DaemonError::InvalidInterval(seconds));
        }
        with_config(self.inner.store.as_ref(), |doc| {
            doc.gather_interval_seconds = seconds;
        })?;
        Ok(())
    }

    /// Persist whether the local server is supervised, starting or stopping
    /// it to match.
    pub fn set_run_local(&self, run_local: bool) -> Result<bool, DaemonError> {
        if !run_local {
            self.inner.server.ensure_stopped(true);
        }
        with_config(self.inner.store.as_ref(), |doc| doc.run_local = run_local)?;
        if run_local {
            self.inner.server.ensure_started(true);
        }
        Ok(self.inner.server.is_running())
    }

    /// Best-effort shutdown of the local server. Acquisition and sync are
    /// left as they are.
    pub fn exit(&self) -> StopOutcome {
        let run_local = match self.inner.store.get() {
            Ok(doc) => doc.run_local,
            Err(err) => {
                tracing::warn!(error = %err, "could not read config on exit");
                true
            }
        };
        self.inner.server.ensure_stopped(run_local)
    }

    pub fn is_running(&self) -> bool {
        self.inner.acquisition.lock().running
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.sync.lock().is_syncing()
    }

    pub fn is_local_server_running(&self) -> bool {
        self.inner.server.is_running()
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.inner.acquisition.lock().registry.is_active(name)
    }

    /// Whether a next polling cycle is scheduled.
    pub fn is_cycle_pending(&self) -> bool {
        self.inner.acquisition.lock().scheduler.is_pending()
    }

    pub fn local_server_dir(&self) -> &Path {
        self.inner.server.directory()
    }

    pub fn status(&self) -> Result<StatusReport, DaemonError> {
        let document = self.inner.store.get()?;
        let (running, gatherers) = {
            let acquisition = self.inner.acquisition.lock();
            let gatherers = acquisition
                .registry
                .descriptors()
                .map(|(descriptor, active)| GathererStatus {
                    name: descriptor.stream_name.clone(),
                    nickname: descriptor.nickname.clone(),
                    datatype: descriptor.datatype.clone(),
                    description: descriptor.description.clone(),
                    active,
                })
                .collect();
            (acquisition.running, gatherers)
        };

        Ok(StatusReport {
            running,
            syncing: self.is_syncing(),
            run_local: document.run_local,
            local_server_running: self.inner.server.is_running(),
            gather_interval_seconds: document.gather_interval_seconds,
            gatherers,
        })
    }
}

impl Inner {
    /// Timer entry point. Refuses to run once acquisition stopped or the
    /// token was cancelled; both are checked under the acquisition lock.
    fn tick(inner: &Arc<Inner>, token: &CancellationToken) {
        let mut acquisition = inner.acquisition.lock();
        if !acquisition.running || token.is_cancelled() {
            return;
        }
        Inner::run_cycle(inner, &mut acquisition);
    }

    /// Run every active gatherer once, then schedule the next cycle using
    /// the interval currently persisted.
    fn run_cycle(inner: &Arc<Inner>, acquisition: &mut Acquisition) {
        let report = acquisition.registry.run_active(inner.store.as_ref());
        tracing::debug!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "poll cycle completed",
        );

        let seconds = match inner.store.get() {
            Ok(doc) => doc.gather_interval_seconds,
            Err(err) => {
                tracing::warn!(error = %err, "could not read gather interval; using default");
                DEFAULT_GATHER_INTERVAL
            }
        };

        let weak: Weak<Inner> = Arc::downgrade(inner);
        acquisition
            .scheduler
            .schedule(interval_from_seconds(seconds), move |token| {
                if let Some(inner) = weak.upgrade() {
                    Inner::tick(&inner, &token);
                }
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use gatherd_core::{Document, Gatherer};

    use crate::testing::{FakeProcess, MemoryStore, Recorder, RecordingGatherer};

    struct Fixture {
        store: Arc<MemoryStore>,
        process: Arc<FakeProcess>,
        recorders: Vec<Recorder>,
        core: Orchestrator,
    }

    fn build(document: Document, names: &[&str]) -> Fixture {
        build_with(Arc::new(MemoryStore::with_document(document)), names)
            .expect("orchestrator")
    }

    fn build_with(store: Arc<MemoryStore>, names: &[&str]) -> Result<Fixture, DaemonError> {
        let process = Arc::new(FakeProcess::default());
        let mut recorders = Vec::new();
        let mut gatherers: Vec<Box<dyn Gatherer>> = Vec::new();
        for name in names {
            let (gatherer, recorder) = RecordingGatherer::new(name);
            recorders.push(recorder);
            gatherers.push(Box::new(gatherer));
        }
        let registry = GathererRegistry::new(gatherers)?;
        let server = LocalServerSupervisor::new("/tmp/gatherd-db", process.clone());
        let core = Orchestrator::new(store.clone(), registry, server, Handle::current())?;
        Ok(Fixture {
            store,
            process,
            recorders,
            core,
        })
    }

    fn slow() -> Document {
        Document {
            gather_interval_seconds: 3600.0,
            ..Document::default()
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn fresh_document_starts_idle() {
        let f = build(Document::default(), &["g1"]);
        assert!(!f.core.is_running());
        assert!(!f.core.is_syncing());
        assert!(!f.core.is_local_server_running());
        assert_eq!(f.process.starts(), 0);
        assert_eq!(f.recorders[0].runs(), 0);
    }

    #[tokio::test]
    async fn start_runs_first_cycle_and_schedules_next() {
        let f = build(slow(), &["g1", "g2"]);
        f.core.start().unwrap();

        assert!(f.core.is_running());
        assert!(f.store.document().is_running);
        assert!(f.core.is_cycle_pending());
        for recorder in &f.recorders {
            assert_eq!(recorder.starts(), 1);
            assert_eq!(recorder.runs(), 1);
            assert!(!recorder.ran_before_start());
        }
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let f = build(slow(), &["g1"]);
        f.core.start().unwrap();
        f.core.start().unwrap();
        assert_eq!(f.recorders[0].starts(), 1);
        assert_eq!(f.recorders[0].runs(), 1);

        f.core.stop(false).unwrap();
        f.core.stop(false).unwrap();
        assert!(!f.core.is_running());
        assert!(!f.core.is_cycle_pending());
        assert_eq!(f.recorders[0].stops(), 1);
        assert!(!f.store.document().is_running);
    }

    #[tokio::test]
    async fn streams_are_registered_once_before_gatherers_start() {
        let f = build(slow(), &["g1", "g2"]);
        f.store.preload_stream("g2");

        f.core.start().unwrap();
        f.core.stop(false).unwrap();
        f.core.start().unwrap();

        assert_eq!(f.store.added_streams(), ["g1"]);
        assert!(!f.recorders[0].stream_missing_at_start());
        assert_eq!(f.store.values("g1").len(), 2);
    }

    #[tokio::test]
    async fn restart_restores_running_state_and_disabled_list() {
        let mut document = slow();
        document.is_running = true;
        document.disabled_gatherers.insert("g1".to_string());

        let f = build(document, &["g1", "g2"]);

        assert!(f.core.is_running());
        assert!(!f.core.is_syncing());
        assert!(!f.core.is_active("g1"));
        assert!(f.core.is_active("g2"));
        assert_eq!(f.recorders[0].starts(), 0);
        assert_eq!(f.recorders[1].runs(), 1);
    }

    #[tokio::test]
    async fn temporary_stop_keeps_running_intent() {
        let store = Arc::new(MemoryStore::with_document(slow()));
        let f = build_with(store.clone(), &["g1"]).unwrap();
        f.core.start().unwrap();
        f.core.stop(true).unwrap();
        assert!(!f.core.is_running());
        assert!(store.document().is_running);

        let restarted = build_with(store, &["g1"]).unwrap();
        assert!(restarted.core.is_running());
    }

    #[tokio::test]
    async fn restart_resumes_sync_and_local_server() {
        let mut document = slow();
        document.is_background_sync = true;
        document.run_local = true;

        let f = build(document, &["g1"]);

        assert!(f.core.is_syncing());
        assert!(f.core.is_local_server_running());
        assert_eq!(f.store.sync_starts(), 1);
        assert_eq!(f.process.starts(), 1);
        assert!(!f.core.is_running());
    }

    #[tokio::test]
    async fn disabled_set_is_complement_of_active_set() {
        let f = build(slow(), &["a", "b", "c"]);
        f.core.start().unwrap();
        f.core.remove_gatherer("b").unwrap();
        f.core.remove_gatherer("c").unwrap();
        f.core.add_gatherer("c").unwrap();

        let status = f.core.status().unwrap();
        let disabled = f.store.document().disabled_gatherers;
        for gatherer in status.gatherers {
            assert_eq!(
                gatherer.active,
                !disabled.contains(&gatherer.name),
                "{} active flag disagrees with persisted disabled list",
                gatherer.name
            );
        }
        assert_eq!(f.recorders[2].stops(), 1);
        assert_eq!(f.recorders[2].starts(), 2);
    }

    #[tokio::test]
    async fn gatherer_toggles_are_idempotent() {
        let f = build(slow(), &["g1"]);
        f.core.start().unwrap();
        f.core.remove_gatherer("g1").unwrap();
        f.core.remove_gatherer("g1").unwrap();
        assert_eq!(f.recorders[0].stops(), 1);

        f.core.add_gatherer("g1").unwrap();
        f.core.add_gatherer("g1").unwrap();
        assert_eq!(f.recorders[0].starts(), 2);
        assert!(f.store.document().disabled_gatherers.is_empty());
    }

    #[tokio::test]
    async fn unknown_gatherer_is_an_error() {
        let f = build(slow(), &["g1"]);
        assert!(matches!(
            f.core.add_gatherer("nope"),
            Err(DaemonError::UnknownGatherer(_))
        ));
        assert!(matches!(
            f.core.remove_gatherer("nope"),
            Err(DaemonError::UnknownGatherer(_))
        ));
    }

    #[tokio::test]
    async fn sync_toggles_are_independent_of_acquisition() {
        let f = build(slow(), &["g1"]);
        f.core.start_sync().unwrap();
        f.core.start_sync().unwrap();
        assert!(f.core.is_syncing());
        assert!(!f.core.is_running());
        assert_eq!(f.store.sync_starts(), 1);

        f.core.start().unwrap();
        f.core.stop_sync().unwrap();
        f.core.stop_sync().unwrap();
        assert!(f.core.is_running());
        assert!(!f.core.is_syncing());
        assert!(!f.store.document().is_background_sync);
    }

    #[tokio::test]
    async fn persistence_failure_is_surfaced() {
        let f = build(slow(), &["g1"]);
        f.store.fail_writes(true);

        assert!(matches!(f.core.start(), Err(DaemonError::Store(_))));
        assert!(!f.core.is_running());
        assert_eq!(f.recorders[0].starts(), 0);

        assert!(f.core.remove_gatherer("g1").is_err());
        assert!(f.core.start_sync().is_err());
    }

    #[tokio::test]
    async fn stop_clears_runtime_flag_even_when_persist_fails() {
        let f = build(slow(), &["g1"]);
        f.core.start().unwrap();
        f.store.fail_writes(true);

        assert!(f.core.stop(false).is_err());
        assert!(!f.core.is_running());
        assert!(!f.core.is_cycle_pending());
    }

    #[tokio::test]
    async fn interval_must_be_positive() {
        let f = build(slow(), &["g1"]);
        assert!(matches!(
            f.core.set_interval(0.0),
            Err(DaemonError::InvalidInterval(_))
        ));
        f.core.set_interval(0.5).unwrap();
        assert_eq!(f.store.document().gather_interval_seconds, 0.5);
    }

    #[tokio::test]
    async fn exit_only_stops_local_server() {
        let mut document = slow();
        document.run_local = true;
        let f = build(document, &["g1"]);
        f.core.start().unwrap();
        f.core.start_sync().unwrap();

        assert_eq!(f.core.exit(), StopOutcome::Stopped);
        assert_eq!(f.core.exit(), StopOutcome::NotRunning);
        assert!(!f.core.is_local_server_running());
        assert!(f.core.is_running());
        assert!(f.core.is_syncing());
        assert_eq!(f.process.stops(), 1);
    }

    #[tokio::test]
    async fn run_local_toggle_starts_and_stops_server() {
        let f = build(slow(), &["g1"]);
        assert!(f.core.set_run_local(true).unwrap());
        assert!(f.store.document().run_local);
        assert!(!f.core.set_run_local(false).unwrap());
        assert_eq!(f.process.stops(), 1);
    }

    #[tokio::test]
    async fn duplicate_gatherers_fail_construction() {
        let store = Arc::new(MemoryStore::with_document(slow()));
        let err = build_with(store, &["g1", "g1"]).err().expect("duplicate");
        assert!(matches!(err, DaemonError::DuplicateGatherer(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failing_gatherer_does_not_halt_polling() {
        let mut document = Document::default();
        document.gather_interval_seconds = 0.02;
        let f = build(document, &["a", "b", "c"]);
        f.recorders[1].fail_runs(true);

        f.core.start().unwrap();
        assert_eq!(f.recorders[0].runs(), 1);
        assert_eq!(f.recorders[2].runs(), 1);

        let recorders = f.recorders.clone();
        assert!(
            wait_until(|| recorders.iter().all(|p| p.runs() >= 3)).await,
            "later cycles must keep running every gatherer"
        );
        f.core.stop(false).unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn panicking_gatherer_does_not_halt_polling() {
        let mut document = Document::default();
        document.gather_interval_seconds = 0.02;
        let f = build(document, &["aa", "zz"]);

        f.core.start().unwrap();
        f.recorders[0].panic_runs(true);

        let healthy = f.recorders[1].clone();
        assert!(
            wait_until(|| healthy.runs() >= 4).await,
            "polling stopped after a gatherer panicked"
        );
        assert!(f.recorders[0].runs() >= 3);
        assert!(f.core.is_running());
        assert!(f.core.is_cycle_pending());
        f.core.stop(false).unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn toggling_gatherers_while_ticks_fire_is_atomic() {
        let mut document = Document::default();
        document.gather_interval_seconds = 0.001;
        let f = build(document, &["g1", "g2"]);
        f.core.start().unwrap();

        let core = f.core.clone();
        tokio::task::spawn_blocking(move || {
            for _ in 0..200 {
                core.remove_gatherer("g1").unwrap();
                core.add_gatherer("g1").unwrap();
            }
        })
        .await
        .unwrap();

        let toggled = &f.recorders[0];
        assert!(!toggled.ran_before_start(), "a tick ran a stopped gatherer");
        assert_eq!(toggled.starts(), 201);
        assert_eq!(toggled.stops(), 200);
        assert!(f.core.is_active("g1"));
        assert!(f.store.document().disabled_gatherers.is_empty());

        let steady = f.recorders[1].clone();
        let before = steady.runs();
        assert!(wait_until(|| steady.runs() > before).await);
        f.core.stop(false).unwrap();
        assert!(!toggled.ran_before_start());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn no_tick_runs_after_stop_returns() {
        let mut document = Document::default();
        document.gather_interval_seconds = 0.01;
        let f = build(document, &["g1"]);

        f.core.start().unwrap();
        let recorder = f.recorders[0].clone();
        assert!(wait_until(|| recorder.runs() >= 2).await);

        f.core.stop(false).unwrap();
        let after_stop = recorder.runs();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(recorder.runs(), after_stop);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn interval_change_applies_to_next_cycle() {
        let mut document = Document::default();
        document.gather_interval_seconds = 0.01;
        let f = build(document, &["g1"]);

        f.core.start().unwrap();
        let recorder = f.recorders[0].clone();
        assert!(wait_until(|| recorder.runs() >= 2).await);

        f.core.set_interval(3600.0).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let settled = recorder.runs();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(recorder.runs(), settled);
        f.core.stop(false).unwrap();
    }
}
