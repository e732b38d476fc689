//! Known gatherers and the runtime-mutable active subset.
//!
//! `active` only holds keys of `all`, so `active ⊆ all` holds structurally.
//! Both collections are ordered, which fixes the per-cycle iteration order
//! for the lifetime of the process.
//!
//! Every call into a gatherer goes through [`isolate`]: an `Err` or a panic
//! is logged against that gatherer and the loop moves on.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};

use gatherd_core::store::with_config;
use gatherd_core::types::validate_stream_name;
use gatherd_core::{ConfigStore, Gatherer, GathererDescriptor, GathererError, GathererFactory};

use crate::error::DaemonError;

pub struct GathererRegistry {
    all: BTreeMap<String, Box<dyn Gatherer>>,
    active: BTreeSet<String>,
}

/// Outcome of one pass over the active gatherers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

impl GathererRegistry {
    /// Build a registry with every gatherer active. Stream names must be
    /// unique and usable by the store.
    pub fn new(gatherers: Vec<Box<dyn Gatherer>>) -> Result<Self, DaemonError> {
        let mut all = BTreeMap::new();
        for gatherer in gatherers {
            let name = gatherer.stream_name().to_string();
            validate_stream_name(&name)?;
            if all.contains_key(&name) {
                return Err(DaemonError::DuplicateGatherer(name));
            }
            all.insert(name, gatherer);
        }
        let active = all.keys().cloned().collect();
        Ok(Self { all, active })
    }

    pub fn from_factories(factories: &[GathererFactory]) -> Result<Self, DaemonError> {
        Self::new(factories.iter().map(|make| make()).collect())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.all.contains_key(name)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.active.contains(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.all.keys().map(String::as_str)
    }

    pub fn active_names(&self) -> impl Iterator<Item = &str> {
        self.active.iter().map(String::as_str)
    }

    /// Every known descriptor paired with its active flag.
    pub fn descriptors(&self) -> impl Iterator<Item = (&GathererDescriptor, bool)> {
        self.all
            .iter()
            .map(|(name, g)| (g.descriptor(), self.active.contains(name)))
    }

    /// Drop `name` from the active set without touching persisted state.
    /// Used while applying the persisted disabled list at startup.
    pub fn deactivate(&mut self, name: &str) -> bool {
        self.active.remove(name)
    }

    /// Disable `name`: leave the active set, stop it if acquisition is running,
    /// and record it in the persisted disabled list.
    pub fn disable(
        &mut self,
        name: &str,
        running: bool,
        store: &dyn ConfigStore,
    ) -> Result<(), DaemonError> {
        let gatherer = self
            .all
            .get_mut(name)
            .ok_or_else(|| DaemonError::UnknownGatherer(name.to_string()))?;

        if self.active.remove(name) && running {
            stop_one(name, gatherer.as_mut());
        }

        with_config(store, |doc| {
            doc.disabled_gatherers.insert(name.to_string());
        })?;
        Ok(())
    }

    /// Enable `name`: start it first if acquisition is running, join the
    /// active set, and clear it from the persisted disabled list.
    pub fn enable(
        &mut self,
        name: &str,
        running: bool,
        store: &dyn ConfigStore,
    ) -> Result<(), DaemonError> {
        let gatherer = self
            .all
            .get_mut(name)
            .ok_or_else(|| DaemonError::UnknownGatherer(name.to_string()))?;

        if !self.active.contains(name) {
            if running {
                start_one(name, gatherer.as_mut(), store);
            }
            self.active.insert(name.to_string());
        }

        with_config(store, |doc| {
            doc.disabled_gatherers.remove(name);
        })?;
        Ok(())
    }

    /// Register a stream for every known gatherer the store lacks.
    pub fn reconcile_streams(&self, store: &dyn ConfigStore) -> Result<usize, DaemonError> {
        let mut added = 0;
        for (name, gatherer) in &self.all {
            if store.contains(name)? {
                continue;
            }
            let definition = gatherer.descriptor().stream_definition();
            tracing::info!(stream = %name, schema = %definition.schema, "adding stream");
            store.add_stream(&definition)?;
            added += 1;
        }
        Ok(added)
    }

    pub fn start_active(&mut self, store: &dyn ConfigStore) {
        for (name, gatherer) in self.active_mut() {
            start_one(name, gatherer, store);
        }
    }

    pub fn stop_active(&mut self) {
        for (name, gatherer) in self.active_mut() {
            stop_one(name, gatherer);
        }
    }

    /// Run every active gatherer once. A failing or panicking gatherer is
    /// logged and skipped; the rest of the cycle still runs.
    pub fn run_active(&mut self, store: &dyn ConfigStore) -> CycleReport {
        let mut report = CycleReport::default();
        for (name, gatherer) in self.active_mut() {
            if isolate(name, "run", || gatherer.run(store)) {
                report.succeeded.push(name.to_string());
            } else {
                report.failed.push(name.to_string());
            }
        }
        report
    }

    fn active_mut(&mut self) -> impl Iterator<Item = (&str, &mut (dyn Gatherer + 'static))> {
        let active = &self.active;
        self.all
            .iter_mut()
            .filter(move |(name, _)| active.contains(name.as_str()))
            .map(|(name, gatherer)| (name.as_str(), gatherer.as_mut()))
    }
}

fn start_one(name: &str, gatherer: &mut dyn Gatherer, store: &dyn ConfigStore) {
    isolate(name, "start", || gatherer.start(store));
}

fn stop_one(name: &str, gatherer: &mut dyn Gatherer) {
    isolate(name, "stop", || gatherer.stop());
}

/// Run one gatherer call, containing errors and panics. Returns whether the
/// call succeeded.
fn isolate<F>(name: &str, op: &str, call: F) -> bool
where
    F: FnOnce() -> Result<(), GathererError>,
{
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            tracing::warn!(gatherer = %name, op, error = %err, "gatherer call failed");
            false
        }
        Err(payload) => {
            tracing::error!(
                gatherer = %name,
                op,
                panic = panic_message(payload.as_ref()),
                "gatherer panicked",
            );
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
