//! In-memory doubles shared by the unit tests.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use gatherd_core::{
    ConfigStore, Document, Gatherer, GathererDescriptor, GathererError, StoreError,
    StreamDefinition, StreamSchema,
};

use crate::error::DaemonError;
use crate::supervisor::ProcessSupervisor;

#[derive(Default)]
pub struct MemoryStore {
    document: Mutex<Document>,
    streams: Mutex<BTreeMap<String, Vec<Value>>>,
    added: Mutex<Vec<String>>,
    writes: AtomicUsize,
    sync_starts: AtomicUsize,
    sync_stops: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn with_document(document: Document) -> Self {
        Self {
            document: Mutex::new(document),
            ..Self::default()
        }
    }

    pub fn document(&self) -> Document {
        self.document.lock().clone()
    }

    pub fn preload_stream(&self, name: &str) {
        self.streams.lock().insert(name.to_string(), vec![]);
    }

    pub fn added_streams(&self) -> Vec<String> {
        self.added.lock().clone()
    }

    pub fn values(&self, name: &str) -> Vec<Value> {
        self.streams.lock().get(name).cloned().unwrap_or_default()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn sync_starts(&self) -> usize {
        self.sync_starts.load(Ordering::SeqCst)
    }

    pub fn sync_stops(&self) -> usize {
        self.sync_stops.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io {
                path: "memory".into(),
                source: std::io::Error::other("storage unavailable"),
            });
        }
        Ok(())
    }
}

impl ConfigStore for MemoryStore {
    fn get(&self) -> Result<Document, StoreError> {
        Ok(self.document())
    }

    fn set(&self, document: Document) -> Result<(), StoreError> {
        self.check_writable()?;
        *self.document.lock() = document;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn update(&self, mutate: &mut dyn FnMut(&mut Document)) -> Result<Document, StoreError> {
        let mut current = self.document.lock();
        self.check_writable()?;
        mutate(&mut current);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(current.clone())
    }

    fn contains(&self, stream: &str) -> Result<bool, StoreError> {
        Ok(self.streams.lock().contains_key(stream))
    }

    fn add_stream(&self, definition: &StreamDefinition) -> Result<(), StoreError> {
        self.check_writable()?;
        self.streams.lock().insert(definition.name.clone(), vec![]);
        self.added.lock().push(definition.name.clone());
        Ok(())
    }

    fn insert(&self, stream: &str, value: Value) -> Result<(), StoreError> {
        match self.streams.lock().get_mut(stream) {
            Some(values) => {
                values.push(value);
                Ok(())
            }
            None => Err(StoreError::UnknownStream(stream.to_string())),
        }
    }

    fn start_sync(&self) -> Result<(), StoreError> {
        self.sync_starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop_sync(&self) -> Result<(), StoreError> {
        self.sync_stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Observation handle for a [`RecordingGatherer`].
#[derive(Clone, Default)]
pub struct Recorder(Arc<RecorderState>);

#[derive(Default)]
pub struct RecorderState {
    starts: AtomicUsize,
    stops: AtomicUsize,
    runs: AtomicUsize,
    fail_runs: AtomicBool,
    panic_runs: AtomicBool,
    panic_starts: AtomicBool,
    stream_missing_at_start: AtomicBool,
    run_before_start: AtomicBool,
}

impl Recorder {
    pub fn starts(&self) -> usize {
        self.0.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.0.stops.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.0.runs.load(Ordering::SeqCst)
    }

    pub fn fail_runs(&self, fail: bool) {
        self.0.fail_runs.store(fail, Ordering::SeqCst);
    }

    pub fn panic_runs(&self, panic: bool) {
        self.0.panic_runs.store(panic, Ordering::SeqCst);
    }

    pub fn panic_starts(&self, panic: bool) {
        self.0.panic_starts.store(panic, Ordering::SeqCst);
    }

    /// Whether `start` was ever called before the stream existed.
    pub fn stream_missing_at_start(&self) -> bool {
        self.0.stream_missing_at_start.load(Ordering::SeqCst)
    }

    /// Whether `run` was ever called without a preceding `start`.
    pub fn ran_before_start(&self) -> bool {
        self.0.run_before_start.load(Ordering::SeqCst)
    }
}

/// Gatherer that records every call and writes its run count.
pub struct RecordingGatherer {
    descriptor: GathererDescriptor,
    recorder: Recorder,
    started: bool,
}

impl RecordingGatherer {
    pub fn new(name: &str) -> (Self, Recorder) {
        let recorder = Recorder::default();
        let gatherer = Self {
            descriptor: GathererDescriptor::new(
                name,
                StreamSchema::of_type("integer"),
                format!("recorder {name}"),
            ),
            recorder: recorder.clone(),
            started: false,
        };
        (gatherer, recorder)
    }
}

impl Gatherer for RecordingGatherer {
    fn descriptor(&self) -> &GathererDescriptor {
        &self.descriptor
    }

    fn start(&mut self, store: &dyn ConfigStore) -> Result<(), GathererError> {
        if !store.contains(&self.descriptor.stream_name)? {
            self.recorder.0.stream_missing_at_start.store(true, Ordering::SeqCst);
        }
        self.recorder.0.starts.fetch_add(1, Ordering::SeqCst);
        if self.recorder.0.panic_starts.load(Ordering::SeqCst) {
            panic!("{} start blew up", self.descriptor.stream_name);
        }
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), GathererError> {
        self.started = false;
        self.recorder.0.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn run(&mut self, store: &dyn ConfigStore) -> Result<(), GathererError> {
        if !self.started {
            self.recorder.0.run_before_start.store(true, Ordering::SeqCst);
        }
        let count = self.recorder.0.runs.fetch_add(1, Ordering::SeqCst) + 1;
        if self.recorder.0.panic_runs.load(Ordering::SeqCst) {
            panic!("{} run blew up", self.descriptor.stream_name);
        }
        if self.recorder.0.fail_runs.load(Ordering::SeqCst) {
            return Err(GathererError::sample("recorder failure"));
        }
        store.insert(&self.descriptor.stream_name, Value::from(count))?;
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeProcess {
    starts: AtomicUsize,
    stops: AtomicUsize,
    start_error: AtomicBool,
    start_exit_failed: AtomicBool,
    stop_error: AtomicBool,
}

impl FakeProcess {
    pub fn failing_start() -> Self {
        let process = Self::default();
        process.set_start_error(true);
        process
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn set_start_error(&self, fail: bool) {
        self.start_error.store(fail, Ordering::SeqCst);
    }

    pub fn set_start_exit_ok(&self, ok: bool) {
        self.start_exit_failed.store(!ok, Ordering::SeqCst);
    }

    pub fn set_stop_error(&self, fail: bool) {
        self.stop_error.store(fail, Ordering::SeqCst);
    }
}

impl ProcessSupervisor for FakeProcess {
    fn start(&self, _directory: &Path) -> Result<bool, DaemonError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.start_error.load(Ordering::SeqCst) {
            return Err(DaemonError::LocalServer("launch failed".to_string()));
        }
        Ok(!self.start_exit_failed.load(Ordering::SeqCst))
    }

    fn stop(&self, _directory: &Path) -> Result<(), DaemonError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.stop_error.load(Ordering::SeqCst) {
            return Err(DaemonError::LocalServer("stop failed".to_string()));
        }
        Ok(())
    }
}
