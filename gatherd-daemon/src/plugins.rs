//! Gatherers compiled into the agent.

use std::time::Instant;

use serde_json::Value;

use gatherd_core::{
    ConfigStore, Gatherer, GathererDescriptor, GathererError, GathererFactory, StreamSchema,
};

/// Every gatherer the daemon knows about, in registration order.
pub const BUILTIN_GATHERERS: &[GathererFactory] = &[heartbeat];

pub fn heartbeat() -> Box<dyn Gatherer> {
    Box::new(Heartbeat::new())
}

/// Records the agent's acquisition uptime in seconds on every cycle.
pub struct Heartbeat {
    descriptor: GathererDescriptor,
    started_at: Option<Instant>,
}

impl Heartbeat {
    pub const STREAM: &'static str = "heartbeat";

    pub fn new() -> Self {
        Self {
            descriptor: GathererDescriptor::new(
                Self::STREAM,
                StreamSchema::of_type("number"),
                "Seconds since acquisition started",
            )
            .with_nickname("Heartbeat")
            .with_datatype("agent.heartbeat"),
            started_at: None,
        }
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

impl Gatherer for Heartbeat {
    fn descriptor(&self) -> &GathererDescriptor {
        &self.descriptor
    }

    fn start(&mut self, _store: &dyn ConfigStore) -> Result<(), GathererError> {
        self.started_at = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self) -> Result<(), GathererError> {
        self.started_at = None;
        Ok(())
    }

    fn run(&mut self, store: &dyn ConfigStore) -> Result<(), GathererError> {
        let started_at = self
            .started_at
            .ok_or_else(|| GathererError::sample("heartbeat ran before start"))?;
        let uptime = started_at.elapsed().as_secs_f64();
        store.insert(Self::STREAM, Value::from(uptime))?;
        Ok(())
    }
}
