//! The gatherer capability interface.

use crate::error::GathererError;
use crate::store::ConfigStore;
use crate::types::GathererDescriptor;

/// A pluggable sampler that writes one kind of machine state into a single
/// named stream.
///
/// The orchestrator guarantees `start` is called before the first `run` of an
/// acquisition session, and `stop` when the gatherer leaves the session.
pub trait Gatherer: Send {
    fn descriptor(&self) -> &GathererDescriptor;

    fn start(&mut self, _store: &dyn ConfigStore) -> Result<(), GathererError> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), GathererError> {
        Ok(())
    }

    /// Take one sample. Called once per polling cycle.
    fn run(&mut self, store: &dyn ConfigStore) -> Result<(), GathererError>;

    fn stream_name(&self) -> &str {
        &self.descriptor().stream_name
    }
}

/// Constructor for one gatherer, assembled into a static list at startup.
pub type GathererFactory = fn() -> Box<dyn Gatherer>;
