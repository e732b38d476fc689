//! The store interface the orchestrator depends on.
//!
//! `get`/`set` are whole-document operations. Callers that change a field go
//! through [`ConfigStore::update`], which is a single critical section per
//! document so concurrent read-modify-write cycles never lose each other's
//! writes.

use serde_json::Value;

use crate::error::StoreError;
use crate::types::{Document, StreamDefinition};

pub trait ConfigStore: Send + Sync {
    fn get(&self) -> Result<Document, StoreError>;

    /// Replace the whole document.
    fn set(&self, document: Document) -> Result<(), StoreError>;

    /// Read, mutate and write the document as one critical section.
    /// Returns the document as written.
    fn update(&self, mutate: &mut dyn FnMut(&mut Document)) -> Result<Document, StoreError>;

    fn contains(&self, stream: &str) -> Result<bool, StoreError>;

    fn add_stream(&self, definition: &StreamDefinition) -> Result<(), StoreError>;

    fn insert(&self, stream: &str, value: Value) -> Result<(), StoreError>;

    fn start_sync(&self) -> Result<(), StoreError>;

    fn stop_sync(&self) -> Result<(), StoreError>;
}

/// Typed wrapper over [`ConfigStore::update`].
pub fn with_config<S, F>(store: &S, mutate: F) -> Result<Document, StoreError>
where
    S: ConfigStore + ?Sized,
    F: FnOnce(&mut Document),
{
    let mut mutate = Some(mutate);
    store.update(&mut |doc| {
        if let Some(f) = mutate.take() {
            f(doc);
        }
    })
}
