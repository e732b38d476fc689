//! gatherd core library: domain types, the gatherer capability, and the
//! persisted config/stream store.
//!
//! - [`types`]: persisted [`Document`] and gatherer/stream descriptors
//! - [`gatherer`]: the [`Gatherer`] capability trait
//! - [`store`]: the [`ConfigStore`] interface the orchestrator depends on
//! - [`file_store`]: [`FileStore`], the on-disk `ConfigStore`
//! - [`error`]: [`StoreError`], [`GathererError`]

pub mod error;
pub mod file_store;
pub mod gatherer;
pub mod store;
pub mod types;

pub use error::{GathererError, StoreError};
pub use file_store::FileStore;
pub use gatherer::{Gatherer, GathererFactory};
pub use store::ConfigStore;
pub use types::{Document, GathererDescriptor, StreamDefinition, StreamSchema};
