//! Background sync toggle.

use gatherd_core::store::with_config;
use gatherd_core::ConfigStore;

use crate::error::DaemonError;

#[derive(Debug, Default)]
pub struct SyncController {
    syncing: bool,
}

impl SyncController {
    pub fn is_syncing(&self) -> bool {
        self.syncing
    }

    /// Persist the sync intent and start the store's sync engine.
    /// No-op while already syncing.
    pub fn start(&mut self, store: &dyn ConfigStore) -> Result<(), DaemonError> {
        if self.syncing {
            return Ok(());
        }
        tracing::info!("starting background sync");
        with_config(store, |doc| doc.is_background_sync = true)?;
        store.start_sync()?;
        self.syncing = true;
        Ok(())
    }

    /// Stop the store's sync engine and clear the persisted intent.
    /// Always safe to repeat.
    pub fn stop(&mut self, store: &dyn ConfigStore) -> Result<(), DaemonError> {
        tracing::info!("stopping background sync");
        let stopped = store.stop_sync();
        let persisted = with_config(store, |doc| doc.is_background_sync = false);
        self.syncing = false;
        stopped?;
        persisted?;
        Ok(())
    }
}
