//! Orchestration of instances on top of a [`Provider`] and the [`PakStore`].
//!
//! Instance state is never tracked here; `ABSENT`, `STOPPED` and `RUNNING`
//! are derived on demand from the metadata store and the provider.

mod backup;
mod lifecycle;
mod maintenance;
mod runtime;
mod sync;
mod types;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{load_settings, Settings};
use crate::error::Result;
use crate::extension::ExtensionCache;
use crate::pak::PakStore;
use crate::paths::DataLayout;
use crate::provider::Provider;

pub use runtime::{read_runtime, write_runtime, RuntimeRecord};
pub use types::{
    BackupEntry, BackupMetadata, BackupReport, LaunchSpec, MaintenanceReport, RestoreReport,
    StartOverrides, SupervisorStatus,
};

/// Name of the runtime unit backing instance `id`.
pub fn runtime_name(id: &str) -> String {
    format!("mc-{id}")
}

pub struct Supervisor {
    store: PakStore,
    provider: Arc<dyn Provider>,
    extensions: ExtensionCache,
    settings: Settings,
}

impl Supervisor {
    pub fn new(
        store: PakStore,
        provider: Arc<dyn Provider>,
        extensions: ExtensionCache,
        settings: Settings,
    ) -> Self {
        Self {
            store,
            provider,
            extensions,
            settings,
        }
    }

    /// Load `config.toml` under `layout` and wire up the configured provider.
    pub fn from_settings(layout: DataLayout) -> Result<Self> {
        layout.ensure_data_dirs()?;
        let settings = load_settings(&layout)?;
        let provider = settings.build_provider();
        let extensions = settings.extension_cache()?;
        log::info!(
            "Supervising {:?} with the {:?} provider",
            layout.root(),
            provider.kind()
        );
        Ok(Self::new(PakStore::new(layout), provider, extensions, settings))
    }

    pub fn store(&self) -> &PakStore {
        &self.store
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn extension_cache(&self) -> &ExtensionCache {
        &self.extensions
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn layout(&self) -> &DataLayout {
        self.store.layout()
    }

    fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settings.backup.settle_millis)
    }

    /// RCON is an optimisation here; failures are only logged.
    async fn rcon_best_effort(&self, id: &str, command: &str) {
        let result = self.provider.rcon(&runtime_name(id), command).await;
        if !result.ok {
            log::warn!(
                "RCON `{}` for {} failed: {}",
                command,
                id,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    /// Stop before a destructive step, carrying on whatever happens.
    async fn stop_best_effort(&self, id: &str) {
        match self.stop(id, false).await {
            Ok(outcome) if outcome.is_failed() => {
                log::warn!("Stopping {} failed, continuing: {:?}", id, outcome)
            }
            Ok(_) => {}
            Err(e) => log::warn!("Stopping {} failed, continuing: {}", id, e),
        }
    }
}
