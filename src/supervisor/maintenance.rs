//! Engine changes guarded by a backup, with rollback on a failed restart.

use super::types::{BackupReport, MaintenanceReport, StartOverrides};
use super::Supervisor;
use crate::error::{AppError, Result};
use crate::pak::{Engine, ServerType};
use crate::provider::StartResult;
use crate::validation::validate_pak_id;

impl Supervisor {
    /// Move an instance to another engine version.
    ///
    /// Returns `None` when it is already on `version`.
    pub async fn upgrade(&self, id: &str, version: &str) -> Result<Option<MaintenanceReport>> {
        validate_pak_id(id)?;
        let version = version.trim();
        if version.is_empty() {
            return Err(AppError::invalid_input("version is required"));
        }
        let previous = self.store.read_metadata(id)?.engine;
        if previous.version == version {
            log::info!("{} already on {}", id, version);
            return Ok(None);
        }

        let overrides = StartOverrides {
            version: Some(version.to_string()),
            ..StartOverrides::default()
        };
        self.change_engine(id, previous, None, Some(version), overrides)
            .await
            .map(Some)
    }

    /// Move an instance to another engine type. `from` must match the
    /// recorded type. Returns `None` when `from == to`.
    pub async fn migrate(
        &self,
        id: &str,
        from: ServerType,
        to: ServerType,
    ) -> Result<Option<MaintenanceReport>> {
        validate_pak_id(id)?;
        let previous = self.store.read_metadata(id)?.engine;
        if previous.server_type != from {
            return Err(AppError::invalid_input(format!(
                "{} is currently {}, not {}",
                id, previous.server_type, from
            )));
        }
        if from == to {
            return Ok(None);
        }

        let overrides = StartOverrides {
            server_type: Some(to),
            ..StartOverrides::default()
        };
        self.change_engine(id, previous, Some(to), None, overrides)
            .await
            .map(Some)
    }

    async fn change_engine(
        &self,
        id: &str,
        previous: Engine,
        server_type: Option<ServerType>,
        version: Option<&str>,
        overrides: StartOverrides,
    ) -> Result<MaintenanceReport> {
        let backup = self.backup(id, None).await?;

        match self.switch_and_restart(id, server_type, version, overrides).await {
            Ok((current, start)) => {
                log::info!(
                    "Moved {} from {} {} to {} {}",
                    id,
                    previous.server_type,
                    previous.version,
                    current.server_type,
                    current.version
                );
                Ok(MaintenanceReport {
                    previous,
                    current,
                    backup,
                    start,
                })
            }
            Err(e) => {
                log::error!("Engine change for {} failed, rolling back: {}", id, e);
                self.roll_back(id, &previous, &backup).await;
                Err(e)
            }
        }
    }

    async fn switch_and_restart(
        &self,
        id: &str,
        server_type: Option<ServerType>,
        version: Option<&str>,
        overrides: StartOverrides,
    ) -> Result<(Engine, StartResult)> {
        let meta = self.store.set_engine(id, server_type, version)?;
        self.stop_best_effort(id).await;
        let start = self.start(id, overrides).await?;
        Ok((meta.engine, start))
    }

    /// Restore the previous engine and world. Failures here are logged; the
    /// caller reports the original error.
    async fn roll_back(&self, id: &str, previous: &Engine, backup: &BackupReport) {
        if let Err(e) = self.store.set_engine(
            id,
            Some(previous.server_type),
            Some(previous.version.as_str()),
        ) {
            log::error!("Failed to restore engine of {}: {}", id, e);
        }

        let file = backup
            .file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Err(e) = self.restore(id, &file, false).await {
            log::error!("Failed to restore {} from {}: {}", id, file, e);
        }
    }
}
