//! Start, stop and inspection of instances.

use tokio::sync::mpsc;

use super::runtime::{read_runtime, write_runtime, RuntimeRecord};
use super::types::{LaunchSpec, StartOverrides, SupervisorStatus};
use super::{runtime_name, Supervisor};
use crate::error::{AppError, Result};
use crate::pak::{validate_level_slot, DEFAULT_SLOT};
use crate::provider::{StartOptions, StartResult, StopOutcome};
use crate::validation::{validate_pak_id, validate_slot_name};

impl Supervisor {
    /// Launch an instance with its resolved configuration.
    ///
    /// Fails with `AlreadyRunning` before touching anything when the provider
    /// already reports the unit as running.
    pub async fn start(&self, id: &str, overrides: StartOverrides) -> Result<StartResult> {
        validate_pak_id(id)?;
        let name = runtime_name(id);
        if self.provider.status(&name).await.running {
            return Err(AppError::already_running(id));
        }

        let meta = self.store.read_metadata(id)?;
        let spec = LaunchSpec::resolve(&overrides, Some(&meta), &self.settings.launch)?;
        validate_slot_name(&spec.slot)?;
        validate_level_slot(&spec.slot, spec.server_type)?;

        let level_dir = self.layout().slot_dir(id, &spec.slot);
        if !level_dir.is_dir() {
            if overrides.slot.is_some() && spec.slot != DEFAULT_SLOT {
                return Err(AppError::slot_not_found(id, &spec.slot));
            }
            log::warn!("Level {} of {} does not exist yet; server will generate it", spec.slot, id);
        }

        self.apply_extensions(id, spec.server_type)?;

        let previous = read_runtime(self.layout(), id);
        let rcon_password = spec.rcon_password.clone().or_else(|| {
            previous
                .rcon
                .as_ref()
                .map(|c| c.password.clone())
                .filter(|p| !p.is_empty())
        });

        let options = StartOptions {
            runtime_name: name.clone(),
            server_type: spec.server_type,
            version: spec.version.clone(),
            memory: spec.memory.clone(),
            eula: spec.eula,
            online_mode: spec.online_mode,
            motd: spec.motd.clone(),
            rcon_enabled: spec.rcon_enabled,
            rcon_password,
            level: Some(spec.slot.clone()),
            mount_data_dir: self.layout().pak_data_dir(id),
        };
        let result = self.provider.start(options).await?;

        let record = RuntimeRecord {
            runtime_name: Some(name),
            server_type: Some(spec.server_type),
            version: Some(spec.version.clone()),
            slot: Some(spec.slot.clone()),
            ports: Some(result.ports),
            rcon: result.rcon.clone(),
            started_at: Some(result.started_at.clone()),
        };
        write_runtime(self.layout(), id, &record)?;

        log::info!(
            "Started {} ({} {}, slot {})",
            id,
            spec.server_type,
            spec.version,
            spec.slot
        );
        Ok(result)
    }

    /// Stop an instance. The provider is always asked, even if the record
    /// says the instance never started.
    pub async fn stop(&self, id: &str, force_kill: bool) -> Result<StopOutcome> {
        validate_pak_id(id)?;
        let outcome = self.provider.stop(&runtime_name(id), force_kill).await;

        if self.layout().pak_dir(id).is_dir() {
            let mut record = read_runtime(self.layout(), id);
            record.started_at = None;
            write_runtime(self.layout(), id, &record)?;
        }

        match &outcome {
            StopOutcome::Failed { error } => log::error!("Failed to stop {}: {}", id, error),
            other => log::info!("Stopped {} ({:?})", id, other),
        }
        Ok(outcome)
    }

    pub async fn status(&self, id: &str) -> Result<SupervisorStatus> {
        validate_pak_id(id)?;
        if !self.store.exists(id) {
            return Err(AppError::pak_not_found(id));
        }

        let live = self.provider.status(&runtime_name(id)).await;
        let record = read_runtime(self.layout(), id);
        Ok(SupervisorStatus {
            id: id.to_string(),
            running: live.running,
            server_type: live.server_type.or(record.server_type),
            version: live.version.or(record.version),
            ports: live.ports.or(record.ports),
            started_at: live.started_at.or(record.started_at),
            level: live.level.or(record.slot),
        })
    }

    /// Status of every instance directory; unreadable ones are skipped.
    pub async fn statuses(&self) -> Result<Vec<SupervisorStatus>> {
        let mut out = Vec::new();
        for id in self.store.ids()? {
            match self.status(&id).await {
                Ok(status) => out.push(status),
                Err(e) => log::debug!("Skipping {} in status listing: {}", id, e),
            }
        }
        Ok(out)
    }

    pub async fn logs(&self, id: &str, tail: usize) -> Result<Vec<String>> {
        validate_pak_id(id)?;
        Ok(self.provider.logs(&runtime_name(id), tail).await)
    }

    pub async fn follow_logs(&self, id: &str, tail: usize) -> Result<mpsc::Receiver<String>> {
        validate_pak_id(id)?;
        if !self.provider.supports_follow_logs() {
            return Err(AppError::invalid_input(format!(
                "The {:?} provider cannot follow logs",
                self.provider.kind()
            )));
        }
        self.provider.follow_logs(&runtime_name(id), tail).await
    }

    /// Stop the instance and optionally point it at another slot, ready for
    /// the next start.
    pub async fn insert(&self, id: &str, slot: Option<&str>) -> Result<LaunchSpec> {
        validate_pak_id(id)?;
        self.store.read_metadata(id)?;
        self.stop_best_effort(id).await;

        let meta = match slot {
            Some(slot) => self.store.activate_slot(id, slot)?,
            None => self.store.read_metadata(id)?,
        };
        LaunchSpec::resolve(&StartOverrides::default(), Some(&meta), &self.settings.launch)
    }

    /// Stop the instance and delete everything it owns.
    pub async fn remove(&self, id: &str) -> Result<()> {
        validate_pak_id(id)?;
        if !self.layout().pak_dir(id).exists() {
            return Err(AppError::pak_not_found(id));
        }
        self.stop_best_effort(id).await;
        self.store.remove(id)
    }
}
