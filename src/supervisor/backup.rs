//! Online-safe backups of the active level and their restoration.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::runtime::read_runtime;
use super::types::{BackupEntry, BackupMetadata, BackupReport, RestoreReport};
use super::{runtime_name, Supervisor};
use crate::archive::{
    append_bytes_to_tar, append_dir_to_tar, create_tar_gz_archive, extract_tar_gz_mapped,
    read_tar_gz_entry, top_level_entries,
};
use crate::error::{AppError, Result};
use crate::pak::{level_dirs, PakMetadata};
use crate::paths::RESTORE_HOLDING_DIR;
use crate::validation::{
    ensure_dir, is_backup_filename, resolve_backup_path, validate_backup_name, validate_pak_id,
};

/// Name of the metadata entry at the root of every archive.
const BACKUP_METADATA_ENTRY: &str = "backup.toml";

fn stamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d-%H-%M-%S").to_string()
}

/// Run blocking archive work off the async runtime.
async fn blocking<F, T>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| AppError::other(format!("Archive task failed: {}", e)))?
}

fn write_archive(file: &Path, metadata: &BackupMetadata, levels: &[PathBuf]) -> Result<()> {
    let partial = file.with_extension("tgz.partial");
    let manifest = toml::to_string_pretty(metadata)?;

    let result = create_tar_gz_archive(&partial, |builder| {
        append_bytes_to_tar(builder, BACKUP_METADATA_ENTRY, manifest.as_bytes())?;
        for dir in levels {
            let name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| AppError::io(format!("Invalid level directory {:?}", dir)))?;
            append_dir_to_tar(builder, dir, &name)?;
        }
        Ok(())
    })
    .and_then(|()| {
        fs::rename(&partial, file)
            .map_err(|e| AppError::io(format!("Failed to finalize {:?}: {}", file, e)))
    });

    if result.is_err() && partial.exists() {
        if let Err(e) = fs::remove_file(&partial) {
            log::warn!("Failed to clean up {:?}: {}", partial, e);
        }
    }
    result
}

impl Supervisor {
    /// The slot the server is using right now, or the one it would use next.
    async fn live_slot(&self, meta: &PakMetadata) -> String {
        if self.provider.status(&runtime_name(&meta.id)).await.running {
            if let Some(slot) = read_runtime(self.layout(), &meta.id)
                .slot
                .filter(|s| !s.is_empty())
            {
                return slot;
            }
        }
        meta.effective_slot().to_string()
    }

    /// Archive the active slot's level directories into `backups/<name>.tgz`.
    ///
    /// Auto-save is paused and flushed over RCON around the archive step when
    /// the provider supports it; without RCON the backup still proceeds.
    pub async fn backup(&self, id: &str, name: Option<&str>) -> Result<BackupReport> {
        validate_pak_id(id)?;
        if let Some(name) = name {
            validate_backup_name(name)?;
        }
        let meta = self.store.read_metadata(id)?;
        let slot = self.live_slot(&meta).await;

        let started_at = Utc::now();
        let backups_dir = self.layout().pak_backups_dir(id);
        ensure_dir(&backups_dir, "backups")?;
        let base = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("backup-{}", stamp(started_at)));
        let file = backups_dir.join(format!("{base}.tgz"));
        if file.exists() {
            return Err(AppError::backup_exists(&file));
        }

        self.rcon_best_effort(id, "save-off").await;
        self.rcon_best_effort(id, "save-all flush").await;
        tokio::time::sleep(self.settle_delay()).await;

        let archived = self.archive_levels(&meta, &slot, &file, started_at).await;

        self.rcon_best_effort(id, "save-on").await;
        let levels = archived?;

        let size = fs::metadata(&file)
            .map_err(|e| AppError::io(format!("Failed to stat {:?}: {}", file, e)))?
            .len();
        log::info!("Backed up {} slot {} to {:?} ({} bytes)", id, slot, file, size);

        Ok(BackupReport {
            file,
            size,
            slot,
            levels,
            started_at: started_at.to_rfc3339(),
            finished_at: Utc::now().to_rfc3339(),
        })
    }

    async fn archive_levels(
        &self,
        meta: &PakMetadata,
        slot: &str,
        file: &Path,
        started_at: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let levels = self.store.existing_level_dirs(meta, slot);
        if levels.is_empty() {
            return Err(AppError::no_level_data(&meta.id, slot));
        }

        let names: Vec<String> = levels
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        let metadata = BackupMetadata {
            created_at: started_at.to_rfc3339(),
            pak_id: meta.id.clone(),
            slot: slot.to_string(),
            server_type: meta.engine.server_type,
            version: meta.engine.version.clone(),
            levels: names.clone(),
        };

        let file = file.to_path_buf();
        blocking(move || write_archive(&file, &metadata, &levels)).await?;
        Ok(names)
    }

    /// Archives in `backups/`, newest first.
    pub fn list_backups(&self, id: &str) -> Result<Vec<BackupEntry>> {
        validate_pak_id(id)?;
        let dir = self.layout().pak_backups_dir(id);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if !path.is_file() || !is_backup_filename(&path) {
                continue;
            }
            let stat = fs::metadata(&path)?;
            let modified = stat.modified()?;
            let metadata = match read_tar_gz_entry(&path, BACKUP_METADATA_ENTRY) {
                Ok(Some(content)) => toml::from_str(&content)
                    .map_err(|e| log::debug!("Bad backup metadata in {:?}: {}", path, e))
                    .ok(),
                Ok(None) => None,
                Err(e) => {
                    log::warn!("Unreadable backup {:?}: {}", path, e);
                    None
                }
            };
            entries.push((
                modified,
                BackupEntry {
                    file: path,
                    size: stat.len(),
                    modified_at: DateTime::<Utc>::from(modified).to_rfc3339(),
                    metadata,
                },
            ));
        }
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(entries.into_iter().map(|(_, entry)| entry).collect())
    }

    /// Replace the level directories with the contents of a backup.
    ///
    /// `file` is looked up inside the instance's `backups/` directory. The
    /// instance is stopped first and not restarted afterwards.
    pub async fn restore(&self, id: &str, file: &str, keep_current: bool) -> Result<RestoreReport> {
        validate_pak_id(id)?;
        let meta = self.store.read_metadata(id)?;
        let archive = resolve_backup_path(&self.layout().pak_backups_dir(id), file)?;
        let slot = self.live_slot(&meta).await;

        self.stop_best_effort(id).await;

        let listed = {
            let archive = archive.clone();
            blocking(move || top_level_entries(&archive)).await?
        };
        let restored: Vec<String> = listed
            .into_iter()
            .filter(|name| name != BACKUP_METADATA_ENTRY && name != RESTORE_HOLDING_DIR)
            .collect();

        let mut targets = level_dirs(&slot, meta.engine.server_type.companion_suffixes());
        for name in &restored {
            if !targets.contains(name) {
                targets.push(name.clone());
            }
        }

        let data_dir = self.layout().pak_data_dir(id);
        ensure_dir(&data_dir, "data")?;
        let holding_dir = if keep_current {
            Some(self.move_aside(&data_dir, &targets)?)
        } else {
            for name in &targets {
                let path = data_dir.join(name);
                if path.exists() {
                    fs::remove_dir_all(&path).map_err(|e| {
                        AppError::io(format!("Failed to remove {:?}: {}", path, e))
                    })?;
                }
            }
            None
        };

        {
            let archive = archive.clone();
            let data_dir = data_dir.clone();
            blocking(move || {
                extract_tar_gz_mapped(&archive, &data_dir, |relative| {
                    (relative != Path::new(BACKUP_METADATA_ENTRY)).then(|| data_dir.join(relative))
                })
            })
            .await?;
        }

        log::info!("Restored {} from {:?}", id, archive);
        Ok(RestoreReport {
            file: archive,
            slot,
            restored,
            holding_dir,
        })
    }

    /// Move existing `names` under `data/restore-backup/<stamp>/`.
    fn move_aside(&self, data_dir: &Path, names: &[String]) -> Result<PathBuf> {
        let root = data_dir.join(RESTORE_HOLDING_DIR);
        let base = stamp(Utc::now());
        let mut holding = root.join(&base);
        let mut n = 1;
        while holding.exists() {
            holding = root.join(format!("{base}-{n}"));
            n += 1;
        }
        ensure_dir(&holding, "restore holding")?;

        for name in names {
            let source = data_dir.join(name);
            if !source.exists() {
                continue;
            }
            fs::rename(&source, holding.join(name)).map_err(|e| {
                AppError::io(format!("Failed to move {:?} aside: {}", source, e))
            })?;
        }
        Ok(holding)
    }
}
