//! Save slots: named snapshots of world data under `data/{slot}`.
//!
//! Activation is a pointer swap. The runtime mounts the whole data directory
//! and is told which level to load, so no files move when a slot is activated.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::store::PakStore;
use super::types::{PakMetadata, ServerType, SlotEntry};
use crate::error::{AppError, Result};
use crate::validation::{ensure_dir, validate_pak_id, validate_slot_name};

/// Recursively copy `src` into `dest`, creating `dest`.
pub(crate) fn copy_dir_all(src: &Path, dest: &Path) -> Result<()> {
    ensure_dir(dest, "destination")?;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| AppError::io(e.to_string()))?;
        let target = dest.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| AppError::io(format!("Failed to create {:?}: {}", target, e)))?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target).map_err(|e| {
                AppError::io(format!(
                    "Failed to copy {:?} to {:?}: {}",
                    entry.path(),
                    target,
                    e
                ))
            })?;
        } else {
            log::warn!("Skipping non-regular file {:?}", entry.path());
        }
    }
    Ok(())
}

/// Level directory names for a slot: the slot itself plus its companions.
pub(crate) fn level_dirs(slot: &str, companion_suffixes: &[&str]) -> Vec<String> {
    std::iter::once(slot.to_string())
        .chain(companion_suffixes.iter().map(|s| format!("{slot}{s}")))
        .collect()
}

/// Reject slot names that would land on another level's dimension directory.
///
/// `world_nether` is the nether of `world` on Bukkit-derived servers, so it can
/// never be a slot of its own there.
pub(crate) fn validate_level_slot(slot: &str, server_type: ServerType) -> Result<()> {
    if let Some(suffix) = server_type
        .companion_suffixes()
        .iter()
        .find(|suffix| slot.ends_with(*suffix))
    {
        return Err(AppError::invalid_input(format!(
            "Slot name {slot:?} ends with {suffix:?}, which {server_type} uses for dimension data"
        )));
    }
    Ok(())
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)
            .map_err(|e| AppError::io(format!("Failed to remove {:?}: {}", path, e)))?;
    }
    Ok(())
}

impl PakStore {
    /// Snapshot the active world data into `slot`, replacing any previous snapshot.
    ///
    /// The slot entry is only recorded once the copy has completed.
    pub fn save_slot_from_active(&self, id: &str, slot: &str) -> Result<SlotEntry> {
        validate_pak_id(id)?;
        validate_slot_name(slot)?;

        self.with_pak_lock(id, || {
            let mut meta = self.load(id)?;
            validate_level_slot(slot, meta.engine.server_type)?;
            let active = meta.effective_slot().to_string();
            if active == slot {
                return Err(AppError::invalid_input(format!(
                    "Slot {slot} is the active slot; save it under another name"
                )));
            }

            let suffixes = meta.engine.server_type.companion_suffixes();
            let sources = level_dirs(&active, suffixes);
            let targets = level_dirs(slot, suffixes);
            let data_dir = self.layout().pak_data_dir(id);

            for (source, target) in sources.iter().zip(&targets) {
                let source_dir = data_dir.join(source);
                let target_dir = data_dir.join(target);
                remove_dir_if_exists(&target_dir)?;
                if source_dir.is_dir() {
                    copy_dir_all(&source_dir, &target_dir)?;
                } else if source == &active {
                    log::warn!(
                        "Active slot {} of {} has no data yet, saving an empty slot",
                        active,
                        id
                    );
                    ensure_dir(&target_dir, "slot")?;
                }
            }

            let entry = SlotEntry {
                id: slot.to_string(),
                name: slot.to_string(),
                created_at: chrono::Utc::now().to_rfc3339(),
            };
            meta.saves.slots.retain(|s| s.id != slot);
            meta.saves.slots.push(entry.clone());
            self.save(&meta)?;

            log::info!("Saved slot {} of {} from {}", slot, id, active);
            Ok(entry)
        })
    }

    /// Point the instance at an existing slot.
    pub fn activate_slot(&self, id: &str, slot: &str) -> Result<PakMetadata> {
        validate_slot_name(slot)?;
        let slot_dir = self.layout().slot_dir(id, slot);
        self.with_metadata_mut(id, |meta| {
            validate_level_slot(slot, meta.engine.server_type)?;
            if !slot_dir.is_dir() {
                return Err(AppError::slot_not_found(id, slot));
            }
            meta.active_slot = slot.to_string();
            log::info!("Activated slot {} of {}", slot, id);
            Ok(meta.clone())
        })
    }

    pub fn list_slots(&self, id: &str) -> Result<Vec<SlotEntry>> {
        Ok(self.read_metadata(id)?.saves.slots)
    }

    /// Paths of the level directories for `slot` that currently exist.
    pub fn existing_level_dirs(&self, meta: &PakMetadata, slot: &str) -> Vec<PathBuf> {
        let data_dir = self.layout().pak_data_dir(&meta.id);
        level_dirs(slot, meta.engine.server_type.companion_suffixes())
            .into_iter()
            .map(|name| data_dir.join(name))
            .filter(|path| path.is_dir())
            .collect()
    }
}
