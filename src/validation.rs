use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::paths::RESTORE_HOLDING_DIR;

/// Names that live inside the data directory next to slots.
const RESERVED_SLOT_NAMES: &[&str] = &[
    "plugins",
    "mods",
    "config",
    "logs",
    "libraries",
    "cache",
    "versions",
    "crash-reports",
    RESTORE_HOLDING_DIR,
];

fn is_safe_name(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 128
        && value != "."
        && value != ".."
        && !value.starts_with('.')
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

pub fn validate_pak_id(id: &str) -> Result<()> {
    if !is_safe_name(id) {
        return Err(AppError::invalid_input(format!("Invalid instance id: {id:?}")));
    }
    Ok(())
}

pub fn validate_slot_name(slot: &str) -> Result<()> {
    if !is_safe_name(slot) {
        return Err(AppError::invalid_input(format!("Invalid slot name: {slot:?}")));
    }
    if RESERVED_SLOT_NAMES.contains(&slot) {
        return Err(AppError::invalid_input(format!("Slot name is reserved: {slot}")));
    }
    Ok(())
}

pub fn validate_backup_name(name: &str) -> Result<()> {
    if !is_safe_name(name) {
        return Err(AppError::invalid_input(format!("Invalid backup name: {name:?}")));
    }
    Ok(())
}

/// Extension file names are copied verbatim into the plugin/mod directory.
pub fn validate_artifact_filename(filename: &str) -> Result<()> {
    let is_plain = !filename.is_empty()
        && filename != "."
        && filename != ".."
        && !filename.contains(['/', '\\'])
        && Path::new(filename).file_name().is_some();
    if !is_plain {
        return Err(AppError::invalid_input(format!(
            "Invalid extension filename: {filename:?}"
        )));
    }
    Ok(())
}

/// Reject empty or path-like cache keys (store, project, version).
pub fn validate_cache_key(label: &str, value: &str) -> Result<()> {
    if value.is_empty() || value == "." || value == ".." || value.contains(['/', '\\']) {
        return Err(AppError::invalid_input(format!("Invalid {label}: {value:?}")));
    }
    Ok(())
}

/// Resolve a caller-supplied backup reference to a file inside `backups_dir`.
///
/// Only the file name of `backup_path` is used, so absolute paths pointing at the
/// same directory and bare names both work, and nothing outside it can be reached.
pub fn resolve_backup_path(backups_dir: &Path, backup_path: &str) -> Result<PathBuf> {
    let file_name = Path::new(backup_path)
        .file_name()
        .ok_or_else(|| AppError::invalid_input("Invalid backup path"))?;

    let candidate = backups_dir.join(file_name);

    if !is_backup_filename(&candidate) {
        return Err(AppError::invalid_input("Invalid backup filename"));
    }

    if !candidate.is_file() {
        return Err(AppError::backup_not_found(&candidate));
    }

    let backups_dir_canonical = backups_dir
        .canonicalize()
        .map_err(|e| AppError::io(format!("Failed to resolve backups dir: {}", e)))?;
    let canonical_candidate = candidate
        .canonicalize()
        .map_err(|e| AppError::io(format!("Failed to resolve backup path: {}", e)))?;

    if !canonical_candidate.starts_with(&backups_dir_canonical) {
        return Err(AppError::invalid_input(
            "Backup path is outside backups directory",
        ));
    }

    Ok(canonical_candidate)
}

pub(crate) fn is_backup_filename(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| {
            let lower = name.to_ascii_lowercase();
            lower.ends_with(".tgz") || lower.ends_with(".tar.gz")
        })
        .unwrap_or(false)
}

/// Create `path` if needed; used before writing into a directory we own.
pub(crate) fn ensure_dir(path: &Path, label: &str) -> Result<()> {
    fs::create_dir_all(path)
        .map_err(|e| AppError::io(format!("Failed to create {} dir {:?}: {}", label, path, e)))
}
