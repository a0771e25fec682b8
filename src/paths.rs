//! Centralized path utilities for the data root.
//!
//! Layout:
//! - `config.toml`
//! - `paks/{id}/pak.json` - instance metadata
//! - `paks/{id}/runtime.json` - last-known runtime facts
//! - `paks/{id}/data/` - mounted server directory, one subdirectory per slot
//! - `paks/{id}/backups/` - `.tgz` archives

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

/// Environment variable overriding the extension cache root.
pub const EXT_HOME_ENV: &str = "CRAFTSMAN_EXT_HOME";

/// File name of the extension sync manifest inside the data directory.
pub const EXT_MANIFEST_FILE: &str = ".craftsman-ext.json";

/// Directory (inside the data directory) holding level directories moved aside by a restore.
pub const RESTORE_HOLDING_DIR: &str = "restore-backup";

/// Get the default data root (~/.craftsman).
pub fn default_data_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| AppError::config("Cannot find home directory"))?;
    Ok(home.join(".craftsman"))
}

/// Get the default extension cache root.
///
/// `CRAFTSMAN_EXT_HOME` wins over `~/.craftsman/extensions`.
pub fn default_extension_cache_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(EXT_HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    Ok(default_data_dir()?.join("extensions"))
}

/// Resolves every per-instance location under one data root.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the path to the config file.
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Ensure the root and the instances directory exist.
    pub fn ensure_data_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.paks_dir()).map_err(|e| AppError::io(e.to_string()))
    }

    pub fn paks_dir(&self) -> PathBuf {
        self.root.join("paks")
    }

    /// Get the root directory for an instance.
    pub fn pak_dir(&self, id: &str) -> PathBuf {
        self.paks_dir().join(id)
    }

    pub fn pak_meta_path(&self, id: &str) -> PathBuf {
        self.pak_dir(id).join("pak.json")
    }

    pub fn pak_runtime_path(&self, id: &str) -> PathBuf {
        self.pak_dir(id).join("runtime.json")
    }

    /// Get the directory mounted into the runtime unit.
    pub fn pak_data_dir(&self, id: &str) -> PathBuf {
        self.pak_dir(id).join("data")
    }

    pub fn pak_backups_dir(&self, id: &str) -> PathBuf {
        self.pak_dir(id).join("backups")
    }

    pub fn slot_dir(&self, id: &str, slot: &str) -> PathBuf {
        self.pak_data_dir(id).join(slot)
    }

    pub fn ext_manifest_path(&self, id: &str) -> PathBuf {
        self.pak_data_dir(id).join(EXT_MANIFEST_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_nests_under_paks() {
        let layout = DataLayout::new("/srv/craftsman");
        assert_eq!(
            layout.pak_meta_path("alpha"),
            Path::new("/srv/craftsman/paks/alpha/pak.json")
        );
        assert_eq!(
            layout.slot_dir("alpha", "snap1"),
            Path::new("/srv/craftsman/paks/alpha/data/snap1")
        );
        assert_eq!(
            layout.ext_manifest_path("alpha"),
            Path::new("/srv/craftsman/paks/alpha/data/.craftsman-ext.json")
        );
    }
}
