//! Copy declared extensions from the shared cache into an instance's data dir.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::Supervisor;
use crate::archive::parse_entry_rel_path;
use crate::error::{AppError, Result};
use crate::pak::ServerType;
use crate::validation::{ensure_dir, validate_artifact_filename, validate_pak_id};

/// Files placed by the previous sync, relative to the data directory.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ExtensionManifest {
    #[serde(default)]
    files: Vec<String>,
}

impl Supervisor {
    fn read_manifest(&self, id: &str) -> ExtensionManifest {
        let path = self.layout().ext_manifest_path(id);
        let Ok(content) = fs::read_to_string(&path) else {
            return ExtensionManifest::default();
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!("Ignoring corrupt extension manifest {:?}: {}", path, e);
            ExtensionManifest::default()
        })
    }

    fn write_manifest(&self, id: &str, files: &[String]) -> Result<()> {
        let manifest = ExtensionManifest {
            files: files.to_vec(),
        };
        let path = self.layout().ext_manifest_path(id);
        fs::write(&path, serde_json::to_string_pretty(&manifest)?)
            .map_err(|e| AppError::io(format!("Failed to write {:?}: {}", path, e)))
    }

    /// Replace the previously synced extension files with the declared set.
    ///
    /// Every artifact is checked before anything is deleted, so a missing one
    /// leaves the data directory exactly as it was. Returns the new manifest.
    pub fn apply_extensions(&self, id: &str, server_type: ServerType) -> Result<Vec<String>> {
        validate_pak_id(id)?;
        let meta = self.store.read_metadata(id)?;

        let mut sources: Vec<(PathBuf, &str)> = Vec::with_capacity(meta.extensions.len());
        for ext in &meta.extensions {
            validate_artifact_filename(&ext.filename)?;
            let source = self.extensions.artifact_path(ext);
            if !source.is_file() {
                return Err(AppError::extension_missing(&source));
            }
            sources.push((source, &ext.filename));
        }

        let data_dir = self.layout().pak_data_dir(id);
        self.store.with_pak_lock(id, || {
            for relative in self.read_manifest(id).files {
                let Some(safe) = parse_entry_rel_path(&relative) else {
                    log::warn!("Skipping unsafe manifest entry {:?} for {}", relative, id);
                    continue;
                };
                match fs::remove_file(data_dir.join(safe)) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => log::warn!("Failed to remove stale extension {}: {}", relative, e),
                }
            }

            let dir_name = server_type.extension_dir();
            let dest_dir = data_dir.join(dir_name);
            ensure_dir(&dest_dir, "extension")?;

            let mut applied = Vec::with_capacity(sources.len());
            let copied: Result<()> = sources.iter().try_for_each(|(source, filename)| {
                let dest = dest_dir.join(filename);
                fs::copy(source, &dest).map_err(|e| {
                    AppError::io(format!("Failed to copy {:?} to {:?}: {}", source, dest, e))
                })?;
                applied.push(format!("{dir_name}/{filename}"));
                Ok(())
            });

            // Files that landed before a failed copy must stay listed for the next sync.
            self.write_manifest(id, &applied)?;
            copied?;

            log::info!("Synced {} extension(s) into {} for {}", applied.len(), dir_name, id);
            Ok(applied)
        })
    }
}
