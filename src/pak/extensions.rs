//! Extension declarations on an instance record.

use super::store::PakStore;
use super::types::Extension;
use crate::error::{AppError, Result};
use crate::validation::{validate_artifact_filename, validate_cache_key};

fn validate_extension(ext: &Extension) -> Result<()> {
    validate_cache_key("store", &ext.store)?;
    validate_cache_key("projectId", &ext.project_id)?;
    validate_cache_key("versionId", &ext.version_id)?;
    validate_artifact_filename(&ext.filename)
}

impl PakStore {
    /// Declare an extension, replacing any entry with the same `(store, project_id)`.
    pub fn add_extension(&self, id: &str, ext: Extension) -> Result<Vec<Extension>> {
        validate_extension(&ext)?;
        self.with_metadata_mut(id, |meta| {
            meta.extensions
                .retain(|e| !e.same_key(&ext.store, &ext.project_id));
            log::info!(
                "Added extension {}/{}@{} to {}",
                ext.store,
                ext.project_id,
                ext.version_id,
                id
            );
            meta.extensions.push(ext);
            Ok(meta.extensions.clone())
        })
    }

    /// Replace the version/file of an already declared extension.
    pub fn update_extension(&self, id: &str, ext: Extension) -> Result<Extension> {
        validate_extension(&ext)?;
        self.with_metadata_mut(id, |meta| {
            let slot = meta
                .extensions
                .iter_mut()
                .find(|e| e.same_key(&ext.store, &ext.project_id))
                .ok_or_else(|| AppError::extension_not_found(id, &ext.store, &ext.project_id))?;
            *slot = ext.clone();
            Ok(ext)
        })
    }

    /// Returns how many entries were removed (0 or 1).
    pub fn remove_extension(&self, id: &str, store: &str, project_id: &str) -> Result<usize> {
        self.with_metadata_mut(id, |meta| {
            let before = meta.extensions.len();
            meta.extensions.retain(|e| !e.same_key(store, project_id));
            Ok(before - meta.extensions.len())
        })
    }

    pub fn list_extensions(&self, id: &str) -> Result<Vec<Extension>> {
        Ok(self.read_metadata(id)?.extensions)
    }
}
