//! Shared, user-level cache of downloaded extension artifacts.
//!
//! Marketplace downloaders place files at
//! `{root}/{store}/{project_id}/{version_id}/{filename}`; the supervisor only
//! ever reads from that location.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{AppError, Result};
use crate::pak::Extension;
use crate::paths::default_extension_cache_dir;
use crate::validation::{ensure_dir, validate_artifact_filename, validate_cache_key};

/// One artifact found in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedArtifact {
    pub store: String,
    pub project_id: String,
    pub version_id: String,
    pub file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ExtensionCache {
    root: PathBuf,
}

impl ExtensionCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache rooted at `$CRAFTSMAN_EXT_HOME` or `~/.craftsman/extensions`.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(default_extension_cache_dir()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the artifact for `ext` is expected to be.
    pub fn artifact_path(&self, ext: &Extension) -> PathBuf {
        self.root
            .join(&ext.store)
            .join(&ext.project_id)
            .join(&ext.version_id)
            .join(&ext.filename)
    }

    /// Write downloaded bytes into the cache layout and return the file path.
    pub fn store_artifact(&self, ext: &Extension, bytes: &[u8]) -> Result<PathBuf> {
        validate_cache_key("store", &ext.store)?;
        validate_cache_key("projectId", &ext.project_id)?;
        validate_cache_key("versionId", &ext.version_id)?;
        validate_artifact_filename(&ext.filename)?;

        let path = self.artifact_path(ext);
        if let Some(parent) = path.parent() {
            ensure_dir(parent, "extension cache")?;
        }
        fs::write(&path, bytes)
            .map_err(|e| AppError::io(format!("Failed to write {:?}: {}", path, e)))?;
        log::info!(
            "Cached {}/{}@{} at {:?}",
            ext.store,
            ext.project_id,
            ext.version_id,
            path
        );
        Ok(path)
    }

    /// Every `.jar` artifact currently cached.
    pub fn list_artifacts(&self) -> Result<Vec<CachedArtifact>> {
        let mut out = Vec::new();
        for store in read_dir_names(&self.root)? {
            let store_dir = self.root.join(&store);
            for project in read_dir_names(&store_dir)? {
                let project_dir = store_dir.join(&project);
                for version in read_dir_names(&project_dir)? {
                    let version_dir = project_dir.join(&version);
                    for file in read_dir_names(&version_dir)? {
                        if !file.ends_with(".jar") {
                            continue;
                        }
                        out.push(CachedArtifact {
                            store: store.clone(),
                            project_id: project.clone(),
                            version_id: version.clone(),
                            file: version_dir.join(file),
                        });
                    }
                }
            }
        }
        Ok(out)
    }
}

/// Sorted UTF-8 entry names of `dir`, or nothing if it does not exist.
fn read_dir_names(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_then_list_uses_cache_layout() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ExtensionCache::new(dir.path());
        let ext = Extension::new("modrinth", "p1", "v1", "x.jar");

        let path = cache.store_artifact(&ext, b"jar").unwrap();
        assert_eq!(path, dir.path().join("modrinth/p1/v1/x.jar"));
        assert_eq!(cache.artifact_path(&ext), path);

        cache
            .store_artifact(&Extension::new("hangar", "p2", "v9", "readme.txt"), b"txt")
            .unwrap();
        let listed = cache.list_artifacts().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].project_id, "p1");
    }

    #[test]
    fn missing_root_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ExtensionCache::new(dir.path().join("absent"));
        assert!(cache.list_artifacts().unwrap().is_empty());
    }
}
