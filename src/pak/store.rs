//! Instance CRUD operations.

use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};

use super::types::{Engine, PakMetadata, Saves, ServerType};
use super::DEFAULT_SLOT;
use crate::error::{AppError, Result};
use crate::paths::DataLayout;
use crate::validation::{ensure_dir, validate_pak_id};

/// Parameters for [`PakStore::create`].
#[derive(Debug, Clone)]
pub struct CreatePak {
    pub id: String,
    pub server_type: ServerType,
    pub version: String,
    pub name: Option<String>,
}

/// File-backed store of instance records.
///
/// Every mutation re-reads `pak.json`, applies the change and writes the whole
/// record back while holding a per-instance lock, so two operations in this
/// process cannot lose each other's update.
pub struct PakStore {
    layout: DataLayout,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PakStore {
    pub fn new(layout: DataLayout) -> Self {
        Self {
            layout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    fn pak_lock(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    /// Run `f` while holding the instance's lock.
    pub(crate) fn with_pak_lock<F, T>(&self, id: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let lock = self.pak_lock(id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        f()
    }

    /// Execute a read-modify-write operation on an instance record while holding its lock.
    pub fn with_metadata_mut<F, T>(&self, id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut PakMetadata) -> Result<T>,
    {
        validate_pak_id(id)?;
        self.with_pak_lock(id, || {
            let mut meta = self.load(id)?;
            let result = f(&mut meta)?;
            self.save(&meta)?;
            Ok(result)
        })
    }

    pub(crate) fn load(&self, id: &str) -> Result<PakMetadata> {
        let path = self.layout.pak_meta_path(id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::pak_not_found(id));
            }
            Err(e) => return Err(AppError::io(format!("Failed to read {:?}: {}", path, e))),
        };
        serde_json::from_str(&content)
            .map_err(|e| AppError::io(format!("Corrupt metadata {:?}: {}", path, e)))
    }

    /// Write to a sibling temp file and rename over the record.
    pub(crate) fn save(&self, meta: &PakMetadata) -> Result<()> {
        let dir = self.layout.pak_dir(&meta.id);
        ensure_dir(&dir, "instance")?;
        let path = self.layout.pak_meta_path(&meta.id);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(meta)?;
        fs::write(&tmp, content)
            .map_err(|e| AppError::io(format!("Failed to write {:?}: {}", tmp, e)))?;
        fs::rename(&tmp, &path)
            .map_err(|e| AppError::io(format!("Failed to replace {:?}: {}", path, e)))
    }

    pub fn exists(&self, id: &str) -> bool {
        validate_pak_id(id).is_ok() && self.layout.pak_meta_path(id).is_file()
    }

    /// Create a new instance with an empty `world` slot.
    pub fn create(&self, request: CreatePak) -> Result<PakMetadata> {
        let CreatePak {
            id,
            server_type,
            version,
            name,
        } = request;
        validate_pak_id(&id)?;
        if version.trim().is_empty() {
            return Err(AppError::invalid_input("version is required"));
        }

        self.with_pak_lock(&id, || {
            if self.layout.pak_meta_path(&id).exists() {
                return Err(AppError::pak_exists(&id));
            }

            ensure_dir(&self.layout.slot_dir(&id, DEFAULT_SLOT), "world")?;

            let meta = PakMetadata {
                name: name
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| id.clone()),
                id: id.clone(),
                engine: Engine {
                    server_type,
                    version: version.clone(),
                },
                active_slot: DEFAULT_SLOT.to_string(),
                saves: Saves::default(),
                extensions: Vec::new(),
                created_at: chrono::Utc::now().to_rfc3339(),
                extra: serde_json::Map::new(),
            };
            self.save(&meta)?;
            log::info!("Created instance {} ({} {})", id, server_type, version);
            Ok(meta)
        })
    }

    /// Delete an instance's entire subtree.
    pub fn remove(&self, id: &str) -> Result<()> {
        validate_pak_id(id)?;
        self.with_pak_lock(id, || {
            let dir = self.layout.pak_dir(id);
            if !dir.exists() {
                return Err(AppError::pak_not_found(id));
            }
            fs::remove_dir_all(&dir).map_err(|e| {
                AppError::io(format!("Failed to remove instance directory {:?}: {}", dir, e))
            })?;
            log::info!("Removed instance {}", id);
            Ok(())
        })?;

        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.remove(id);
        Ok(())
    }

    /// Ids of every directory under `paks/`, sorted.
    pub fn ids(&self) -> Result<Vec<String>> {
        let dir = self.layout.paks_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in fs::read_dir(&dir)
            .map_err(|e| AppError::io(format!("Failed to read {:?}: {}", dir, e)))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(id) => ids.push(id),
                Err(name) => log::warn!("Skipping instance with non-UTF-8 name: {:?}", name),
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// List every readable instance record.
    pub fn list(&self) -> Result<Vec<PakMetadata>> {
        let mut list = Vec::new();
        for id in self.ids()? {
            if !self.layout.pak_meta_path(&id).exists() {
                continue;
            }
            match self.load(&id) {
                Ok(meta) => list.push(meta),
                Err(e) => log::warn!("Skipping unreadable instance {}: {}", id, e),
            }
        }
        Ok(list)
    }

    pub fn read_metadata(&self, id: &str) -> Result<PakMetadata> {
        validate_pak_id(id)?;
        self.load(id)
    }

    pub fn write_metadata(&self, meta: &PakMetadata) -> Result<()> {
        validate_pak_id(&meta.id)?;
        self.with_pak_lock(&meta.id, || self.save(meta))
    }

    /// Change the engine type and/or version.
    pub fn set_engine(
        &self,
        id: &str,
        server_type: Option<ServerType>,
        version: Option<&str>,
    ) -> Result<PakMetadata> {
        self.with_metadata_mut(id, |meta| {
            if let Some(t) = server_type {
                meta.engine.server_type = t;
            }
            if let Some(v) = version {
                if v.trim().is_empty() {
                    return Err(AppError::invalid_input("version is required"));
                }
                meta.engine.version = v.to_string();
            }
            Ok(meta.clone())
        })
    }

    /// Copy an instance's whole subtree under a new id.
    ///
    /// Runtime facts are not carried over; the clone starts out stopped.
    pub fn clone_pak(&self, source: &str, destination: &str) -> Result<PakMetadata> {
        validate_pak_id(source)?;
        validate_pak_id(destination)?;
        if source == destination {
            return Err(AppError::invalid_input("Source and destination must differ"));
        }

        let meta = self.with_pak_lock(source, || {
            let meta = self.load(source)?;
            self.with_pak_lock(destination, || {
                let dest_dir = self.layout.pak_dir(destination);
                if self.layout.pak_meta_path(destination).exists() || dest_dir.exists() {
                    return Err(AppError::pak_exists(destination));
                }
                super::copy_dir_all(&self.layout.pak_dir(source), &dest_dir)?;
                let runtime = self.layout.pak_runtime_path(destination);
                if runtime.exists() {
                    fs::remove_file(&runtime)?;
                }

                let cloned = PakMetadata {
                    id: destination.to_string(),
                    name: destination.to_string(),
                    created_at: chrono::Utc::now().to_rfc3339(),
                    ..meta
                };
                self.save(&cloned)?;
                Ok(cloned)
            })
        })?;

        log::info!("Cloned instance {} -> {}", source, destination);
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn store() -> (tempfile::TempDir, PakStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = PakStore::new(DataLayout::new(dir.path()));
        (dir, store)
    }

    fn create(store: &PakStore, id: &str) -> PakMetadata {
        store
            .create(CreatePak {
                id: id.to_string(),
                server_type: ServerType::Paper,
                version: "1.21.8".to_string(),
                name: None,
            })
            .unwrap()
    }

    #[test]
    fn create_allocates_world_and_defaults() {
        let (_dir, store) = store();
        let meta = create(&store, "alpha");
        assert_eq!(meta.name, "alpha");
        assert_eq!(meta.active_slot, "world");
        assert!(meta.slots().is_empty());
        assert!(store.layout().slot_dir("alpha", "world").is_dir());
        assert_eq!(store.read_metadata("alpha").unwrap(), meta);
    }

    #[test]
    fn duplicate_create_conflicts_and_keeps_first_record() {
        let (_dir, store) = store();
        let first = create(&store, "alpha");
        let err = store
            .create(CreatePak {
                id: "alpha".to_string(),
                server_type: ServerType::Fabric,
                version: "1.20.1".to_string(),
                name: Some("other".to_string()),
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PakExists);
        assert_eq!(store.read_metadata("alpha").unwrap(), first);
    }

    #[test]
    fn remove_deletes_subtree() {
        let (_dir, store) = store();
        create(&store, "alpha");
        store.remove("alpha").unwrap();
        assert!(!store.layout().pak_dir("alpha").exists());
        assert_eq!(
            store.remove("alpha").unwrap_err().kind(),
            ErrorKind::PakNotFound
        );
    }

    #[test]
    fn list_skips_directories_without_metadata() {
        let (_dir, store) = store();
        create(&store, "beta");
        create(&store, "alpha");
        fs::create_dir_all(store.layout().pak_dir("stray")).unwrap();
        let ids: Vec<String> = store.list().unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, ["alpha", "beta"]);
        assert_eq!(store.ids().unwrap(), ["alpha", "beta", "stray"]);
    }

    #[test]
    fn set_engine_updates_only_given_fields() {
        let (_dir, store) = store();
        create(&store, "alpha");
        let meta = store.set_engine("alpha", None, Some("1.21.9")).unwrap();
        assert_eq!(meta.engine.server_type, ServerType::Paper);
        assert_eq!(meta.engine.version, "1.21.9");
    }

    #[test]
    fn clone_copies_data_under_new_id() {
        let (_dir, store) = store();
        create(&store, "alpha");
        fs::write(store.layout().slot_dir("alpha", "world").join("level.dat"), b"lvl").unwrap();
        let cloned = store.clone_pak("alpha", "beta").unwrap();
        assert_eq!(cloned.id, "beta");
        assert_eq!(
            fs::read(store.layout().slot_dir("beta", "world").join("level.dat")).unwrap(),
            b"lvl"
        );
        assert_eq!(
            store.clone_pak("alpha", "beta").unwrap_err().kind(),
            ErrorKind::PakExists
        );
    }
}
