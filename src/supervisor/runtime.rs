//! `runtime.json`: last-known launch facts for an instance.
//!
//! The record is only a cache; a live answer from the provider always wins.

use std::fs;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::pak::ServerType;
use crate::paths::DataLayout;
use crate::provider::{PortMap, RconCredentials};
use crate::validation::ensure_dir;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeRecord {
    #[serde(default, alias = "containerName")]
    pub runtime_name: Option<String>,
    #[serde(rename = "type", default)]
    pub server_type: Option<ServerType>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub slot: Option<String>,
    #[serde(default)]
    pub ports: Option<PortMap>,
    #[serde(default)]
    pub rcon: Option<RconCredentials>,
    /// Cleared on stop; everything else is kept for the next start.
    #[serde(default)]
    pub started_at: Option<String>,
}

/// Missing or unreadable records yield the empty record.
pub fn read_runtime(layout: &DataLayout, id: &str) -> RuntimeRecord {
    let path = layout.pak_runtime_path(id);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return RuntimeRecord::default(),
        Err(e) => {
            log::warn!("Failed to read {:?}: {}", path, e);
            return RuntimeRecord::default();
        }
    };
    serde_json::from_str(&content).unwrap_or_else(|e| {
        log::warn!("Ignoring corrupt runtime record {:?}: {}", path, e);
        RuntimeRecord::default()
    })
}

pub fn write_runtime(layout: &DataLayout, id: &str, record: &RuntimeRecord) -> Result<()> {
    ensure_dir(&layout.pak_dir(id), "instance")?;
    let path = layout.pak_runtime_path(id);
    let content = serde_json::to_string_pretty(record)?;
    fs::write(&path, content).map_err(|e| AppError::io(format!("Failed to write {:?}: {}", path, e)))
}
