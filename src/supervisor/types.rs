use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::LaunchDefaults;
use crate::error::{AppError, Result};
use crate::pak::{Engine, PakMetadata, ServerType, DEFAULT_SLOT};
use crate::provider::{PortMap, StartResult};

/// Caller-supplied values for [`Supervisor::start`](super::Supervisor::start).
///
/// Anything left `None` falls back to the instance record, then to the
/// configured launch defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartOverrides {
    pub slot: Option<String>,
    pub server_type: Option<ServerType>,
    pub version: Option<String>,
    pub memory: Option<String>,
    pub eula: Option<bool>,
    pub online_mode: Option<bool>,
    pub motd: Option<String>,
    pub rcon_enabled: Option<bool>,
    pub rcon_password: Option<String>,
}

/// Fully resolved launch configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchSpec {
    #[serde(rename = "type")]
    pub server_type: ServerType,
    pub version: String,
    pub slot: String,
    pub memory: String,
    pub eula: bool,
    pub online_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motd: Option<String>,
    pub rcon_enabled: bool,
    #[serde(skip)]
    pub rcon_password: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl LaunchSpec {
    /// Resolve every field as override, then instance record, then default.
    pub fn resolve(
        overrides: &StartOverrides,
        meta: Option<&PakMetadata>,
        defaults: &LaunchDefaults,
    ) -> Result<Self> {
        let server_type = match overrides.server_type.or(meta.map(|m| m.engine.server_type)) {
            Some(server_type) => server_type,
            None => defaults.server_type.parse().map_err(|_| {
                AppError::config(format!(
                    "Invalid default server type: {}",
                    defaults.server_type
                ))
            })?,
        };

        let version = non_empty(&overrides.version)
            .or_else(|| meta.map(|m| m.engine.version.as_str()).filter(|v| !v.is_empty()))
            .unwrap_or(&defaults.version)
            .to_string();

        let slot = non_empty(&overrides.slot)
            .or_else(|| meta.map(PakMetadata::effective_slot))
            .unwrap_or(DEFAULT_SLOT)
            .to_string();

        Ok(Self {
            server_type,
            version,
            slot,
            memory: non_empty(&overrides.memory)
                .unwrap_or(&defaults.memory)
                .to_string(),
            eula: overrides.eula.unwrap_or(defaults.eula),
            online_mode: overrides.online_mode.unwrap_or(defaults.online_mode),
            motd: non_empty(&overrides.motd)
                .map(str::to_string)
                .or_else(|| defaults.motd.clone()),
            rcon_enabled: overrides.rcon_enabled.unwrap_or(defaults.rcon_enabled),
            rcon_password: non_empty(&overrides.rcon_password).map(str::to_string),
        })
    }
}

/// Live provider view merged with the runtime record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorStatus {
    pub id: String,
    pub running: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub server_type: Option<ServerType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ports: Option<PortMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

/// Stored as `backup.toml` at the root of every archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub created_at: String,
    pub pak_id: String,
    pub slot: String,
    pub server_type: ServerType,
    pub version: String,
    pub levels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupReport {
    pub file: PathBuf,
    pub size: u64,
    pub slot: String,
    pub levels: Vec<String>,
    pub started_at: String,
    pub finished_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEntry {
    pub file: PathBuf,
    pub size: u64,
    pub modified_at: String,
    /// `None` for archives without a readable `backup.toml`.
    pub metadata: Option<BackupMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub file: PathBuf,
    pub slot: String,
    /// Level directories replaced by the archive contents.
    pub restored: Vec<String>,
    /// Where the previous level directories were moved, when they were kept.
    pub holding_dir: Option<PathBuf>,
}

/// Result of an upgrade or migration that actually changed the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub previous: Engine,
    pub current: Engine,
    pub backup: BackupReport,
    pub start: StartResult,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pak::{Engine, Saves};

    fn meta(server_type: ServerType, version: &str, active_slot: &str) -> PakMetadata {
        PakMetadata {
            id: "alpha".to_string(),
            name: "alpha".to_string(),
            engine: Engine {
                server_type,
                version: version.to_string(),
            },
            active_slot: active_slot.to_string(),
            saves: Saves::default(),
            extensions: Vec::new(),
            created_at: "2025-01-01T00:00:00Z".to_string(),
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn defaults_apply_without_record_or_overrides() {
        let spec =
            LaunchSpec::resolve(&StartOverrides::default(), None, &LaunchDefaults::default())
                .unwrap();
        assert_eq!(spec.server_type, ServerType::Paper);
        assert_eq!(spec.version, "1.21.8");
        assert_eq!(spec.slot, "world");
        assert_eq!(spec.memory, "4G");
        assert!(spec.eula && spec.online_mode && spec.rcon_enabled);
    }

    #[test]
    fn record_beats_defaults_and_overrides_beat_record() {
        let record = meta(ServerType::Fabric, "1.20.4", "snap1");
        let defaults = LaunchDefaults::default();

        let spec = LaunchSpec::resolve(&StartOverrides::default(), Some(&record), &defaults)
            .unwrap();
        assert_eq!(spec.server_type, ServerType::Fabric);
        assert_eq!(spec.version, "1.20.4");
        assert_eq!(spec.slot, "snap1");

        let overrides = StartOverrides {
            version: Some("1.21.8".to_string()),
            slot: Some("other".to_string()),
            memory: Some("8G".to_string()),
            online_mode: Some(false),
            ..StartOverrides::default()
        };
        let spec = LaunchSpec::resolve(&overrides, Some(&record), &defaults).unwrap();
        assert_eq!(spec.server_type, ServerType::Fabric);
        assert_eq!(spec.version, "1.21.8");
        assert_eq!(spec.slot, "other");
        assert_eq!(spec.memory, "8G");
        assert!(!spec.online_mode);
    }

    #[test]
    fn empty_active_slot_and_blank_overrides_fall_through() {
        let record = meta(ServerType::Paper, "1.21.8", "");
        let overrides = StartOverrides {
            slot: Some("  ".to_string()),
            ..StartOverrides::default()
        };
        let spec =
            LaunchSpec::resolve(&overrides, Some(&record), &LaunchDefaults::default()).unwrap();
        assert_eq!(spec.slot, "world");
    }

    #[test]
    fn bad_default_type_is_a_config_error() {
        let defaults = LaunchDefaults {
            server_type: "bedrock".to_string(),
            ..LaunchDefaults::default()
        };
        let err = LaunchSpec::resolve(&StartOverrides::default(), None, &defaults).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }
}
