//! Instance metadata types, persisted as `pak.json`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::AppError;

/// Server engine flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerType {
    #[serde(alias = "PAPER")]
    Paper,
    #[serde(alias = "PURPUR")]
    Purpur,
    #[serde(alias = "FOLIA")]
    Folia,
    #[serde(alias = "SPIGOT")]
    Spigot,
    #[serde(alias = "FABRIC")]
    Fabric,
    #[serde(alias = "QUILT")]
    Quilt,
    #[serde(alias = "FORGE")]
    Forge,
    #[serde(alias = "NEOFORGE")]
    NeoForge,
    #[serde(alias = "VANILLA")]
    Vanilla,
}

impl ServerType {
    pub const ALL: [Self; 9] = [
        Self::Paper,
        Self::Purpur,
        Self::Folia,
        Self::Spigot,
        Self::Fabric,
        Self::Quilt,
        Self::Forge,
        Self::NeoForge,
        Self::Vanilla,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paper => "paper",
            Self::Purpur => "purpur",
            Self::Folia => "folia",
            Self::Spigot => "spigot",
            Self::Fabric => "fabric",
            Self::Quilt => "quilt",
            Self::Forge => "forge",
            Self::NeoForge => "neoforge",
            Self::Vanilla => "vanilla",
        }
    }

    /// Paper-family servers load Bukkit plugins instead of mods.
    pub fn is_plugin_based(&self) -> bool {
        matches!(
            self,
            Self::Paper | Self::Purpur | Self::Folia | Self::Spigot
        )
    }

    /// Directory (relative to the data dir) extensions are synced into.
    pub fn extension_dir(&self) -> &'static str {
        if self.is_plugin_based() {
            "plugins"
        } else {
            "mods"
        }
    }

    /// Sibling directories holding secondary dimensions of a level.
    ///
    /// Bukkit-derived servers split the nether and the end out of the level
    /// directory; the others keep them inside it as `DIM-1` / `DIM1`.
    pub fn companion_suffixes(&self) -> &'static [&'static str] {
        if self.is_plugin_based() {
            &["_nether", "_the_end"]
        } else {
            &[]
        }
    }

    /// Value of the container image's `TYPE` variable.
    pub fn env_value(&self) -> String {
        self.as_str().to_ascii_uppercase()
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| AppError::invalid_input(format!("Unsupported server type: {s}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Engine {
    pub server_type: ServerType,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotEntry {
    pub id: String,
    pub name: String,
    #[serde(alias = "created")]
    pub created_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Saves {
    #[serde(default)]
    pub slots: Vec<SlotEntry>,
}

/// A plugin/mod declared on an instance, keyed by `(store, project_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extension {
    pub store: String,
    #[serde(deserialize_with = "string_or_number")]
    pub project_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub version_id: String,
    pub filename: String,
}

impl Extension {
    pub fn new(
        store: impl Into<String>,
        project_id: impl Into<String>,
        version_id: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            store: store.into(),
            project_id: project_id.into(),
            version_id: version_id.into(),
            filename: filename.into(),
        }
    }

    pub fn same_key(&self, store: &str, project_id: &str) -> bool {
        self.store == store && self.project_id == project_id
    }
}

/// Marketplaces hand out numeric ids for some projects.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Uint(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
        Raw::Uint(n) => n.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PakMetadata {
    pub id: String,
    pub name: String,
    pub engine: Engine,
    #[serde(default)]
    pub active_slot: String,
    #[serde(default)]
    pub saves: Saves,
    #[serde(default)]
    pub extensions: Vec<Extension>,
    pub created_at: String,
    /// Keys written by other tools, kept across rewrites.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PakMetadata {
    /// Slot backing live world data, falling back to the default `world` directory.
    pub fn effective_slot(&self) -> &str {
        if self.active_slot.is_empty() {
            crate::pak::DEFAULT_SLOT
        } else {
            &self.active_slot
        }
    }

    pub fn slots(&self) -> &[SlotEntry] {
        &self.saves.slots
    }
}
