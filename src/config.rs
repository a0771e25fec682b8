use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::extension::ExtensionCache;
use crate::paths::DataLayout;
use crate::provider::{DockerProvider, LocalProvider, Provider};

static CONFIG_LOCK: Mutex<()> = Mutex::new(());

/// Load `config.toml`, writing the defaults first when it does not exist yet.
pub fn load_settings(layout: &DataLayout) -> Result<Settings> {
    let path = layout.config_path();
    if !path.exists() {
        let settings = Settings::default();
        save_settings(layout, &settings)?;
        return Ok(settings);
    }
    let content = fs::read_to_string(&path).map_err(|e| AppError::config(e.to_string()))?;
    toml::from_str(&content).map_err(|e| AppError::config(e.to_string()))
}

pub fn save_settings(layout: &DataLayout, settings: &Settings) -> Result<()> {
    layout.ensure_data_dirs()?;
    let content =
        toml::to_string_pretty(settings).map_err(|e| AppError::config(e.to_string()))?;
    fs::write(layout.config_path(), content).map_err(|e| AppError::config(e.to_string()))
}

/// Execute a read-modify-write operation on the config file while holding a lock.
pub fn with_settings_mut<F, T>(layout: &DataLayout, f: F) -> Result<T>
where
    F: FnOnce(&mut Settings) -> Result<T>,
{
    let _guard = CONFIG_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let mut settings = load_settings(layout)?;
    let result = f(&mut settings)?;
    save_settings(layout, &settings)?;
    Ok(result)
}

/// Which runtime backend hosts the servers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Docker,
    Local,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub provider: ProviderKind,
    /// Overrides `$CRAFTSMAN_EXT_HOME` and the default cache location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_cache: Option<PathBuf>,
    #[serde(default)]
    pub launch: LaunchDefaults,
    #[serde(default)]
    pub docker: DockerSettings,
    #[serde(default)]
    pub local: LocalSettings,
    #[serde(default)]
    pub backup: BackupSettings,
}

impl Settings {
    pub fn extension_cache(&self) -> Result<ExtensionCache> {
        match &self.extension_cache {
            Some(root) => Ok(ExtensionCache::new(root)),
            None => ExtensionCache::from_env(),
        }
    }

    /// Instantiate the configured provider; callers hold it as a trait object.
    pub fn build_provider(&self) -> Arc<dyn Provider> {
        match self.provider {
            ProviderKind::Docker => Arc::new(DockerProvider::new(self.docker.clone())),
            ProviderKind::Local => Arc::new(LocalProvider::new(self.local.clone())),
        }
    }
}

/// Values used when neither the caller nor the instance record decides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchDefaults {
    pub server_type: String,
    pub version: String,
    pub memory: String,
    pub eula: bool,
    pub online_mode: bool,
    pub rcon_enabled: bool,
    pub motd: Option<String>,
}

impl Default for LaunchDefaults {
    fn default() -> Self {
        Self {
            server_type: "paper".to_string(),
            version: "1.21.8".to_string(),
            memory: "4G".to_string(),
            eula: true,
            online_mode: true,
            rcon_enabled: true,
            motd: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerSettings {
    /// Container engine CLI (`docker`, `podman`, ...).
    pub binary: String,
    pub image: String,
    pub server_port: u16,
    pub rcon_port: u16,
    pub stop_timeout_secs: u64,
    pub pull_image: bool,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            image: "itzg/minecraft-server:latest".to_string(),
            server_port: 25565,
            rcon_port: 25575,
            stop_timeout_secs: 10,
            pull_image: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    pub command: String,
    /// Arguments; `{memory}`, `{version}`, `{type}` and `{level}` are substituted.
    pub args: Vec<String>,
    pub server_port: u16,
    pub stop_grace_secs: u64,
    /// Lines of console output retained per process.
    pub log_buffer_lines: usize,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            command: "java".to_string(),
            args: [
                "-Xms{memory}",
                "-Xmx{memory}",
                "-jar",
                "server.jar",
                "--nogui",
                "--world",
                "{level}",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            server_port: 25565,
            stop_grace_secs: 30,
            log_buffer_lines: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    /// Pause between `save-all flush` and archiving.
    pub settle_millis: u64,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            settle_millis: 1000,
        }
    }
}
