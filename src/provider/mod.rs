//! Runtime providers: the backends that actually host a server process.
//!
//! The supervisor only talks to [`Provider`]; which implementation sits behind
//! it is decided once from configuration.

mod control;
mod docker;
mod local;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use crate::config::ProviderKind;
use crate::error::{AppError, Result};
use crate::pak::ServerType;

pub use docker::DockerProvider;
pub use local::LocalProvider;

/// Host ports a running unit is reachable on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMap {
    pub server: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rcon: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RconCredentials {
    pub host: String,
    pub port: u16,
    pub password: String,
}

/// Live view of a runtime unit. Unknown units report `running: false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub running: bool,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub server_type: Option<ServerType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<PortMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl ProviderStatus {
    pub fn stopped() -> Self {
        Self::default()
    }
}

/// Everything a provider needs to launch one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOptions {
    pub runtime_name: String,
    pub server_type: ServerType,
    pub version: String,
    pub memory: String,
    pub eula: bool,
    pub online_mode: bool,
    pub motd: Option<String>,
    pub rcon_enabled: bool,
    pub rcon_password: Option<String>,
    /// Level (slot) directory inside `mount_data_dir`.
    pub level: Option<String>,
    pub mount_data_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_id: Option<String>,
    pub ports: PortMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rcon: Option<RconCredentials>,
    pub started_at: String,
}

/// How a stop request ended. The unit is released in every case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum StopOutcome {
    Stopped,
    Killed,
    Failed { error: String },
}

impl StopOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RconResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RconResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            ok: true,
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            output: None,
            error: Some(error.into()),
        }
    }
}

/// Backend capable of hosting named runtime units.
///
/// `status`, `stop`, `logs` and `rcon` never fail outright; problems are
/// reported inside their return values so callers can degrade gracefully.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Whether [`Provider::follow_logs`] is available.
    fn supports_follow_logs(&self) -> bool {
        false
    }

    async fn status(&self, runtime_name: &str) -> ProviderStatus;

    async fn start(&self, options: StartOptions) -> Result<StartResult>;

    async fn stop(&self, runtime_name: &str, force_kill: bool) -> StopOutcome;

    /// Most recent `tail` lines, oldest first. Empty on failure.
    async fn logs(&self, runtime_name: &str, tail: usize) -> Vec<String>;

    /// Stream the last `tail` lines and then every new one until the unit stops
    /// or the receiver is dropped.
    async fn follow_logs(&self, runtime_name: &str, tail: usize) -> Result<mpsc::Receiver<String>> {
        let _ = (runtime_name, tail);
        Err(AppError::invalid_input(format!(
            "{:?} provider cannot follow logs",
            self.kind()
        )))
    }

    async fn rcon(&self, runtime_name: &str, command: &str) -> RconResult;
}

/// Server environment shared by both providers.
pub(crate) fn server_env(options: &StartOptions) -> Vec<(String, String)> {
    let mut env = vec![
        ("EULA".to_string(), options.eula.to_string().to_ascii_uppercase()),
        ("TYPE".to_string(), options.server_type.env_value()),
        ("VERSION".to_string(), options.version.clone()),
        ("MEMORY".to_string(), options.memory.clone()),
        (
            "ONLINE_MODE".to_string(),
            options.online_mode.to_string().to_ascii_uppercase(),
        ),
        (
            "ENABLE_RCON".to_string(),
            options.rcon_enabled.to_string().to_ascii_uppercase(),
        ),
    ];
    if options.rcon_enabled {
        if let Some(password) = &options.rcon_password {
            env.push(("RCON_PASSWORD".to_string(), password.clone()));
        }
    }
    if let Some(level) = &options.level {
        env.push(("LEVEL".to_string(), level.clone()));
    }
    if let Some(motd) = &options.motd {
        env.push(("MOTD".to_string(), motd.clone()));
    }
    env
}

/// 32 hex characters.
pub(crate) fn generate_rcon_password() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
