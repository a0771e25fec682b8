//! Container-backed provider driving a docker-compatible CLI.

use std::collections::HashMap;
use std::process::Stdio;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use super::{
    generate_rcon_password, server_env, PortMap, Provider, ProviderKind, ProviderStatus,
    RconCredentials, RconResult, StartOptions, StartResult, StopOutcome,
};
use crate::config::DockerSettings;
use crate::error::{AppError, Result};

/// Ports the server image listens on inside the container.
const CONTAINER_SERVER_PORT: u16 = 25565;
const CONTAINER_RCON_PORT: u16 = 25575;

const FOLLOW_CHANNEL_CAPACITY: usize = 256;

pub struct DockerProvider {
    settings: DockerSettings,
}

impl DockerProvider {
    pub fn new(settings: DockerSettings) -> Self {
        Self { settings }
    }

    /// Run the engine CLI and return its stdout, or a `Backend` error carrying stderr.
    async fn docker(&self, args: &[String]) -> Result<String> {
        log::debug!("{} {}", self.settings.binary, args.join(" "));
        let output = Command::new(&self.settings.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                AppError::backend(format!("Failed to run {}: {}", self.settings.binary, e))
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(AppError::backend(format!(
                "{} {} failed ({}): {}",
                self.settings.binary,
                args.first().map(String::as_str).unwrap_or_default(),
                output.status,
                stderr.trim()
            )))
        }
    }

    async fn inspect(&self, name: &str) -> Option<InspectEntry> {
        let stdout = self
            .docker(&args(["inspect", name]))
            .await
            .map_err(|e| log::debug!("inspect {} failed: {}", name, e))
            .ok()?;
        parse_inspect(&stdout)
    }

    async fn force_remove(&self, name: &str) -> StopOutcome {
        match self.docker(&args(["rm", "-f", name])).await {
            Ok(_) => StopOutcome::Killed,
            Err(e) => {
                log::error!("Failed to remove container {}: {}", name, e);
                StopOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Arguments for `docker run`, given the resolved RCON password.
    pub(crate) fn run_args(&self, options: &StartOptions) -> Result<Vec<String>> {
        let data_dir = std::path::absolute(&options.mount_data_dir).map_err(|e| {
            AppError::io(format!(
                "Failed to resolve {:?}: {}",
                options.mount_data_dir, e
            ))
        })?;

        let mut out = args(["run", "-d", "--name", &options.runtime_name]);
        out.push("-p".to_string());
        out.push(format!(
            "{}:{}",
            self.settings.server_port, CONTAINER_SERVER_PORT
        ));
        if options.rcon_enabled {
            out.push("-p".to_string());
            out.push(format!("{}:{}", self.settings.rcon_port, CONTAINER_RCON_PORT));
        }
        out.push("-v".to_string());
        out.push(format!("{}:/data", data_dir.display()));
        for (key, value) in server_env(options) {
            out.push("-e".to_string());
            out.push(format!("{key}={value}"));
        }
        out.push(self.settings.image.clone());
        Ok(out)
    }
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.into_iter().map(String::from).collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    state: InspectState,
    #[serde(default)]
    config: InspectConfig,
    #[serde(default)]
    network_settings: InspectNetwork,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    running: bool,
    #[serde(default)]
    started_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    env: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectNetwork {
    #[serde(default)]
    ports: Option<HashMap<String, Option<Vec<PortBinding>>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PortBinding {
    host_port: String,
}

fn parse_inspect(stdout: &str) -> Option<InspectEntry> {
    match serde_json::from_str::<Vec<InspectEntry>>(stdout) {
        Ok(entries) => entries.into_iter().next(),
        Err(e) => {
            log::warn!("Unparseable inspect output: {}", e);
            None
        }
    }
}

impl InspectEntry {
    fn env(&self, key: &str) -> Option<String> {
        let prefix = format!("{key}=");
        self.config
            .env
            .as_deref()?
            .iter()
            .find_map(|entry| entry.strip_prefix(&prefix))
            .map(str::to_string)
    }

    fn host_port(&self, container_port: u16) -> Option<u16> {
        let prefix = format!("{container_port}/");
        self.network_settings
            .ports
            .as_ref()?
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .find_map(|(_, bindings)| bindings.as_ref()?.first()?.host_port.parse().ok())
    }

    fn into_status(self) -> ProviderStatus {
        let ports = self.host_port(CONTAINER_SERVER_PORT).map(|server| PortMap {
            server,
            rcon: self.host_port(CONTAINER_RCON_PORT),
        });
        ProviderStatus {
            running: self.state.running,
            server_type: self.env("TYPE").and_then(|t| t.parse().ok()),
            version: self.env("VERSION"),
            level: self.env("LEVEL"),
            ports,
            started_at: self.state.started_at.clone(),
        }
    }
}

#[async_trait::async_trait]
impl Provider for DockerProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Docker
    }

    fn supports_follow_logs(&self) -> bool {
        true
    }

    async fn status(&self, runtime_name: &str) -> ProviderStatus {
        self.inspect(runtime_name)
            .await
            .map(InspectEntry::into_status)
            .unwrap_or_else(ProviderStatus::stopped)
    }

    async fn start(&self, mut options: StartOptions) -> Result<StartResult> {
        let name = options.runtime_name.clone();

        if self.settings.pull_image {
            if let Err(e) = self.docker(&args(["pull", &self.settings.image])).await {
                log::warn!("Image pull failed, using local copy: {}", e);
            }
        }

        // A stopped container left behind would block `--name`.
        if let Some(stale) = self.inspect(&name).await {
            if !stale.state.running {
                log::info!("Removing leftover container {}", name);
                self.docker(&args(["rm", "-f", &name])).await?;
            }
        }

        if options.rcon_enabled && options.rcon_password.is_none() {
            options.rcon_password = Some(generate_rcon_password());
        }

        let stdout = self.docker(&self.run_args(&options)?).await?;
        let container_id = stdout.trim().to_string();
        log::info!("Started container {} ({})", name, container_id);

        let rcon = options
            .rcon_password
            .filter(|_| options.rcon_enabled)
            .map(|password| RconCredentials {
                host: "127.0.0.1".to_string(),
                port: self.settings.rcon_port,
                password,
            });

        Ok(StartResult {
            runtime_id: (!container_id.is_empty()).then_some(container_id),
            ports: PortMap {
                server: self.settings.server_port,
                rcon: options.rcon_enabled.then_some(self.settings.rcon_port),
            },
            rcon,
            started_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    async fn stop(&self, runtime_name: &str, force_kill: bool) -> StopOutcome {
        if force_kill {
            if let Err(e) = self.docker(&args(["kill", runtime_name])).await {
                log::warn!("docker kill {} failed: {}", runtime_name, e);
            }
            return self.force_remove(runtime_name).await;
        }

        let timeout = self.settings.stop_timeout_secs.to_string();
        let graceful = async {
            self.docker(&args(["stop", "-t", &timeout, runtime_name]))
                .await?;
            self.docker(&args(["rm", runtime_name])).await
        };
        match graceful.await {
            Ok(_) => {
                log::info!("Stopped container {}", runtime_name);
                StopOutcome::Stopped
            }
            Err(e) => {
                log::warn!("Graceful stop of {} failed, removing: {}", runtime_name, e);
                self.force_remove(runtime_name).await
            }
        }
    }

    async fn logs(&self, runtime_name: &str, tail: usize) -> Vec<String> {
        let tail = format!("--tail={tail}");
        match self.docker(&args(["logs", &tail, runtime_name])).await {
            Ok(stdout) => stdout
                .lines()
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) => {
                log::debug!("logs {} failed: {}", runtime_name, e);
                Vec::new()
            }
        }
    }

    async fn follow_logs(&self, runtime_name: &str, tail: usize) -> Result<mpsc::Receiver<String>> {
        let mut child = Command::new(&self.settings.binary)
            .arg("logs")
            .arg("-f")
            .arg(format!("--tail={tail}"))
            .arg(runtime_name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AppError::backend(format!("Failed to run {}: {}", self.settings.binary, e))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::backend("Failed to capture log stream"))?;

        let (tx, rx) = mpsc::channel(FOLLOW_CHANNEL_CAPACITY);
        let name = runtime_name.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            // Dropping the child kills the follower if the reader went away first.
            drop(child);
            log::debug!("Log stream for {} ended", name);
        });

        Ok(rx)
    }

    async fn rcon(&self, runtime_name: &str, command: &str) -> RconResult {
        let mut exec = args(["exec", runtime_name, "rcon-cli"]);
        exec.extend(command.split_whitespace().map(String::from));
        match self.docker(&exec).await {
            Ok(stdout) => RconResult::success(stdout.trim()),
            Err(e) => RconResult::failure(e.to_string()),
        }
    }
}
