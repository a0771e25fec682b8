//! Provider that runs servers as child processes of this one.

use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt as _, AsyncRead, AsyncWriteExt as _, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{watch, Notify};

use super::control::{force_kill, graceful_signal};
use super::{
    server_env, PortMap, Provider, ProviderKind, ProviderStatus, RconResult, StartOptions,
    StartResult, StopOutcome,
};
use crate::config::LocalSettings;
use crate::error::{AppError, Result};
use crate::pak::{ServerType, DEFAULT_SLOT};

/// How long to wait for the group to disappear after SIGTERM and after SIGKILL.
const SIGNAL_WAIT: Duration = Duration::from_secs(5);

type LogBuffer = Arc<Mutex<VecDeque<String>>>;

struct LocalProcess {
    pid: u32,
    stdin: Option<ChildStdin>,
    logs: LogBuffer,
    exited: watch::Receiver<bool>,
    kill: Arc<Notify>,
    server_type: ServerType,
    version: String,
    level: String,
    ports: PortMap,
    started_at: String,
}

impl LocalProcess {
    fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }

    /// Returns `true` once the process is gone, `false` if `timeout` elapsed first.
    async fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.exited.wait_for(|exited| *exited))
            .await
            .is_ok()
    }
}

pub struct LocalProvider {
    settings: LocalSettings,
    processes: Mutex<HashMap<String, LocalProcess>>,
}

impl LocalProvider {
    pub fn new(settings: LocalSettings) -> Self {
        Self {
            settings,
            processes: Mutex::new(HashMap::new()),
        }
    }

    fn command_args(&self, options: &StartOptions) -> Vec<String> {
        let level = options.level.as_deref().unwrap_or(DEFAULT_SLOT);
        self.settings
            .args
            .iter()
            .map(|arg| {
                arg.replace("{memory}", &options.memory)
                    .replace("{version}", &options.version)
                    .replace("{type}", options.server_type.as_str())
                    .replace("{level}", level)
            })
            .collect()
    }

    fn take(&self, runtime_name: &str) -> Option<LocalProcess> {
        let mut procs = self.processes.lock().unwrap_or_else(|e| e.into_inner());
        procs.remove(runtime_name)
    }
}

fn push_line(buffer: &LogBuffer, capacity: usize, line: String) {
    let mut lines = buffer.lock().unwrap_or_else(|e| e.into_inner());
    if lines.len() >= capacity.max(1) {
        lines.pop_front();
    }
    lines.push_back(line);
}

fn spawn_reader<R>(reader: R, name: String, buffer: LogBuffer, capacity: usize)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            log::debug!("[{}] {}", name, line);
            push_line(&buffer, capacity, line);
        }
    });
}

#[async_trait::async_trait]
impl Provider for LocalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    async fn status(&self, runtime_name: &str) -> ProviderStatus {
        let procs = self.processes.lock().unwrap_or_else(|e| e.into_inner());
        match procs.get(runtime_name) {
            Some(process) if !process.has_exited() => ProviderStatus {
                running: true,
                server_type: Some(process.server_type),
                version: Some(process.version.clone()),
                ports: Some(process.ports),
                started_at: Some(process.started_at.clone()),
                level: Some(process.level.clone()),
            },
            _ => ProviderStatus::stopped(),
        }
    }

    async fn start(&self, options: StartOptions) -> Result<StartResult> {
        let name = options.runtime_name.clone();
        {
            let procs = self.processes.lock().unwrap_or_else(|e| e.into_inner());
            if procs.get(&name).is_some_and(|p| !p.has_exited()) {
                return Err(AppError::backend(format!("{} is already running", name)));
            }
        }

        let data_dir = &options.mount_data_dir;
        tokio::fs::create_dir_all(data_dir)
            .await
            .map_err(|e| AppError::io(format!("Failed to create {:?}: {}", data_dir, e)))?;
        if options.eula {
            tokio::fs::write(data_dir.join("eula.txt"), "eula=true\n")
                .await
                .map_err(|e| AppError::io(format!("Failed to write eula.txt: {}", e)))?;
        }

        let mut cmd = Command::new(&self.settings.command);
        cmd.args(self.command_args(&options))
            .current_dir(data_dir)
            .envs(server_env(&options))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| AppError::backend(format!("Failed to start {}: {}", name, e)))?;
        let pid = child
            .id()
            .ok_or_else(|| AppError::backend("Failed to get process ID"))?;

        let capacity = self.settings.log_buffer_lines;
        let logs: LogBuffer = Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(4096))));
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, name.clone(), Arc::clone(&logs), capacity);
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, name.clone(), Arc::clone(&logs), capacity);
        }
        let stdin = child.stdin.take();

        let (exit_tx, exited) = watch::channel(false);
        let kill = Arc::new(Notify::new());
        let kill_waiter = Arc::clone(&kill);
        let name_wait = name.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_waiter.notified() => {
                    if let Err(e) = child.start_kill() {
                        log::warn!("Could not kill {} (pid={}): {}", name_wait, pid, e);
                    }
                    child.wait().await
                }
            };
            match status {
                Ok(status) => log::info!("{} exited with {}", name_wait, status),
                Err(e) => log::warn!("Failed to wait for {}: {}", name_wait, e),
            }
            let _ = exit_tx.send(true);
        });

        let started_at = chrono::Utc::now().to_rfc3339();
        let ports = PortMap {
            server: self.settings.server_port,
            rcon: None,
        };
        log::info!("Started {} (pid: {})", name, pid);

        let process = LocalProcess {
            pid,
            stdin,
            logs,
            exited,
            kill,
            server_type: options.server_type,
            version: options.version.clone(),
            level: options
                .level
                .clone()
                .unwrap_or_else(|| DEFAULT_SLOT.to_string()),
            ports,
            started_at: started_at.clone(),
        };
        self.processes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, process);

        Ok(StartResult {
            runtime_id: Some(pid.to_string()),
            ports,
            rcon: None,
            started_at,
        })
    }

    async fn stop(&self, runtime_name: &str, force_kill_requested: bool) -> StopOutcome {
        let Some(mut process) = self.take(runtime_name) else {
            return StopOutcome::Stopped;
        };
        if process.has_exited() {
            return StopOutcome::Stopped;
        }
        let pid = process.pid;

        if !force_kill_requested {
            if let Some(stdin) = process.stdin.as_mut() {
                let sent = async {
                    stdin.write_all(b"stop\n").await?;
                    stdin.flush().await
                };
                if let Err(e) = sent.await {
                    log::warn!("Could not send stop to {}: {}", runtime_name, e);
                }
            }
            let grace = Duration::from_secs(self.settings.stop_grace_secs);
            if process.wait_for_exit(grace).await {
                log::info!("Stopped {}", runtime_name);
                return StopOutcome::Stopped;
            }

            log::warn!(
                "{} did not exit within {}s, sending SIGTERM",
                runtime_name,
                grace.as_secs()
            );
            match graceful_signal(pid) {
                Ok(()) if process.wait_for_exit(SIGNAL_WAIT).await => {
                    return StopOutcome::Stopped;
                }
                Ok(()) => {}
                Err(e) => log::warn!("{}", e),
            }
        }

        if let Err(e) = force_kill(pid) {
            log::warn!("{}", e);
        }
        process.kill.notify_one();
        if process.wait_for_exit(SIGNAL_WAIT).await {
            log::info!("Killed {}", runtime_name);
            StopOutcome::Killed
        } else {
            log::error!("{} (pid {}) survived SIGKILL", runtime_name, pid);
            StopOutcome::Failed {
                error: format!("process {pid} did not exit"),
            }
        }
    }

    async fn logs(&self, runtime_name: &str, tail: usize) -> Vec<String> {
        let procs = self.processes.lock().unwrap_or_else(|e| e.into_inner());
        let Some(process) = procs.get(runtime_name) else {
            return Vec::new();
        };
        let lines = process.logs.lock().unwrap_or_else(|e| e.into_inner());
        let skip = lines.len().saturating_sub(tail);
        lines.iter().skip(skip).cloned().collect()
    }

    async fn rcon(&self, _runtime_name: &str, _command: &str) -> RconResult {
        RconResult::failure("RCON not supported by the local provider")
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn provider(args: &[&str]) -> LocalProvider {
        LocalProvider::new(LocalSettings {
            command: "sh".to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            stop_grace_secs: 2,
            log_buffer_lines: 3,
            ..LocalSettings::default()
        })
    }

    fn options(dir: &std::path::Path) -> StartOptions {
        let mut options = super::super::tests::options();
        options.mount_data_dir = dir.to_path_buf();
        options
    }

    #[test]
    fn placeholders_are_substituted() {
        let provider = LocalProvider::new(LocalSettings::default());
        let args = provider.command_args(&super::super::tests::options());
        assert_eq!(args[0], "-Xms4G");
        assert_eq!(args.last().map(String::as_str), Some("snap1"));
    }

    #[tokio::test]
    async fn stdin_stop_ends_a_cooperative_server() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(&[
            "-c",
            "echo booting {level}; while read line; do [ \"$line\" = stop ] && exit 0; done",
        ]);
        provider.start(options(dir.path())).await.unwrap();
        assert!(dir.path().join("eula.txt").is_file());

        let status = provider.status("mc-alpha").await;
        assert!(status.running);
        assert_eq!(status.level.as_deref(), Some("snap1"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(provider.logs("mc-alpha", 10).await, ["booting snap1"]);

        assert_eq!(provider.stop("mc-alpha", false).await, StopOutcome::Stopped);
        assert!(!provider.status("mc-alpha").await.running);
        assert!(!provider.rcon("mc-alpha", "list").await.ok);
    }

    #[tokio::test]
    async fn force_stop_kills_the_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(&["-c", "trap '' TERM; sleep 60"]);
        provider.start(options(dir.path())).await.unwrap();
        assert!(provider.start(options(dir.path())).await.is_err());

        assert_eq!(provider.stop("mc-alpha", true).await, StopOutcome::Killed);
        assert_eq!(provider.stop("mc-alpha", false).await, StopOutcome::Stopped);
    }

    #[tokio::test]
    async fn log_buffer_keeps_only_recent_lines() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(&["-c", "for i in 1 2 3 4 5; do echo $i; done; sleep 60"]);
        provider.start(options(dir.path())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(provider.logs("mc-alpha", 10).await, ["3", "4", "5"]);
        assert_eq!(provider.logs("mc-alpha", 1).await, ["5"]);
        provider.stop("mc-alpha", true).await;
    }

    #[tokio::test]
    async fn follow_logs_is_unsupported() {
        let provider = provider(&[]);
        let err = provider.follow_logs("mc-alpha", 10).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidInput);
    }
}
