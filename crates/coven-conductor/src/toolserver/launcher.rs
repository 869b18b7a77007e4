// ABOUTME: Spawns tool server processes and stops them with a bounded grace period.
// ABOUTME: ServerLauncher/ServerProcess traits so supervision can run against fakes.

use crate::error::{ConductorError, Result, Stage};
use crate::types::ProjectId;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::Instant;

/// Everything needed to start one project's tool server.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub project: ProjectId,
    pub directory: PathBuf,
    pub port: u16,
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub startup_timeout: Duration,
}

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited after the graceful signal.
    Graceful,
    /// Killed after the grace period ran out.
    Forced,
    /// Was no longer running.
    AlreadyExited,
}

/// A running tool server.
#[async_trait]
pub trait ServerProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// True once the process has exited on its own.
    fn has_exited(&mut self) -> bool;

    /// Ask the process to exit, killing it if it is still alive after `grace`.
    async fn stop(&mut self, grace: Duration) -> std::io::Result<StopOutcome>;
}

/// Starts tool servers.
#[async_trait]
pub trait ServerLauncher: Send + Sync {
    /// Start a server and return once it accepts connections on `spec.port`.
    ///
    /// Failures are `ConductorError::ServerStart` at `Stage::Start`.
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ServerProcess>>;
}

/// Launches real child processes.
#[derive(Debug, Default)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

fn start_error(spec: &LaunchSpec, reason: impl Into<String>) -> ConductorError {
    ConductorError::ServerStart {
        project: spec.project.to_string(),
        stage: Stage::Start,
        reason: reason.into(),
    }
}

#[async_trait]
impl ServerLauncher for ProcessLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ServerProcess>> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .current_dir(&spec.directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| start_error(spec, format!("failed to spawn {}: {}", spec.program, e)))?;

        tracing::info!(
            project = %spec.project,
            pid = ?child.id(),
            port = spec.port,
            "Spawned tool server"
        );

        // Forward output line by line under the project name
        if let Some(stdout) = child.stdout.take() {
            let project = spec.project.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(project = %project, "[tool-server] {}", line);
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let project = spec.project.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::info!(project = %project, "[tool-server] {}", line);
                }
            });
        }

        if let Err(reason) = wait_until_listening(&mut child, spec.port, spec.startup_timeout).await
        {
            let _ = child.kill().await;
            return Err(start_error(spec, reason));
        }

        Ok(Box::new(ChildProcess { child }))
    }
}

/// Poll until `port` accepts a TCP connection, the child exits, or time runs out.
async fn wait_until_listening(
    child: &mut Child,
    port: u16,
    timeout: Duration,
) -> std::result::Result<(), String> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                return Err(format!("exited with {} before accepting connections", status))
            }
            Ok(None) => {}
            Err(e) => return Err(format!("failed to poll process: {}", e)),
        }

        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return Ok(());
        }

        if Instant::now() >= deadline {
            return Err(format!(
                "not listening on port {} after {:?}",
                port, timeout
            ));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// A spawned tool server process.
pub struct ChildProcess {
    child: Child,
}

impl ChildProcess {
    #[cfg(unix)]
    fn signal_terminate(&self) -> std::io::Result<()> {
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        let pid = libc::pid_t::try_from(pid)
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
        // SAFETY: kill(2) with a pid we spawned and still own a handle to.
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    #[cfg(not(unix))]
    fn signal_terminate(&self) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "graceful stop is not supported on this platform",
        ))
    }
}

#[async_trait]
impl ServerProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    async fn stop(&mut self, grace: Duration) -> std::io::Result<StopOutcome> {
        if let Ok(Some(_)) = self.child.try_wait() {
            return Ok(StopOutcome::AlreadyExited);
        }

        match self.signal_terminate() {
            Ok(()) => {
                if let Ok(waited) = tokio::time::timeout(grace, self.child.wait()).await {
                    waited?;
                    return Ok(StopOutcome::Graceful);
                }
            }
            Err(e) => {
                tracing::warn!(pid = ?self.child.id(), error = %e, "Graceful stop failed, killing");
            }
        }

        self.child.kill().await?;
        Ok(StopOutcome::Forced)
    }
}
