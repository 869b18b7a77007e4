// ABOUTME: Supervises one auxiliary tool server per project.
// ABOUTME: Port lease, process start, and config-file merge are all-or-nothing; teardown always frees the port.

pub mod config_file;
mod launcher;

pub use config_file::{ConfigFileError, InstalledEntry, ServerEntry};
pub use launcher::{
    ChildProcess, LaunchSpec, ProcessLauncher, ServerLauncher, ServerProcess, StopOutcome,
};

use crate::config::ToolServerConfig;
use crate::error::{ConductorError, Result, Stage};
use crate::ports::{PortLease, PortPool};
use crate::types::{Project, ProjectId};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, MutexGuard};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// Snapshot of a tool server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolServerInfo {
    pub project: ProjectId,
    pub directory: PathBuf,
    pub port: u16,
    /// Address declared in the configuration file
    pub url: String,
    pub config_path: PathBuf,
    pub pid: Option<u32>,
    pub state: ServerState,
}

/// A started server. Dropping it without teardown (a cancelled stop, or the
/// supervisor going away) still reverts the config entry, kills the process,
/// and returns the port, in that order.
struct ToolServerInstance {
    info: ToolServerInfo,
    process: Box<dyn ServerProcess>,
    /// Taken once reverted.
    entry: Option<InstalledEntry>,
    // Dropped after `process`, so the port is not handed out while the old server holds it.
    lease: PortLease,
}

impl Drop for ToolServerInstance {
    fn drop(&mut self) {
        let Some(entry) = self.entry.take() else {
            return;
        };
        warn!(
            project = %self.info.project,
            port = self.lease.port(),
            "Tool server dropped without teardown, reverting config entry"
        );
        if let Err(e) = config_file::remove_entry(&entry) {
            warn!(project = %self.info.project, error = %e, "Failed to revert config entry");
        }
    }
}

/// Per-project slot. The async lock serializes start/stop for one project
/// without blocking other projects.
type Slot = Arc<Mutex<Option<ToolServerInstance>>>;

/// Owns every project's tool server.
pub struct ToolServerSupervisor {
    config: ToolServerConfig,
    pool: Arc<PortPool>,
    launcher: Arc<dyn ServerLauncher>,
    slots: std::sync::Mutex<HashMap<ProjectId, Slot>>,
}

impl ToolServerSupervisor {
    pub fn new(config: ToolServerConfig, launcher: Arc<dyn ServerLauncher>) -> Result<Self> {
        let pool = Arc::new(PortPool::new(config.base_port, config.max_servers)?);
        Ok(Self {
            config,
            pool,
            launcher,
            slots: std::sync::Mutex::new(HashMap::new()),
        })
    }

    pub fn pool(&self) -> &PortPool {
        &self.pool
    }

    pub fn config(&self) -> &ToolServerConfig {
        &self.config
    }

    /// Make sure `project` has a running tool server, starting one if needed.
    pub async fn ensure_server(&self, project: &Project) -> Result<ToolServerInfo> {
        let slot = self.slot(&project.id);
        let mut guard = slot.lock().await;

        if let Some(instance) = guard.as_mut() {
            if !instance.process.has_exited() {
                return Ok(instance.info.clone());
            }
            let port = instance.info.port;
            warn!(project = %project.id, port, "Tool server exited on its own, restarting");
            if let Some(dead) = guard.take() {
                if let Err(e) = self.stop_instance(dead).await {
                    warn!(
                        project = %project.id,
                        port,
                        error = %e,
                        "Cleanup of exited tool server failed, starting a new one anyway"
                    );
                }
            }
        }

        let result = self.start(project).await;
        match result {
            Ok(instance) => {
                let info = instance.info.clone();
                *guard = Some(instance);
                Ok(info)
            }
            Err(e) => {
                drop(guard);
                self.prune(&project.id, &slot);
                Err(e)
            }
        }
    }

    /// Stop the project's tool server. Returns false if it had none.
    ///
    /// The port is released even when stopping fails; the failure is still returned.
    pub async fn teardown_server(&self, project: &ProjectId) -> Result<bool> {
        let Some(slot) = self.existing_slot(project) else {
            return Ok(false);
        };
        let mut guard = slot.lock().await;
        let instance = guard.take();
        let result = match instance {
            Some(instance) => self.stop_instance(instance).await.map(|_| true),
            None => Ok(false),
        };
        drop(guard);
        self.prune(project, &slot);
        result
    }

    /// Stop every tool server, continuing past failures.
    ///
    /// Returns the number torn down, or every failure collected.
    pub async fn teardown_all(&self) -> Result<usize> {
        let projects: Vec<ProjectId> = self.lock_slots().keys().cloned().collect();
        let results =
            futures::future::join_all(projects.iter().map(|p| self.teardown_server(p))).await;

        let mut stopped = 0;
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(true) => stopped += 1,
                Ok(false) => {}
                Err(e) => failures.push(e),
            }
        }

        if failures.is_empty() {
            Ok(stopped)
        } else {
            Err(ConductorError::Teardown(failures))
        }
    }

    /// Snapshot of one project's server.
    pub async fn server(&self, project: &ProjectId) -> Option<ToolServerInfo> {
        let slot = self.existing_slot(project)?;
        let guard = slot.lock().await;
        guard.as_ref().map(|i| i.info.clone())
    }

    /// Snapshots of every server, ordered by port.
    pub async fn servers(&self) -> Vec<ToolServerInfo> {
        let slots: Vec<Slot> = self.lock_slots().values().cloned().collect();
        let mut infos = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(instance) = slot.lock().await.as_ref() {
                infos.push(instance.info.clone());
            }
        }
        infos.sort_by_key(|i| i.port);
        infos
    }

    async fn start(&self, project: &Project) -> Result<ToolServerInstance> {
        let lease = PortLease::acquire(&self.pool)?;
        let port = lease.port();
        let url = self.config.render_url(port);
        let config_path = self.config.config_path(&project.directory);
        let mut info = ToolServerInfo {
            project: project.id.clone(),
            directory: project.directory.clone(),
            port,
            url: url.clone(),
            config_path: config_path.clone(),
            pid: None,
            state: ServerState::Starting,
        };
        info!(project = %project.id, port, "Starting tool server");

        let spec = LaunchSpec {
            project: project.id.clone(),
            directory: project.directory.clone(),
            port,
            program: self.config.command.clone(),
            args: self.config.render_args(port, &project.directory),
            env: self.config.env.clone(),
            startup_timeout: self.config.startup_timeout(),
        };

        let mut process = match self.launcher.launch(&spec).await {
            Ok(process) => process,
            Err(e) => {
                warn!(project = %project.id, port, error = %e, "Tool server failed to start");
                return Err(e);
            }
        };

        let entry = match config_file::install_entry(
            &config_path,
            &self.config.name,
            &ServerEntry::remote(url),
        ) {
            Ok(entry) => entry,
            Err(e) => {
                if let Err(stop_err) = process.stop(self.config.grace_period()).await {
                    warn!(project = %project.id, error = %stop_err, "Failed to stop tool server after config write failure");
                }
                warn!(project = %project.id, port, error = %e, "Tool server config write failed");
                return Err(ConductorError::ServerStart {
                    project: project.id.to_string(),
                    stage: Stage::ConfigWrite,
                    reason: e.to_string(),
                });
            }
        };

        info.pid = process.pid();
        info.state = ServerState::Running;
        info!(
            project = %project.id,
            port,
            pid = ?info.pid,
            config = %config_path.display(),
            "Tool server running"
        );

        Ok(ToolServerInstance {
            info,
            process,
            entry: Some(entry),
            lease,
        })
    }

    async fn stop_instance(&self, mut instance: ToolServerInstance) -> Result<()> {
        let project = instance.info.project.clone();
        let port = instance.info.port;
        instance.info.state = ServerState::Stopping;
        info!(project = %project, port, "Stopping tool server");

        let mut problems = Vec::new();
        match instance.process.stop(self.config.grace_period()).await {
            Ok(StopOutcome::Forced) => {
                warn!(project = %project, port, "Tool server ignored stop signal, killed");
            }
            Ok(_) => {}
            Err(e) => problems.push(format!("process stop: {}", e)),
        }
        if let Some(entry) = instance.entry.take() {
            if let Err(e) = config_file::remove_entry(&entry) {
                problems.push(format!("config revert: {}", e));
            }
        }

        // Releases the port.
        drop(instance);

        if problems.is_empty() {
            info!(project = %project, port, "Tool server stopped");
            Ok(())
        } else {
            let reason = problems.join("; ");
            warn!(project = %project, port, reason = %reason, "Tool server teardown incomplete, port released");
            Err(ConductorError::ServerStop {
                project: project.to_string(),
                reason,
            })
        }
    }

    fn slot(&self, project: &ProjectId) -> Slot {
        Arc::clone(
            self.lock_slots()
                .entry(project.clone())
                .or_insert_with(|| Arc::new(Mutex::new(None))),
        )
    }

    fn existing_slot(&self, project: &ProjectId) -> Option<Slot> {
        self.lock_slots().get(project).cloned()
    }

    /// Drop an empty slot nobody else is holding.
    fn prune(&self, project: &ProjectId, slot: &Slot) {
        let mut slots = self.lock_slots();
        let ours = slots.get(project).is_some_and(|s| Arc::ptr_eq(s, slot));
        // Clones are only made under this lock: the map's and ours means nobody is waiting.
        if ours && Arc::strong_count(slot) == 2 {
            if let Ok(guard) = slot.try_lock() {
                if guard.is_none() {
                    drop(guard);
                    slots.remove(project);
                }
            }
        }
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<ProjectId, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}
