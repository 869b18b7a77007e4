// ABOUTME: Project registry - which projects are known and which one is current.
// ABOUTME: Switching brings the project's tool server up before the current pointer moves.

use crate::connection::{BackendRequest, ConnectionManager, ProjectInfo};
use crate::error::{ConductorError, Result};
use crate::toolserver::ToolServerSupervisor;
use crate::types::{Project, ProjectId};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectState {
    Unknown,
    Registered,
    Current,
}

#[derive(Debug, Default)]
struct RegistryState {
    projects: BTreeMap<ProjectId, Project>,
    current: Option<ProjectId>,
}

/// Known projects and the current-project pointer.
///
/// All mutations hold one async lock, so a switch is observed either fully
/// or not at all.
pub struct ProjectRegistry {
    connection: Arc<ConnectionManager>,
    servers: Arc<ToolServerSupervisor>,
    state: Mutex<RegistryState>,
}

impl ProjectRegistry {
    pub fn new(connection: Arc<ConnectionManager>, servers: Arc<ToolServerSupervisor>) -> Self {
        Self {
            connection,
            servers,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Make the project at `path` current, registering it if new.
    ///
    /// On failure the previous current project is left untouched and the
    /// cause is wrapped in `ConductorError::Switch`.
    pub async fn switch_to(&self, path: &Path) -> Result<Project> {
        let wrap = |source: ConductorError| ConductorError::Switch {
            path: path.to_path_buf(),
            source: Box::new(source),
        };

        let directory = resolve_directory(path).map_err(wrap)?;
        let id = ProjectId::from_path(&directory);

        let mut state = self.state.lock().await;
        let mut project = state
            .projects
            .get(&id)
            .cloned()
            .unwrap_or_else(|| Project::new(directory.clone()));

        if let Some(info) = self.verify(&directory).await.map_err(wrap)? {
            project.apply_backend_info(info);
        }

        self.servers.ensure_server(&project).await.map_err(wrap)?;

        let previous = state.current.replace(id.clone());
        state.projects.insert(id.clone(), project.clone());
        info!(
            project = %id,
            previous = ?previous.as_ref().map(ProjectId::as_str),
            "Switched current project"
        );
        Ok(project)
    }

    /// The current project.
    pub async fn current(&self) -> Result<Project> {
        let state = self.state.lock().await;
        state
            .current
            .as_ref()
            .and_then(|id| state.projects.get(id))
            .cloned()
            .ok_or(ConductorError::NoCurrentProject)
    }

    pub async fn current_id(&self) -> Option<ProjectId> {
        self.state.lock().await.current.clone()
    }

    pub async fn get(&self, id: &ProjectId) -> Option<Project> {
        self.state.lock().await.projects.get(id).cloned()
    }

    pub async fn state_of(&self, path: &Path) -> ProjectState {
        let id = self.id_for(path);
        let state = self.state.lock().await;
        if state.current.as_ref() == Some(&id) {
            ProjectState::Current
        } else if state.projects.contains_key(&id) {
            ProjectState::Registered
        } else {
            ProjectState::Unknown
        }
    }

    /// Every registered project, ordered by directory.
    pub async fn list(&self) -> Vec<Project> {
        self.state.lock().await.projects.values().cloned().collect()
    }

    /// Registry key for `path`. Canonicalizes when the path still exists.
    pub fn id_for(&self, path: &Path) -> ProjectId {
        let directory = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        ProjectId::from_path(&directory)
    }

    /// Stop a non-current project's tool server and forget the project.
    ///
    /// The entry is removed even if teardown reports an error; the error is
    /// still returned.
    pub async fn close(&self, path: &Path) -> Result<()> {
        let id = self.id_for(path);
        let mut state = self.state.lock().await;

        if state.current.as_ref() == Some(&id) {
            return Err(ConductorError::ProjectIsCurrent(path.to_path_buf()));
        }
        if !state.projects.contains_key(&id) {
            return Err(ConductorError::UnknownProject(path.to_path_buf()));
        }

        // Forget the project first so a cancelled teardown does not leave it registered.
        state.projects.remove(&id);
        let result = self.servers.teardown_server(&id).await;
        match &result {
            Ok(_) => info!(project = %id, "Closed project"),
            Err(e) => warn!(project = %id, error = %e, "Closed project with teardown errors"),
        }
        result.map(|_| ())
    }

    /// Tear down every tool server and clear the registry.
    pub async fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.projects.clear();
        state.current = None;
        self.servers.teardown_all().await.map(|stopped| {
            info!(stopped, "Project registry shut down");
        })
    }

    /// Ask the backend about `directory`. Skipped when not connected.
    async fn verify(&self, directory: &Path) -> Result<Option<ProjectInfo>> {
        let request = BackendRequest::CurrentProject {
            directory: directory.to_path_buf(),
        };
        let response = match self.connection.dispatch(request).await {
            Ok(response) => response,
            Err(ConductorError::NotConnected) => {
                debug!(directory = %directory.display(), "Not connected, skipping project verification");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        serde_json::from_value(response)
            .map(Some)
            .map_err(|e| ConductorError::backend(format!("unexpected project response: {}", e)))
    }
}

/// Absolute, existing, canonical directory for `path`.
fn resolve_directory(path: &Path) -> Result<PathBuf> {
    let invalid = |reason: String| ConductorError::InvalidProjectPath {
        path: path.to_path_buf(),
        reason,
    };

    if !path.is_absolute() {
        return Err(invalid("path is not absolute".to_string()));
    }
    let directory = std::fs::canonicalize(path).map_err(|e| invalid(e.to_string()))?;
    if !directory.is_dir() {
        return Err(invalid("not a directory".to_string()));
    }
    Ok(directory)
}
