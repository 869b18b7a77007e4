// ABOUTME: Core types for coven-conductor - ProjectId, Project, Session
// ABOUTME: Plain data shared by the registry, the session manager, and the tool server supervisor

use crate::connection::{ProjectInfo, SessionInfo};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Registry key for a project, derived from its canonical working directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn from_path(directory: &Path) -> Self {
        Self(directory.to_string_lossy().into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A working directory with its own sessions and tool server.
#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: ProjectId,
    /// Canonical absolute working directory
    pub directory: PathBuf,
    /// Last path component, for display
    pub name: String,
    /// Project id as reported by the backend, once verified
    pub backend_id: Option<String>,
    /// Version-control metadata from the backend; not interpreted
    pub vcs: Option<serde_json::Value>,
}

impl Project {
    pub fn new(directory: PathBuf) -> Self {
        let name = directory
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| directory.to_string_lossy().into_owned());
        Self {
            id: ProjectId::from_path(&directory),
            directory,
            name,
            backend_id: None,
            vcs: None,
        }
    }

    /// Record what the backend knows about this project.
    pub fn apply_backend_info(&mut self, info: ProjectInfo) {
        self.backend_id = Some(info.id);
        self.vcs = info.vcs;
    }
}

/// A conversation thread bound to one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    /// Assigned by the backend
    pub id: String,
    /// Owning project, by key
    pub project: ProjectId,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn from_info(project: &ProjectId, info: SessionInfo) -> Self {
        let created_at = info
            .time
            .created
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now);
        Self {
            id: info.id,
            project: project.clone(),
            title: info.title,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::SessionTime;

    #[test]
    fn test_project_name_from_directory() {
        let project = Project::new(PathBuf::from("/work/coven"));
        assert_eq!(project.name, "coven");
        assert_eq!(project.id.as_str(), "/work/coven");
        assert!(project.backend_id.is_none());
    }

    #[test]
    fn test_apply_backend_info() {
        let mut project = Project::new(PathBuf::from("/work/coven"));
        project.apply_backend_info(ProjectInfo {
            id: "4b0ea68d".to_string(),
            worktree: Some("/work/coven".to_string()),
            vcs: Some(serde_json::json!("git")),
        });
        assert_eq!(project.backend_id.as_deref(), Some("4b0ea68d"));
        assert_eq!(project.vcs, Some(serde_json::json!("git")));
    }

    #[test]
    fn test_session_from_info_uses_backend_timestamp() {
        let id = ProjectId::from_path(Path::new("/work/coven"));
        let session = Session::from_info(
            &id,
            SessionInfo {
                id: "ses_1".to_string(),
                title: "Fix flaky test".to_string(),
                directory: None,
                time: SessionTime {
                    created: Some(1_700_000_000_000),
                },
            },
        );
        assert_eq!(session.project, id);
        assert_eq!(session.created_at.timestamp(), 1_700_000_000);
    }
}
