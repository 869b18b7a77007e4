// ABOUTME: Session manager - per-project current session pointers and prompt dispatch.
// ABOUTME: Resolves which session a prompt targets and extracts the text of the reply.

use crate::connection::{
    collect_text, prompt_parts, Attachment, BackendRequest, ConnectionManager, SessionInfo,
};
use crate::error::{ConductorError, Result};
use crate::projects::ProjectRegistry;
use crate::types::{ProjectId, Session};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Tracks one current session per project.
pub struct SessionManager {
    connection: Arc<ConnectionManager>,
    projects: Arc<ProjectRegistry>,
    current: Mutex<HashMap<ProjectId, Session>>,
}

impl SessionManager {
    pub fn new(connection: Arc<ConnectionManager>, projects: Arc<ProjectRegistry>) -> Self {
        Self {
            connection,
            projects,
            current: Mutex::new(HashMap::new()),
        }
    }

    /// Create a session in a registered project and make it that project's current session.
    pub async fn create_session(&self, project: &ProjectId, title: Option<&str>) -> Result<Session> {
        let project = self
            .projects
            .get(project)
            .await
            .ok_or_else(|| ConductorError::UnknownProject(PathBuf::from(project.as_str())))?;

        let response = self
            .connection
            .dispatch(BackendRequest::CreateSession {
                directory: project.directory.clone(),
                title: title.map(str::to_string),
            })
            .await?;

        let session = Session::from_info(&project.id, parse_session(response)?);
        self.current
            .lock()
            .await
            .insert(project.id.clone(), session.clone());
        info!(project = %project.id, session = %session.id, "Created session");
        Ok(session)
    }

    /// Send a prompt and return the text of the reply.
    ///
    /// Targets `session_id` when given, otherwise the current project's
    /// current session. Fails with `NoActiveSession` before dispatching if
    /// neither exists.
    pub async fn prompt(
        &self,
        text: &str,
        session_id: Option<&str>,
        attachments: &[Attachment],
    ) -> Result<String> {
        let (session_id, directory) = self.resolve(session_id).await?;
        debug!(
            session = %session_id,
            attachments = attachments.len(),
            "Sending prompt"
        );

        let response = self
            .connection
            .dispatch(BackendRequest::SendPrompt {
                directory,
                session_id,
                parts: prompt_parts(text, attachments),
            })
            .await?;

        Ok(collect_text(&response))
    }

    /// Delete a session on the backend, clearing any pointer to it.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let directory = self.directory_for(session_id).await;
        self.connection
            .dispatch(BackendRequest::DeleteSession {
                directory,
                session_id: session_id.to_string(),
            })
            .await?;

        let mut current = self.current.lock().await;
        let before = current.len();
        current.retain(|_, session| session.id != session_id);
        if current.len() != before {
            info!(session = %session_id, "Deleted current session");
        } else {
            info!(session = %session_id, "Deleted session");
        }
        Ok(())
    }

    /// Sessions the backend holds for the current project.
    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        let project = self.projects.current().await?;
        let response = self
            .connection
            .dispatch(BackendRequest::ListSessions {
                directory: Some(project.directory.clone()),
            })
            .await?;

        let infos: Vec<SessionInfo> = serde_json::from_value(response)
            .map_err(|e| ConductorError::backend(format!("unexpected session list: {}", e)))?;
        let mut sessions: Vec<Session> = infos
            .into_iter()
            .map(|info| Session::from_info(&project.id, info))
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    /// Point the current project at an existing backend session.
    pub async fn select_session(&self, session_id: &str) -> Result<Session> {
        let project = self.projects.current().await?;
        let response = self
            .connection
            .dispatch(BackendRequest::GetSession {
                directory: Some(project.directory.clone()),
                session_id: session_id.to_string(),
            })
            .await?;

        let session = Session::from_info(&project.id, parse_session(response)?);
        self.current
            .lock()
            .await
            .insert(project.id.clone(), session.clone());
        info!(project = %project.id, session = %session.id, "Selected session");
        Ok(session)
    }

    /// The current project's current session, if any.
    pub async fn current_session(&self) -> Option<Session> {
        let project = self.projects.current_id().await?;
        self.current.lock().await.get(&project).cloned()
    }

    /// Abort whatever the session is working on.
    pub async fn abort(&self, session_id: Option<&str>) -> Result<()> {
        let (session_id, directory) = self.resolve(session_id).await?;
        self.connection
            .dispatch(BackendRequest::AbortSession {
                directory,
                session_id: session_id.clone(),
            })
            .await?;
        info!(session = %session_id, "Aborted session");
        Ok(())
    }

    /// Drop the pointer for a project that is no longer registered.
    pub async fn forget_project(&self, project: &ProjectId) {
        self.current.lock().await.remove(project);
    }

    pub async fn clear(&self) {
        self.current.lock().await.clear();
    }

    async fn resolve(&self, session_id: Option<&str>) -> Result<(String, Option<PathBuf>)> {
        if let Some(id) = session_id {
            return Ok((id.to_string(), self.directory_for(id).await));
        }

        let project = self
            .projects
            .current()
            .await
            .map_err(|_| ConductorError::NoActiveSession)?;
        let directory = Some(project.directory.clone());
        let current = self.current.lock().await;
        let session = current
            .get(&project.id)
            .ok_or(ConductorError::NoActiveSession)?;
        Ok((session.id.clone(), directory))
    }

    /// Directory of the project whose current session is `session_id`,
    /// else the current project's.
    async fn directory_for(&self, session_id: &str) -> Option<PathBuf> {
        let owner = self
            .current
            .lock()
            .await
            .iter()
            .find(|(_, session)| session.id == session_id)
            .map(|(project, _)| project.clone());
        if let Some(owner) = owner {
            if let Some(project) = self.projects.get(&owner).await {
                return Some(project.directory);
            }
        }
        self.projects.current().await.ok().map(|p| p.directory)
    }
}

fn parse_session(response: Value) -> Result<SessionInfo> {
    serde_json::from_value(response)
        .map_err(|e| ConductorError::backend(format!("unexpected session response: {}", e)))
}
