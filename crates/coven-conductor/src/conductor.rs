// ABOUTME: Conductor facade - the single entry point collaborators drive.
// ABOUTME: Wires connection, port pool, tool server supervisor, registry, and sessions together.

use crate::config::Config;
use crate::connection::{
    AgentTransport, Attachment, ConnectOutcome, ConnectionManager, HttpTransport,
};
use crate::error::Result;
use crate::projects::{ProjectRegistry, ProjectState};
use crate::sessions::SessionManager;
use crate::toolserver::{ProcessLauncher, ServerLauncher, ToolServerSupervisor};
use crate::types::{Project, Session};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Orchestrates one backend connection across many projects.
pub struct Conductor {
    config: Config,
    connection: Arc<ConnectionManager>,
    servers: Arc<ToolServerSupervisor>,
    projects: Arc<ProjectRegistry>,
    sessions: SessionManager,
}

impl Conductor {
    /// Build a conductor that talks HTTP and spawns real tool server processes.
    pub fn new(config: Config) -> Result<Self> {
        let transport = HttpTransport::new(
            config.backend.request_timeout(),
            config.backend.probe_timeout(),
        )?;
        Self::with_parts(config, Arc::new(transport), Arc::new(ProcessLauncher::new()))
    }

    /// Build a conductor over caller-supplied transport and launcher.
    pub fn with_parts(
        config: Config,
        transport: Arc<dyn AgentTransport>,
        launcher: Arc<dyn ServerLauncher>,
    ) -> Result<Self> {
        config.validate()?;

        let connection = Arc::new(ConnectionManager::new(transport));
        let servers = Arc::new(ToolServerSupervisor::new(
            config.tool_server.clone(),
            launcher,
        )?);
        let projects = Arc::new(ProjectRegistry::new(
            Arc::clone(&connection),
            Arc::clone(&servers),
        ));
        let sessions = SessionManager::new(Arc::clone(&connection), Arc::clone(&projects));

        Ok(Self {
            config,
            connection,
            servers,
            projects,
            sessions,
        })
    }

    /// Connect to the configured backend.
    pub async fn connect(&self) -> Result<ConnectOutcome> {
        self.connection.connect(&self.config.backend.url).await
    }

    pub async fn switch_project(&self, path: &Path) -> Result<Project> {
        self.projects.switch_to(path).await
    }

    pub async fn current_project(&self) -> Result<Project> {
        self.projects.current().await
    }

    /// Create a session in the current project.
    pub async fn create_session(&self, title: Option<&str>) -> Result<Session> {
        let project = self.projects.current().await?;
        self.sessions.create_session(&project.id, title).await
    }

    pub async fn prompt(
        &self,
        text: &str,
        session_id: Option<&str>,
        attachments: &[Attachment],
    ) -> Result<String> {
        self.sessions.prompt(text, session_id, attachments).await
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        self.sessions.list_sessions().await
    }

    /// Close a project that is not current, stopping its tool server.
    pub async fn close_project(&self, path: &Path) -> Result<()> {
        // Closing only fails up front for the current or an unknown project,
        // so the pointer can go before the teardown is awaited.
        if self.projects.state_of(path).await == ProjectState::Registered {
            self.sessions
                .forget_project(&self.projects.id_for(path))
                .await;
        }
        self.projects.close(path).await
    }

    /// Stop every tool server, clear all pointers, and disconnect.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down conductor");
        let result = self.projects.shutdown().await;
        self.sessions.clear().await;
        self.connection.disconnect().await;
        result
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn projects(&self) -> &ProjectRegistry {
        &self.projects
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn servers(&self) -> &ToolServerSupervisor {
        &self.servers
    }
}
