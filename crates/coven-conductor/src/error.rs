// ABOUTME: Error types for coven-conductor.
// ABOUTME: Closed ConductorError taxonomy, each variant tagged with the Stage that failed.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The orchestration step an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Establishing or re-establishing the backend connection.
    Connect,
    /// A request forwarded to the agent backend.
    BackendCall,
    /// Leasing a port from the pool.
    Lease,
    /// Spawning a tool server process.
    Start,
    /// Writing or reverting a project configuration file.
    ConfigWrite,
    /// Stopping a tool server process.
    Stop,
    /// Project registry bookkeeping.
    Registry,
    /// Session pointer resolution.
    Session,
    /// Loading or validating configuration.
    Config,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Connect => "connect",
            Stage::BackendCall => "backend-call",
            Stage::Lease => "lease",
            Stage::Start => "start",
            Stage::ConfigWrite => "config-write",
            Stage::Stop => "stop",
            Stage::Registry => "registry",
            Stage::Session => "session",
            Stage::Config => "config",
        };
        f.write_str(name)
    }
}

/// Error types for the orchestration core.
#[derive(Error, Debug)]
pub enum ConductorError {
    /// No backend connection exists.
    #[error("not connected to the agent backend")]
    NotConnected,

    /// `reconnect` was called before any successful connect.
    #[error("no previous backend connection to reconnect to")]
    NoPriorConnection,

    /// The backend could not be reached.
    #[error("connection to {address} failed: {reason}")]
    Connection { address: String, reason: String },

    /// The backend reported a failure for a request.
    #[error("backend error: {message}")]
    Backend {
        status: Option<u16>,
        message: String,
    },

    #[error("no current project")]
    NoCurrentProject,

    /// Closing the current project is refused; callers switch away first.
    #[error("project {} is current, switch to another project before closing it", .0.display())]
    ProjectIsCurrent(PathBuf),

    #[error("project {} is not registered", .0.display())]
    UnknownProject(PathBuf),

    #[error("invalid project path {}: {reason}", path.display())]
    InvalidProjectPath { path: PathBuf, reason: String },

    /// A project switch failed; the previous project is still current.
    #[error("switch to {} failed: {source}", path.display())]
    Switch {
        path: PathBuf,
        #[source]
        source: Box<ConductorError>,
    },

    /// A tool server could not be brought up. The leased port was released.
    #[error("tool server for {project} failed at {stage}: {reason}")]
    ServerStart {
        project: String,
        stage: Stage,
        reason: String,
    },

    /// A tool server did not stop cleanly. Its port was released anyway.
    #[error("tool server for {project} did not stop cleanly: {reason}")]
    ServerStop { project: String, reason: String },

    #[error("port pool exhausted: all {count} ports from {base} are leased")]
    PoolExhausted { base: u16, count: u16 },

    #[error("no active session")]
    NoActiveSession,

    /// Failures collected while tearing down several tool servers.
    #[error("{} tool server(s) failed to tear down", .0.len())]
    Teardown(Vec<ConductorError>),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ConductorError {
    /// The stage that failed, for caller-side diagnostics.
    pub fn stage(&self) -> Stage {
        match self {
            ConductorError::NotConnected | ConductorError::Backend { .. } => Stage::BackendCall,
            ConductorError::NoPriorConnection | ConductorError::Connection { .. } => Stage::Connect,
            ConductorError::NoCurrentProject
            | ConductorError::ProjectIsCurrent(_)
            | ConductorError::UnknownProject(_)
            | ConductorError::InvalidProjectPath { .. } => Stage::Registry,
            ConductorError::Switch { source, .. } => source.stage(),
            ConductorError::ServerStart { stage, .. } => *stage,
            ConductorError::ServerStop { .. } | ConductorError::Teardown(_) => Stage::Stop,
            ConductorError::PoolExhausted { .. } => Stage::Lease,
            ConductorError::NoActiveSession => Stage::Session,
            ConductorError::Config(_) => Stage::Config,
        }
    }

    /// Unwraps `Switch` to the failure underneath it.
    pub fn root(&self) -> &ConductorError {
        match self {
            ConductorError::Switch { source, .. } => source.root(),
            other => other,
        }
    }

    pub(crate) fn backend(message: impl Into<String>) -> Self {
        ConductorError::Backend {
            status: None,
            message: message.into(),
        }
    }
}

/// Result type alias using ConductorError.
pub type Result<T> = std::result::Result<T, ConductorError>;
