// ABOUTME: coven-conductor - one agent backend connection shared across many projects.
// ABOUTME: Each project gets its own sessions and a supervised tool server on a leased port.

pub mod conductor;
pub mod config;
pub mod connection;
pub mod error;
pub mod ports;
pub mod projects;
pub mod sessions;
pub mod toolserver;
pub mod types;

pub use conductor::Conductor;
pub use config::{BackendConfig, Config, ToolServerConfig};
pub use connection::{
    AgentTransport, Attachment, BackendRequest, ConnectOutcome, ConnectionManager,
    ConnectionState, HttpTransport, ProbeFailure,
};
pub use error::{ConductorError, Result, Stage};
pub use ports::PortPool;
pub use projects::{ProjectRegistry, ProjectState};
pub use sessions::SessionManager;
pub use toolserver::{
    LaunchSpec, ProcessLauncher, ServerLauncher, ServerProcess, ServerState, StopOutcome,
    ToolServerInfo, ToolServerSupervisor,
};
pub use types::{Project, ProjectId, Session};
