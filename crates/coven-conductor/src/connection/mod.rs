// ABOUTME: Owns the single process-wide connection to the agent backend.
// ABOUTME: Connect/disconnect/reconnect are serialized; dispatch runs concurrently.

mod http;
mod request;

pub use http::HttpTransport;
pub use request::{
    collect_text, prompt_parts, Attachment, BackendRequest, ProjectInfo, PromptPart, SessionInfo,
    SessionTime,
};

use crate::error::{ConductorError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Why a liveness probe did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    /// Nothing answered at the address.
    Unreachable(String),
    /// Something answered but refused the probe, e.g. a backend still starting.
    Rejected(String),
}

/// Wire-level access to an agent backend.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Liveness probe against `address`.
    async fn probe(&self, address: &str) -> std::result::Result<(), ProbeFailure>;

    /// Forward a request and return the backend's JSON response.
    ///
    /// Failures are reported as `ConductorError::Backend`.
    async fn send(&self, address: &str, request: &BackendRequest) -> Result<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Result of a connect call that did not hard-fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    /// Already connected to the same address; nothing was done.
    AlreadyConnected,
    /// The backend answered but rejected the probe. The connection is kept.
    ProbeRejected { reason: String },
}

impl ConnectOutcome {
    /// True when the caller should surface a warning.
    pub fn is_degraded(&self) -> bool {
        matches!(self, ConnectOutcome::ProbeRejected { .. })
    }
}

#[derive(Debug, Clone)]
struct AgentConnection {
    address: String,
    state: ConnectionState,
}

#[derive(Debug, Default)]
struct ConnectionSlot {
    connection: Option<AgentConnection>,
    last_address: Option<String>,
}

/// The shared connection to the agent backend.
pub struct ConnectionManager {
    transport: Arc<dyn AgentTransport>,
    slot: RwLock<ConnectionSlot>,
    lifecycle: Mutex<()>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn AgentTransport>) -> Self {
        Self {
            transport,
            slot: RwLock::new(ConnectionSlot::default()),
            lifecycle: Mutex::new(()),
        }
    }

    /// Connect to `address`. A no-op if already connected there.
    ///
    /// An existing connection elsewhere is only replaced once `address` answers.
    pub async fn connect(&self, address: &str) -> Result<ConnectOutcome> {
        let _guard = self.lifecycle.lock().await;
        self.connect_locked(&normalize_address(address)).await
    }

    /// Drop the connection. Safe to call when disconnected.
    pub async fn disconnect(&self) {
        let _guard = self.lifecycle.lock().await;
        if let Some(connection) = self.write().connection.take() {
            info!(address = %connection.address, "Disconnected from agent backend");
        }
    }

    /// Disconnect and connect again to the last address that worked.
    pub async fn reconnect(&self) -> Result<ConnectOutcome> {
        let _guard = self.lifecycle.lock().await;
        let address = {
            let mut slot = self.write();
            let address = slot
                .last_address
                .clone()
                .ok_or(ConductorError::NoPriorConnection)?;
            slot.connection = None;
            address
        };
        info!(address = %address, "Reconnecting to agent backend");
        self.connect_locked(&address).await
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.read()
            .connection
            .as_ref()
            .map(|c| c.state)
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Address of the live connection, if any.
    pub fn address(&self) -> Option<String> {
        self.read().connection.as_ref().map(|c| c.address.clone())
    }

    /// Last address a connect succeeded against.
    pub fn last_address(&self) -> Option<String> {
        self.read().last_address.clone()
    }

    /// Forward a request to the backend.
    pub async fn dispatch(&self, request: BackendRequest) -> Result<Value> {
        let address = self.connected_address()?;
        debug!(
            request = request.name(),
            directory = ?request.directory(),
            "Dispatching backend request"
        );
        let result = self.transport.send(&address, &request).await;
        if let Err(ref e) = result {
            debug!(request = request.name(), error = %e, "Backend request failed");
        }
        result
    }

    async fn connect_locked(&self, address: &str) -> Result<ConnectOutcome> {
        {
            let mut slot = self.write();
            let connected = slot
                .connection
                .as_ref()
                .filter(|c| c.state == ConnectionState::Connected);
            match connected {
                Some(connection) if connection.address == address => {
                    return Ok(ConnectOutcome::AlreadyConnected);
                }
                // A working connection stays in place until the new address answers.
                Some(_) => {}
                None => {
                    slot.connection = Some(AgentConnection {
                        address: address.to_string(),
                        state: ConnectionState::Connecting,
                    });
                }
            }
        }

        let probe = self.transport.probe(address).await;

        let mut slot = self.write();
        match probe {
            Ok(()) => {
                slot.connection = Some(AgentConnection {
                    address: address.to_string(),
                    state: ConnectionState::Connected,
                });
                slot.last_address = Some(address.to_string());
                info!(address = %address, "Connected to agent backend");
                Ok(ConnectOutcome::Connected)
            }
            Err(ProbeFailure::Rejected(reason)) => {
                slot.connection = Some(AgentConnection {
                    address: address.to_string(),
                    state: ConnectionState::Connected,
                });
                slot.last_address = Some(address.to_string());
                warn!(
                    address = %address,
                    reason = %reason,
                    "Agent backend rejected liveness probe, keeping connection"
                );
                Ok(ConnectOutcome::ProbeRejected { reason })
            }
            Err(ProbeFailure::Unreachable(reason)) => {
                match &slot.connection {
                    Some(previous) if previous.state == ConnectionState::Connected => {
                        warn!(
                            address = %address,
                            kept = %previous.address,
                            "Agent backend unreachable, keeping previous connection"
                        );
                    }
                    _ => slot.connection = None,
                }
                Err(ConductorError::Connection {
                    address: address.to_string(),
                    reason,
                })
            }
        }
    }

    fn connected_address(&self) -> Result<String> {
        match &self.read().connection {
            Some(c) if c.state == ConnectionState::Connected => Ok(c.address.clone()),
            _ => Err(ConductorError::NotConnected),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ConnectionSlot> {
        self.slot.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ConnectionSlot> {
        self.slot.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn normalize_address(address: &str) -> String {
    address.trim().trim_end_matches('/').to_string()
}
