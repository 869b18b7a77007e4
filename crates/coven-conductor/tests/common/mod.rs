// ABOUTME: Test doubles for the integration suite.
// ABOUTME: Recording mock backend transport and an in-memory tool server launcher.

#![allow(dead_code)]

use async_trait::async_trait;
use coven_conductor::{
    AgentTransport, BackendConfig, BackendRequest, Conductor, ConductorError, Config, LaunchSpec,
    ProbeFailure, Result, ServerLauncher, ServerProcess, Stage, StopOutcome, ToolServerConfig,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Backend double that records every request.
pub struct MockTransport {
    requests: Mutex<Vec<BackendRequest>>,
    probe: Mutex<std::result::Result<(), ProbeFailure>>,
    reply: Mutex<Value>,
    sessions: Mutex<Vec<Value>>,
    next_session: AtomicUsize,
    fail_project_lookup: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            probe: Mutex::new(Ok(())),
            reply: Mutex::new(json!({
                "info": { "id": "msg_1", "role": "assistant" },
                "parts": [
                    { "type": "step-start" },
                    { "type": "text", "text": "first" },
                    { "type": "tool", "tool": "read", "state": { "status": "completed" } },
                    { "type": "text", "text": "second" },
                    { "type": "step-finish" }
                ]
            })),
            sessions: Mutex::new(Vec::new()),
            next_session: AtomicUsize::new(1),
            fail_project_lookup: AtomicBool::new(false),
        })
    }

    pub fn requests(&self) -> Vec<BackendRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.name() == name)
            .count()
    }

    pub fn set_probe(&self, probe: std::result::Result<(), ProbeFailure>) {
        *self.probe.lock().unwrap() = probe;
    }

    pub fn set_reply(&self, reply: Value) {
        *self.reply.lock().unwrap() = reply;
    }

    pub fn fail_project_lookup(&self, fail: bool) {
        self.fail_project_lookup.store(fail, Ordering::SeqCst);
    }

    fn not_found(session_id: &str) -> ConductorError {
        ConductorError::Backend {
            status: Some(404),
            message: format!("session {} not found", session_id),
        }
    }
}

#[async_trait]
impl AgentTransport for MockTransport {
    async fn probe(&self, _address: &str) -> std::result::Result<(), ProbeFailure> {
        self.probe.lock().unwrap().clone()
    }

    async fn send(&self, _address: &str, request: &BackendRequest) -> Result<Value> {
        self.requests.lock().unwrap().push(request.clone());

        match request {
            BackendRequest::CurrentProject { directory } => {
                if self.fail_project_lookup.load(Ordering::SeqCst) {
                    return Err(ConductorError::Backend {
                        status: Some(500),
                        message: "project lookup failed".to_string(),
                    });
                }
                Ok(json!({
                    "id": format!("prj_{}", directory.display()),
                    "worktree": directory.display().to_string(),
                    "vcs": "git"
                }))
            }
            BackendRequest::CreateSession { directory, title } => {
                let n = self.next_session.fetch_add(1, Ordering::SeqCst);
                let session = json!({
                    "id": format!("ses_{}", n),
                    "title": title.clone().unwrap_or_else(|| format!("Session {}", n)),
                    "directory": directory.display().to_string(),
                    "time": { "created": 1_700_000_000_000_i64 + n as i64 }
                });
                self.sessions.lock().unwrap().push(session.clone());
                Ok(session)
            }
            BackendRequest::ListSessions { .. } => {
                Ok(Value::Array(self.sessions.lock().unwrap().clone()))
            }
            BackendRequest::GetSession { session_id, .. } => self
                .sessions
                .lock()
                .unwrap()
                .iter()
                .find(|s| s["id"] == *session_id)
                .cloned()
                .ok_or_else(|| Self::not_found(session_id)),
            BackendRequest::SendPrompt { .. } => Ok(self.reply.lock().unwrap().clone()),
            BackendRequest::AbortSession { .. } => Ok(json!(true)),
            BackendRequest::DeleteSession { session_id, .. } => {
                let mut sessions = self.sessions.lock().unwrap();
                let before = sessions.len();
                sessions.retain(|s| s["id"] != *session_id);
                if sessions.len() == before {
                    Err(Self::not_found(session_id))
                } else {
                    Ok(json!(true))
                }
            }
        }
    }
}

/// Launcher double: no processes, just bookkeeping.
#[derive(Default)]
pub struct MockLauncher {
    launches: AtomicUsize,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
    start_delay_ms: AtomicU64,
    stop_delay_ms: Arc<AtomicU64>,
    running: Arc<Mutex<HashSet<u16>>>,
}

impl MockLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    /// Make every launch take this long.
    pub fn set_start_delay(&self, delay: Duration) {
        self.start_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make every stop take this long, including for already running processes.
    pub fn set_stop_delay(&self, delay: Duration) {
        self.stop_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Ports with a live fake process.
    pub fn running(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.running.lock().unwrap().iter().copied().collect();
        ports.sort_unstable();
        ports
    }
}

#[async_trait]
impl ServerLauncher for MockLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ServerProcess>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let delay = self.start_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(ConductorError::ServerStart {
                project: spec.project.to_string(),
                stage: Stage::Start,
                reason: "simulated start failure".to_string(),
            });
        }
        self.running.lock().unwrap().insert(spec.port);
        Ok(Box::new(MockProcess {
            port: spec.port,
            running: Arc::clone(&self.running),
            fail_stop: self.fail_stop.load(Ordering::SeqCst),
            stop_delay_ms: Arc::clone(&self.stop_delay_ms),
        }))
    }
}

struct MockProcess {
    port: u16,
    running: Arc<Mutex<HashSet<u16>>>,
    fail_stop: bool,
    stop_delay_ms: Arc<AtomicU64>,
}

/// Like a child spawned with kill-on-drop.
impl Drop for MockProcess {
    fn drop(&mut self) {
        self.running.lock().unwrap().remove(&self.port);
    }
}

#[async_trait]
impl ServerProcess for MockProcess {
    fn pid(&self) -> Option<u32> {
        Some(10_000 + u32::from(self.port))
    }

    fn has_exited(&mut self) -> bool {
        !self.running.lock().unwrap().contains(&self.port)
    }

    async fn stop(&mut self, _grace: Duration) -> std::io::Result<StopOutcome> {
        let delay = self.stop_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.running.lock().unwrap().remove(&self.port);
        if self.fail_stop {
            Err(std::io::Error::other("simulated stop failure"))
        } else {
            Ok(StopOutcome::Graceful)
        }
    }
}

pub fn test_config() -> Config {
    let mut tool_server = ToolServerConfig::for_command("coven-tools");
    tool_server.base_port = 7400;
    tool_server.max_servers = 4;
    Config {
        backend: BackendConfig::default(),
        tool_server,
    }
}

pub struct Harness {
    pub conductor: Conductor,
    pub transport: Arc<MockTransport>,
    pub launcher: Arc<MockLauncher>,
}

/// Conductor over mocks, not yet connected.
pub fn harness() -> Harness {
    harness_with(test_config())
}

pub fn harness_with(config: Config) -> Harness {
    let transport = MockTransport::new();
    let launcher = MockLauncher::new();
    let conductor = Conductor::with_parts(config, transport.clone(), launcher.clone())
        .expect("valid test config");
    Harness {
        conductor,
        transport,
        launcher,
    }
}

/// Conductor over mocks, connected.
pub async fn connected() -> Harness {
    let h = harness();
    h.conductor.connect().await.expect("mock connect");
    h
}
