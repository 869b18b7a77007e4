// ABOUTME: Configuration loading and validation for coven-conductor.
// ABOUTME: TOML file with environment variable expansion, backend and tool server sections.

use crate::error::{ConductorError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Placeholder replaced with the leased port in tool server args and url.
pub const PORT_PLACEHOLDER: &str = "{port}";
/// Placeholder replaced with the project directory in tool server args.
pub const DIRECTORY_PLACEHOLDER: &str = "{directory}";

/// Top-level configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    pub tool_server: ToolServerConfig,
}

/// Agent backend connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the agent backend (e.g., "http://127.0.0.1:4096").
    pub url: String,
    /// Timeout for forwarded requests; prompts can run for minutes.
    pub request_timeout_secs: u64,
    /// Timeout for the liveness probe sent on connect.
    pub probe_timeout_secs: u64,
    /// Connect on startup.
    pub auto_connect: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:4096".to_string(),
            request_timeout_secs: 300,
            probe_timeout_secs: 5,
            auto_connect: true,
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Per-project tool server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolServerConfig {
    /// Program to launch for each project.
    pub command: String,
    /// Arguments; `{port}` and `{directory}` are substituted.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for the process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Entry key in the project configuration file. Stable per deployment.
    #[serde(default = "default_server_name")]
    pub name: String,
    /// Configuration file name, relative to the project directory.
    #[serde(default = "default_config_file")]
    pub config_file: String,
    /// Address advertised in the configuration file; `{port}` is substituted.
    #[serde(default = "default_url_template")]
    pub url: String,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    /// Upper bound on concurrently running tool servers.
    #[serde(default = "default_max_servers")]
    pub max_servers: u16,
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
    /// Time between the graceful stop signal and a forced kill.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
}

fn default_server_name() -> String {
    "coven-tools".to_string()
}

fn default_config_file() -> String {
    "opencode.json".to_string()
}

fn default_url_template() -> String {
    "http://127.0.0.1:{port}/mcp".to_string()
}

fn default_base_port() -> u16 {
    7400
}

fn default_max_servers() -> u16 {
    32
}

fn default_startup_timeout_secs() -> u64 {
    20
}

fn default_grace_period_secs() -> u64 {
    5
}

impl ToolServerConfig {
    /// Minimal config for a command, everything else defaulted.
    pub fn for_command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            name: default_server_name(),
            config_file: default_config_file(),
            url: default_url_template(),
            base_port: default_base_port(),
            max_servers: default_max_servers(),
            startup_timeout_secs: default_startup_timeout_secs(),
            grace_period_secs: default_grace_period_secs(),
        }
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Arguments with placeholders filled in for one project.
    pub fn render_args(&self, port: u16, directory: &Path) -> Vec<String> {
        let port = port.to_string();
        let directory = directory.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(PORT_PLACEHOLDER, &port)
                    .replace(DIRECTORY_PLACEHOLDER, &directory)
            })
            .collect()
    }

    /// Advertised server address for a port.
    pub fn render_url(&self, port: u16) -> String {
        self.url.replace(PORT_PLACEHOLDER, &port.to_string())
    }

    /// Path of the configuration file inside a project.
    pub fn config_path(&self, directory: &Path) -> PathBuf {
        directory.join(&self.config_file)
    }
}

impl Config {
    /// Load configuration from the specified path or default location.
    ///
    /// Default location: `~/.config/coven/conductor.toml`
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => Self::default_path()?,
        };

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            ConductorError::Config(format!("Failed to read config from {:?}: {}", path, e))
        })?;

        Self::parse(&contents)
    }

    /// Parse configuration text, expanding `${VAR}` references.
    pub fn parse(contents: &str) -> Result<Self> {
        let contents = shellexpand::env_with_context_no_errors(contents, |var: &str| {
            match std::env::var(var) {
                Ok(val) => Some(val),
                Err(_) => {
                    warn!(
                        variable = %var,
                        "Environment variable not defined, using empty string"
                    );
                    Some(String::new())
                }
            }
        });

        let config: Config = toml::from_str(&contents)
            .map_err(|e| ConductorError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Default config file path.
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|d| d.join("coven").join("conductor.toml"))
            .ok_or_else(|| ConductorError::Config("Could not determine config path".into()))
    }

    /// Validate that required fields are present and consistent.
    pub fn validate(&self) -> Result<()> {
        if self.backend.url.trim().is_empty() {
            return Err(ConductorError::Config("backend.url is required".into()));
        }
        url::Url::parse(self.backend.url.trim()).map_err(|e| {
            ConductorError::Config(format!("backend.url is not a valid URL: {}", e))
        })?;

        let tools = &self.tool_server;
        if tools.command.trim().is_empty() {
            return Err(ConductorError::Config(
                "tool_server.command is required".into(),
            ));
        }
        if tools.name.trim().is_empty() {
            return Err(ConductorError::Config(
                "tool_server.name must not be empty".into(),
            ));
        }
        if tools.config_file.trim().is_empty() {
            return Err(ConductorError::Config(
                "tool_server.config_file must not be empty".into(),
            ));
        }
        if !tools.url.contains(PORT_PLACEHOLDER) {
            return Err(ConductorError::Config(format!(
                "tool_server.url must contain {}",
                PORT_PLACEHOLDER
            )));
        }
        if tools.max_servers == 0 {
            return Err(ConductorError::Config(
                "tool_server.max_servers must be at least 1".into(),
            ));
        }
        let last_port = u32::from(tools.base_port) + u32::from(tools.max_servers) - 1;
        if tools.base_port == 0 || last_port > u32::from(u16::MAX) {
            return Err(ConductorError::Config(format!(
                "tool_server port range {}..={} is outside 1..=65535",
                tools.base_port, last_port
            )));
        }
        Ok(())
    }
}
