//! Configuration loading and validation
//!
//! Configuration is a single YAML file with a `servers` map (keyed by the
//! host-side server name) and a `chat` section for the model provider and
//! conversation settings. Each server entry names its transport kind and the
//! parameters that kind requires; validation rejects malformed entries before
//! any connect is attempted.
//!
//! ```yaml
//! servers:
//!   music:
//!     transport: pipe
//!     command: python3
//!     args: ["servers/music_server.py"]
//!   colors:
//!     transport: http
//!     url: "http://localhost:8123/rpc"
//! chat:
//!   model: claude-3-5-haiku-latest
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, ToolbusError};

/// Default per-request transport timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connected servers, keyed by host-side name. A BTreeMap keeps connect
    /// order and log output deterministic.
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
    /// Provider and conversation settings.
    #[serde(default)]
    pub chat: ChatSettings,
}

/// How to reach one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Child process over stdin/stdout pipes.
    Pipe,
    /// JSON-RPC POSTs against a fixed endpoint.
    Http,
    /// Long-lived TCP connection.
    Stream,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Pipe => write!(f, "pipe"),
            TransportKind::Http => write!(f, "http"),
            TransportKind::Stream => write!(f, "stream"),
        }
    }
}

/// One server entry from the `servers` map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Which transport to use for this server.
    pub transport: TransportKind,
    /// Executable to spawn (pipe only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Arguments for the spawned executable (pipe only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Environment for the spawned executable (pipe only). The parent
    /// environment is not inherited.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    /// Working directory for the spawned executable (pipe only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Endpoint URL (http only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<Url>,
    /// `host:port` address (stream only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Per-request timeout override in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Provider and conversation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSettings {
    /// Anthropic model identifier.
    #[serde(default = "default_model")]
    pub model: String,
    /// Token budget per model call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// API key; falls back to the `ANTHROPIC_API_KEY` environment variable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// How many transcript entries the provider sees per call.
    #[serde(default = "default_max_history_messages")]
    pub max_history_messages: usize,
    /// Tool results longer than this many characters are truncated before
    /// entering the transcript.
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,
    /// How many model round-trips a single user turn may take.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// Where finished conversations are appended as JSON.
    #[serde(default = "default_history_file")]
    pub history_file: PathBuf,
}

fn default_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_max_history_messages() -> usize {
    40
}

fn default_max_result_chars() -> usize {
    4000
}

fn default_max_turns() -> usize {
    10
}

fn default_history_file() -> PathBuf {
    PathBuf::from("conversations.json")
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            api_key: None,
            max_history_messages: default_max_history_messages(),
            max_result_chars: default_max_result_chars(),
            max_turns: default_max_turns(),
            history_file: default_history_file(),
        }
    }
}

impl ChatSettings {
    /// Resolve the API key: config first, then `ANTHROPIC_API_KEY`.
    pub fn resolve_api_key(&self) -> Result<String> {
        if let Some(key) = &self.api_key {
            return Ok(key.clone());
        }
        std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
            ToolbusError::Config(
                "no API key: set chat.api_key or the ANTHROPIC_API_KEY environment variable"
                    .to_string(),
            )
            .into()
        })
    }
}

/// Everything a session needs to connect to one server, resolved from config.
#[derive(Debug, Clone)]
pub struct ServerDescriptor {
    /// Host-side server name (the key in the `servers` map).
    pub name: String,
    /// Which transport to build.
    pub transport: TransportKind,
    /// Executable to spawn (pipe).
    pub command: Option<String>,
    /// Arguments for the executable (pipe).
    pub args: Vec<String>,
    /// Child environment (pipe).
    pub env: HashMap<String, String>,
    /// Child working directory (pipe).
    pub working_dir: Option<PathBuf>,
    /// Endpoint URL (http).
    pub url: Option<Url>,
    /// `host:port` address (stream).
    pub address: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ToolbusError::Config(format!("failed to read config file '{path}': {e}"))
        })?;
        let config: Config = serde_yaml::from_str(&contents)
            .map_err(|e| ToolbusError::Config(format!("failed to parse '{path}': {e}")))?;
        Ok(config)
    }

    /// Check every server entry against its transport kind's requirements.
    ///
    /// # Errors
    ///
    /// Returns [`ToolbusError::MalformedDescriptor`] naming the first
    /// offending server.
    pub fn validate(&self) -> Result<()> {
        for (name, server) in &self.servers {
            let malformed = |message: &str| ToolbusError::MalformedDescriptor {
                server: name.clone(),
                message: message.to_string(),
            };
            match server.transport {
                TransportKind::Pipe => {
                    if server.command.as_deref().unwrap_or("").is_empty() {
                        return Err(malformed("pipe transport requires a command").into());
                    }
                }
                TransportKind::Http => {
                    if server.url.is_none() {
                        return Err(malformed("http transport requires a url").into());
                    }
                }
                TransportKind::Stream => {
                    if server.address.as_deref().unwrap_or("").is_empty() {
                        return Err(malformed("stream transport requires an address").into());
                    }
                }
            }
            if server.timeout_secs == Some(0) {
                return Err(malformed("timeout_secs must be positive").into());
            }
        }
        Ok(())
    }

    /// Resolve the `servers` map into connect-ready descriptors, in name
    /// order. Call [`Config::validate`] first.
    pub fn descriptors(&self) -> Vec<ServerDescriptor> {
        self.servers
            .iter()
            .map(|(name, server)| ServerDescriptor {
                name: name.clone(),
                transport: server.transport,
                command: server.command.clone(),
                args: server.args.clone(),
                env: server.env.clone(),
                working_dir: server.working_dir.clone(),
                url: server.url.clone(),
                address: server.address.clone(),
                timeout: Duration::from_secs(server.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            })
            .collect()
    }
}
