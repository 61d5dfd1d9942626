//! Configuration system for ResearchNexus.
//!
//! Uses `figment` for layered configuration: defaults -> config file ->
//! environment -> explicit overrides. Configuration is loaded from
//! `~/.config/nexus/config.toml` and/or `.nexus/config.toml` in the workspace.
//!
//! Raw configuration is deliberately permissive. [`NexusConfig::validate`]
//! turns it into typed values once, at load time: invalid recursion limits
//! are replaced by the default and tool servers missing a transport
//! parameter are dropped, both with a warning.

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::types::AgentRole;

/// Default worker recursion / tool-call budget.
pub const DEFAULT_RECURSION_LIMIT: usize = 25;

/// Environment variable that overrides the worker recursion budget.
pub const RECURSION_LIMIT_ENV: &str = "AGENT_RECURSION_LIMIT";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NexusConfig {
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub mcp: McpSettings,
}

/// How the planner invokes the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerMode {
    /// Collect the response from a stream of chunks.
    #[default]
    Streaming,
    /// Single-shot completion.
    Structured,
}

/// Caller-facing workflow switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub max_plan_iterations: u32,
    pub max_step_num: usize,
    pub max_search_results: usize,
    pub auto_accepted_plan: bool,
    pub enable_background_investigation: bool,
    pub use_enhanced_reporter: bool,
    pub planner_mode: PlannerMode,
    /// Raw recursion-limit override. Validated by [`RecursionLimit::from_raw`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recursion_limit: Option<RawLimit>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_plan_iterations: 1,
            max_step_num: 3,
            max_search_results: 3,
            auto_accepted_plan: false,
            enable_background_investigation: true,
            use_enhanced_reporter: false,
            planner_mode: PlannerMode::Streaming,
            recursion_limit: None,
        }
    }
}

/// Timeouts for external tool sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Wall-clock bound on opening a session during step execution.
    pub step_connect_timeout_secs: u64,
    /// Wall-clock bound on one-shot tool discovery outside step execution.
    pub discovery_timeout_secs: u64,
    /// Per-message read bound during discovery handshakes.
    pub protocol_read_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            step_connect_timeout_secs: 30,
            discovery_timeout_secs: 60,
            protocol_read_timeout_secs: 10,
        }
    }
}

impl GatewayConfig {
    pub fn step_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.step_connect_timeout_secs)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    pub fn protocol_read_timeout(&self) -> Duration {
        Duration::from_secs(self.protocol_read_timeout_secs)
    }
}

/// Declared tool servers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpSettings {
    #[serde(default)]
    pub servers: Vec<ToolServerDescriptor>,
}

/// A tool server exactly as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolServerDescriptor {
    pub name: String,
    pub transport: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub enabled_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_to_agents: Option<Vec<String>>,
}

/// How to reach a tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum ServerTransport {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    Sse {
        url: String,
    },
}

impl ServerTransport {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerTransport::Stdio { .. } => "stdio",
            ServerTransport::Sse { .. } => "sse",
        }
    }
}

/// A validated, read-only tool server declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub name: String,
    pub transport: ServerTransport,
    pub enabled_tools: BTreeSet<String>,
    /// Roles the server is explicitly bound to. `None` when the declaration
    /// has no (or an empty) `add_to_agents` list.
    pub agent_bindings: Option<BTreeSet<AgentRole>>,
}

impl ToolServerConfig {
    pub fn is_bound_to(&self, role: AgentRole) -> bool {
        self.agent_bindings
            .as_ref()
            .is_some_and(|roles| roles.contains(&role))
    }
}

impl ToolServerDescriptor {
    /// Check transport parameters and normalize bindings.
    pub fn validate(&self) -> Result<ToolServerConfig, ConfigError> {
        let missing = |param: &str| ConfigError::MissingTransportParam {
            server: self.name.clone(),
            transport: self.transport.clone(),
            param: param.to_string(),
        };

        let transport = match self.transport.trim().to_ascii_lowercase().as_str() {
            "stdio" => ServerTransport::Stdio {
                command: self
                    .command
                    .clone()
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| missing("command"))?,
                args: self.args.clone().unwrap_or_default(),
                env: self.env.clone().unwrap_or_default(),
            },
            "sse" => ServerTransport::Sse {
                url: self
                    .url
                    .clone()
                    .filter(|u| !u.trim().is_empty())
                    .ok_or_else(|| missing("url"))?,
            },
            other => {
                return Err(ConfigError::Invalid {
                    message: format!(
                        "Unsupported transport '{}' for tool server '{}'",
                        other, self.name
                    ),
                });
            }
        };

        let agent_bindings = self.add_to_agents.as_ref().and_then(|names| {
            let roles: BTreeSet<AgentRole> = names
                .iter()
                .filter_map(|n| {
                    let role = AgentRole::parse(n);
                    if role.is_none() {
                        debug!(server = %self.name, agent = %n, "Ignoring unknown agent binding");
                    }
                    role
                })
                .collect();
            if names.is_empty() { None } else { Some(roles) }
        });

        Ok(ToolServerConfig {
            name: self.name.clone(),
            transport,
            enabled_tools: self.enabled_tools.iter().cloned().collect(),
            agent_bindings,
        })
    }
}

/// A recursion-limit override exactly as configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawLimit {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl std::fmt::Display for RawLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawLimit::Integer(n) => write!(f, "{n}"),
            RawLimit::Float(x) => write!(f, "{x}"),
            RawLimit::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Validated worker recursion budget. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecursionLimit(usize);

impl Default for RecursionLimit {
    fn default() -> Self {
        Self(DEFAULT_RECURSION_LIMIT)
    }
}

impl RecursionLimit {
    pub fn get(&self) -> usize {
        self.0
    }

    /// Strict parse: positive integers only.
    pub fn parse(raw: &RawLimit) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidRecursionLimit {
            value: raw.to_string(),
        };
        let n = match raw {
            RawLimit::Integer(n) => *n,
            RawLimit::Text(s) => s.trim().parse::<i64>().map_err(|_| invalid())?,
            RawLimit::Float(_) => return Err(invalid()),
        };
        if n > 0 {
            usize::try_from(n).map(Self).map_err(|_| invalid())
        } else {
            Err(invalid())
        }
    }

    /// Lenient parse: an absent override yields the default, an invalid one
    /// yields the default with a warning. The bound can never be disabled.
    pub fn from_raw(raw: Option<&RawLimit>) -> Self {
        match raw {
            None => Self::default(),
            Some(raw) => match Self::parse(raw) {
                Ok(limit) => {
                    debug!(limit = limit.0, "Recursion limit set from override");
                    limit
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        default = DEFAULT_RECURSION_LIMIT,
                        "Rejecting recursion limit override, using default"
                    );
                    Self::default()
                }
            },
        }
    }
}

/// Configuration after load-time validation.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub workflow: WorkflowConfig,
    pub recursion_limit: RecursionLimit,
    pub gateway: GatewayConfig,
    pub servers: Vec<ToolServerConfig>,
}

impl NexusConfig {
    /// Validate raw configuration into typed values. Never fails: every
    /// problem is logged and replaced by a safe default.
    pub fn validate(&self) -> ValidatedConfig {
        let servers = self
            .mcp
            .servers
            .iter()
            .filter_map(|desc| match desc.validate() {
                Ok(server) => Some(server),
                Err(e) => {
                    warn!(server = %desc.name, error = %e, "Dropping tool server declaration");
                    None
                }
            })
            .collect();

        ValidatedConfig {
            workflow: self.workflow.clone(),
            recursion_limit: RecursionLimit::from_raw(self.workflow.recursion_limit.as_ref()),
            gateway: self.gateway.clone(),
            servers,
        }
    }
}

impl Default for ValidatedConfig {
    fn default() -> Self {
        NexusConfig::default().validate()
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. `AGENT_RECURSION_LIMIT` (mapped onto `workflow.recursion_limit`)
/// 3. Environment variables (prefixed with `NEXUS_`, `__` for nesting)
/// 4. Workspace-local tool servers (`.nexus/mcp.json`, shaped `{"mcp": {"servers": [...]}}`)
/// 5. Workspace-local config (`.nexus/config.toml`)
/// 6. User config (`~/.config/nexus/config.toml`)
/// 7. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&NexusConfig>,
) -> Result<NexusConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(NexusConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "nexus", "nexus") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".nexus").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
        let ws_servers = ws.join(".nexus").join("mcp.json");
        if ws_servers.exists() {
            figment = figment.merge(Json::file(&ws_servers));
        }
    }

    figment = figment.merge(Env::prefixed("NEXUS_").split("__"));
    figment = figment.merge(
        Env::raw()
            .only(&[RECURSION_LIMIT_ENV])
            .map(|_| "workflow.recursion_limit".into()),
    );

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Load configuration from a single explicit file (TOML or JSON by extension)
/// layered over defaults and the environment.
pub fn load_config_file(path: &Path) -> Result<NexusConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let mut figment = Figment::from(Serialized::defaults(NexusConfig::default()));
    figment = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => figment.merge(Json::file(path)),
        _ => figment.merge(Toml::file(path)),
    };
    figment = figment.merge(Env::prefixed("NEXUS_").split("__")).merge(
        Env::raw()
            .only(&[RECURSION_LIMIT_ENV])
            .map(|_| "workflow.recursion_limit".into()),
    );
    figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })
}

/// Check whether any configuration file exists (user-level or workspace-level).
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "nexus", "nexus") {
        if config_dir.config_dir().join("config.toml").exists() {
            return true;
        }
    }
    if let Some(ws) = workspace {
        if ws.join(".nexus").join("config.toml").exists() {
            return true;
        }
    }
    false
}
