//! External tool session gateway.
//!
//! Opens one aggregated session across the resolved tool servers under a
//! wall-clock timeout, extracts and annotates the enabled tools, and hands
//! them out as a [`ToolLease`]. Every failure (timeout, connection error,
//! protocol error, empty server set) resolves to the caller's default tools,
//! unmodified. Nothing in this module returns an error to the controller.
//!
//! Sessions are scoped to a single step: the lease owns the session and
//! [`ToolLease::release`] closes it. Sessions are never cached.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{GatewayConfig, ToolServerConfig};
use crate::error::GatewayError;
use crate::recommend::{Recommendations, usage_hint};
use crate::resolution::ResolvedServers;
use crate::tools::{AgentTool, ToolDescriptor};
use crate::types::AgentRole;

/// How a connector should try to establish sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStrategy {
    /// The regular transport setup.
    Primary,
    /// Fallback setup used once when the primary one is unsupported in the
    /// current process.
    Alternate,
}

/// A live, aggregated session over one or more tool servers.
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Every tool exposed by every server in the session.
    fn tools(&self) -> Vec<AgentTool>;

    /// Release all resources held by the session.
    async fn close(self: Box<Self>);
}

/// Opens tool sessions.
///
/// Implementations must release anything partially opened both when they
/// return an error and when the returned future is dropped before completion.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(
        &self,
        servers: &[ToolServerConfig],
        strategy: ConnectStrategy,
    ) -> Result<Box<dyn ToolSession>, GatewayError>;
}

/// Result of a bounded session acquisition.
pub enum SessionOutcome {
    Connected(Box<dyn ToolSession>),
    TimedOut,
    Failed(GatewayError),
}

impl fmt::Debug for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOutcome::Connected(_) => f.write_str("Connected"),
            SessionOutcome::TimedOut => f.write_str("TimedOut"),
            SessionOutcome::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
        }
    }
}

/// Why a lease carries only the default tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    NoServers,
    TimedOut,
    Failed(GatewayError),
}

/// Where a lease's tools came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseSource {
    External { servers: Vec<String>, attached: usize },
    Fallback(FallbackReason),
}

/// The tool set for one step, plus the session backing it.
pub struct ToolLease {
    tools: Vec<AgentTool>,
    session: Option<Box<dyn ToolSession>>,
    source: LeaseSource,
}

impl ToolLease {
    fn fallback(defaults: &[AgentTool], reason: FallbackReason) -> Self {
        Self {
            tools: defaults.to_vec(),
            session: None,
            source: LeaseSource::Fallback(reason),
        }
    }

    pub fn tools(&self) -> &[AgentTool] {
        &self.tools
    }

    pub fn source(&self) -> &LeaseSource {
        &self.source
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.source, LeaseSource::Fallback(_))
    }

    /// Close the backing session, if any. The tools must not be used afterwards.
    pub async fn release(self) {
        if let Some(session) = self.session {
            session.close().await;
            debug!("Tool session released");
        }
    }
}

impl fmt::Debug for ToolLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolLease")
            .field("tools", &self.tools.iter().map(AgentTool::name).collect::<Vec<_>>())
            .field("source", &self.source)
            .field("session_open", &self.session.is_some())
            .finish()
    }
}

/// Step context used to annotate attached tools.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub role: AgentRole,
    pub step_title: &'a str,
    pub recommendations: &'a Recommendations,
}

/// Timeout-guarded access to external tool servers.
#[derive(Clone)]
pub struct Gateway {
    connector: Arc<dyn SessionConnector>,
    step_timeout: Duration,
    discovery_timeout: Duration,
}

impl Gateway {
    pub fn new(connector: Arc<dyn SessionConnector>, config: &GatewayConfig) -> Self {
        Self {
            connector,
            step_timeout: config.step_connect_timeout(),
            discovery_timeout: config.discovery_timeout(),
        }
    }

    pub fn step_timeout(&self) -> Duration {
        self.step_timeout
    }

    /// Open a session within `limit`. The alternate strategy is tried only
    /// when the primary one is unsupported, and only in the time left.
    pub async fn open(&self, servers: &[ToolServerConfig], limit: Duration) -> SessionOutcome {
        let deadline = Instant::now() + limit;
        match self.attempt(servers, ConnectStrategy::Primary, deadline).await {
            SessionOutcome::Failed(GatewayError::Unsupported { message }) => {
                warn!(
                    error = %message,
                    "Primary session setup unsupported, trying alternate strategy"
                );
                self.attempt(servers, ConnectStrategy::Alternate, deadline).await
            }
            outcome => outcome,
        }
    }

    async fn attempt(
        &self,
        servers: &[ToolServerConfig],
        strategy: ConnectStrategy,
        deadline: Instant,
    ) -> SessionOutcome {
        // Dropping the connect future on timeout releases partial sessions.
        match tokio::time::timeout_at(deadline, self.connector.connect(servers, strategy)).await {
            Ok(Ok(session)) => SessionOutcome::Connected(session),
            Ok(Err(e)) => SessionOutcome::Failed(e),
            Err(_) => SessionOutcome::TimedOut,
        }
    }

    /// Acquire tools for one step.
    ///
    /// Returns `defaults` extended with the attached external tools, or
    /// `defaults` untouched when anything goes wrong.
    pub async fn acquire(
        &self,
        resolved: &ResolvedServers,
        defaults: &[AgentTool],
        ctx: StepContext<'_>,
    ) -> ToolLease {
        if resolved.is_empty() {
            info!(role = %ctx.role, "Using default tools (no tool servers resolved)");
            return ToolLease::fallback(defaults, FallbackReason::NoServers);
        }

        let names = resolved.server_names();
        info!(role = %ctx.role, servers = ?names, "Connecting to tool servers");

        let session = match self.open(&resolved.servers, self.step_timeout).await {
            SessionOutcome::Connected(session) => session,
            SessionOutcome::TimedOut => {
                warn!(
                    role = %ctx.role,
                    timeout_secs = self.step_timeout.as_secs(),
                    "Tool server connection timed out, falling back to default tools"
                );
                return ToolLease::fallback(defaults, FallbackReason::TimedOut);
            }
            SessionOutcome::Failed(e) => {
                warn!(
                    role = %ctx.role,
                    error = %e,
                    "Failed to start tool servers, falling back to default tools"
                );
                return ToolLease::fallback(defaults, FallbackReason::Failed(e));
            }
        };

        let external = annotate_tools(session.tools(), resolved, ctx);
        let attached = external.len();
        if attached > 0 {
            info!(
                role = %ctx.role,
                tools = ?external.iter().map(AgentTool::name).collect::<Vec<_>>(),
                "Attached external tools"
            );
        }

        let mut tools = defaults.to_vec();
        tools.extend(external);
        ToolLease {
            tools,
            session: Some(session),
            source: LeaseSource::External {
                servers: names.into_iter().map(String::from).collect(),
                attached,
            },
        }
    }

    /// List a single server's tools without keeping the session open.
    ///
    /// Bounded by the discovery timeout. Runtime failures yield an empty list.
    pub async fn discover(&self, server: &ToolServerConfig) -> Vec<ToolDescriptor> {
        let session = match self.open(std::slice::from_ref(server), self.discovery_timeout).await {
            SessionOutcome::Connected(session) => session,
            SessionOutcome::TimedOut => {
                warn!(
                    server = %server.name,
                    timeout_secs = self.discovery_timeout.as_secs(),
                    "Tool discovery timed out"
                );
                return Vec::new();
            }
            SessionOutcome::Failed(e) => {
                warn!(server = %server.name, error = %e, "Tool discovery failed");
                return Vec::new();
            }
        };

        let tools = session
            .tools()
            .iter()
            .map(|t| ToolDescriptor {
                server: server.name.clone(),
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema().clone(),
            })
            .collect();
        session.close().await;
        tools
    }
}

/// Keep only enabled tools, tag them with their server and add a usage hint.
fn annotate_tools(
    listed: Vec<AgentTool>,
    resolved: &ResolvedServers,
    ctx: StepContext<'_>,
) -> Vec<AgentTool> {
    listed
        .iter()
        .filter_map(|tool| {
            let owner = resolved.owner_of(tool.name())?;
            let tagged = tool.with_provenance(owner);
            Some(
                match usage_hint(tool.name(), ctx.step_title, ctx.recommendations) {
                    Some(hint) => {
                        let description = format!("{}\n{}", tagged.description(), hint);
                        tagged.with_description(description)
                    }
                    None => tagged,
                },
            )
        })
        .collect()
}
