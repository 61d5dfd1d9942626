//! Tool resolution: decide which configured tool servers to attach to a
//! worker for the current step.
//!
//! A server is included or excluded as a whole. Inclusion is decided from the
//! server's explicit agent bindings, its enabled tool names, and the step's
//! recommendations. Once recommendations exist, explicit bindings are also
//! filtered by relevance.

use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::config::ToolServerConfig;
use crate::recommend::{Category, Recommendations};
use crate::types::AgentRole;

/// Why a server was attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InclusionReason {
    /// Explicitly bound to the role and the step produced no recommendations.
    ExplicitBinding,
    /// Explicitly bound and at least one enabled tool fits a recommended category.
    RelevantBinding(Category),
    /// Not bound, but an enabled tool fits a recommended category.
    ImplicitMatch(Category),
}

/// The servers to attach for one step.
#[derive(Debug, Clone, Default)]
pub struct ResolvedServers {
    pub servers: Vec<ToolServerConfig>,
    /// Enabled tool name -> owning server name. When two servers enable the
    /// same tool name the first declared server owns it.
    pub tool_owner: BTreeMap<String, String>,
}

impl ResolvedServers {
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn server_names(&self) -> Vec<&str> {
        self.servers.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn owner_of(&self, tool_name: &str) -> Option<&str> {
        self.tool_owner.get(tool_name).map(String::as_str)
    }
}

/// First recommended category that one of the server's enabled tools belongs to.
fn relevant_category(server: &ToolServerConfig, recs: &Recommendations) -> Option<Category> {
    recs.keys().copied().find(|category| {
        server
            .enabled_tools
            .iter()
            .any(|tool| category.matches_tool_name(tool))
    })
}

/// Decide whether a single server is attached for `role`.
pub fn inclusion_reason(
    server: &ToolServerConfig,
    role: AgentRole,
    recs: &Recommendations,
) -> Option<InclusionReason> {
    if server.enabled_tools.is_empty() {
        return None;
    }
    if server.is_bound_to(role) {
        if recs.is_empty() {
            return Some(InclusionReason::ExplicitBinding);
        }
        return relevant_category(server, recs).map(InclusionReason::RelevantBinding);
    }
    if server.agent_bindings.is_none() && !recs.is_empty() {
        return relevant_category(server, recs).map(InclusionReason::ImplicitMatch);
    }
    None
}

/// Resolve the configured servers for `role` given this step's recommendations.
pub fn resolve_servers(
    servers: &[ToolServerConfig],
    role: AgentRole,
    recs: &Recommendations,
) -> ResolvedServers {
    let mut resolved = ResolvedServers::default();

    for server in servers {
        match inclusion_reason(server, role, recs) {
            Some(reason) => {
                info!(
                    server = %server.name,
                    role = %role,
                    reason = ?reason,
                    "Attaching tool server"
                );
                for tool in &server.enabled_tools {
                    resolved
                        .tool_owner
                        .entry(tool.clone())
                        .or_insert_with(|| server.name.clone());
                }
                resolved.servers.push(server.clone());
            }
            None => {
                debug!(server = %server.name, role = %role, "Skipping tool server");
            }
        }
    }

    resolved
}
