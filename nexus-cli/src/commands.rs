//! CLI subcommand handlers.

use anyhow::Context;
use nexus_core::config::{
    NexusConfig, ToolServerDescriptor, config_exists, load_config, load_config_file,
};
use nexus_core::resolution::inclusion_reason;
use nexus_core::{AgentRole, recommend};
use nexus_mcp::{discover_all, discover_server_tools, system_gateway};
use std::path::Path;

use crate::{Commands, ConfigAction, ToolsAction};

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    let config = load(workspace, config_path)?;
    match command {
        Commands::Tools { action } => handle_tools(action, &config).await,
        Commands::Config { action } => handle_config(action, workspace, &config),
    }
}

fn load(workspace: &Path, config_path: Option<&Path>) -> anyhow::Result<NexusConfig> {
    match config_path {
        Some(path) => {
            load_config_file(path).with_context(|| format!("loading {}", path.display()))
        }
        None => load_config(Some(workspace), None)
            .map_err(|e| anyhow::anyhow!("Configuration error: {}", e)),
    }
}

async fn handle_tools(action: ToolsAction, config: &NexusConfig) -> anyhow::Result<()> {
    let validated = config.validate();
    match action {
        ToolsAction::Discover { server, json } => {
            let (servers, tools) = match &server {
                Some(name) => {
                    let descriptor = find_server(config, name)?;
                    let tools = discover_server_tools(descriptor, &validated.gateway)
                        .await
                        .with_context(|| format!("Tool server '{name}' is misconfigured"))?;
                    (vec![descriptor.validate()?], tools)
                }
                None => {
                    if validated.servers.is_empty() {
                        println!("No tool servers configured.");
                        return Ok(());
                    }
                    let gateway = system_gateway(&validated.gateway);
                    let tools = discover_all(&gateway, &validated.servers).await;
                    (validated.servers.clone(), tools)
                }
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&tools)?);
                return Ok(());
            }
            for server in &servers {
                let listed: Vec<_> = tools.iter().filter(|t| t.server == server.name).collect();
                println!("{} ({}): {} tool(s)", server.name, server.transport.kind(), listed.len());
                for tool in listed {
                    let enabled = if server.enabled_tools.contains(&tool.name) {
                        "*"
                    } else {
                        " "
                    };
                    let summary = tool.description.lines().next().unwrap_or_default();
                    println!("  {enabled} {:<28} {summary}", tool.name);
                }
            }
            println!("\n(* = enabled in configuration)");
            Ok(())
        }
        ToolsAction::Recommend {
            role,
            title,
            description,
        } => {
            let role = AgentRole::parse(&role).with_context(|| {
                format!("Unknown role '{role}' (expected researcher, coder, or reporter)")
            })?;
            let recs = recommend(&title, &description, role);

            if recs.is_empty() {
                println!("No tool categories recommended for {role}.");
            } else {
                println!("Recommended categories for {role}:");
                for (category, rec) in &recs {
                    let keywords: Vec<_> = rec.matched_keywords.iter().map(String::as_str).collect();
                    println!(
                        "  {:<12} {:?} (score {}): {}",
                        category.as_str(),
                        rec.priority,
                        rec.match_score,
                        keywords.join(", ")
                    );
                }
            }

            let validated_servers = &validated.servers;
            let attached: Vec<_> = validated_servers
                .iter()
                .filter_map(|s| inclusion_reason(s, role, &recs).map(|reason| (s, reason)))
                .collect();
            if attached.is_empty() {
                println!("\nNo tool servers would be attached.");
            } else {
                println!("\nTool servers attached:");
                for (server, reason) in attached {
                    println!("  {:<16} {:?}", server.name, reason);
                }
            }
            Ok(())
        }
    }
}

/// Look up a declared server by name, valid or not.
fn find_server<'a>(config: &'a NexusConfig, name: &str) -> anyhow::Result<&'a ToolServerDescriptor> {
    config
        .mcp
        .servers
        .iter()
        .find(|s| s.name == name)
        .with_context(|| format!("No tool server named '{name}' is configured"))
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config: &NexusConfig,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
            let validated = config.validate();
            println!(
                "\nrecursion limit: {}, valid tool servers: {}/{}",
                validated.recursion_limit.get(),
                validated.servers.len(),
                config.mcp.servers.len()
            );
            Ok(())
        }
        ConfigAction::Paths => {
            if let Some(dirs) = directories::ProjectDirs::from("dev", "nexus", "nexus") {
                println!("user:      {}", dirs.config_dir().join("config.toml").display());
            }
            let local = workspace.join(".nexus");
            println!("workspace: {}", local.join("config.toml").display());
            println!("servers:   {}", local.join("mcp.json").display());
            if !config_exists(Some(workspace)) {
                println!("\nNo configuration file found; using defaults and environment.");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_core::config::McpSettings;

    fn config_with(servers: Vec<ToolServerDescriptor>) -> NexusConfig {
        NexusConfig {
            mcp: McpSettings { servers },
            ..Default::default()
        }
    }

    fn descriptor(name: &str, command: Option<&str>) -> ToolServerDescriptor {
        ToolServerDescriptor {
            name: name.into(),
            transport: "stdio".into(),
            command: command.map(Into::into),
            args: None,
            url: None,
            env: None,
            enabled_tools: vec!["create_entities".into()],
            add_to_agents: None,
        }
    }

    #[test]
    fn test_find_server_returns_invalid_descriptors() {
        let config = config_with(vec![descriptor("memory", Some("npx")), descriptor("broken", None)]);
        assert_eq!(find_server(&config, "broken").unwrap().name, "broken");
        let err = find_server(&config, "missing").unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn test_discover_named_server_reports_config_error() {
        let config = config_with(vec![descriptor("broken", None)]);
        let err = handle_tools(
            ToolsAction::Discover {
                server: Some("broken".into()),
                json: true,
            },
            &config,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("'broken' is misconfigured"));
    }
}
