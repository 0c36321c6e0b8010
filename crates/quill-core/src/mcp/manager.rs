//! Manages MCP server connections and exposes their tools to the agent.
//!
//! Tools are surfaced under the name `mcp__{server}_{tool}` so the model can
//! call them alongside the built-in catalog.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::info;

use super::client::McpClient;
use super::config::McpConfig;
use crate::ai::types::AiTool;
use crate::tools::{ToolResult, MCP_TOOL_PREFIX};

#[derive(Debug, Clone)]
pub struct McpServerInfo {
    pub name: String,
    pub connected: bool,
    pub tool_count: usize,
}

pub struct McpManager {
    working_dir: PathBuf,
    config: RwLock<McpConfig>,
    clients: RwLock<HashMap<String, Arc<McpClient>>>,
}

impl McpManager {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            working_dir,
            config: RwLock::new(McpConfig::default()),
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Load `.mcp.json` from the working directory.
    pub async fn load_config(&self) -> Result<()> {
        let config = McpConfig::load(&self.working_dir).await?;
        *self.config.write().await = config;
        Ok(())
    }

    /// Names of configured servers, connected or not.
    pub async fn configured_servers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.config.read().await.mcp_servers.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn has_servers(&self) -> bool {
        !self.config.read().await.mcp_servers.is_empty()
    }

    /// Configured servers paired with the command line each one would run,
    /// so callers can show what they are approving before a connection.
    pub async fn server_commands(&self) -> Vec<(String, String)> {
        let config = self.config.read().await;
        let mut entries: Vec<(String, String)> = config
            .mcp_servers
            .iter()
            .map(|(name, server)| {
                let mut command = server.command.clone();
                for arg in &server.args {
                    command.push(' ');
                    command.push_str(arg);
                }
                (name.clone(), command)
            })
            .collect();
        entries.sort();
        entries
    }

    pub async fn connect(&self, name: &str) -> Result<()> {
        let config = self
            .config
            .read()
            .await
            .mcp_servers
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("unknown MCP server: {name}"))?;

        self.disconnect(name).await;

        let client = McpClient::connect(name, &config, &self.working_dir).await?;
        client.initialize().await?;
        let client = Arc::new(client);
        self.clients.write().await.insert(name.to_string(), client);
        info!(server = name, "MCP server connected");
        Ok(())
    }

    pub async fn disconnect(&self, name: &str) {
        if self.clients.write().await.remove(name).is_some() {
            info!(server = name, "MCP server disconnected");
        }
    }

    pub async fn list_servers(&self) -> Vec<McpServerInfo> {
        let clients = self.clients.read().await;
        let mut servers = Vec::new();
        for name in self.configured_servers().await {
            let (connected, tool_count) = match clients.get(&name) {
                Some(client) => (client.is_alive().await, client.tools().await.len()),
                None => (false, 0),
            };
            servers.push(McpServerInfo {
                name,
                connected,
                tool_count,
            });
        }
        servers
    }

    /// Tool definitions for the model, named `mcp__{server}_{tool}`.
    pub async fn ai_tools(&self) -> Vec<AiTool> {
        let clients = self.clients.read().await;
        let mut tools = Vec::new();
        for (server, client) in clients.iter() {
            for def in client.tools().await {
                tools.push(AiTool {
                    name: full_tool_name(server, &def.name),
                    description: def
                        .description
                        .clone()
                        .unwrap_or_else(|| format!("Tool {} on MCP server {server}", def.name)),
                    input_schema: def.input_schema,
                });
            }
        }
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Call a tool by its full `mcp__{server}_{tool}` name.
    pub async fn call_tool(&self, full_name: &str, params: Value) -> ToolResult {
        let clients = self.clients.read().await;
        let Some((client, tool)) = resolve_tool_name(&clients, full_name) else {
            return ToolResult::error_with_code(
                "unknown_tool",
                format!("No connected MCP server provides {full_name}"),
            );
        };

        match client.call_tool(&tool, params).await {
            Ok(result) if result.is_error => {
                ToolResult::error_with_code("tool_error", result.text())
            }
            Ok(result) => ToolResult::success(result.text()),
            Err(e) => ToolResult::error_with_code("tool_error", format!("MCP call failed: {e}")),
        }
    }
}

pub fn full_tool_name(server: &str, tool: &str) -> String {
    format!("{MCP_TOOL_PREFIX}{server}_{tool}")
}

/// Match a full tool name against connected servers. Server names may
/// contain underscores, so resolution tries each connected server's prefix
/// rather than splitting on the first underscore.
fn resolve_tool_name(
    clients: &HashMap<String, Arc<McpClient>>,
    full_name: &str,
) -> Option<(Arc<McpClient>, String)> {
    let rest = full_name.strip_prefix(MCP_TOOL_PREFIX)?;
    let mut best: Option<(&String, &str)> = None;
    for server in clients.keys() {
        if let Some(tool) = rest
            .strip_prefix(server.as_str())
            .and_then(|r| r.strip_prefix('_'))
        {
            if best.map(|(s, _)| server.len() > s.len()).unwrap_or(true) {
                best = Some((server, tool));
            }
        }
    }
    let (server, tool) = best?;
    Some((Arc::clone(&clients[server]), tool.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_tool_name() {
        assert_eq!(full_tool_name("files", "search"), "mcp__files_search");
    }

    #[tokio::test]
    async fn test_call_without_connection() {
        let dir = tempfile::tempdir().unwrap();
        let manager = McpManager::new(dir.path().to_path_buf());
        let result = manager
            .call_tool("mcp__files_search", serde_json::json!({}))
            .await;
        assert!(result.is_error);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["error"]["code"], "unknown_tool");
    }

    #[tokio::test]
    async fn test_server_commands_render_args() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".mcp.json"),
            r#"{"mcpServers": {"files": {"command": "mcp-files", "args": ["--root", "."]}}}"#,
        )
        .unwrap();
        let manager = McpManager::new(dir.path().to_path_buf());
        manager.load_config().await.unwrap();
        assert_eq!(
            manager.server_commands().await,
            vec![("files".to_string(), "mcp-files --root .".to_string())]
        );
    }

    #[tokio::test]
    async fn test_no_config_means_no_servers() {
        let dir = tempfile::tempdir().unwrap();
        let manager = McpManager::new(dir.path().to_path_buf());
        manager.load_config().await.unwrap();
        assert!(!manager.has_servers().await);
        assert!(manager.ai_tools().await.is_empty());
    }
}
