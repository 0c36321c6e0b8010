//! MCP server configuration from `.mcp.json`.
//!
//! Only local stdio servers are supported. `${VAR}` references in `env`
//! values are expanded from the process environment at load time.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpConfig {
    #[serde(default)]
    pub mcp_servers: HashMap<String, McpServerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl McpConfig {
    /// Load `.mcp.json` from the working directory. A missing file is an
    /// empty config, not an error.
    pub async fn load(working_dir: &Path) -> Result<Self> {
        let path = working_dir.join(".mcp.json");
        if !path.exists() {
            debug!(path = %path.display(), "no MCP config file");
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config: McpConfig = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;

        for server in config.mcp_servers.values_mut() {
            for value in server.env.values_mut() {
                *value = expand_env_vars(value);
            }
        }

        info!(
            servers = config.mcp_servers.len(),
            path = %path.display(),
            "loaded MCP config"
        );
        Ok(config)
    }
}

/// Expand `${VAR}` references from the process environment. Unset variables
/// expand to the empty string.
fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        let Some(len) = result[start..].find('}') else {
            break;
        };
        let name = result[start + 2..start + len].to_string();
        let value = std::env::var(&name).unwrap_or_default();
        result.replace_range(start..start + len + 1, &value);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_entry() {
        let json = r#"{
            "mcpServers": {
                "files": {
                    "command": "mcp-files",
                    "args": ["--root", "."],
                    "env": {"FILES_TOKEN": "abc"}
                }
            }
        }"#;
        let config: McpConfig = serde_json::from_str(json).unwrap();
        let server = config.mcp_servers.get("files").unwrap();
        assert_eq!(server.command, "mcp-files");
        assert_eq!(server.args, vec!["--root", "."]);
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("QUILL_TEST_MCP_VAR", "resolved");
        assert_eq!(expand_env_vars("${QUILL_TEST_MCP_VAR}"), "resolved");
        assert_eq!(
            expand_env_vars("prefix-${QUILL_TEST_MCP_VAR}-suffix"),
            "prefix-resolved-suffix"
        );
        assert_eq!(expand_env_vars("${QUILL_TEST_UNSET_VAR}"), "");
        assert_eq!(expand_env_vars("plain"), "plain");
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = McpConfig::load(dir.path()).await.unwrap();
        assert!(config.mcp_servers.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".mcp.json"), "{ not json").unwrap();
        assert!(McpConfig::load(dir.path()).await.is_err());
    }
}
