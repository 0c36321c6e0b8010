//! The closed set of built-in actions and their model-facing schemas.
//!
//! Dispatch is an exhaustive enum match rather than a name-to-handler map,
//! so adding an operation forces the permission policy, executor, and
//! catalog to all account for it.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::ai::types::AiTool;

/// Prefix for tools served by MCP servers (`mcp__{server}_{tool}`).
pub const MCP_TOOL_PREFIX: &str = "mcp__";

/// Every action the agent can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ReadFile,
    ReadManyFiles,
    WriteFile,
    EditFile,
    DeleteFile,
    ListDirectory,
    CreateDirectory,
    ExecuteCommand,
    SearchFiles,
    Grep,
    FileInfo,
    DelegateTask,
    McpTool,
}

impl ActionKind {
    /// Wire name the model uses for this action.
    pub fn tool_name(&self) -> &'static str {
        match self {
            ActionKind::ReadFile => "read_file",
            ActionKind::ReadManyFiles => "read_files",
            ActionKind::WriteFile => "write_file",
            ActionKind::EditFile => "edit_file",
            ActionKind::DeleteFile => "delete_file",
            ActionKind::ListDirectory => "list_directory",
            ActionKind::CreateDirectory => "create_directory",
            ActionKind::ExecuteCommand => "execute_command",
            ActionKind::SearchFiles => "search_files",
            ActionKind::Grep => "grep",
            ActionKind::FileInfo => "get_file_info",
            ActionKind::DelegateTask => "delegate_task",
            ActionKind::McpTool => "mcp_tool",
        }
    }

    /// Map a tool name from the model back to an action.
    pub fn from_tool_name(name: &str) -> Option<ActionKind> {
        if name.starts_with(MCP_TOOL_PREFIX) {
            return Some(ActionKind::McpTool);
        }
        match name {
            "read_file" => Some(ActionKind::ReadFile),
            "read_files" => Some(ActionKind::ReadManyFiles),
            "write_file" => Some(ActionKind::WriteFile),
            "edit_file" => Some(ActionKind::EditFile),
            "delete_file" => Some(ActionKind::DeleteFile),
            "list_directory" => Some(ActionKind::ListDirectory),
            "create_directory" => Some(ActionKind::CreateDirectory),
            "execute_command" => Some(ActionKind::ExecuteCommand),
            "search_files" => Some(ActionKind::SearchFiles),
            "grep" => Some(ActionKind::Grep),
            "get_file_info" => Some(ActionKind::FileInfo),
            "delegate_task" => Some(ActionKind::DelegateTask),
            _ => None,
        }
    }

    /// Read-only actions never modify state.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            ActionKind::ReadFile
                | ActionKind::ReadManyFiles
                | ActionKind::ListDirectory
                | ActionKind::SearchFiles
                | ActionKind::Grep
                | ActionKind::FileInfo
        )
    }

    /// All built-in actions, for policy tables and catalog assembly.
    pub fn all() -> &'static [ActionKind] {
        &[
            ActionKind::ReadFile,
            ActionKind::ReadManyFiles,
            ActionKind::WriteFile,
            ActionKind::EditFile,
            ActionKind::DeleteFile,
            ActionKind::ListDirectory,
            ActionKind::CreateDirectory,
            ActionKind::ExecuteCommand,
            ActionKind::SearchFiles,
            ActionKind::Grep,
            ActionKind::FileInfo,
            ActionKind::DelegateTask,
            ActionKind::McpTool,
        ]
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tool_name())
    }
}

/// Tool definitions advertised to the model for the built-in actions.
///
/// `allowed` filters the catalog (used for restricted subagent toolsets);
/// `None` means everything.
pub fn builtin_tools(allowed: Option<&[ActionKind]>) -> Vec<AiTool> {
    ActionKind::all()
        .iter()
        .filter(|kind| **kind != ActionKind::McpTool)
        .filter(|kind| allowed.map(|set| set.contains(kind)).unwrap_or(true))
        .map(tool_definition)
        .collect()
}

fn tool_definition(kind: &ActionKind) -> AiTool {
    let (description, schema) = match kind {
        ActionKind::ReadFile => (
            "Read the contents of a file. Supports optional line offset and limit for large files.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path to the file"},
                    "offset": {"type": "integer", "description": "1-based line to start from"},
                    "limit": {"type": "integer", "description": "Maximum number of lines to read"}
                },
                "required": ["path"]
            }),
        ),
        ActionKind::ReadManyFiles => (
            "Read several files at once. Returns each file's content keyed by path.",
            json!({
                "type": "object",
                "properties": {
                    "paths": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Paths of the files to read"
                    }
                },
                "required": ["paths"]
            }),
        ),
        ActionKind::WriteFile => (
            "Write content to a file, creating parent directories as needed. \
             Structured formats (JSON/YAML/TOML) are validated before writing.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path to the file"},
                    "content": {"type": "string", "description": "Full content to write"}
                },
                "required": ["path", "content"]
            }),
        ),
        ActionKind::EditFile => (
            "Edit a file with a line-based operation: insert, replace, delete, or append. \
             Target lines by number or by a pattern match.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path to the file"},
                    "operation": {
                        "type": "string",
                        "enum": ["insert", "replace", "delete", "append"]
                    },
                    "line_number": {"type": "integer", "description": "1-based target line"},
                    "pattern": {"type": "string", "description": "Substring locating the target line"},
                    "content": {"type": "string", "description": "Content for insert/replace/append"}
                },
                "required": ["path", "operation"]
            }),
        ),
        ActionKind::DeleteFile => (
            "Delete a file.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path to the file"}
                },
                "required": ["path"]
            }),
        ),
        ActionKind::ListDirectory => (
            "List directory contents. Recursive listing respects .gitignore.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Directory path (defaults to working directory)"},
                    "recursive": {"type": "boolean", "description": "Walk subdirectories"}
                }
            }),
        ),
        ActionKind::CreateDirectory => (
            "Create a directory, including missing parents.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Directory path to create"}
                },
                "required": ["path"]
            }),
        ),
        ActionKind::ExecuteCommand => (
            "Execute a shell command in the working directory. Output is captured \
             with a bounded buffer; long-running commands are killed at the timeout.",
            json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "The shell command to run"},
                    "working_dir": {"type": "string", "description": "Directory to run in (defaults to workspace)"},
                    "timeout": {"type": "integer", "description": "Timeout in seconds"}
                },
                "required": ["command"]
            }),
        ),
        ActionKind::SearchFiles => (
            "Find files matching a glob pattern, e.g. '**/*.rs' or 'src/**/test*'.",
            json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string", "description": "Glob pattern"},
                    "path": {"type": "string", "description": "Directory to search from"}
                },
                "required": ["pattern"]
            }),
        ),
        ActionKind::Grep => (
            "Search file contents with a regular expression. Respects .gitignore.",
            json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string", "description": "Regular expression"},
                    "path": {"type": "string", "description": "File or directory to search"},
                    "case_insensitive": {"type": "boolean"},
                    "max_results": {"type": "integer", "description": "Cap on matching lines returned"}
                },
                "required": ["pattern"]
            }),
        ),
        ActionKind::FileInfo => (
            "Get metadata about a file or directory: size, kind, modification time.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path to inspect"}
                },
                "required": ["path"]
            }),
        ),
        ActionKind::DelegateTask => (
            "Delegate focused work to one or more subagents that run with a \
             restricted toolset and report back a summary. Tasks run in parallel.",
            json!({
                "type": "object",
                "properties": {
                    "tasks": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": {"type": "string", "description": "Short label for the task"},
                                "task": {"type": "string", "description": "What the subagent should do"},
                                "subagent_type": {
                                    "type": "string",
                                    "enum": ["general", "code_review", "testing", "refactor", "documentation"]
                                },
                                "max_iterations": {"type": "integer"},
                                "timeout": {"type": "integer", "description": "Timeout in seconds"}
                            },
                            "required": ["name", "task"]
                        }
                    }
                },
                "required": ["tasks"]
            }),
        ),
        ActionKind::McpTool => unreachable!("MCP tools are defined by their servers"),
    };

    AiTool {
        name: kind.tool_name().to_string(),
        description: description.to_string(),
        input_schema: schema,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_names() {
        for kind in ActionKind::all() {
            if *kind == ActionKind::McpTool {
                continue;
            }
            assert_eq!(ActionKind::from_tool_name(kind.tool_name()), Some(*kind));
        }
    }

    #[test]
    fn test_mcp_prefix_maps_to_mcp_kind() {
        assert_eq!(
            ActionKind::from_tool_name("mcp__files_search"),
            Some(ActionKind::McpTool)
        );
        assert_eq!(ActionKind::from_tool_name("not_a_tool"), None);
    }

    #[test]
    fn test_read_only_classification() {
        assert!(ActionKind::ReadFile.is_read_only());
        assert!(ActionKind::Grep.is_read_only());
        assert!(!ActionKind::WriteFile.is_read_only());
        assert!(!ActionKind::ExecuteCommand.is_read_only());
        assert!(!ActionKind::DelegateTask.is_read_only());
    }

    #[test]
    fn test_catalog_filtering() {
        let all = builtin_tools(None);
        assert!(all.iter().any(|t| t.name == "execute_command"));

        let read_only: Vec<ActionKind> = ActionKind::all()
            .iter()
            .copied()
            .filter(ActionKind::is_read_only)
            .collect();
        let restricted = builtin_tools(Some(&read_only));
        assert!(restricted.iter().all(|t| {
            ActionKind::from_tool_name(&t.name)
                .map(|k| k.is_read_only())
                .unwrap_or(false)
        }));
        assert!(!restricted.is_empty());
    }

    #[test]
    fn test_schemas_declare_required_fields() {
        for tool in builtin_tools(None) {
            assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
        }
    }
}
