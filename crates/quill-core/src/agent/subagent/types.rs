//! Subagent kinds, task descriptions, and results.

use serde::{Deserialize, Serialize};

use crate::agent::loop_events::CompletionReason;
use crate::tools::ActionKind;

/// Specialization of a delegated subagent. Each kind carries its own system
/// prompt, toolset, and iteration budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubagentKind {
    #[default]
    General,
    CodeReview,
    Testing,
    Refactor,
    Documentation,
}

impl SubagentKind {
    pub fn name(&self) -> &'static str {
        match self {
            SubagentKind::General => "general",
            SubagentKind::CodeReview => "code_review",
            SubagentKind::Testing => "testing",
            SubagentKind::Refactor => "refactor",
            SubagentKind::Documentation => "documentation",
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            SubagentKind::General => {
                "You are a helpful AI assistant focused on completing the given task \
                 efficiently."
            }
            SubagentKind::CodeReview => {
                "You are a code review specialist. Focus on code quality, best practices, \
                 security issues, and potential bugs. Provide actionable feedback. \
                 Be thorough but constructive in your reviews."
            }
            SubagentKind::Testing => {
                "You are a testing specialist. Write comprehensive tests, identify edge \
                 cases, and ensure good test coverage. Follow testing best practices. \
                 Create tests that are maintainable and provide good coverage."
            }
            SubagentKind::Refactor => {
                "You are a refactoring specialist. Improve code structure, readability, \
                 and maintainability while preserving functionality. Explain your changes \
                 and justify the refactoring decisions."
            }
            SubagentKind::Documentation => {
                "You are a documentation specialist. Write clear, comprehensive \
                 documentation with examples. Focus on helping users understand the code \
                 and how to use it."
            }
        }
    }

    /// Toolset available to this kind. `None` means the full built-in set
    /// except delegation (subagents cannot spawn their own subagents).
    pub fn allowed_tools(&self) -> Option<Vec<ActionKind>> {
        use ActionKind::*;
        match self {
            SubagentKind::General => None,
            SubagentKind::CodeReview => Some(vec![
                ReadFile,
                ReadManyFiles,
                Grep,
                SearchFiles,
                ListDirectory,
                FileInfo,
            ]),
            SubagentKind::Testing => Some(vec![
                ReadFile,
                WriteFile,
                ExecuteCommand,
                SearchFiles,
                Grep,
                ListDirectory,
                FileInfo,
                CreateDirectory,
            ]),
            SubagentKind::Refactor | SubagentKind::Documentation => Some(vec![
                ReadFile,
                ReadManyFiles,
                WriteFile,
                EditFile,
                SearchFiles,
                Grep,
                ListDirectory,
                FileInfo,
                CreateDirectory,
            ]),
        }
    }

    pub fn default_max_iterations(&self) -> usize {
        match self {
            SubagentKind::General => 25,
            SubagentKind::CodeReview => 15,
            SubagentKind::Testing | SubagentKind::Refactor => 30,
            SubagentKind::Documentation => 20,
        }
    }
}

impl std::fmt::Display for SubagentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One task from a `delegate_task` call.
#[derive(Debug, Clone, Deserialize)]
pub struct SubagentTask {
    pub name: String,
    pub task: String,
    #[serde(default, rename = "subagent_type")]
    pub kind: SubagentKind,
    #[serde(default)]
    pub max_iterations: Option<usize>,
    /// Wall-clock budget in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl SubagentTask {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("task name must not be empty".to_string());
        }
        if self.task.trim().is_empty() {
            return Err(format!("task '{}' has an empty description", self.name));
        }
        if self.max_iterations == Some(0) {
            return Err(format!("task '{}' requests zero iterations", self.name));
        }
        Ok(())
    }

    /// Iteration cap: per-call override wins over the kind default, which
    /// wins over the global cap.
    pub fn effective_max_iterations(&self, global_cap: usize) -> usize {
        self.max_iterations
            .unwrap_or_else(|| self.kind.default_max_iterations())
            .min(global_cap)
    }
}

/// Outcome of one subagent run.
#[derive(Debug, Clone, Serialize)]
pub struct SubagentResult {
    pub name: String,
    pub kind: String,
    pub success: bool,
    #[serde(skip)]
    pub completion: CompletionReason,
    pub summary: String,
    pub iterations: usize,
    pub duration_ms: u64,
    /// True when served from the result cache without a fresh run.
    pub cached: bool,
}

impl SubagentResult {
    pub fn failure(task: &SubagentTask, reason: CompletionReason, summary: String) -> Self {
        Self {
            name: task.name.clone(),
            kind: task.kind.name().to_string(),
            success: false,
            completion: reason,
            summary,
            iterations: 0,
            duration_ms: 0,
            cached: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_deserializes_from_wire_names() {
        let task: SubagentTask = serde_json::from_value(serde_json::json!({
            "name": "review",
            "task": "review the diff",
            "subagent_type": "code_review"
        }))
        .unwrap();
        assert_eq!(task.kind, SubagentKind::CodeReview);
    }

    #[test]
    fn test_kind_defaults_to_general() {
        let task: SubagentTask = serde_json::from_value(serde_json::json!({
            "name": "t",
            "task": "do it"
        }))
        .unwrap();
        assert_eq!(task.kind, SubagentKind::General);
    }

    #[test]
    fn test_review_toolset_is_read_only() {
        let tools = SubagentKind::CodeReview.allowed_tools().unwrap();
        assert!(tools.iter().all(ActionKind::is_read_only));
    }

    #[test]
    fn test_iteration_cap_precedence() {
        let mut task: SubagentTask = serde_json::from_value(serde_json::json!({
            "name": "t",
            "task": "do it",
            "subagent_type": "testing"
        }))
        .unwrap();
        assert_eq!(task.effective_max_iterations(100), 30);
        task.max_iterations = Some(5);
        assert_eq!(task.effective_max_iterations(100), 5);
        assert_eq!(task.effective_max_iterations(3), 3);
    }

    #[test]
    fn test_validation_rejects_empty_fields() {
        let task: SubagentTask = serde_json::from_value(serde_json::json!({
            "name": " ",
            "task": "x"
        }))
        .unwrap();
        assert!(task.validate().is_err());
    }
}
