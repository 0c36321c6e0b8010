//! File search by glob pattern and content search by regex.

use ignore::WalkBuilder;
use regex::RegexBuilder;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::{parse_params, ToolContext, ToolResult};

const MAX_GLOB_RESULTS: usize = 1000;
const DEFAULT_GREP_RESULTS: usize = 200;
/// Files larger than this are skipped during content search.
const MAX_GREP_FILE_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Deserialize)]
struct GlobParams {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
}

#[derive(Deserialize)]
struct GrepParams {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    case_insensitive: bool,
    #[serde(default)]
    max_results: Option<usize>,
}

pub async fn search_files(params: Value, ctx: &ToolContext) -> ToolResult {
    let params = match parse_params::<GlobParams>(params) {
        Ok(p) => p,
        Err(e) => return e,
    };

    let base = match ctx.sandboxed_resolve(params.path.as_deref().unwrap_or(".")) {
        Ok(p) => p,
        Err(e) => return ToolResult::error(e),
    };

    // The pattern is joined onto the workspace-relative base, so it must not
    // climb back out of it.
    let pattern_path = std::path::Path::new(&params.pattern);
    if pattern_path.is_absolute()
        || pattern_path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return ToolResult::error(format!(
            "Access denied: glob pattern '{}' leaves the workspace",
            params.pattern
        ));
    }

    let full_pattern = base.join(&params.pattern).display().to_string();
    let paths = match glob::glob(&full_pattern) {
        Ok(paths) => paths,
        Err(e) => return ToolResult::invalid_parameters(format!("Invalid glob pattern: {e}")),
    };

    let mut matches = Vec::new();
    let mut truncated = false;
    for entry in paths.flatten() {
        if matches.len() >= MAX_GLOB_RESULTS {
            truncated = true;
            break;
        }
        // Symlinked matches may resolve outside the workspace; drop them.
        if let Some(root) = &ctx.sandbox_root {
            match entry.canonicalize() {
                Ok(canonical) if canonical.starts_with(root) => {}
                _ => continue,
            }
        }
        let rel = entry.strip_prefix(&base).unwrap_or(&entry);
        matches.push(rel.display().to_string());
    }
    matches.sort();

    let warnings = if truncated {
        vec![format!("results truncated to {MAX_GLOB_RESULTS} files")]
    } else {
        Vec::new()
    };

    ToolResult::success_data_with(
        json!({
            "pattern": params.pattern,
            "matches": matches,
        }),
        warnings,
        None,
        None,
    )
}

pub async fn grep(params: Value, ctx: &ToolContext) -> ToolResult {
    let params = match parse_params::<GrepParams>(params) {
        Ok(p) => p,
        Err(e) => return e,
    };

    let regex = match RegexBuilder::new(&params.pattern)
        .case_insensitive(params.case_insensitive)
        .build()
    {
        Ok(r) => r,
        Err(e) => return ToolResult::invalid_parameters(format!("Invalid regex: {e}")),
    };

    let base = match ctx.sandboxed_resolve(params.path.as_deref().unwrap_or(".")) {
        Ok(p) => p,
        Err(e) => return ToolResult::error(e),
    };

    let max_results = params.max_results.unwrap_or(DEFAULT_GREP_RESULTS);
    let mut matches = Vec::new();
    let mut truncated = false;

    let files: Vec<std::path::PathBuf> = if base.is_file() {
        vec![base.clone()]
    } else {
        WalkBuilder::new(&base)
            .hidden(false)
            .git_ignore(true)
            .git_global(false)
            .build()
            .flatten()
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.into_path())
            .collect()
    };

    'outer: for file in files {
        if let Ok(meta) = file.metadata() {
            if meta.len() > MAX_GREP_FILE_BYTES {
                continue;
            }
        }
        let Ok(content) = std::fs::read_to_string(&file) else {
            continue; // binary or unreadable
        };
        let rel = file.strip_prefix(&base).unwrap_or(&file);
        for (idx, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                if matches.len() >= max_results {
                    truncated = true;
                    break 'outer;
                }
                matches.push(json!({
                    "path": rel.display().to_string(),
                    "line": idx + 1,
                    "text": line,
                }));
            }
        }
    }

    // No matches is a successful search, not an error.
    let warnings = if truncated {
        vec![format!("results truncated to {max_results} matching lines")]
    } else {
        Vec::new()
    };

    ToolResult::success_data_with(
        json!({
            "pattern": params.pattern,
            "match_count": matches.len(),
            "matches": matches,
        }),
        warnings,
        None,
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_in(dir: &tempfile::TempDir) -> ToolContext {
        let root = dir.path().canonicalize().unwrap();
        ToolContext::new(root.clone()).with_sandbox(root)
    }

    #[tokio::test]
    async fn test_glob_finds_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/sub")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/sub/lib.rs"), "").unwrap();
        std::fs::write(dir.path().join("readme.md"), "").unwrap();

        let result = search_files(json!({"pattern": "**/*.rs"}), &ctx_in(&dir)).await;
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        let matches = parsed["data"]["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 2);
    }

    #[tokio::test]
    async fn test_glob_rejects_parent_dir_pattern() {
        let outer = tempfile::tempdir().unwrap();
        std::fs::write(outer.path().join("secret.txt"), "x").unwrap();
        let inner = outer.path().join("project");
        std::fs::create_dir(&inner).unwrap();

        let root = inner.canonicalize().unwrap();
        let ctx = ToolContext::new(root.clone()).with_sandbox(root);
        let result = search_files(json!({"pattern": "../*.txt"}), &ctx).await;
        assert!(result.is_error);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["error"]["code"], "access_denied");
    }

    #[tokio::test]
    async fn test_glob_rejects_absolute_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let result = search_files(json!({"pattern": "/etc/*"}), &ctx_in(&dir)).await;
        assert!(result.is_error);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["error"]["code"], "access_denied");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_glob_drops_symlinks_leaving_workspace() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("target.txt"), "x").unwrap();

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("inside.txt"), "x").unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("target.txt"),
            dir.path().join("link.txt"),
        )
        .unwrap();

        let result = search_files(json!({"pattern": "*.txt"}), &ctx_in(&dir)).await;
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        let matches = parsed["data"]["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0], "inside.txt");
    }

    #[tokio::test]
    async fn test_grep_reports_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha\nneedle here\nomega").unwrap();
        let result = grep(json!({"pattern": "needle"}), &ctx_in(&dir)).await;
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["data"]["match_count"], 1);
        assert_eq!(parsed["data"]["matches"][0]["line"], 2);
    }

    #[tokio::test]
    async fn test_grep_no_matches_is_success() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "nothing").unwrap();
        let result = grep(json!({"pattern": "absent"}), &ctx_in(&dir)).await;
        assert!(!result.is_error);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["data"]["match_count"], 0);
    }

    #[tokio::test]
    async fn test_grep_case_insensitive_flag() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "Needle").unwrap();
        let ctx = ctx_in(&dir);
        let strict = grep(json!({"pattern": "needle"}), &ctx).await;
        let parsed: Value = serde_json::from_str(&strict.output).unwrap();
        assert_eq!(parsed["data"]["match_count"], 0);

        let loose = grep(json!({"pattern": "needle", "case_insensitive": true}), &ctx).await;
        let parsed: Value = serde_json::from_str(&loose.output).unwrap();
        assert_eq!(parsed["data"]["match_count"], 1);
    }

    #[tokio::test]
    async fn test_grep_invalid_regex() {
        let dir = tempfile::tempdir().unwrap();
        let result = grep(json!({"pattern": "[unclosed"}), &ctx_in(&dir)).await;
        assert!(result.is_error);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["error"]["code"], "invalid_parameters");
    }
}
