//! File write operation with pre-commit validation.

use serde::Deserialize;
use serde_json::{json, Value};
use similar::TextDiff;
use tokio::fs;
use tracing::debug;

use crate::tools::validate::{validate_content, Validation};
use crate::tools::{parse_params, ToolContext, ToolResult};

#[derive(Deserialize)]
struct Params {
    path: String,
    content: String,
}

pub async fn write_file(params: Value, ctx: &ToolContext) -> ToolResult {
    let params = match parse_params::<Params>(params) {
        Ok(p) => p,
        Err(e) => return e,
    };

    let path = match ctx.sandboxed_resolve_new_path(&params.path) {
        Ok(p) => p,
        Err(e) => return ToolResult::error(e),
    };

    let mut warnings = Vec::new();
    match validate_content(&path, &params.content) {
        Validation::Ok => {}
        Validation::Skipped(reason) => {
            warnings.push(format!("validation skipped: {reason}"));
        }
        Validation::Failed { message } => {
            // The target file is untouched on validation failure.
            return ToolResult::error_with_code("validation_failed", message);
        }
    }

    let previous = fs::read_to_string(&path).await.ok();

    if let Some(parent) = path.parent().filter(|p| !p.exists()) {
        debug!("creating parent directory {:?}", parent);
        if let Err(e) = fs::create_dir_all(parent).await {
            return ToolResult::error(format!("Failed to create directory: {e}"));
        }
    }

    if let Err(e) = fs::write(&path, &params.content).await {
        return ToolResult::error(format!("Failed to write file: {e}"));
    }

    let diff = previous.as_deref().map(|old| {
        TextDiff::from_lines(old, &params.content)
            .unified_diff()
            .context_radius(3)
            .to_string()
    });

    ToolResult::success_data_with(
        json!({
            "message": format!("Successfully wrote {} lines", params.content.lines().count()),
            "bytes_written": params.content.len(),
            "path": path.display().to_string(),
            "created": previous.is_none(),
        }),
        warnings,
        diff,
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
    async fn test_write_creates_file_and_parents() {
        let dir = tempfile::tempdir().unwrap();
        let result = write_file(
            json!({"path": "nested/deep/file.txt", "content": "hello"}),
            &ctx_in(&dir),
        )
        .await;
        assert!(!result.is_error);
        let written = std::fs::read_to_string(dir.path().join("nested/deep/file.txt")).unwrap();
        assert_eq!(written, "hello");
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["data"]["created"], true);
    }

    #[tokio::test]
    async fn test_overwrite_includes_diff() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "old line\n").unwrap();
        let result = write_file(json!({"path": "a.txt", "content": "new line\n"}), &ctx_in(&dir)).await;
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        let diff = parsed["diff"].as_str().unwrap();
        assert!(diff.contains("-old line"));
        assert!(diff.contains("+new line"));
    }

    #[tokio::test]
    async fn test_invalid_json_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cfg.json"), r#"{"good": true}"#).unwrap();
        let result = write_file(
            json!({"path": "cfg.json", "content": "{broken"}),
            &ctx_in(&dir),
        )
        .await;
        assert!(result.is_error);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["error"]["code"], "validation_failed");
        let on_disk = std::fs::read_to_string(dir.path().join("cfg.json")).unwrap();
        assert_eq!(on_disk, r#"{"good": true}"#);
    }

    #[tokio::test]
    async fn test_traversal_rejected_before_any_io() {
        let dir = tempfile::tempdir().unwrap();
        let result = write_file(
            json!({"path": "../escape.txt", "content": "x"}),
            &ctx_in(&dir),
        )
        .await;
        assert!(result.is_error);
        assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
    }
}
