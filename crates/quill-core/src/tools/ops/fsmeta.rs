//! Small filesystem operations: delete, mkdir, metadata.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;

use crate::tools::{parse_params, ToolContext, ToolResult};

#[derive(Deserialize)]
struct PathParams {
    path: String,
}

pub async fn delete_file(params: Value, ctx: &ToolContext) -> ToolResult {
    let params = match parse_params::<PathParams>(params) {
        Ok(p) => p,
        Err(e) => return e,
    };

    let path = match ctx.sandboxed_resolve(&params.path) {
        Ok(p) => p,
        Err(e) => {
            if !ctx.resolve_path(&params.path).exists() {
                return ToolResult::error(format!("File not found: {}", params.path));
            }
            return ToolResult::error(e);
        }
    };

    if path.is_dir() {
        return ToolResult::error(format!(
            "Path is a directory, not a file: {}",
            path.display()
        ));
    }

    match fs::remove_file(&path).await {
        Ok(_) => ToolResult::success_data(json!({
            "message": format!("Successfully deleted {}", path.display()),
        })),
        Err(e) => ToolResult::error(format!("Failed to delete {}: {e}", path.display())),
    }
}

pub async fn create_directory(params: Value, ctx: &ToolContext) -> ToolResult {
    let params = match parse_params::<PathParams>(params) {
        Ok(p) => p,
        Err(e) => return e,
    };

    let path = match ctx.sandboxed_resolve_new_path(&params.path) {
        Ok(p) => p,
        Err(e) => return ToolResult::error(e),
    };

    match fs::create_dir_all(&path).await {
        Ok(_) => ToolResult::success_data(json!({
            "message": format!("Successfully created directory {}", path.display()),
        })),
        Err(e) => ToolResult::error(format!("Failed to create directory: {e}")),
    }
}

pub async fn file_info(params: Value, ctx: &ToolContext) -> ToolResult {
    let params = match parse_params::<PathParams>(params) {
        Ok(p) => p,
        Err(e) => return e,
    };

    let path = match ctx.sandboxed_resolve(&params.path) {
        Ok(p) => p,
        Err(e) => {
            if !ctx.resolve_path(&params.path).exists() {
                return ToolResult::error(format!("Path not found: {}", params.path));
            }
            return ToolResult::error(e);
        }
    };

    let metadata = match fs::metadata(&path).await {
        Ok(m) => m,
        Err(e) => return ToolResult::error(format!("Failed to stat {}: {e}", path.display())),
    };

    let modified = metadata
        .modified()
        .ok()
        .map(|t| DateTime::<Utc>::from(t).to_rfc3339());

    ToolResult::success_data(json!({
        "path": path.display().to_string(),
        "kind": if metadata.is_dir() { "dir" } else { "file" },
        "size_bytes": metadata.len(),
        "modified": modified,
        "readonly": metadata.permissions().readonly(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_in(dir: &tempfile::TempDir) -> ToolContext {
        let root = dir.path().canonicalize().unwrap();
        ToolContext::new(root.clone()).with_sandbox(root)
    }

    #[tokio::test]
    async fn test_delete_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let result = delete_file(json!({"path": "a.txt"}), &ctx_in(&dir)).await;
        assert!(!result.is_error);
        assert!(!dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_delete_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = delete_file(json!({"path": "ghost.txt"}), &ctx_in(&dir)).await;
        assert!(result.is_error);
        assert!(result.output.contains("File not found"));
    }

    #[tokio::test]
    async fn test_delete_refuses_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let result = delete_file(json!({"path": "sub"}), &ctx_in(&dir)).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_create_nested_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = create_directory(json!({"path": "a/b/c"}), &ctx_in(&dir)).await;
        assert!(!result.is_error);
        assert!(dir.path().join("a/b/c").is_dir());
    }

    #[tokio::test]
    async fn test_file_info_reports_metadata() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let result = file_info(json!({"path": "a.txt"}), &ctx_in(&dir)).await;
        assert!(!result.is_error);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["data"]["kind"], "file");
        assert_eq!(parsed["data"]["size_bytes"], 5);
        assert!(parsed["data"]["modified"].is_string());
    }
}
