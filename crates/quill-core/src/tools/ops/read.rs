//! File reading operations.

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;

use crate::tools::{parse_params, ToolContext, ToolResult};

/// Default cap on lines returned from a single read.
const DEFAULT_READ_LIMIT: usize = 2000;

#[derive(Deserialize)]
struct ReadParams {
    path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct ReadManyParams {
    paths: Vec<String>,
}

pub async fn read_file(params: Value, ctx: &ToolContext) -> ToolResult {
    let params = match parse_params::<ReadParams>(params) {
        Ok(p) => p,
        Err(e) => return e,
    };
    read_one(&params.path, params.offset, params.limit, ctx)
        .await
        .unwrap_or_else(|e| e)
}

pub async fn read_files(params: Value, ctx: &ToolContext) -> ToolResult {
    let params = match parse_params::<ReadManyParams>(params) {
        Ok(p) => p,
        Err(e) => return e,
    };
    if params.paths.is_empty() {
        return ToolResult::invalid_parameters("Invalid parameters: 'paths' must not be empty");
    }

    let mut files = serde_json::Map::new();
    let mut warnings = Vec::new();
    for path in &params.paths {
        match read_one(path, None, None, ctx).await {
            Ok(result) => {
                let data: Value = serde_json::from_str(&result.output).unwrap_or(Value::Null);
                files.insert(path.clone(), data["data"].clone());
            }
            Err(err) => {
                let data: Value = serde_json::from_str(&err.output).unwrap_or(Value::Null);
                let message = data["error"]["message"]
                    .as_str()
                    .unwrap_or("read failed")
                    .to_string();
                warnings.push(format!("{path}: {message}"));
            }
        }
    }

    if files.is_empty() {
        return ToolResult::error_with_details(
            "tool_error",
            "No files could be read",
            Some(json!({"failures": warnings})),
            None,
        );
    }
    ToolResult::success_data_with(json!({ "files": files }), warnings, None, None)
}

async fn read_one(
    raw_path: &str,
    offset: Option<usize>,
    limit: Option<usize>,
    ctx: &ToolContext,
) -> Result<ToolResult, ToolResult> {
    let path = match ctx.sandboxed_resolve(raw_path) {
        Ok(p) => p,
        Err(e) => {
            let fallback = ctx.resolve_path(raw_path);
            if !fallback.exists() {
                return Err(ToolResult::error(format!("File not found: {raw_path}")));
            }
            return Err(ToolResult::error(e));
        }
    };

    if !path.is_file() {
        return Err(ToolResult::error(format!(
            "Path is not a file: {}",
            path.display()
        )));
    }

    let bytes = fs::read(&path)
        .await
        .map_err(|e| ToolResult::error(format!("Failed to read file: {e}")))?;

    // Binary detection over the leading chunk
    let check_len = bytes.len().min(8192);
    if bytes[..check_len].contains(&0) {
        let size = bytes.len();
        let size_str = match size {
            0..1024 => format!("{size} bytes"),
            1024..1_048_576 => format!("{:.1} KB", size as f64 / 1024.0),
            _ => format!("{:.1} MB", size as f64 / 1_048_576.0),
        };
        return Ok(ToolResult::success_data(json!({
            "content": format!("Binary file: {} ({})", path.display(), size_str),
            "total_lines": 0,
            "lines_returned": 0
        })));
    }

    let content = String::from_utf8(bytes)
        .map_err(|e| ToolResult::error(format!("File is not valid UTF-8: {e}")))?;

    let lines: Vec<&str> = content.lines().collect();
    let total_lines = lines.len();

    let start = offset.unwrap_or(1).saturating_sub(1);
    let limit = limit.unwrap_or(DEFAULT_READ_LIMIT);
    let end = (start + limit).min(total_lines);

    if start >= total_lines && total_lines > 0 {
        return Err(ToolResult::error(format!(
            "Start line {} is beyond file length ({})",
            start + 1,
            total_lines
        )));
    }

    Ok(ToolResult::success_data(json!({
        "content": lines[start..end].join("\n"),
        "total_lines": total_lines,
        "lines_returned": end - start,
        "start_line": start + 1
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx_in(dir: &tempfile::TempDir) -> ToolContext {
        let root = dir.path().canonicalize().unwrap();
        ToolContext::new(root.clone()).with_sandbox(root)
    }

    #[tokio::test]
    async fn test_read_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree").unwrap();
        let result = read_file(json!({"path": "a.txt"}), &ctx_in(&dir)).await;
        assert!(!result.is_error);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["data"]["content"], "one\ntwo\nthree");
        assert_eq!(parsed["data"]["total_lines"], 3);
    }

    #[tokio::test]
    async fn test_read_with_offset_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\nfour").unwrap();
        let result = read_file(json!({"path": "a.txt", "offset": 2, "limit": 2}), &ctx_in(&dir)).await;
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["data"]["content"], "two\nthree");
        assert_eq!(parsed["data"]["start_line"], 2);
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_file(json!({"path": "ghost.txt"}), &ctx_in(&dir)).await;
        assert!(result.is_error);
        assert!(result.output.contains("File not found"));
    }

    #[tokio::test]
    async fn test_read_binary_file_reports_size() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bin.dat"), [0u8, 1, 2, 3]).unwrap();
        let result = read_file(json!({"path": "bin.dat"}), &ctx_in(&dir)).await;
        assert!(!result.is_error);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert!(parsed["data"]["content"]
            .as_str()
            .unwrap()
            .starts_with("Binary file"));
    }

    #[tokio::test]
    async fn test_read_many_mixes_successes_and_warnings() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        let result = read_files(json!({"paths": ["a.txt", "missing.txt"]}), &ctx_in(&dir)).await;
        assert!(!result.is_error);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["data"]["files"]["a.txt"]["content"], "alpha");
        assert!(parsed["warnings"][0].as_str().unwrap().contains("missing.txt"));
    }
}
