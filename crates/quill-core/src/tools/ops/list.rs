//! Directory listing. Recursive walks respect .gitignore.

use ignore::WalkBuilder;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::{parse_params, ToolContext, ToolResult};

/// Cap on entries returned from a single listing.
const MAX_ENTRIES: usize = 2000;

#[derive(Deserialize)]
struct Params {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    recursive: bool,
}

pub async fn list_directory(params: Value, ctx: &ToolContext) -> ToolResult {
    let params = match parse_params::<Params>(params) {
        Ok(p) => p,
        Err(e) => return e,
    };

    let raw = params.path.as_deref().unwrap_or(".");
    let dir = match ctx.sandboxed_resolve(raw) {
        Ok(p) => p,
        Err(e) => return ToolResult::error(e),
    };
    if !dir.is_dir() {
        return ToolResult::error(format!("Path is not a directory: {}", dir.display()));
    }

    let mut entries = Vec::new();
    let mut truncated = false;

    if params.recursive {
        let walker = WalkBuilder::new(&dir)
            .hidden(false)
            .git_ignore(true)
            .git_global(false)
            .build();
        for entry in walker.flatten() {
            if entry.path() == dir {
                continue;
            }
            if entries.len() >= MAX_ENTRIES {
                truncated = true;
                break;
            }
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            let rel = entry
                .path()
                .strip_prefix(&dir)
                .unwrap_or(entry.path())
                .display()
                .to_string();
            entries.push(json!({
                "path": rel,
                "kind": if is_dir { "dir" } else { "file" },
            }));
        }
    } else {
        let read_dir = match std::fs::read_dir(&dir) {
            Ok(rd) => rd,
            Err(e) => return ToolResult::error(format!("Failed to list directory: {e}")),
        };
        for entry in read_dir.flatten() {
            if entries.len() >= MAX_ENTRIES {
                truncated = true;
                break;
            }
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            entries.push(json!({
                "path": entry.file_name().to_string_lossy(),
                "kind": if is_dir { "dir" } else { "file" },
            }));
        }
        entries.sort_by(|a, b| a["path"].as_str().cmp(&b["path"].as_str()));
    }

    let warnings = if truncated {
        vec![format!("listing truncated to {MAX_ENTRIES} entries")]
    } else {
        Vec::new()
    };

    ToolResult::success_data_with(
        json!({
            "path": dir.display().to_string(),
            "entries": entries,
        }),
        warnings,
        None,
        None,
    )
}
