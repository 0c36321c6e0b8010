//! Line-based file edits: insert, replace, delete, append.
//!
//! Targets a line either by 1-based number or by a case-insensitive
//! substring match. Replace touches the first matching line; delete removes
//! every matching line.

use serde::Deserialize;
use serde_json::{json, Value};
use similar::TextDiff;
use tokio::fs;

use crate::tools::{parse_params, ToolContext, ToolResult};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum EditOp {
    Insert,
    Replace,
    Delete,
    Append,
}

#[derive(Deserialize)]
struct Params {
    path: String,
    operation: EditOp,
    #[serde(default)]
    content: String,
    #[serde(default)]
    line_number: Option<usize>,
    #[serde(default)]
    pattern: Option<String>,
}

pub async fn edit_file(params: Value, ctx: &ToolContext) -> ToolResult {
    let params = match parse_params::<Params>(params) {
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

    let original = match fs::read_to_string(&path).await {
        Ok(c) => c,
        Err(e) => return ToolResult::error(format!("Failed to read {}: {e}", path.display())),
    };

    let mut lines: Vec<String> = original.lines().map(str::to_string).collect();
    let had_trailing_newline = original.ends_with('\n');

    let outcome = apply_edit(&mut lines, &params);
    if let Err(message) = outcome {
        return ToolResult::error(message);
    }

    let mut updated = lines.join("\n");
    if had_trailing_newline || params.operation == EditOp::Append {
        updated.push('\n');
    }

    if let Err(e) = fs::write(&path, &updated).await {
        return ToolResult::error(format!("Failed to write {}: {e}", path.display()));
    }

    let diff = TextDiff::from_lines(&original, &updated)
        .unified_diff()
        .context_radius(3)
        .to_string();

    ToolResult::success_data_with(
        json!({
            "message": format!("Successfully performed {:?} operation", params.operation)
                .to_lowercase(),
            "path": path.display().to_string(),
            "total_lines": updated.lines().count(),
        }),
        Vec::new(),
        Some(diff),
        None,
    )
}

fn apply_edit(lines: &mut Vec<String>, params: &Params) -> Result<(), String> {
    match params.operation {
        EditOp::Insert => {
            let line_number = params
                .line_number
                .ok_or("Line number required for insert operation")?;
            if line_number > lines.len() + 1 {
                return Err(format!(
                    "Invalid line number {line_number}. File has {} lines",
                    lines.len()
                ));
            }
            let idx = line_number.saturating_sub(1);
            lines.insert(idx, params.content.clone());
            Ok(())
        }
        EditOp::Replace => {
            if let Some(line_number) = params.line_number {
                let idx = line_number
                    .checked_sub(1)
                    .filter(|i| *i < lines.len())
                    .ok_or_else(|| {
                        format!(
                            "Invalid line number {line_number}. File has {} lines",
                            lines.len()
                        )
                    })?;
                lines[idx] = params.content.clone();
                Ok(())
            } else if let Some(pattern) = params.pattern.as_deref().filter(|p| !p.is_empty()) {
                let needle = pattern.to_lowercase();
                let idx = lines
                    .iter()
                    .position(|l| l.to_lowercase().contains(&needle))
                    .ok_or_else(|| format!("Pattern '{pattern}' not found in file"))?;
                lines[idx] = params.content.clone();
                Ok(())
            } else {
                Err("Either line_number or pattern is required for replace operation".into())
            }
        }
        EditOp::Delete => {
            if let Some(line_number) = params.line_number {
                let idx = line_number
                    .checked_sub(1)
                    .filter(|i| *i < lines.len())
                    .ok_or_else(|| {
                        format!(
                            "Invalid line number {line_number}. File has {} lines",
                            lines.len()
                        )
                    })?;
                lines.remove(idx);
                Ok(())
            } else if let Some(pattern) = params.pattern.as_deref().filter(|p| !p.is_empty()) {
                let needle = pattern.to_lowercase();
                let before = lines.len();
                lines.retain(|l| !l.to_lowercase().contains(&needle));
                if lines.len() == before {
                    return Err(format!("Pattern '{pattern}' not found in file"));
                }
                Ok(())
            } else {
                Err("Either line_number or pattern is required for delete operation".into())
            }
        }
        EditOp::Append => {
            lines.push(params.content.clone());
            Ok(())
        }
    }
}
