//! Repeated tool failure detection.
//!
//! The loop stops when the same tool keeps failing the same way with the
//! same arguments, instead of letting the model retry forever. Any success
//! clears the counters since the agent has recovered.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::ai::types::{AiToolCall, Content};
use crate::tools::result::classify_error_code;

/// Stop after this many identical failures.
pub const REPEATED_FAILURE_THRESHOLD: usize = 2;

pub(crate) fn detect_repeated_failures(
    counters: &mut HashMap<String, usize>,
    tool_calls: &[AiToolCall],
    tool_results: &[Content],
) -> Option<String> {
    let mut call_meta: HashMap<&str, (&str, String)> = HashMap::new();
    for call in tool_calls {
        call_meta.insert(
            call.id.as_str(),
            (call.name.as_str(), hash_arguments(&call.arguments)),
        );
    }

    let mut saw_success = false;
    let mut diagnostic = None;

    for result in tool_results {
        let Content::ToolResult {
            tool_use_id,
            output,
            is_error,
        } = result
        else {
            continue;
        };

        if !is_error.unwrap_or(false) {
            saw_success = true;
            continue;
        }

        let Some((tool_name, args_hash)) = call_meta.get(tool_use_id.as_str()) else {
            continue;
        };

        let output_str = match output {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let (code, fingerprint) = error_signature(&output_str);
        let signature = format!("{tool_name}|{code}|{fingerprint}|{args_hash}");
        let count = counters
            .entry(signature)
            .and_modify(|c| *c += 1)
            .or_insert(1);

        if *count >= REPEATED_FAILURE_THRESHOLD && diagnostic.is_none() {
            diagnostic = Some(format!(
                "Stopping: '{tool_name}' failed {count} times with the same '{code}' error. \
                 A different approach is needed."
            ));
        }
    }

    if saw_success {
        counters.clear();
    }

    diagnostic
}

fn hash_arguments(arguments: &serde_json::Value) -> String {
    let digest = Sha256::digest(arguments.to_string().as_bytes());
    hex_prefix(&digest, 8)
}

fn hex_prefix(bytes: &[u8], n: usize) -> String {
    bytes
        .iter()
        .take(n)
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Pull `(code, fingerprint)` from a result envelope, falling back to
/// message classification for plain-text output.
fn error_signature(output: &str) -> (String, String) {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(output) {
        if let Some(error) = value.get("error").and_then(|e| e.as_object()) {
            let message = error
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let code = error
                .get("code")
                .and_then(|v| v.as_str())
                .filter(|c| !c.is_empty())
                .map(|c| c.to_ascii_lowercase())
                .unwrap_or_else(|| classify_error_code(message).to_string());
            return (code, fingerprint(message));
        }
    }
    (classify_error_code(output).to_string(), fingerprint(output))
}

fn fingerprint(message: &str) -> String {
    let mut compact = message
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if compact.is_empty() {
        return "unknown".to_string();
    }
    compact.make_ascii_lowercase();
    compact.chars().take(160).collect()
}
