//! Pre-write content validation.
//!
//! Structured formats (JSON, YAML, TOML) are parse-checked before a write is
//! committed, so a bad generation never clobbers a good file. Oversized and
//! binary content skips validation by policy.

use std::path::Path;

/// Content larger than this is written without validation.
const MAX_VALIDATION_BYTES: usize = 1024 * 1024;

/// Outcome of validating content for a target path.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    /// Content is valid, or the format has no validator.
    Ok,
    /// Validation was skipped (size or binary content).
    Skipped(&'static str),
    /// Content failed to parse.
    Failed { message: String },
}

impl Validation {
    pub fn failure_message(&self) -> Option<&str> {
        match self {
            Validation::Failed { message } => Some(message),
            _ => None,
        }
    }
}

/// Validate `content` against the format implied by the path's extension.
pub fn validate_content(path: &Path, content: &str) -> Validation {
    if content.len() > MAX_VALIDATION_BYTES {
        return Validation::Skipped("content too large");
    }
    if content.contains('\0') {
        return Validation::Skipped("binary content");
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("json") => check(serde_json::from_str::<serde_json::Value>(content), "JSON"),
        Some("yaml") | Some("yml") => {
            check(serde_yaml::from_str::<serde_yaml::Value>(content), "YAML")
        }
        Some("toml") => check(content.parse::<toml::Value>(), "TOML"),
        _ => Validation::Ok,
    }
}

fn check<T, E: std::fmt::Display>(result: Result<T, E>, format: &str) -> Validation {
    match result {
        Ok(_) => Validation::Ok,
        Err(e) => Validation::Failed {
            message: format!("validation failed: invalid {format}: {e}"),
        },
    }
}
