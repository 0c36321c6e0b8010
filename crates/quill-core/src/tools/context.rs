//! Execution context shared by all tool operations.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;

/// Output chunk from a streaming operation (shell commands).
#[derive(Debug, Clone)]
pub struct ToolOutputChunk {
    pub tool_use_id: String,
    pub chunk: String,
    pub is_complete: bool,
    pub exit_code: Option<i32>,
}

/// Context for tool execution
#[derive(Clone)]
pub struct ToolContext {
    pub working_dir: PathBuf,
    /// Workspace root for path isolation. If set, all file operations must
    /// resolve within this directory.
    pub sandbox_root: Option<PathBuf>,
    /// Optional per-call timeout override
    pub timeout: Option<Duration>,
    /// Channel for streaming output (used by the shell tool)
    pub output_tx: Option<mpsc::UnboundedSender<ToolOutputChunk>>,
    /// Tool use ID for streaming output
    pub tool_use_id: Option<String>,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            sandbox_root: None,
            timeout: None,
            output_tx: None,
            tool_use_id: None,
        }
    }
}

impl ToolContext {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            working_dir,
            ..Default::default()
        }
    }

    /// Set workspace root for path isolation.
    pub fn with_sandbox(mut self, sandbox_root: PathBuf) -> Self {
        self.sandbox_root = Some(sandbox_root);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Add streaming output channel to context
    pub fn with_output_stream(
        mut self,
        tx: mpsc::UnboundedSender<ToolOutputChunk>,
        tool_use_id: String,
    ) -> Self {
        self.output_tx = Some(tx);
        self.tool_use_id = Some(tool_use_id);
        self
    }

    /// Resolve a path relative to working directory (absolute paths pass through)
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = PathBuf::from(path);
        if p.is_absolute() {
            p
        } else {
            self.working_dir.join(p)
        }
    }

    /// Resolve an existing path with workspace enforcement.
    ///
    /// Canonicalizes to resolve symlinks and `..`, then checks the result is
    /// within the workspace root.
    pub fn sandboxed_resolve(&self, path: &str) -> Result<PathBuf, String> {
        let resolved = self.resolve_path(path);

        let Some(ref sandbox) = self.sandbox_root else {
            return Ok(resolved);
        };

        let canonical = resolved
            .canonicalize()
            .map_err(|e| format!("Invalid path '{}': {}", path, e))?;

        if !canonical.starts_with(sandbox) {
            return Err(format!(
                "Access denied: path '{}' is outside workspace",
                path
            ));
        }

        Ok(canonical)
    }

    /// Check if a path is within the workspace (for validation without resolving).
    pub fn is_path_allowed(&self, path: &Path) -> bool {
        let Some(ref sandbox) = self.sandbox_root else {
            return true;
        };
        path.canonicalize()
            .map(|p| p.starts_with(sandbox))
            .unwrap_or(false)
    }

    /// Resolve a path that may not exist yet (for write operations) with
    /// workspace enforcement.
    ///
    /// Finds the nearest existing ancestor, canonicalizes it, validates it is
    /// within the workspace, then appends the remaining components (which are
    /// verified to not contain traversal).
    pub fn sandboxed_resolve_new_path(&self, path: &str) -> Result<PathBuf, String> {
        let resolved = self.resolve_path(path);

        let Some(ref sandbox) = self.sandbox_root else {
            return Ok(resolved);
        };

        for component in resolved.components() {
            if matches!(component, Component::ParentDir) {
                return Err("Path traversal (..) not allowed".into());
            }
        }

        if resolved.exists() {
            let canonical = resolved
                .canonicalize()
                .map_err(|e| format!("Cannot resolve path: {}", e))?;
            if !canonical.starts_with(sandbox) {
                return Err("Access denied: path is outside workspace".into());
            }
            return Ok(canonical);
        }

        // Find nearest existing ancestor and canonicalize it
        let mut check = resolved;
        let mut suffix: Vec<std::ffi::OsString> = Vec::new();

        while !check.exists() {
            if let Some(name) = check.file_name() {
                suffix.push(name.to_owned());
            }
            if !check.pop() {
                break;
            }
        }

        let canonical_base = if check.as_os_str().is_empty() || !check.exists() {
            sandbox.clone()
        } else {
            check
                .canonicalize()
                .map_err(|e| format!("Cannot resolve path: {}", e))?
        };

        if !canonical_base.starts_with(sandbox) {
            return Err("Access denied: path is outside workspace".into());
        }

        let mut final_path = canonical_base;
        for component in suffix.into_iter().rev() {
            final_path.push(component);
        }

        Ok(final_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let ctx = ToolContext::default();
        assert!(ctx.sandbox_root.is_none());
        assert!(ctx.timeout.is_none());
        assert_eq!(
            ctx.working_dir,
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        );
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let ctx = ToolContext::new(PathBuf::from("/work"));
        assert_eq!(ctx.resolve_path("a/b.txt"), PathBuf::from("/work/a/b.txt"));
        assert_eq!(ctx.resolve_path("/etc/hosts"), PathBuf::from("/etc/hosts"));
    }

    #[test]
    fn test_new_path_rejects_traversal() {
        let ctx = ToolContext::new(PathBuf::from("/sandbox/project"))
            .with_sandbox(PathBuf::from("/sandbox"));

        let result = ctx.sandboxed_resolve_new_path("../../../etc/passwd");
        assert!(result.unwrap_err().contains("traversal"));

        let result = ctx.sandboxed_resolve_new_path("subdir/../../../etc/passwd");
        assert!(result.unwrap_err().contains("traversal"));
    }

    #[test]
    fn test_new_path_allows_valid_paths() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let ctx = ToolContext::new(root.clone()).with_sandbox(root);

        assert!(ctx.sandboxed_resolve_new_path("newfile.txt").is_ok());
        assert!(ctx
            .sandboxed_resolve_new_path("subdir/nested/file.txt")
            .is_ok());
    }

    #[test]
    fn test_resolve_rejects_escape_outside_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let ctx = ToolContext::new(root.clone()).with_sandbox(root.join("inner"));

        std::fs::create_dir(ctx.sandbox_root.as_ref().unwrap()).unwrap();
        std::fs::write(dir.path().join("secret.txt"), "x").unwrap();

        let result = ctx.sandboxed_resolve(dir.path().join("secret.txt").to_str().unwrap());
        assert!(result.unwrap_err().contains("outside workspace"));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        let outside = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let ctx = ToolContext::new(root.clone()).with_sandbox(root.clone());

        std::fs::write(outside.path().join("target.txt"), "x").unwrap();
        std::os::unix::fs::symlink(outside.path().join("target.txt"), root.join("link.txt"))
            .unwrap();

        let result = ctx.sandboxed_resolve("link.txt");
        assert!(result.unwrap_err().contains("outside workspace"));
    }

    #[test]
    fn test_no_sandbox_allows_everything() {
        let ctx = ToolContext::new(PathBuf::from("/home/user"));
        assert!(ctx.sandboxed_resolve_new_path("../other/file.txt").is_ok());
    }
}
