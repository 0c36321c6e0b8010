//! Shell command execution with bounded output capture and streaming.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, timeout};

use crate::tools::context::ToolOutputChunk;
use crate::tools::truncation;
use crate::tools::{parse_params, ToolContext, ToolResult};

const MAX_OUTPUT_LINES: usize = 2000;
const MAX_OUTPUT_BYTES: usize = 50_000;

// Bounded raw capture for foreground execution. Final model output is
// additionally truncated after ANSI stripping.
const RAW_CAPTURE_MAX_LINES: usize = 8_000;
const RAW_CAPTURE_MAX_BYTES: usize = 2_000_000;
const READER_JOIN_TIMEOUT_MS: u64 = 2_000;
const TIMEOUT_KILL_GRACE_MS: u64 = 800;

/// Default command timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300;
const MAX_TIMEOUT_SECS: u64 = 600;

#[derive(Deserialize)]
struct Params {
    command: String,
    #[serde(default)]
    working_dir: Option<String>,
    #[serde(default)]
    timeout: Option<u64>,
}

#[derive(Clone)]
struct StreamContext {
    output_tx: mpsc::UnboundedSender<ToolOutputChunk>,
    tool_use_id: String,
}

struct BoundedOutputBuffer {
    lines: VecDeque<String>,
    total_bytes: usize,
    dropped_lines: usize,
    max_lines: usize,
    max_bytes: usize,
}

impl BoundedOutputBuffer {
    fn new(max_lines: usize, max_bytes: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            total_bytes: 0,
            dropped_lines: 0,
            max_lines,
            max_bytes,
        }
    }

    fn push_line(&mut self, line: &str) {
        let mut kept = line.to_string();
        if kept.len() > self.max_bytes {
            kept = tail_by_bytes(&kept, self.max_bytes);
        }

        self.total_bytes = self.total_bytes.saturating_add(kept.len());
        self.lines.push_back(kept);

        while self.lines.len() > self.max_lines || self.total_bytes > self.max_bytes {
            if let Some(removed) = self.lines.pop_front() {
                self.total_bytes = self.total_bytes.saturating_sub(removed.len());
                self.dropped_lines = self.dropped_lines.saturating_add(1);
            } else {
                break;
            }
        }
    }

    fn into_text(self) -> String {
        let mut out = self.lines.into_iter().collect::<Vec<_>>().join("\n");
        if self.dropped_lines > 0 {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!(
                "[... omitted {} earlier line(s) due to buffer limits ...]",
                self.dropped_lines
            ));
        }
        out
    }
}

/// Keep the tail of a string within `max_bytes`, preserving UTF-8 boundaries.
fn tail_by_bytes(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }

    let mut start = text.len().saturating_sub(max_bytes);
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

fn strip_ansi(text: &str) -> String {
    static ANSI_RE: once_cell::sync::Lazy<regex::Regex> = once_cell::sync::Lazy::new(|| {
        regex::Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]|\x1b\][^\x07]*\x07|\x1b\[[\?0-9;]*[a-zA-Z]")
            .expect("valid regex")
    });
    ANSI_RE.replace_all(text, "").into_owned()
}

fn build_shell_command(command: &str, working_dir: &std::path::Path) -> Command {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    };

    cmd.env("NO_COLOR", "1");
    cmd.current_dir(working_dir);
    cmd
}

fn configure_foreground_process_group(cmd: &mut Command) {
    #[cfg(unix)]
    {
        cmd.process_group(0);
    }
}

async fn collect_pipe_output<R>(
    pipe: Option<R>,
    stream: Option<StreamContext>,
    buffer: Arc<Mutex<BoundedOutputBuffer>>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(pipe) = pipe else {
        return;
    };

    let mut reader = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = reader.next_line().await {
        if let Some(stream) = &stream {
            let _ = stream.output_tx.send(ToolOutputChunk {
                tool_use_id: stream.tool_use_id.clone(),
                chunk: format!("{}\n", line),
                is_complete: false,
                exit_code: None,
            });
        }

        buffer.lock().await.push_line(&line);
    }
}

async fn join_reader_with_timeout(mut handle: tokio::task::JoinHandle<()>) {
    if timeout(Duration::from_millis(READER_JOIN_TIMEOUT_MS), &mut handle)
        .await
        .is_err()
    {
        handle.abort();
    }

    let _ = handle.await;
}

#[cfg(unix)]
async fn terminate_unix_process_tree(pid: u32) {
    let pgid = format!("-{}", pid);

    let group_term_ok = std::process::Command::new("kill")
        .arg("-TERM")
        .arg(&pgid)
        .status()
        .map(|s| s.success())
        .unwrap_or(false);

    if !group_term_ok {
        let _ = std::process::Command::new("kill")
            .arg("-TERM")
            .arg(pid.to_string())
            .status();
    }

    sleep(Duration::from_millis(200)).await;

    let still_running = std::process::Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .status()
        .map(|s| s.success())
        .unwrap_or(false);

    if still_running {
        let _ = std::process::Command::new("kill")
            .arg("-KILL")
            .arg(&pgid)
            .status();
        let _ = std::process::Command::new("kill")
            .arg("-KILL")
            .arg(pid.to_string())
            .status();
    }
}

#[cfg(windows)]
async fn terminate_windows_process_tree(pid: u32) {
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .output();
}

async fn terminate_process_tree(child: &mut Child) {
    let Some(pid) = child.id() else {
        let _ = child.kill().await;
        return;
    };

    #[cfg(unix)]
    terminate_unix_process_tree(pid).await;

    #[cfg(windows)]
    terminate_windows_process_tree(pid).await;

    if timeout(Duration::from_millis(TIMEOUT_KILL_GRACE_MS), child.wait())
        .await
        .is_err()
    {
        let _ = child.kill().await;
        let _ = child.wait().await;
    }
}

pub async fn execute_command(params: Value, ctx: &ToolContext) -> ToolResult {
    let params = match parse_params::<Params>(params) {
        Ok(p) => p,
        Err(e) => return e,
    };

    tracing::info!(command = %params.command, "executing shell command");

    let working_dir = match &params.working_dir {
        Some(dir) => match ctx.sandboxed_resolve(dir) {
            Ok(p) if p.is_dir() => p,
            Ok(p) => {
                return ToolResult::error(format!("Not a directory: {}", p.display()));
            }
            Err(e) => return ToolResult::error(e),
        },
        None => {
            // Working directory itself must sit inside the workspace.
            if let Some(ref sandbox) = ctx.sandbox_root {
                match ctx.working_dir.canonicalize() {
                    Ok(c) if c.starts_with(sandbox) => c,
                    Ok(_) => {
                        return ToolResult::error(
                            "Access denied: working directory is outside workspace",
                        )
                    }
                    Err(_) => {
                        return ToolResult::error(
                            "Access denied: cannot verify working directory",
                        )
                    }
                }
            } else {
                ctx.working_dir.clone()
            }
        }
    };

    let mut cmd = build_shell_command(&params.command, &working_dir);
    configure_foreground_process_group(&mut cmd);
    cmd.kill_on_drop(true);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let timeout_secs = params
        .timeout
        .unwrap_or(DEFAULT_TIMEOUT_SECS)
        .min(MAX_TIMEOUT_SECS);
    let timeout_duration = Duration::from_secs(timeout_secs);

    let stream = match (ctx.output_tx.as_ref(), ctx.tool_use_id.as_ref()) {
        (Some(tx), Some(id)) => Some(StreamContext {
            output_tx: tx.clone(),
            tool_use_id: id.clone(),
        }),
        _ => None,
    };

    execute_foreground(cmd, timeout_duration, stream).await
}

async fn execute_foreground(
    mut cmd: Command,
    timeout_duration: Duration,
    stream: Option<StreamContext>,
) -> ToolResult {
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => return ToolResult::error(format!("Failed to spawn command: {}", e)),
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let buffer = Arc::new(Mutex::new(BoundedOutputBuffer::new(
        RAW_CAPTURE_MAX_LINES,
        RAW_CAPTURE_MAX_BYTES,
    )));

    let stdout_handle = tokio::spawn(collect_pipe_output(
        stdout,
        stream.clone(),
        Arc::clone(&buffer),
    ));
    let stderr_handle = tokio::spawn(collect_pipe_output(
        stderr,
        stream.clone(),
        Arc::clone(&buffer),
    ));

    let wait_result = timeout(timeout_duration, child.wait()).await;
    let (exit_code, killed, timed_out) = match wait_result {
        Ok(Ok(status)) => {
            if let Some(code) = status.code() {
                (code, false, false)
            } else {
                #[cfg(unix)]
                {
                    use std::os::unix::process::ExitStatusExt;
                    match status.signal() {
                        Some(2) | Some(15) => (0, false, false),
                        Some(sig) => (128 + sig, false, false),
                        None => (-1, false, false),
                    }
                }
                #[cfg(not(unix))]
                {
                    (-1, false, false)
                }
            }
        }
        Ok(Err(e)) => {
            tracing::error!("process wait error: {}", e);
            (-1, false, false)
        }
        Err(_) => {
            terminate_process_tree(&mut child).await;
            (-1, true, true)
        }
    };

    join_reader_with_timeout(stdout_handle).await;
    join_reader_with_timeout(stderr_handle).await;

    let combined_output = {
        let mut guard = buffer.lock().await;
        let captured = std::mem::replace(
            &mut *guard,
            BoundedOutputBuffer::new(RAW_CAPTURE_MAX_LINES, RAW_CAPTURE_MAX_BYTES),
        );
        captured.into_text()
    };

    if let Some(stream) = &stream {
        let _ = stream.output_tx.send(ToolOutputChunk {
            tool_use_id: stream.tool_use_id.clone(),
            chunk: String::new(),
            is_complete: true,
            exit_code: Some(exit_code),
        });
    }

    let processed = process_output(combined_output);
    let metadata = Some(json!({
        "exit_code": exit_code,
        "killed": killed,
    }));

    if timed_out {
        ToolResult::error_with_details(
            "timeout",
            format!(
                "Command timed out after {} seconds",
                timeout_duration.as_secs()
            ),
            Some(json!({ "output": processed })),
            metadata,
        )
    } else if exit_code == 0 {
        ToolResult::success_data_with(json!({ "output": processed }), Vec::new(), None, metadata)
    } else {
        ToolResult::error_with_details(
            "command_failed",
            format!("Command exited with code {}", exit_code),
            Some(json!({ "output": processed })),
            metadata,
        )
    }
}

/// Apply ANSI stripping and truncation to the final output sent to the model.
fn process_output(combined: String) -> String {
    let stripped = strip_ansi(&combined);
    let result = truncation::truncate_tail(&stripped, MAX_OUTPUT_LINES, MAX_OUTPUT_BYTES);
    if let Some(notice) = result.notice() {
        format!("{}{}", result.text, notice)
    } else {
        result.text
    }
}
