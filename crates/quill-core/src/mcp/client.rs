//! Client for a single local MCP server over stdio.
//!
//! Messages are newline-delimited JSON. A background task reads the server's
//! stdout and routes responses to pending requests by id, so concurrent
//! requests cannot race on the stream.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, error, info};

use super::config::McpServerConfig;
use super::protocol::{
    ClientInfo, InitializeParams, InitializeResult, JsonRpcMessage, JsonRpcNotification,
    JsonRpcRequest, McpToolDef, ToolCallParams, ToolCallResult, ToolsListResult,
    PROTOCOL_VERSION,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Arc<RwLock<HashMap<i64, oneshot::Sender<Result<Value>>>>>;

pub struct McpClient {
    name: String,
    stdin: Mutex<ChildStdin>,
    child: Mutex<Child>,
    next_id: AtomicI64,
    pending: PendingMap,
    tools: RwLock<Vec<McpToolDef>>,
}

impl McpClient {
    /// Spawn the server process and start the receive loop. The connection
    /// is not usable until [`initialize`](Self::initialize) completes.
    pub async fn connect(name: &str, config: &McpServerConfig, working_dir: &Path) -> Result<Self> {
        info!(server = name, command = %config.command, "spawning MCP server");

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                anyhow!("command not found: {}", config.command)
            } else {
                anyhow!("failed to spawn {}: {e}", config.command)
            }
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("server stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("server stdout unavailable"))?;

        let pending: PendingMap = Arc::new(RwLock::new(HashMap::new()));
        tokio::spawn(receive_loop(
            name.to_string(),
            BufReader::new(stdout),
            Arc::clone(&pending),
        ));

        Ok(Self {
            name: name.to_string(),
            stdin: Mutex::new(stdin),
            child: Mutex::new(child),
            next_id: AtomicI64::new(1),
            pending,
            tools: RwLock::new(Vec::new()),
        })
    }

    /// Run the initialize handshake and fetch the tool list.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            client_info: ClientInfo {
                name: "quill".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        let result: InitializeResult = self
            .request("initialize", Some(serde_json::to_value(params)?))
            .await
            .with_context(|| format!("initialize failed for MCP server {}", self.name))?;

        self.notify("notifications/initialized", None).await?;
        info!(
            server = %self.name,
            protocol = %result.protocol_version,
            "MCP server initialized"
        );

        let tools: ToolsListResult = self.request("tools/list", None).await?;
        debug!(server = %self.name, tools = tools.tools.len(), "listed MCP tools");
        *self.tools.write().await = tools.tools;

        Ok(result)
    }

    pub async fn tools(&self) -> Vec<McpToolDef> {
        self.tools.read().await.clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn is_alive(&self) -> bool {
        matches!(self.child.lock().await.try_wait(), Ok(None))
    }

    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<ToolCallResult> {
        let params = ToolCallParams {
            name: tool.to_string(),
            arguments: if arguments.is_null() {
                None
            } else {
                Some(arguments)
            },
        };
        self.request("tools/call", Some(serde_json::to_value(params)?))
            .await
    }

    async fn request<R: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<R> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let json = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;

        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(id, tx);
        self.send_line(&json).await?;

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(Ok(value))) => Ok(serde_json::from_value(value)?),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(anyhow!("request cancelled")),
            Err(_) => {
                self.pending.write().await.remove(&id);
                Err(anyhow!(
                    "MCP request {method} timed out after {}s",
                    REQUEST_TIMEOUT.as_secs()
                ))
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = JsonRpcNotification {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
        };
        self.send_line(&serde_json::to_string(&notification)?).await
    }

    async fn send_line(&self, json: &str) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }
}

async fn receive_loop(
    name: String,
    mut stdout: BufReader<tokio::process::ChildStdout>,
    pending: PendingMap,
) {
    loop {
        let mut line = String::new();
        match stdout.read_line(&mut line).await {
            Ok(0) => {
                debug!(server = %name, "MCP server closed stdout");
                let mut pending = pending.write().await;
                for (_, tx) in pending.drain() {
                    let _ = tx.send(Err(anyhow!("connection to {name} lost")));
                }
                return;
            }
            Ok(_) => {
                let line = line.trim();
                // Servers sometimes print diagnostics on stdout; skip
                // anything that is not a JSON object.
                if line.is_empty() || !line.starts_with('{') {
                    continue;
                }
                let message: JsonRpcMessage = match serde_json::from_str(line) {
                    Ok(m) => m,
                    Err(e) => {
                        error!(server = %name, error = %e, "bad MCP message");
                        continue;
                    }
                };
                dispatch_message(&name, message, &pending).await;
            }
            Err(e) => {
                error!(server = %name, error = %e, "MCP read error");
                let mut pending = pending.write().await;
                for (_, tx) in pending.drain() {
                    let _ = tx.send(Err(anyhow!("connection to {name} lost")));
                }
                return;
            }
        }
    }
}

async fn dispatch_message(name: &str, message: JsonRpcMessage, pending: &PendingMap) {
    if let Some(id) = message.id {
        if let Some(tx) = pending.write().await.remove(&id) {
            let result = match message.error {
                Some(err) => Err(anyhow!("MCP error {}: {}", err.code, err.message)),
                None => Ok(message.result.unwrap_or(Value::Null)),
            };
            let _ = tx.send(result);
        }
    } else if let Some(method) = message.method {
        debug!(server = name, method, "ignoring MCP notification");
    }
}
