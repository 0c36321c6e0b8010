//! Runs delegated subagent tasks in parallel.
//!
//! Each subagent is a bounded agent loop with a restricted toolset and no
//! approval prompts; the delegation itself is what the user approved.
//! Dangerous shell commands are still hard-denied. A semaphore caps
//! concurrency, a liveness watchdog catches stuck runs, a cancellation
//! token from the parent aborts in-flight runs, and completed runs are
//! cached so identical delegations are answered without re-running.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::failure;
use crate::agent::loop_events::{CompletionReason, LoopEvent};
use crate::agent::stream;
use crate::ai::client::{ChatClient, ChatOptions};
use crate::ai::retry::{with_retry, RetryConfig};
use crate::ai::types::{Content, ModelMessage, Role};
use crate::executor::ActionExecutor;
use crate::permissions::safety;
use crate::tools::{builtin_tools, parse_params, ActionKind, ToolContext, ToolResult};

const DEFAULT_MAX_CONCURRENT: usize = 3;
/// Hard ceiling on any subagent's iterations, whatever the task asks for.
const GLOBAL_ITERATION_CAP: usize = 50;
const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(300);
/// A run with no stream or tool activity for this long is stuck.
const LIVENESS_WINDOW: Duration = Duration::from_secs(90);

use super::cache::SubagentCache;
use super::types::{SubagentResult, SubagentTask};

#[derive(serde::Deserialize)]
struct DelegateParams {
    tasks: Vec<SubagentTask>,
}

pub struct SubagentManager {
    client: Arc<dyn ChatClient>,
    base_context: ToolContext,
    options: ChatOptions,
    semaphore: Arc<Semaphore>,
    cache: SubagentCache,
    retry: RetryConfig,
    liveness_window: Duration,
}

impl SubagentManager {
    pub fn new(client: Arc<dyn ChatClient>, base_context: ToolContext, options: ChatOptions) -> Self {
        Self {
            client,
            base_context,
            options,
            semaphore: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT)),
            cache: SubagentCache::default(),
            retry: RetryConfig::default(),
            liveness_window: LIVENESS_WINDOW,
        }
    }

    pub fn with_liveness_window(mut self, window: Duration) -> Self {
        self.liveness_window = window;
        self
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Handle a `delegate_task` call end to end, returning the envelope the
    /// model sees.
    pub async fn handle_delegate(
        &self,
        params: Value,
        event_tx: &mpsc::UnboundedSender<LoopEvent>,
        cancel: &CancellationToken,
    ) -> ToolResult {
        let params = match parse_params::<DelegateParams>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        if params.tasks.is_empty() {
            return ToolResult::invalid_parameters("delegate_task requires at least one task");
        }
        for task in &params.tasks {
            if let Err(msg) = task.validate() {
                return ToolResult::invalid_parameters(msg);
            }
        }

        let results = self.run_parallel(params.tasks, event_tx, cancel).await;
        let any_failed = results.iter().any(|r| !r.success);
        let data = json!({
            "results": results,
            "all_succeeded": !any_failed,
        });
        let warnings = if any_failed {
            vec!["one or more subagent tasks did not complete".to_string()]
        } else {
            Vec::new()
        };
        ToolResult::success_data_with(data, warnings, None, None)
    }

    /// Run tasks concurrently, results in input order. A panicking or
    /// failing task becomes a failure result without affecting the others.
    pub async fn run_parallel(
        &self,
        tasks: Vec<SubagentTask>,
        event_tx: &mpsc::UnboundedSender<LoopEvent>,
        cancel: &CancellationToken,
    ) -> Vec<SubagentResult> {
        info!(tasks = tasks.len(), "running delegated tasks");
        let futures = tasks
            .into_iter()
            .map(|task| self.run_one(task, event_tx.clone(), cancel.clone()))
            .collect::<Vec<_>>();
        join_all(futures).await
    }

    async fn run_one(
        &self,
        task: SubagentTask,
        event_tx: mpsc::UnboundedSender<LoopEvent>,
        cancel: CancellationToken,
    ) -> SubagentResult {
        let cache_key = SubagentCache::key(task.kind, &task.task, &self.options.model);
        if let Some(hit) = self.cache.get(&cache_key) {
            info!(task = %task.name, "subagent cache hit");
            let mut hit = hit;
            hit.name = task.name.clone();
            return hit;
        }

        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return SubagentResult::failure(
                    &task,
                    CompletionReason::Failed,
                    "subagent scheduler shut down".to_string(),
                )
            }
        };

        let _ = event_tx.send(LoopEvent::SubagentStarted {
            name: task.name.clone(),
            kind: task.kind.name().to_string(),
        });

        let started = Instant::now();
        let deadline = task
            .timeout
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TASK_TIMEOUT);
        let last_activity = Arc::new(Mutex::new(Instant::now()));

        let run = self.run_loop(&task, Arc::clone(&last_activity));
        let result = tokio::select! {
            outcome = tokio::time::timeout(deadline, run) => match outcome {
                Ok(result) => result,
                Err(_) => SubagentResult::failure(
                    &task,
                    CompletionReason::Failed,
                    format!("timed out after {} seconds", deadline.as_secs()),
                ),
            },
            reason = watchdog(Arc::clone(&last_activity), self.liveness_window) => {
                SubagentResult::failure(&task, CompletionReason::Stuck, reason)
            }
            _ = cancel.cancelled() => SubagentResult::failure(
                &task,
                CompletionReason::Interrupted,
                "cancelled by user interrupt".to_string(),
            ),
        };
        drop(permit);

        let mut result = result;
        result.duration_ms = started.elapsed().as_millis() as u64;

        if result.completion == CompletionReason::Completed {
            self.cache.store(cache_key, result.clone());
        }

        let _ = event_tx.send(LoopEvent::SubagentFinished {
            name: task.name.clone(),
            success: result.success,
        });
        result
    }

    /// The bounded inner agent loop for one task.
    async fn run_loop(
        &self,
        task: &SubagentTask,
        last_activity: Arc<Mutex<Instant>>,
    ) -> SubagentResult {
        let executor = ActionExecutor::new(self.base_context.clone());
        // Subagents never get delegate_task, so delegation cannot nest.
        let allowed = task.kind.allowed_tools().unwrap_or_else(|| {
            ActionKind::all()
                .iter()
                .copied()
                .filter(|kind| *kind != ActionKind::DelegateTask && *kind != ActionKind::McpTool)
                .collect()
        });
        let tools = builtin_tools(Some(&allowed));
        let max_iterations = task.effective_max_iterations(GLOBAL_ITERATION_CAP);

        let mut messages = vec![
            ModelMessage::text(Role::System, task.kind.system_prompt()),
            ModelMessage::text(Role::User, task.task.clone()),
        ];
        let mut failure_counters: HashMap<String, usize> = HashMap::new();
        let mut final_text = String::new();

        // Events from the inner loop are consumed for liveness tracking
        // only; the parent surfaces subagent lifecycle, not its chatter.
        let (inner_tx, mut inner_rx) = mpsc::unbounded_channel::<LoopEvent>();
        let liveness = Arc::clone(&last_activity);
        let drain = tokio::spawn(async move {
            while inner_rx.recv().await.is_some() {
                *liveness.lock() = Instant::now();
            }
        });

        let mut completion = CompletionReason::IterationCapReached;
        let mut iterations = 0usize;

        for iteration in 1..=max_iterations {
            iterations = iteration;

            let api_rx = match with_retry(&self.retry, || {
                self.client.call_streaming(&messages, &tools, &self.options)
            })
            .await
            {
                Ok(rx) => rx,
                Err(e) => {
                    completion = CompletionReason::Failed;
                    final_text = format!("model call failed: {e}");
                    break;
                }
            };

            let result = stream::process_stream(api_rx, &inner_tx).await;
            *last_activity.lock() = Instant::now();

            if result.errored && result.tool_calls.is_empty() && result.text.is_empty() {
                completion = CompletionReason::Failed;
                final_text = "model stream failed".to_string();
                break;
            }

            if !result.text.is_empty() {
                final_text = result.text.clone();
            }
            messages.push(assistant_message(&result.text, &result.tool_calls));

            if result.tool_calls.is_empty() {
                completion = CompletionReason::Completed;
                break;
            }

            let mut outputs = Vec::with_capacity(result.tool_calls.len());
            for call in &result.tool_calls {
                let tool_result = self.execute_checked(&executor, &call.name, &call.arguments).await;
                *last_activity.lock() = Instant::now();
                outputs.push(Content::ToolResult {
                    tool_use_id: call.id.clone(),
                    output: Value::String(tool_result.output),
                    is_error: if tool_result.is_error {
                        Some(true)
                    } else {
                        None
                    },
                });
            }

            let diagnostic = failure::detect_repeated_failures(
                &mut failure_counters,
                &result.tool_calls,
                &outputs,
            );
            messages.push(ModelMessage {
                role: Role::User,
                content: outputs,
            });

            if let Some(diagnostic) = diagnostic {
                warn!(task = %task.name, %diagnostic, "subagent fail-fast");
                completion = CompletionReason::Failed;
                final_text = diagnostic;
                break;
            }
        }

        drop(inner_tx);
        let _ = drain.await;

        SubagentResult {
            name: task.name.clone(),
            kind: task.kind.name().to_string(),
            success: completion == CompletionReason::Completed,
            completion,
            summary: final_text,
            iterations,
            duration_ms: 0,
            cached: false,
        }
    }

    /// Execute one call, still enforcing the dangerous-command screen even
    /// though subagents skip approval prompts.
    async fn execute_checked(
        &self,
        executor: &ActionExecutor,
        name: &str,
        arguments: &Value,
    ) -> ToolResult {
        if ActionKind::from_tool_name(name) == Some(ActionKind::ExecuteCommand) {
            if let Some(command) = arguments.get("command").and_then(|v| v.as_str()) {
                if let Some(reason) = safety::dangerous_command(command) {
                    return ToolResult::error_with_code(
                        "permission_denied",
                        format!("Action denied by policy: dangerous command: {reason}"),
                    );
                }
            }
        }
        executor.execute(name, arguments.clone()).await
    }
}

async fn watchdog(last_activity: Arc<Mutex<Instant>>, window: Duration) -> String {
    let mut interval = tokio::time::interval((window / 4).max(Duration::from_millis(10)));
    loop {
        interval.tick().await;
        let idle = last_activity.lock().elapsed();
        if idle > window {
            return format!("no activity for {} seconds", idle.as_secs());
        }
    }
}

fn assistant_message(text: &str, tool_calls: &[crate::ai::types::AiToolCall]) -> ModelMessage {
    let mut content = Vec::new();
    if !text.is_empty() {
        content.push(Content::Text {
            text: text.to_string(),
        });
    }
    for call in tool_calls {
        content.push(Content::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.arguments.clone(),
        });
    }
    ModelMessage {
        role: Role::Assistant,
        content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::client::{ApiEvent, ProviderError};
    use crate::ai::types::{AiTool, AiToolCall, FinishReason};
    use async_trait::async_trait;

    /// Answers the first call with a tool call, then finishes with text.
    struct ScriptedClient {
        calls: std::sync::atomic::AtomicUsize,
    }

    impl ScriptedClient {
        fn new() -> Self {
            Self {
                calls: std::sync::atomic::AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatClient for ScriptedClient {
        async fn call_streaming(
            &self,
            _messages: &[ModelMessage],
            _tools: &[AiTool],
            _options: &ChatOptions,
        ) -> Result<mpsc::UnboundedReceiver<ApiEvent>, ProviderError> {
            let call_index = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let (tx, rx) = mpsc::unbounded_channel();
            if call_index == 0 {
                tx.send(ApiEvent::Finish {
                    reason: FinishReason::ToolCalls,
                    tool_calls: vec![AiToolCall {
                        id: "call_1".to_string(),
                        name: "list_directory".to_string(),
                        arguments: json!({}),
                    }],
                    usage: None,
                })
                .ok();
            } else {
                tx.send(ApiEvent::TextDelta("all done".to_string())).ok();
                tx.send(ApiEvent::Finish {
                    reason: FinishReason::Stop,
                    tool_calls: Vec::new(),
                    usage: None,
                })
                .ok();
            }
            Ok(rx)
        }

        async fn complete_text(
            &self,
            _system: &str,
            _user: &str,
            _options: &ChatOptions,
        ) -> Result<String, ProviderError> {
            Ok(String::new())
        }
    }

    /// Finishes immediately unless the task text contains "stall", in which
    /// case the stream stays open and silent forever.
    struct StallingClient {
        held: parking_lot::Mutex<Vec<mpsc::UnboundedSender<ApiEvent>>>,
    }

    impl StallingClient {
        fn new() -> Self {
            Self {
                held: parking_lot::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatClient for StallingClient {
        async fn call_streaming(
            &self,
            messages: &[ModelMessage],
            _tools: &[AiTool],
            _options: &ChatOptions,
        ) -> Result<mpsc::UnboundedReceiver<ApiEvent>, ProviderError> {
            let stall = messages.iter().any(|m| {
                m.content.iter().any(
                    |c| matches!(c, Content::Text { text } if text.contains("stall")),
                )
            });
            let (tx, rx) = mpsc::unbounded_channel();
            if stall {
                self.held.lock().push(tx);
            } else {
                tx.send(ApiEvent::TextDelta("ok".to_string())).ok();
                tx.send(ApiEvent::Finish {
                    reason: FinishReason::Stop,
                    tool_calls: Vec::new(),
                    usage: None,
                })
                .ok();
            }
            Ok(rx)
        }

        async fn complete_text(
            &self,
            _system: &str,
            _user: &str,
            _options: &ChatOptions,
        ) -> Result<String, ProviderError> {
            Ok(String::new())
        }
    }

    fn manager_in(dir: &tempfile::TempDir, client: Arc<dyn ChatClient>) -> SubagentManager {
        let root = dir.path().canonicalize().unwrap();
        let ctx = ToolContext::new(root.clone()).with_sandbox(root);
        SubagentManager::new(client, ctx, ChatOptions::default())
    }

    #[tokio::test]
    async fn test_runs_task_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir, Arc::new(ScriptedClient::new()));
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        let result = manager
            .handle_delegate(
                json!({"tasks": [{"name": "survey", "task": "list the workspace"}]}),
                &event_tx,
                &CancellationToken::new(),
            )
            .await;
        assert!(!result.is_error);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["data"]["all_succeeded"], true);
        assert_eq!(parsed["data"]["results"][0]["summary"], "all done");

        let mut started = false;
        let mut finished = false;
        while let Ok(event) = event_rx.try_recv() {
            match event {
                LoopEvent::SubagentStarted { .. } => started = true,
                LoopEvent::SubagentFinished { success, .. } => finished = success,
                _ => {}
            }
        }
        assert!(started && finished);
    }

    #[tokio::test]
    async fn test_results_preserve_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir, Arc::new(ScriptedClient::new()));
        let (event_tx, _event_rx) = mpsc::unbounded_channel();

        let tasks: Vec<SubagentTask> = serde_json::from_value(json!([
            {"name": "alpha", "task": "first"},
            {"name": "beta", "task": "second"},
            {"name": "gamma", "task": "third"}
        ]))
        .unwrap();
        let results = manager
            .run_parallel(tasks, &event_tx, &CancellationToken::new())
            .await;
        let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn test_empty_task_list_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir, Arc::new(ScriptedClient::new()));
        let (event_tx, _event_rx) = mpsc::unbounded_channel();

        let result = manager
            .handle_delegate(json!({"tasks": []}), &event_tx, &CancellationToken::new())
            .await;
        assert!(result.is_error);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["error"]["code"], "invalid_parameters");
    }

    #[tokio::test]
    async fn test_identical_delegation_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir, Arc::new(ScriptedClient::new()));
        let (event_tx, _event_rx) = mpsc::unbounded_channel();

        let params = json!({"tasks": [{"name": "survey", "task": "list the workspace"}]});
        let first = manager
            .handle_delegate(params.clone(), &event_tx, &CancellationToken::new())
            .await;
        let parsed: Value = serde_json::from_str(&first.output).unwrap();
        assert_eq!(parsed["data"]["results"][0]["cached"], false);

        let second = manager
            .handle_delegate(params, &event_tx, &CancellationToken::new())
            .await;
        let parsed: Value = serde_json::from_str(&second.output).unwrap();
        assert_eq!(parsed["data"]["results"][0]["cached"], true);
    }

    #[tokio::test]
    async fn test_stalled_task_reported_stuck_without_harming_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir, Arc::new(StallingClient::new()))
            .with_liveness_window(Duration::from_millis(100));
        let (event_tx, _event_rx) = mpsc::unbounded_channel();

        let tasks: Vec<SubagentTask> = serde_json::from_value(json!([
            {"name": "first", "task": "quick question"},
            {"name": "hung", "task": "stall on this"},
            {"name": "last", "task": "another quick one"}
        ]))
        .unwrap();
        let results = manager
            .run_parallel(tasks, &event_tx, &CancellationToken::new())
            .await;

        let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["first", "hung", "last"]);
        assert!(results[0].success);
        assert!(results[2].success);
        assert!(!results[1].success);
        assert_eq!(results[1].completion, CompletionReason::Stuck);
        assert!(results[1].summary.contains("no activity"));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_running_task() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir, Arc::new(StallingClient::new()));
        let (event_tx, _event_rx) = mpsc::unbounded_channel();

        let cancel = CancellationToken::new();
        let tasks: Vec<SubagentTask> = serde_json::from_value(json!([
            {"name": "worker", "task": "stall until cancelled"}
        ]))
        .unwrap();

        let run = manager.run_parallel(tasks, &event_tx, &cancel);
        tokio::pin!(run);
        let results = tokio::select! {
            results = &mut run => results,
            _ = tokio::time::sleep(Duration::from_millis(50)) => {
                cancel.cancel();
                run.await
            }
        };

        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(results[0].completion, CompletionReason::Interrupted);
    }

    #[tokio::test]
    async fn test_dangerous_command_denied_in_subagent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir, Arc::new(ScriptedClient::new()));
        let executor = ActionExecutor::new(manager.base_context.clone());
        let result = manager
            .execute_checked(&executor, "execute_command", &json!({"command": "rm -rf /"}))
            .await;
        assert!(result.is_error);
        let parsed: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed["error"]["code"], "permission_denied");
    }
}
