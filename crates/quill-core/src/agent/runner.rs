//! The agent loop.
//!
//! Streams a model response, executes the tool calls it requests, feeds the
//! results back, and repeats until the model stops calling tools or a limit
//! is hit. Consumers drive it through the [`LoopEvent`]/[`LoopInput`]
//! channel pair returned by [`AgentLoop::run`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::ai::client::{ChatClient, ChatOptions};
use crate::ai::retry::{with_retry, RetryConfig};
use crate::ai::types::{AiTool, Content, ModelMessage, Role};
use crate::executor::ActionExecutor;
use crate::mcp::McpManager;
use crate::permissions::PermissionManager;
use crate::tools::builtin_tools;

use super::batch;
use super::conversation::Conversation;
use super::failure;
use super::loop_events::{CompletionReason, LoopEvent, LoopInput};
use super::stream;
use super::subagent::SubagentManager;

const DEFAULT_MAX_ITERATIONS: usize = 100;
const DEFAULT_COMPACT_THRESHOLD_TOKENS: usize = 80_000;

pub struct AgentConfig {
    pub options: ChatOptions,
    pub max_iterations: usize,
    pub compact_threshold_tokens: usize,
    pub retry: RetryConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            options: ChatOptions::default(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            compact_threshold_tokens: DEFAULT_COMPACT_THRESHOLD_TOKENS,
            retry: RetryConfig::default(),
        }
    }
}

pub struct AgentLoop {
    client: Arc<dyn ChatClient>,
    executor: ActionExecutor,
    permissions: Arc<PermissionManager>,
    subagents: SubagentManager,
    mcp: Option<Arc<McpManager>>,
    config: AgentConfig,
}

impl AgentLoop {
    pub fn new(
        client: Arc<dyn ChatClient>,
        executor: ActionExecutor,
        permissions: Arc<PermissionManager>,
        config: AgentConfig,
    ) -> Self {
        let subagents = SubagentManager::new(
            Arc::clone(&client),
            executor.context().clone(),
            config.options.clone(),
        );
        Self {
            client,
            executor,
            permissions,
            subagents,
            mcp: None,
            config,
        }
    }

    pub fn with_mcp(mut self, mcp: Arc<McpManager>) -> Self {
        self.mcp = Some(mcp);
        self
    }

    pub fn permissions(&self) -> &Arc<PermissionManager> {
        &self.permissions
    }

    pub fn options(&self) -> &ChatOptions {
        &self.config.options
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.config.options.model = model.into();
    }

    /// Compact the conversation now, regardless of the size threshold.
    pub async fn compact_now(&self, conversation: &mut Conversation) -> anyhow::Result<(usize, usize)> {
        conversation
            .compact(self.client.as_ref(), &self.config.options)
            .await
    }

    /// Start one run over the shared conversation.
    ///
    /// The loop runs as a spawned task and emits [`LoopEvent`]s; the caller
    /// answers approvals and cancels through the returned sender. The
    /// conversation lock is held for the duration of the run.
    pub fn run(
        self: &Arc<Self>,
        conversation: Arc<Mutex<Conversation>>,
    ) -> (
        mpsc::UnboundedReceiver<LoopEvent>,
        mpsc::UnboundedSender<LoopInput>,
    ) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = mpsc::unbounded_channel();

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut conversation = conversation.lock().await;
            let reason = this
                .run_inner(&mut conversation, &event_tx, input_rx)
                .await;
            let _ = event_tx.send(LoopEvent::Finished { reason });
        });

        (event_rx, input_tx)
    }

    async fn run_inner(
        &self,
        conversation: &mut Conversation,
        event_tx: &mpsc::UnboundedSender<LoopEvent>,
        mut input_rx: mpsc::UnboundedReceiver<LoopInput>,
    ) -> CompletionReason {
        let tools = self.assemble_tools().await;
        let mut failure_counters: HashMap<String, usize> = HashMap::new();

        for iteration in 1..=self.config.max_iterations {
            if drain_cancel(&mut input_rx) {
                return CompletionReason::Interrupted;
            }

            if conversation.estimated_tokens() > self.config.compact_threshold_tokens {
                match conversation
                    .compact(self.client.as_ref(), &self.config.options)
                    .await
                {
                    Ok((before, after)) if after < before => {
                        let _ = event_tx.send(LoopEvent::Compacted {
                            messages_before: before,
                            messages_after: after,
                        });
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "compaction failed, continuing uncompacted"),
                }
            }

            let messages = conversation.for_api();
            let api_rx = match with_retry(&self.config.retry, || {
                self.client
                    .call_streaming(&messages, &tools, &self.config.options)
            })
            .await
            {
                Ok(rx) => rx,
                Err(e) => {
                    let _ = event_tx.send(LoopEvent::Error {
                        error: format!("model call failed: {e}"),
                    });
                    return CompletionReason::Failed;
                }
            };

            let result = stream::process_stream(api_rx, event_tx).await;

            if result.errored && result.text.is_empty() && result.tool_calls.is_empty() {
                return CompletionReason::Failed;
            }

            let assistant = assistant_message(&result.text, &result.tool_calls);
            if !assistant.content.is_empty() {
                conversation.push(assistant);
            }

            if result.tool_calls.is_empty() {
                let _ = event_tx.send(LoopEvent::TurnComplete {
                    turn: iteration,
                    has_more: false,
                });
                return CompletionReason::Completed;
            }

            let outcome = batch::execute_batch(
                &result.tool_calls,
                &self.executor,
                &self.permissions,
                &self.subagents,
                event_tx,
                &mut input_rx,
            )
            .await;

            let diagnostic = failure::detect_repeated_failures(
                &mut failure_counters,
                &result.tool_calls,
                &outcome.results,
            );

            conversation.push(ModelMessage {
                role: Role::User,
                content: outcome.results,
            });

            if outcome.interrupted {
                return CompletionReason::Interrupted;
            }

            if let Some(diagnostic) = diagnostic {
                warn!(iteration, %diagnostic, "stopping repeated failure loop");
                let _ = event_tx.send(LoopEvent::Error { error: diagnostic });
                return CompletionReason::Failed;
            }

            let _ = event_tx.send(LoopEvent::TurnComplete {
                turn: iteration,
                has_more: true,
            });
        }

        info!(
            max_iterations = self.config.max_iterations,
            "iteration cap reached"
        );
        CompletionReason::IterationCapReached
    }

    async fn assemble_tools(&self) -> Vec<AiTool> {
        let mut tools = builtin_tools(None);
        if let Some(mcp) = &self.mcp {
            tools.extend(mcp.ai_tools().await);
        }
        tools
    }
}

fn drain_cancel(input_rx: &mut mpsc::UnboundedReceiver<LoopInput>) -> bool {
    while let Ok(input) = input_rx.try_recv() {
        if matches!(input, LoopInput::Cancel) {
            return true;
        }
    }
    false
}

fn assistant_message(text: &str, tool_calls: &[crate::ai::types::AiToolCall]) -> ModelMessage {
    let mut content = Vec::with_capacity(tool_calls.len() + usize::from(!text.is_empty()));
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
    use crate::ai::types::{AiToolCall, FinishReason};
    use crate::permissions::PermissionPolicy;
    use crate::tools::ToolContext;
    use async_trait::async_trait;
    use serde_json::json;

    /// Emits one tool call on the first request, then a final answer.
    struct ScriptedClient {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl ChatClient for ScriptedClient {
        async fn call_streaming(
            &self,
            _messages: &[ModelMessage],
            _tools: &[AiTool],
            _options: &ChatOptions,
        ) -> Result<mpsc::UnboundedReceiver<ApiEvent>, ProviderError> {
            let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let (tx, rx) = mpsc::unbounded_channel();
            if n == 0 {
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
                tx.send(ApiEvent::TextDelta("done".to_string())).ok();
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

    /// Requests another tool call on every iteration, forever.
    struct BusyClient {
        calls: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl ChatClient for BusyClient {
        async fn call_streaming(
            &self,
            _messages: &[ModelMessage],
            _tools: &[AiTool],
            _options: &ChatOptions,
        ) -> Result<mpsc::UnboundedReceiver<ApiEvent>, ProviderError> {
            let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let (tx, rx) = mpsc::unbounded_channel();
            tx.send(ApiEvent::Finish {
                reason: FinishReason::ToolCalls,
                tool_calls: vec![AiToolCall {
                    id: format!("call_{n}"),
                    name: "list_directory".to_string(),
                    arguments: json!({}),
                }],
                usage: None,
            })
            .ok();
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

    fn agent_in(dir: &tempfile::TempDir) -> Arc<AgentLoop> {
        let root = dir.path().canonicalize().unwrap();
        let ctx = ToolContext::new(root.clone()).with_sandbox(root);
        Arc::new(AgentLoop::new(
            Arc::new(ScriptedClient {
                calls: std::sync::atomic::AtomicUsize::new(0),
            }),
            ActionExecutor::new(ctx),
            Arc::new(PermissionManager::new(PermissionPolicy::default())),
            AgentConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_full_turn_with_tool_call() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent_in(&dir);
        let conversation = Arc::new(Mutex::new(Conversation::new("you are a test")));
        conversation.lock().await.push_user_text("list files");

        let (mut event_rx, _input_tx) = agent.run(Arc::clone(&conversation));

        let mut finished = None;
        while let Some(event) = event_rx.recv().await {
            if let LoopEvent::Finished { reason } = event {
                finished = Some(reason);
            }
        }
        assert_eq!(finished, Some(CompletionReason::Completed));

        // user, assistant tool use, tool results, assistant text
        let conv = conversation.lock().await;
        assert_eq!(conv.len(), 4);
    }

    #[tokio::test]
    async fn test_iteration_cap_ends_endless_run() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let ctx = ToolContext::new(root.clone()).with_sandbox(root);
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let agent = Arc::new(AgentLoop::new(
            Arc::new(BusyClient {
                calls: Arc::clone(&calls),
            }),
            ActionExecutor::new(ctx),
            Arc::new(PermissionManager::new(PermissionPolicy::default())),
            AgentConfig {
                max_iterations: 3,
                ..AgentConfig::default()
            },
        ));
        let conversation = Arc::new(Mutex::new(Conversation::new("")));
        conversation.lock().await.push_user_text("keep going");

        let (mut event_rx, _input_tx) = agent.run(conversation);
        let mut finished = None;
        while let Some(event) = event_rx.recv().await {
            if let LoopEvent::Finished { reason } = event {
                finished = Some(reason);
            }
        }
        assert_eq!(finished, Some(CompletionReason::IterationCapReached));
        // Exactly one model call per iteration up to the cap.
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancel_before_start_interrupts() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent_in(&dir);
        let conversation = Arc::new(Mutex::new(Conversation::new("")));
        conversation.lock().await.push_user_text("hi");

        let (mut event_rx, input_tx) = agent.run(conversation);
        input_tx.send(LoopInput::Cancel).unwrap();

        let mut finished = None;
        while let Some(event) = event_rx.recv().await {
            if let LoopEvent::Finished { reason } = event {
                finished = Some(reason);
            }
        }
        // Cancellation lands either before the first model call or at the
        // next iteration boundary.
        assert!(matches!(
            finished,
            Some(CompletionReason::Interrupted) | Some(CompletionReason::Completed)
        ));
    }
}
