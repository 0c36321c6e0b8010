//! Conversation history and compaction.
//!
//! History is a flat list of [`ModelMessage`]s. When the estimated token
//! count crosses the threshold, older messages are summarized into a single
//! message while the most recent exchanges are kept verbatim. Compaction
//! never splits an assistant tool-use message from the message carrying its
//! tool results.

use anyhow::Result;
use tracing::{debug, info};

use crate::ai::client::{ChatClient, ChatOptions};
use crate::ai::types::{Content, ModelMessage, Role};

/// Messages kept verbatim at the tail of the conversation.
const KEEP_RECENT: usize = 4;

/// Rough chars-per-token ratio for budget estimates.
const CHARS_PER_TOKEN: usize = 4;

const SUMMARY_PROMPT: &str = "Summarize this conversation between a user and a coding agent. \
    Preserve: the user's goals, decisions made, files created or modified, commands run and \
    their outcomes, and any unresolved problems. Be specific about paths and names. \
    Write a compact factual summary, not a narrative.";

pub struct Conversation {
    system_prompt: String,
    messages: Vec<ModelMessage>,
}

impl Conversation {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages: Vec::new(),
        }
    }

    pub fn push(&mut self, message: ModelMessage) {
        self.messages.push(message);
    }

    pub fn push_user_text(&mut self, text: impl Into<String>) {
        self.messages.push(ModelMessage::text(Role::User, text));
    }

    pub fn messages(&self) -> &[ModelMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Full message list for an API call, system prompt first.
    pub fn for_api(&self) -> Vec<ModelMessage> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        if !self.system_prompt.is_empty() {
            out.push(ModelMessage::text(Role::System, self.system_prompt.clone()));
        }
        out.extend(self.messages.iter().cloned());
        out
    }

    /// Rough token estimate over the whole history.
    pub fn estimated_tokens(&self) -> usize {
        let chars: usize = self
            .messages
            .iter()
            .map(message_char_len)
            .sum::<usize>()
            + self.system_prompt.len();
        chars / CHARS_PER_TOKEN
    }

    /// Summarize everything except the most recent messages.
    ///
    /// Returns `(messages_before, messages_after)`, unchanged when there is
    /// nothing worth compacting.
    pub async fn compact(
        &mut self,
        client: &dyn ChatClient,
        options: &ChatOptions,
    ) -> Result<(usize, usize)> {
        let before = self.messages.len();
        let mut split = before.saturating_sub(KEEP_RECENT);

        // Keep tool results with the assistant message that requested them.
        while split > 0 && starts_with_tool_result(&self.messages[split]) {
            split -= 1;
        }

        if split == 0 {
            debug!("nothing to compact");
            return Ok((before, before));
        }

        let transcript = render_transcript(&self.messages[..split]);
        let summary = client
            .complete_text(SUMMARY_PROMPT, &transcript, options)
            .await?;

        let mut compacted = vec![ModelMessage::text(
            Role::User,
            format!("[Earlier conversation, summarized]\n{summary}"),
        )];
        compacted.extend(self.messages.drain(split..));
        self.messages = compacted;

        info!(
            before,
            after = self.messages.len(),
            "conversation compacted"
        );
        Ok((before, self.messages.len()))
    }
}

fn starts_with_tool_result(message: &ModelMessage) -> bool {
    message
        .content
        .first()
        .map(|c| matches!(c, Content::ToolResult { .. }))
        .unwrap_or(false)
}

fn message_char_len(message: &ModelMessage) -> usize {
    message
        .content
        .iter()
        .map(|c| match c {
            Content::Text { text } => text.len(),
            Content::ToolUse { input, .. } => input.to_string().len(),
            Content::ToolResult { output, .. } => output.to_string().len(),
        })
        .sum()
}

fn render_transcript(messages: &[ModelMessage]) -> String {
    let mut out = String::new();
    for message in messages {
        for content in &message.content {
            match content {
                Content::Text { text } => {
                    let role = match message.role {
                        Role::User => "user",
                        Role::Assistant => "assistant",
                        Role::System => "system",
                        Role::Tool => "tool",
                    };
                    out.push_str(&format!("[{role}] {text}\n"));
                }
                Content::ToolUse { name, input, .. } => {
                    out.push_str(&format!("[tool call] {name} {input}\n"));
                }
                Content::ToolResult { output, .. } => {
                    let rendered = match output {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    // Results can be huge; the summary only needs the gist.
                    let clipped: String = rendered.chars().take(500).collect();
                    out.push_str(&format!("[tool result] {clipped}\n"));
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::client::{ApiEvent, ProviderError};
    use crate::ai::types::AiTool;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct StubClient;

    #[async_trait]
    impl ChatClient for StubClient {
        async fn call_streaming(
            &self,
            _messages: &[ModelMessage],
            _tools: &[AiTool],
            _options: &ChatOptions,
        ) -> Result<mpsc::UnboundedReceiver<ApiEvent>, ProviderError> {
            let (_tx, rx) = mpsc::unbounded_channel();
            Ok(rx)
        }

        async fn complete_text(
            &self,
            _system: &str,
            _user: &str,
            _options: &ChatOptions,
        ) -> Result<String, ProviderError> {
            Ok("summary of earlier work".to_string())
        }
    }

    fn tool_exchange(id: &str) -> (ModelMessage, ModelMessage) {
        let call = ModelMessage {
            role: Role::Assistant,
            content: vec![Content::ToolUse {
                id: id.to_string(),
                name: "read_file".to_string(),
                input: json!({"path": "a.txt"}),
            }],
        };
        let result = ModelMessage {
            role: Role::User,
            content: vec![Content::ToolResult {
                tool_use_id: id.to_string(),
                output: serde_json::Value::String("contents".to_string()),
                is_error: None,
            }],
        };
        (call, result)
    }

    #[tokio::test]
    async fn test_compact_keeps_recent_and_summarizes_rest() {
        let mut conv = Conversation::new("system");
        for i in 0..10 {
            conv.push_user_text(format!("message {i}"));
            conv.push(ModelMessage::text(Role::Assistant, format!("reply {i}")));
        }

        let (before, after) = conv
            .compact(&StubClient, &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(before, 20);
        assert_eq!(after, KEEP_RECENT + 1);
        assert!(conv.messages()[0]
            .text_content()
            .contains("summary of earlier work"));
    }

    #[tokio::test]
    async fn test_compact_never_splits_tool_pairs() {
        let mut conv = Conversation::new("system");
        for i in 0..6 {
            conv.push_user_text(format!("message {i}"));
            conv.push(ModelMessage::text(Role::Assistant, format!("reply {i}")));
        }
        // Place a tool exchange so the naive split would land on the result.
        let (call, result) = tool_exchange("call_9");
        conv.push(call);
        conv.push(result);
        conv.push_user_text("follow up");
        conv.push(ModelMessage::text(Role::Assistant, "done"));
        conv.push_user_text("one more");

        conv.compact(&StubClient, &ChatOptions::default())
            .await
            .unwrap();

        // Every kept tool result must have its tool use in the kept window.
        let messages = conv.messages();
        for (idx, message) in messages.iter().enumerate() {
            if starts_with_tool_result(message) {
                assert!(idx > 0);
                assert!(messages[idx - 1]
                    .content
                    .iter()
                    .any(|c| matches!(c, Content::ToolUse { .. })));
            }
        }
    }

    #[tokio::test]
    async fn test_short_history_is_untouched() {
        let mut conv = Conversation::new("system");
        conv.push_user_text("hello");
        let (before, after) = conv
            .compact(&StubClient, &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(before, after);
        assert_eq!(conv.len(), 1);
    }

    #[test]
    fn test_for_api_prepends_system_prompt() {
        let mut conv = Conversation::new("be useful");
        conv.push_user_text("hi");
        let api = conv.for_api();
        assert_eq!(api.len(), 2);
        assert_eq!(api[0].role, Role::System);
    }
}
