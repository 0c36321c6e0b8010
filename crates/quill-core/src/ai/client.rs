//! OpenAI-compatible chat client with SSE streaming.
//!
//! `ChatClient` is the seam the agent loop talks through; the HTTP
//! implementation targets any chat/completions endpoint. Streamed tool-call
//! argument fragments are accumulated per choice index and emitted as
//! complete calls on finish.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::ai::retry::{is_retryable_status, IsRetryable};
use crate::ai::types::{AiTool, AiToolCall, Content, FinishReason, ModelMessage, Role, Usage};

/// Errors from the model provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("provider error: {0}")]
    Api(String),
}

impl IsRetryable for ProviderError {
    fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http { status, .. } => is_retryable_status(*status),
            ProviderError::Network(_) => true,
            ProviderError::Api(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            ProviderError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

/// Incremental events from a streaming completion.
#[derive(Debug, Clone)]
pub enum ApiEvent {
    TextDelta(String),
    ToolCallStart { id: String, name: String },
    ToolCallDelta { id: String, delta: String },
    Usage(Usage),
    Finish {
        reason: FinishReason,
        tool_calls: Vec<AiToolCall>,
        usage: Option<Usage>,
    },
    Error(String),
}

/// Per-request options.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub model: String,
    pub max_tokens: usize,
    pub temperature: Option<f64>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            max_tokens: 8192,
            temperature: None,
        }
    }
}

/// Provider seam for the agent loop. Mocked in tests.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Start a streaming completion; events arrive on the returned channel.
    async fn call_streaming(
        &self,
        messages: &[ModelMessage],
        tools: &[AiTool],
        options: &ChatOptions,
    ) -> Result<mpsc::UnboundedReceiver<ApiEvent>, ProviderError>;

    /// One-shot non-streaming completion. Used for compaction summaries.
    async fn complete_text(
        &self,
        system: &str,
        user: &str,
        options: &ChatOptions,
    ) -> Result<String, ProviderError>;
}

/// HTTP client for OpenAI-compatible chat/completions endpoints.
pub struct HttpChatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpChatClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn request(&self, body: &Value) -> reqwest::RequestBuilder {
        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self.http.post(url).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    fn build_body(
        messages: &[ModelMessage],
        tools: &[AiTool],
        options: &ChatOptions,
        stream: bool,
    ) -> Value {
        let mut body = json!({
            "model": options.model,
            "max_tokens": options.max_tokens,
            "messages": to_wire_messages(messages),
            "stream": stream,
        });
        if stream {
            body["stream_options"] = json!({"include_usage": true});
        }
        if let Some(t) = options.temperature {
            body["temperature"] = json!(t);
        }
        if !tools.is_empty() {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.input_schema,
                            }
                        })
                    })
                    .collect(),
            );
        }
        body
    }
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn call_streaming(
        &self,
        messages: &[ModelMessage],
        tools: &[AiTool],
        options: &ChatOptions,
    ) -> Result<mpsc::UnboundedReceiver<ApiEvent>, ProviderError> {
        let body = Self::build_body(messages, tools, options, true);
        let response = self.request(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut parser = SseStreamParser::new();
            let mut buffer = String::new();
            let mut byte_stream = response.bytes_stream();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(ApiEvent::Error(e.to_string()));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim_end_matches('\r').to_string();
                    buffer.drain(..=pos);
                    for event in parser.process_line(&line) {
                        if tx.send(event).is_err() {
                            return;
                        }
                    }
                }
            }
            // Stream closed without [DONE]: flush whatever was accumulated.
            if !parser.finished {
                let _ = tx.send(parser.finish(FinishReason::Stop));
            }
        });

        Ok(rx)
    }

    async fn complete_text(
        &self,
        system: &str,
        user: &str,
        options: &ChatOptions,
    ) -> Result<String, ProviderError> {
        let messages = vec![
            ModelMessage::text(Role::System, system),
            ModelMessage::text(Role::User, user),
        ];
        let body = Self::build_body(&messages, &[], options, false);
        let response = self.request(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Api(e.to_string()))?;
        json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Api("response missing message content".to_string()))
    }
}

/// Convert unified messages to the chat/completions wire shape.
///
/// Assistant tool uses become `tool_calls`; tool results become `tool` role
/// messages carrying the `tool_call_id`. Error results get an `ERROR:`
/// prefix since this format has no is_error flag.
fn to_wire_messages(messages: &[ModelMessage]) -> Vec<Value> {
    let mut wire = Vec::new();
    for msg in messages {
        match msg.role {
            Role::System => {
                wire.push(json!({"role": "system", "content": msg.text_content()}));
            }
            Role::Assistant => {
                let text = msg.text_content();
                let tool_calls: Vec<Value> = msg
                    .tool_uses()
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                let mut entry = json!({"role": "assistant"});
                entry["content"] = if text.is_empty() {
                    Value::Null
                } else {
                    Value::String(text)
                };
                if !tool_calls.is_empty() {
                    entry["tool_calls"] = Value::Array(tool_calls);
                }
                wire.push(entry);
            }
            Role::User | Role::Tool => {
                let mut text_parts = Vec::new();
                for content in &msg.content {
                    match content {
                        Content::Text { text } => text_parts.push(text.clone()),
                        Content::ToolResult {
                            tool_use_id,
                            output,
                            is_error,
                        } => {
                            let rendered = match output {
                                Value::String(s) => s.clone(),
                                other => other.to_string(),
                            };
                            let content = if is_error.unwrap_or(false) {
                                format!("ERROR: {rendered}")
                            } else {
                                rendered
                            };
                            wire.push(json!({
                                "role": "tool",
                                "tool_call_id": tool_use_id,
                                "content": content,
                            }));
                        }
                        Content::ToolUse { .. } => {}
                    }
                }
                if !text_parts.is_empty() {
                    wire.push(json!({"role": "user", "content": text_parts.join("\n")}));
                }
            }
        }
    }
    wire
}

/// Accumulates streamed tool-call argument fragments for one call.
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn complete(self) -> AiToolCall {
        let arguments = if self.arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&self.arguments).unwrap_or_else(|e| {
                warn!("malformed tool arguments for {}: {}", self.name, e);
                json!({"_raw": self.arguments})
            })
        };
        AiToolCall {
            id: self.id,
            name: self.name,
            arguments,
        }
    }
}

/// Stateful parser for the chat/completions SSE stream.
struct SseStreamParser {
    accumulators: HashMap<usize, ToolCallAccumulator>,
    order: Vec<usize>,
    usage: Option<Usage>,
    finish_reason: Option<FinishReason>,
    finished: bool,
}

impl SseStreamParser {
    fn new() -> Self {
        Self {
            accumulators: HashMap::new(),
            order: Vec::new(),
            usage: None,
            finish_reason: None,
            finished: false,
        }
    }

    fn process_line(&mut self, line: &str) -> Vec<ApiEvent> {
        let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:"))
        else {
            return Vec::new();
        };
        let data = data.trim();
        if data.is_empty() {
            return Vec::new();
        }
        if data == "[DONE]" {
            let reason = self.finish_reason.take().unwrap_or(FinishReason::Stop);
            return vec![self.finish(reason)];
        }
        let json: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                debug!("skipping malformed SSE chunk: {}", e);
                return Vec::new();
            }
        };
        self.process_chunk(&json)
    }

    fn process_chunk(&mut self, json: &Value) -> Vec<ApiEvent> {
        if let Some(error) = json.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown provider error");
            return vec![ApiEvent::Error(message.to_string())];
        }

        let mut events = Vec::new();

        if let Some(usage) = json.get("usage").filter(|u| !u.is_null()) {
            let prompt = usage["prompt_tokens"].as_u64().unwrap_or(0) as usize;
            let completion = usage["completion_tokens"].as_u64().unwrap_or(0) as usize;
            if prompt > 0 || completion > 0 {
                let usage = Usage {
                    prompt_tokens: prompt,
                    completion_tokens: completion,
                    total_tokens: prompt + completion,
                };
                self.usage = Some(usage.clone());
                events.push(ApiEvent::Usage(usage));
            }
        }

        let Some(choice) = json
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
        else {
            return events;
        };

        if let Some(delta) = choice.get("delta") {
            if let Some(content) = delta.get("content").and_then(|c| c.as_str()) {
                if !content.is_empty() {
                    events.push(ApiEvent::TextDelta(content.to_string()));
                }
            }
            if let Some(tool_calls) = delta.get("tool_calls").and_then(|t| t.as_array()) {
                for call in tool_calls {
                    let index = call["index"].as_u64().unwrap_or(0) as usize;
                    if let Some(function) = call.get("function") {
                        if let Some(name) = function.get("name").and_then(|n| n.as_str()) {
                            if !self.accumulators.contains_key(&index) {
                                let id = call["id"]
                                    .as_str()
                                    .filter(|s| !s.is_empty())
                                    .map(str::to_string)
                                    .unwrap_or_else(|| format!("call-{index}"));
                                events.push(ApiEvent::ToolCallStart {
                                    id: id.clone(),
                                    name: name.to_string(),
                                });
                                self.order.push(index);
                                self.accumulators.insert(
                                    index,
                                    ToolCallAccumulator {
                                        id,
                                        name: name.to_string(),
                                        arguments: String::new(),
                                    },
                                );
                            }
                        }
                        if let Some(args) = function.get("arguments").and_then(|a| a.as_str()) {
                            if let Some(acc) = self.accumulators.get_mut(&index) {
                                acc.arguments.push_str(args);
                                events.push(ApiEvent::ToolCallDelta {
                                    id: acc.id.clone(),
                                    delta: args.to_string(),
                                });
                            }
                        }
                    }
                }
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(|r| r.as_str()) {
            self.finish_reason = Some(match reason {
                "stop" | "end_turn" => FinishReason::Stop,
                "tool_calls" | "tool_use" => FinishReason::ToolCalls,
                "length" | "max_tokens" => FinishReason::Length,
                "content_filter" => FinishReason::ContentFilter,
                other => FinishReason::Other(other.to_string()),
            });
        }

        events
    }

    fn finish(&mut self, reason: FinishReason) -> ApiEvent {
        self.finished = true;
        let order = std::mem::take(&mut self.order);
        let mut accumulators = std::mem::take(&mut self.accumulators);
        let tool_calls: Vec<AiToolCall> = order
            .into_iter()
            .filter_map(|idx| accumulators.remove(&idx))
            .map(ToolCallAccumulator::complete)
            .collect();
        let reason = if !tool_calls.is_empty() {
            FinishReason::ToolCalls
        } else {
            reason
        };
        ApiEvent::Finish {
            reason,
            tool_calls,
            usage: self.usage.take(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_lines(lines: &[&str]) -> Vec<ApiEvent> {
        let mut parser = SseStreamParser::new();
        lines
            .iter()
            .flat_map(|l| parser.process_line(l))
            .collect()
    }

    #[test]
    fn test_text_deltas_and_done() {
        let events = collect_lines(&[
            r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"lo"}}]}"#,
            r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            "data: [DONE]",
        ]);
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                ApiEvent::TextDelta(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Hello");
        assert!(matches!(
            events.last(),
            Some(ApiEvent::Finish {
                reason: FinishReason::Stop,
                ..
            })
        ));
    }

    #[test]
    fn test_tool_call_fragment_accumulation() {
        let events = collect_lines(&[
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_9","function":{"name":"read_file","arguments":""}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"path\":"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"a.txt\"}"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            "data: [DONE]",
        ]);
        let Some(ApiEvent::Finish { tool_calls, .. }) = events.last() else {
            panic!("expected finish event");
        };
        assert_eq!(tool_calls.len(), 1);
        assert_eq!(tool_calls[0].id, "call_9");
        assert_eq!(tool_calls[0].name, "read_file");
        assert_eq!(tool_calls[0].arguments["path"], "a.txt");
    }

    #[test]
    fn test_multiple_tool_calls_preserve_order() {
        let events = collect_lines(&[
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"a","function":{"name":"glob","arguments":"{}"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":1,"id":"b","function":{"name":"grep","arguments":"{}"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            "data: [DONE]",
        ]);
        let Some(ApiEvent::Finish { tool_calls, .. }) = events.last() else {
            panic!("expected finish event");
        };
        assert_eq!(tool_calls[0].id, "a");
        assert_eq!(tool_calls[1].id, "b");
    }

    #[test]
    fn test_provider_error_event() {
        let events = collect_lines(&[r#"data: {"error":{"message":"rate limited"}}"#]);
        assert!(matches!(&events[0], ApiEvent::Error(m) if m == "rate limited"));
    }

    #[test]
    fn test_wire_format_tool_results() {
        let messages = vec![ModelMessage {
            role: Role::User,
            content: vec![Content::ToolResult {
                tool_use_id: "call_1".into(),
                output: Value::String("file written".into()),
                is_error: Some(true),
            }],
        }];
        let wire = to_wire_messages(&messages);
        assert_eq!(wire[0]["role"], "tool");
        assert_eq!(wire[0]["tool_call_id"], "call_1");
        assert_eq!(wire[0]["content"], "ERROR: file written");
    }

    #[test]
    fn test_http_error_retryability() {
        let err = ProviderError::Http {
            status: 429,
            message: "slow down".into(),
        };
        assert!(err.is_retryable());
        let err = ProviderError::Http {
            status: 401,
            message: "bad key".into(),
        };
        assert!(!err.is_retryable());
    }
}
