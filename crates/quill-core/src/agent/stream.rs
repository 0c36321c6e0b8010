//! Consumes an [`ApiEvent`] stream, accumulating text and tool calls while
//! forwarding deltas as [`LoopEvent`]s.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::ai::client::ApiEvent;
use crate::ai::types::{AiToolCall, Usage};

use super::loop_events::LoopEvent;

/// Abort the stream if the provider sends nothing for this long.
const STREAM_TIMEOUT: Duration = Duration::from_secs(120);

pub(crate) struct StreamResult {
    pub text: String,
    pub tool_calls: Vec<AiToolCall>,
    pub usage: Option<Usage>,
    pub errored: bool,
}

pub(crate) async fn process_stream(
    mut api_rx: mpsc::UnboundedReceiver<ApiEvent>,
    event_tx: &mpsc::UnboundedSender<LoopEvent>,
) -> StreamResult {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    let mut usage = None;
    let mut errored = false;

    loop {
        let event = match tokio::time::timeout(STREAM_TIMEOUT, api_rx.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(_) => {
                let _ = event_tx.send(LoopEvent::Error {
                    error: format!(
                        "stream stalled: no data for {} seconds",
                        STREAM_TIMEOUT.as_secs()
                    ),
                });
                errored = true;
                break;
            }
        };

        match event {
            ApiEvent::TextDelta(delta) => {
                text.push_str(&delta);
                let _ = event_tx.send(LoopEvent::TextDelta { delta });
            }
            ApiEvent::ToolCallStart { id, name } => {
                let _ = event_tx.send(LoopEvent::ToolCallStart { id, name });
            }
            // Argument fragments are accumulated by the client; nothing to
            // surface until the call is complete.
            ApiEvent::ToolCallDelta { .. } => {}
            ApiEvent::Usage(u) => {
                let _ = event_tx.send(LoopEvent::Usage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                });
                usage = Some(u);
            }
            ApiEvent::Finish {
                tool_calls: calls,
                usage: finish_usage,
                ..
            } => {
                for call in &calls {
                    let _ = event_tx.send(LoopEvent::ToolCallComplete {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    });
                }
                tool_calls = calls;
                if usage.is_none() {
                    usage = finish_usage;
                }
            }
            ApiEvent::Error(error) => {
                let _ = event_tx.send(LoopEvent::Error { error });
                errored = true;
            }
        }
    }

    StreamResult {
        text,
        tool_calls,
        usage,
        errored,
    }
}
