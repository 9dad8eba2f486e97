//! React-style tool-use loop.
//!
//! Flow: send the running message history to the model; if it asks for
//! a tool call, execute it, append the result, and reinvoke; stop when
//! the model answers without a tool call or `max_steps` is hit. Every
//! step emits [`TraceEvent`]s to `events` so the HTTP layer can forward
//! them over SSE as they happen, not just at the end.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use meridian_core::model::{ToolStatus, TraceEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::llm::{ChatMessage, ChatRequest, LlmProvider, Role};
use crate::tools::Tool;

/// Tool output previews longer than this are truncated before being sent
/// as a `tool_output` event; the full content still informs the model.
const TOOL_OUTPUT_PREVIEW_LIMIT: usize = 4096;

pub struct ReactAgent<'a> {
    provider: &'a dyn LlmProvider,
    tools: &'a [Box<dyn Tool>],
    max_steps: usize,
    tool_timeout: Duration,
}

static TOOL_CALL_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_tool_call_id() -> String {
    format!("call_{}", TOOL_CALL_SEQ.fetch_add(1, Ordering::Relaxed))
}

impl<'a> ReactAgent<'a> {
    pub fn new(provider: &'a dyn LlmProvider, tools: &'a [Box<dyn Tool>], max_steps: usize, tool_timeout: Duration) -> Self {
        Self { provider, tools, max_steps, tool_timeout }
    }

    /// Runs the loop to completion, returning the final assistant text.
    /// Bails early (without error) on cancellation, leaving `events`
    /// with whatever was emitted so far.
    pub async fn run(
        &self,
        model: String,
        temperature: f32,
        top_p: f32,
        max_tokens: u32,
        mut messages: Vec<ChatMessage>,
        events: &mpsc::Sender<TraceEvent>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<String> {
        for _step in 0..self.max_steps {
            if cancel.is_cancelled() {
                return Ok(String::new());
            }

            let req = ChatRequest {
                model: model.clone(),
                messages: messages.clone(),
                temperature,
                top_p,
                max_tokens,
                tools: self.tools.iter().map(|t| crate::llm::ToolDefinition { name: t.name().to_string(), description: t.description().to_string(), input_schema: t.input_schema() }).collect(),
            };

            let response = self.provider.send(&req).await?;

            if !response.content.is_empty() {
                let _ = events.send(TraceEvent::Chunk { content: response.content.clone(), timestamp: Utc::now() }).await;
            }

            if response.tool_calls.is_empty() {
                return Ok(response.content);
            }

            messages.push(ChatMessage { role: Role::Assistant, content: response.content.clone() });

            for call in response.tool_calls {
                let tool_call_id = if call.id.is_empty() { next_tool_call_id() } else { call.id.clone() };
                let _ = events
                    .send(TraceEvent::ToolCall {
                        tool_call_id: tool_call_id.clone(),
                        tool_name: call.name.clone(),
                        tool_args: call.input.clone(),
                        timestamp: Utc::now(),
                    })
                    .await;
                let _ = events
                    .send(TraceEvent::ToolStart {
                        tool_call_id: tool_call_id.clone(),
                        tool_name: call.name.clone(),
                        tool_args: call.input.clone(),
                        timestamp: Utc::now(),
                    })
                    .await;

                let started = Instant::now();
                let (result, status) = match self.tools.iter().find(|t| t.name() == call.name) {
                    Some(tool) => match tokio::time::timeout(self.tool_timeout, tool.execute(call.input.clone())).await {
                        Ok(result) => {
                            let status = if result.is_error { ToolStatus::Error } else { ToolStatus::Ok };
                            (result, status)
                        }
                        Err(_) => (crate::tools::ToolResult::error(format!("tool {} timed out after {:?}", call.name, self.tool_timeout)), ToolStatus::Timeout),
                    },
                    None => (crate::tools::ToolResult::error(format!("unknown tool: {}", call.name)), ToolStatus::Error),
                };
                let duration_ms = started.elapsed().as_millis() as u64;

                let full_length = result.content.len();
                let truncated = full_length > TOOL_OUTPUT_PREVIEW_LIMIT;
                let output = if truncated { result.content.chars().take(TOOL_OUTPUT_PREVIEW_LIMIT).collect() } else { result.content.clone() };

                let _ = events
                    .send(TraceEvent::ToolOutput {
                        tool_call_id: tool_call_id.clone(),
                        output,
                        truncated,
                        full_length,
                        timestamp: Utc::now(),
                    })
                    .await;
                let _ = events
                    .send(TraceEvent::ToolEnd {
                        tool_call_id: tool_call_id.clone(),
                        status,
                        duration_ms,
                        timestamp: Utc::now(),
                    })
                    .await;

                messages.push(ChatMessage { role: Role::User, content: format!("[tool_result:{}] {}", call.name, result.content) });
            }
        }

        anyhow::bail!("tool loop exceeded {} steps without a final answer", self.max_steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatResponse, ProviderError, ToolCall as LlmToolCall};
    use crate::tools::ToolResult;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Answers with one tool call on the first turn, then a final answer.
    struct OneShotToolProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for OneShotToolProvider {
        fn name(&self) -> &str {
            "one-shot"
        }

        async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                Ok(ChatResponse {
                    content: String::new(),
                    tool_calls: vec![LlmToolCall { id: "call_0".to_string(), name: "slow".to_string(), input: serde_json::json!({}) }],
                    stop_reason: "tool_use".to_string(),
                    tokens_in: 0,
                    tokens_out: 0,
                })
            } else {
                Ok(ChatResponse { content: "done".to_string(), tool_calls: Vec::new(), stop_reason: "end_turn".to_string(), tokens_in: 0, tokens_out: 0 })
            }
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps longer than the configured timeout"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({})
        }
        async fn execute(&self, _input: serde_json::Value) -> ToolResult {
            tokio::time::sleep(Duration::from_secs(60)).await;
            ToolResult::success("too late")
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "echoes a long string"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({})
        }
        async fn execute(&self, _input: serde_json::Value) -> ToolResult {
            ToolResult::success("x".repeat(TOOL_OUTPUT_PREVIEW_LIMIT + 500))
        }
    }

    async fn drain(mut rx: mpsc::Receiver<TraceEvent>) -> Vec<TraceEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn tool_call_event_precedes_tool_start() {
        let provider = OneShotToolProvider { calls: AtomicUsize::new(0) };
        let tools: Vec<Box<dyn Tool>> = vec![Box::new(EchoTool)];
        let agent = ReactAgent::new(&provider, &tools, 4, Duration::from_secs(5));
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        agent.run("m".to_string(), 0.0, 1.0, 64, vec![ChatMessage { role: Role::User, content: "hi".to_string() }], &tx, &cancel).await.unwrap();

        let events = drain(rx).await;
        let positions: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                TraceEvent::ToolCall { .. } => Some("call"),
                TraceEvent::ToolStart { .. } => Some("start"),
                _ => None,
            })
            .collect();
        assert_eq!(positions, vec!["call", "start"]);
    }

    #[tokio::test]
    async fn tool_output_is_truncated_past_the_preview_limit() {
        let provider = OneShotToolProvider { calls: AtomicUsize::new(0) };
        let tools: Vec<Box<dyn Tool>> = vec![Box::new(EchoTool)];
        let agent = ReactAgent::new(&provider, &tools, 4, Duration::from_secs(5));
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        agent.run("m".to_string(), 0.0, 1.0, 64, vec![ChatMessage { role: Role::User, content: "hi".to_string() }], &tx, &cancel).await.unwrap();

        let events = drain(rx).await;
        let output = events.iter().find_map(|e| match e {
            TraceEvent::ToolOutput { output, truncated, full_length, .. } => Some((output.clone(), *truncated, *full_length)),
            _ => None,
        });
        let (output, truncated, full_length) = output.expect("a tool_output event");
        assert!(truncated);
        assert_eq!(output.len(), TOOL_OUTPUT_PREVIEW_LIMIT);
        assert_eq!(full_length, TOOL_OUTPUT_PREVIEW_LIMIT + 500);
    }

    #[tokio::test]
    async fn tool_execution_past_the_timeout_is_reported_as_timeout() {
        let provider = OneShotToolProvider { calls: AtomicUsize::new(0) };
        let tools: Vec<Box<dyn Tool>> = vec![Box::new(SlowTool)];
        let agent = ReactAgent::new(&provider, &tools, 4, Duration::from_millis(20));
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        agent.run("m".to_string(), 0.0, 1.0, 64, vec![ChatMessage { role: Role::User, content: "hi".to_string() }], &tx, &cancel).await.unwrap();

        let events = drain(rx).await;
        let status = events.iter().find_map(|e| match e {
            TraceEvent::ToolEnd { status, .. } => Some(*status),
            _ => None,
        });
        assert_eq!(status, Some(ToolStatus::Timeout));
    }
}
