//! C4: pipeline execution.
//!
//! A [`Pipeline`] is a fixed recipe, not an agent that chooses its own
//! steps: `Qa` condenses the question, retrieves, and answers; `Grading`
//! answers against a rubric; `ImageProcessing` is vision-only and never
//! touches retrieval or the token budget. [`run`] is the single entry
//! point the HTTP layer calls; it owns trace-event emission, safety
//! enforcement, and cancellation.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use meridian_core::budget::{ApproxTokenCounter, HistoryMessage, PromptInputs, PruneOutcome, TokenLimiter};
use meridian_core::model::{ScoredDocument, TraceEvent};
use meridian_core::search::{hybrid_search, SearchParams};
use meridian_core::store::ChunkStore;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::ReactAgent;
use crate::config::{PipelineConfig, PipelineKind};
use crate::llm::{ChatMessage, ChatRequest, LlmProvider, Role};
use crate::safety::{SafetyChecker, SafetyVerdict};
use crate::tools::Tool;

pub struct PipelineInput {
    pub question: String,
    pub history: Vec<HistoryMessage>,
    pub enabled_resources: Option<std::collections::HashSet<String>>,
    pub retrieval_k: usize,
    pub temperature: f32,
    pub top_p: f32,
}

pub struct PipelineOutput {
    pub answer: String,
    pub sources: Vec<ScoredDocument>,
    pub input_size_warning: bool,
    pub safety_blocked: bool,
}

const SAFETY_BLOCKED_MESSAGE: &str = "I can't help with that request.";

/// Runs `pipeline` to completion, emitting [`TraceEvent`]s as it goes.
/// `Ok(None)` means the turn was cancelled mid-stream — the caller should
/// not surface an assistant message or a `done` event for it. A safety
/// block is not `None`: it comes back as a normal [`PipelineOutput`]
/// with `safety_blocked` set and a canned `answer`.
pub async fn run(
    kind: PipelineKind,
    config: &PipelineConfig,
    max_tool_steps: usize,
    tool_timeout: Duration,
    provider: &dyn LlmProvider,
    tools: &[Box<dyn Tool>],
    store: &dyn ChunkStore,
    search_params: &SearchParams,
    safety: &dyn SafetyChecker,
    input: PipelineInput,
    events: &mpsc::Sender<TraceEvent>,
    cancel: &CancellationToken,
) -> anyhow::Result<Option<PipelineOutput>> {
    match kind {
        PipelineKind::ImageProcessing => run_image_processing(config, provider, input, events, cancel).await,
        PipelineKind::Qa => run_qa(config, max_tool_steps, tool_timeout, provider, tools, store, search_params, safety, input, events, cancel).await,
        PipelineKind::Grading => {
            run_grading(config, max_tool_steps, tool_timeout, provider, tools, store, search_params, safety, input, events, cancel).await
        }
    }
}

async fn run_qa(
    config: &PipelineConfig,
    max_tool_steps: usize,
    tool_timeout: Duration,
    provider: &dyn LlmProvider,
    tools: &[Box<dyn Tool>],
    store: &dyn ChunkStore,
    search_params: &SearchParams,
    safety: &dyn SafetyChecker,
    input: PipelineInput,
    events: &mpsc::Sender<TraceEvent>,
    cancel: &CancellationToken,
) -> anyhow::Result<Option<PipelineOutput>> {
    let original_question = input.question.clone();
    let condensed = condense_question(config, provider, &input).await?;

    let sources = hybrid_search(store, &condensed, &[], input.retrieval_k, input.enabled_resources.as_ref(), search_params).await?;

    let counter = ApproxTokenCounter;
    let limiter = TokenLimiter::new(config.max_tokens, config.reserved_tokens, 0, &counter);
    let prompt_inputs = PromptInputs {
        question: condensed.clone(),
        history: input.history,
        document_lists: vec![sources.clone()],
        extras: HashMap::new(),
    };

    let pruned = match limiter.prune(prompt_inputs) {
        PruneOutcome::Fits(pruned) => pruned,
        PruneOutcome::InputSizeWarning => {
            let _ = events.send(TraceEvent::Error { status: "input_size_warning".to_string(), message: "question too large for the configured token budget".to_string(), timestamp: Utc::now() }).await;
            return Ok(Some(PipelineOutput { answer: String::new(), sources: Vec::new(), input_size_warning: true, safety_blocked: false }));
        }
    };

    let messages = build_messages(&pruned, &pruned.document_lists[0]);
    let agent = ReactAgent::new(provider, tools, max_tool_steps, tool_timeout);
    let answer = agent.run(config.chat_model.clone(), input.temperature, input.top_p, 1024, messages, events, cancel).await?;
    if cancel.is_cancelled() {
        return Ok(None);
    }

    finish_with_safety(&original_question, answer, pruned.document_lists.into_iter().next().unwrap_or_default(), safety, events).await
}

async fn run_grading(
    config: &PipelineConfig,
    max_tool_steps: usize,
    tool_timeout: Duration,
    provider: &dyn LlmProvider,
    tools: &[Box<dyn Tool>],
    store: &dyn ChunkStore,
    search_params: &SearchParams,
    safety: &dyn SafetyChecker,
    input: PipelineInput,
    events: &mpsc::Sender<TraceEvent>,
    cancel: &CancellationToken,
) -> anyhow::Result<Option<PipelineOutput>> {
    let original_question = input.question.clone();
    let sources = hybrid_search(store, &input.question, &[], input.retrieval_k, input.enabled_resources.as_ref(), search_params).await?;

    let counter = ApproxTokenCounter;
    let limiter = TokenLimiter::new(config.max_tokens, config.reserved_tokens, 0, &counter);
    let prompt_inputs =
        PromptInputs { question: input.question.clone(), history: input.history, document_lists: vec![sources], extras: HashMap::new() };

    let pruned = match limiter.prune(prompt_inputs) {
        PruneOutcome::Fits(pruned) => pruned,
        PruneOutcome::InputSizeWarning => {
            return Ok(Some(PipelineOutput { answer: String::new(), sources: Vec::new(), input_size_warning: true, safety_blocked: false }));
        }
    };

    let mut messages = build_messages(&pruned, &pruned.document_lists[0]);
    messages.push(ChatMessage { role: Role::System, content: "Respond with a final_grade section summarizing correctness.".to_string() });

    let agent = ReactAgent::new(provider, tools, max_tool_steps, tool_timeout);
    let answer = agent.run(config.chat_model.clone(), input.temperature, input.top_p, 1024, messages, events, cancel).await?;
    if cancel.is_cancelled() {
        return Ok(None);
    }

    finish_with_safety(&original_question, answer, pruned.document_lists.into_iter().next().unwrap_or_default(), safety, events).await
}

/// Vision-only: no retrieval, no token budgeting, no document context.
async fn run_image_processing(
    config: &PipelineConfig,
    provider: &dyn LlmProvider,
    input: PipelineInput,
    events: &mpsc::Sender<TraceEvent>,
    cancel: &CancellationToken,
) -> anyhow::Result<Option<PipelineOutput>> {
    if cancel.is_cancelled() {
        return Ok(None);
    }
    let req = ChatRequest {
        model: config.chat_model.clone(),
        messages: vec![ChatMessage { role: Role::User, content: input.question }],
        temperature: input.temperature,
        top_p: input.top_p,
        max_tokens: 1024,
        tools: Vec::new(),
    };
    let response = provider.send(&req).await?;
    let _ = events.send(TraceEvent::Chunk { content: response.content.clone(), timestamp: Utc::now() }).await;
    let _ = events.send(TraceEvent::Done { timestamp: Utc::now() }).await;
    Ok(Some(PipelineOutput { answer: response.content, sources: Vec::new(), input_size_warning: false, safety_blocked: false }))
}

async fn condense_question(config: &PipelineConfig, provider: &dyn LlmProvider, input: &PipelineInput) -> anyhow::Result<String> {
    let Some(condense_model) = &config.condense_model else { return Ok(input.question.clone()) };
    if input.history.is_empty() {
        return Ok(input.question.clone());
    }

    let history_text: String = input.history.iter().map(|m| m.content.clone()).collect::<Vec<_>>().join("\n");
    let req = ChatRequest {
        model: condense_model.clone(),
        messages: vec![ChatMessage {
            role: Role::User,
            content: format!("Given this conversation history:\n{history_text}\n\nRestate the following question as a standalone question: {}", input.question),
        }],
        temperature: 0.0,
        top_p: 1.0,
        max_tokens: 256,
        tools: Vec::new(),
    };
    let response = provider.send(&req).await?;
    if response.content.trim().is_empty() {
        Ok(input.question.clone())
    } else {
        Ok(response.content)
    }
}

fn build_messages(inputs: &PromptInputs, sources: &[ScoredDocument]) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = inputs.history.iter().map(|h| ChatMessage { role: Role::User, content: h.content.clone() }).collect();

    if !sources.is_empty() {
        let context = sources.iter().map(|d| format!("[{}] {}", d.display_name, d.text)).collect::<Vec<_>>().join("\n\n");
        messages.push(ChatMessage { role: Role::System, content: format!("Context:\n{context}") });
    }

    messages.push(ChatMessage { role: Role::User, content: inputs.question.clone() });
    messages
}

/// Checks both the prompt that produced `answer` and `answer` itself; the
/// prompt is checked first since a disallowed question can produce an
/// otherwise-clean answer. A block is not an error: it finishes the
/// trace normally with a canned message and `safety_blocked` set.
async fn finish_with_safety(
    prompt: &str,
    answer: String,
    sources: Vec<ScoredDocument>,
    safety: &dyn SafetyChecker,
    events: &mpsc::Sender<TraceEvent>,
) -> anyhow::Result<Option<PipelineOutput>> {
    let verdict = match safety.check(prompt) {
        SafetyVerdict::Allowed => safety.check(&answer),
        blocked => blocked,
    };
    match verdict {
        SafetyVerdict::Blocked { .. } => {
            let _ = events.send(TraceEvent::Chunk { content: SAFETY_BLOCKED_MESSAGE.to_string(), timestamp: Utc::now() }).await;
            let _ = events.send(TraceEvent::Done { timestamp: Utc::now() }).await;
            Ok(Some(PipelineOutput { answer: SAFETY_BLOCKED_MESSAGE.to_string(), sources: Vec::new(), input_size_warning: false, safety_blocked: true }))
        }
        SafetyVerdict::Allowed => {
            let _ = events.send(TraceEvent::Done { timestamp: Utc::now() }).await;
            Ok(Some(PipelineOutput { answer, sources, input_size_warning: false, safety_blocked: false }))
        }
    }
}

/// Runs the same pipeline twice under two different configurations
/// concurrently, for an A/B comparison turn.
pub async fn run_ab<'a>(
    kind: PipelineKind,
    config_a: &'a PipelineConfig,
    provider_a: &'a dyn LlmProvider,
    config_b: &'a PipelineConfig,
    provider_b: &'a dyn LlmProvider,
    max_tool_steps: usize,
    tool_timeout: Duration,
    tools: &'a [Box<dyn Tool>],
    store: &'a dyn ChunkStore,
    search_params: &'a SearchParams,
    safety: &'a dyn SafetyChecker,
    input_a: PipelineInput,
    input_b: PipelineInput,
    events_a: &'a mpsc::Sender<TraceEvent>,
    events_b: &'a mpsc::Sender<TraceEvent>,
    cancel: &'a CancellationToken,
) -> (anyhow::Result<Option<PipelineOutput>>, anyhow::Result<Option<PipelineOutput>>) {
    tokio::join!(
        run(kind, config_a, max_tool_steps, tool_timeout, provider_a, tools, store, search_params, safety, input_a, events_a, cancel),
        run(kind, config_b, max_tool_steps, tool_timeout, provider_b, tools, store, search_params, safety, input_b, events_b, cancel),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatResponse, ProviderError};
    use crate::safety::KeywordSafetyChecker;
    use async_trait::async_trait;
    use meridian_core::store::memory::InMemoryChunkStore;

    struct FixedAnswerProvider {
        answer: String,
    }

    #[async_trait]
    impl LlmProvider for FixedAnswerProvider {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                content: self.answer.clone(),
                tool_calls: Vec::new(),
                stop_reason: "end_turn".to_string(),
                tokens_in: 0,
                tokens_out: 0,
            })
        }
    }

    fn qa_config() -> PipelineConfig {
        PipelineConfig { kind: PipelineKind::Qa, condense_model: None, chat_model: "m".to_string(), max_tokens: 4000, reserved_tokens: 512 }
    }

    fn input(question: &str) -> PipelineInput {
        PipelineInput { question: question.to_string(), history: Vec::new(), enabled_resources: None, retrieval_k: 5, temperature: 0.0, top_p: 1.0 }
    }

    #[tokio::test]
    async fn a_blocked_prompt_finishes_completed_with_a_canned_message() {
        let config = qa_config();
        let provider = FixedAnswerProvider { answer: "this would have been fine".to_string() };
        let tools: Vec<Box<dyn Tool>> = Vec::new();
        let store = InMemoryChunkStore::new();
        let search_params = SearchParams::default();
        let safety = KeywordSafetyChecker::new(vec!["forbidden topic".to_string()]);
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let output = run(
            PipelineKind::Qa,
            &config,
            4,
            Duration::from_secs(5),
            &provider,
            &tools,
            &store,
            &search_params,
            &safety,
            input("tell me about forbidden topic"),
            &tx,
            &cancel,
        )
        .await
        .unwrap()
        .expect("a blocked prompt still finishes the trace, it does not cancel it");

        assert!(output.safety_blocked);
        assert_eq!(output.answer, SAFETY_BLOCKED_MESSAGE);
    }

    #[tokio::test]
    async fn cancelling_mid_turn_suppresses_the_output_entirely() {
        let config = qa_config();
        let provider = FixedAnswerProvider { answer: "too late".to_string() };
        let tools: Vec<Box<dyn Tool>> = Vec::new();
        let store = InMemoryChunkStore::new();
        let search_params = SearchParams::default();
        let safety = KeywordSafetyChecker::new(Vec::new());
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let output =
            run(PipelineKind::Qa, &config, 4, Duration::from_secs(5), &provider, &tools, &store, &search_params, &safety, input("hi"), &tx, &cancel)
                .await
                .unwrap();

        assert!(output.is_none());
    }
}
