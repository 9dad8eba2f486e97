//! Domain types shared by the catalog, index, executor, and chat store.
//!
//! These are plain data — no I/O, no async. Section references in doc
//! comments point at the data-model definitions they implement.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of upstream a [`Resource`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Web,
    Git,
    Ticket,
    Local,
    Sso,
}

/// An ingested artifact, addressed by a stable hash derived from its
/// identity (not its bytes, except for uploads).
///
/// Invariant: `hash` uniquely addresses the resource; the on-disk filename
/// is `{hash}{suffix}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub hash: String,
    pub display_name: String,
    pub source_type: SourceType,
    pub url: Option<String>,
    pub ticket_id: Option<String>,
    pub git_commit: Option<String>,
    pub suffix: String,
    pub size_bytes: u64,
    pub ingested_at: DateTime<Utc>,
    #[serde(default)]
    pub extra: HashMap<String, String>,
    /// Soft-delete bit. Never physically removed until GC.
    #[serde(default)]
    pub deleted: bool,
}

/// Metadata sidecar co-located with a persisted resource on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceMeta {
    pub source_url: Option<String>,
    pub source_type: SourceType,
    pub collected_at: DateTime<Utc>,
    pub title: Option<String>,
    pub author: Option<String>,
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

/// A contiguous text span of a resource, with its dense embedding.
///
/// Invariant: `(resource_hash, chunk_index)` is unique; `vector.len()`
/// equals the deployment's configured embedding dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub resource_hash: String,
    pub chunk_index: u32,
    pub text: String,
    pub vector: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A single scored hit returned from a retrieval operation, pairing a
/// source chunk with enough resource metadata to render a citation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub resource_hash: String,
    pub chunk_index: u32,
    pub text: String,
    pub score: f32,
    pub display_name: String,
    pub source_url: Option<String>,
}

/// Sender of a chat [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Assistant,
    System,
    Expert,
}

/// A conversation: an append-only ordered sequence of messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    pub user_id: Option<String>,
    pub client_id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
}

/// A single immutable chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub conversation_id: String,
    pub sender: Sender,
    pub content: String,
    pub model_used: Option<String>,
    pub pipeline_used: Option<String>,
    pub link: Option<String>,
    pub context: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Feedback kind attached to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Like,
    Dislike,
    Comment,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackFlags {
    #[serde(default)]
    pub incorrect: bool,
    #[serde(default)]
    pub unhelpful: bool,
    #[serde(default)]
    pub inappropriate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub message_id: i64,
    pub kind: FeedbackKind,
    pub flags: FeedbackFlags,
    pub text: Option<String>,
    pub feedback_ts: DateTime<Utc>,
}

/// Terminal/non-terminal status of a [`Trace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl TraceStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TraceStatus::Running)
    }
}

/// One typed, timestamped record in a trace's event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    Chunk {
        content: String,
        timestamp: DateTime<Utc>,
    },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        tool_args: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    ToolStart {
        tool_call_id: String,
        tool_name: String,
        tool_args: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    ToolOutput {
        tool_call_id: String,
        output: String,
        truncated: bool,
        full_length: usize,
        timestamp: DateTime<Utc>,
    },
    ToolEnd {
        tool_call_id: String,
        status: ToolStatus,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    Error {
        status: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    Done {
        timestamp: DateTime<Utc>,
    },
}

impl TraceEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TraceEvent::Chunk { timestamp, .. }
            | TraceEvent::ToolCall { timestamp, .. }
            | TraceEvent::ToolStart { timestamp, .. }
            | TraceEvent::ToolOutput { timestamp, .. }
            | TraceEvent::ToolEnd { timestamp, .. }
            | TraceEvent::Error { timestamp, .. }
            | TraceEvent::Done { timestamp } => *timestamp,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TraceEvent::Done { .. } | TraceEvent::Error { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Ok,
    Error,
    Timeout,
    Cancelled,
}

/// Aggregate counters recorded when a trace finishes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceTotals {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub tool_calls: u64,
    pub duration_ms: u64,
    pub safety_blocked: bool,
}

/// The ordered log of events produced by a single turn.
///
/// Invariant: exactly one terminal status; `events` timestamps are
/// monotonically non-decreasing; status transitions only
/// `running -> {completed, cancelled, failed}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub trace_id: String,
    pub conversation_id: String,
    pub message_id: Option<i64>,
    pub pipeline_name: String,
    pub events: Vec<TraceEvent>,
    pub status: TraceStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub totals: TraceTotals,
}

impl Trace {
    /// Validates the append-ordering and terminal-status invariants
    /// before accepting a new event.
    pub fn can_append(&self, event: &TraceEvent) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        match self.events.last() {
            Some(last) => last.timestamp() <= event.timestamp(),
            None => true,
        }
    }
}

/// A/B preference, once set, is final (write-once).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbPreference {
    A,
    B,
    Tie,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbComparison {
    pub comparison_id: String,
    pub conversation_id: String,
    pub user_prompt_message_id: i64,
    pub response_a_message_id: Option<i64>,
    pub response_b_message_id: Option<i64>,
    pub config_a: serde_json::Value,
    pub config_b: serde_json::Value,
    pub is_a_first: bool,
    pub preference: Option<AbPreference>,
}

/// Per-conversation override of which resources may be retrieved.
/// Absence of an entry means default-enabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentSelection {
    pub conversation_id: String,
    pub overrides: HashMap<String, bool>,
}

impl DocumentSelection {
    pub fn is_enabled(&self, resource_hash: &str) -> bool {
        *self.overrides.get(resource_hash).unwrap_or(&true)
    }
}
