//! Tools exposed to the agentic pipeline's tool-use loop.
//!
//! Mirrors the shape of a conventional agent tool registry: each tool
//! declares a name, description, and JSON-schema input, and executes
//! against a borrowed context rather than owning global state.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use meridian_core::search::{hybrid_search, SearchParams};
use meridian_core::store::ChunkStore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self { content: content.into(), is_error: false }
    }
    pub fn error(message: impl Into<String>) -> Self {
        Self { content: message.into(), is_error: true }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> serde_json::Value;
    async fn execute(&self, input: serde_json::Value) -> ToolResult;
}

/// Lets the agent issue its own retrieval queries mid-turn, independent
/// of the pipeline's up-front hybrid search over the condensed question.
pub struct RetrievalTool {
    store: Arc<dyn ChunkStore>,
    params: SearchParams,
    enabled: Option<HashSet<String>>,
    k: usize,
}

impl RetrievalTool {
    pub fn new(store: Arc<dyn ChunkStore>, params: SearchParams, enabled: Option<HashSet<String>>, k: usize) -> Self {
        Self { store, params, enabled, k }
    }
}

#[derive(Deserialize)]
struct RetrievalInput {
    query: String,
}

#[async_trait]
impl Tool for RetrievalTool {
    fn name(&self) -> &str {
        "search_documents"
    }

    fn description(&self) -> &str {
        "Search the ingested document corpus for passages relevant to a query"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"],
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let parsed: RetrievalInput = match serde_json::from_value(input) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("invalid tool input: {e}")),
        };

        let hits = hybrid_search(self.store.as_ref(), &parsed.query, &[], self.k, self.enabled.as_ref(), &self.params).await;
        match hits {
            Ok(hits) => match serde_json::to_string(&hits) {
                Ok(json) => ToolResult::success(json),
                Err(e) => ToolResult::error(format!("failed to serialize results: {e}")),
            },
            Err(e) => ToolResult::error(format!("retrieval failed: {e}")),
        }
    }
}
