//! Storage abstraction the hybrid-search algorithm is generic over.
//!
//! [`ChunkStore`] is deliberately narrow: it exposes only the read path
//! `search` needs (the in-scope chunk corpus at query time), so the BM25
//! and vector-similarity math in this crate never has to know whether the
//! backing store is SQLite, an in-memory map, or anything else. Write-side
//! persistence (ingest, sync, embedding upserts) is a concern of the
//! concrete store in the application crate, not this trait.

pub mod memory;

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;

/// One chunk plus the resource metadata needed to render a citation,
/// as returned by [`ChunkStore::chunk_corpus`].
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub resource_hash: String,
    pub chunk_index: u32,
    pub text: String,
    pub vector: Option<Vec<f32>>,
    pub display_name: String,
    pub source_url: Option<String>,
}

/// Abstract read-only view of the indexed chunk corpus.
///
/// `enabled`, when present, restricts the corpus to chunks whose
/// `resource_hash` is a member — the mechanism C4 uses to enforce
/// per-conversation document visibility. `None` means no filter.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Returns the in-scope chunk corpus at query time.
    async fn chunk_corpus(&self, enabled: Option<&HashSet<String>>) -> Result<Vec<ChunkRecord>>;
}
