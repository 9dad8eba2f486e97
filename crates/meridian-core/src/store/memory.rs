//! In-memory [`ChunkStore`], used by the test suite and by callers that
//! want to exercise the search algorithm without a SQLite dependency.

use std::collections::HashSet;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use super::{ChunkRecord, ChunkStore};

/// An in-memory chunk corpus backed by a `Vec` guarded by an `RwLock`.
#[derive(Default)]
pub struct InMemoryChunkStore {
    chunks: RwLock<Vec<ChunkRecord>>,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: ChunkRecord) {
        self.chunks.write().unwrap().push(record);
    }
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn chunk_corpus(&self, enabled: Option<&HashSet<String>>) -> Result<Vec<ChunkRecord>> {
        let chunks = self.chunks.read().unwrap();
        Ok(match enabled {
            Some(set) => chunks.iter().filter(|c| set.contains(&c.resource_hash)).cloned().collect(),
            None => chunks.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(hash: &str, index: u32, text: &str, vector: Option<Vec<f32>>) -> ChunkRecord {
        ChunkRecord {
            resource_hash: hash.to_string(),
            chunk_index: index,
            text: text.to_string(),
            vector,
            display_name: hash.to_string(),
            source_url: None,
        }
    }

    #[tokio::test]
    async fn returns_full_corpus_when_no_filter_is_given() {
        let store = InMemoryChunkStore::new();
        store.insert(record("a", 0, "hello", None));
        store.insert(record("b", 0, "world", None));
        let corpus = store.chunk_corpus(None).await.unwrap();
        assert_eq!(corpus.len(), 2);
    }

    #[tokio::test]
    async fn filters_to_the_enabled_set() {
        let store = InMemoryChunkStore::new();
        store.insert(record("a", 0, "hello", None));
        store.insert(record("b", 0, "world", None));
        let mut enabled = HashSet::new();
        enabled.insert("a".to_string());
        let corpus = store.chunk_corpus(Some(&enabled)).await.unwrap();
        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus[0].resource_hash, "a");
    }
}
