//! C2: SQLite-backed chunk/vector index.
//!
//! [`SqliteChunkStore`] is the production [`ChunkStore`] implementation
//! queried by hybrid search. [`sync`] is the write side: it re-chunks and
//! re-embeds a resource's current content and replaces its rows
//! transactionally, so a reader never observes a half-written resource.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use meridian_core::chunk::chunk_text;
use meridian_core::embedding::vec_to_blob;
use meridian_core::model::Resource;
use meridian_core::store::{ChunkRecord, ChunkStore};
use sqlx::SqlitePool;

use crate::embedding_provider::Embedder;

pub struct SqliteChunkStore {
    pool: SqlitePool,
}

impl SqliteChunkStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Removes every indexed chunk for `resource_hash`, used before a
    /// resource is dropped from the catalog or re-synced.
    pub async fn delete_resource(&self, resource_hash: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunks WHERE resource_hash = ?").bind(resource_hash).execute(&self.pool).await?;
        Ok(())
    }

    /// Clears the entire index, used by `reset_collection`.
    pub async fn reset(&self) -> Result<()> {
        sqlx::query("DELETE FROM chunks").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn indexed_resource_hashes(&self) -> Result<HashSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT DISTINCT resource_hash FROM chunks").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(h,)| h).collect())
    }
}

#[async_trait]
impl ChunkStore for SqliteChunkStore {
    async fn chunk_corpus(&self, enabled: Option<&HashSet<String>>) -> Result<Vec<ChunkRecord>> {
        let rows: Vec<(String, i64, String, Option<Vec<u8>>, String, Option<String>)> = sqlx::query_as(
            "SELECT resource_hash, chunk_index, text, vector, display_name, source_url FROM chunks",
        )
        .fetch_all(&self.pool)
        .await?;

        let records = rows
            .into_iter()
            .filter(|(hash, ..)| match enabled {
                Some(set) => set.contains(hash),
                None => true,
            })
            .map(|(resource_hash, chunk_index, text, vector, display_name, source_url)| ChunkRecord {
                resource_hash,
                chunk_index: chunk_index as u32,
                text,
                vector: vector.map(|blob| meridian_core::embedding::blob_to_vec(&blob)),
                display_name,
                source_url,
            })
            .collect();
        Ok(records)
    }
}

/// Re-chunks `content` for `resource`, embeds every chunk (if `embedder`
/// is present), and replaces the resource's rows in a single transaction.
pub async fn sync_resource(
    pool: &SqlitePool,
    resource: &Resource,
    content: &str,
    chunk_size: usize,
    chunk_overlap: usize,
    embedder: Option<&dyn Embedder>,
) -> Result<usize> {
    let chunks = chunk_text(&resource.hash, content, chunk_size, chunk_overlap);

    let vectors: Vec<Option<Vec<f32>>> = if let Some(embedder) = embedder {
        if chunks.is_empty() {
            Vec::new()
        } else {
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            embedder.embed(&texts).await?.into_iter().map(Some).collect()
        }
    } else {
        vec![None; chunks.len()]
    };

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM chunks WHERE resource_hash = ?").bind(&resource.hash).execute(&mut *tx).await?;

    for (chunk, vector) in chunks.iter().zip(vectors.into_iter()) {
        let blob = vector.as_deref().map(vec_to_blob);
        sqlx::query(
            "INSERT INTO chunks (resource_hash, chunk_index, text, vector, display_name, source_url) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.resource_hash)
        .bind(chunk.chunk_index as i64)
        .bind(&chunk.text)
        .bind(blob)
        .bind(&resource.display_name)
        .bind(&resource.url)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(chunks.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use meridian_core::model::SourceType;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::collections::HashMap;
    use std::str::FromStr;

    async fn test_pool() -> SqlitePool {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await.unwrap();
        crate::migrate::run(&pool).await.unwrap();
        pool
    }

    fn resource(hash: &str) -> Resource {
        Resource {
            hash: hash.to_string(),
            display_name: "doc".to_string(),
            source_type: SourceType::Web,
            url: Some("https://example.com/doc".to_string()),
            ticket_id: None,
            git_commit: None,
            suffix: ".md".to_string(),
            size_bytes: 0,
            ingested_at: Utc::now(),
            extra: HashMap::new(),
            deleted: false,
        }
    }

    #[tokio::test]
    async fn sync_then_read_back_via_chunk_corpus() {
        let pool = test_pool().await;
        let r = resource("h1");
        let n = sync_resource(&pool, &r, "first paragraph.\n\nsecond paragraph.", 500, 0, None).await.unwrap();
        assert!(n >= 1);

        let store = SqliteChunkStore::new(pool);
        let corpus = store.chunk_corpus(None).await.unwrap();
        assert_eq!(corpus.len(), n);
        assert!(corpus.iter().all(|c| c.vector.is_none()));
    }

    #[tokio::test]
    async fn re_sync_replaces_previous_chunks() {
        let pool = test_pool().await;
        let r = resource("h2");
        sync_resource(&pool, &r, "one paragraph only.", 500, 0, None).await.unwrap();
        sync_resource(&pool, &r, "a.\n\nb.\n\nc.", 500, 0, None).await.unwrap();

        let store = SqliteChunkStore::new(pool);
        let corpus = store.chunk_corpus(None).await.unwrap();
        assert_eq!(corpus.len(), 3);
    }

    #[tokio::test]
    async fn chunk_corpus_respects_enabled_filter() {
        let pool = test_pool().await;
        sync_resource(&pool, &resource("a"), "text a", 500, 0, None).await.unwrap();
        sync_resource(&pool, &resource("b"), "text b", 500, 0, None).await.unwrap();

        let store = SqliteChunkStore::new(pool);
        let mut enabled = HashSet::new();
        enabled.insert("a".to_string());
        let corpus = store.chunk_corpus(Some(&enabled)).await.unwrap();
        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus[0].resource_hash, "a");
    }
}
