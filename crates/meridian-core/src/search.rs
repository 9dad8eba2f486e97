//! Hybrid lexical+semantic retrieval.
//!
//! Generic over [`ChunkStore`] so the algorithm has no database or
//! configuration dependency; the calling application embeds the query,
//! builds a [`SearchParams`], and hands in whichever store implements the
//! trait.
//!
//! # Algorithm
//!
//! 1. Fetch the in-scope chunk corpus (respecting the per-conversation
//!    enabled-resource filter).
//! 2. `lexical_search`: score every chunk with BM25 (`k1`, `b` from
//!    `SearchParams`).
//! 3. `semantic_search`: score every chunk by the configured distance
//!    metric against the query vector.
//! 4. `hybrid_search`: run both, min-max normalize each arm's scores
//!    independently, combine as `w_lex*lexical + w_sem*semantic`.
//! 5. Deduplicate by `(resource_hash, chunk_index)` keeping the max score
//!    (a chunk can appear in both arms' candidate sets).
//! 6. Sort by `(score desc, resource_hash asc, chunk_index asc)` and
//!    truncate to `k`.

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};

use crate::bm25::{self, Bm25Document};
use crate::embedding::{similarity, DistanceMetric};
use crate::model::ScoredDocument;
use crate::store::{ChunkRecord, ChunkStore};

/// Retrieval tuning parameters.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Weight for the lexical arm: `hybrid = w_lex*lexical + w_sem*semantic`.
    pub w_lex: f64,
    /// Weight for the semantic arm.
    pub w_sem: f64,
    pub bm25_k1: f32,
    pub bm25_b: f32,
    pub distance_metric: DistanceMetric,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self { w_lex: 0.6, w_sem: 0.4, bm25_k1: 0.5, bm25_b: 0.75, distance_metric: DistanceMetric::Cosine }
    }
}

fn record_key(r: &ChunkRecord) -> (String, u32) {
    (r.resource_hash.clone(), r.chunk_index)
}

fn to_scored(record: &ChunkRecord, score: f64) -> ScoredDocument {
    ScoredDocument {
        resource_hash: record.resource_hash.clone(),
        chunk_index: record.chunk_index,
        text: record.text.clone(),
        score: score as f32,
        display_name: record.display_name.clone(),
        source_url: record.source_url.clone(),
    }
}

/// Min-max normalizes a set of `(key, raw_score)` pairs to `[0.0, 1.0]`.
/// All-equal inputs normalize to `1.0`; an empty input returns empty.
fn normalize(scores: &[(String, f64)]) -> HashMap<String, f64> {
    if scores.is_empty() {
        return HashMap::new();
    }
    let min = scores.iter().map(|(_, s)| *s).fold(f64::INFINITY, f64::min);
    let max = scores.iter().map(|(_, s)| *s).fold(f64::NEG_INFINITY, f64::max);
    scores
        .iter()
        .map(|(k, s)| {
            let norm = if (max - min).abs() < f64::EPSILON { 1.0 } else { (s - min) / (max - min) };
            (k.clone(), norm)
        })
        .collect()
}

fn sort_and_truncate(mut results: Vec<ScoredDocument>, k: usize) -> Vec<ScoredDocument> {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.resource_hash.cmp(&b.resource_hash))
            .then_with(|| a.chunk_index.cmp(&b.chunk_index))
    });
    results.truncate(k);
    results
}

/// BM25 keyword search over the in-scope corpus. Returns at most `k`
/// results; an empty corpus returns `[]`.
pub async fn lexical_search<S: ChunkStore>(
    store: &S,
    query: &str,
    k: usize,
    enabled: Option<&HashSet<String>>,
    params: &SearchParams,
) -> Result<Vec<ScoredDocument>> {
    let corpus = store.chunk_corpus(enabled).await?;
    if corpus.is_empty() {
        return Ok(Vec::new());
    }
    let docs: Vec<Bm25Document> = corpus.iter().enumerate().map(|(i, c)| Bm25Document { id: i, text: &c.text }).collect();
    let scored = bm25::score_all(query, &docs, params.bm25_k1, params.bm25_b);
    let results = scored.into_iter().map(|(i, score)| to_scored(&corpus[i], score as f64)).collect();
    Ok(sort_and_truncate(results, k))
}

/// Vector similarity search over the in-scope corpus under the configured
/// distance metric. Chunks with no stored vector are skipped. An empty
/// corpus, or a corpus with no embedded chunks, returns `[]`.
pub async fn semantic_search<S: ChunkStore>(
    store: &S,
    query_vec: &[f32],
    k: usize,
    enabled: Option<&HashSet<String>>,
    params: &SearchParams,
) -> Result<Vec<ScoredDocument>> {
    let corpus = store.chunk_corpus(enabled).await?;
    let results = corpus
        .iter()
        .filter_map(|c| {
            let vector = c.vector.as_ref()?;
            let score = similarity(params.distance_metric, query_vec, vector) as f64;
            Some(to_scored(c, score))
        })
        .collect();
    Ok(sort_and_truncate(results, k))
}

/// Runs both retrievers, normalizes each arm's scores independently,
/// fuses them by weighted sum, deduplicates by `(resource_hash,
/// chunk_index)` keeping the max combined score, and returns the top `k`
/// ordered `(score desc, resource_hash asc, chunk_index asc)`.
pub async fn hybrid_search<S: ChunkStore + ?Sized>(
    store: &S,
    query: &str,
    query_vec: &[f32],
    k: usize,
    enabled: Option<&HashSet<String>>,
    params: &SearchParams,
) -> Result<Vec<ScoredDocument>> {
    if params.w_lex < 0.0 || params.w_sem < 0.0 {
        bail!("hybrid_search weights must be non-negative");
    }
    let corpus = store.chunk_corpus(enabled).await?;
    if corpus.is_empty() {
        return Ok(Vec::new());
    }

    let by_key: HashMap<(String, u32), &ChunkRecord> = corpus.iter().map(|c| (record_key(c), c)).collect();

    let docs: Vec<Bm25Document> = corpus.iter().enumerate().map(|(i, c)| Bm25Document { id: i, text: &c.text }).collect();
    let lexical_raw: Vec<(String, f64)> = bm25::score_all(query, &docs, params.bm25_k1, params.bm25_b)
        .into_iter()
        .map(|(i, score)| (format!("{}#{}", corpus[i].resource_hash, corpus[i].chunk_index), score as f64))
        .collect();

    let semantic_raw: Vec<(String, f64)> = corpus
        .iter()
        .filter_map(|c| {
            let vector = c.vector.as_ref()?;
            let score = similarity(params.distance_metric, query_vec, vector) as f64;
            Some((format!("{}#{}", c.resource_hash, c.chunk_index), score))
        })
        .collect();

    let lex_norm = normalize(&lexical_raw);
    let sem_norm = normalize(&semantic_raw);

    let mut all_keys: HashSet<String> = HashSet::new();
    all_keys.extend(lex_norm.keys().cloned());
    all_keys.extend(sem_norm.keys().cloned());

    let mut best: HashMap<(String, u32), f64> = HashMap::new();
    for key in all_keys {
        let lex = lex_norm.get(&key).copied().unwrap_or(0.0);
        let sem = sem_norm.get(&key).copied().unwrap_or(0.0);
        let combined = params.w_lex * lex + params.w_sem * sem;
        let (hash, idx) = split_key(&key);
        let entry = best.entry((hash, idx)).or_insert(combined);
        if combined > *entry {
            *entry = combined;
        }
    }

    let results = best
        .into_iter()
        .filter_map(|(key, score)| by_key.get(&key).map(|record| to_scored(record, score)))
        .collect();

    Ok(sort_and_truncate(results, k))
}

fn split_key(key: &str) -> (String, u32) {
    let (hash, idx) = key.rsplit_once('#').expect("keys are always produced with a '#' separator");
    (hash.to_string(), idx.parse().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryChunkStore;

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
    async fn empty_corpus_returns_empty_results() {
        let store = InMemoryChunkStore::new();
        let params = SearchParams::default();
        let results = hybrid_search(&store, "anything", &[1.0, 0.0], 10, None, &params).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn lexical_search_ranks_exact_term_match_first() {
        let store = InMemoryChunkStore::new();
        store.insert(record("r1", 0, "rust systems programming", None));
        store.insert(record("r2", 0, "baking bread recipes", None));
        let params = SearchParams::default();
        let results = lexical_search(&store, "rust", 10, None, &params).await.unwrap();
        assert_eq!(results[0].resource_hash, "r1");
    }

    #[tokio::test]
    async fn semantic_search_skips_chunks_without_vectors() {
        let store = InMemoryChunkStore::new();
        store.insert(record("r1", 0, "has a vector", Some(vec![1.0, 0.0])));
        store.insert(record("r2", 0, "no vector here", None));
        let params = SearchParams::default();
        let results = semantic_search(&store, &[1.0, 0.0], 10, None, &params).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].resource_hash, "r1");
    }

    #[tokio::test]
    async fn hybrid_search_respects_the_enabled_filter() {
        let store = InMemoryChunkStore::new();
        store.insert(record("r1", 0, "rust programming", Some(vec![1.0, 0.0])));
        store.insert(record("r2", 0, "rust programming", Some(vec![1.0, 0.0])));
        let mut enabled = HashSet::new();
        enabled.insert("r1".to_string());
        let params = SearchParams::default();
        let results = hybrid_search(&store, "rust", &[1.0, 0.0], 10, Some(&enabled), &params).await.unwrap();
        assert!(results.iter().all(|r| r.resource_hash == "r1"));
    }

    #[tokio::test]
    async fn hybrid_search_deduplicates_by_resource_and_chunk_index() {
        let store = InMemoryChunkStore::new();
        store.insert(record("r1", 0, "rust programming language", Some(vec![1.0, 0.0])));
        let params = SearchParams::default();
        let results = hybrid_search(&store, "rust", &[1.0, 0.0], 10, None, &params).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn results_are_capped_at_k() {
        let store = InMemoryChunkStore::new();
        for i in 0..5 {
            store.insert(record(&format!("r{i}"), 0, "rust programming", Some(vec![1.0, 0.0])));
        }
        let params = SearchParams::default();
        let results = hybrid_search(&store, "rust", &[1.0, 0.0], 3, None, &params).await.unwrap();
        assert_eq!(results.len(), 3);
    }
}
