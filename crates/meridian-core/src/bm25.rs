//! A configurable BM25 scorer.
//!
//! The teacher delegates keyword ranking to SQLite FTS5's built-in
//! `bm25()` ranking function, which hardcodes `k1=1.2, b=0.75` and exposes
//! no way to tune them. The corpus here needs `k1`/`b` as deploy-time
//! configuration (default `k1=0.5, b=0.75`), so this module computes BM25
//! directly over an in-memory view of the in-scope chunk corpus at query
//! time — the corpus SQLite still stores the chunk text; only the scoring
//! function is hand-rolled.

use std::collections::HashMap;

/// One document in the corpus being scored, identified by an opaque
/// caller-assigned index into the caller's own result vector.
pub struct Bm25Document<'a> {
    pub id: usize,
    pub text: &'a str,
}

/// Term-frequency and length statistics the scorer needs for a corpus.
struct CorpusStats {
    doc_lengths: Vec<usize>,
    avg_doc_length: f32,
    doc_term_freqs: Vec<HashMap<String, usize>>,
    doc_freq: HashMap<String, usize>,
    n_docs: usize,
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

fn build_stats(docs: &[Bm25Document]) -> CorpusStats {
    let mut doc_lengths = Vec::with_capacity(docs.len());
    let mut doc_term_freqs = Vec::with_capacity(docs.len());
    let mut doc_freq: HashMap<String, usize> = HashMap::new();

    for doc in docs {
        let tokens = tokenize(doc.text);
        doc_lengths.push(tokens.len());
        let mut freqs: HashMap<String, usize> = HashMap::new();
        for token in &tokens {
            *freqs.entry(token.clone()).or_insert(0) += 1;
        }
        for term in freqs.keys() {
            *doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
        doc_term_freqs.push(freqs);
    }

    let n_docs = docs.len();
    let avg_doc_length = if n_docs == 0 {
        0.0
    } else {
        doc_lengths.iter().sum::<usize>() as f32 / n_docs as f32
    };

    CorpusStats { doc_lengths, avg_doc_length, doc_term_freqs, doc_freq, n_docs }
}

/// Scores every document in `docs` against `query` using BM25 with the
/// given `k1`/`b`, returning `(doc_id, score)` pairs sorted by score
/// descending. The corpus is `docs` itself — the caller is responsible
/// for scoping it to "all indexed chunks at query time" before calling.
///
/// Returns an empty vector for an empty corpus.
pub fn score_all(query: &str, docs: &[Bm25Document], k1: f32, b: f32) -> Vec<(usize, f32)> {
    if docs.is_empty() {
        return Vec::new();
    }

    let stats = build_stats(docs);
    let query_terms = tokenize(query);
    if query_terms.is_empty() {
        return docs.iter().map(|d| (d.id, 0.0)).collect();
    }

    let mut scored: Vec<(usize, f32)> = docs
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            let score = bm25_score(&query_terms, i, &stats, k1, b);
            (doc.id, score)
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

fn bm25_score(query_terms: &[String], doc_index: usize, stats: &CorpusStats, k1: f32, b: f32) -> f32 {
    let doc_len = stats.doc_lengths[doc_index] as f32;
    let term_freqs = &stats.doc_term_freqs[doc_index];
    let mut score = 0.0f32;

    for term in query_terms {
        let Some(&tf) = term_freqs.get(term) else { continue };
        let tf = tf as f32;
        let df = *stats.doc_freq.get(term).unwrap_or(&0) as f32;
        if df == 0.0 {
            continue;
        }
        let idf = ((stats.n_docs as f32 - df + 0.5) / (df + 0.5) + 1.0).ln();
        let denom = tf + k1 * (1.0 - b + b * (doc_len / stats.avg_doc_length.max(1.0)));
        score += idf * (tf * (k1 + 1.0)) / denom;
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs(texts: &[&str]) -> Vec<(usize, String)> {
        texts.iter().enumerate().map(|(i, t)| (i, t.to_string())).collect()
    }

    #[test]
    fn empty_corpus_returns_empty() {
        let result = score_all("rust", &[], 0.5, 0.75);
        assert!(result.is_empty());
    }

    #[test]
    fn exact_term_match_outranks_unrelated_document() {
        let owned = docs(&["the quick brown fox jumps over the lazy dog", "rust is a systems programming language"]);
        let corpus: Vec<Bm25Document> = owned.iter().map(|(i, t)| Bm25Document { id: *i, text: t }).collect();
        let scored = score_all("rust programming", &corpus, 0.5, 0.75);
        assert_eq!(scored[0].0, 1);
        assert!(scored[0].1 > scored[1].1);
    }

    #[test]
    fn query_with_no_matching_terms_scores_zero() {
        let owned = docs(&["apples and oranges"]);
        let corpus: Vec<Bm25Document> = owned.iter().map(|(i, t)| Bm25Document { id: *i, text: t }).collect();
        let scored = score_all("xylophone", &corpus, 0.5, 0.75);
        assert_eq!(scored[0].1, 0.0);
    }

    #[test]
    fn k1_and_b_are_configurable_and_change_ranking_sensitivity() {
        let owned = docs(&["rust rust rust", "rust systems language overview text padded out longer"]);
        let corpus: Vec<Bm25Document> = owned.iter().map(|(i, t)| Bm25Document { id: *i, text: t }).collect();
        let default_scores = score_all("rust", &corpus, 0.5, 0.75);
        let high_b_scores = score_all("rust", &corpus, 0.5, 1.0);
        assert_ne!(default_scores, high_b_scores);
    }
}
