//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, plus pure helper functions for vector serialization and
//! similarity computation under any of the three configured distance
//! metrics.
//!
//! Concrete provider implementations (OpenAI, Ollama, local ONNX models)
//! live in the `meridian` app crate; this crate only knows the shape of
//! the interface and the math.

use serde::{Deserialize, Serialize};

/// Interface all embedding backends implement. Implementations are
/// created by the application and passed down to core functions that
/// need embedding metadata (dimension validation, model identity).
pub trait EmbeddingProvider: Send + Sync {
    /// The model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// The embedding vector dimensionality, `D`.
    fn dims(&self) -> usize;
}

/// Distance metric used by the vector index. Configured at deploy time;
/// changing it requires a full re-index since distances are not
/// comparable across metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    Cosine,
    L2,
    Ip,
}

impl Default for DistanceMetric {
    fn default() -> Self {
        DistanceMetric::Cosine
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes), the layout
/// stored in the chunk-vector table.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. Reverses [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`. Returns `0.0` for empty vectors,
/// mismatched lengths, or a near-zero denominator.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

/// Squared Euclidean distance, negated so larger is still "closer" — kept
/// on the same higher-is-better scale as the other metrics so downstream
/// ranking code never has to branch on metric.
pub fn neg_l2_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return f32::NEG_INFINITY;
    }
    let sum_sq: f32 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum();
    -sum_sq
}

/// Raw dot product (inner product).
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Computes a higher-is-better similarity score between two vectors
/// under the configured metric.
pub fn similarity(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        DistanceMetric::Cosine => cosine_similarity(a, b),
        DistanceMetric::L2 => neg_l2_distance(a, b),
        DistanceMetric::Ip => inner_product(a, b),
    }
}

/// Validates that an embedding's dimension matches the deployment's
/// configured `embedding_dim`. A mismatch is a fatal configuration error
/// (per the spec's startup-validation rule).
pub fn validate_dim(vector: &[f32], expected_dim: usize) -> bool {
    vector.len() == expected_dim
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob);
        assert_eq!(vec, restored);
    }

    #[test]
    fn cosine_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors_is_zero() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_opposite_vectors_is_negative_one() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_empty_or_mismatched_is_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn l2_identical_vectors_is_zero_distance() {
        let v = vec![1.0, 2.0, 3.0];
        assert_eq!(neg_l2_distance(&v, &v), 0.0);
    }

    #[test]
    fn l2_farther_vectors_score_lower() {
        let origin = vec![0.0, 0.0];
        let near = vec![1.0, 0.0];
        let far = vec![5.0, 0.0];
        assert!(neg_l2_distance(&origin, &near) > neg_l2_distance(&origin, &far));
    }

    #[test]
    fn dim_validation() {
        assert!(validate_dim(&[0.0; 384], 384));
        assert!(!validate_dim(&[0.0; 384], 768));
    }
}
