//! Concrete embedding backends.
//!
//! [`meridian_core::embedding::EmbeddingProvider`] only describes a
//! provider's identity (model name, dimension); the actual I/O-bound
//! `embed` call lives here since it needs a network client (OpenAI,
//! Ollama) or, for `local`, a synchronous deterministic fallback.

use anyhow::{bail, Result};
use async_trait::async_trait;
use meridian_core::embedding::EmbeddingProvider;
use sha2::{Digest, Sha256};

#[async_trait]
pub trait Embedder: EmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Builds the configured provider. `"disabled"` has no caller-visible
/// instance: callers that see it configured should skip embedding
/// entirely rather than construct a provider.
pub fn build_embedder(provider: &str, model_name: &str, dims: usize) -> Result<Box<dyn Embedder>> {
    match provider {
        "openai" => Ok(Box::new(OpenAiEmbedder::new(model_name.to_string(), dims))),
        "ollama" => Ok(Box::new(OllamaEmbedder::new(model_name.to_string(), dims))),
        "local" => Ok(Box::new(LocalEmbedder::new(model_name.to_string(), dims))),
        other => bail!("unknown embedding provider: {other}"),
    }
}

pub struct OpenAiEmbedder {
    model_name: String,
    dims: usize,
    client: reqwest::Client,
    api_base: String,
}

impl OpenAiEmbedder {
    pub fn new(model_name: String, dims: usize) -> Self {
        let api_base = std::env::var("OPENAI_API_BASE").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        Self { model_name, dims, client: reqwest::Client::new(), api_base }
    }
}

impl EmbeddingProvider for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
        let resp = self
            .client
            .post(format!("{}/embeddings", self.api_base))
            .bearer_auth(api_key)
            .json(&serde_json::json!({ "model": self.model_name, "input": texts }))
            .send()
            .await?
            .error_for_status()?;
        let body: OpenAiEmbeddingResponse = resp.json().await?;
        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[derive(serde::Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingDatum>,
}

#[derive(serde::Deserialize)]
struct OpenAiEmbeddingDatum {
    embedding: Vec<f32>,
}

pub struct OllamaEmbedder {
    model_name: String,
    dims: usize,
    client: reqwest::Client,
    api_base: String,
}

impl OllamaEmbedder {
    pub fn new(model_name: String, dims: usize) -> Self {
        let api_base = std::env::var("OLLAMA_API_BASE").unwrap_or_else(|_| "http://localhost:11434".to_string());
        Self { model_name, dims, client: reqwest::Client::new(), api_base }
    }
}

impl EmbeddingProvider for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let resp = self
                .client
                .post(format!("{}/api/embeddings", self.api_base))
                .json(&serde_json::json!({ "model": self.model_name, "prompt": text }))
                .send()
                .await?
                .error_for_status()?;
            let body: OllamaEmbeddingResponse = resp.json().await?;
            out.push(body.embedding);
        }
        Ok(out)
    }
}

#[derive(serde::Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

/// A dependency-free, deterministic fallback: each text is hashed with
/// SHA-256 in repeated rounds to fill `dims` floats in `[-1.0, 1.0]`.
/// Not a semantic embedding — useful for offline development and tests
/// where the hybrid-search arithmetic matters more than recall quality.
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
}

impl LocalEmbedder {
    pub fn new(model_name: String, dims: usize) -> Self {
        Self { model_name, dims }
    }
}

impl EmbeddingProvider for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_embed(t, self.dims)).collect())
    }
}

fn hash_embed(text: &str, dims: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(dims);
    let mut round: u32 = 0;
    while out.len() < dims {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(round.to_le_bytes());
        let digest = hasher.finalize();
        for chunk in digest.chunks_exact(4) {
            if out.len() >= dims {
                break;
            }
            let bits = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            out.push((bits as f32 / u32::MAX as f32) * 2.0 - 1.0);
        }
        round += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_embedder_is_deterministic() {
        let embedder = LocalEmbedder::new("local-hash".to_string(), 32);
        let a = embedder.embed(&["hello world".to_string()]).await.unwrap();
        let b = embedder.embed(&["hello world".to_string()]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 32);
    }

    #[tokio::test]
    async fn local_embedder_differs_across_texts() {
        let embedder = LocalEmbedder::new("local-hash".to_string(), 16);
        let a = embedder.embed(&["alpha".to_string()]).await.unwrap();
        let b = embedder.embed(&["beta".to_string()]).await.unwrap();
        assert_ne!(a[0], b[0]);
    }

    #[test]
    fn build_embedder_rejects_unknown_provider() {
        assert!(build_embedder("magic", "m", 8).is_err());
    }
}
