//! Configuration façade.
//!
//! A single TOML document with the sections `{global, data_manager,
//! a2rchi, services, sources, utils}`. Static fields (embedding model,
//! dimension, chunk size, data root) are fixed once loaded and require a
//! restart to change. Runtime-changeable fields (model selection,
//! temperature, top_p/top_k, retrieval k, prompt selection, verbosity)
//! live on [`RuntimeConfig`] behind a `RwLock`, settable via the admin
//! endpoint and effective immediately for subsequent turns.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Result};
use meridian_core::embedding::DistanceMetric;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub data_manager: DataManagerConfig,
    #[serde(default)]
    pub a2rchi: A2rchiConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub utils: UtilsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub data_root: PathBuf,
    pub log_level: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self { data_root: PathBuf::from("./data"), log_level: "info".to_string() }
    }
}

/// C2's static deploy-time configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataManagerConfig {
    pub embedding_model: String,
    pub embedding_provider: String,
    pub embedding_dim: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub distance_metric: DistanceMetric,
    pub bm25_k1: f32,
    pub bm25_b: f32,
    pub parallel_workers: usize,
    pub reset_collection: bool,
}

impl Default for DataManagerConfig {
    fn default() -> Self {
        Self {
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_provider: "disabled".to_string(),
            embedding_dim: 1536,
            chunk_size: 500,
            chunk_overlap: 50,
            distance_metric: DistanceMetric::Cosine,
            bm25_k1: 0.5,
            bm25_b: 0.75,
            parallel_workers: 4,
            reset_collection: false,
        }
    }
}

/// C4's pipeline/agent/prompt declarations. The section is named `a2rchi`
/// to keep the external configuration surface's field names stable for
/// operators and backup tooling, matching spec §6's literal section list.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct A2rchiConfig {
    pub pipelines: HashMap<String, PipelineConfig>,
    pub prompts: HashMap<String, String>,
    pub models: HashMap<String, ModelConfig>,
    pub safety_enabled: bool,
    pub max_tool_steps: usize,
    pub tool_timeout_secs: u64,
    pub runtime: RuntimeConfig,
}

impl Default for A2rchiConfig {
    fn default() -> Self {
        Self {
            pipelines: HashMap::new(),
            prompts: HashMap::new(),
            models: HashMap::new(),
            safety_enabled: false,
            max_tool_steps: 8,
            tool_timeout_secs: 30,
            runtime: RuntimeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub kind: PipelineKind,
    pub condense_model: Option<String>,
    pub chat_model: String,
    pub max_tokens: usize,
    pub reserved_tokens: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    Qa,
    Grading,
    ImageProcessing,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    pub model_name: String,
}

/// Fields settable at runtime via `POST /admin/runtime-config`, effective
/// immediately for subsequent turns.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub model_selection: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub retrieval_k: usize,
    pub prompt_selection: String,
    pub verbosity: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            model_selection: "default".to_string(),
            temperature: 0.2,
            top_p: 1.0,
            top_k: 40,
            retrieval_k: 12,
            prompt_selection: "default".to_string(),
            verbosity: "normal".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub host: String,
    pub port: u16,
    pub admin_token: Option<String>,
    pub cors_any: bool,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 8080, admin_token: None, cors_any: true }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub web: Vec<WebSourceConfig>,
    pub git: Vec<GitSourceConfig>,
    pub tickets: Vec<TicketSourceConfig>,
    pub uploads_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSourceConfig {
    pub name: String,
    pub seed_urls: Vec<String>,
    pub depth: u32,
    pub max_pages: Option<u32>,
    pub cron: Option<String>,
    #[serde(default)]
    pub reset_data: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitSourceConfig {
    pub name: String,
    pub url: String,
    pub mkdocs_subtree: Option<String>,
    #[serde(default)]
    pub code: bool,
    #[serde(default)]
    pub readme_only: bool,
    pub cron: Option<String>,
    #[serde(default)]
    pub reset_data: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TicketSourceConfig {
    pub name: String,
    pub backend: String,
    pub cron: Option<String>,
    #[serde(default)]
    pub reset_data: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UtilsConfig {
    pub tombstone_retention_days: i64,
    pub admin_bearer_header: String,
}

impl Default for UtilsConfig {
    fn default() -> Self {
        Self { tombstone_retention_days: 30, admin_bearer_header: "authorization".to_string() }
    }
}

/// Loads and validates a TOML configuration document.
pub fn load_config(path: &std::path::Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&text)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.data_manager.chunk_size == 0 {
        bail!("data_manager.chunk_size must be > 0");
    }
    if config.data_manager.chunk_overlap >= config.data_manager.chunk_size {
        bail!("data_manager.chunk_overlap must be smaller than chunk_size");
    }
    match config.data_manager.embedding_provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!("unknown embedding provider: {other}"),
    }
    if config.data_manager.embedding_provider != "disabled" && config.data_manager.embedding_dim == 0 {
        bail!("data_manager.embedding_dim must be set when embeddings are enabled");
    }
    if config.a2rchi.runtime.retrieval_k == 0 {
        bail!("a2rchi.runtime.retrieval_k must be >= 1");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let config = Config {
            global: GlobalConfig::default(),
            data_manager: DataManagerConfig::default(),
            a2rchi: A2rchiConfig::default(),
            services: ServicesConfig::default(),
            sources: SourcesConfig::default(),
            utils: UtilsConfig::default(),
        };
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn overlap_ge_chunk_size_is_rejected() {
        let mut config = DataManagerConfig::default();
        config.chunk_overlap = config.chunk_size;
        let full = Config {
            global: GlobalConfig::default(),
            data_manager: config,
            a2rchi: A2rchiConfig::default(),
            services: ServicesConfig::default(),
            sources: SourcesConfig::default(),
            utils: UtilsConfig::default(),
        };
        assert!(validate(&full).is_err());
    }
}
