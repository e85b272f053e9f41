use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.settings()?.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with a TOML document; used by tests and embedders of the core.
    pub fn from_toml_str(toml: &str) -> Self {
        let figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::string(toml));
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment.extract_inner(key).map_err(|e| ConfigError::Load(Box::new(e)))
    }

    pub fn settings(&self) -> Result<Settings, ConfigError> {
        let settings: Settings = self.figment.extract().map_err(|e| ConfigError::Load(Box::new(e)))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub chunking: ChunkingSettings,
    pub retrieval: RetrievalSettings,
    pub composer: ComposerSettings,
    pub backends: BackendSettings,
    pub index: IndexSettings,
    pub embedding: EmbeddingSettings,
    pub generation: GenerationSettings,
    pub policy: PolicySettings,
    pub data: DataSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunking.target_tokens == 0 {
            return Err(ConfigError::Invalid("chunking.target_tokens must be positive".into()));
        }
        if self.chunking.overlap_tokens >= self.chunking.target_tokens {
            return Err(ConfigError::Invalid("chunking.overlap_tokens must be below target_tokens".into()));
        }
        let r = &self.retrieval;
        if r.top_k == 0 || r.candidate_multiplier == 0 {
            return Err(ConfigError::Invalid("retrieval.top_k and candidate_multiplier must be positive".into()));
        }
        if r.dense_weight < 0.0 || r.sparse_weight < 0.0 || r.dense_weight + r.sparse_weight <= 0.0 {
            return Err(ConfigError::Invalid("retrieval weights must be non-negative and not both zero".into()));
        }
        if !(0.0..=1.0).contains(&self.composer.admission_threshold) {
            return Err(ConfigError::Invalid("composer.admission_threshold must lie in [0,1]".into()));
        }
        if self.embedding.dim == 0 {
            return Err(ConfigError::Invalid("embedding.dim must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingSettings {
    pub target_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self { target_tokens: 512, overlap_tokens: 50 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
    /// Each index is asked for `top_k * candidate_multiplier` hits.
    pub candidate_multiplier: usize,
    pub dense_weight: f32,
    pub sparse_weight: f32,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { top_k: 5, candidate_multiplier: 3, dense_weight: 0.6, sparse_weight: 0.4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ComposerSettings {
    pub admission_threshold: f32,
    pub context_token_budget: usize,
    /// Confidence ceiling applied when citation validation finds a problem.
    pub low_confidence_cap: f32,
}

impl Default for ComposerSettings {
    fn default() -> Self {
        Self { admission_threshold: 0.75, context_token_budget: 4000, low_confidence_cap: 0.3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendSettings {
    pub embedding_timeout_ms: u64,
    pub generation_timeout_ms: u64,
}

impl BackendSettings {
    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_millis(self.embedding_timeout_ms)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self { embedding_timeout_ms: 10_000, generation_timeout_ms: 30_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexSettings {
    /// How long a chunk may sit in the sparse index without a vector.
    pub dense_retry_window_secs: u64,
    pub dense_retry_interval_ms: u64,
    pub embed_batch_size: usize,
    pub writer_memory_bytes: usize,
    /// `memory` or `lancedb`.
    pub dense_backend: String,
}

impl IndexSettings {
    pub fn dense_retry_window(&self) -> Duration {
        Duration::from_secs(self.dense_retry_window_secs)
    }

    pub fn dense_retry_interval(&self) -> Duration {
        Duration::from_millis(self.dense_retry_interval_ms)
    }
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            dense_retry_window_secs: 300,
            dense_retry_interval_ms: 1_000,
            embed_batch_size: 64,
            writer_memory_bytes: 50_000_000,
            dense_backend: "memory".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// `hash` (deterministic feature hashing) or `bge-m3` (candle, feature-gated).
    pub provider: String,
    pub dim: usize,
    pub model_dir: Option<String>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self { provider: "hash".to_string(), dim: 384, model_dir: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationSettings {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.x.ai/v1".to_string(),
            model: "grok-4".to_string(),
            api_key_env: "XAI_API_KEY".to_string(),
            max_tokens: 512,
            temperature: 0.0,
        }
    }
}

/// `category -> permitted roles`. Categories without an entry are unrestricted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicySettings {
    pub categories: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DataSettings {
    pub raw_txt_dir: String,
    /// Empty keeps the keyword index in RAM.
    pub tantivy_index_dir: String,
    pub lancedb_index_dir: String,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            raw_txt_dir: "./data/txt".to_string(),
            tantivy_index_dir: String::new(),
            lancedb_index_dir: "./data/indexes/lancedb".to_string(),
        }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
