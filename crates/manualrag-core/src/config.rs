//! Lightweight configuration loader and path helpers.
//!
//! Uses Figment to merge serialized defaults + `config.toml` +
//! `config.<env>.toml` + `MANUALRAG_*` env vars (nested keys separated by
//! `__`). Provides helpers to expand `~` and `${VAR}` and to resolve relative
//! paths against a known base directory.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Self::load_from(Path::new("."), &env_name)
    }

    /// Loads `config.toml` and the per-environment overlay from `dir`.
    pub fn load_from(dir: &Path, env_name: &str) -> anyhow::Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(dir.join("config.toml")));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file(dir.join("config.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(dir.join("config.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(dir.join("config.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("MANUALRAG_").split("__"));
        Ok(Self { figment })
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// Extracts and validates the full typed settings tree.
    pub fn settings(&self) -> anyhow::Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to extract settings: {}", e))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub storage: StorageConfig,
    pub chunking: ChunkingConfig,
    pub fusion: FusionConfig,
    pub dedup: DedupConfig,
    pub rerank: RerankConfig,
    pub retrieval: RetrievalConfig,
    pub categories: CategoryConfig,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        self.fusion.validate()?;
        self.dedup.validate()?;
        self.retrieval.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl StorageConfig {
    pub fn docstore_path(&self, base: &Path) -> PathBuf {
        resolve_with_base(base, &self.data_dir).join("docstore.json")
    }

    pub fn keyword_index_dir(&self, base: &Path) -> PathBuf {
        resolve_with_base(base, &self.data_dir).join("keyword_index")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: "data".to_string() }
    }
}

/// Sizes are counted in chars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub min_parent_chars: usize,
    pub header_max_chars: usize,
    pub child_max_chars: usize,
    pub child_overlap_chars: usize,
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.child_max_chars == 0 {
            return Err(Error::InvalidConfig("chunking.child_max_chars must be > 0".into()));
        }
        if self.child_overlap_chars >= self.child_max_chars {
            return Err(Error::InvalidConfig(format!(
                "chunking.child_overlap_chars ({}) must be smaller than child_max_chars ({})",
                self.child_overlap_chars, self.child_max_chars
            )));
        }
        if self.header_max_chars == 0 {
            return Err(Error::InvalidConfig("chunking.header_max_chars must be > 0".into()));
        }
        Ok(())
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { min_parent_chars: 100, header_max_chars: 60, child_max_chars: 2400, child_overlap_chars: 400 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub rrf_k: f32,
    pub keyword_weight: f32,
    pub embedding_weight: f32,
}

impl FusionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.rrf_k >= 0.0) {
            return Err(Error::InvalidConfig(format!("fusion.rrf_k must be >= 0, got {}", self.rrf_k)));
        }
        if !(self.keyword_weight >= 0.0 && self.embedding_weight >= 0.0) {
            return Err(Error::InvalidConfig("fusion weights must be >= 0".into()));
        }
        Ok(())
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self { rrf_k: 60.0, keyword_weight: 0.5, embedding_weight: 0.5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub similarity_threshold: f32,
    pub short_text_chars: usize,
}

impl DedupConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "dedup.similarity_threshold must be in (0, 1], got {}",
                self.similarity_threshold
            )));
        }
        Ok(())
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { similarity_threshold: 0.85, short_text_chars: 50 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    /// Drop reranked candidates scoring below this (the best one is always kept).
    pub min_score: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Shortlist size handed to the reranker.
    pub candidate_k: usize,
    /// Default number of passages kept after reranking.
    pub final_k: usize,
    pub broad_intent_factor: usize,
    pub broad_intent_terms: Vec<String>,
    /// Upper bound for each external call; `0` disables the bound. A call that
    /// times out keeps running on its worker thread until it returns; at most
    /// 64 such workers run at once and further calls fall back immediately.
    pub signal_timeout_ms: u64,
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<()> {
        if self.candidate_k == 0 || self.final_k == 0 {
            return Err(Error::InvalidConfig("retrieval.candidate_k and final_k must be > 0".into()));
        }
        if self.broad_intent_factor == 0 {
            return Err(Error::InvalidConfig("retrieval.broad_intent_factor must be > 0".into()));
        }
        Ok(())
    }

    pub fn signal_timeout(&self) -> Option<std::time::Duration> {
        (self.signal_timeout_ms > 0).then(|| std::time::Duration::from_millis(self.signal_timeout_ms))
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_k: 50,
            final_k: 10,
            broad_intent_factor: 2,
            broad_intent_terms: ["show", "diagram", "picture", "image", "photo", "location", "look like", "see"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            signal_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub keyword: String,
    pub label: String,
}

/// Filename keyword → category label; the first matching rule wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryConfig {
    pub default_label: String,
    pub rules: Vec<CategoryRule>,
}

impl CategoryConfig {
    pub fn categorize(&self, filename: &str) -> String {
        let lower = filename.to_lowercase();
        self.rules
            .iter()
            .find(|rule| !rule.keyword.is_empty() && lower.contains(&rule.keyword.to_lowercase()))
            .map(|rule| rule.label.clone())
            .unwrap_or_else(|| self.default_label.clone())
    }
}

impl Default for CategoryConfig {
    fn default() -> Self {
        let rule = |keyword: &str, label: &str| CategoryRule { keyword: keyword.to_string(), label: label.to_string() };
        Self {
            default_label: "Dacia General".to_string(),
            rules: vec![
                rule("duster", "Dacia Duster"),
                rule("logan", "Dacia Logan"),
                rule("sandero", "Dacia Sandero"),
            ],
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
