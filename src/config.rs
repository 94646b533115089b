//! Configuration parsing and validation.
//!
//! Candor is configured via a TOML file (default: `config/candor.toml`).
//! Most sections are optional and fall back to the defaults below.
//!
//! # Example Configuration
//!
//! ```toml
//! [db]
//! path = "./data/candor.sqlite"
//!
//! [retrieval]
//! match_count = 8
//! backend = "sqlite"          # or "rpc"
//! index_dims = 1536
//!
//! [retrieval.boost]
//! patterns = ['(?i)\bppl\b']
//! terms = ["PPL"]
//!
//! [confidence]
//! high = 0.82
//! medium = 0.60
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [generation]
//! provider = "openai"
//! model = "gpt-4.1-mini"
//!
//! [server]
//! bind = "127.0.0.1:7331"
//! ```
//!
//! # Validation
//!
//! [`load_config`] rejects, with a message naming the offending key:
//! - `retrieval.match_count` of zero
//! - thresholds outside `0 <= medium <= high <= 1`
//! - boost patterns that do not compile
//! - an enabled embedding provider without `model` or `dims`
//! - `embedding.dims` different from `retrieval.index_dims`
//! - `backend = "rpc"` without a `[retrieval.rpc]` section
//! - unknown provider names and zero timeouts

use anyhow::{bail, Context, Result};
use candor_core::boost::{
    KeywordBoost, DEFAULT_PATTERNS, DEFAULT_PSEUDO_SIMILARITY, DEFAULT_TERMS,
};
use candor_core::confidence::Thresholds;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub confidence: Thresholds,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub title: TitleConfig,
    #[serde(default)]
    pub persona: PersonaConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Where vector matches and keyword hits come from.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Documents and vectors stored in the local SQLite database.
    #[default]
    Sqlite,
    /// A remote PostgREST-style endpoint (see [`RpcConfig`]).
    Rpc,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Default number of matches when the caller does not supply one.
    #[serde(default = "default_match_count")]
    pub match_count: usize,
    #[serde(default)]
    pub backend: Backend,
    /// Dimensionality of the stored vectors. Must equal `embedding.dims`.
    #[serde(default)]
    pub index_dims: Option<usize>,
    /// Vector matches below this similarity are dropped by the backend.
    #[serde(default)]
    pub similarity_threshold: Option<f64>,
    /// Upper bound for one embedding, vector match or keyword search call.
    /// The embedding bound covers all of its retries, so a small value cuts
    /// the retry schedule short (see [`EmbeddingConfig::worst_case_secs`]).
    #[serde(default = "default_retrieval_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub boost: BoostConfig,
    #[serde(default)]
    pub rpc: Option<RpcConfig>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            match_count: default_match_count(),
            backend: Backend::default(),
            index_dims: None,
            similarity_threshold: None,
            timeout_secs: default_retrieval_timeout_secs(),
            boost: BoostConfig::default(),
            rpc: None,
        }
    }
}

fn default_match_count() -> usize {
    8
}
fn default_retrieval_timeout_secs() -> u64 {
    10
}

/// Keyword boost rules. See [`candor_core::boost`].
///
/// On the sqlite backend `terms` match case-insensitively for ASCII letters
/// only.
#[derive(Debug, Deserialize, Clone)]
pub struct BoostConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_boost_patterns")]
    pub patterns: Vec<String>,
    #[serde(default = "default_boost_terms")]
    pub terms: Vec<String>,
    #[serde(default = "default_pseudo_similarity")]
    pub pseudo_similarity: f64,
}

impl Default for BoostConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            patterns: default_boost_patterns(),
            terms: default_boost_terms(),
            pseudo_similarity: DEFAULT_PSEUDO_SIMILARITY,
        }
    }
}

impl BoostConfig {
    /// Compile the configured rules. A disabled boost never triggers.
    pub fn compile(&self) -> Result<KeywordBoost> {
        if !self.enabled {
            return Ok(KeywordBoost::disabled());
        }
        KeywordBoost::new(&self.patterns, &self.terms, self.pseudo_similarity)
            .context("retrieval.boost.patterns contains an invalid regex")
    }
}

fn default_true() -> bool {
    true
}
fn default_boost_patterns() -> Vec<String> {
    DEFAULT_PATTERNS.iter().map(|s| s.to_string()).collect()
}
fn default_boost_terms() -> Vec<String> {
    DEFAULT_TERMS.iter().map(|s| s.to_string()).collect()
}
fn default_pseudo_similarity() -> f64 {
    DEFAULT_PSEUDO_SIMILARITY
}

/// Remote PostgREST-style corpus (`backend = "rpc"`).
#[derive(Debug, Deserialize, Clone)]
pub struct RpcConfig {
    /// Base URL, e.g. `https://project.supabase.co`.
    pub url: String,
    /// Name of the vector match function under `/rest/v1/rpc/`.
    #[serde(default = "default_rpc_function")]
    pub function: String,
    /// Table scanned by keyword search.
    #[serde(default = "default_rpc_table")]
    pub table: String,
    #[serde(default = "default_rpc_key_env")]
    pub api_key_env: String,
}

fn default_rpc_function() -> String {
    "match_documents".to_string()
}
fn default_rpc_table() -> String {
    "documents".to_string()
}
fn default_rpc_key_env() -> String {
    "SUPABASE_SERVICE_ROLE_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"openai"` or `"disabled"`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_openai_url")]
    pub url: String,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: default_openai_url(),
            api_key_env: default_openai_key_env(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Longest one `embed` call can take when every attempt times out:
    /// each attempt's timeout plus the 1, 2, 4 ... 32 second backoffs.
    pub fn worst_case_secs(&self) -> u64 {
        (0..=self.max_retries).fold(0u64, |total, attempt| {
            let backoff = if attempt == 0 {
                0
            } else {
                1u64 << (attempt - 1).min(5)
            };
            total
                .saturating_add(self.timeout_secs)
                .saturating_add(backoff)
        })
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_openai_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `"openai"` (any OpenAI-compatible endpoint) or `"echo"`.
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_openai_url")]
    pub url: String,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Bound on connecting and receiving the first byte.
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    /// Bound on the gap between two streamed increments.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Capacity of the per-request increment channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: None,
            url: default_openai_url(),
            api_key_env: default_openai_key_env(),
            temperature: None,
            timeout_secs: default_generation_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_generation_provider() -> String {
    "echo".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    60
}
fn default_idle_timeout_secs() -> u64 {
    30
}
fn default_channel_capacity() -> usize {
    64
}

/// First-turn conversation title generation.
#[derive(Debug, Deserialize, Clone)]
pub struct TitleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_title_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_title_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_title_max_chars")]
    pub max_chars: usize,
}

impl Default for TitleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_input_chars: default_title_max_input_chars(),
            max_tokens: default_title_max_tokens(),
            max_chars: default_title_max_chars(),
        }
    }
}

fn default_title_max_input_chars() -> usize {
    400
}
fn default_title_max_tokens() -> u32 {
    24
}
fn default_title_max_chars() -> usize {
    80
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PersonaConfig {
    /// Override the built-in persona with the contents of this file.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Version tag logged with every request. Defaults to the built-in tag.
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7331".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `"info"` or `"candor=debug,info"`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Read, parse, and validate the configuration at `path`.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints that serde cannot express.
pub fn validate(config: &Config) -> Result<()> {
    // Retrieval
    if config.retrieval.match_count == 0 {
        bail!("retrieval.match_count must be >= 1");
    }
    if config.retrieval.timeout_secs == 0 {
        bail!("retrieval.timeout_secs must be > 0");
    }
    if let Some(t) = config.retrieval.similarity_threshold {
        if !(0.0..=1.0).contains(&t) {
            bail!("retrieval.similarity_threshold must be in [0.0, 1.0]");
        }
    }
    if config.retrieval.backend == Backend::Rpc && config.retrieval.rpc.is_none() {
        bail!("retrieval.backend = \"rpc\" requires a [retrieval.rpc] section");
    }
    let boost = &config.retrieval.boost;
    if !(0.0..=1.0).contains(&boost.pseudo_similarity) {
        bail!("retrieval.boost.pseudo_similarity must be in [0.0, 1.0]");
    }
    boost.compile()?;

    // Confidence
    let c = &config.confidence;
    if !(0.0 <= c.medium && c.medium <= c.high && c.high <= 1.0) {
        bail!(
            "confidence thresholds must satisfy 0 <= medium <= high <= 1 (got medium = {}, high = {})",
            c.medium,
            c.high
        );
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        let dims = match config.embedding.dims {
            Some(d) if d > 0 => d,
            _ => bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            ),
        };
        if let Some(index_dims) = config.retrieval.index_dims {
            if index_dims != dims {
                bail!(
                    "embedding.dims ({}) does not match retrieval.index_dims ({}); \
                     the corpus was built with a different embedding model",
                    dims,
                    index_dims
                );
            }
        }
        if config.embedding.timeout_secs == 0 {
            bail!("embedding.timeout_secs must be > 0");
        }
    }

    // Generation
    match config.generation.provider.as_str() {
        "echo" => {}
        "openai" => {
            if config.generation.model.is_none() {
                bail!("generation.model must be specified when provider is 'openai'");
            }
        }
        other => bail!(
            "Unknown generation provider: '{}'. Must be echo or openai.",
            other
        ),
    }
    if config.generation.timeout_secs == 0 || config.generation.idle_timeout_secs == 0 {
        bail!("generation.timeout_secs and generation.idle_timeout_secs must be > 0");
    }
    if config.generation.channel_capacity == 0 {
        bail!("generation.channel_capacity must be >= 1");
    }

    // Title
    if config.title.max_chars == 0 || config.title.max_input_chars == 0 {
        bail!("title.max_chars and title.max_input_chars must be >= 1");
    }

    Ok(())
}
