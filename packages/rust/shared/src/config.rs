//! Application configuration for Trendlyze.
//!
//! User config lives at `~/.trendlyze/trendlyze.toml`.
//! Environment variables override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrendlyzeError};
use crate::rules::RuleSet;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "trendlyze.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".trendlyze";

// ---------------------------------------------------------------------------
// Config structs (matching trendlyze.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Per-bucket collection quota.
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Collection filters.
    #[serde(default)]
    pub collection: CollectionConfig,

    /// Content extraction.
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Semantic deduplication.
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Category clustering.
    #[serde(default)]
    pub clustering: ClusteringConfig,

    /// LLM / embedding provider.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Stage snapshot storage.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// `[quota]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// When false every collected record is accepted.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum accepted records per bucket.
    #[serde(default = "default_max_per_bucket")]
    pub max_per_bucket: usize,

    /// `metaData` key used as the bucket (records without it share one global bucket).
    #[serde(default = "default_bucket_field")]
    pub bucket_field: String,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_per_bucket: default_max_per_bucket(),
            bucket_field: default_bucket_field(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_max_per_bucket() -> usize {
    5
}
fn default_bucket_field() -> String {
    "catCd".into()
}

/// `[collection]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Drop articles older than this many days.
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            max_age_days: default_max_age_days(),
        }
    }
}

fn default_max_age_days() -> i64 {
    30
}

/// `[extraction]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Primary output shorter than this falls back to plain visible text.
    #[serde(default = "default_primary_min_chars")]
    pub primary_min_chars: usize,

    /// Final text shorter than this is stored as the empty string.
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,

    /// Trim bylines, signatures, and trailing e-mail addresses.
    #[serde(default)]
    pub postfilter: bool,

    /// Extra per-domain cleanup rule sets, applied after the built-in ones.
    #[serde(default)]
    pub rules: Vec<RuleSet>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            primary_min_chars: default_primary_min_chars(),
            min_chars: default_min_chars(),
            postfilter: false,
            rules: Vec::new(),
        }
    }
}

fn default_primary_min_chars() -> usize {
    300
}
fn default_min_chars() -> usize {
    200
}

/// `[dedup]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Run semantic near-duplicate classification after annotation.
    #[serde(default = "default_true")]
    pub semantic: bool,

    /// Cosine similarity strictly above this marks a duplicate.
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    /// Texts per embedding request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            semantic: true,
            threshold: default_threshold(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_threshold() -> f32 {
    0.85
}
fn default_batch_size() -> usize {
    32
}

/// `[clustering]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// k for k-means; categories with fewer records are left unclustered.
    #[serde(default = "default_num_clusters")]
    pub num_clusters: usize,

    /// Seed for centroid initialization.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Lloyd iteration cap.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            num_clusters: default_num_clusters(),
            seed: default_seed(),
            max_iterations: default_max_iterations(),
        }
    }
}

fn default_num_clusters() -> usize {
    16
}
fn default_seed() -> u64 {
    42
}
fn default_max_iterations() -> usize {
    300
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// OpenAI-compatible API base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Chat model used for annotation and topic extraction.
    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    /// Embedding model.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Prepended to every text before embedding (e5 models expect `passage: `).
    #[serde(default = "default_embedding_prefix")]
    pub embedding_prefix: String,

    /// Upper bound for a single capability call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Concurrent annotation / topic calls.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            embedding_prefix: default_embedding_prefix(),
            timeout_secs: default_timeout_secs(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_chat_model() -> String {
    "anthropic/claude-3.5-sonnet".into()
}
fn default_embedding_model() -> String {
    "intfloat/multilingual-e5-large".into()
}
fn default_embedding_prefix() -> String {
    "passage: ".into()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_concurrency() -> usize {
    4
}

/// Snapshot storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// JSON files under `root`.
    Fs,
    /// A libSQL database at `db_path`.
    Libsql,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,

    /// Root directory for the `fs` backend.
    #[serde(default = "default_storage_root")]
    pub root: String,

    /// Database file for the `libsql` backend.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            root: default_storage_root(),
            db_path: default_db_path(),
        }
    }
}

fn default_backend() -> StorageBackend {
    StorageBackend::Fs
}
fn default_storage_root() -> String {
    "crawl".into()
}
fn default_db_path() -> String {
    "crawl/trendlyze.db".into()
}

// ---------------------------------------------------------------------------
// Overrides and validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Apply `IS_CRAWLING_LIMIT`, `CRAWLING_LIMIT` and `CRAWLING_LIMIT_DAY`
    /// from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply the same overrides from an arbitrary lookup.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(val) = lookup("IS_CRAWLING_LIMIT") {
            self.quota.enabled = val.trim().eq_ignore_ascii_case("true");
        }
        if let Some(val) = lookup("CRAWLING_LIMIT") {
            self.quota.max_per_bucket = val.trim().parse().map_err(|e| {
                TrendlyzeError::config(format!("CRAWLING_LIMIT '{val}' is not a count: {e}"))
            })?;
        }
        if let Some(val) = lookup("CRAWLING_LIMIT_DAY") {
            self.collection.max_age_days = val.trim().parse().map_err(|e| {
                TrendlyzeError::config(format!("CRAWLING_LIMIT_DAY '{val}' is not a number: {e}"))
            })?;
        }
        Ok(())
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.quota.max_per_bucket == 0 {
            return Err(TrendlyzeError::config("quota.max_per_bucket must be at least 1"));
        }
        if self.collection.max_age_days < 0 {
            return Err(TrendlyzeError::config("collection.max_age_days must not be negative"));
        }
        if !(self.dedup.threshold > 0.0 && self.dedup.threshold <= 1.0) {
            return Err(TrendlyzeError::config(format!(
                "dedup.threshold must be in (0, 1], got {}",
                self.dedup.threshold
            )));
        }
        if self.dedup.batch_size == 0 {
            return Err(TrendlyzeError::config("dedup.batch_size must be at least 1"));
        }
        if self.clustering.num_clusters == 0 {
            return Err(TrendlyzeError::config("clustering.num_clusters must be at least 1"));
        }
        if self.llm.timeout_secs == 0 {
            return Err(TrendlyzeError::config("llm.timeout_secs must be at least 1"));
        }
        if self.llm.max_concurrency == 0 {
            return Err(TrendlyzeError::config("llm.max_concurrency must be at least 1"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.trendlyze/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| TrendlyzeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.trendlyze/trendlyze.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| TrendlyzeError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        TrendlyzeError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| TrendlyzeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| TrendlyzeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| TrendlyzeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the LLM API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.llm.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(TrendlyzeError::config(format!(
            "LLM API key not found. Set the {var_name} environment variable."
        ))),
    }
}
