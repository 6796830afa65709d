//! Shared types, error model, capability traits, and configuration for Trendlyze.
//!
//! This crate is the foundation depended on by all other Trendlyze crates.
//! It provides:
//! - [`TrendlyzeError`]: the unified error type
//! - Domain types ([`Record`], [`Annotation`], [`TopicResult`], [`RunId`])
//! - Capability traits for the external services ([`Embedder`], [`Annotator`], [`TopicSummarizer`])
//! - Configuration ([`AppConfig`], config loading)

pub mod capability;
pub mod config;
pub mod error;
pub mod rules;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use capability::{Annotator, Embedder, TopicSummarizer, TopicSummary};
pub use config::{
    AppConfig, ClusteringConfig, CollectionConfig, DedupConfig, ExtractionConfig, LlmConfig,
    QuotaConfig, StorageBackend, StorageConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from, validate_api_key,
};
pub use error::{Result, TrendlyzeError};
pub use rules::{CleanupRule, Pick, RuleSet};
pub use types::{
    Annotation, DuplicateStatus, MetaData, Record, RunId, TOPIC_ERROR, TopicResult,
    UNCATEGORIZED, sort_by_idx,
};
