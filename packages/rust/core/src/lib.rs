//! Post-collection processing pipeline for Trendlyze.
//!
//! This crate turns collected articles into a de-duplicated, categorized,
//! topic-labeled set:
//! - [`quota`]: per-bucket acceptance caps during collection
//! - [`collect`]: source adapters, date window, body extraction
//! - [`dedup`]: exact-link and embedding-based near-duplicate labelling
//! - [`cluster`]: per-category k-means over summary embeddings
//! - [`topics`]: one topic per (category, cluster)
//! - [`pipeline`]: the staged, resumable run tying them together

pub mod annotate;
pub mod cluster;
pub mod collect;
pub mod dates;
pub mod dedup;
pub mod kmeans;
pub mod pipeline;
pub mod quota;
pub mod topics;

pub use annotate::{CallLimits, annotate};
pub use cluster::CategoryClusterer;
pub use collect::{
    Collector, HttpFetcher, IdxAllocator, JsonFeedSource, PageFetcher, RawArticle, SourceAdapter,
};
pub use dedup::{DuplicateTally, SemanticDeduplicator, classify_by_similarity, dedupe_by_link};
pub use pipeline::{Pipeline, ProgressReporter, RunSummary, Services, SilentProgress, Stage};
pub use quota::QuotaLimiter;
pub use topics::TopicAggregator;
