//! Capability traits for the external services the pipeline consumes.
//!
//! The core never talks to a model directly; it receives these traits as
//! `&dyn` handles so runs can be wired to an HTTP provider or to in-memory
//! fakes in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::Annotation;

/// Text embedding capability.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed multiple texts; output order matches input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Article annotation capability (category, summary, sentiment, ...).
#[async_trait]
pub trait Annotator: Send + Sync {
    async fn analyze(&self, content: &str) -> Result<Annotation>;
}

/// Topic extracted from the joined text of one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicSummary {
    pub topic: String,
    pub reason: String,
}

/// Cluster topic summarization capability.
#[async_trait]
pub trait TopicSummarizer: Send + Sync {
    async fn summarize(&self, joined_text: &str) -> Result<TopicSummary>;
}
