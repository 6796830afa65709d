//! Per-category topic clustering over summary embeddings.

use std::collections::BTreeMap;

use tracing::{info, instrument, warn};

use trendlyze_shared::{ClusteringConfig, Embedder, Record, Result, TrendlyzeError, sort_by_idx};

use crate::annotate::{CallLimits, bounded};
use crate::kmeans::kmeans;

/// Splits each sufficiently large category into `k` clusters.
#[derive(Debug, Clone)]
pub struct CategoryClusterer {
    k: usize,
    seed: u64,
    max_iterations: usize,
    batch_size: usize,
    limits: CallLimits,
}

impl CategoryClusterer {
    pub fn new(config: &ClusteringConfig, batch_size: usize) -> Self {
        Self {
            k: config.num_clusters.max(1),
            seed: config.seed,
            max_iterations: config.max_iterations,
            batch_size: batch_size.max(1),
            limits: CallLimits::default(),
        }
    }

    /// Bound every embedding call by `limits`.
    pub fn with_limits(mut self, limits: CallLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Assign `cluster` and `clusterCategory` to every summarized record of a
    /// category holding at least `k` of them.
    ///
    /// Records without a summary, and categories below `k`, are left as they
    /// are. A category whose embeddings fail keeps its records unclustered
    /// with `clusterError` set. Output is sorted by `idx`.
    #[instrument(skip_all, fields(count = records.len(), k = self.k))]
    pub async fn cluster(&self, mut records: Vec<Record>, embedder: &dyn Embedder) -> Vec<Record> {
        sort_by_idx(&mut records);

        let mut by_category: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, record) in records.iter().enumerate() {
            if let (Some(analyze), Some(_)) = (&record.analyze, record.summary()) {
                by_category
                    .entry(analyze.category().to_string())
                    .or_default()
                    .push(i);
            }
        }

        for (category, members) in by_category {
            if members.len() < self.k {
                info!(%category, size = members.len(), "category below k, not clustered");
                continue;
            }

            let summaries: Vec<String> = members
                .iter()
                .map(|&i| records[i].summary().unwrap_or_default().to_string())
                .collect();

            let vectors = match self.embed_all(&summaries, embedder).await {
                Ok(vectors) => vectors,
                Err(e) => {
                    warn!(%category, error = %e, "summary embedding failed, category not clustered");
                    for &i in &members {
                        records[i].cluster_error = Some(e.to_string());
                    }
                    continue;
                }
            };

            let labels = kmeans(&vectors, self.k, self.seed, self.max_iterations);
            for (&i, label) in members.iter().zip(labels) {
                records[i].cluster = Some(label as u32);
                records[i].cluster_category = Some(category.clone());
            }
            info!(%category, size = members.len(), "category clustered");
        }

        records
    }

    async fn embed_all(&self, texts: &[String], embedder: &dyn Embedder) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let batch = bounded(&self.limits, "embedding", embedder.embed_batch(chunk)).await?;
            if batch.len() != chunk.len() {
                return Err(TrendlyzeError::Capability(format!(
                    "expected {} embeddings, got {}",
                    chunk.len(),
                    batch.len()
                )));
            }
            vectors.extend(batch);
        }
        Ok(vectors)
    }
}
