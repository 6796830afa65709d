//! Cluster topic aggregation.

use std::collections::BTreeMap;

use futures::stream::{self, StreamExt};
use tracing::{info, instrument, warn};

use trendlyze_shared::{Record, TOPIC_ERROR, TopicResult, TopicSummarizer};

use crate::annotate::{CallLimits, bounded};

/// Summarizes every (category, cluster) group into a topic.
#[derive(Debug, Clone, Default)]
pub struct TopicAggregator {
    limits: CallLimits,
}

impl TopicAggregator {
    pub fn new(limits: CallLimits) -> Self {
        Self { limits }
    }

    /// One [`TopicResult`] per clustered group with at least one summary,
    /// ordered by `(category, cluster_id)`.
    ///
    /// Groups are summarized concurrently. A failed group gets the
    /// [`TOPIC_ERROR`] topic with the failure as its reason.
    #[instrument(skip_all, fields(count = records.len()))]
    pub async fn summarize_clusters(
        &self,
        records: &[Record],
        summarizer: &dyn TopicSummarizer,
    ) -> Vec<TopicResult> {
        let groups = group_clusters(records);

        let jobs: Vec<((String, u32), Vec<Record>, String)> = groups
            .into_iter()
            .filter_map(|(key, members)| {
                let joined = joined_text(&members);
                if joined.is_empty() {
                    info!(category = %key.0, cluster_id = key.1, "no summaries, group skipped");
                    None
                } else {
                    Some((key, members, joined))
                }
            })
            .collect();

        let limits = &self.limits;
        let mut topics: Vec<TopicResult> = stream::iter(jobs)
            .map(|((category, cluster_id), articles, joined)| async move {
                let call = summarizer.summarize(&joined);
                let (topic, reason) = match bounded(limits, "topic summary", call).await {
                    Ok(summary) => (summary.topic, summary.reason),
                    Err(e) => {
                        warn!(%category, cluster_id, error = %e, "topic summarization failed");
                        (TOPIC_ERROR.to_string(), e.to_string())
                    }
                };
                TopicResult {
                    category,
                    cluster_id,
                    topic,
                    reason,
                    articles,
                }
            })
            .buffer_unordered(limits.concurrency())
            .collect()
            .await;

        topics.sort_by(|a, b| (&a.category, a.cluster_id).cmp(&(&b.category, b.cluster_id)));
        let failed = topics.iter().filter(|t| t.is_error()).count();
        info!(groups = topics.len(), failed, "topic aggregation done");
        topics
    }
}

/// Clustered records keyed by `(clusterCategory, cluster)`, members in input order.
pub fn group_clusters(records: &[Record]) -> BTreeMap<(String, u32), Vec<Record>> {
    let mut groups: BTreeMap<(String, u32), Vec<Record>> = BTreeMap::new();
    for record in records {
        if let (Some(category), Some(cluster)) = (&record.cluster_category, record.cluster) {
            groups
                .entry((category.clone(), cluster))
                .or_default()
                .push(record.clone());
        }
    }
    groups
}

/// `제목:`/`요약:` pairs of every member with a summary, blank-line separated.
pub fn joined_text(members: &[Record]) -> String {
    members
        .iter()
        .filter_map(|r| {
            r.summary()
                .map(|summary| format!("제목: {}\n요약: {}", r.title, summary))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
