//! Article annotation through the external analysis capability.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{info, instrument, warn};

use trendlyze_shared::{Annotator, LlmConfig, Record, Result, TrendlyzeError, sort_by_idx};

/// Bounds applied to every external capability call.
#[derive(Debug, Clone, Copy)]
pub struct CallLimits {
    timeout: Duration,
    concurrency: usize,
}

impl CallLimits {
    /// Concurrency is raised to at least one.
    pub fn new(timeout: Duration, concurrency: usize) -> Self {
        Self {
            timeout,
            concurrency: concurrency.max(1),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(Duration::from_secs(config.timeout_secs), config.max_concurrency)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }
}

impl Default for CallLimits {
    fn default() -> Self {
        Self::from_config(&LlmConfig::default())
    }
}

/// Run `call` under the timeout. An elapsed timer becomes [`TrendlyzeError::Timeout`].
pub(crate) async fn bounded<T>(
    limits: &CallLimits,
    what: &str,
    call: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limits.timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(TrendlyzeError::timeout(what, limits.timeout)),
    }
}

/// Annotate every record with non-empty content.
///
/// Records without content pass through untouched. A failed or timed-out
/// call sets `analyzeError` instead of `analyze`. All records are returned,
/// sorted by `idx`.
#[instrument(skip_all, fields(count = records.len()))]
pub async fn annotate(
    mut records: Vec<Record>,
    annotator: &dyn Annotator,
    limits: &CallLimits,
) -> Vec<Record> {
    sort_by_idx(&mut records);

    let jobs: Vec<(usize, String)> = records
        .iter()
        .enumerate()
        .filter_map(|(i, r)| r.body().map(|body| (i, body.to_string())))
        .collect();
    let sent = jobs.len();

    let results: Vec<(usize, Result<_>)> = stream::iter(jobs)
        .map(|(i, body)| async move {
            let result = bounded(limits, "annotation", annotator.analyze(&body)).await;
            (i, result)
        })
        .buffer_unordered(limits.concurrency())
        .collect()
        .await;

    let mut failed = 0usize;
    for (i, result) in results {
        let record = &mut records[i];
        match result {
            Ok(annotation) => {
                record.analyze = Some(annotation);
                record.analyze_error = None;
            }
            Err(e) => {
                warn!(idx = record.idx, link = %record.link, error = %e, "annotation failed");
                record.analyze_error = Some(e.to_string());
                failed += 1;
            }
        }
    }

    info!(sent, failed, "annotation done");
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use trendlyze_shared::{Annotation, MetaData};

    struct ScriptedAnnotator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Annotator for ScriptedAnnotator {
        async fn analyze(&self, content: &str) -> Result<Annotation> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if content.contains("slow") {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            if content.contains("bad") {
                return Err(TrendlyzeError::Capability("HTTP 500".into()));
            }
            Ok(Annotation::new("커머스", format!("요약: {content}")))
        }
    }

    fn record(idx: u64, content: &str) -> Record {
        let mut r = Record::stub(idx, MetaData::new("s"), "t", format!("l{idx}"), "");
        r.content = Some(content.into());
        r
    }

    #[tokio::test]
    async fn annotates_and_marks_failures() {
        let annotator = ScriptedAnnotator {
            calls: AtomicUsize::new(0),
        };
        let limits = CallLimits::new(Duration::from_millis(200), 2);
        let records = vec![
            record(3, "good three"),
            record(0, "good zero"),
            record(1, ""),
            record(2, "bad two"),
            record(4, "slow four"),
        ];

        let out = annotate(records, &annotator, &limits).await;

        assert_eq!(annotator.calls.load(Ordering::SeqCst), 4);
        let order: Vec<u64> = out.iter().map(|r| r.idx).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);

        assert_eq!(out[0].summary(), Some("요약: good zero"));
        assert!(out[1].analyze.is_none() && out[1].analyze_error.is_none());
        assert!(out[2].analyze_error.as_deref().unwrap().contains("500"));
        assert!(out[3].analyze.is_some());
        assert!(out[4].analyze_error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn zero_concurrency_still_makes_progress() {
        let limits = CallLimits::new(Duration::from_secs(1), 0);
        assert_eq!(limits.concurrency(), 1);

        let annotator = ScriptedAnnotator {
            calls: AtomicUsize::new(0),
        };
        let out = annotate(vec![record(0, "good")], &annotator, &limits).await;
        assert!(out[0].analyze.is_some());
    }
}
