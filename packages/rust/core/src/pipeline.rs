//! End-to-end run: collect → merge → dedup → analyze → semantic → clustered → final.
//!
//! Every stage reads the previous stage's records (in memory, or from its
//! snapshot when resuming) and writes its own snapshot. Earlier snapshots are
//! never rewritten by a later stage.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tracing::{error, info, instrument, warn};

use trendlyze_shared::{
    Annotator, AppConfig, Embedder, Record, Result, RunId, TopicSummarizer, TrendlyzeError,
};
use trendlyze_storage::StageStore;

use crate::annotate::{CallLimits, annotate};
use crate::cluster::CategoryClusterer;
use crate::collect::{Collector, IdxAllocator, PageFetcher, SourceAdapter};
use crate::dedup::{DuplicateTally, SemanticDeduplicator, dedupe_by_link};
use crate::topics::TopicAggregator;

/// Snapshot prefix of the per-source collection results.
pub const SOURCES_PREFIX: &str = "sources/";

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Collect,
    Merge,
    Dedup,
    Analyze,
    Semantic,
    Cluster,
    Topics,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Collect,
        Stage::Merge,
        Stage::Dedup,
        Stage::Analyze,
        Stage::Semantic,
        Stage::Cluster,
        Stage::Topics,
    ];

    /// Name of the snapshot the stage writes (`sources` is a prefix).
    pub fn snapshot(&self) -> &'static str {
        match self {
            Stage::Collect => "sources",
            Stage::Merge => "merge",
            Stage::Dedup => "dedup",
            Stage::Analyze => "analyze",
            Stage::Semantic => "semantic",
            Stage::Cluster => "clustered",
            Stage::Topics => "final",
        }
    }

    /// Human-readable phase label.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Collect => "Collecting sources",
            Stage::Merge => "Merging source snapshots",
            Stage::Dedup => "Removing duplicate links",
            Stage::Analyze => "Annotating articles",
            Stage::Semantic => "Detecting near-duplicates",
            Stage::Cluster => "Clustering categories",
            Stage::Topics => "Summarizing cluster topics",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.snapshot())
    }
}

impl std::str::FromStr for Stage {
    type Err = TrendlyzeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "collect" | "sources" => Ok(Stage::Collect),
            "merge" => Ok(Stage::Merge),
            "dedup" => Ok(Stage::Dedup),
            "analyze" => Ok(Stage::Analyze),
            "semantic" => Ok(Stage::Semantic),
            "cluster" | "clustered" => Ok(Stage::Cluster),
            "topics" | "final" => Ok(Stage::Topics),
            other => Err(TrendlyzeError::validation(format!(
                "unknown stage '{other}' (expected one of: sources, merge, dedup, analyze, semantic, clustered, final)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Outcome of a run or a resumed run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub run: Option<RunId>,
    pub collected: usize,
    pub merged: usize,
    pub after_link_dedup: usize,
    pub annotated: usize,
    pub annotation_failures: usize,
    pub duplicates: Option<DuplicateTally>,
    pub clustered: usize,
    pub topics: usize,
    pub topic_failures: usize,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new stage.
    fn phase(&self, name: &str);
    /// Called after one source has been collected.
    fn source_collected(&self, name: &str, count: usize);
    /// Called after a stage snapshot has been written.
    fn stage_written(&self, stage: Stage, count: usize);
    /// Called when the pipeline completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn source_collected(&self, _name: &str, _count: usize) {}
    fn stage_written(&self, _stage: Stage, _count: usize) {}
    fn done(&self, _summary: &RunSummary) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// External capabilities a run consumes.
#[derive(Clone)]
pub struct Services {
    pub embedder: Arc<dyn Embedder>,
    pub annotator: Arc<dyn Annotator>,
    pub summarizer: Arc<dyn TopicSummarizer>,
}

impl Services {
    /// All three capabilities backed by one client.
    pub fn shared<T>(client: Arc<T>) -> Self
    where
        T: Embedder + Annotator + TopicSummarizer + 'static,
    {
        Self {
            embedder: client.clone(),
            annotator: client.clone(),
            summarizer: client,
        }
    }
}

/// Runs the stages of one configuration against one store.
pub struct Pipeline {
    config: AppConfig,
    store: Box<dyn StageStore>,
    services: Services,
    fetcher: Option<Arc<dyn PageFetcher>>,
    today: Option<NaiveDate>,
}

impl Pipeline {
    pub fn new(config: AppConfig, store: Box<dyn StageStore>, services: Services) -> Self {
        Self {
            config,
            store,
            services,
            fetcher: None,
            today: None,
        }
    }

    /// Fetch markup for raw articles that arrive without it.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Pin the reference date of the collection window.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn store(&self) -> &dyn StageStore {
        self.store.as_ref()
    }

    /// Start a new run over `sources` and carry it through every stage.
    #[instrument(skip_all, fields(sources = sources.len()))]
    pub async fn run(
        &self,
        sources: &[Box<dyn SourceAdapter>],
        progress: &dyn ProgressReporter,
    ) -> Result<RunSummary> {
        let start = Instant::now();
        let run = RunId::new();
        info!(%run, "starting run");

        let mut summary = RunSummary {
            run: Some(run.clone()),
            ..Default::default()
        };

        progress.phase(Stage::Collect.label());
        summary.collected = self.collect_sources(&run, sources, progress).await?;

        self.run_from(&run, Stage::Merge, &mut summary, progress)
            .await?;
        summary.elapsed = start.elapsed();
        info!(%run, elapsed_ms = summary.elapsed.as_millis() as u64, "run complete");
        progress.done(&summary);
        Ok(summary)
    }

    /// Re-run `run` starting at `from`, reading the preceding snapshot.
    #[instrument(skip_all, fields(%run, %from))]
    pub async fn resume(
        &self,
        run: &RunId,
        from: Stage,
        progress: &dyn ProgressReporter,
    ) -> Result<RunSummary> {
        if from == Stage::Collect {
            return Err(TrendlyzeError::validation(
                "collection cannot be resumed; start a new run",
            ));
        }

        let start = Instant::now();
        let mut summary = RunSummary {
            run: Some(run.clone()),
            ..Default::default()
        };
        info!("resuming run");

        self.run_from(run, from, &mut summary, progress).await?;
        summary.elapsed = start.elapsed();
        progress.done(&summary);
        Ok(summary)
    }

    /// Collect every source into its own snapshot. A failing source is
    /// logged and skipped.
    async fn collect_sources(
        &self,
        run: &RunId,
        sources: &[Box<dyn SourceAdapter>],
        progress: &dyn ProgressReporter,
    ) -> Result<usize> {
        let mut collector = Collector::new(&self.config);
        if let Some(fetcher) = &self.fetcher {
            collector = collector.with_fetcher(fetcher.clone());
        }
        if let Some(today) = self.today {
            collector = collector.with_today(today);
        }

        let ids = IdxAllocator::new();
        let mut total = 0;
        for source in sources {
            let records = match collector.collect(source.as_ref(), &ids).await {
                Ok(records) => records,
                Err(e) => {
                    error!(source = source.name(), error = %e, "source failed, skipping");
                    continue;
                }
            };

            let stage = source_stage(source.name());
            self.store.write_stage(run, &stage, &records).await?;
            progress.source_collected(source.name(), records.len());
            total += records.len();
        }
        Ok(total)
    }

    async fn run_from(
        &self,
        run: &RunId,
        from: Stage,
        summary: &mut RunSummary,
        progress: &dyn ProgressReporter,
    ) -> Result<()> {
        let semantic_enabled = self.config.dedup.semantic;
        let limits = CallLimits::from_config(&self.config.llm);
        let mut current: Option<Vec<Record>> = None;

        for stage in Stage::ALL.into_iter().filter(|s| *s >= from) {
            if stage == Stage::Collect {
                continue;
            }
            if stage == Stage::Semantic && !semantic_enabled && from != Stage::Semantic {
                info!("semantic deduplication disabled");
                continue;
            }

            progress.phase(stage.label());
            let input = match current.take() {
                Some(records) => records,
                None => self.load_input(run, stage).await?,
            };

            let output = match stage {
                Stage::Collect => input,
                Stage::Merge => {
                    summary.merged = input.len();
                    input
                }
                Stage::Dedup => {
                    let out = dedupe_by_link(input);
                    summary.after_link_dedup = out.len();
                    out
                }
                Stage::Analyze => {
                    let out = annotate(input, self.services.annotator.as_ref(), &limits).await;
                    summary.annotated = out.iter().filter(|r| r.analyze.is_some()).count();
                    summary.annotation_failures =
                        out.iter().filter(|r| r.analyze_error.is_some()).count();
                    out
                }
                Stage::Semantic => {
                    let dedup = SemanticDeduplicator::new(
                        self.config.dedup.threshold,
                        self.config.dedup.batch_size,
                    )
                    .with_limits(limits);
                    let out = dedup
                        .classify(input, self.services.embedder.as_ref())
                        .await;
                    summary.duplicates = Some(DuplicateTally::of(&out));
                    out
                }
                Stage::Cluster => {
                    let clusterer = CategoryClusterer::new(
                        &self.config.clustering,
                        self.config.dedup.batch_size,
                    )
                    .with_limits(limits);
                    let out = clusterer
                        .cluster(input, self.services.embedder.as_ref())
                        .await;
                    summary.clustered = out.iter().filter(|r| r.cluster.is_some()).count();
                    out
                }
                Stage::Topics => {
                    let topics = TopicAggregator::new(limits)
                        .summarize_clusters(&input, self.services.summarizer.as_ref())
                        .await;
                    summary.topics = topics.len();
                    summary.topic_failures = topics.iter().filter(|t| t.is_error()).count();
                    self.store
                        .write_topics(run, stage.snapshot(), &topics)
                        .await?;
                    progress.stage_written(stage, topics.len());
                    return Ok(());
                }
            };

            self.store
                .write_stage(run, stage.snapshot(), &output)
                .await?;
            progress.stage_written(stage, output.len());
            current = Some(output);
        }

        Ok(())
    }

    /// Records a stage starts from when nothing is carried in memory.
    async fn load_input(&self, run: &RunId, stage: Stage) -> Result<Vec<Record>> {
        let records = match stage {
            Stage::Collect => Vec::new(),
            Stage::Merge => {
                let merged = self.store.list_stages(run, SOURCES_PREFIX).await?;
                if merged.is_empty() {
                    warn!(%run, "no source snapshots to merge");
                }
                merged
            }
            Stage::Dedup => self.store.read_stage(run, Stage::Merge.snapshot()).await?,
            Stage::Analyze => self.store.read_stage(run, Stage::Dedup.snapshot()).await?,
            Stage::Semantic => self.store.read_stage(run, Stage::Analyze.snapshot()).await?,
            Stage::Cluster => {
                let previous = if self.config.dedup.semantic {
                    Stage::Semantic
                } else {
                    Stage::Analyze
                };
                self.store.read_stage(run, previous.snapshot()).await?
            }
            Stage::Topics => self.store.read_stage(run, Stage::Cluster.snapshot()).await?,
        };
        info!(%run, %stage, count = records.len(), "stage input loaded");
        Ok(records)
    }
}

/// Snapshot name of a source, with characters outside `[A-Za-z0-9_.-]` replaced.
pub fn source_stage(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = if cleaned.is_empty() {
        "source".to_string()
    } else {
        cleaned
    };
    format!("{SOURCES_PREFIX}{cleaned}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use trendlyze_shared::{
        Annotation, DuplicateStatus, MetaData, StorageBackend, TopicSummary,
    };
    use trendlyze_storage::FsStageStore;

    use crate::collect::RawArticle;

    const DIM: usize = 16;

    /// Embeds `ART<n>` as the n-th unit vector; `ART7` lies at 0.9 similarity to `ART6`.
    /// Annotates by parity and summarizes by member count.
    struct FakeServices;

    fn article_number(text: &str) -> Option<usize> {
        let start = text.find("ART")? + 3;
        let digits: String = text[start..].chars().take_while(char::is_ascii_digit).collect();
        digits.parse().ok()
    }

    #[async_trait]
    impl Embedder for FakeServices {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let n = article_number(text)
                .ok_or_else(|| TrendlyzeError::Capability("no marker".into()))?;
            let mut v = vec![0.0; DIM];
            if n == 7 {
                v[6] = 0.9;
                v[7] = 0.435_889_9;
            } else {
                v[n % DIM] = 1.0;
            }
            Ok(v)
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut out = Vec::with_capacity(texts.len());
            for t in texts {
                out.push(self.embed(t).await?);
            }
            Ok(out)
        }
    }

    #[async_trait]
    impl Annotator for FakeServices {
        async fn analyze(&self, content: &str) -> Result<Annotation> {
            let n = article_number(content)
                .ok_or_else(|| TrendlyzeError::Capability("no marker".into()))?;
            let category = if n % 2 == 0 { "커머스" } else { "컨슈머" };
            Ok(Annotation::new(category, format!("요약 ART{n}")))
        }
    }

    #[async_trait]
    impl TopicSummarizer for FakeServices {
        async fn summarize(&self, joined_text: &str) -> Result<TopicSummary> {
            Ok(TopicSummary {
                topic: format!("{} articles", joined_text.matches("제목:").count()),
                reason: "fake".into(),
            })
        }
    }

    struct StaticSource {
        name: &'static str,
        articles: Vec<RawArticle>,
    }

    #[async_trait]
    impl SourceAdapter for StaticSource {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(&self) -> Result<Vec<RawArticle>> {
            Ok(self.articles.clone())
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl SourceAdapter for BrokenSource {
        fn name(&self) -> &str {
            "broken"
        }

        async fn fetch(&self) -> Result<Vec<RawArticle>> {
            Err(TrendlyzeError::Network("site down".into()))
        }
    }

    fn article(n: usize, link: &str) -> RawArticle {
        let para = format!(
            "ART{n} 기사는 리테일 미디어와 커머스 광고 시장의 변화를 자세히 다룬다. 업계 관계자들의 전망과 수치를 함께 소개한다. "
        )
        .repeat(6);
        RawArticle {
            meta_data: MetaData::new("static").with_field("catCd", format!("cat{n}")),
            title: format!("기사 {n}"),
            link: link.to_string(),
            date: "2025.05.27".into(),
            date_format: None,
            html: Some(format!(
                "<html><body><article><p>{para}</p><p>{para}</p></article></body></html>"
            )),
        }
    }

    fn sources() -> Vec<Box<dyn SourceAdapter>> {
        let first = StaticSource {
            name: "alpha",
            articles: (0..5).map(|n| article(n, &format!("https://a/{n}"))).collect(),
        };
        let second = StaticSource {
            name: "beta",
            articles: vec![
                article(5, "https://b/5"),
                article(6, "https://b/6"),
                article(7, "https://b/7"),
                article(10, "https://a/0"),
                article(11, "https://a/1"),
            ],
        };
        vec![Box::new(first), Box::new(second), Box::new(BrokenSource)]
    }

    fn pipeline() -> Pipeline {
        let mut config = AppConfig::default();
        config.clustering.num_clusters = 2;
        config.storage.backend = StorageBackend::Fs;
        let root = std::env::temp_dir().join(format!("tz_test_{}", uuid::Uuid::now_v7()));

        Pipeline::new(
            config,
            Box::new(FsStageStore::new(root)),
            Services::shared(Arc::new(FakeServices)),
        )
        .with_today(NaiveDate::from_ymd_opt(2025, 5, 28).unwrap())
    }

    #[test]
    fn stage_names_parse() {
        for stage in Stage::ALL {
            assert_eq!(stage.snapshot().parse::<Stage>().unwrap(), stage);
        }
        assert_eq!("cluster".parse::<Stage>().unwrap(), Stage::Cluster);
        assert_eq!("Topics".parse::<Stage>().unwrap(), Stage::Topics);
        assert!("bogus".parse::<Stage>().is_err());
    }

    #[test]
    fn source_stage_names_are_safe() {
        assert_eq!(source_stage("zdnet"), "sources/zdnet");
        assert_eq!(source_stage("blog daehong/x"), "sources/blog_daehong_x");
        assert_eq!(source_stage(""), "sources/source");
    }

    #[tokio::test]
    async fn end_to_end_run() {
        let pipeline = pipeline();
        let summary = pipeline.run(&sources(), &SilentProgress).await.unwrap();
        let run = summary.run.clone().unwrap();

        assert_eq!(summary.collected, 10);
        assert_eq!(summary.merged, 10);
        assert_eq!(summary.after_link_dedup, 8);
        assert_eq!(summary.annotated, 8);

        let tally = summary.duplicates.unwrap();
        assert_eq!(tally.duplicates, 1);
        assert_eq!(tally.distinct(), 7);

        let semantic = pipeline.store().read_stage(&run, "semantic").await.unwrap();
        let idxs: Vec<u64> = semantic.iter().map(|r| r.idx).collect();
        assert_eq!(idxs, vec![0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(semantic[6].is_duplicate, Some(DuplicateStatus::Representative));
        assert_eq!(semantic[6].duplicates, Some(vec![7]));
        assert_eq!(semantic[7].rep_idx, Some(6));
        assert!(
            semantic[..6]
                .iter()
                .all(|r| r.is_duplicate == Some(DuplicateStatus::Unique))
        );

        let names = pipeline.store().list_documents(&run, "").await.unwrap();
        for expected in [
            "sources/alpha",
            "sources/beta",
            "merge",
            "dedup",
            "analyze",
            "semantic",
            "clustered",
            "final",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
        assert!(!names.iter().any(|n| n == "sources/broken"));

        let topics = pipeline.store().read_topics(&run, "final").await.unwrap();
        assert_eq!(topics.len(), summary.topics);
        assert!(!topics.is_empty());
        assert!(topics.iter().all(|t| !t.is_error()));
        let member_total: usize = topics.iter().map(|t| t.articles.len()).sum();
        assert_eq!(member_total, summary.clustered);
    }

    #[tokio::test]
    async fn resume_rebuilds_later_stages_only() {
        let pipeline = pipeline();
        let first = pipeline.run(&sources(), &SilentProgress).await.unwrap();
        let run = first.run.clone().unwrap();
        let dedup_before = pipeline
            .store()
            .get_document(&run, "dedup")
            .await
            .unwrap();

        let resumed = pipeline
            .resume(&run, Stage::Cluster, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(resumed.topics, first.topics);
        assert_eq!(resumed.clustered, first.clustered);
        assert_eq!(resumed.after_link_dedup, 0);
        let dedup_after = pipeline
            .store()
            .get_document(&run, "dedup")
            .await
            .unwrap();
        assert_eq!(dedup_before, dedup_after);
    }

    #[tokio::test]
    async fn resume_needs_previous_snapshot() {
        let pipeline = pipeline();
        let run = RunId::new();

        let err = pipeline
            .resume(&run, Stage::Dedup, &SilentProgress)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));

        assert!(
            pipeline
                .resume(&run, Stage::Collect, &SilentProgress)
                .await
                .is_err()
        );
    }
}
