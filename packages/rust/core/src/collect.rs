//! Collection: source adapters, date window, quota, and body extraction.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use trendlyze_extract::ContentExtractor;
use trendlyze_shared::{AppConfig, MetaData, QuotaConfig, Record, Result, TrendlyzeError};

use crate::dates::{is_within_days, normalize_date};
use crate::quota::QuotaLimiter;

const USER_AGENT: &str = concat!("Trendlyze/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Raw input
// ---------------------------------------------------------------------------

/// An article as a source adapter reports it, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawArticle {
    pub meta_data: MetaData,
    pub title: String,
    pub link: String,
    /// Date text as shown by the source.
    #[serde(default)]
    pub date: String,
    /// chrono format of `date`; when absent the first eight digits are used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_format: Option<String>,
    /// Page markup, when the adapter already has it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

/// Produces the raw articles of one source.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Source name; also names the source's snapshot.
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<Vec<RawArticle>>;
}

/// Reads a JSON array of [`RawArticle`] exported by a scraper.
#[derive(Debug, Clone)]
pub struct JsonFeedSource {
    name: String,
    path: PathBuf,
}

impl JsonFeedSource {
    /// Source named after the file stem.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("feed")
            .to_string();
        Self { name, path }
    }
}

#[async_trait]
impl SourceAdapter for JsonFeedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<RawArticle>> {
        let body = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| TrendlyzeError::io(&self.path, e))?;
        serde_json::from_str(&body).map_err(|e| {
            TrendlyzeError::parse(format!("feed {}: {e}", self.path.display()))
        })
    }
}

// ---------------------------------------------------------------------------
// Page fetching
// ---------------------------------------------------------------------------

/// Downloads article markup for raw articles that arrive without it.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<String>;
}

/// Plain HTTP GET with a timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| TrendlyzeError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_page(&self, url: &str) -> Result<String> {
        debug!(%url, "fetching page");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TrendlyzeError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TrendlyzeError::Network(format!("{url}: HTTP {status}")));
        }

        response
            .text()
            .await
            .map_err(|e| TrendlyzeError::Network(format!("{url}: body read failed: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

/// Hands out record indices, monotonic across every source of a run.
#[derive(Debug, Default)]
pub struct IdxAllocator {
    next: AtomicU64,
}

impl IdxAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Turns raw articles into quota-bounded records with extracted bodies.
pub struct Collector {
    quota: QuotaConfig,
    max_age_days: i64,
    extractor: ContentExtractor,
    fetcher: Option<Arc<dyn PageFetcher>>,
    today: NaiveDate,
}

impl Collector {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            quota: config.quota.clone(),
            max_age_days: config.collection.max_age_days,
            extractor: ContentExtractor::new(&config.extraction),
            fetcher: None,
            today: Local::now().date_naive(),
        }
    }

    /// Fetch markup for articles that arrive without it.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Reference date of the collection window.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Collect one source with a fresh quota.
    ///
    /// Articles outside the date window or in a saturated bucket are skipped
    /// before any markup is fetched. Returns records in acceptance order.
    #[instrument(skip_all, fields(source = source.name()))]
    pub async fn collect(
        &self,
        source: &dyn SourceAdapter,
        ids: &IdxAllocator,
    ) -> Result<Vec<Record>> {
        let raws = source.fetch().await?;
        let offered = raws.len();
        let mut limiter = QuotaLimiter::new(&self.quota);
        let mut out_of_window = 0usize;

        for raw in raws {
            let date = normalize_date(&raw.date, raw.date_format.as_deref());
            if !is_within_days(&date, self.max_age_days, self.today) {
                debug!(link = %raw.link, date = %raw.date, "outside collection window");
                out_of_window += 1;
                continue;
            }

            if limiter.is_exceeded(raw.meta_data.field(&self.quota.bucket_field)) {
                debug!(link = %raw.link, "bucket full");
                continue;
            }

            let content = self.body_of(&raw).await;
            let mut record = Record::stub(ids.next(), raw.meta_data, raw.title, raw.link, date);
            record.content = Some(content);
            limiter.accept(record);
        }

        let records = limiter.into_records();
        info!(
            offered,
            out_of_window,
            accepted = records.len(),
            "source collected"
        );
        Ok(records)
    }

    /// Extracted body of a raw article; `""` when no markup is available.
    async fn body_of(&self, raw: &RawArticle) -> String {
        if let Some(html) = &raw.html {
            return self.extractor.extract(html, &raw.link);
        }

        let Some(fetcher) = &self.fetcher else {
            return String::new();
        };

        match fetcher.fetch_page(&raw.link).await {
            Ok(html) => self.extractor.extract(&html, &raw.link),
            Err(e) => {
                warn!(link = %raw.link, error = %e, "page fetch failed, empty content");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StaticSource(Vec<RawArticle>);

    #[async_trait]
    impl SourceAdapter for StaticSource {
        fn name(&self) -> &str {
            "static"
        }

        async fn fetch(&self) -> Result<Vec<RawArticle>> {
            Ok(self.0.clone())
        }
    }

    fn long_article() -> String {
        let para = "리테일 미디어 네트워크가 커머스 광고 시장의 새로운 성장 동력으로 떠오르고 있다. ".repeat(8);
        format!("<html><body><article><p>{para}</p><p>{para}</p></article></body></html>")
    }

    fn raw(cat: &str, link: &str, date: &str) -> RawArticle {
        RawArticle {
            meta_data: MetaData::new("static").with_field("catCd", cat),
            title: format!("title {link}"),
            link: link.into(),
            date: date.into(),
            html: Some(long_article()),
            ..Default::default()
        }
    }

    fn collector(max: usize) -> Collector {
        let mut config = AppConfig::default();
        config.quota.max_per_bucket = max;
        Collector::new(&config).with_today(NaiveDate::from_ymd_opt(2025, 5, 28).unwrap())
    }

    #[tokio::test]
    async fn applies_window_and_quota() {
        let source = StaticSource(vec![
            raw("A", "https://x/1", "2025.05.27"),
            raw("A", "https://x/2", "2024.01.01"),
            raw("A", "https://x/3", "2025-05-20"),
            raw("A", "https://x/4", "2025.05.26"),
            raw("B", "https://x/5", "2025.05.28"),
            raw("B", "https://x/6", "garbled"),
        ]);
        let ids = IdxAllocator::new();

        let records = collector(2).collect(&source, &ids).await.unwrap();
        let links: Vec<&str> = records.iter().map(|r| r.link.as_str()).collect();
        assert_eq!(links, vec!["https://x/1", "https://x/3", "https://x/5"]);

        let idxs: Vec<u64> = records.iter().map(|r| r.idx).collect();
        assert_eq!(idxs, vec![0, 1, 2]);
        assert_eq!(records[1].date, "2025.05.20");
        assert!(records.iter().all(|r| r.body().is_some()));
    }

    #[tokio::test]
    async fn idx_is_shared_across_sources() {
        let ids = IdxAllocator::starting_at(10);
        let c = collector(5);
        let first = c
            .collect(&StaticSource(vec![raw("A", "https://x/1", "2025.05.28")]), &ids)
            .await
            .unwrap();
        let second = c
            .collect(&StaticSource(vec![raw("A", "https://y/1", "2025.05.28")]), &ids)
            .await
            .unwrap();
        assert_eq!(first[0].idx, 10);
        assert_eq!(second[0].idx, 11);
    }

    #[tokio::test]
    async fn missing_markup_without_fetcher_is_empty() {
        let mut article = raw("A", "https://x/1", "2025.05.28");
        article.html = None;
        let records = collector(5)
            .collect(&StaticSource(vec![article]), &IdxAllocator::new())
            .await
            .unwrap();
        assert_eq!(records[0].content.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn fetches_missing_markup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/article"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(long_article())
                    .insert_header("content-type", "text/html"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut ok = raw("A", &format!("{}/article", server.uri()), "2025.05.28");
        ok.html = None;
        let mut gone = raw("A", &format!("{}/gone", server.uri()), "2025.05.28");
        gone.html = None;

        let fetcher = Arc::new(HttpFetcher::new(5).unwrap());
        let records = collector(5)
            .with_fetcher(fetcher)
            .collect(&StaticSource(vec![ok, gone]), &IdxAllocator::new())
            .await
            .unwrap();

        assert!(records[0].body().unwrap().contains("리테일 미디어"));
        assert_eq!(records[1].content.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn json_feed_source_reads_file() {
        let dir = std::env::temp_dir().join(format!("tz_test_{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("zdnet.json");
        let feed = serde_json::json!([{
            "metaData": {"origin": "ZDNET", "catCd": "news"},
            "title": "제목",
            "link": "https://zdnet.co.kr/1",
            "date": "2025.05.28",
            "html": "<p>x</p>"
        }]);
        std::fs::write(&file, feed.to_string()).unwrap();

        let source = JsonFeedSource::new(&file);
        assert_eq!(source.name(), "zdnet");
        let raws = source.fetch().await.unwrap();
        assert_eq!(raws.len(), 1);
        assert_eq!(raws[0].meta_data.field("catCd"), Some("news"));

        let missing = JsonFeedSource::new(dir.join("nope.json"));
        assert!(missing.fetch().await.is_err());
    }
}
