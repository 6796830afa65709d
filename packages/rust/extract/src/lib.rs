//! Article body extraction.
//!
//! Turns raw page markup into plain text:
//! 1. Apply the domain's declarative cleanup rules to the parsed document
//! 2. Readability-style main-content extraction
//! 3. Fall back to all visible text of the raw markup when the primary output is short
//! 4. Optionally trim bylines and signatures
//! 5. Replace too-short results with the empty string

mod cleanup;
mod readability;
mod rules;

use scraper::Html;
use tracing::{debug, instrument};
use url::Url;

use trendlyze_shared::ExtractionConfig;

pub use readability::{char_count, main_text, visible_text};
pub use rules::{RuleRegistry, apply_rule};

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Converts raw markup into cleaned article text.
#[derive(Debug, Clone)]
pub struct ContentExtractor {
    registry: RuleRegistry,
    primary_min_chars: usize,
    min_chars: usize,
    postfilter: bool,
}

impl ContentExtractor {
    /// Built-in cleanup rules plus any rule sets from the config.
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            registry: RuleRegistry::builtin().with_sets(config.rules.iter().cloned()),
            primary_min_chars: config.primary_min_chars,
            min_chars: config.min_chars,
            postfilter: config.postfilter,
        }
    }

    /// Extract the article text of `raw_markup`, fetched from `url`.
    ///
    /// Never fails: unusable input yields `""`.
    #[instrument(skip(self, raw_markup), fields(url = %url))]
    pub fn extract(&self, raw_markup: &str, url: &str) -> String {
        let domain = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string));

        let mut doc = Html::parse_document(raw_markup);
        let removed = self.registry.apply(&mut doc, domain.as_deref());
        if removed > 0 {
            debug!(removed, "cleanup rules removed nodes");
        }

        let primary = main_text(&mut doc);
        let primary_chars = primary.as_deref().map(char_count).unwrap_or(0);

        let mut text = match primary {
            Some(text) if primary_chars >= self.primary_min_chars => text,
            _ => {
                debug!(primary_chars, "primary extraction short, using visible text");
                visible_text(raw_markup)
            }
        };

        if self.postfilter {
            text = cleanup::run_pipeline(&text);
        }

        let chars = char_count(&text);
        if chars < self.min_chars {
            debug!(chars, min = self.min_chars, "extracted text below floor");
            return String::new();
        }

        debug!(chars, "extraction complete");
        text
    }
}

impl Default for ContentExtractor {
    fn default() -> Self {
        Self::new(&ExtractionConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use trendlyze_shared::{CleanupRule, RuleSet};

    fn fixture_path(name: &str) -> std::path::PathBuf {
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../../fixtures/html")
            .join(name)
    }

    fn load_fixture(name: &str) -> String {
        fs::read_to_string(fixture_path(name))
            .unwrap_or_else(|e| panic!("failed to read fixture {name}: {e}"))
    }

    #[test]
    fn extracts_long_article_body() {
        let html = load_fixture("news_article.html");
        let text = ContentExtractor::default().extract(&html, "https://news.example.com/a/1");

        assert!(char_count(&text) >= 300, "got {} chars", char_count(&text));
        assert!(text.contains("리테일 미디어"));
        assert!(!text.contains("많이 본 뉴스"));
        assert!(!text.contains("무단 전재"));
    }

    #[test]
    fn short_primary_falls_back_to_visible_text() {
        let html = load_fixture("listing_page.html");
        let text = ContentExtractor::default().extract(&html, "https://news.example.com/list");

        // Headlines only live in links, so the primary pass finds no article.
        assert!(text.contains("오늘의 헤드라인"));
        assert!(text.contains("사이트 하단 안내"));
        assert!(!text.contains('\n'));
    }

    #[test]
    fn tiny_page_yields_empty_string() {
        let html = "<html><body><p>Not found.</p></body></html>";
        let text = ContentExtractor::default().extract(html, "https://example.com/404");
        assert_eq!(text, "");
    }

    #[test]
    fn floor_counts_characters_not_bytes() {
        // 150 Hangul syllables are 450 bytes but only 150 characters.
        let body = "가".repeat(150);
        let html = format!("<html><body><p>{body}</p></body></html>");
        let text = ContentExtractor::default().extract(&html, "https://example.com/a");
        assert_eq!(text, "");
    }

    #[test]
    fn domain_rules_run_before_extraction() {
        let html = load_fixture("ditoday_article.html");
        let text = ContentExtractor::default().extract(&html, "https://www.ditoday.com/news/1");

        assert!(text.contains("소비자 조사 결과"));
        assert!(!text.contains("컨슈머 모먼트 리포트 보러 가기"));
        assert!(!text.contains("저작권자"));
        assert!(!text.contains("함께 읽으면 좋은 기사"));
    }

    #[test]
    fn config_rules_extend_builtins() {
        let html = load_fixture("news_article.html");
        let config = ExtractionConfig {
            rules: vec![RuleSet {
                domain: "news.example.com".into(),
                rules: vec![CleanupRule::Remove {
                    selector: "p.lead".into(),
                }],
            }],
            ..Default::default()
        };

        let text = ContentExtractor::new(&config).extract(&html, "https://news.example.com/a/1");
        assert!(!text.contains("요약 리드 문장"));
        assert!(text.contains("리테일 미디어"));
    }

    #[test]
    fn postfilter_trims_signatures_when_enabled() {
        let html = load_fixture("news_article.html");
        let config = ExtractionConfig {
            postfilter: true,
            ..Default::default()
        };

        let raw = ContentExtractor::default().extract(&html, "https://news.example.com/a/1");
        let filtered = ContentExtractor::new(&config).extract(&html, "https://news.example.com/a/1");

        assert!(raw.contains("reporter@example.co.kr"));
        assert!(!filtered.contains("reporter@example.co.kr"));
        assert!(filtered.starts_with("요약 리드 문장"));
    }
}
