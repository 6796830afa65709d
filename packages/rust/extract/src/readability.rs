//! Main-content extraction and plain-text rendering.
//!
//! Scores block containers by the paragraph text they hold (readability
//! style), keeps the best container plus qualifying siblings, and renders
//! them as line-oriented text. Tables are kept (cells joined by ` | `),
//! links contribute their anchor text only.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html};

/// Elements never part of the article body.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "head", "nav", "header", "footer", "aside", "form",
    "iframe", "svg", "button", "select", "input", "textarea", "object", "embed",
];

/// Elements that are not rendered at all in plain visible text.
const INVISIBLE_TAGS: &[&str] = &["script", "style", "noscript", "template", "head"];

/// Elements whose text is scored towards their container.
const SCORED_TAGS: &[&str] = &["p", "pre", "td", "blockquote"];

/// Elements rendered on their own line(s).
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "blockquote", "dd", "div", "dl", "dt", "figcaption", "figure", "h1",
    "h2", "h3", "h4", "h5", "h6", "hr", "li", "main", "ol", "p", "pre", "section", "table",
    "tbody", "thead", "tfoot", "ul",
];

/// Minimum characters for a paragraph to count towards its container.
const MIN_PARAGRAPH_CHARS: usize = 25;

static BOILERPLATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)comment|reply|share|sns|social|related|recommend|sidebar|widget|advert|banner|popup|subscribe|newsletter|breadcrumb|pagination|cookie|(^|[\s_-])ads?([\s_-]|$)",
    )
    .expect("valid regex")
});

static POSITIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)article|body|content|entry|main|post|story|text|view").expect("valid regex")
});

static NEGATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)footer|masthead|meta|menu|nav|promo|foot|byline|tag").expect("valid regex")
});

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Extract the main text of `doc`, or `None` when nothing readable remains.
///
/// Boilerplate is detached from `doc` in the process.
pub fn main_text(doc: &mut Html) -> Option<String> {
    strip_boilerplate(doc);

    let scores = score_containers(doc);
    let best = scores
        .iter()
        .map(|(el, score)| (*el, adjusted_score(*el, *score)))
        .max_by(|a, b| a.1.total_cmp(&b.1));

    // No paragraph-bearing container: nothing article-like on the page.
    let (best, best_score) = best?;

    let mut out = String::new();
    for part in with_siblings(best, best_score, &scores) {
        out.push('\n');
        render(part, &mut out);
        out.push('\n');
    }

    let text = tidy_lines(&out);
    (!text.is_empty()).then_some(text)
}

/// All visible text of `html`, whitespace-collapsed and joined by single spaces.
pub fn visible_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut words: Vec<&str> = Vec::new();

    for node in doc.tree.root().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| INVISIBLE_TAGS.contains(&e.name()))
        });
        if !hidden {
            words.extend(text.split_whitespace());
        }
    }

    words.join(" ")
}

// ---------------------------------------------------------------------------
// Boilerplate removal
// ---------------------------------------------------------------------------

fn strip_boilerplate(doc: &mut Html) {
    let ids: Vec<_> = doc
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| {
            let name = el.value().name();
            if name == "html" || name == "body" || name == "main" || name == "article" {
                return false;
            }
            SKIP_TAGS.contains(&name) || class_and_id(el).is_some_and(|s| BOILERPLATE_RE.is_match(&s))
        })
        .map(|el| el.id())
        .collect();

    for id in ids {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.detach();
        }
    }
}

fn class_and_id(el: &ElementRef) -> Option<String> {
    let class = el.value().attr("class").unwrap_or_default();
    let id = el.value().attr("id").unwrap_or_default();
    let joined = format!("{class} {id}");
    (!joined.trim().is_empty()).then_some(joined)
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Paragraph scores per container, in document order of first contribution.
fn score_containers(doc: &Html) -> Vec<(ElementRef<'_>, f64)> {
    let mut scores = Vec::new();

    for el in doc.root_element().descendants().filter_map(ElementRef::wrap) {
        if !SCORED_TAGS.contains(&el.value().name()) {
            continue;
        }
        let text: String = el.text().collect();
        let len = char_count(&text);
        if len < MIN_PARAGRAPH_CHARS {
            continue;
        }

        let commas = text.chars().filter(|c| matches!(c, ',' | '，' | '、')).count();
        let score = 1.0 + commas as f64 + (len as f64 / 100.0).min(3.0);

        let Some(parent) = el.parent() else { continue };
        add_score(&mut scores, parent.id(), score);
        if let Some(grandparent) = parent.parent().filter(|g| g.value().is_element()) {
            add_score(&mut scores, grandparent.id(), score / 2.0);
        }
    }

    scores
        .into_iter()
        .filter_map(|(id, score)| doc.tree.get(id).and_then(ElementRef::wrap).map(|el| (el, score)))
        .collect()
}

fn add_score<K: PartialEq>(scores: &mut Vec<(K, f64)>, key: K, score: f64) {
    match scores.iter_mut().find(|(seen, _)| *seen == key) {
        Some((_, total)) => *total += score,
        None => scores.push((key, score)),
    }
}

/// Scale by link density and nudge by class/id hints.
fn adjusted_score(el: ElementRef, raw: f64) -> f64 {
    let mut score = raw * (1.0 - link_density(el));
    if let Some(hint) = class_and_id(&el) {
        if POSITIVE_RE.is_match(&hint) {
            score += 25.0;
        }
        if NEGATIVE_RE.is_match(&hint) {
            score -= 25.0;
        }
    }
    if matches!(el.value().name(), "article" | "main") {
        score += 10.0;
    }
    score
}

/// Share of the element's text that sits inside links.
fn link_density(el: ElementRef) -> f64 {
    let total = text_chars(el);
    if total == 0 {
        return 0.0;
    }
    let linked: usize = el
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == "a")
        .map(text_chars)
        .sum();
    (linked as f64 / total as f64).min(1.0)
}

/// The best container plus any sibling that looks like more of the same article.
fn with_siblings<'a>(
    best: ElementRef<'a>,
    best_score: f64,
    scores: &[(ElementRef<'a>, f64)],
) -> Vec<ElementRef<'a>> {
    let Some(parent) = best.parent().and_then(ElementRef::wrap) else {
        return vec![best];
    };
    let threshold = (best_score * 0.2).max(10.0);

    parent
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|sib| {
            if sib.id() == best.id() {
                return true;
            }
            if scores
                .iter()
                .find(|(el, _)| el.id() == sib.id())
                .is_some_and(|(el, s)| adjusted_score(*el, *s) >= threshold)
            {
                return true;
            }
            sib.value().name() == "p" && text_chars(*sib) > 80 && link_density(*sib) < 0.25
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render(el: ElementRef, out: &mut String) {
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            push_inline(out, text);
            continue;
        }
        let Some(child_el) = ElementRef::wrap(child) else {
            continue;
        };
        match child_el.value().name() {
            "br" => out.push('\n'),
            "tr" => {
                out.push('\n');
                render_row(child_el, out);
                out.push('\n');
            }
            name if INVISIBLE_TAGS.contains(&name) => {}
            name if BLOCK_TAGS.contains(&name) => {
                out.push('\n');
                render(child_el, out);
                out.push('\n');
            }
            _ => render(child_el, out),
        }
    }
}

fn render_row(tr: ElementRef, out: &mut String) {
    let cells: Vec<String> = tr
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|c| matches!(c.value().name(), "td" | "th"))
        .map(|cell| {
            let mut buf = String::new();
            render(cell, &mut buf);
            buf.split_whitespace().collect::<Vec<_>>().join(" ")
        })
        .filter(|c| !c.is_empty())
        .collect();
    out.push_str(&cells.join(" | "));
}

fn push_inline(out: &mut String, text: &str) {
    out.extend(text.chars().map(|c| if c.is_whitespace() { ' ' } else { c }));
}

/// Collapse whitespace per line and drop blank lines.
fn tidy_lines(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn text_chars(el: ElementRef) -> usize {
    el.text()
        .flat_map(str::split_whitespace)
        .map(char_count)
        .sum()
}

/// Length in Unicode scalar values.
pub fn char_count(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = r#"<html><head><title>T</title><script>var x = 1;</script></head>
<body>
  <nav><a href="/">홈</a> <a href="/news">뉴스</a></nav>
  <div class="layout">
    <div class="article-body">
      <p>첫 번째 문단입니다. 올해 광고 시장은 디지털 중심으로 재편되고 있으며, 브랜드들은 새로운 채널을 찾고 있다.</p>
      <p>두 번째 문단입니다. 업계 관계자는 "리테일 미디어가 빠르게 성장하고 있다"고 말했다, 그리고 예산을 늘렸다.</p>
      <table><tr><th>구분</th><th>비중</th></tr><tr><td>디지털</td><td>62%</td></tr></table>
      <p>세 번째 문단은 <a href="https://example.com/x">관련 보고서</a>를 인용하며 시장의 변화를 자세히 설명한다.</p>
    </div>
    <div class="comments"><p>댓글: 좋은 기사 감사합니다. 다음 기사도 기대하겠습니다, 정말로요.</p></div>
  </div>
  <footer>Copyright 2025 Example Media. All rights reserved.</footer>
</body></html>"#;

    #[test]
    fn main_text_keeps_body_and_drops_chrome() {
        let mut doc = Html::parse_document(ARTICLE);
        let text = main_text(&mut doc).expect("main text");

        assert!(text.contains("첫 번째 문단입니다."));
        assert!(text.contains("세 번째 문단은 관련 보고서를 인용하며"));
        assert!(!text.contains("https://example.com/x"));
        assert!(!text.contains("댓글"));
        assert!(!text.contains("Copyright"));
        assert!(!text.contains("var x"));
        assert!(!text.contains("홈"));
    }

    #[test]
    fn main_text_renders_tables() {
        let mut doc = Html::parse_document(ARTICLE);
        let text = main_text(&mut doc).expect("main text");
        assert!(text.contains("구분 | 비중"));
        assert!(text.contains("디지털 | 62%"));
    }

    #[test]
    fn main_text_of_empty_page_is_none() {
        let mut doc = Html::parse_document("<html><body><nav>menu</nav></body></html>");
        assert!(main_text(&mut doc).is_none());
    }

    #[test]
    fn visible_text_joins_with_single_spaces() {
        let text = visible_text(
            "<html><head><style>p{}</style></head><body><h1>Title</h1>\n<p>one\n  two</p><script>x()</script><p>three</p></body></html>",
        );
        assert_eq!(text, "Title one two three");
    }

    #[test]
    fn char_count_counts_scalars() {
        assert_eq!(char_count("기사"), 2);
        assert_eq!("기사".len(), 6);
    }
}
