//! Textual post-filter for extracted article bodies.
//!
//! Each pass is a function `&str -> String` applied in sequence. Leading
//! passes only look at the first [`WINDOW`] characters, trailing passes only
//! at the last [`WINDOW`], so a matching phrase in the middle of the article
//! is never cut.

use std::sync::LazyLock;

use regex::Regex;

/// Characters inspected at either end of the text.
pub const WINDOW: usize = 50;

/// Run every post-filter pass.
pub(crate) fn run_pipeline(text: &str) -> String {
    let mut result = text.trim().to_string();

    result = strip_leading_byline(&result);
    result = strip_wire_credit(&result);
    result = strip_trailing_byline(&result);
    result = strip_agency_signature(&result);
    result = strip_trailing_email(&result);

    result
}

// ---------------------------------------------------------------------------
// Pass 1: "(서울=연합뉴스) 홍길동 기자 = " style datelines
// ---------------------------------------------------------------------------

fn strip_leading_byline(text: &str) -> String {
    static LEAD_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^\((.{1,10})\)\s{0,5}.{1,10}기자\s*=\s*").expect("valid regex")
    });

    let head = &text[..head_end(text)];
    match LEAD_RE.find(head) {
        Some(m) => text[m.end()..].to_string(),
        None => text.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Pass 2: wire-service credit ("연합뉴스 ... 입니다.")
// ---------------------------------------------------------------------------

fn strip_wire_credit(text: &str) -> String {
    static WIRE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"연합뉴스.*?입니다\.").expect("valid regex"));

    cut_in_tail(text, &WIRE_RE)
}

// ---------------------------------------------------------------------------
// Pass 3: "[서울=홍길동 기자]" style sign-offs
// ---------------------------------------------------------------------------

fn strip_trailing_byline(text: &str) -> String {
    static TAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\[[^\[\]]{1,20}\s.{1,10}\s(기자|특파원)\]").expect("valid regex")
    });

    cut_in_tail(text, &TAIL_RE)
}

// ---------------------------------------------------------------------------
// Pass 4: agency staff signatures
// ---------------------------------------------------------------------------

fn strip_agency_signature(text: &str) -> String {
    static SIGNATURE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"제일기획\s.{2,10}\s프로\s*\(.*?CD팀\)").expect("valid regex")
    });

    cut_in_tail(text, &SIGNATURE_RE)
}

// ---------------------------------------------------------------------------
// Pass 5: trailing e-mail address
// ---------------------------------------------------------------------------

fn strip_trailing_email(text: &str) -> String {
    static EMAIL_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[\w.-]+@[\w.-]+\.\w+$").expect("valid regex"));

    let trimmed = text.trim();
    let start = tail_start(trimmed);
    match EMAIL_RE.find(&trimmed[start..]) {
        Some(m) => trimmed[..start + m.start()].trim_end().to_string(),
        None => trimmed.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Truncate `text` at the first match of `re` inside the trailing window.
fn cut_in_tail(text: &str, re: &Regex) -> String {
    let start = tail_start(text);
    match re.find(&text[start..]) {
        Some(m) => text[..start + m.start()].trim_end().to_string(),
        None => text.to_string(),
    }
}

/// Byte offset where the leading window ends.
fn head_end(text: &str) -> usize {
    text.char_indices()
        .nth(WINDOW)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

/// Byte offset where the trailing window starts.
fn tail_start(text: &str) -> usize {
    text.char_indices()
        .rev()
        .nth(WINDOW - 1)
        .map(|(i, _)| i)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILLER: &str = "광고 업계는 올해 하반기 리테일 미디어 투자를 크게 늘릴 것으로 보인다. 주요 브랜드들은 예산을 재배분하고 있으며 새로운 측정 지표 도입에도 적극적이다. ";

    #[test]
    fn strips_leading_dateline() {
        let text = format!("(서울=연합뉴스) 홍길동 기자 = {FILLER}");
        let out = run_pipeline(&text);
        assert!(out.starts_with("광고 업계는"));
    }

    #[test]
    fn strips_trailing_reporter_tag() {
        let text = format!("{FILLER}[서울=뉴스1 홍길동 기자]");
        let out = run_pipeline(&text);
        assert!(out.ends_with("적극적이다."));
    }

    #[test]
    fn strips_agency_signature() {
        let text = format!("{FILLER}제일기획 홍길동 프로 (BX2 CD팀)");
        let out = run_pipeline(&text);
        assert!(out.ends_with("적극적이다."));
    }

    #[test]
    fn strips_trailing_email() {
        let text = format!("{FILLER} reporter.kim@example.co.kr");
        let out = run_pipeline(&text);
        assert!(out.ends_with("적극적이다."));
        assert!(!out.contains('@'));
    }

    #[test]
    fn leaves_middle_of_text_alone() {
        let text = format!("{FILLER}[서울=뉴스1 홍길동 기자] {FILLER}{FILLER}");
        let out = run_pipeline(&text);
        assert!(out.contains("[서울=뉴스1 홍길동 기자]"));
        assert_eq!(out, text.trim());
    }

    #[test]
    fn windows_respect_char_boundaries() {
        let text = "가".repeat(120);
        assert_eq!(text[..head_end(&text)].chars().count(), WINDOW);
        assert_eq!(text[tail_start(&text)..].chars().count(), WINDOW);

        let short = "짧은 글";
        assert_eq!(head_end(short), short.len());
        assert_eq!(tail_start(short), 0);
    }
}
