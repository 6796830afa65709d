//! Prompt text and reply parsing for the chat-based capabilities.

use serde_json::Value;

use trendlyze_shared::{Annotation, Result, TopicSummary, TrendlyzeError};

pub(crate) const ANNOTATE_SYSTEM: &str = "당신은 광고·마케팅 업계 기사를 분석하는 애널리스트입니다. \
항상 지정된 키만 가진 JSON 객체 하나로 답합니다.";

pub(crate) const TOPIC_SYSTEM: &str =
    "당신은 수많은 산업 기사를 분석해 공통 주제를 추출하는 전문 AI입니다. \
항상 지정된 키만 가진 JSON 객체 하나로 답합니다.";

/// User message for article annotation.
pub(crate) fn annotate_user(content: &str) -> String {
    format!(
        "다음 본문을 분석하고 아래 키를 가진 JSON 객체로 답하십시오.\n\
         - sentiment_score: 0~100 정수\n\
         - positive_keywords: 최대 5개 긍정적인 단어나 문구 리스트\n\
         - negative_keywords: 최대 5개 부정적인 단어나 문구 리스트\n\
         - frequent_keywords: 최대 5개 출현빈도 높은 단어 리스트\n\
         - summary: 500자 이내 요약\n\
         - brief_summary: 100자 이내의 핵심 한 문장 요약\n\
         - category: 커머스, 컨슈머, 콘텐츠 중 하나\n\n\
         <본문>\n{content}"
    )
}

/// User message for cluster topic extraction.
pub(crate) fn topic_user(joined_text: &str) -> String {
    format!(
        "다음 기사들은 같은 클러스터로 묶인 관련 기사들입니다.\n\
         공통된 주제를 하나의 문장으로 요약하고, 그렇게 판단한 이유를 300자 이내로 요약하세요.\n\
         JSON 키: topic (대표 주제, 1문장), reason (선택 이유와 공통점 요약).\n\n\
         <기사 목록>\n{joined_text}"
    )
}

// ---------------------------------------------------------------------------
// Reply parsing
// ---------------------------------------------------------------------------

/// Pull the JSON object out of a model reply, tolerating code fences and prose.
pub(crate) fn parse_json_object(reply: &str) -> Result<serde_json::Map<String, Value>> {
    let trimmed = reply.trim();
    let candidate = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => {
            return Err(TrendlyzeError::parse(format!(
                "model reply has no JSON object: {}",
                preview(trimmed)
            )));
        }
    };

    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(TrendlyzeError::parse("model reply is not a JSON object")),
        Err(e) => Err(TrendlyzeError::parse(format!(
            "model reply is not valid JSON ({e}): {}",
            preview(trimmed)
        ))),
    }
}

/// Interpret an annotation reply. Unknown keys are kept.
pub(crate) fn parse_annotation(reply: &str) -> Result<Annotation> {
    let map = parse_json_object(reply)?;
    serde_json::from_value(Value::Object(map))
        .map_err(|e| TrendlyzeError::parse(format!("annotation reply: {e}")))
}

/// Interpret a topic reply. `topic` must be a non-empty string.
pub(crate) fn parse_topic(reply: &str) -> Result<TopicSummary> {
    let map = parse_json_object(reply)?;
    let topic = map
        .get("topic")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| TrendlyzeError::parse("topic reply has no topic"))?;
    let reason = map
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or_default();

    Ok(TopicSummary {
        topic: topic.to_string(),
        reason: reason.trim().to_string(),
    })
}

fn preview(text: &str) -> String {
    text.chars().take(120).collect()
}
