//! Core domain types for Trendlyze runs.

use std::collections::BTreeMap;

use chrono::Local;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TrendlyzeError;

/// Topic value recorded when summarizing a cluster failed.
pub const TOPIC_ERROR: &str = "ERROR";

/// Category assigned to annotations that come back without one.
pub const UNCATEGORIZED: &str = "기타";

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// Identifies one pipeline run: the collection date plus a time-sortable UUID.
///
/// Displayed and parsed as `YYYYMMDD/<uuid-simple>`, which is also the
/// directory prefix of every stage snapshot written by the run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunId {
    date: String,
    id: Uuid,
}

impl RunId {
    /// Start a new run dated today (local time).
    pub fn new() -> Self {
        Self {
            date: Local::now().format("%Y%m%d").to_string(),
            id: Uuid::now_v7(),
        }
    }

    /// `YYYYMMDD` component.
    pub fn date(&self) -> &str {
        &self.date
    }

    /// Hex id component (no dashes).
    pub fn id(&self) -> String {
        self.id.simple().to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.date, self.id.simple())
    }
}

impl std::str::FromStr for RunId {
    type Err = TrendlyzeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (date, id) = s.split_once('/').ok_or_else(|| {
            TrendlyzeError::validation(format!("run id '{s}' must look like YYYYMMDD/<id>"))
        })?;

        if date.len() != 8 || !date.chars().all(|c| c.is_ascii_digit()) {
            return Err(TrendlyzeError::validation(format!(
                "run id '{s}' has an invalid date component"
            )));
        }

        let id = Uuid::parse_str(id)
            .map_err(|e| TrendlyzeError::validation(format!("run id '{s}': {e}")))?;

        Ok(Self {
            date: date.to_string(),
            id,
        })
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// Source metadata attached to a record at collection time.
///
/// `origin` names the source; every other key (category code, category name,
/// ...) is carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaData {
    pub origin: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl MetaData {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Add a string field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields
            .insert(key.into(), serde_json::Value::String(value.into()));
        self
    }

    /// Look up a non-empty string field.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }
}

/// Output of the external annotation service.
///
/// Only `category` and `summary` are interpreted; everything else the service
/// returns (sentiment score, keyword lists, ...) is preserved as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Annotation {
    pub fn new(category: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            summary: Some(summary.into()),
            extra: BTreeMap::new(),
        }
    }

    /// Category label, falling back to [`UNCATEGORIZED`].
    pub fn category(&self) -> &str {
        self.category
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(UNCATEGORIZED)
    }

    /// Non-empty summary text.
    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// Semantic deduplication label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DuplicateStatus {
    /// Representative of a group with at least one duplicate.
    #[serde(rename = "R")]
    Representative,
    /// Near-duplicate of the record named by `repIdx`.
    #[serde(rename = "D")]
    Duplicate,
    /// No near-duplicates.
    #[serde(rename = "N")]
    Unique,
}

/// One collected article and everything later stages attach to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Assigned once at collection; the sort key of every stage snapshot.
    pub idx: u64,
    pub meta_data: MetaData,
    pub title: String,
    pub link: String,
    /// `YYYY.MM.DD`, or empty when the source date could not be parsed.
    #[serde(default)]
    pub date: String,
    /// `None`: extraction not attempted. `Some("")`: no usable body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyze: Option<Annotation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyze_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_duplicate: Option<DuplicateStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rep_idx: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicates: Option<Vec<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_error: Option<String>,
}

impl Record {
    /// Build a collection stub (no content yet).
    pub fn stub(
        idx: u64,
        meta_data: MetaData,
        title: impl Into<String>,
        link: impl Into<String>,
        date: impl Into<String>,
    ) -> Self {
        Self {
            idx,
            meta_data,
            title: title.into(),
            link: link.into(),
            date: date.into(),
            ..Default::default()
        }
    }

    /// Extracted body text, if non-empty.
    pub fn body(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.is_empty())
    }

    /// Annotation summary, if the record has one.
    pub fn summary(&self) -> Option<&str> {
        self.analyze.as_ref().and_then(Annotation::summary)
    }
}

/// Sort records ascending by `idx` (stable).
pub fn sort_by_idx(records: &mut [Record]) {
    records.sort_by_key(|r| r.idx);
}

// ---------------------------------------------------------------------------
// TopicResult
// ---------------------------------------------------------------------------

/// The topic extracted for one (category, cluster) group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicResult {
    pub category: String,
    pub cluster_id: u32,
    /// Topic sentence, or [`TOPIC_ERROR`] when summarization failed.
    pub topic: String,
    /// Why the topic was chosen, or the failure message.
    pub reason: String,
    pub articles: Vec<Record>,
}

impl TopicResult {
    pub fn is_error(&self) -> bool {
        self.topic == TOPIC_ERROR
    }
}
