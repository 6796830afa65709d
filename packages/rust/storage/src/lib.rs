//! Stage snapshot storage.
//!
//! Every pipeline stage writes its complete output as one JSON document,
//! addressed by `(run id, stage name)`. Two backends implement
//! [`StageStore`]:
//! - [`FsStageStore`]: `<root>/<YYYYMMDD>/<run>/<stage>_result.json` files
//! - [`SqlStageStore`]: a libSQL database with one row per snapshot
//!
//! Writing a stage replaces only that stage's previous snapshot for the run;
//! other stages are never touched.

mod fs;
mod migrations;
mod sql;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use trendlyze_shared::{
    Record, Result, RunId, StorageBackend, StorageConfig, TopicResult, TrendlyzeError,
    sort_by_idx,
};

pub use fs::FsStageStore;
pub use sql::SqlStageStore;

// ---------------------------------------------------------------------------
// StageStore
// ---------------------------------------------------------------------------

/// Persists and retrieves per-stage snapshots of a run.
///
/// Backends implement the three document primitives; the typed record and
/// topic operations are provided on top of them.
#[async_trait]
pub trait StageStore: Send + Sync {
    /// Store `body` as the snapshot of `stage`, replacing any previous one.
    async fn put_document(
        &self,
        run: &RunId,
        stage: &str,
        body: &str,
        item_count: usize,
    ) -> Result<()>;

    /// Fetch the snapshot of `stage`, if it was written.
    async fn get_document(&self, run: &RunId, stage: &str) -> Result<Option<String>>;

    /// Names of every stage of `run` starting with `prefix`, sorted.
    async fn list_documents(&self, run: &RunId, prefix: &str) -> Result<Vec<String>>;

    /// Write a record set. Empty sets are not written; returns whether a
    /// snapshot was stored.
    async fn write_stage(&self, run: &RunId, stage: &str, records: &[Record]) -> Result<bool> {
        validate_stage_name(stage)?;
        if records.is_empty() {
            warn!(%run, stage, "empty result set, snapshot not written");
            return Ok(false);
        }

        let body = serde_json::to_string_pretty(records)
            .map_err(|e| TrendlyzeError::Storage(format!("failed to encode {stage}: {e}")))?;
        self.put_document(run, stage, &body, records.len()).await?;
        tracing::info!(%run, stage, count = records.len(), "stage snapshot written");
        Ok(true)
    }

    /// Read a record set, sorted by `idx`. A missing or malformed snapshot is an error.
    async fn read_stage(&self, run: &RunId, stage: &str) -> Result<Vec<Record>> {
        validate_stage_name(stage)?;
        let body = self
            .get_document(run, stage)
            .await?
            .ok_or_else(|| missing_stage(run, stage))?;

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| TrendlyzeError::parse(format!("malformed snapshot {run}/{stage}: {e}")))?;
        let mut records = Vec::new();
        flatten_records(value, &mut records)
            .map_err(|e| TrendlyzeError::parse(format!("malformed snapshot {run}/{stage}: {e}")))?;
        sort_by_idx(&mut records);
        Ok(records)
    }

    /// Merge every snapshot under `prefix` into one record set sorted by `idx`.
    ///
    /// Documents may hold a list, a list of lists, or a single record.
    /// Malformed documents are logged and skipped.
    async fn list_stages(&self, run: &RunId, prefix: &str) -> Result<Vec<Record>> {
        let mut records = Vec::new();

        for stage in self.list_documents(run, prefix).await? {
            let Some(body) = self.get_document(run, &stage).await? else {
                continue;
            };
            let parsed = serde_json::from_str::<Value>(&body)
                .map_err(|e| e.to_string())
                .and_then(|value| {
                    let mut found = Vec::new();
                    flatten_records(value, &mut found).map(|_| found)
                });
            match parsed {
                Ok(found) => {
                    tracing::debug!(%run, stage, count = found.len(), "snapshot loaded");
                    records.extend(found);
                }
                Err(e) => warn!(%run, stage, error = %e, "skipping malformed snapshot"),
            }
        }

        sort_by_idx(&mut records);
        Ok(records)
    }

    /// Write the topic results of a run. Empty sets are not written.
    async fn write_topics(&self, run: &RunId, stage: &str, topics: &[TopicResult]) -> Result<bool> {
        validate_stage_name(stage)?;
        if topics.is_empty() {
            warn!(%run, stage, "no topics, snapshot not written");
            return Ok(false);
        }

        let body = serde_json::to_string_pretty(topics)
            .map_err(|e| TrendlyzeError::Storage(format!("failed to encode {stage}: {e}")))?;
        self.put_document(run, stage, &body, topics.len()).await?;
        tracing::info!(%run, stage, count = topics.len(), "topic snapshot written");
        Ok(true)
    }

    /// Read the topic results of a run.
    async fn read_topics(&self, run: &RunId, stage: &str) -> Result<Vec<TopicResult>> {
        validate_stage_name(stage)?;
        let body = self
            .get_document(run, stage)
            .await?
            .ok_or_else(|| missing_stage(run, stage))?;
        serde_json::from_str(&body)
            .map_err(|e| TrendlyzeError::parse(format!("malformed snapshot {run}/{stage}: {e}")))
    }
}

/// Open the backend selected by `config`.
pub async fn open_store(config: &StorageConfig) -> Result<Box<dyn StageStore>> {
    match config.backend {
        StorageBackend::Fs => Ok(Box::new(FsStageStore::new(&config.root))),
        StorageBackend::Libsql => Ok(Box::new(
            SqlStageStore::open(std::path::Path::new(&config.db_path)).await?,
        )),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Stage names are `/`-separated segments of `[A-Za-z0-9_.-]`, never `.` or `..`.
pub fn validate_stage_name(stage: &str) -> Result<()> {
    let valid = !stage.is_empty()
        && stage.split('/').all(|seg| {
            !seg.is_empty()
                && seg != "."
                && seg != ".."
                && seg
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        });

    if valid {
        Ok(())
    } else {
        Err(TrendlyzeError::validation(format!(
            "invalid stage name '{stage}'"
        )))
    }
}

fn missing_stage(run: &RunId, stage: &str) -> TrendlyzeError {
    TrendlyzeError::validation(format!("stage '{stage}' not found for run {run}"))
}

/// Collect records from a list, nested lists, or a single object.
fn flatten_records(value: Value, out: &mut Vec<Record>) -> std::result::Result<(), String> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .try_for_each(|item| flatten_records(item, out)),
        Value::Object(_) => {
            let record: Record = serde_json::from_value(value).map_err(|e| e.to_string())?;
            out.push(record);
            Ok(())
        }
        other => Err(format!("expected a record or a list, found {other}")),
    }
}
