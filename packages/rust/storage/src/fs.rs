//! Filesystem stage store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use trendlyze_shared::{Result, RunId, TrendlyzeError};

use crate::{StageStore, validate_stage_name};

/// File name suffix of every snapshot.
const SUFFIX: &str = "_result.json";

/// Stores snapshots as `<root>/<YYYYMMDD>/<run>/<stage>_result.json`.
#[derive(Debug, Clone)]
pub struct FsStageStore {
    root: PathBuf,
}

impl FsStageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of all runs.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every snapshot of `run`.
    pub fn run_dir(&self, run: &RunId) -> PathBuf {
        self.root.join(run.date()).join(run.id())
    }

    /// File path of one snapshot.
    pub fn stage_path(&self, run: &RunId, stage: &str) -> PathBuf {
        self.run_dir(run).join(format!("{stage}{SUFFIX}"))
    }
}

#[async_trait]
impl StageStore for FsStageStore {
    async fn put_document(
        &self,
        run: &RunId,
        stage: &str,
        body: &str,
        item_count: usize,
    ) -> Result<()> {
        validate_stage_name(stage)?;
        let path = self.stage_path(run, stage);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TrendlyzeError::io(parent, e))?;
        }

        // Write-then-rename so readers never see a partial snapshot.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| TrendlyzeError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| TrendlyzeError::io(&path, e))?;

        debug!(path = %path.display(), item_count, "snapshot file written");
        Ok(())
    }

    async fn get_document(&self, run: &RunId, stage: &str) -> Result<Option<String>> {
        validate_stage_name(stage)?;
        let path = self.stage_path(run, stage);
        match tokio::fs::read_to_string(&path).await {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TrendlyzeError::io(&path, e)),
        }
    }

    async fn list_documents(&self, run: &RunId, prefix: &str) -> Result<Vec<String>> {
        let run_dir = self.run_dir(run);
        let mut stages = Vec::new();
        let mut pending = vec![run_dir.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(TrendlyzeError::io(&dir, e)),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| TrendlyzeError::io(&dir, e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| TrendlyzeError::io(&path, e))?;

                if file_type.is_dir() {
                    pending.push(path);
                } else if let Some(stage) = stage_name(&run_dir, &path) {
                    if stage.starts_with(prefix) {
                        stages.push(stage);
                    }
                }
            }
        }

        stages.sort();
        Ok(stages)
    }
}

/// Stage name of a snapshot file relative to its run directory.
fn stage_name(run_dir: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(run_dir).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    let joined = parts.join("/");
    joined.strip_suffix(SUFFIX).map(str::to_string)
}
