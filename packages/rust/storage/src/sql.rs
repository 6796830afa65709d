//! libSQL stage store (local, offline mode).

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database, params};

use trendlyze_shared::{Result, RunId, TrendlyzeError};

use crate::{StageStore, migrations, validate_stage_name};

/// Stores each snapshot as one row of `stage_snapshots`.
pub struct SqlStageStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl SqlStageStore {
    /// Open or create a database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| TrendlyzeError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(TrendlyzeError::storage)?;

        let conn = db
            .connect()
            .map_err(TrendlyzeError::storage)?;

        let store = Self { db, conn };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        TrendlyzeError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

}

#[async_trait]
impl StageStore for SqlStageStore {
    async fn put_document(
        &self,
        run: &RunId,
        stage: &str,
        body: &str,
        item_count: usize,
    ) -> Result<()> {
        validate_stage_name(stage)?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO stage_snapshots (run_id, stage, body, written_at, item_count)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(run_id, stage) DO UPDATE SET
                   body = excluded.body,
                   written_at = excluded.written_at,
                   item_count = excluded.item_count",
                params![run.to_string(), stage, body, now.as_str(), item_count as i64],
            )
            .await
            .map_err(TrendlyzeError::storage)?;
        Ok(())
    }

    async fn get_document(&self, run: &RunId, stage: &str) -> Result<Option<String>> {
        validate_stage_name(stage)?;
        let mut rows = self
            .conn
            .query(
                "SELECT body FROM stage_snapshots WHERE run_id = ?1 AND stage = ?2",
                params![run.to_string(), stage],
            )
            .await
            .map_err(TrendlyzeError::storage)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row.get::<String>(0)
                    .map_err(TrendlyzeError::storage)?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(TrendlyzeError::storage(e)),
        }
    }

    async fn list_documents(&self, run: &RunId, prefix: &str) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT stage FROM stage_snapshots WHERE run_id = ?1 ORDER BY stage",
                params![run.to_string()],
            )
            .await
            .map_err(TrendlyzeError::storage)?;

        let mut stages = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let stage = row
                .get::<String>(0)
                .map_err(TrendlyzeError::storage)?;
            if stage.starts_with(prefix) {
                stages.push(stage);
            }
        }
        Ok(stages)
    }
}
