//! SQL migration definitions for the stage snapshot database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: stage_snapshots",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One JSON document per (run, stage); re-running a stage replaces its row
CREATE TABLE IF NOT EXISTS stage_snapshots (
    run_id     TEXT NOT NULL,
    stage      TEXT NOT NULL,
    body       TEXT NOT NULL,
    written_at TEXT NOT NULL,
    PRIMARY KEY (run_id, stage)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Item counts and run index",
            sql: r#"
ALTER TABLE stage_snapshots ADD COLUMN item_count INTEGER NOT NULL DEFAULT 0;

CREATE INDEX IF NOT EXISTS idx_stage_snapshots_run ON stage_snapshots(run_id);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
