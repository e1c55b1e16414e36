//! SQL migration definitions for the Brandlens run ledger.
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
    vec![Migration {
        version: 1,
        description: "Initial schema: runs, steps, artifacts",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per pipeline run
CREATE TABLE IF NOT EXISTS runs (
    id                   TEXT PRIMARY KEY,
    url                  TEXT NOT NULL,
    status               TEXT NOT NULL,
    completed_steps_json TEXT NOT NULL DEFAULT '[]',
    error_kind           TEXT,
    error_message        TEXT,
    created_at           TEXT NOT NULL,
    completed_at         TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_created_at ON runs(created_at);

-- Append-only step history
CREATE TABLE IF NOT EXISTS steps (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id        TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    name          TEXT NOT NULL,
    status        TEXT NOT NULL,
    started_at    TEXT NOT NULL,
    finished_at   TEXT,
    error_kind    TEXT,
    error_message TEXT,
    served_by     TEXT,
    UNIQUE(run_id, name)
);

CREATE INDEX IF NOT EXISTS idx_steps_run_id ON steps(run_id);

-- Acquisition outcome per run
CREATE TABLE IF NOT EXISTS artifacts (
    run_id          TEXT PRIMARY KEY REFERENCES runs(id) ON DELETE CASCADE,
    original_ref    TEXT NOT NULL,
    original_len    INTEGER NOT NULL,
    processed_len   INTEGER NOT NULL,
    truncated       INTEGER NOT NULL,
    original_sha256 TEXT NOT NULL,
    preview         TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
