//! Run ledger and content persistence for Brandlens.
//!
//! Two stores live here:
//! - [`Storage`] wraps a libSQL database holding the run/step/artifact
//!   lifecycle (the only relational schema the system keeps).
//! - [`FsContentStore`] (behind the [`ContentStore`] trait) writes original
//!   content copies and final result files to the data directory.
//!
//! **Access rules:**
//! - `brandlens run`: read-write via [`Storage::open`]
//! - introspection commands: read-only via [`Storage::open_readonly`]

mod files;
mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};

use brandlens_shared::{
    ArtifactSummary, BrandlensError, PipelineRun, Result, RunId, RunStatus, StepRecord,
    StepStatus, StorageRef,
};

pub use files::{ContentStore, FsContentStore};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

fn storage_err(e: impl std::fmt::Display) -> BrandlensError {
    BrandlensError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BrandlensError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BrandlensError::Storage(format!(
                "no run database at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
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
                        BrandlensError::Storage(format!(
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

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(BrandlensError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Run operations
    // -----------------------------------------------------------------------

    /// Insert a newly requested run.
    pub async fn insert_run(&self, run: &PipelineRun) -> Result<()> {
        self.check_writable()?;
        let steps_json = serde_json::to_string(&run.completed_steps).map_err(storage_err)?;
        self.conn
            .execute(
                "INSERT INTO runs (id, url, status, completed_steps_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    run.id.to_string(),
                    run.url.as_str(),
                    run.status.as_str(),
                    steps_json,
                    run.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Write the mutable columns of a run (status, progress, outcome).
    pub async fn update_run(&self, run: &PipelineRun) -> Result<()> {
        self.check_writable()?;
        let steps_json = serde_json::to_string(&run.completed_steps).map_err(storage_err)?;
        let changed = self
            .conn
            .execute(
                "UPDATE runs SET status = ?1, completed_steps_json = ?2, error_kind = ?3,
                   error_message = ?4, completed_at = ?5
                 WHERE id = ?6",
                params![
                    run.status.as_str(),
                    steps_json,
                    run.error_kind.as_deref(),
                    run.error_message.as_deref(),
                    run.completed_at.map(|t| t.to_rfc3339()),
                    run.id.to_string(),
                ],
            )
            .await
            .map_err(storage_err)?;

        if changed == 0 {
            return Err(BrandlensError::Storage(format!("run {} not found", run.id)));
        }
        Ok(())
    }

    /// Get a run by ID.
    pub async fn get_run(&self, id: &RunId) -> Result<Option<PipelineRun>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, url, status, completed_steps_json, error_kind, error_message,
                        created_at, completed_at
                 FROM runs WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_run(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// List the most recent runs, newest first.
    pub async fn list_runs(&self, limit: u32) -> Result<Vec<PipelineRun>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, url, status, completed_steps_json, error_kind, error_message,
                        created_at, completed_at
                 FROM runs ORDER BY created_at DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_run(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Step operations
    // -----------------------------------------------------------------------

    /// Record the start of a step.
    pub async fn insert_step(&self, run_id: &RunId, step: &StepRecord) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO steps (run_id, name, status, started_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    run_id.to_string(),
                    step.name.as_str(),
                    step.status.as_str(),
                    step.started_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Move a pending step to `running`, stamping its start time.
    pub async fn start_step(&self, run_id: &RunId, step: &StepRecord) -> Result<()> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE steps SET status = 'running', started_at = ?1
                 WHERE run_id = ?2 AND name = ?3 AND status = 'pending'",
                params![
                    step.started_at.to_rfc3339(),
                    run_id.to_string(),
                    step.name.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;

        if changed == 0 {
            return Err(BrandlensError::Storage(format!(
                "step `{}` of run {run_id} is not pending",
                step.name
            )));
        }
        Ok(())
    }

    /// Finalize a running step. A step that is already terminal is never rewritten.
    pub async fn finalize_step(&self, run_id: &RunId, step: &StepRecord) -> Result<()> {
        self.check_writable()?;
        if !step.status.is_terminal() {
            return Err(BrandlensError::Storage(format!(
                "step `{}` cannot be finalized as {}",
                step.name, step.status
            )));
        }

        let changed = self
            .conn
            .execute(
                "UPDATE steps SET status = ?1, finished_at = ?2, error_kind = ?3,
                   error_message = ?4, served_by = ?5
                 WHERE run_id = ?6 AND name = ?7 AND status = 'running'",
                params![
                    step.status.as_str(),
                    step.finished_at.map(|t| t.to_rfc3339()),
                    step.error_kind.as_deref(),
                    step.error_message.as_deref(),
                    step.served_by.as_deref(),
                    run_id.to_string(),
                    step.name.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;

        if changed == 0 {
            return Err(BrandlensError::Storage(format!(
                "step `{}` of run {run_id} is not running",
                step.name
            )));
        }
        Ok(())
    }

    /// List a run's steps in start order.
    pub async fn list_steps(&self, run_id: &RunId) -> Result<Vec<StepRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT name, status, started_at, finished_at, error_kind, error_message, served_by
                 FROM steps WHERE run_id = ?1 ORDER BY id",
                params![run_id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let status: String = row.get(1).map_err(storage_err)?;
            results.push(StepRecord {
                name: row.get::<String>(0).map_err(storage_err)?,
                status: status.parse::<StepStatus>().map_err(BrandlensError::Storage)?,
                started_at: parse_time(&row.get::<String>(2).map_err(storage_err)?)?,
                finished_at: row
                    .get::<String>(3)
                    .ok()
                    .map(|s| parse_time(&s))
                    .transpose()?,
                error_kind: row.get::<String>(4).ok(),
                error_message: row.get::<String>(5).ok(),
                served_by: row.get::<String>(6).ok(),
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Artifact operations
    // -----------------------------------------------------------------------

    /// Record the acquisition outcome of a run.
    pub async fn insert_artifact_summary(
        &self,
        run_id: &RunId,
        summary: &ArtifactSummary,
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO artifacts (run_id, original_ref, original_len, processed_len,
                   truncated, original_sha256, preview, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    run_id.to_string(),
                    summary.original_ref.0.as_str(),
                    summary.original_len as i64,
                    summary.processed_len as i64,
                    i64::from(summary.truncated),
                    summary.original_sha256.as_str(),
                    summary.preview.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Get the acquisition outcome of a run.
    pub async fn get_artifact_summary(&self, run_id: &RunId) -> Result<Option<ArtifactSummary>> {
        let mut rows = self
            .conn
            .query(
                "SELECT original_ref, original_len, processed_len, truncated, original_sha256, preview
                 FROM artifacts WHERE run_id = ?1",
                params![run_id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(ArtifactSummary {
                original_ref: StorageRef(row.get::<String>(0).map_err(storage_err)?),
                original_len: row.get::<i64>(1).map_err(storage_err)? as usize,
                processed_len: row.get::<i64>(2).map_err(storage_err)? as usize,
                truncated: row.get::<i64>(3).map_err(storage_err)? != 0,
                original_sha256: row.get::<String>(4).map_err(storage_err)?,
                preview: row.get::<String>(5).map_err(storage_err)?,
            })),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| BrandlensError::Storage(format!("invalid date: {e}")))
}

/// Convert a database row to a [`PipelineRun`].
fn row_to_run(row: &libsql::Row) -> Result<PipelineRun> {
    let id: String = row.get(0).map_err(storage_err)?;
    let status: String = row.get(2).map_err(storage_err)?;
    let steps_json: String = row.get(3).map_err(storage_err)?;

    Ok(PipelineRun {
        id: id
            .parse::<RunId>()
            .map_err(|e| BrandlensError::Storage(format!("invalid run id {id}: {e}")))?,
        url: row.get::<String>(1).map_err(storage_err)?,
        status: status.parse::<RunStatus>().map_err(BrandlensError::Storage)?,
        completed_steps: serde_json::from_str(&steps_json).map_err(storage_err)?,
        error_kind: row.get::<String>(4).ok(),
        error_message: row.get::<String>(5).ok(),
        created_at: parse_time(&row.get::<String>(6).map_err(storage_err)?)?,
        completed_at: row
            .get::<String>(7)
            .ok()
            .map(|s| parse_time(&s))
            .transpose()?,
    })
}
