//! Execution of a single named step with status tracking.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, instrument, warn};
use url::Url;

use brandlens_shared::{ArtifactSummary, Result, RunId, StepRecord, StepStatus};
use brandlens_storage::Storage;

use crate::state::{SharedState, StateKey, StateWriter};

/// Read-only inputs available to every step.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub run_id: &'a RunId,
    pub url: &'a Url,
}

/// What a step hands back to its caller. Large payloads go to shared state.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutput {
    /// Acquisition finished; the artifact itself is in shared state.
    Acquired(ArtifactSummary),
    /// A model-backed step finished.
    Analyzed {
        task: String,
        preview: String,
        served_by: String,
    },
    /// The result was assembled and written.
    Compiled { result_path: PathBuf },
}

impl StepOutput {
    pub fn served_by(&self) -> Option<&str> {
        match self {
            Self::Analyzed { served_by, .. } => Some(served_by),
            _ => None,
        }
    }
}

/// One named unit of pipeline work.
#[async_trait]
pub trait Step: Send + Sync {
    /// Name, unique within a run.
    fn name(&self) -> &'static str;

    /// Keys that must be present before the step may run.
    fn requires(&self) -> &'static [StateKey] {
        &[]
    }

    /// Keys the step must have written when it succeeds.
    fn produces(&self) -> &'static [StateKey];

    async fn run(&self, ctx: StepContext<'_>, state: &mut StateWriter<'_>) -> Result<StepOutput>;
}

/// A finished step: its record and its outcome.
pub struct StepExecution {
    pub record: StepRecord,
    pub outcome: Result<StepOutput>,
}

/// Runs steps and keeps their [`StepRecord`]s.
///
/// Each step moves `Pending → Running → {Succeeded | Failed}` exactly once.
/// Records are mirrored to the run ledger when one is attached; ledger
/// failures are logged and never change the step's outcome.
#[derive(Clone, Default)]
pub struct StepExecutor {
    ledger: Option<Arc<Storage>>,
}

impl StepExecutor {
    pub fn new(ledger: Option<Arc<Storage>>) -> Self {
        Self { ledger }
    }

    #[instrument(skip_all, fields(run_id = %ctx.run_id, step = step.name()))]
    pub async fn execute(
        &self,
        step: &dyn Step,
        ctx: StepContext<'_>,
        state: &mut SharedState,
    ) -> StepExecution {
        let name = step.name();
        let start = Instant::now();
        let mut record = StepRecord {
            name: name.to_string(),
            status: StepStatus::Pending,
            started_at: Utc::now(),
            finished_at: None,
            error_kind: None,
            error_message: None,
            served_by: None,
        };

        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.insert_step(ctx.run_id, &record).await {
                warn!(error = %e, "failed to record pending step");
            }
        }

        record.status = StepStatus::Running;
        record.started_at = Utc::now();
        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.start_step(ctx.run_id, &record).await {
                warn!(error = %e, "failed to record step start");
            }
        }
        info!(step = name, "step started");

        let outcome = {
            let mut writer = state.writer(name);
            step.run(ctx, &mut writer).await
        };

        record.finished_at = Some(Utc::now());
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &outcome {
            Ok(output) => {
                record.status = StepStatus::Succeeded;
                record.served_by = output.served_by().map(str::to_string);
                info!(step = name, status = %record.status, elapsed_ms, "step finished");
            }
            Err(e) => {
                record.status = StepStatus::Failed;
                record.error_kind = Some(e.kind().to_string());
                record.error_message = Some(e.to_string());
                error!(step = name, kind = %e.kind(), error = %e, elapsed_ms, "step failed");
            }
        }

        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.finalize_step(ctx.run_id, &record).await {
                warn!(error = %e, "failed to record step outcome");
            }
        }

        StepExecution { record, outcome }
    }
}
