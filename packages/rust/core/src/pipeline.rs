//! End-to-end run: URL → acquire → brand profile → competitors → result.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{error, info, instrument, warn};
use url::Url;

use brandlens_models::ModelRouter;
use brandlens_shared::{
    ArtifactSummary, BrandlensError, ContentConfig, PipelineResult, PipelineRun, Result, RunId,
    RunStatus, StepRecord,
};
use brandlens_source::ContentSource;
use brandlens_storage::{ContentStore, Storage};

use crate::content::ContentPreservationPolicy;
use crate::executor::{Step, StepContext, StepExecutor, StepOutput};
use crate::state::SharedState;
use crate::steps::{AcquireContent, AnalyzeBrand, AnalyzeCompetitors, CompileResult};

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called once the run has an identifier.
    fn run_started(&self, run_id: &RunId, url: &str);
    /// Called when a step begins.
    fn step_started(&self, name: &str, index: usize, total: usize);
    /// Called when a step succeeds.
    fn step_finished(&self, name: &str, output: &StepOutput);
    /// Called when a step fails or cannot start.
    fn step_failed(&self, name: &str, error: &BrandlensError);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn run_started(&self, _run_id: &RunId, _url: &str) {}
    fn step_started(&self, _name: &str, _index: usize, _total: usize) {}
    fn step_finished(&self, _name: &str, _output: &StepOutput) {}
    fn step_failed(&self, _name: &str, _error: &BrandlensError) {}
}

/// Everything known about a finished run.
pub struct RunReport {
    pub run: PipelineRun,
    pub steps: Vec<StepRecord>,
    /// The result, or the first error that terminated the run.
    pub outcome: Result<PipelineResult>,
}

/// Drives the fixed step sequence for one URL at a time per call.
///
/// Steps run strictly in order. Before a step starts, the state keys it
/// requires must exist; after it succeeds, the keys it produces must exist.
/// Either check failing ends the run with [`BrandlensError::MissingState`].
/// The first failure ends the run and no result is returned.
pub struct PipelineController {
    steps: Vec<Arc<dyn Step>>,
    executor: StepExecutor,
    ledger: Option<Arc<Storage>>,
}

impl PipelineController {
    /// The standard four-step pipeline.
    pub fn new(
        source: Arc<dyn ContentSource>,
        router: Arc<ModelRouter>,
        store: Arc<dyn ContentStore>,
        content: &ContentConfig,
        ledger: Option<Arc<Storage>>,
    ) -> Self {
        let policy = ContentPreservationPolicy::new(store.clone(), content);
        let steps: Vec<Arc<dyn Step>> = vec![
            Arc::new(AcquireContent::new(source, policy)),
            Arc::new(AnalyzeBrand::new(router.clone())),
            Arc::new(AnalyzeCompetitors::new(router)),
            Arc::new(CompileResult::new(store)),
        ];
        Self::with_steps(steps, ledger)
    }

    /// A controller over an explicit step sequence.
    pub fn with_steps(steps: Vec<Arc<dyn Step>>, ledger: Option<Arc<Storage>>) -> Self {
        Self {
            steps,
            executor: StepExecutor::new(ledger.clone()),
            ledger,
        }
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run the pipeline for `url` and return the compiled result.
    pub async fn run(&self, url: &str, progress: &dyn ProgressReporter) -> Result<PipelineResult> {
        self.run_with_report(url, progress).await?.outcome
    }

    /// Run the pipeline and return the run's full record.
    ///
    /// An invalid URL is rejected before any run state exists, so it is the
    /// only error returned directly; every other failure is in `outcome`.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn run_with_report(
        &self,
        url: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<RunReport> {
        let target = validate_url(url)?;
        let start = Instant::now();

        let mut run = PipelineRun::new(target.as_str());
        self.ledger_insert(&run).await;
        run.status = RunStatus::Running;
        self.ledger_update(&run).await;

        info!(run_id = %run.id, url = %run.url, "starting run");
        progress.run_started(&run.id, &run.url);

        let mut state = SharedState::init(run.id.clone());
        let mut records = Vec::with_capacity(self.steps.len());
        let outcome = self
            .drive(&mut run, &target, &mut state, &mut records, progress)
            .await;
        state.clear();

        run.completed_at = Some(Utc::now());
        match &outcome {
            Ok(_) => run.status = RunStatus::Succeeded,
            Err(e) => {
                run.status = RunStatus::Failed;
                run.error_kind = Some(e.kind().to_string());
                run.error_message = Some(e.to_string());
            }
        }
        self.ledger_update(&run).await;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &outcome {
            Ok(_) => info!(
                run_id = %run.id,
                status = %run.status,
                steps = run.completed_steps.len(),
                elapsed_ms,
                "run finished"
            ),
            Err(e) => error!(
                run_id = %run.id,
                status = %run.status,
                kind = %e.kind(),
                error = %e,
                elapsed_ms,
                "run failed"
            ),
        }

        Ok(RunReport {
            run,
            steps: records,
            outcome,
        })
    }

    async fn drive(
        &self,
        run: &mut PipelineRun,
        url: &Url,
        state: &mut SharedState,
        records: &mut Vec<StepRecord>,
        progress: &dyn ProgressReporter,
    ) -> Result<PipelineResult> {
        let run_id = run.id.clone();
        let total = self.steps.len();

        for (index, step) in self.steps.iter().enumerate() {
            let name = step.name();

            if let Some(key) = state.missing(step.requires()).first() {
                let err = BrandlensError::missing_state(key.as_str(), name);
                progress.step_failed(name, &err);
                return Err(err);
            }

            progress.step_started(name, index + 1, total);
            let ctx = StepContext {
                run_id: &run_id,
                url,
            };
            let execution = self.executor.execute(step.as_ref(), ctx, state).await;
            records.push(execution.record);

            let output = match execution.outcome {
                Ok(output) => output,
                Err(e) => {
                    progress.step_failed(name, &e);
                    return Err(e);
                }
            };

            if let Some(key) = state.missing(step.produces()).first() {
                let err = BrandlensError::missing_state(key.as_str(), name);
                progress.step_failed(name, &err);
                return Err(err);
            }

            if let StepOutput::Acquired(summary) = &output {
                self.ledger_artifact(&run_id, summary).await;
            }

            run.completed_steps.push(name.to_string());
            self.ledger_update(run).await;
            progress.step_finished(name, &output);
        }

        state.take_result().ok_or_else(|| {
            BrandlensError::missing_state("pipeline_result", self.steps.last().map_or("", |s| s.name()))
        })
    }

    /// Acquisition outcome of `run_id`, from the ledger.
    pub async fn artifact_summary(&self, run_id: &RunId) -> Result<ArtifactSummary> {
        let ledger = self
            .ledger
            .as_ref()
            .ok_or_else(|| BrandlensError::config("no run ledger attached"))?;
        get_artifact_summary(ledger, run_id).await
    }

    // Ledger writes are diagnostic: failures are logged, never propagated.

    async fn ledger_insert(&self, run: &PipelineRun) {
        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.insert_run(run).await {
                warn!(run_id = %run.id, error = %e, "failed to record run");
            }
        }
    }

    async fn ledger_update(&self, run: &PipelineRun) {
        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.update_run(run).await {
                warn!(run_id = %run.id, error = %e, "failed to update run");
            }
        }
    }

    async fn ledger_artifact(&self, run_id: &RunId, summary: &ArtifactSummary) {
        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.insert_artifact_summary(run_id, summary).await {
                warn!(%run_id, error = %e, "failed to record artifact summary");
            }
        }
    }
}

/// Read-only introspection into a run's acquisition outcome.
pub async fn get_artifact_summary(ledger: &Storage, run_id: &RunId) -> Result<ArtifactSummary> {
    ledger.get_artifact_summary(run_id).await?.ok_or_else(|| {
        BrandlensError::validation(format!("no content artifact recorded for run {run_id}"))
    })
}

/// Accept only absolute http(s) URLs with a host.
pub fn validate_url(input: &str) -> Result<Url> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(BrandlensError::validation("URL is required"));
    }

    let url = Url::parse(trimmed)
        .map_err(|e| BrandlensError::validation(format!("invalid URL `{trimmed}`: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(BrandlensError::validation(format!(
            "unsupported URL scheme `{}` (expected http or https)",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(BrandlensError::validation(format!("URL `{trimmed}` has no host")));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    use brandlens_shared::{ErrorKind, StepStatus};

    use crate::state::{StateKey, StateWriter};
    use crate::steps::{ACQUIRE_CONTENT, ANALYZE_BRAND, ANALYZE_COMPETITORS, COMPILE_RESULT};
    use crate::testing::{MemoryContentStore, ScriptedModel, StaticSource, router_with};

    const URL: &str = "https://acme.example/";

    struct Harness {
        controller: PipelineController,
        store: Arc<MemoryContentStore>,
        ledger: Arc<Storage>,
    }

    async fn open_ledger() -> Arc<Storage> {
        let path = std::env::temp_dir().join(format!("bl_pipeline_{}.db", uuid::Uuid::now_v7()));
        Arc::new(Storage::open(&path).await.unwrap())
    }

    async fn harness(source: StaticSource, primary: ScriptedModel, fallback: ScriptedModel) -> Harness {
        let store = Arc::new(MemoryContentStore::default());
        let ledger = open_ledger().await;
        let controller = PipelineController::new(
            Arc::new(source),
            Arc::new(router_with(primary, fallback)),
            store.clone(),
            &ContentConfig::default(),
            Some(ledger.clone()),
        );
        Harness {
            controller,
            store,
            ledger,
        }
    }

    /// Records progress callbacks in order.
    #[derive(Default)]
    struct RecordingProgress {
        events: Mutex<Vec<String>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn run_started(&self, _run_id: &RunId, url: &str) {
            self.events.lock().unwrap().push(format!("run:{url}"));
        }
        fn step_started(&self, name: &str, index: usize, total: usize) {
            self.events.lock().unwrap().push(format!("start:{name}:{index}/{total}"));
        }
        fn step_finished(&self, name: &str, _output: &StepOutput) {
            self.events.lock().unwrap().push(format!("done:{name}"));
        }
        fn step_failed(&self, name: &str, error: &BrandlensError) {
            self.events.lock().unwrap().push(format!("fail:{name}:{}", error.kind()));
        }
    }

    #[tokio::test]
    async fn successful_run_produces_result() {
        let h = harness(
            StaticSource::new("Acme sells rockets."),
            ScriptedModel::analyst(),
            ScriptedModel::down(),
        )
        .await;
        let progress = RecordingProgress::default();

        let report = h.controller.run_with_report(URL, &progress).await.unwrap();
        let result = report.outcome.expect("result");

        assert_eq!(result.id, report.run.id);
        assert_eq!(result.url, URL);
        assert_eq!(result.brand_profile.name, "Acme");
        assert_eq!(result.competitor_analysis.competitors[0].name, "Ajax");
        assert_eq!(result.content.content, "Acme sells rockets.");
        assert!(!result.content.truncated);

        assert_eq!(report.run.status, RunStatus::Succeeded);
        assert_eq!(
            report.run.completed_steps,
            vec![ACQUIRE_CONTENT, ANALYZE_BRAND, ANALYZE_COMPETITORS, COMPILE_RESULT]
        );
        assert!(report.steps.iter().all(|s| s.status == StepStatus::Succeeded));
        assert_eq!(report.steps[1].served_by.as_deref(), Some("primary/primary-model"));
        assert_eq!(h.store.result_count(), 1);

        let stored = h.ledger.get_run(&report.run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Succeeded);
        assert_eq!(stored.completed_steps.len(), 4);
        assert_eq!(h.ledger.list_steps(&report.run.id).await.unwrap().len(), 4);

        let events = progress.events.lock().unwrap();
        assert_eq!(events[0], format!("run:{URL}"));
        assert_eq!(events[1], "start:acquire_content:1/4");
        assert_eq!(events.last().unwrap(), "done:compile_result");
    }

    #[tokio::test]
    async fn fallback_serves_when_primary_is_unhealthy() {
        let h = harness(
            StaticSource::new("Acme sells rockets."),
            ScriptedModel::down(),
            ScriptedModel::analyst(),
        )
        .await;

        let report = h.controller.run_with_report(URL, &SilentProgress).await.unwrap();
        assert!(report.outcome.is_ok());
        assert_eq!(report.steps[1].served_by.as_deref(), Some("fallback/fallback-model"));
        assert_eq!(report.steps[2].served_by.as_deref(), Some("fallback/fallback-model"));
    }

    #[tokio::test]
    async fn scenario_c_model_unavailable_keeps_original() {
        let h = harness(
            StaticSource::new("Acme sells rockets."),
            ScriptedModel::down(),
            ScriptedModel::failing(),
        )
        .await;

        let report = h.controller.run_with_report(URL, &SilentProgress).await.unwrap();
        let err = report.outcome.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ModelUnavailable);
        assert_eq!(report.run.status, RunStatus::Failed);
        assert_eq!(report.run.error_kind.as_deref(), Some("model_unavailable"));
        assert_eq!(report.run.completed_steps, vec![ACQUIRE_CONTENT]);
        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.steps[1].status, StepStatus::Failed);
        assert_eq!(h.store.result_count(), 0);

        // The original survives the failed run.
        let summary = h.controller.artifact_summary(&report.run.id).await.unwrap();
        assert_eq!(
            h.store.load(&summary.original_ref).as_deref(),
            Some("Acme sells rockets.")
        );

        let stored = h.ledger.get_run(&report.run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert_eq!(stored.error_kind.as_deref(), Some("model_unavailable"));
    }

    #[tokio::test]
    async fn run_returns_the_error_directly() {
        let h = harness(
            StaticSource::new("Acme sells rockets."),
            ScriptedModel::down(),
            ScriptedModel::down(),
        )
        .await;
        let err = h.controller.run(URL, &SilentProgress).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModelUnavailable);
    }

    #[tokio::test]
    async fn no_result_when_second_model_step_fails() {
        let brand_only =
            ScriptedModel::failing().on("brand strategist", Some(crate::testing::BRAND_JSON));

        let h = harness(
            StaticSource::new("Acme sells rockets."),
            brand_only,
            ScriptedModel::failing(),
        )
        .await;

        let report = h.controller.run_with_report(URL, &SilentProgress).await.unwrap();
        assert_eq!(report.outcome.unwrap_err().kind(), ErrorKind::ModelUnavailable);
        assert_eq!(report.run.completed_steps, vec![ACQUIRE_CONTENT, ANALYZE_BRAND]);
        assert_eq!(h.store.result_count(), 0);
    }

    #[tokio::test]
    async fn malformed_model_output_fails_the_run() {
        let h = harness(
            StaticSource::new("Acme sells rockets."),
            ScriptedModel::replying("Sorry, I can't do that."),
            ScriptedModel::down(),
        )
        .await;

        let report = h.controller.run_with_report(URL, &SilentProgress).await.unwrap();
        assert_eq!(
            report.outcome.unwrap_err().kind(),
            ErrorKind::MalformedModelOutput
        );
        assert_eq!(report.run.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn acquisition_failure_fails_first_step() {
        let h = harness(
            StaticSource::unreachable(),
            ScriptedModel::analyst(),
            ScriptedModel::analyst(),
        )
        .await;

        let report = h.controller.run_with_report(URL, &SilentProgress).await.unwrap();
        assert_eq!(report.outcome.unwrap_err().kind(), ErrorKind::AcquisitionError);
        assert!(report.run.completed_steps.is_empty());
        assert_eq!(h.store.len(), 0);
        assert!(h.controller.artifact_summary(&report.run.id).await.is_err());
    }

    #[tokio::test]
    async fn invalid_urls_are_rejected_before_a_run_exists() {
        let h = harness(
            StaticSource::new("x"),
            ScriptedModel::analyst(),
            ScriptedModel::analyst(),
        )
        .await;

        for bad in ["", "   ", "not a url", "ftp://acme.example/", "file:///etc/hosts"] {
            let err = h.controller.run_with_report(bad, &SilentProgress).await.err();
            assert_eq!(
                err.map(|e| e.kind()),
                Some(ErrorKind::ValidationError),
                "{bad:?} accepted"
            );
        }
        assert!(h.ledger.list_runs(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scenario_d_out_of_order_step_never_runs() {
        let store = Arc::new(MemoryContentStore::default());
        let competitor_model = ScriptedModel::analyst();
        let calls = competitor_model.calls();
        let router = Arc::new(router_with(competitor_model, ScriptedModel::analyst()));
        let policy = ContentPreservationPolicy::new(store.clone(), &ContentConfig::default());
        let ledger = open_ledger().await;

        // competitors before brand profile
        let steps: Vec<Arc<dyn Step>> = vec![
            Arc::new(AcquireContent::new(Arc::new(StaticSource::new("Acme")), policy)),
            Arc::new(AnalyzeCompetitors::new(router.clone())),
            Arc::new(AnalyzeBrand::new(router)),
            Arc::new(CompileResult::new(store.clone())),
        ];
        let controller = PipelineController::with_steps(steps, Some(ledger.clone()));
        let progress = RecordingProgress::default();

        let report = controller.run_with_report(URL, &progress).await.unwrap();
        let err = report.outcome.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MissingState);
        assert!(err.to_string().contains("`brand_profile`"));
        assert!(err.to_string().contains("`analyze_competitors`"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.run.status, RunStatus::Failed);
        assert_eq!(report.run.error_kind.as_deref(), Some("missing_state"));
        assert_eq!(ledger.list_steps(&report.run.id).await.unwrap().len(), 1);
        assert!(
            progress
                .events
                .lock()
                .unwrap()
                .contains(&"fail:analyze_competitors:missing_state".to_string())
        );
    }

    /// Succeeds without writing what it promised.
    struct ForgetfulStep;

    #[async_trait::async_trait]
    impl Step for ForgetfulStep {
        fn name(&self) -> &'static str {
            "analyze_brand"
        }

        fn produces(&self) -> &'static [StateKey] {
            &[StateKey::BrandProfile]
        }

        async fn run(&self, _ctx: StepContext<'_>, _state: &mut StateWriter<'_>) -> Result<StepOutput> {
            Ok(StepOutput::Analyzed {
                task: "brand_profile".into(),
                preview: String::new(),
                served_by: "nobody/none".into(),
            })
        }
    }

    #[tokio::test]
    async fn missing_produced_key_fails_fast() {
        let steps: Vec<Arc<dyn Step>> = vec![Arc::new(ForgetfulStep)];
        let controller = PipelineController::with_steps(steps, None);
        let report = controller.run_with_report(URL, &SilentProgress).await.unwrap();

        let err = report.outcome.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingState);
        assert_eq!(report.run.status, RunStatus::Failed);
        // the step itself succeeded; the controller's post-check failed the run
        assert_eq!(report.steps[0].status, StepStatus::Succeeded);
        assert!(report.run.completed_steps.is_empty());
    }

    #[tokio::test]
    async fn concurrent_runs_are_isolated() {
        let h = harness(
            StaticSource::new("Acme sells rockets."),
            ScriptedModel::analyst(),
            ScriptedModel::down(),
        )
        .await;

        let (a, b) = tokio::join!(
            h.controller.run_with_report("https://a.example/", &SilentProgress),
            h.controller.run_with_report("https://b.example/", &SilentProgress),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        let (ra, rb) = (a.outcome.unwrap(), b.outcome.unwrap());

        assert_ne!(ra.id, rb.id);
        assert_eq!(ra.url, "https://a.example/");
        assert_eq!(rb.url, "https://b.example/");
        assert_eq!(h.ledger.list_runs(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn truncated_content_flows_into_result() {
        let store = Arc::new(MemoryContentStore::default());
        let mut content = ContentConfig::default();
        content.max_input_tokens = 10;
        content.safety_margin = 1.0;
        content.chars_per_token = 1;

        let controller = PipelineController::new(
            Arc::new(StaticSource::new("0123456789ABCDEFGHIJ")),
            Arc::new(router_with(ScriptedModel::analyst(), ScriptedModel::down())),
            store.clone(),
            &content,
            None,
        );

        let result = controller.run(URL, &SilentProgress).await.unwrap();
        assert_eq!(result.content.content, "0123456789");
        assert_eq!(result.content.length, 10);
        assert_eq!(result.content.original_length, 20);
        assert!(result.content.truncated);
        assert_eq!(
            store.load(&result.content.original_ref).as_deref(),
            Some("0123456789ABCDEFGHIJ")
        );
    }

    #[test]
    fn url_validation() {
        assert!(validate_url("https://acme.example").is_ok());
        assert!(validate_url("  http://acme.example/about  ").is_ok());
        assert!(validate_url("mailto:hello@acme.example").is_err());
        assert!(validate_url("acme.example").is_err());
    }

    #[test]
    fn standard_step_order() {
        let controller = PipelineController::new(
            Arc::new(StaticSource::new("x")),
            Arc::new(router_with(ScriptedModel::analyst(), ScriptedModel::analyst())),
            Arc::new(MemoryContentStore::default()),
            &ContentConfig::default(),
            None,
        );
        assert_eq!(
            controller.step_names(),
            vec![ACQUIRE_CONTENT, ANALYZE_BRAND, ANALYZE_COMPETITORS, COMPILE_RESULT]
        );
    }
}
