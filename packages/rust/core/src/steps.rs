//! The four steps of a Brandlens run.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use brandlens_models::{ModelRouter, parse_structured};
use brandlens_shared::{
    BRAND_PROFILE_TASK, BrandProfile, BrandlensError, COMPETITOR_ANALYSIS_TASK,
    CompetitorAnalysis, PipelineResult, ProcessedContent, Result,
};
use brandlens_source::ContentSource;
use brandlens_storage::ContentStore;

use crate::content::{ContentPreservationPolicy, preview};
use crate::executor::{Step, StepContext, StepOutput};
use crate::prompts;
use crate::state::{StateKey, StateValue, StateWriter};

pub const ACQUIRE_CONTENT: &str = "acquire_content";
pub const ANALYZE_BRAND: &str = "analyze_brand";
pub const ANALYZE_COMPETITORS: &str = "analyze_competitors";
pub const COMPILE_RESULT: &str = "compile_result";

/// Length of the preview returned by model-backed steps.
const ANALYSIS_PREVIEW_CHARS: usize = 200;

// ---------------------------------------------------------------------------
// Acquisition
// ---------------------------------------------------------------------------

/// Fetches the page and produces the dual-tier content artifact.
pub struct AcquireContent {
    source: Arc<dyn ContentSource>,
    policy: ContentPreservationPolicy,
}

impl AcquireContent {
    pub fn new(source: Arc<dyn ContentSource>, policy: ContentPreservationPolicy) -> Self {
        Self { source, policy }
    }
}

#[async_trait]
impl Step for AcquireContent {
    fn name(&self) -> &'static str {
        ACQUIRE_CONTENT
    }

    fn produces(&self) -> &'static [StateKey] {
        &[StateKey::ContentArtifact]
    }

    async fn run(&self, ctx: StepContext<'_>, state: &mut StateWriter<'_>) -> Result<StepOutput> {
        let raw = self.source.fetch(ctx.url).await?;
        let artifact = self.policy.preserve(&raw).await?;
        let summary = self.policy.summarize(&artifact);

        info!(
            source = self.source.name(),
            original_ref = %artifact.original_ref,
            original_len = artifact.original_len,
            processed_len = artifact.processed_len,
            truncated = artifact.truncated,
            "content acquired"
        );

        state.set(StateValue::ContentArtifact(artifact));
        Ok(StepOutput::Acquired(summary))
    }
}

// ---------------------------------------------------------------------------
// Model-backed steps
// ---------------------------------------------------------------------------

/// First transformation: processed content → [`BrandProfile`].
pub struct AnalyzeBrand {
    router: Arc<ModelRouter>,
}

impl AnalyzeBrand {
    pub fn new(router: Arc<ModelRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl Step for AnalyzeBrand {
    fn name(&self) -> &'static str {
        ANALYZE_BRAND
    }

    fn requires(&self) -> &'static [StateKey] {
        &[StateKey::ContentArtifact]
    }

    fn produces(&self) -> &'static [StateKey] {
        &[StateKey::BrandProfile]
    }

    async fn run(&self, ctx: StepContext<'_>, state: &mut StateWriter<'_>) -> Result<StepOutput> {
        let content = state.require_content()?;
        let prompt = prompts::brand_profile(ctx.url.as_str(), &content.processed);

        let routed = self.router.generate(BRAND_PROFILE_TASK, &prompt).await?;
        let profile: BrandProfile = parse_structured(BRAND_PROFILE_TASK, &routed.value.text)?;
        if profile.name.trim().is_empty() {
            return Err(BrandlensError::malformed_output(
                BRAND_PROFILE_TASK,
                "brand profile has an empty `name`",
            ));
        }

        let output = StepOutput::Analyzed {
            task: BRAND_PROFILE_TASK.to_string(),
            preview: preview(&profile.summary, ANALYSIS_PREVIEW_CHARS),
            served_by: routed.decision.served_by(),
        };
        state.set(StateValue::BrandProfile(profile));
        Ok(output)
    }
}

/// Second transformation: brand profile + content → [`CompetitorAnalysis`].
pub struct AnalyzeCompetitors {
    router: Arc<ModelRouter>,
}

impl AnalyzeCompetitors {
    pub fn new(router: Arc<ModelRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl Step for AnalyzeCompetitors {
    fn name(&self) -> &'static str {
        ANALYZE_COMPETITORS
    }

    fn requires(&self) -> &'static [StateKey] {
        &[StateKey::ContentArtifact, StateKey::BrandProfile]
    }

    fn produces(&self) -> &'static [StateKey] {
        &[StateKey::CompetitorAnalysis]
    }

    async fn run(&self, ctx: StepContext<'_>, state: &mut StateWriter<'_>) -> Result<StepOutput> {
        let profile = state.require_brand_profile()?;
        let content = state.require_content()?;
        let prompt = prompts::competitor_analysis(ctx.url.as_str(), profile, &content.processed);

        let routed = self.router.generate(COMPETITOR_ANALYSIS_TASK, &prompt).await?;
        let analysis: CompetitorAnalysis =
            parse_structured(COMPETITOR_ANALYSIS_TASK, &routed.value.text)?;

        let names: Vec<&str> = analysis.competitors.iter().map(|c| c.name.as_str()).collect();
        let output = StepOutput::Analyzed {
            task: COMPETITOR_ANALYSIS_TASK.to_string(),
            preview: preview(&names.join(", "), ANALYSIS_PREVIEW_CHARS),
            served_by: routed.decision.served_by(),
        };
        state.set(StateValue::CompetitorAnalysis(analysis));
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Assembles the [`PipelineResult`] from shared state and writes it out.
pub struct CompileResult {
    store: Arc<dyn ContentStore>,
}

impl CompileResult {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Step for CompileResult {
    fn name(&self) -> &'static str {
        COMPILE_RESULT
    }

    fn requires(&self) -> &'static [StateKey] {
        &[
            StateKey::ContentArtifact,
            StateKey::BrandProfile,
            StateKey::CompetitorAnalysis,
        ]
    }

    fn produces(&self) -> &'static [StateKey] {
        &[StateKey::PipelineResult]
    }

    async fn run(&self, ctx: StepContext<'_>, state: &mut StateWriter<'_>) -> Result<StepOutput> {
        let result = PipelineResult {
            id: ctx.run_id.clone(),
            url: ctx.url.to_string(),
            brand_profile: state.require_brand_profile()?.clone(),
            competitor_analysis: state.require_competitor_analysis()?.clone(),
            content: ProcessedContent::from(state.require_content()?),
            created_at: Utc::now(),
        };

        let result_path = self.store.save_result(&result).await?;
        info!(path = %result_path.display(), "result written");

        state.set(StateValue::PipelineResult(Box::new(result)));
        Ok(StepOutput::Compiled { result_path })
    }
}
