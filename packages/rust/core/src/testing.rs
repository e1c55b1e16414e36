//! In-memory doubles shared by the crate's tests.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use brandlens_models::{
    Generation, GenerationRequest, ModelProvider, ModelRouter, ProviderError, ProviderRegistry,
    RetryPolicy,
};
use brandlens_shared::{
    BRAND_PROFILE_TASK, BrandProfile, BrandlensError, COMPETITOR_ANALYSIS_TASK, ContentArtifact,
    ModelTarget, ModelTaskConfig, PipelineResult, Result, RunId, StorageRef,
};
use brandlens_source::ContentSource;
use brandlens_storage::ContentStore;

use crate::state::{SharedState, StateValue};

pub(crate) const BRAND_JSON: &str = r#"{"name":"Acme","tagline":"Rockets for everyone","summary":"Acme sells rockets and anvils.","industry":"Aerospace","targetAudience":["coyotes"],"valuePropositions":["fast delivery"],"keywords":["rockets"]}"#;

pub(crate) const COMPETITOR_JSON: &str = r#"Here you go: {"competitors":[{"name":"Ajax","website":"https://ajax.example","overlapReason":"same catalogue"}],"marketSummary":"Crowded."}"#;

// ---------------------------------------------------------------------------
// Content store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct MemoryContentStore {
    originals: Mutex<HashMap<String, String>>,
    results: Mutex<HashMap<String, PipelineResult>>,
    fail: bool,
    delay: Option<Duration>,
}

impl MemoryContentStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn load(&self, reference: &StorageRef) -> Option<String> {
        self.originals.lock().unwrap().get(&reference.0).cloned()
    }

    /// Number of persisted originals.
    pub fn len(&self) -> usize {
        self.originals.lock().unwrap().len()
    }

    pub fn result_count(&self) -> usize {
        self.results.lock().unwrap().len()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn persist_original(&self, content: &str) -> Result<StorageRef> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(BrandlensError::Storage("disk full".into()));
        }
        let reference = format!("original-{}.txt", uuid::Uuid::new_v4().simple());
        self.originals
            .lock()
            .unwrap()
            .insert(reference.clone(), content.to_string());
        Ok(StorageRef(reference))
    }

    async fn load_original(&self, reference: &StorageRef) -> Result<String> {
        self.load(reference)
            .ok_or_else(|| BrandlensError::Storage(format!("unknown reference {reference}")))
    }

    async fn save_result(&self, result: &PipelineResult) -> Result<PathBuf> {
        self.results
            .lock()
            .unwrap()
            .insert(result.id.to_string(), result.clone());
        Ok(PathBuf::from(format!("results/{}.json", result.id)))
    }

    async fn load_result(&self, run_id: &RunId) -> Result<Option<PipelineResult>> {
        Ok(self.results.lock().unwrap().get(&run_id.to_string()).cloned())
    }
}

// ---------------------------------------------------------------------------
// Content source
// ---------------------------------------------------------------------------

pub(crate) struct StaticSource {
    text: Option<String>,
}

impl StaticSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
        }
    }

    pub fn unreachable() -> Self {
        Self { text: None }
    }
}

#[async_trait]
impl ContentSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch(&self, url: &Url) -> Result<String> {
        self.text
            .clone()
            .ok_or_else(|| BrandlensError::acquisition(format!("{url}: connection refused")))
    }
}

// ---------------------------------------------------------------------------
// Model provider
// ---------------------------------------------------------------------------

/// Provider whose replies are chosen by a needle in the system prompt.
pub(crate) struct ScriptedModel {
    id: String,
    healthy: bool,
    rules: Vec<(&'static str, Option<String>)>,
    default: Option<String>,
    calls: Arc<AtomicU32>,
}

impl ScriptedModel {
    fn base() -> Self {
        Self {
            id: String::new(),
            healthy: true,
            rules: Vec::new(),
            default: None,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Answers every request with `text`.
    pub fn replying(text: &str) -> Self {
        Self {
            default: Some(text.to_string()),
            ..Self::base()
        }
    }

    /// Answers both tasks with valid output.
    pub fn analyst() -> Self {
        Self::base()
            .on("brand strategist", Some(BRAND_JSON))
            .on("market analyst", Some(COMPETITOR_JSON))
    }

    /// Fails its health check.
    pub fn down() -> Self {
        Self {
            healthy: false,
            ..Self::base()
        }
    }

    /// Healthy, but every generation errors.
    pub fn failing() -> Self {
        Self::base()
    }

    /// Reply (or fail, with `None`) when the system prompt contains `needle`.
    pub fn on(mut self, needle: &'static str, reply: Option<&str>) -> Self {
        self.rules.push((needle, reply.map(str::to_string)));
        self
    }

    /// Shared counter of generate calls.
    pub fn calls(&self) -> Arc<AtomicU32> {
        self.calls.clone()
    }

    fn named(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }
}

#[async_trait]
impl ModelProvider for ScriptedModel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn health_check(&self, _model: &str) -> std::result::Result<(), ProviderError> {
        if self.healthy {
            Ok(())
        } else {
            Err(ProviderError::Unreachable(self.id.clone()))
        }
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<Generation, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .rules
            .iter()
            .find(|(needle, _)| request.system.contains(needle))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| self.default.clone());

        match reply {
            Some(text) => Ok(Generation {
                text,
                model: request.model.clone(),
                tokens_in: None,
                tokens_out: None,
            }),
            None => Err(ProviderError::Http {
                status: 503,
                body: "overloaded".into(),
            }),
        }
    }
}

/// Router with both tasks routed `primary/primary-model` → `fallback/fallback-model`.
pub(crate) fn router_with(primary: ScriptedModel, fallback: ScriptedModel) -> ModelRouter {
    let registry = ProviderRegistry::new()
        .with(Arc::new(primary.named("primary")))
        .with(Arc::new(fallback.named("fallback")));

    let task = ModelTaskConfig {
        primary: ModelTarget {
            provider: "primary".into(),
            model: "primary-model".into(),
        },
        fallback: ModelTarget {
            provider: "fallback".into(),
            model: "fallback-model".into(),
        },
        temperature: 0.2,
        max_output_tokens: 1024,
    };
    let tasks = BTreeMap::from([
        (BRAND_PROFILE_TASK.to_string(), task.clone()),
        (COMPETITOR_ANALYSIS_TASK.to_string(), task),
    ]);

    ModelRouter::new(
        registry,
        tasks,
        RetryPolicy {
            max_attempts: 2,
            backoff: Duration::from_millis(1),
            call_timeout: Duration::from_secs(5),
            health_timeout: Duration::from_secs(5),
        },
    )
}

// ---------------------------------------------------------------------------
// State seeding
// ---------------------------------------------------------------------------

pub(crate) fn seed_content(state: &mut SharedState, text: &str) {
    state
        .writer("acquire_content")
        .set(StateValue::ContentArtifact(ContentArtifact {
            original_ref: StorageRef("original-seed.txt".into()),
            original_len: text.chars().count(),
            original_sha256: String::new(),
            processed: text.to_string(),
            processed_len: text.chars().count(),
            truncated: false,
        }));
}

pub(crate) fn seed_profile(state: &mut SharedState) {
    let profile: BrandProfile = serde_json::from_str(BRAND_JSON).unwrap();
    state
        .writer("analyze_brand")
        .set(StateValue::BrandProfile(profile));
}
