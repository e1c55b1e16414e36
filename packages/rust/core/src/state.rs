//! Per-run shared state passed between steps.
//!
//! A [`SharedState`] is created for exactly one run and owned by the
//! controller driving it. Steps never hold it directly: each receives a
//! [`StateWriter`] stamped with the step's name, which is the only way to
//! write. Values are tagged variants, so a reader asks for a specific type
//! and gets [`BrandlensError::MissingState`] when it is absent.

use std::collections::HashMap;

use tracing::debug;

use brandlens_shared::{
    BrandProfile, BrandlensError, CompetitorAnalysis, ContentArtifact, PipelineResult, Result,
    RunId,
};

/// Keys a step may read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    ContentArtifact,
    BrandProfile,
    CompetitorAnalysis,
    PipelineResult,
}

impl StateKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContentArtifact => "content_artifact",
            Self::BrandProfile => "brand_profile",
            Self::CompetitorAnalysis => "competitor_analysis",
            Self::PipelineResult => "pipeline_result",
        }
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value stored under its matching [`StateKey`].
#[derive(Debug, Clone)]
pub enum StateValue {
    ContentArtifact(ContentArtifact),
    BrandProfile(BrandProfile),
    CompetitorAnalysis(CompetitorAnalysis),
    PipelineResult(Box<PipelineResult>),
}

impl StateValue {
    pub fn key(&self) -> StateKey {
        match self {
            Self::ContentArtifact(_) => StateKey::ContentArtifact,
            Self::BrandProfile(_) => StateKey::BrandProfile,
            Self::CompetitorAnalysis(_) => StateKey::CompetitorAnalysis,
            Self::PipelineResult(_) => StateKey::PipelineResult,
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: StateValue,
    written_by: String,
}

/// Key/value scope of a single run.
#[derive(Debug)]
pub struct SharedState {
    run_id: RunId,
    entries: HashMap<StateKey, Entry>,
}

impl SharedState {
    /// Create an empty scope for `run_id`.
    pub fn init(run_id: RunId) -> Self {
        Self {
            run_id,
            entries: HashMap::new(),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn get(&self, key: StateKey) -> Option<&StateValue> {
        self.entries.get(&key).map(|e| &e.value)
    }

    pub fn contains(&self, key: StateKey) -> bool {
        self.entries.contains_key(&key)
    }

    /// Name of the step that wrote `key`.
    pub fn written_by(&self, key: StateKey) -> Option<&str> {
        self.entries.get(&key).map(|e| e.written_by.as_str())
    }

    /// Keys from `keys` that are absent.
    pub fn missing(&self, keys: &[StateKey]) -> Vec<StateKey> {
        keys.iter().copied().filter(|k| !self.contains(*k)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write handle for the step named `step`.
    pub fn writer(&mut self, step: &str) -> StateWriter<'_> {
        StateWriter {
            state: self,
            step: step.to_string(),
        }
    }

    /// Remove and return the compiled result.
    pub fn take_result(&mut self) -> Option<PipelineResult> {
        match self.entries.remove(&StateKey::PipelineResult)?.value {
            StateValue::PipelineResult(result) => Some(*result),
            _ => None,
        }
    }

    /// Discard every value held for the run.
    pub fn clear(&mut self) {
        debug!(run_id = %self.run_id, keys = self.entries.len(), "shared state cleared");
        self.entries.clear();
    }
}

/// The active step's view of [`SharedState`]: reads anything, writes as itself.
pub struct StateWriter<'a> {
    state: &'a mut SharedState,
    step: String,
}

impl StateWriter<'_> {
    pub fn step(&self) -> &str {
        &self.step
    }

    pub fn run_id(&self) -> &RunId {
        self.state.run_id()
    }

    pub fn get(&self, key: StateKey) -> Option<&StateValue> {
        self.state.get(key)
    }

    /// Store `value` under its key, replacing any earlier value.
    pub fn set(&mut self, value: StateValue) {
        let key = value.key();
        debug!(step = %self.step, key = %key, "state written");
        self.state.entries.insert(
            key,
            Entry {
                value,
                written_by: self.step.clone(),
            },
        );
    }

    fn missing(&self, key: StateKey) -> BrandlensError {
        BrandlensError::missing_state(key.as_str(), &self.step)
    }

    pub fn require_content(&self) -> Result<&ContentArtifact> {
        match self.get(StateKey::ContentArtifact) {
            Some(StateValue::ContentArtifact(v)) => Ok(v),
            _ => Err(self.missing(StateKey::ContentArtifact)),
        }
    }

    pub fn require_brand_profile(&self) -> Result<&BrandProfile> {
        match self.get(StateKey::BrandProfile) {
            Some(StateValue::BrandProfile(v)) => Ok(v),
            _ => Err(self.missing(StateKey::BrandProfile)),
        }
    }

    pub fn require_competitor_analysis(&self) -> Result<&CompetitorAnalysis> {
        match self.get(StateKey::CompetitorAnalysis) {
            Some(StateValue::CompetitorAnalysis(v)) => Ok(v),
            _ => Err(self.missing(StateKey::CompetitorAnalysis)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brandlens_shared::{ErrorKind, StorageRef};

    fn artifact() -> ContentArtifact {
        ContentArtifact {
            original_ref: StorageRef("original-a.txt".into()),
            original_len: 5,
            original_sha256: "00".into(),
            processed: "hello".into(),
            processed_len: 5,
            truncated: false,
        }
    }

    #[test]
    fn writes_are_attributed_to_the_step() {
        let mut state = SharedState::init(RunId::new());
        state.writer("acquire_content").set(StateValue::ContentArtifact(artifact()));

        assert!(state.contains(StateKey::ContentArtifact));
        assert_eq!(state.written_by(StateKey::ContentArtifact), Some("acquire_content"));

        let reader = state.writer("analyze_brand");
        assert_eq!(reader.require_content().unwrap().processed, "hello");
    }

    #[test]
    fn absent_keys_are_missing_state() {
        let mut state = SharedState::init(RunId::new());
        let writer = state.writer("analyze_competitors");
        let err = writer.require_brand_profile().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingState);
        assert_eq!(
            err.to_string(),
            "missing state `brand_profile` required by step `analyze_competitors`"
        );
    }

    #[test]
    fn missing_lists_absent_keys() {
        let mut state = SharedState::init(RunId::new());
        state.writer("acquire_content").set(StateValue::ContentArtifact(artifact()));
        let missing = state.missing(&[StateKey::ContentArtifact, StateKey::BrandProfile]);
        assert_eq!(missing, vec![StateKey::BrandProfile]);
    }

    #[test]
    fn clear_discards_everything() {
        let mut state = SharedState::init(RunId::new());
        state.writer("acquire_content").set(StateValue::ContentArtifact(artifact()));
        state.clear();
        assert!(state.is_empty());
        assert!(state.get(StateKey::ContentArtifact).is_none());
    }

    #[test]
    fn runs_are_isolated() {
        let mut a = SharedState::init(RunId::new());
        let b = SharedState::init(RunId::new());
        a.writer("acquire_content").set(StateValue::ContentArtifact(artifact()));
        assert!(!b.contains(StateKey::ContentArtifact));
        assert_ne!(a.run_id(), b.run_id());
    }
}
