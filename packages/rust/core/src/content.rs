//! Dual-tier content handling: the unbounded original and the budgeted copy.
//!
//! The original is written to the [`ContentStore`] before anything is cut.
//! The processed copy is the leading prefix of the original, at most `budget`
//! characters long. Everything past the budget is dropped.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{info, instrument};

use brandlens_shared::{ArtifactSummary, BrandlensError, ContentArtifact, ContentConfig, Result};
use brandlens_storage::ContentStore;

/// Enforces the original/processed size contract for acquired text.
#[derive(Clone)]
pub struct ContentPreservationPolicy {
    store: Arc<dyn ContentStore>,
    budget: usize,
    preview_chars: usize,
    persist_timeout: Duration,
}

impl ContentPreservationPolicy {
    pub fn new(store: Arc<dyn ContentStore>, config: &ContentConfig) -> Self {
        Self {
            store,
            budget: config.char_budget(),
            preview_chars: config.preview_chars,
            persist_timeout: config.persist_timeout(),
        }
    }

    /// Override the character budget.
    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = budget;
        self
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Persist `raw` and derive the processed copy.
    ///
    /// Fails with [`BrandlensError::Acquisition`] when the original cannot be
    /// written within the persist timeout; no processed copy exists then.
    #[instrument(skip_all, fields(budget = self.budget))]
    pub async fn preserve(&self, raw: &str) -> Result<ContentArtifact> {
        let original_ref = tokio::time::timeout(self.persist_timeout, self.store.persist_original(raw))
            .await
            .map_err(|_| {
                BrandlensError::acquisition(format!(
                    "persisting original content timed out after {:?}",
                    self.persist_timeout
                ))
            })?
            .map_err(|e| BrandlensError::acquisition(format!("persisting original content failed: {e}")))?;

        let original_len = raw.chars().count();
        let (processed, truncated) = truncate_to_budget(raw, self.budget);
        let processed_len = if truncated { self.budget } else { original_len };

        if truncated {
            info!(
                original_len,
                processed_len,
                budget = self.budget,
                "content truncated to budget"
            );
        }

        Ok(ContentArtifact {
            original_ref,
            original_len,
            original_sha256: sha256_hex(raw),
            processed: processed.to_string(),
            processed_len,
            truncated,
        })
    }

    /// The bounded view of `artifact` that may leave the acquisition step.
    pub fn summarize(&self, artifact: &ContentArtifact) -> ArtifactSummary {
        ArtifactSummary {
            original_len: artifact.original_len,
            processed_len: artifact.processed_len,
            truncated: artifact.truncated,
            preview: preview(&artifact.processed, self.preview_chars),
            original_ref: artifact.original_ref.clone(),
            original_sha256: artifact.original_sha256.clone(),
        }
    }
}

/// Leading prefix of `text` holding at most `budget` characters.
///
/// Returns the prefix and whether anything was cut.
pub fn truncate_to_budget(text: &str, budget: usize) -> (&str, bool) {
    match text.char_indices().nth(budget) {
        Some((cut, _)) => (&text[..cut], true),
        None => (text, false),
    }
}

/// First `max_chars` characters of `text`, with whitespace runs collapsed.
pub fn preview(text: &str, max_chars: usize) -> String {
    let head: String = text.chars().take(max_chars.saturating_mul(2)).collect();
    head.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(max_chars)
        .collect()
}

fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryContentStore;

    const BUDGET: usize = 3_800_000;

    fn policy(store: Arc<MemoryContentStore>) -> ContentPreservationPolicy {
        ContentPreservationPolicy::new(store, &ContentConfig::default())
    }

    #[test]
    fn prefix_is_kept() {
        assert_eq!(truncate_to_budget("abcdef", 3), ("abc", true));
        assert_eq!(truncate_to_budget("abc", 3), ("abc", false));
        assert_eq!(truncate_to_budget("ab", 3), ("ab", false));
        assert_eq!(truncate_to_budget("", 0), ("", false));
        assert_eq!(truncate_to_budget("a", 0), ("", true));
    }

    #[test]
    fn budget_counts_characters_not_bytes() {
        let (kept, cut) = truncate_to_budget("héllo wörld", 5);
        assert_eq!(kept, "héllo");
        assert!(cut);
        assert_eq!(kept.chars().count(), 5);
    }

    #[test]
    fn preview_is_bounded() {
        assert_eq!(preview("Acme\n\n  Rockets  for all", 12), "Acme Rockets");
        assert_eq!(preview(&"x".repeat(500), 200).len(), 200);
    }

    #[tokio::test]
    async fn scenario_a_small_input_is_untouched() {
        let store = Arc::new(MemoryContentStore::default());
        let policy = policy(store.clone());
        assert_eq!(policy.budget(), BUDGET);

        let text = "a".repeat(39_000);
        let artifact = policy.preserve(&text).await.unwrap();

        assert!(!artifact.truncated);
        assert_eq!(artifact.processed_len, 39_000);
        assert_eq!(artifact.original_len, 39_000);
        assert_eq!(artifact.processed, text);
        assert_eq!(store.load(&artifact.original_ref).unwrap(), text);
    }

    #[tokio::test]
    async fn scenario_b_large_input_keeps_prefix_and_original() {
        let store = Arc::new(MemoryContentStore::default());
        let policy = policy(store.clone());

        let mut text = "h".repeat(BUDGET);
        text.push_str(&"t".repeat(4_000_000 - BUDGET));
        let artifact = policy.preserve(&text).await.unwrap();

        assert!(artifact.truncated);
        assert_eq!(artifact.processed_len, 3_800_000);
        assert_eq!(artifact.processed.chars().count(), 3_800_000);
        assert_eq!(artifact.original_len, 4_000_000);
        assert!(artifact.processed.chars().all(|c| c == 'h'));

        let original = store.load(&artifact.original_ref).unwrap();
        assert_eq!(original.len(), 4_000_000);
        assert_eq!(original, text);
    }

    #[tokio::test]
    async fn exact_budget_is_not_truncated() {
        let store = Arc::new(MemoryContentStore::default());
        let policy = policy(store).with_budget(10);
        let artifact = policy.preserve("0123456789").await.unwrap();
        assert!(!artifact.truncated);
        assert_eq!(artifact.processed_len, 10);
    }

    #[tokio::test]
    async fn persistence_failure_is_fatal() {
        let store = Arc::new(MemoryContentStore::failing());
        let err = policy(store).preserve("hello").await.unwrap_err();
        assert_eq!(err.kind(), brandlens_shared::ErrorKind::AcquisitionError);
    }

    #[tokio::test]
    async fn persistence_timeout_is_fatal() {
        let store = Arc::new(MemoryContentStore::slow(Duration::from_millis(200)));
        let mut config = ContentConfig::default();
        config.persist_timeout_secs = 0;
        let err = ContentPreservationPolicy::new(store, &config)
            .preserve("hello")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn summary_exposes_metadata_only() {
        let store = Arc::new(MemoryContentStore::default());
        let policy = policy(store).with_budget(1_000);
        let artifact = policy.preserve(&"word ".repeat(1_000)).await.unwrap();
        let summary = policy.summarize(&artifact);

        assert_eq!(summary.original_len, 5_000);
        assert_eq!(summary.processed_len, 1_000);
        assert!(summary.truncated);
        assert!(summary.preview.chars().count() <= 200);
        assert_eq!(summary.original_ref, artifact.original_ref);
        assert_eq!(summary.original_sha256.len(), 64);
    }
}
