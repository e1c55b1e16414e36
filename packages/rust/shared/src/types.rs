//! Core domain types for Brandlens runs and their artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Task name of the first model-backed transformation.
pub const BRAND_PROFILE_TASK: &str = "brand_profile";

/// Task name of the second model-backed transformation.
pub const COMPETITOR_ANALYSIS_TASK: &str = "competitor_analysis";

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for pipeline run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Lifecycle status
// ---------------------------------------------------------------------------

/// Lifecycle of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Lifecycle of a single step: `Pending → Running → {Succeeded | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

macro_rules! status_strings {
    ($ty:ident) => {
        impl $ty {
            /// Storage representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    Self::Pending => "pending",
                    Self::Running => "running",
                    Self::Succeeded => "succeeded",
                    Self::Failed => "failed",
                }
            }

            /// Whether no further transition is possible.
            pub fn is_terminal(&self) -> bool {
                matches!(self, Self::Succeeded | Self::Failed)
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    "pending" => Ok(Self::Pending),
                    "running" => Ok(Self::Running),
                    "succeeded" => Ok(Self::Succeeded),
                    "failed" => Ok(Self::Failed),
                    other => Err(format!("unknown status: {other}")),
                }
            }
        }
    };
}

status_strings!(RunStatus);
status_strings!(StepStatus);

// ---------------------------------------------------------------------------
// PipelineRun / StepRecord
// ---------------------------------------------------------------------------

/// One end-to-end execution of the fixed step sequence for a single URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: RunId,
    pub url: String,
    pub status: RunStatus,
    /// Names of steps that succeeded, in execution order.
    pub completed_steps: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Error kind of the failure that terminated the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl PipelineRun {
    /// A freshly requested run.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: RunId::new(),
            url: url.into(),
            status: RunStatus::Pending,
            completed_steps: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
            error_kind: None,
            error_message: None,
        }
    }
}

/// Append-only history entry for one step of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// `provider/model` that served a model-backed step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub served_by: Option<String>,
}

// ---------------------------------------------------------------------------
// Content artifact
// ---------------------------------------------------------------------------

/// Where an original content copy was persisted (a filename in the content store).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageRef(pub String);

impl std::fmt::Display for StorageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The dual-tier content produced at acquisition.
///
/// The original lives only in the content store (see `original_ref`); the
/// processed copy is the budget-capped prefix handed to models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentArtifact {
    pub original_ref: StorageRef,
    /// Original length in characters.
    pub original_len: usize,
    /// SHA-256 of the original, hex encoded.
    pub original_sha256: String,
    pub processed: String,
    /// Processed length in characters.
    pub processed_len: usize,
    pub truncated: bool,
}

/// The bounded view of a [`ContentArtifact`] that leaves the acquisition step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSummary {
    pub original_len: usize,
    pub processed_len: usize,
    pub truncated: bool,
    pub preview: String,
    pub original_ref: StorageRef,
    pub original_sha256: String,
}

/// The processed content as it appears in a [`PipelineResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedContent {
    pub content: String,
    pub length: usize,
    pub original_length: usize,
    pub truncated: bool,
    pub original_ref: StorageRef,
}

impl From<&ContentArtifact> for ProcessedContent {
    fn from(artifact: &ContentArtifact) -> Self {
        Self {
            content: artifact.processed.clone(),
            length: artifact.processed_len,
            original_length: artifact.original_len,
            truncated: artifact.truncated,
            original_ref: artifact.original_ref.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Analysis results
// ---------------------------------------------------------------------------

/// Output of the brand-profile task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrandProfile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tagline: Option<String>,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default)]
    pub target_audience: Vec<String>,
    #[serde(default)]
    pub value_propositions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone_of_voice: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// A single competitor identified by the competitor-analysis task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Competitor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub positioning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlap_reason: Option<String>,
}

/// Output of the competitor-analysis task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetitorAnalysis {
    pub competitors: Vec<Competitor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_summary: Option<String>,
}

// ---------------------------------------------------------------------------
// PipelineResult
// ---------------------------------------------------------------------------

/// The externally visible output of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub id: RunId,
    pub url: String,
    pub brand_profile: BrandProfile,
    pub competitor_analysis: CompetitorAnalysis,
    pub content: ProcessedContent,
    pub created_at: DateTime<Utc>,
}
