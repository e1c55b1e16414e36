//! Shared types, error model, and configuration for Brandlens.
//!
//! This crate is the foundation depended on by all other Brandlens crates.
//! It provides:
//! - [`BrandlensError`]: the unified error type and its [`ErrorKind`] taxonomy
//! - Domain types ([`PipelineRun`], [`StepRecord`], [`ContentArtifact`], [`PipelineResult`], ...)
//! - Configuration ([`AppConfig`], [`ModelTaskConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ContentConfig, DefaultsConfig, MAX_ATTEMPTS_CEILING, ModelTarget, ModelTaskConfig,
    ProviderConfig, ProviderKind, RoutingConfig, SourceConfig, config_dir, config_file_path,
    expand_home, init_config, load_config, load_config_from, validate_api_keys, validate_config,
};
pub use error::{BrandlensError, ErrorKind, Result};
pub use types::{
    ArtifactSummary, BRAND_PROFILE_TASK, BrandProfile, COMPETITOR_ANALYSIS_TASK, Competitor,
    CompetitorAnalysis, ContentArtifact, PipelineResult, PipelineRun, ProcessedContent, RunId,
    RunStatus, StepRecord, StepStatus, StorageRef,
};
