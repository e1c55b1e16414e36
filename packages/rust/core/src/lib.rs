//! Pipeline orchestration for Brandlens.
//!
//! A run takes one URL through four steps: acquire the page content, derive
//! a brand profile, derive a competitor analysis, and compile the result.
//! Steps share data only through the run's [`state::SharedState`]; the
//! [`pipeline::PipelineController`] enforces their order and data contracts.

pub mod content;
pub mod executor;
pub mod pipeline;
pub mod prompts;
pub mod state;
pub mod steps;

#[cfg(test)]
mod testing;

pub use content::ContentPreservationPolicy;
pub use executor::{Step, StepContext, StepExecution, StepExecutor, StepOutput};
pub use pipeline::{
    PipelineController, ProgressReporter, RunReport, SilentProgress, get_artifact_summary,
    validate_url,
};
pub use state::{SharedState, StateKey, StateValue, StateWriter};
