//! Error types for Brandlens.
//!
//! Library crates use [`BrandlensError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! The first five variants are the pipeline taxonomy: every one of them is
//! fatal to a run. The remaining variants are ambient failures raised by
//! configuration, storage, and I/O plumbing.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level error type for all Brandlens operations.
#[derive(Debug, thiserror::Error)]
pub enum BrandlensError {
    /// Malformed or missing target URL.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Source fetch failed, or the original content could not be persisted.
    #[error("acquisition error: {0}")]
    Acquisition(String),

    /// Both the primary and the fallback model failed for a task.
    #[error("model unavailable for task `{task}`: {detail}")]
    ModelUnavailable { task: String, detail: String },

    /// A model answered, but the answer did not parse into the expected shape.
    #[error("malformed model output for task `{task}`: {message}")]
    MalformedModelOutput { task: String, message: String },

    /// A step's required shared-state key was absent.
    #[error("missing state `{key}` required by step `{step}`")]
    MissingState { key: String, step: String },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Database or file store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Network/HTTP error outside of model routing.
    #[error("network error: {0}")]
    Network(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BrandlensError>;

/// Stable, user-visible classification of a [`BrandlensError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    AcquisitionError,
    ModelUnavailable,
    MalformedModelOutput,
    MissingState,
    ConfigError,
    StorageError,
    NetworkError,
    IoError,
}

impl ErrorKind {
    /// Identifier recorded on failed runs and steps.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "validation_error",
            Self::AcquisitionError => "acquisition_error",
            Self::ModelUnavailable => "model_unavailable",
            Self::MalformedModelOutput => "malformed_model_output",
            Self::MissingState => "missing_state",
            Self::ConfigError => "config_error",
            Self::StorageError => "storage_error",
            Self::NetworkError => "network_error",
            Self::IoError => "io_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl BrandlensError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::ValidationError,
            Self::Acquisition(_) => ErrorKind::AcquisitionError,
            Self::ModelUnavailable { .. } => ErrorKind::ModelUnavailable,
            Self::MalformedModelOutput { .. } => ErrorKind::MalformedModelOutput,
            Self::MissingState { .. } => ErrorKind::MissingState,
            Self::Config { .. } => ErrorKind::ConfigError,
            Self::Storage(_) => ErrorKind::StorageError,
            Self::Network(_) => ErrorKind::NetworkError,
            Self::Io { .. } => ErrorKind::IoError,
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an acquisition error from any displayable message.
    pub fn acquisition(msg: impl Into<String>) -> Self {
        Self::Acquisition(msg.into())
    }

    /// Create a model-unavailable error for `task`.
    pub fn model_unavailable(task: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ModelUnavailable {
            task: task.into(),
            detail: detail.into(),
        }
    }

    /// Create a malformed-output error for `task`.
    pub fn malformed_output(task: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::MalformedModelOutput {
            task: task.into(),
            message: msg.into(),
        }
    }

    /// Create a missing-state error for `key`, observed by `step`.
    pub fn missing_state(key: impl Into<String>, step: impl Into<String>) -> Self {
        Self::MissingState {
            key: key.into(),
            step: step.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
