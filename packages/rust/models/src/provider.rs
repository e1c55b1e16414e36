//! The provider capability shared by every model backend.

use std::time::Duration;

use async_trait::async_trait;

/// One generation call, fully resolved to a concrete model.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub model: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
    /// Ask the backend for a JSON object response when it supports it.
    pub json_mode: bool,
}

/// Text returned by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub model: String,
    pub tokens_in: Option<u64>,
    pub tokens_out: Option<u64>,
}

/// Failure of a single provider call.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("cannot reach {0}")]
    Unreachable(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The limit is known when the router enforced it, not when the transport did.
    #[error("timed out{}", timeout_suffix(.0))]
    Timeout(Option<Duration>),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("model `{0}` is not available")]
    ModelNotFound(String),
}

impl ProviderError {
    /// Whether another attempt against the same target can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unreachable(_) | Self::Timeout(_) => true,
            Self::Http { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            Self::Decode(_) | Self::ModelNotFound(_) => false,
        }
    }

    pub(crate) fn from_reqwest(base_url: &str, e: reqwest::Error) -> Self {
        if e.is_connect() {
            Self::Unreachable(base_url.to_string())
        } else if e.is_timeout() {
            Self::Timeout(None)
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Unreachable(format!("{base_url}: {e}"))
        }
    }

    /// Build an [`ProviderError::Http`] from a non-success response.
    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > 500 {
            let cut = (0..=500).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
            body.truncate(cut);
        }
        Self::Http { status, body }
    }
}

fn timeout_suffix(limit: &Option<Duration>) -> String {
    limit.map(|d| format!(" after {d:?}")).unwrap_or_default()
}

/// A model backend able to report health and generate text.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Identifier this provider is registered under.
    fn id(&self) -> &str;

    /// Succeeds when the backend is reachable and serves `model`.
    async fn health_check(&self, model: &str) -> Result<(), ProviderError>;

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, ProviderError>;
}
