//! Model access for Brandlens.
//!
//! - [`ModelProvider`]: the capability every backend implements
//! - [`OpenAiCompatibleProvider`], [`OllamaProvider`]: concrete backends
//! - [`ProviderRegistry`]: providers by id, built from config
//! - [`ModelRouter`]: per-task primary/fallback routing with health checks
//!   and bounded retry
//! - [`parse_structured`]: tolerant JSON extraction from model text

mod ollama;
mod openai;
mod parse;
mod provider;
mod registry;
mod router;

pub use ollama::OllamaProvider;
pub use openai::OpenAiCompatibleProvider;
pub use parse::{find_json_object, parse_structured};
pub use provider::{Generation, GenerationRequest, ModelProvider, ProviderError};
pub use registry::ProviderRegistry;
pub use router::{
    ModelRouter, Prompt, RetryPolicy, RouteDecision, RouteRole, Routed, TargetHealth,
};
