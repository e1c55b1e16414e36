//! Provider lookup by identifier.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use brandlens_shared::{AppConfig, ProviderKind, Result};

use crate::ollama::OllamaProvider;
use crate::openai::OpenAiCompatibleProvider;
use crate::provider::ModelProvider;

/// Providers available to the router, keyed by [`ModelProvider::id`].
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every `[providers.<id>]` entry of the config.
    ///
    /// API keys are read from the configured env vars here; a missing key is
    /// left to `validate_api_keys` and to the provider's own auth failure.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut registry = Self::new();
        for (id, provider) in &config.providers {
            let built: Arc<dyn ModelProvider> = match provider.kind {
                ProviderKind::OpenaiCompatible => {
                    let api_key = provider
                        .api_key_env
                        .as_deref()
                        .and_then(|var| std::env::var(var).ok())
                        .filter(|v| !v.is_empty());
                    Arc::new(OpenAiCompatibleProvider::new(
                        id.clone(),
                        &provider.base_url,
                        api_key,
                    )?)
                }
                ProviderKind::Ollama => {
                    Arc::new(OllamaProvider::new(id.clone(), &provider.base_url)?)
                }
            };
            debug!(provider = %id, kind = ?provider.kind, "provider registered");
            registry.insert(built);
        }
        Ok(registry)
    }

    /// Register a provider, replacing any previous one with the same id.
    pub fn insert(&mut self, provider: Arc<dyn ModelProvider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.insert(provider);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ModelProvider>> {
        self.providers.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
