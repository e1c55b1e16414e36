//! Ollama backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use brandlens_shared::{BrandlensError, Result};

use crate::provider::{Generation, GenerationRequest, ModelProvider, ProviderError};

/// Provider speaking Ollama's `/api/tags` and `/api/chat`.
pub struct OllamaProvider {
    id: String,
    base_url: String,
    client: Client,
}

impl OllamaProvider {
    pub fn new(id: impl Into<String>, base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| BrandlensError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            id: id.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Names of installed models.
    pub async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(&self.base_url, e))?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }

        let parsed: TagsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }
}

/// `llama3.1` matches `llama3.1:latest`; tagged names must match exactly.
fn model_installed(installed: &[String], model: &str) -> bool {
    installed.iter().any(|name| {
        name == model || (!model.contains(':') && name.as_str() == format!("{model}:latest"))
    })
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f64,
    num_predict: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    message: ResponseMessage,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn health_check(&self, model: &str) -> std::result::Result<(), ProviderError> {
        let installed = self.list_models().await?;
        if model_installed(&installed, model) {
            Ok(())
        } else {
            Err(ProviderError::ModelNotFound(model.to_string()))
        }
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<Generation, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatRequest {
            model: &request.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            stream: false,
            format: request.json_mode.then_some("json"),
            options: ChatOptions {
                temperature: request.temperature,
                num_predict: request.max_output_tokens,
            },
        };

        debug!(provider = %self.id, model = %request.model, "ollama chat request");
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(&self.base_url, e))?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        Ok(Generation {
            text: parsed.message.content,
            model: parsed.model.unwrap_or_else(|| request.model.clone()),
            tokens_in: parsed.prompt_eval_count,
            tokens_out: parsed.eval_count,
        })
    }
}
