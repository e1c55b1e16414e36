//! OpenAI-compatible chat completions backend (OpenRouter, OpenAI, vLLM, ...).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use brandlens_shared::{BrandlensError, Result};

use crate::provider::{Generation, GenerationRequest, ModelProvider, ProviderError};

/// Provider speaking `GET /models` and `POST /chat/completions`.
pub struct OpenAiCompatibleProvider {
    id: String,
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: impl Into<String>, base_url: &str, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("Brandlens/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| BrandlensError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            id: id.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

#[async_trait]
impl ModelProvider for OpenAiCompatibleProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn health_check(&self, model: &str) -> std::result::Result<(), ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(&self.base_url, e))?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }

        let list: ModelList = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        // Some gateways return an empty listing; treat reachability as healthy then.
        if !list.data.is_empty() && !list.data.iter().any(|m| m.id == model) {
            return Err(ProviderError::ModelNotFound(model.to_string()));
        }
        Ok(())
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<Generation, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
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
            temperature: request.temperature,
            max_tokens: request.max_output_tokens,
            response_format: request.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        debug!(provider = %self.id, model = %request.model, "chat completion request");
        let response = self
            .authorized(self.client.post(&url))
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

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Decode("response has no message content".into()))?;

        Ok(Generation {
            text,
            model: parsed.model.unwrap_or_else(|| request.model.clone()),
            tokens_in: parsed.usage.as_ref().and_then(|u| u.prompt_tokens),
            tokens_out: parsed.usage.as_ref().and_then(|u| u.completion_tokens),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(json_mode: bool) -> GenerationRequest {
        GenerationRequest {
            system: "You are a brand analyst.".into(),
            prompt: "Describe Acme.".into(),
            model: "acme/model-1".into(),
            temperature: 0.3,
            max_output_tokens: 512,
            json_mode,
        }
    }

    #[tokio::test]
    async fn health_check_finds_listed_model() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"id": "acme/model-1"}, {"id": "other/model"}]
            })))
            .mount(&server)
            .await;

        let provider = OpenAiCompatibleProvider::new("router", &server.uri(), None).unwrap();
        provider.health_check("acme/model-1").await.expect("healthy");

        let missing = provider.health_check("acme/model-2").await.unwrap_err();
        assert!(matches!(missing, ProviderError::ModelNotFound(_)));
    }

    #[tokio::test]
    async fn health_check_reports_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let provider = OpenAiCompatibleProvider::new("router", &server.uri(), None).unwrap();
        let err = provider.health_check("acme/model-1").await.unwrap_err();
        assert!(matches!(err, ProviderError::Http { status: 503, .. }));
    }

    #[tokio::test]
    async fn generate_sends_json_mode_and_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "acme/model-1",
                "max_tokens": 512,
                "response_format": {"type": "json_object"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "acme/model-1",
                "choices": [{"message": {"role": "assistant", "content": "{\"name\":\"Acme\"}"}}],
                "usage": {"prompt_tokens": 42, "completion_tokens": 7}
            })))
            .mount(&server)
            .await;

        let provider =
            OpenAiCompatibleProvider::new("router", &server.uri(), Some("sk-test".into())).unwrap();
        let generation = provider.generate(&request(true)).await.expect("generate");
        assert_eq!(generation.text, r#"{"name":"Acme"}"#);
        assert_eq!(generation.tokens_in, Some(42));
        assert_eq!(generation.tokens_out, Some(7));
    }

    #[tokio::test]
    async fn generate_without_content_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })),
            )
            .mount(&server)
            .await;

        let provider = OpenAiCompatibleProvider::new("router", &server.uri(), None).unwrap();
        let err = provider.generate(&request(false)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));
    }

    #[tokio::test]
    async fn unreachable_backend() {
        let provider = OpenAiCompatibleProvider::new("router", "http://127.0.0.1:9", None).unwrap();
        let err = provider.health_check("m").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
