//! OpenAI-compatible provider adapter.
//!
//! One [`OpenAiClient`] serves both model capabilities the pipeline consumes:
//! schema-constrained chat completions ([`LlmClient`]) and embeddings
//! ([`EmbedderClient`]). Retries are owned by the pipeline (one retry with
//! backoff, behind the shared rate limiter), so the underlying HTTP client's
//! own retry loop is disabled.

use std::time::Duration;

use async_openai::{
    config::OpenAIConfig, error::OpenAIError, types::CreateEmbeddingRequestArgs, Client,
};
use backoff::ExponentialBackoffBuilder;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use super::{LlmClient, Message};
use crate::embedder::{EmbedderClient, Embedding};
use crate::errors::{PodknowError, ProviderError, Result};
use crate::types::ProviderConfig;
use crate::utils::extract_json_from_response;

/// Maximum number of inputs per embeddings call.
const BATCH_CHUNK_SIZE: usize = 2048;

fn embedding_dim(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        _ => 1536,
    }
}

/// Client for an OpenAI-compatible API.
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    embedding_model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiClient {
    pub fn new(config: &ProviderConfig) -> Self {
        let mut openai = OpenAIConfig::new().with_api_key(config.api_key.clone());
        if let Some(base) = &config.api_base {
            openai = openai.with_api_base(base.clone());
        }

        // A zero elapsed-time budget turns the client's internal retry off.
        let no_retry = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(Duration::ZERO))
            .build();

        Self {
            client: Client::with_config(openai).with_backoff(no_retry),
            model: config.model_name.clone(),
            embedding_model: config.embedding_model.clone(),
            temperature: 0.0,
            max_tokens: 4_096,
        }
    }

    fn messages_to_json(messages: &[Message]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect()
    }

    fn extract_content(response: &serde_json::Value) -> Result<String> {
        let message = &response["choices"][0]["message"];
        if message["refusal"].is_string() {
            return Err(ProviderError::Refusal.into());
        }
        message["content"]
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .map(ToOwned::to_owned)
            .ok_or(PodknowError::Provider(ProviderError::EmptyResponse))
    }
}

impl LlmClient for OpenAiClient {
    async fn generate_structured<T>(&self, messages: &[Message]) -> Result<T>
    where
        T: DeserializeOwned + schemars::JsonSchema,
    {
        let schema = serde_json::to_value(schemars::schema_for!(T))?;

        let request = json!({
            "model": self.model,
            "messages": Self::messages_to_json(messages),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "response",
                    "schema": schema,
                }
            }
        });

        let response: serde_json::Value = self
            .client
            .chat()
            .create_byot(request)
            .await
            .map_err(map_openai_error)?;

        let content = Self::extract_content(&response)?;
        let body = extract_json_from_response(&content).unwrap_or(&content);
        debug!(
            target_type = std::any::type_name::<T>(),
            bytes = body.len(),
            "structured response received"
        );

        Ok(serde_json::from_str(body)?)
    }
}

impl EmbedderClient for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.embed_batch(&[text])
            .await?
            .pop()
            .ok_or(PodknowError::Provider(ProviderError::EmptyResponse))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let mut result = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(BATCH_CHUNK_SIZE) {
            let input: Vec<String> = chunk.iter().map(|s| (*s).to_owned()).collect();
            let request = CreateEmbeddingRequestArgs::default()
                .model(self.embedding_model.as_str())
                .input(input)
                .build()
                .map_err(map_openai_error)?;

            let response = self
                .client
                .embeddings()
                .create(request)
                .await
                .map_err(map_openai_error)?;

            if response.data.len() != chunk.len() {
                return Err(ProviderError::EmptyResponse.into());
            }
            let mut data = response.data;
            data.sort_by_key(|item| item.index);
            result.extend(
                data.into_iter()
                    .map(|item| item.embedding.into_iter().map(|x| x as f32).collect()),
            );
        }
        Ok(result)
    }

    fn dim(&self) -> usize {
        embedding_dim(&self.embedding_model)
    }
}

/// Map an [`OpenAIError`] onto the provider error taxonomy.
fn map_openai_error(err: OpenAIError) -> ProviderError {
    match err {
        OpenAIError::ApiError(api_err) => {
            let code = api_err.code.as_deref().unwrap_or_default();
            let kind = api_err.r#type.as_deref().unwrap_or_default();
            match (code, kind) {
                ("invalid_api_key", _) | (_, "authentication_error") => {
                    ProviderError::Authentication
                }
                ("rate_limit_exceeded", _) | (_, "requests") | (_, "tokens") => {
                    ProviderError::RateLimit
                }
                _ => ProviderError::Api {
                    status: 0,
                    message: api_err.message.clone(),
                },
            }
        }
        OpenAIError::Reqwest(e) => match e.status().map(|s| s.as_u16()) {
            Some(401) | Some(403) => ProviderError::Authentication,
            Some(429) => ProviderError::RateLimit,
            Some(status) => ProviderError::Api {
                status,
                message: e.to_string(),
            },
            None => ProviderError::Transport(e.to_string()),
        },
        other => ProviderError::Api {
            status: 0,
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::Role;
    use schemars::JsonSchema;
    use serde::Deserialize;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> OpenAiClient {
        OpenAiClient::new(&ProviderConfig {
            api_key: "test-key".to_string(),
            api_base: Some(server.uri()),
            model_name: "gpt-4o".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
        })
    }

    fn chat_response(content: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-test",
            "object": "chat.completion",
            "created": 1700000000_u64,
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop",
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 20, "total_tokens": 30 }
        })
    }

    fn user(text: &str) -> Vec<Message> {
        vec![Message {
            role: Role::User,
            content: text.to_string(),
        }]
    }

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct Label {
        label: String,
    }

    #[tokio::test]
    async fn structured_response_is_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(chat_response(r#"{"label": "AI safety"}"#)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let label: Label = client_for(&server)
            .generate_structured(&user("label this"))
            .await
            .expect("structured generation should succeed");
        assert_eq!(label.label, "AI safety");
    }

    #[tokio::test]
    async fn fenced_structured_response_is_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_response(
                "Sure:\n```json\n{\"label\": \"Funding\"}\n```",
            )))
            .mount(&server)
            .await;

        let label: Label = client_for(&server)
            .generate_structured(&user("label"))
            .await
            .unwrap();
        assert_eq!(label.label, "Funding");
    }

    #[tokio::test]
    async fn auth_failure_maps_to_authentication() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {
                    "message": "Incorrect API key",
                    "type": "invalid_request_error",
                    "param": null,
                    "code": "invalid_api_key"
                }
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate_structured::<Label>(&user("hi"))
            .await
            .expect_err("should fail");
        assert!(
            matches!(err, PodknowError::Provider(ProviderError::Authentication)),
            "expected Authentication, got {:?}",
            err
        );
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn rate_limit_maps_to_transient_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {
                    "message": "Rate limit reached for requests",
                    "type": "requests",
                    "param": null,
                    "code": "rate_limit_exceeded"
                }
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate_structured::<Label>(&user("hi"))
            .await
            .expect_err("should fail");
        assert!(
            matches!(err, PodknowError::Provider(ProviderError::RateLimit)),
            "expected RateLimit, got {:?}",
            err
        );
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn unknown_api_error_keeps_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {
                    "message": "context length exceeded",
                    "type": "invalid_request_error",
                    "param": "messages",
                    "code": "context_length_exceeded"
                }
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate_structured::<Label>(&user("hi"))
            .await
            .expect_err("should fail");
        match err {
            PodknowError::Provider(ProviderError::Api { message, .. }) => {
                assert_eq!(message, "context length exceeded");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn embed_batch_returns_vectors_in_input_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "list",
                "data": [
                    { "object": "embedding", "index": 1, "embedding": [0.0, 1.0] },
                    { "object": "embedding", "index": 0, "embedding": [1.0, 0.0] }
                ],
                "model": "text-embedding-3-small",
                "usage": { "prompt_tokens": 4, "total_tokens": 4 }
            })))
            .mount(&server)
            .await;

        let vectors = client_for(&server)
            .embed_batch(&["first", "second"])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn embed_batch_empty_input_makes_no_call() {
        let server = MockServer::start().await;
        let vectors = client_for(&server).embed_batch(&[]).await.unwrap();
        assert!(vectors.is_empty());
    }

    #[test]
    fn dim_follows_model() {
        let config = ProviderConfig {
            api_key: "k".into(),
            api_base: None,
            model_name: "gpt-4o".into(),
            embedding_model: "text-embedding-3-large".into(),
        };
        assert_eq!(OpenAiClient::new(&config).dim(), 3072);
    }
}
