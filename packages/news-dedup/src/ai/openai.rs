//! OpenAI-compatible implementation of [`InferenceService`].
//!
//! Talks to any `/chat/completions` endpoint. When the request carries a
//! schema the call uses `response_format: json_schema` and the reply is
//! returned as [`InferenceResponse::Structured`].
//!
//! # Example
//!
//! ```rust,ignore
//! use news_dedup::ai::OpenAiInference;
//!
//! let inference = OpenAiInference::from_env().with_model("gpt-4o-mini");
//! let coordinator = PipelineCoordinator::new(store, bus, inference, config)?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{InferenceError, InferenceResult};
use crate::inference::truncate;
use crate::security::{ApiKeyCache, SecretString};
use crate::traits::inference::{InferenceRequest, InferenceResponse, InferenceService};

/// OpenAI chat-completions adapter.
#[derive(Clone)]
pub struct OpenAiInference {
    client: Client,
    keys: Arc<ApiKeyCache>,
    model: String,
    base_url: String,
    max_tokens: u32,
}

impl OpenAiInference {
    /// Create a client with a fixed API key.
    pub fn new(api_key: impl Into<SecretString>) -> Self {
        let key: SecretString = api_key.into();
        let cache = ApiKeyCache::new(ApiKeyCache::DEFAULT_TTL, move || Ok(key.clone()));
        Self::with_key_cache(Arc::new(cache))
    }

    /// Read `OPENAI_API_KEY` lazily, reloading it once per hour.
    pub fn from_env() -> Self {
        Self::with_key_cache(Arc::new(ApiKeyCache::from_env(
            "OPENAI_API_KEY",
            ApiKeyCache::DEFAULT_TTL,
        )))
    }

    /// Use a shared key cache.
    pub fn with_key_cache(keys: Arc<ApiKeyCache>) -> Self {
        Self {
            client: Client::new(),
            keys,
            model: "gpt-4o".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            max_tokens: 4096,
        }
    }

    /// Set the chat model (default: gpt-4o).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set a custom base URL (for Azure, proxies, local gateways).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn chat_request(&self, request: &InferenceRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });

        ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: request.temperature,
            max_tokens: self.max_tokens,
            response_format: request.schema.as_ref().map(|schema| ResponseFormat {
                format_type: "json_schema".to_string(),
                json_schema: JsonSchemaFormat {
                    name: "structured_response".to_string(),
                    strict: false,
                    schema: schema.clone(),
                },
            }),
        }
    }
}

/// Map a non-success HTTP status to a typed inference error.
///
/// 429 is quota, 5xx (and 408) are transient, every other status is fatal.
pub fn classify_status(status: StatusCode, body: &str) -> InferenceError {
    let message = format!("HTTP {}: {}", status.as_u16(), truncate(body, 500));
    if status == StatusCode::TOO_MANY_REQUESTS {
        InferenceError::Quota(message)
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        InferenceError::Transient(message)
    } else {
        InferenceError::Fatal(message)
    }
}

/// Turn the assistant's content into a response.
///
/// Structured requests are parsed here; anything that does not parse is
/// handed back as raw text for the client's JSON recovery.
fn into_response(content: String, structured: bool) -> InferenceResponse {
    if structured {
        if let Ok(value) = serde_json::from_str::<Value>(&content) {
            return InferenceResponse::Structured(value);
        }
    }
    InferenceResponse::RawText(content)
}

#[async_trait]
impl InferenceService for OpenAiInference {
    async fn generate(&self, request: &InferenceRequest) -> InferenceResult<InferenceResponse> {
        let api_key = self
            .keys
            .get()
            .map_err(|e| InferenceError::Fatal(e.to_string()))?;
        let body = self.chat_request(request);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| InferenceError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &error_text));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::MalformedResponse(e.to_string()))?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| InferenceError::MalformedResponse("no choices in response".into()))?;

        debug!(model = %self.model, chars = content.len(), "chat completion received");
        Ok(into_response(content, request.schema.is_some()))
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
    json_schema: JsonSchemaFormat,
}

#[derive(Serialize)]
struct JsonSchemaFormat {
    name: String,
    strict: bool,
    schema: Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder() {
        let ai = OpenAiInference::new("sk-test")
            .with_model("gpt-4o-mini")
            .with_base_url("https://custom.api.com/v1/");

        assert_eq!(ai.model(), "gpt-4o-mini");
        assert_eq!(ai.base_url, "https://custom.api.com/v1");
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            InferenceError::Quota(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, ""),
            InferenceError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR, ""),
            InferenceError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "bad key"),
            InferenceError::Fatal(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, ""),
            InferenceError::Fatal(_)
        ));
    }

    #[test]
    fn test_request_body_with_schema() {
        let ai = OpenAiInference::new("sk-test");
        let request = InferenceRequest::new("decide")
            .with_system("you merge news")
            .with_schema(json!({"type": "object"}));

        let body = serde_json::to_value(ai.chat_request(&request)).unwrap();
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "decide");
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["schema"]["type"], "object");
    }

    #[test]
    fn test_request_body_without_schema() {
        let ai = OpenAiInference::new("sk-test");
        let body = serde_json::to_value(ai.chat_request(&InferenceRequest::new("hi"))).unwrap();
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_into_response() {
        assert_eq!(
            into_response(r#"{"decisions": []}"#.into(), true),
            InferenceResponse::Structured(json!({"decisions": []}))
        );
        assert!(matches!(
            into_response("not json".into(), true),
            InferenceResponse::RawText(_)
        ));
        assert!(matches!(
            into_response(r#"{"a": 1}"#.into(), false),
            InferenceResponse::RawText(_)
        ));
    }
}
