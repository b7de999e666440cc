//! Inference service trait.
//!
//! The only caller is [`crate::inference::BatchInferenceClient`], which owns
//! retries, timeouts and response parsing. Adapters only have to make one
//! attempt and classify its failure.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::InferenceResult;

/// A single generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    /// System instructions
    pub system: Option<String>,

    /// User prompt
    pub prompt: String,

    /// JSON schema the response should follow, if the service supports it
    pub schema: Option<Value>,

    /// Sampling temperature
    pub temperature: f32,
}

impl InferenceRequest {
    /// Create a request with no schema and temperature 0.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            schema: None,
            temperature: 0.0,
        }
    }

    /// Set the system instructions.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Ask for structured output following `schema`.
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Set the temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// What the service sent back.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceResponse {
    /// Already-parsed structured output
    Structured(Value),
    /// Free text that should contain a JSON object somewhere
    RawText(String),
}

/// An external text-generation service.
#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Make one attempt. Failures must be classified as
    /// `Quota`, `Transient` or `Fatal`.
    async fn generate(&self, request: &InferenceRequest) -> InferenceResult<InferenceResponse>;
}

#[async_trait]
impl<T: InferenceService + ?Sized> InferenceService for Arc<T> {
    async fn generate(&self, request: &InferenceRequest) -> InferenceResult<InferenceResponse> {
        (**self).generate(request).await
    }
}
