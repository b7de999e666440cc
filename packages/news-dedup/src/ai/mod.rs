//! Inference service adapters.
//!
//! Reference implementations of [`crate::traits::inference::InferenceService`].
//! Callers can use these directly or implement their own.

mod openai;

pub use openai::{classify_status, OpenAiInference};
