//! Resilient calls to the inference service.
//!
//! - [`BatchInferenceClient`] - retry/backoff state machine with timeouts and throttling
//! - [`extract_json_object`] - pull a JSON object out of free-text output

mod client;
mod json;

pub use client::{BatchCallState, BatchInferenceClient, CallStatus};
pub use json::{extract_json_object, parse_response};
pub(crate) use json::truncate;
