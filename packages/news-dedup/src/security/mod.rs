//! Secret handling for inference credentials.

mod credentials;

pub use credentials::{ApiKeyCache, SecretString};
