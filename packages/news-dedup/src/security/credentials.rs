//! Credential handling with secure memory.
//!
//! Uses the `secrecy` crate to prevent accidental logging of API keys.

use std::fmt;
use std::sync::RwLock;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretBox};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{DedupError, Result};

/// A secret string that won't be logged or displayed.
pub struct SecretString(SecretBox<str>);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretBox::new(Box::from(value.into().as_str())))
    }

    /// Expose the secret value for use.
    ///
    /// Only call this when actually using the secret (e.g., in an API request).
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().trim().is_empty()
    }
}

impl Clone for SecretString {
    fn clone(&self) -> Self {
        Self::new(self.expose())
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

type KeyLoader = Box<dyn Fn() -> Result<SecretString> + Send + Sync>;

struct CachedKey {
    key: SecretString,
    loaded_at: Instant,
}

/// API key cache with an explicit time-to-live.
///
/// Keys come from an injected loader (environment, secret manager, file).
/// Every [`get`](Self::get) checks the age of the cached key and reloads
/// once it is older than the TTL, so rotated keys are picked up without a
/// restart.
pub struct ApiKeyCache {
    loader: KeyLoader,
    ttl: Duration,
    cached: RwLock<Option<CachedKey>>,
}

impl ApiKeyCache {
    /// Default TTL before a key is reloaded.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

    pub fn new<F>(ttl: Duration, loader: F) -> Self
    where
        F: Fn() -> Result<SecretString> + Send + Sync + 'static,
    {
        Self {
            loader: Box::new(loader),
            ttl,
            cached: RwLock::new(None),
        }
    }

    /// Cache a key read from an environment variable.
    pub fn from_env(var: &'static str, ttl: Duration) -> Self {
        Self::new(ttl, move || {
            std::env::var(var)
                .map(SecretString::from)
                .map_err(|_| DedupError::Config(format!("{var} is not set")))
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current key, reloading it when the cached one has expired.
    pub fn get(&self) -> Result<SecretString> {
        {
            let cached = self
                .cached
                .read()
                .map_err(|e| DedupError::Storage(e.to_string().into()))?;
            if let Some(entry) = cached.as_ref() {
                if entry.loaded_at.elapsed() < self.ttl {
                    return Ok(entry.key.clone());
                }
            }
        }

        let key = (self.loader)()?;
        if key.is_empty() {
            return Err(DedupError::Config("API key is empty".into()));
        }
        debug!(ttl_secs = self.ttl.as_secs(), "loaded API key");

        let mut cached = self
            .cached
            .write()
            .map_err(|e| DedupError::Storage(e.to_string().into()))?;
        *cached = Some(CachedKey {
            key: key.clone(),
            loaded_at: Instant::now(),
        });
        Ok(key)
    }

    /// Drop the cached key so the next read reloads it.
    pub fn invalidate(&self) -> Result<()> {
        let mut cached = self
            .cached
            .write()
            .map_err(|e| DedupError::Storage(e.to_string().into()))?;
        *cached = None;
        Ok(())
    }
}

impl fmt::Debug for ApiKeyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyCache")
            .field("ttl", &self.ttl)
            .field("key", &"[REDACTED]")
            .finish()
    }
}
