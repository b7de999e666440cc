//! Content store trait for pipeline artifacts.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::{DedupError, Result};
use crate::types::artifact::ArtifactPath;

/// Storage for JSON artifacts addressed by [`ArtifactPath`].
///
/// Writes to an existing path replace its content, which is what makes
/// rerunning a stage idempotent.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Read an artifact. Missing paths are [`DedupError::ArtifactNotFound`].
    async fn read_json(&self, path: &ArtifactPath) -> Result<Value>;

    /// Write (or overwrite) an artifact.
    async fn write_json(&self, path: &ArtifactPath, value: &Value) -> Result<()>;

    /// Check whether an artifact exists.
    async fn exists(&self, path: &ArtifactPath) -> Result<bool>;

    /// List artifact paths starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<ArtifactPath>>;
}

/// Read an artifact and deserialize it.
pub async fn read_artifact<S, T>(store: &S, path: &ArtifactPath) -> Result<T>
where
    S: ContentStore + ?Sized,
    T: DeserializeOwned,
{
    let value = store.read_json(path).await?;
    serde_json::from_value(value).map_err(|e| {
        DedupError::invalid(format!("artifact {path} has an unexpected shape: {e}"))
    })
}

/// Serialize a payload and write it as an artifact.
pub async fn write_artifact<S, T>(store: &S, path: &ArtifactPath, payload: &T) -> Result<()>
where
    S: ContentStore + ?Sized,
    T: Serialize + Sync,
{
    let value = serde_json::to_value(payload)?;
    store.write_json(path, &value).await
}
