//! In-memory content store and message bus for testing and development.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{DedupError, Result};
use crate::traits::{bus::MessageBus, store::ContentStore};
use crate::types::artifact::{ArtifactPath, PipelineEvent};

fn poisoned<T>(_: std::sync::PoisonError<T>) -> DedupError {
    DedupError::Storage("memory store lock poisoned".into())
}

/// In-memory artifact storage.
///
/// Not suitable for production as data is lost on restart.
#[derive(Default)]
pub struct MemoryContentStore {
    artifacts: RwLock<BTreeMap<String, Value>>,
}

impl MemoryContentStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored artifacts.
    pub fn len(&self) -> usize {
        self.artifacts.read().map(|a| a.len()).unwrap_or(0)
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every artifact.
    pub fn clear(&self) -> Result<()> {
        self.artifacts.write().map_err(poisoned)?.clear();
        Ok(())
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn read_json(&self, path: &ArtifactPath) -> Result<Value> {
        let key = path.to_string();
        self.artifacts
            .read()
            .map_err(poisoned)?
            .get(&key)
            .cloned()
            .ok_or(DedupError::ArtifactNotFound { path: key })
    }

    async fn write_json(&self, path: &ArtifactPath, value: &Value) -> Result<()> {
        let key = path.to_string();
        debug!(path = %key, "writing artifact");
        self.artifacts
            .write()
            .map_err(poisoned)?
            .insert(key, value.clone());
        Ok(())
    }

    async fn exists(&self, path: &ArtifactPath) -> Result<bool> {
        Ok(self
            .artifacts
            .read()
            .map_err(poisoned)?
            .contains_key(&path.to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ArtifactPath>> {
        self.artifacts
            .read()
            .map_err(poisoned)?
            .keys()
            .filter(|key| key.starts_with(prefix))
            .map(|key| ArtifactPath::parse(key))
            .collect()
    }
}

/// Default channel capacity for the bus.
const DEFAULT_CAPACITY: usize = 1024;

/// Broadcast message bus.
///
/// Delivery is at-most-once: slow subscribers may lag and miss events, and
/// publishing with no subscribers is not an error. Every published event is
/// also kept in an in-memory history for inspection.
pub struct MemoryBus {
    sender: broadcast::Sender<PipelineEvent>,
    history: RwLock<Vec<PipelineEvent>>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    /// Create a bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            history: RwLock::new(Vec::new()),
        }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    /// Every event published so far, in order.
    pub fn published(&self) -> Vec<PipelineEvent> {
        self.history.read().map(|h| h.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, event: PipelineEvent) -> Result<()> {
        self.history.write().map_err(poisoned)?.push(event.clone());
        let receivers = self.sender.send(event).unwrap_or(0);
        debug!(receivers, "event published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::artifact::Stage;
    use serde_json::json;
    use uuid::Uuid;

    fn path(stage: Stage) -> ArtifactPath {
        ArtifactPath::new("run-1", stage, "ntv").unwrap()
    }

    #[tokio::test]
    async fn test_write_read_overwrite() {
        let store = MemoryContentStore::new();
        let grouped = path(Stage::GroupedArticles);

        assert!(!store.exists(&grouped).await.unwrap());
        store.write_json(&grouped, &json!({"v": 1})).await.unwrap();
        store.write_json(&grouped, &json!({"v": 2})).await.unwrap();

        assert_eq!(store.read_json(&grouped).await.unwrap(), json!({"v": 2}));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_artifact() {
        let store = MemoryContentStore::new();
        let result = store.read_json(&path(Stage::Embeddings)).await;
        assert!(matches!(result, Err(DedupError::ArtifactNotFound { .. })));
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let store = MemoryContentStore::new();
        store.write_json(&path(Stage::Candidates(0)), &json!([])).await.unwrap();
        store.write_json(&path(Stage::Candidates(1)), &json!([])).await.unwrap();
        store.write_json(&path(Stage::Embeddings), &json!({})).await.unwrap();

        let candidates = store.list("run-1/candidates/").await.unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].stage, Stage::Candidates(0));
    }

    #[tokio::test]
    async fn test_bus_delivers_and_records() {
        let bus = MemoryBus::new();
        let mut rx = bus.subscribe();
        let event = PipelineEvent::BatchFailed {
            batch_id: Uuid::nil(),
            stage: "decide".into(),
            error: "boom".into(),
        };

        bus.publish(event.clone()).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), event);
        assert_eq!(bus.published(), vec![event]);
    }

    #[tokio::test]
    async fn test_bus_without_subscribers() {
        let bus = MemoryBus::new();
        let event = PipelineEvent::BatchFailed {
            batch_id: Uuid::nil(),
            stage: "group".into(),
            error: "x".into(),
        };
        assert!(bus.publish(event).await.is_ok());
        assert_eq!(bus.published().len(), 1);
    }
}
