//! Message bus trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::artifact::PipelineEvent;

/// Publishes pipeline events to whoever drives the next stage.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, event: PipelineEvent) -> Result<()>;
}
