//! News Article Deduplication Library
//!
//! Turns several redundant, noisy extractions of the same news source into
//! one canonical set of articles, one record per real-world story.
//!
//! # Design Philosophy
//!
//! **"Group cheaply, decide carefully"**
//!
//! - Identity is derived from the URL, never from model output
//! - Grouping is plain cosine similarity plus transitive closure
//! - Only multi-member groups reach the inference service
//! - When a decision cannot be obtained, articles are kept apart
//! - Artifacts are written only after a stage fully succeeds
//!
//! # Usage
//!
//! ```rust,ignore
//! use news_dedup::{DedupConfig, MemoryBus, MemoryContentStore, PipelineCoordinator};
//! use news_dedup::testing::MockInference;
//!
//! let coordinator = PipelineCoordinator::new(
//!     MemoryContentStore::new(),
//!     MemoryBus::new(),
//!     MockInference::new().merge_all(),
//!     DedupConfig::from_env()?,
//! )?;
//!
//! let batch = coordinator.submit_extraction_batch("2024-06-01T06", "ntv", urls)?;
//! let canonical = coordinator.run(&batch, &candidate_refs).await?;
//! ```
//!
//! # Modules
//!
//! - [`identity`] - Deterministic article ids from URLs
//! - [`pipeline`] - Reconciliation, grouping, decisions and the coordinator
//! - [`inference`] - Retry/backoff client around the inference service
//! - [`traits`] - Collaborator abstractions (ContentStore, MessageBus, InferenceService)
//! - [`types`] - Articles, groups, decisions, artifacts and configuration
//! - [`stores`] - In-memory store and bus
//! - [`security`] - API key handling
//! - [`testing`] - Mock inference and test scenarios

pub mod error;
pub mod identity;
pub mod inference;
pub mod pipeline;
pub mod security;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

#[cfg(feature = "openai")]
pub mod ai;

// Re-export core types at crate root
pub use error::{DedupError, ErrorKind, InferenceError, InferenceResult, Result};
pub use identity::{article_id, normalize_url};
pub use traits::{
    bus::MessageBus,
    inference::{InferenceRequest, InferenceResponse, InferenceService},
    store::{read_artifact, write_artifact, ContentStore},
};
pub use types::{
    article::{Article, MergeMetadata, SourceType},
    artifact::{
        ArticleEmbeddings, ArtifactPath, BatchRef, BatchStatus, CandidateArticles,
        CanonicalArticles, DedupLogEntry, EmbeddingSnapshot, GroupedArticles, GroupedEntry,
        PipelineEvent, SingletonArticles, Stage,
    },
    config::{CrossRunConfig, DedupConfig, RepresentativePolicy, RetryPolicy},
    decision::{Decision, MergeDecision},
    group::{ArticleGroup, CandidatePair},
};

// Re-export pipeline components
pub use pipeline::{
    apply, pre_filter, snapshot, CandidateReconciler, CrossRunDeduplicator, MergeDecisionService,
    PipelineCoordinator, SimilarityGrouper,
};

pub use inference::{BatchCallState, BatchInferenceClient, CallStatus};
pub use security::{ApiKeyCache, SecretString};
pub use stores::{MemoryBus, MemoryContentStore};

// Re-export testing utilities
pub use testing::{MockInference, TestScenario};

#[cfg(feature = "openai")]
pub use ai::OpenAiInference;
