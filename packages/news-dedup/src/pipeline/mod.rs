//! The dedup pipeline.
//!
//! Stages, in the order a batch goes through them:
//! - Reconcile: union of redundant extraction candidates by identity
//! - Pre-filter: drop exact URL/title repeats
//! - Cross-run: drop repeats of earlier runs (optional)
//! - Group: similarity matrix and transitive grouping
//! - Decide: MERGE / KEEP_BOTH per group via the inference service
//! - Apply: collapse merged groups into canonical articles
//!
//! [`PipelineCoordinator`] sequences them through a content store and bus.

pub mod coordinator;
pub mod cross_run;
pub mod decide;
pub mod grouping;
pub mod prefilter;
pub mod prompts;
pub mod reconcile;

pub use coordinator::PipelineCoordinator;
pub use cross_run::{snapshot, CrossRunDeduplicator, CrossRunOutcome};
pub use decide::{apply, dedup_by_id, MergeDecisionService};
pub use grouping::{cosine_similarity, SimilarityGrouper, SimilarityMatrix, UnionFind};
pub use prefilter::{loose_url_key, pre_filter, title_key};
pub use prompts::{
    decision_prompt_hash, decision_response_schema, format_decision_prompt, DECISION_PROMPT,
    DECISION_SYSTEM_PROMPT,
};
pub use reconcile::CandidateReconciler;
