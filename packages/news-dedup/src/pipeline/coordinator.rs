//! Stage sequencing through a content store and a message bus.
//!
//! ```text
//! submit_extraction_batch
//!        │  (extraction workers write candidates/{n} + embeddings)
//!        ▼
//! on_extraction_complete ── reconcile → pre-filter → cross-run → group
//!        │  writes grouped_articles, singleton_articles, publishes GroupsReady
//!        ▼
//! on_dedup_decision_ready ── decide → apply
//!           writes canonical_articles, publishes CanonicalReady
//! ```
//!
//! Every stage writes its artifacts only after all of its work succeeded,
//! so a failed stage leaves nothing behind and can simply be rerun.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{DedupError, Result};
use crate::inference::BatchInferenceClient;
use crate::pipeline::cross_run::{snapshot, CrossRunDeduplicator};
use crate::pipeline::decide::{apply, dedup_by_id, MergeDecisionService};
use crate::pipeline::grouping::SimilarityGrouper;
use crate::pipeline::prefilter::pre_filter;
use crate::pipeline::prompts::decision_prompt_hash;
use crate::pipeline::reconcile::CandidateReconciler;
use crate::traits::bus::MessageBus;
use crate::traits::inference::InferenceService;
use crate::traits::store::{read_artifact, write_artifact, ContentStore};
use crate::types::article::{Article, MergeMetadata};
use crate::types::artifact::{
    ArticleEmbeddings, ArtifactPath, BatchRef, BatchStatus, CandidateArticles, CanonicalArticles,
    EmbeddingSnapshot, GroupedArticles, GroupedEntry, PipelineEvent, SingletonArticles, Stage,
};
use crate::types::config::DedupConfig;
use crate::types::decision::{Decision, REASON_SINGLETON};
use crate::types::group::ArticleGroup;

fn poisoned<T>(_: std::sync::PoisonError<T>) -> DedupError {
    DedupError::Storage("batch registry lock poisoned".into())
}

/// Drives batches through grouping and merge decisions.
pub struct PipelineCoordinator<C, B, S> {
    store: C,
    bus: B,
    config: DedupConfig,
    grouper: SimilarityGrouper,
    reconciler: CandidateReconciler,
    cross_run: Option<CrossRunDeduplicator>,
    decider: MergeDecisionService<S>,
    batches: RwLock<HashMap<Uuid, (BatchRef, BatchStatus)>>,
}

impl<C, B, S> PipelineCoordinator<C, B, S>
where
    C: ContentStore,
    B: MessageBus,
    S: InferenceService,
{
    /// Build a coordinator. Fails on invalid configuration.
    pub fn new(store: C, bus: B, inference: S, config: DedupConfig) -> Result<Self> {
        config.validate()?;

        let client = BatchInferenceClient::new(inference, config.retry.clone())?;
        let decider = MergeDecisionService::new(client, &config);
        let cross_run = config
            .cross_run
            .enabled
            .then(|| CrossRunDeduplicator::new(config.cross_run.clone()));

        Ok(Self {
            store,
            bus,
            grouper: SimilarityGrouper::new(config.similarity_threshold)?,
            reconciler: CandidateReconciler::new(config.representative_policy),
            cross_run,
            decider,
            config,
            batches: RwLock::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &C {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Current status of a batch.
    pub fn status(&self, batch_id: Uuid) -> Option<BatchStatus> {
        self.batches
            .read()
            .ok()?
            .get(&batch_id)
            .map(|(_, status)| status.clone())
    }

    /// The batch registered under `batch_id`.
    pub fn batch(&self, batch_id: Uuid) -> Option<BatchRef> {
        self.batches
            .read()
            .ok()?
            .get(&batch_id)
            .map(|(batch_ref, _)| batch_ref.clone())
    }

    fn set_status(&self, batch_id: Uuid, status: BatchStatus) -> Result<()> {
        if let Some(entry) = self.batches.write().map_err(poisoned)?.get_mut(&batch_id) {
            entry.1 = status;
        }
        Ok(())
    }

    /// Register a batch of sources to be extracted.
    #[instrument(skip(self, source_refs), fields(refs = source_refs.len()))]
    pub fn submit_extraction_batch(
        &self,
        run_id: &str,
        source: &str,
        source_refs: Vec<String>,
    ) -> Result<BatchRef> {
        if source_refs.is_empty() {
            return Err(DedupError::invalid("extraction batch has no source refs"));
        }
        // Validates run id and source as path segments.
        ArtifactPath::new(run_id, Stage::Embeddings, source)?;

        let batch_ref = BatchRef {
            batch_id: Uuid::new_v4(),
            run_id: run_id.to_string(),
            source: source.to_string(),
            source_refs,
        };

        self.batches
            .write()
            .map_err(poisoned)?
            .insert(batch_ref.batch_id, (batch_ref.clone(), BatchStatus::Submitted));

        info!(batch_id = %batch_ref.batch_id, "extraction batch submitted");
        Ok(batch_ref)
    }

    /// Dispatch a bus event to the stage it triggers.
    pub async fn handle(&self, event: &PipelineEvent) -> Result<()> {
        match event {
            PipelineEvent::ExtractionCompleted {
                batch_id,
                candidate_refs,
            } => {
                let batch_ref = self.batch(*batch_id).ok_or_else(|| {
                    DedupError::invalid(format!("unknown batch {batch_id}"))
                })?;
                self.on_extraction_complete(&batch_ref, candidate_refs)
                    .await
                    .map(|_| ())
            }
            PipelineEvent::GroupsReady { groups_ref, .. } => self
                .on_dedup_decision_ready(groups_ref)
                .await
                .map(|_| ()),
            PipelineEvent::CanonicalReady { .. } | PipelineEvent::BatchFailed { .. } => Ok(()),
        }
    }

    /// Group the reconciled candidates of a batch.
    ///
    /// Returns the path of the `grouped_articles` artifact.
    #[instrument(skip(self, batch_ref, candidate_refs), fields(batch_id = %batch_ref.batch_id, run_id = %batch_ref.run_id, source = %batch_ref.source))]
    pub async fn on_extraction_complete(
        &self,
        batch_ref: &BatchRef,
        candidate_refs: &[ArtifactPath],
    ) -> Result<ArtifactPath> {
        match self.group_stage(batch_ref, candidate_refs).await {
            Ok(groups_ref) => {
                self.set_status(batch_ref.batch_id, BatchStatus::Grouped)?;
                self.bus
                    .publish(PipelineEvent::GroupsReady {
                        batch_id: batch_ref.batch_id,
                        groups_ref: groups_ref.clone(),
                    })
                    .await?;
                Ok(groups_ref)
            }
            Err(err) => {
                warn!(error = %err, "grouping stage rejected batch");
                self.set_status(
                    batch_ref.batch_id,
                    BatchStatus::Failed {
                        stage: "group".into(),
                        error: err.to_string(),
                    },
                )?;
                Err(err)
            }
        }
    }

    async fn group_stage(
        &self,
        batch_ref: &BatchRef,
        candidate_refs: &[ArtifactPath],
    ) -> Result<ArtifactPath> {
        if candidate_refs.is_empty() {
            return Err(DedupError::invalid("no candidate artifacts"));
        }

        let mut candidates = Vec::with_capacity(candidate_refs.len());
        for path in candidate_refs {
            let mut payload: CandidateArticles = read_artifact(&self.store, path).await?;
            payload.articles.iter_mut().for_each(Article::fill_defaults);
            candidates.push(payload.articles);
        }

        let mut articles = self.reconciler.reconcile(&candidates);
        if self.config.prefilter {
            articles = pre_filter(articles).0;
        }
        if articles.is_empty() {
            return Err(DedupError::invalid("candidates contain no usable articles"));
        }

        let path = |stage| ArtifactPath::new(&batch_ref.run_id, stage, &batch_ref.source);

        let embeddings_path = path(Stage::Embeddings)?;
        let stored: ArticleEmbeddings = read_artifact(&self.store, &embeddings_path).await?;
        let mut embeddings = Vec::with_capacity(articles.len());
        for article in &articles {
            let embedding = stored.embeddings.get(&article.id).ok_or_else(|| {
                DedupError::invalid(format!(
                    "no embedding for article {} ({})",
                    article.id, article.url
                ))
            })?;
            embeddings.push(embedding.clone());
        }

        let mut dedup_log = None;
        let mut run_snapshot = None;
        if let Some(cross_run) = &self.cross_run {
            // Snapshot before dropping: repeats stay visible to later runs.
            run_snapshot = Some(snapshot(
                &batch_ref.run_id,
                &batch_ref.source,
                &articles,
                &embeddings,
            ));
            let previous = self.previous_snapshots(batch_ref).await?;
            let outcome = cross_run.deduplicate(articles, embeddings, &previous)?;
            articles = outcome.articles;
            embeddings = outcome.embeddings;
            dedup_log = Some(outcome.dropped);

            if articles.is_empty() {
                return Err(DedupError::invalid(
                    "every article repeats an earlier run",
                ));
            }
        }

        let groups = self.grouper.group_articles(&embeddings)?;

        let mut grouped = Vec::new();
        let mut singletons = Vec::new();
        for group in &groups {
            if group.is_singleton() {
                let mut article = articles[group.article_indices[0]].clone();
                article.merge_metadata = Some(MergeMetadata {
                    decision: Decision::KeepBoth,
                    reason: REASON_SINGLETON.to_string(),
                    group_id: group.group_id,
                });
                singletons.push(article);
            } else {
                grouped.push(GroupedEntry {
                    group_id: group.group_id,
                    max_similarity: group.max_similarity,
                    articles: group
                        .article_indices
                        .iter()
                        .map(|&i| articles[i].clone())
                        .collect(),
                });
            }
        }

        let grouped = GroupedArticles::new(batch_ref.batch_id, grouped);
        let singletons = SingletonArticles::new(singletons);

        let groups_ref = path(Stage::GroupedArticles)?;
        write_artifact(&self.store, &groups_ref, &grouped).await?;
        write_artifact(&self.store, &path(Stage::SingletonArticles)?, &singletons).await?;

        if let (Some(dropped), Some(snap)) = (dedup_log, run_snapshot) {
            write_artifact(&self.store, &path(Stage::DedupLog)?, &dropped).await?;
            write_artifact(&self.store, &path(Stage::EmbeddingSnapshot)?, &snap).await?;
        }

        info!(
            articles = articles.len(),
            groups = grouped.group_count,
            grouped_articles = grouped.total_articles,
            singletons = singletons.count,
            "grouping complete"
        );

        Ok(groups_ref)
    }

    /// Snapshots of earlier runs for the same source, newest first.
    async fn previous_snapshots(&self, batch_ref: &BatchRef) -> Result<Vec<EmbeddingSnapshot>> {
        let mut paths: Vec<ArtifactPath> = self
            .store
            .list("")
            .await?
            .into_iter()
            .filter(|p| {
                p.stage == Stage::EmbeddingSnapshot
                    && p.source == batch_ref.source
                    && p.run_id != batch_ref.run_id
            })
            .collect();
        paths.sort_by(|a, b| b.run_id.cmp(&a.run_id));
        paths.truncate(self.config.cross_run.lookback_runs);

        let mut snapshots = Vec::with_capacity(paths.len());
        for path in &paths {
            snapshots.push(read_artifact(&self.store, path).await?);
        }
        Ok(snapshots)
    }

    /// Decide and apply merges for a grouped artifact.
    ///
    /// Returns the canonical articles (merged survivors and singletons).
    /// Once `canonical_articles` exists its decisions are final: a rerun
    /// returns the stored articles without calling the inference service.
    #[instrument(skip(self, groups_ref), fields(groups_ref = %groups_ref))]
    pub async fn on_dedup_decision_ready(&self, groups_ref: &ArtifactPath) -> Result<Vec<Article>> {
        let canonical_ref = groups_ref.sibling(Stage::CanonicalArticles);
        if self.store.exists(&canonical_ref).await? {
            let committed: CanonicalArticles = read_artifact(&self.store, &canonical_ref).await?;
            info!(
                batch_id = %committed.batch_id,
                canonical = committed.count,
                "canonical articles already committed, skipping decisions"
            );
            self.set_status(committed.batch_id, BatchStatus::Completed)?;
            return Ok(committed.articles);
        }

        let grouped: GroupedArticles = read_artifact(&self.store, groups_ref).await?;
        let batch_id = grouped.batch_id;

        let mut articles = Vec::with_capacity(grouped.total_articles);
        let mut groups = Vec::with_capacity(grouped.groups.len());
        for entry in grouped.groups {
            let start = articles.len();
            articles.extend(entry.articles);
            groups.push(ArticleGroup::new(
                entry.group_id,
                (start..articles.len()).collect(),
                entry.max_similarity,
            ));
        }

        let decisions = match self.decider.decide(&groups, &articles).await {
            Ok(decisions) => decisions,
            Err(err) => {
                error!(batch_id = %batch_id, error = %err, "merge decisions failed, batch marked failed");
                self.set_status(
                    batch_id,
                    BatchStatus::Failed {
                        stage: "decide".into(),
                        error: err.to_string(),
                    },
                )?;
                self.bus
                    .publish(PipelineEvent::BatchFailed {
                        batch_id,
                        stage: "decide".into(),
                        error: err.to_string(),
                    })
                    .await?;
                return Err(err);
            }
        };

        let survivors = apply(&groups, &articles, &decisions)?;

        let singletons: SingletonArticles =
            read_artifact(&self.store, &groups_ref.sibling(Stage::SingletonArticles)).await?;

        let mut canonical = survivors;
        canonical.extend(singletons.articles);
        let canonical = dedup_by_id(canonical);

        let payload = CanonicalArticles {
            batch_id,
            count: canonical.len(),
            articles: canonical,
            decisions,
            prompt_hash: decision_prompt_hash(),
        };
        write_artifact(&self.store, &canonical_ref, &payload).await?;

        self.set_status(batch_id, BatchStatus::Completed)?;
        self.bus
            .publish(PipelineEvent::CanonicalReady {
                batch_id,
                canonical_ref,
            })
            .await?;

        info!(
            batch_id = %batch_id,
            canonical = payload.count,
            merged = payload.decisions.iter().filter(|d| d.decision == Decision::Merge).count(),
            "canonical articles written"
        );

        Ok(payload.articles)
    }

    /// Run both stages for a batch whose candidates are already stored.
    pub async fn run(
        &self,
        batch_ref: &BatchRef,
        candidate_refs: &[ArtifactPath],
    ) -> Result<Vec<Article>> {
        let groups_ref = self.on_extraction_complete(batch_ref, candidate_refs).await?;
        self.on_dedup_decision_ready(&groups_ref).await
    }
}
