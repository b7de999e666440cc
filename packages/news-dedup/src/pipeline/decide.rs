//! Merge decisions for similarity groups.
//!
//! Multi-member groups are sent to the inference service in small batches;
//! each answer is validated group by group. Anything unusable becomes a
//! KEEP_BOTH fallback so articles are never lost to a bad response.

use std::collections::HashMap;

use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{DedupError, InferenceError, Result};
use crate::identity::normalize_url;
use crate::inference::BatchInferenceClient;
use crate::pipeline::prompts::{
    decision_response_schema, format_decision_prompt, DECISION_SYSTEM_PROMPT,
};
use crate::traits::inference::{InferenceRequest, InferenceService};
use crate::types::article::{Article, MergeMetadata};
use crate::types::config::DedupConfig;
use crate::types::decision::{
    Decision, DecisionArticleInput, DecisionGroupInput, DecisionRequestPayload, MergeDecision,
    RawDecision, REASON_DECISION_UNAVAILABLE, REASON_SINGLETON,
};
use crate::types::group::ArticleGroup;

/// Sampling temperature for decision requests.
const DECISION_TEMPERATURE: f32 = 0.1;

/// Decides and applies MERGE / KEEP_BOTH verdicts.
pub struct MergeDecisionService<S> {
    client: BatchInferenceClient<S>,
    batch_size: usize,
    max_concurrent: usize,
    body_preview_chars: usize,
}

impl<S: InferenceService> MergeDecisionService<S> {
    pub fn new(client: BatchInferenceClient<S>, config: &DedupConfig) -> Self {
        Self {
            client,
            batch_size: config.decision_batch_size.max(1),
            max_concurrent: config.max_concurrent_decisions.max(1),
            body_preview_chars: config.body_preview_chars,
        }
    }

    /// The underlying inference client.
    pub fn client(&self) -> &BatchInferenceClient<S> {
        &self.client
    }

    /// One decision per group, in group order.
    ///
    /// Singletons are KEEP_BOTH without a service call. Multi-member groups
    /// are batched and decided concurrently. Malformed answers fall back to
    /// KEEP_BOTH; exhausted retries and fatal errors are returned after all
    /// requests have finished.
    pub async fn decide(
        &self,
        groups: &[ArticleGroup],
        articles: &[Article],
    ) -> Result<Vec<MergeDecision>> {
        check_indices(groups, articles)?;

        let pending: Vec<&ArticleGroup> = groups.iter().filter(|g| !g.is_singleton()).collect();
        let chunks: Vec<Vec<&ArticleGroup>> =
            pending.chunks(self.batch_size).map(|c| c.to_vec()).collect();

        info!(
            groups = groups.len(),
            multi = pending.len(),
            requests = chunks.len(),
            "deciding merge groups"
        );

        let results: Vec<Result<Vec<MergeDecision>>> = stream::iter(chunks)
            .map(|chunk| async move { self.decide_request(&chunk, articles).await })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let mut decided: HashMap<usize, MergeDecision> = HashMap::new();
        let mut first_error = None;
        for result in results {
            match result {
                Ok(decisions) => {
                    for decision in decisions {
                        decided.insert(decision.group_id, decision);
                    }
                }
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        Ok(groups
            .iter()
            .map(|group| {
                if group.is_singleton() {
                    MergeDecision::keep_both(group.group_id, REASON_SINGLETON)
                } else {
                    decided
                        .remove(&group.group_id)
                        .unwrap_or_else(|| MergeDecision::unavailable(group.group_id))
                }
            })
            .collect())
    }

    /// Decide one request's worth of groups.
    async fn decide_request(
        &self,
        groups: &[&ArticleGroup],
        articles: &[Article],
    ) -> Result<Vec<MergeDecision>> {
        let payload = DecisionRequestPayload {
            groups: groups
                .iter()
                .map(|g| self.group_input(g, articles))
                .collect(),
        };

        let request = InferenceRequest::new(format_decision_prompt(&payload)?)
            .with_system(DECISION_SYSTEM_PROMPT)
            .with_schema(decision_response_schema())
            .with_temperature(DECISION_TEMPERATURE);

        let response = match self.client.call(&request).await {
            Ok(value) => value,
            Err(InferenceError::MalformedResponse(raw)) => {
                warn!(
                    groups = ?group_ids(groups),
                    response = %raw,
                    "unparsable decision response, keeping groups apart"
                );
                return Ok(groups
                    .iter()
                    .map(|g| MergeDecision::unavailable(g.group_id))
                    .collect());
            }
            Err(err) => return Err(err.into()),
        };

        let entries = parse_entries(&response);
        if entries.is_none() {
            warn!(
                groups = ?group_ids(groups),
                response = %crate::inference::truncate(&response.to_string(), 500),
                "decision response has no decisions array"
            );
        }
        let entries = entries.unwrap_or_default();

        Ok(groups
            .iter()
            .map(|group| {
                let raw = entries.iter().find(|e| e.group_id == Some(group.group_id));
                match validate_entry(group, articles, raw) {
                    Ok(decision) => decision,
                    Err(err) => {
                        warn!(group_id = group.group_id, error = %err, "falling back to KEEP_BOTH");
                        MergeDecision::unavailable(group.group_id)
                    }
                }
            })
            .collect())
    }

    fn group_input(&self, group: &ArticleGroup, articles: &[Article]) -> DecisionGroupInput {
        DecisionGroupInput {
            group_id: group.group_id,
            max_similarity: group.max_similarity,
            articles: group
                .article_indices
                .iter()
                .map(|&i| {
                    let article = &articles[i];
                    DecisionArticleInput {
                        article_id: article.id.clone(),
                        url: article.url.clone(),
                        title: article.title.clone(),
                        body: article.body.chars().take(self.body_preview_chars).collect(),
                        source: article.source.clone(),
                    }
                })
                .collect(),
        }
    }
}

/// Apply decisions to a batch of articles.
///
/// KEEP_BOTH emits every member with `_merge_metadata` attached. MERGE
/// emits only the primary, with every other member's URL (and anything
/// those members had already absorbed) appended to `merged_from_urls`.
/// Groups without a decision are kept apart. Output is unique by id.
pub fn apply(
    groups: &[ArticleGroup],
    articles: &[Article],
    decisions: &[MergeDecision],
) -> Result<Vec<Article>> {
    check_indices(groups, articles)?;

    let by_group: HashMap<usize, &MergeDecision> =
        decisions.iter().map(|d| (d.group_id, d)).collect();

    let mut output: Vec<Article> = Vec::with_capacity(articles.len());
    let mut merged_groups = 0usize;

    for group in groups {
        let fallback;
        let decision = match by_group.get(&group.group_id) {
            Some(decision) => *decision,
            None => {
                fallback = MergeDecision::unavailable(group.group_id);
                &fallback
            }
        };

        let members: Vec<&Article> = group.article_indices.iter().map(|&i| &articles[i]).collect();
        let primary = match decision.decision {
            Decision::Merge => find_primary(
                &members,
                decision.primary_article_id.as_deref(),
                decision.primary_article_url.as_deref(),
            ),
            Decision::KeepBoth => None,
        };

        let metadata = if decision.decision == Decision::Merge && primary.is_none() {
            warn!(group_id = group.group_id, "MERGE primary not in group, keeping members apart");
            MergeMetadata {
                decision: Decision::KeepBoth,
                reason: REASON_DECISION_UNAVAILABLE.to_string(),
                group_id: group.group_id,
            }
        } else {
            MergeMetadata {
                decision: decision.decision,
                reason: decision.reason.clone(),
                group_id: group.group_id,
            }
        };

        match primary {
            Some(primary_idx) => {
                let mut survivor = members[primary_idx].clone();
                for (idx, member) in members.iter().enumerate() {
                    if idx == primary_idx {
                        continue;
                    }
                    survivor.absorb_url(&member.url);
                    for url in &member.merged_from_urls {
                        survivor.absorb_url(url);
                    }
                }
                survivor.merge_metadata = Some(metadata);
                output.push(survivor);
                merged_groups += 1;
            }
            None => {
                for member in members {
                    let mut article = member.clone();
                    article.merge_metadata = Some(metadata.clone());
                    output.push(article);
                }
            }
        }
    }

    let before = output.len();
    let output = dedup_by_id(output);
    debug!(
        merged_groups,
        emitted = output.len(),
        duplicates = before - output.len(),
        "applied merge decisions"
    );

    Ok(output)
}

/// Keep the first article for each id.
pub fn dedup_by_id(articles: Vec<Article>) -> Vec<Article> {
    let mut seen = std::collections::HashSet::new();
    articles
        .into_iter()
        .filter(|a| seen.insert(a.id.clone()))
        .collect()
}

fn check_indices(groups: &[ArticleGroup], articles: &[Article]) -> Result<()> {
    for group in groups {
        if group.article_indices.is_empty() {
            return Err(DedupError::invalid(format!(
                "group {} has no members",
                group.group_id
            )));
        }
        if let Some(&bad) = group.article_indices.iter().find(|&&i| i >= articles.len()) {
            return Err(DedupError::invalid(format!(
                "group {} references article {bad} of {}",
                group.group_id,
                articles.len()
            )));
        }
    }
    Ok(())
}

fn group_ids(groups: &[&ArticleGroup]) -> Vec<usize> {
    groups.iter().map(|g| g.group_id).collect()
}

/// Entries of the `decisions` array, skipping ones that are not objects.
fn parse_entries(response: &Value) -> Option<Vec<RawDecision>> {
    let decisions = response.get("decisions")?.as_array()?;
    Some(
        decisions
            .iter()
            .filter_map(|entry| serde_json::from_value::<RawDecision>(entry.clone()).ok())
            .collect(),
    )
}

/// Position of the primary among `members`, by id first, then by URL.
fn find_primary(members: &[&Article], id: Option<&str>, url: Option<&str>) -> Option<usize> {
    if let Some(id) = id.filter(|id| !id.trim().is_empty()) {
        if let Some(pos) = members.iter().position(|a| a.id == id.trim()) {
            return Some(pos);
        }
    }
    let url = normalize_url(url?);
    if url.is_empty() {
        return None;
    }
    members.iter().position(|a| normalize_url(&a.url) == url)
}

/// Turn a raw entry into a decision, or explain why it cannot be used.
fn validate_entry(
    group: &ArticleGroup,
    articles: &[Article],
    raw: Option<&RawDecision>,
) -> Result<MergeDecision> {
    let unavailable = |reason: &str| DedupError::DecisionUnavailable {
        group_id: group.group_id,
        reason: reason.to_string(),
    };

    let raw = raw.ok_or_else(|| unavailable("no entry for group"))?;
    let decision = raw
        .decision
        .as_deref()
        .and_then(Decision::parse)
        .ok_or_else(|| unavailable("missing or unknown decision"))?;
    let reason = raw
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| unavailable("missing reason"))?
        .to_string();

    match decision {
        Decision::KeepBoth => Ok(MergeDecision::keep_both(group.group_id, reason)),
        Decision::Merge => {
            let members: Vec<&Article> =
                group.article_indices.iter().map(|&i| &articles[i]).collect();
            let primary_idx = find_primary(
                &members,
                raw.primary_article_id.as_deref(),
                raw.primary_article_url.as_deref(),
            )
            .ok_or_else(|| unavailable("primary article is not a member of the group"))?;

            let primary = members[primary_idx];
            let merged_from_urls = members
                .iter()
                .enumerate()
                .filter(|(idx, _)| *idx != primary_idx)
                .map(|(_, a)| a.url.clone())
                .collect();

            Ok(MergeDecision::merge(
                group.group_id,
                reason,
                primary.id.clone(),
                primary.url.clone(),
                merged_from_urls,
            ))
        }
    }
}
