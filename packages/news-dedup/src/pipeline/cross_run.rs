//! Cross-run deduplication.
//!
//! Stories keep being republished for days. Each run's embeddings are kept
//! as an [`EmbeddingSnapshot`]; new articles too close to anything in an
//! earlier snapshot are dropped before grouping. Thresholds are per region
//! because overlap between outlets differs a lot by market.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::{debug, info};

use crate::error::{DedupError, Result};
use crate::pipeline::grouping::cosine_similarity;
use crate::types::article::Article;
use crate::types::artifact::{DedupLogEntry, EmbeddingSnapshot, SnapshotEntry};
use crate::types::config::CrossRunConfig;

/// Articles that survived cross-run dedup, with their embeddings still aligned.
#[derive(Debug, Clone, Default)]
pub struct CrossRunOutcome {
    pub articles: Vec<Article>,
    pub embeddings: Vec<Vec<f32>>,
    pub dropped: Vec<DedupLogEntry>,
}

/// Drops articles already seen in earlier runs.
#[derive(Debug, Clone)]
pub struct CrossRunDeduplicator {
    config: CrossRunConfig,
}

impl CrossRunDeduplicator {
    pub fn new(config: CrossRunConfig) -> Self {
        Self { config }
    }

    /// Threshold used for an article's region.
    pub fn threshold_for(&self, region: &str) -> f32 {
        self.config.threshold_for(region)
    }

    /// Compare each article against every earlier snapshot entry.
    ///
    /// An article is dropped when its best match reaches its region's
    /// threshold. `embeddings` must be aligned with `articles`.
    pub fn deduplicate(
        &self,
        articles: Vec<Article>,
        embeddings: Vec<Vec<f32>>,
        previous: &[EmbeddingSnapshot],
    ) -> Result<CrossRunOutcome> {
        if articles.len() != embeddings.len() {
            return Err(DedupError::invalid(format!(
                "{} articles but {} embeddings",
                articles.len(),
                embeddings.len()
            )));
        }

        let prior: Vec<(&str, &SnapshotEntry)> = previous
            .iter()
            .flat_map(|s| s.entries.iter().map(move |e| (s.run_id.as_str(), e)))
            .collect();

        if prior.is_empty() {
            return Ok(CrossRunOutcome {
                articles,
                embeddings,
                dropped: Vec::new(),
            });
        }

        let mut outcome = CrossRunOutcome::default();
        // region -> (kept, dropped)
        let mut stats: BTreeMap<String, (usize, usize)> = BTreeMap::new();

        for (article, embedding) in articles.into_iter().zip(embeddings) {
            let threshold = self.threshold_for(&article.region);
            let best = prior
                .iter()
                .map(|(run_id, entry)| (*run_id, *entry, cosine_similarity(&embedding, &entry.embedding)))
                .max_by(|a, b| a.2.total_cmp(&b.2));

            let region_stats = stats.entry(article.region.clone()).or_default();

            match best {
                Some((run_id, entry, similarity)) if similarity >= threshold => {
                    debug!(
                        similarity,
                        threshold,
                        region = %article.region,
                        url = %article.url,
                        matched_url = %entry.url,
                        "dropping cross-run duplicate"
                    );
                    outcome.dropped.push(DedupLogEntry {
                        article_id: article.id.clone(),
                        url: article.url.clone(),
                        title: article.title.chars().take(100).collect(),
                        region: article.region.clone(),
                        matched_article_id: entry.article_id.clone(),
                        matched_url: entry.url.clone(),
                        matched_run_id: run_id.to_string(),
                        similarity,
                        threshold,
                    });
                    region_stats.1 += 1;
                }
                _ => {
                    outcome.articles.push(article);
                    outcome.embeddings.push(embedding);
                    region_stats.0 += 1;
                }
            }
        }

        for (region, (kept, dropped)) in &stats {
            info!(
                region = %region,
                threshold = self.threshold_for(region),
                kept,
                dropped,
                "cross-run dedup"
            );
        }

        Ok(outcome)
    }
}

/// Snapshot a run's articles and embeddings for later comparison.
pub fn snapshot(
    run_id: &str,
    source: &str,
    articles: &[Article],
    embeddings: &[Vec<f32>],
) -> EmbeddingSnapshot {
    EmbeddingSnapshot {
        run_id: run_id.to_string(),
        source: source.to_string(),
        created_at: Utc::now(),
        entries: articles
            .iter()
            .zip(embeddings)
            .map(|(article, embedding)| SnapshotEntry {
                article_id: article.id.clone(),
                url: article.url.clone(),
                title: article.title.clone(),
                region: article.region.clone(),
                embedding: embedding.clone(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::article;

    fn dedup() -> CrossRunDeduplicator {
        CrossRunDeduplicator::new(CrossRunConfig::default())
    }

    fn previous() -> Vec<EmbeddingSnapshot> {
        let old = vec![article("https://old.com/1", "Old", "b")];
        vec![snapshot("run-0", "ntv", &old, &[vec![1.0, 0.0]])]
    }

    #[test]
    fn test_no_history_keeps_everything() {
        let out = dedup()
            .deduplicate(vec![article("https://a.com/1", "t", "b")], vec![vec![1.0, 0.0]], &[])
            .unwrap();
        assert_eq!(out.articles.len(), 1);
        assert!(out.dropped.is_empty());
    }

    #[test]
    fn test_region_thresholds() {
        // cos([1,0],[0.88,0.475]) ~ 0.88: above tr (0.85), below eu (0.9)
        let near = vec![0.88, 0.475];
        let tr = article("https://a.com/tr", "t", "b").with_region("tr");
        let eu = article("https://a.com/eu", "t", "b").with_region("eu");
        let unknown = article("https://a.com/us", "t", "b").with_region("us");

        let out = dedup()
            .deduplicate(
                vec![tr, eu, unknown],
                vec![near.clone(), near.clone(), near],
                &previous(),
            )
            .unwrap();

        assert_eq!(out.dropped.len(), 1);
        assert_eq!(out.dropped[0].url, "https://a.com/tr");
        assert_eq!(out.dropped[0].matched_url, "https://old.com/1");
        assert_eq!(out.dropped[0].matched_run_id, "run-0");
        assert_eq!(out.dropped[0].threshold, 0.85);
        assert_eq!(out.articles.len(), 2);
        assert_eq!(out.embeddings.len(), 2);
    }

    #[test]
    fn test_exact_repeat_dropped() {
        let same = article("https://a.com/1", "t", "b").with_region("eu");
        let out = dedup()
            .deduplicate(vec![same], vec![vec![2.0, 0.0]], &previous())
            .unwrap();
        assert_eq!(out.dropped.len(), 1);
        assert!(out.articles.is_empty());
    }

    #[test]
    fn test_misaligned_input() {
        let result = dedup().deduplicate(vec![article("https://a.com/1", "t", "b")], vec![], &[]);
        assert!(matches!(result, Err(DedupError::InvalidInput { .. })));
    }
}
