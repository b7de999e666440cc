//! Artifact payloads, paths and pipeline events.
//!
//! Every stage reads and writes JSON documents at
//! `{run_id}/{stage}/{source}.json`. The shapes below are what ends up in
//! the content store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DedupError, Result};
use crate::types::article::Article;
use crate::types::decision::MergeDecision;

/// Pipeline stage an artifact belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Output of the n-th independent extraction attempt
    Candidates(usize),
    Embeddings,
    GroupedArticles,
    SingletonArticles,
    CanonicalArticles,
    DedupLog,
    EmbeddingSnapshot,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Candidates(n) => write!(f, "candidates/{n}"),
            Stage::Embeddings => f.write_str("embeddings"),
            Stage::GroupedArticles => f.write_str("grouped_articles"),
            Stage::SingletonArticles => f.write_str("singleton_articles"),
            Stage::CanonicalArticles => f.write_str("canonical_articles"),
            Stage::DedupLog => f.write_str("dedup_log"),
            Stage::EmbeddingSnapshot => f.write_str("embedding_snapshot"),
        }
    }
}

impl FromStr for Stage {
    type Err = DedupError;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(n) = s.strip_prefix("candidates/") {
            let n = n
                .parse()
                .map_err(|_| DedupError::invalid(format!("bad candidate stage: {s}")))?;
            return Ok(Stage::Candidates(n));
        }
        match s {
            "embeddings" => Ok(Stage::Embeddings),
            "grouped_articles" => Ok(Stage::GroupedArticles),
            "singleton_articles" => Ok(Stage::SingletonArticles),
            "canonical_articles" => Ok(Stage::CanonicalArticles),
            "dedup_log" => Ok(Stage::DedupLog),
            "embedding_snapshot" => Ok(Stage::EmbeddingSnapshot),
            other => Err(DedupError::invalid(format!("unknown stage: {other}"))),
        }
    }
}

/// Location of an artifact in the content store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactPath {
    pub run_id: String,
    pub stage: Stage,
    pub source: String,
}

impl ArtifactPath {
    /// Build a path. Run ids and sources must be non-empty and slash-free.
    pub fn new(run_id: impl Into<String>, stage: Stage, source: impl Into<String>) -> Result<Self> {
        let run_id = run_id.into();
        let source = source.into();
        for (name, value) in [("run_id", &run_id), ("source", &source)] {
            if value.is_empty() || value.contains('/') {
                return Err(DedupError::invalid(format!(
                    "{name} must be non-empty and contain no '/': {value:?}"
                )));
            }
        }
        Ok(Self {
            run_id,
            stage,
            source,
        })
    }

    /// Same run and source, different stage.
    pub fn sibling(&self, stage: Stage) -> Self {
        Self {
            run_id: self.run_id.clone(),
            stage,
            source: self.source.clone(),
        }
    }

    /// Parse `{run_id}/{stage}/{source}.json`.
    pub fn parse(path: &str) -> Result<Self> {
        let bad = || DedupError::invalid(format!("malformed artifact path: {path}"));

        let without_ext = path.strip_suffix(".json").ok_or_else(bad)?;
        let (run_id, rest) = without_ext.split_once('/').ok_or_else(bad)?;
        let (stage, source) = rest.rsplit_once('/').ok_or_else(bad)?;

        Self::new(run_id, stage.parse()?, source)
    }
}

impl fmt::Display for ArtifactPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}.json", self.run_id, self.stage, self.source)
    }
}

impl TryFrom<String> for ArtifactPath {
    type Error = DedupError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ArtifactPath> for String {
    fn from(path: ArtifactPath) -> Self {
        path.to_string()
    }
}

/// Articles produced by one extraction attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateArticles {
    pub articles: Vec<Article>,
}

/// Embeddings keyed by article id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArticleEmbeddings {
    pub embeddings: IndexMap<String, Vec<f32>>,
}

/// One multi-member group as written to `grouped_articles`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupedEntry {
    pub group_id: usize,
    pub max_similarity: f32,
    pub articles: Vec<Article>,
}

/// The `grouped_articles` artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupedArticles {
    pub batch_id: Uuid,
    pub groups: Vec<GroupedEntry>,
    pub group_count: usize,
    pub total_articles: usize,
}

impl GroupedArticles {
    pub fn new(batch_id: Uuid, groups: Vec<GroupedEntry>) -> Self {
        let total_articles = groups.iter().map(|g| g.articles.len()).sum();
        Self {
            batch_id,
            group_count: groups.len(),
            groups,
            total_articles,
        }
    }
}

/// The `singleton_articles` artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingletonArticles {
    pub articles: Vec<Article>,
    pub count: usize,
}

impl SingletonArticles {
    pub fn new(articles: Vec<Article>) -> Self {
        Self {
            count: articles.len(),
            articles,
        }
    }
}

/// The `canonical_articles` artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalArticles {
    pub batch_id: Uuid,
    pub articles: Vec<Article>,
    pub count: usize,
    pub decisions: Vec<MergeDecision>,
    /// Hash of the decision prompt the decisions were made with
    #[serde(default)]
    pub prompt_hash: String,
}

/// One article's embedding kept for future cross-run comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub article_id: String,
    pub url: String,
    pub title: String,
    pub region: String,
    pub embedding: Vec<f32>,
}

/// Embeddings of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSnapshot {
    pub run_id: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<SnapshotEntry>,
}

/// Record of an article dropped as a repeat of an earlier run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupLogEntry {
    pub article_id: String,
    pub url: String,
    pub title: String,
    pub region: String,
    pub matched_article_id: String,
    pub matched_url: String,
    pub matched_run_id: String,
    pub similarity: f32,
    pub threshold: f32,
}

/// Handle for a submitted extraction batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRef {
    pub batch_id: Uuid,
    pub run_id: String,
    pub source: String,
    pub source_refs: Vec<String>,
}

/// Where a batch is in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum BatchStatus {
    Submitted,
    Grouped,
    Completed,
    Failed { stage: String, error: String },
}

/// Events published on the message bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    ExtractionCompleted {
        batch_id: Uuid,
        candidate_refs: Vec<ArtifactPath>,
    },
    GroupsReady {
        batch_id: Uuid,
        groups_ref: ArtifactPath,
    },
    CanonicalReady {
        batch_id: Uuid,
        canonical_ref: ArtifactPath,
    },
    BatchFailed {
        batch_id: Uuid,
        stage: String,
        error: String,
    },
}

impl PipelineEvent {
    pub fn batch_id(&self) -> Uuid {
        match self {
            PipelineEvent::ExtractionCompleted { batch_id, .. }
            | PipelineEvent::GroupsReady { batch_id, .. }
            | PipelineEvent::CanonicalReady { batch_id, .. }
            | PipelineEvent::BatchFailed { batch_id, .. } => *batch_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_layout() {
        let path = ArtifactPath::new("run-1", Stage::GroupedArticles, "ntv").unwrap();
        assert_eq!(path.to_string(), "run-1/grouped_articles/ntv.json");

        let candidates = path.sibling(Stage::Candidates(2));
        assert_eq!(candidates.to_string(), "run-1/candidates/2/ntv.json");
        assert_eq!(ArtifactPath::parse("run-1/candidates/2/ntv.json").unwrap(), candidates);
    }

    #[test]
    fn test_path_rejects_bad_parts() {
        assert!(ArtifactPath::new("", Stage::Embeddings, "ntv").is_err());
        assert!(ArtifactPath::new("run", Stage::Embeddings, "a/b").is_err());
        assert!(ArtifactPath::parse("run/embeddings/ntv").is_err());
        assert!(ArtifactPath::parse("run/unknown/ntv.json").is_err());
    }

    #[test]
    fn test_event_serializes_paths_as_strings() {
        let event = PipelineEvent::GroupsReady {
            batch_id: Uuid::nil(),
            groups_ref: ArtifactPath::new("r", Stage::GroupedArticles, "s").unwrap(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "groups_ready");
        assert_eq!(json["groups_ref"], "r/grouped_articles/s.json");

        let back: PipelineEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
