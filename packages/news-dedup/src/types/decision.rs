//! Merge decisions and the payloads exchanged with the decision service.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reason recorded when no usable verdict came back for a group.
pub const REASON_DECISION_UNAVAILABLE: &str = "decision_unavailable";

/// Reason recorded for single-member groups.
pub const REASON_SINGLETON: &str = "singleton";

/// Verdict for a group of similar articles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// Same story: collapse the group into its primary article.
    Merge,
    /// Different angles: keep every member.
    KeepBoth,
}

impl Decision {
    /// Parse the wire form (`MERGE` / `KEEP_BOTH`), case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "MERGE" => Some(Decision::Merge),
            "KEEP_BOTH" => Some(Decision::KeepBoth),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Merge => "MERGE",
            Decision::KeepBoth => "KEEP_BOTH",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The validated outcome for one group.
///
/// For `Merge`, `primary_article_id`/`primary_article_url` name the survivor
/// and `merged_from_urls` lists every other member. For `KeepBoth` both
/// primary fields are `None` and `merged_from_urls` is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeDecision {
    pub group_id: usize,
    pub decision: Decision,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_article_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_article_url: Option<String>,
    #[serde(default)]
    pub merged_from_urls: Vec<String>,
}

impl MergeDecision {
    /// Keep every member of the group.
    pub fn keep_both(group_id: usize, reason: impl Into<String>) -> Self {
        Self {
            group_id,
            decision: Decision::KeepBoth,
            reason: reason.into(),
            primary_article_id: None,
            primary_article_url: None,
            merged_from_urls: Vec::new(),
        }
    }

    /// Deterministic fallback when no verdict is available.
    pub fn unavailable(group_id: usize) -> Self {
        Self::keep_both(group_id, REASON_DECISION_UNAVAILABLE)
    }

    /// Collapse the group into `primary`.
    pub fn merge(
        group_id: usize,
        reason: impl Into<String>,
        primary_article_id: impl Into<String>,
        primary_article_url: impl Into<String>,
        merged_from_urls: Vec<String>,
    ) -> Self {
        Self {
            group_id,
            decision: Decision::Merge,
            reason: reason.into(),
            primary_article_id: Some(primary_article_id.into()),
            primary_article_url: Some(primary_article_url.into()),
            merged_from_urls,
        }
    }

    /// Whether this decision is the fallback rather than a real verdict.
    pub fn is_fallback(&self) -> bool {
        self.decision == Decision::KeepBoth && self.reason == REASON_DECISION_UNAVAILABLE
    }
}

/// One article as presented to the decision service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionArticleInput {
    pub article_id: String,
    pub url: String,
    pub title: String,
    pub body: String,
    pub source: String,
}

/// One group as presented to the decision service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionGroupInput {
    pub group_id: usize,
    pub max_similarity: f32,
    pub articles: Vec<DecisionArticleInput>,
}

/// The payload embedded in a decision prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequestPayload {
    pub groups: Vec<DecisionGroupInput>,
}

/// A decision entry as returned by the service, before validation.
///
/// Every field is optional so one bad entry does not prevent reading
/// its siblings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDecision {
    #[serde(default)]
    pub group_id: Option<usize>,
    #[serde(default)]
    pub decision: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub primary_article_id: Option<String>,
    #[serde(default)]
    pub primary_article_url: Option<String>,
}

/// Response shape requested from the service (also used to build the schema).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DecisionResponseSchema {
    pub decisions: Vec<DecisionEntrySchema>,
}

/// Schema of one decision entry.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DecisionEntrySchema {
    pub group_id: usize,
    pub decision: Decision,
    pub reason: String,
    /// Id of the best article when decision is MERGE
    pub primary_article_id: Option<String>,
    /// URL of the best article when decision is MERGE
    pub primary_article_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_wire_format() {
        assert_eq!(serde_json::to_string(&Decision::KeepBoth).unwrap(), "\"KEEP_BOTH\"");
        assert_eq!(Decision::parse("merge"), Some(Decision::Merge));
        assert_eq!(Decision::parse(" KEEP_BOTH "), Some(Decision::KeepBoth));
        assert_eq!(Decision::parse("PARTIAL_MERGE"), None);
    }

    #[test]
    fn test_unavailable_is_fallback() {
        let decision = MergeDecision::unavailable(7);
        assert!(decision.is_fallback());
        assert_eq!(decision.decision, Decision::KeepBoth);
        assert!(decision.merged_from_urls.is_empty());
        assert!(!MergeDecision::keep_both(7, "different angles").is_fallback());
    }
}
