//! Prompts for the merge decision stage.

use schemars::schema_for;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::types::decision::{DecisionRequestPayload, DecisionResponseSchema};

/// System instructions for merge decisions.
pub const DECISION_SYSTEM_PROMPT: &str =
    "You are a news editor reviewing clusters of near-duplicate articles. Answer with JSON only.";

/// Prompt for deciding whether each group of similar articles is one story.
pub const DECISION_PROMPT: &str = r#"Each group below contains articles whose text embeddings are highly similar.
For every group, decide whether its articles report the same story.

Answer MERGE when the articles cover the same event:
- the same match result, transfer, signing or announcement
- the same press conference or statement
- near-identical copies with small wording changes

Answer KEEP_BOTH when the articles are related but distinct:
- a match report next to a player interview
- breaking news next to a longer analysis
- different aspects of a broader topic
- clearly different sources of information or perspectives

Rules:
- Return one entry per group, using the group_id you were given.
- For MERGE, set primary_article_id to the article_id of the most complete
  article in that group (and primary_article_url to its url).
- For KEEP_BOTH, leave primary_article_id and primary_article_url null.
- Give a short reason for every decision.

Respond with a single JSON object with a "decisions" array.

Groups:
```json
{groups}
```"#;

/// Hash of the decision prompt, for tagging outputs produced with it.
pub fn decision_prompt_hash() -> String {
    let mut hasher = Sha256::new();
    hasher.update(DECISION_PROMPT.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Format the decision prompt with the groups payload.
pub fn format_decision_prompt(payload: &DecisionRequestPayload) -> Result<String> {
    let groups = serde_json::to_string_pretty(payload)?;
    Ok(DECISION_PROMPT.replace("{groups}", &groups))
}

/// JSON schema of the expected response.
pub fn decision_response_schema() -> Value {
    serde_json::to_value(schema_for!(DecisionResponseSchema)).unwrap_or(Value::Null)
}
