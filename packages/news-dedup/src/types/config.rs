//! Configuration types for reconciliation, grouping and decisions.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DedupError, Result};

/// Default cosine similarity floor for grouping.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.80;

/// How to pick the representative when the same id shows up in several
/// extraction candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepresentativePolicy {
    /// Keep the version with the strictly longer body; ties keep the first seen.
    #[default]
    LongestBody,
    /// Always keep the first version seen.
    FirstSeen,
}

/// Retry and throttling settings for inference calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = max_retries + 1).
    pub max_retries: u32,

    /// Delay before retry n is `base_delay * 2^n`.
    pub base_delay_ms: u64,

    /// Hard upper bound for a single attempt.
    pub call_timeout_ms: u64,

    /// Optional ceiling on calls per second across one client.
    pub requests_per_second: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 10_000,
            call_timeout_ms: 120_000,
            requests_per_second: None,
        }
    }
}

impl RetryPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Backoff before the retry that follows failed attempt `attempt` (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    /// Set max retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Throttle calls to `rps` per second.
    pub fn with_requests_per_second(mut self, rps: u32) -> Self {
        self.requests_per_second = Some(rps);
        self
    }
}

/// Cross-run deduplication against embeddings of earlier runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossRunConfig {
    pub enabled: bool,

    /// Similarity at or above which an article is a repeat, per region.
    pub region_thresholds: HashMap<String, f32>,

    /// Region whose threshold applies to unknown regions.
    pub fallback_region: String,

    /// How many earlier snapshots of the same source to compare against.
    pub lookback_runs: usize,
}

impl Default for CrossRunConfig {
    fn default() -> Self {
        let mut region_thresholds = HashMap::new();
        region_thresholds.insert("tr".to_string(), 0.85);
        region_thresholds.insert("eu".to_string(), 0.9);

        Self {
            enabled: false,
            region_thresholds,
            fallback_region: "eu".to_string(),
            lookback_runs: 8,
        }
    }
}

impl CrossRunConfig {
    /// Threshold for a region, falling back to the fallback region's.
    pub fn threshold_for(&self, region: &str) -> f32 {
        self.region_thresholds
            .get(&region.to_lowercase())
            .or_else(|| self.region_thresholds.get(&self.fallback_region))
            .copied()
            .unwrap_or(0.9)
    }
}

/// Configuration for the dedup pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Cosine similarity floor for grouping, inclusive. Default: 0.80.
    pub similarity_threshold: f32,

    /// Representative choice on id collisions across candidates.
    pub representative_policy: RepresentativePolicy,

    /// Groups packed into a single decision request. Default: 5.
    pub decision_batch_size: usize,

    /// Decision requests in flight at once. Default: 4.
    pub max_concurrent_decisions: usize,

    /// Body characters sent per article in decision requests. Default: 1000.
    pub body_preview_chars: usize,

    /// Run the exact-duplicate pre-filter before grouping. Default: true.
    pub prefilter: bool,

    #[serde(default)]
    pub cross_run: CrossRunConfig,

    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            representative_policy: RepresentativePolicy::default(),
            decision_batch_size: 5,
            max_concurrent_decisions: 4,
            body_preview_chars: 1000,
            prefilter: true,
            cross_run: CrossRunConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl DedupConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `DEDUP_*` environment variables (and `.env` if present).
    ///
    /// Unset variables keep their defaults; unparsable ones are an error.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let mut cross_run = defaults.cross_run.clone();
        cross_run.enabled = parse_var(&lookup, "DEDUP_CROSS_RUN_ENABLED", cross_run.enabled)?;
        cross_run.lookback_runs =
            parse_var(&lookup, "DEDUP_CROSS_RUN_LOOKBACK", cross_run.lookback_runs)?;
        let tr = parse_var(&lookup, "CROSS_RUN_DEDUP_THRESHOLD_TR", cross_run.threshold_for("tr"))?;
        let eu = parse_var(&lookup, "CROSS_RUN_DEDUP_THRESHOLD_EU", cross_run.threshold_for("eu"))?;
        cross_run.region_thresholds.insert("tr".to_string(), tr);
        cross_run.region_thresholds.insert("eu".to_string(), eu);

        let retry = RetryPolicy {
            max_retries: parse_var(&lookup, "DEDUP_MAX_RETRIES", defaults.retry.max_retries)?,
            base_delay_ms: parse_var(&lookup, "DEDUP_BASE_DELAY_MS", defaults.retry.base_delay_ms)?,
            call_timeout_ms: parse_var(
                &lookup,
                "DEDUP_CALL_TIMEOUT_MS",
                defaults.retry.call_timeout_ms,
            )?,
            requests_per_second: match lookup("DEDUP_REQUESTS_PER_SECOND") {
                Some(raw) => Some(parse_value("DEDUP_REQUESTS_PER_SECOND", &raw)?),
                None => None,
            },
        };

        let config = Self {
            similarity_threshold: parse_var(
                &lookup,
                "DEDUP_SIMILARITY_THRESHOLD",
                defaults.similarity_threshold,
            )?,
            representative_policy: match lookup("DEDUP_REPRESENTATIVE_POLICY").as_deref() {
                None | Some("longest_body") => RepresentativePolicy::LongestBody,
                Some("first_seen") => RepresentativePolicy::FirstSeen,
                Some(other) => {
                    return Err(DedupError::Config(format!(
                        "DEDUP_REPRESENTATIVE_POLICY: unknown policy {other:?}"
                    )))
                }
            },
            decision_batch_size: parse_var(
                &lookup,
                "DEDUP_DECISION_BATCH_SIZE",
                defaults.decision_batch_size,
            )?,
            max_concurrent_decisions: parse_var(
                &lookup,
                "DEDUP_MAX_CONCURRENT_DECISIONS",
                defaults.max_concurrent_decisions,
            )?,
            body_preview_chars: parse_var(
                &lookup,
                "DEDUP_BODY_PREVIEW_CHARS",
                defaults.body_preview_chars,
            )?,
            prefilter: parse_var(&lookup, "DEDUP_PREFILTER", defaults.prefilter)?,
            cross_run,
            retry,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(DedupError::Config(format!(
                "similarity_threshold must be within [0, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.decision_batch_size == 0 {
            return Err(DedupError::Config("decision_batch_size must be > 0".into()));
        }
        if self.max_concurrent_decisions == 0 {
            return Err(DedupError::Config(
                "max_concurrent_decisions must be > 0".into(),
            ));
        }
        if self.retry.requests_per_second == Some(0) {
            return Err(DedupError::Config("requests_per_second must be > 0".into()));
        }
        Ok(())
    }

    /// Set the similarity threshold.
    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Set the representative policy.
    pub fn with_representative_policy(mut self, policy: RepresentativePolicy) -> Self {
        self.representative_policy = policy;
        self
    }

    /// Set the number of groups per decision request.
    pub fn with_decision_batch_size(mut self, size: usize) -> Self {
        self.decision_batch_size = size;
        self
    }

    /// Set the decision concurrency ceiling.
    pub fn with_max_concurrent_decisions(mut self, max: usize) -> Self {
        self.max_concurrent_decisions = max;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Enable cross-run deduplication.
    pub fn with_cross_run(mut self, cross_run: CrossRunConfig) -> Self {
        self.cross_run = cross_run;
        self
    }

    /// Toggle the exact-duplicate pre-filter.
    pub fn with_prefilter(mut self, enabled: bool) -> Self {
        self.prefilter = enabled;
        self
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| DedupError::Config(format!("{key}: cannot parse {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = DedupConfig::default();
        assert_eq!(config.similarity_threshold, 0.80);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay(), Duration::from_secs(10));
        assert_eq!(config.decision_batch_size, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backoff_doubles() {
        let retry = RetryPolicy::default().with_base_delay(Duration::from_secs(10));
        assert_eq!(retry.delay_for(0), Duration::from_secs(10));
        assert_eq!(retry.delay_for(1), Duration::from_secs(20));
        assert_eq!(retry.delay_for(2), Duration::from_secs(40));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = DedupConfig::from_lookup(lookup_from(&[
            ("DEDUP_SIMILARITY_THRESHOLD", "0.75"),
            ("DEDUP_MAX_RETRIES", "5"),
            ("DEDUP_REPRESENTATIVE_POLICY", "first_seen"),
            ("CROSS_RUN_DEDUP_THRESHOLD_TR", "0.8"),
        ]))
        .unwrap();

        assert_eq!(config.similarity_threshold, 0.75);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.representative_policy, RepresentativePolicy::FirstSeen);
        assert_eq!(config.cross_run.threshold_for("tr"), 0.8);
        assert_eq!(config.cross_run.threshold_for("eu"), 0.9);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result = DedupConfig::from_lookup(lookup_from(&[("DEDUP_MAX_RETRIES", "many")]));
        assert!(matches!(result, Err(DedupError::Config(_))));

        let result =
            DedupConfig::from_lookup(lookup_from(&[("DEDUP_SIMILARITY_THRESHOLD", "1.5")]));
        assert!(matches!(result, Err(DedupError::Config(_))));
    }

    #[test]
    fn test_unknown_region_uses_fallback() {
        let cross_run = CrossRunConfig::default();
        assert_eq!(cross_run.threshold_for("TR"), 0.85);
        assert_eq!(cross_run.threshold_for("us"), 0.9);
        assert_eq!(cross_run.threshold_for(""), 0.9);
    }
}
