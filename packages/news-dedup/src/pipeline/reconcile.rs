//! Union of redundant extraction candidates.
//!
//! The same source is extracted several times independently; each attempt
//! sees a slightly different subset of articles. Reconciliation keeps one
//! record per article id, in first-appearance order.

use indexmap::map::Entry;
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::types::article::Article;
use crate::types::config::RepresentativePolicy;

/// Merges extraction candidates by article identity.
#[derive(Debug, Clone, Default)]
pub struct CandidateReconciler {
    policy: RepresentativePolicy,
}

impl CandidateReconciler {
    pub fn new(policy: RepresentativePolicy) -> Self {
        Self { policy }
    }

    /// Union of all candidates by id.
    ///
    /// Ids are recomputed from URLs; articles without a usable URL are
    /// dropped. On collision the representative follows the configured
    /// policy. Idempotent: reconciling the output again changes nothing.
    pub fn reconcile(&self, candidates: &[Vec<Article>]) -> Vec<Article> {
        let mut merged: IndexMap<String, Article> = IndexMap::new();
        let mut skipped = 0usize;
        let mut replaced = 0usize;

        for article in candidates.iter().flatten() {
            let mut article = article.clone();
            if article.ensure_identity().is_err() {
                warn!(title = %article.title, "skipping article without a usable URL");
                skipped += 1;
                continue;
            }

            match merged.entry(article.id.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(article);
                }
                Entry::Occupied(mut slot) => {
                    if self.prefers(&article, slot.get()) {
                        slot.insert(article);
                        replaced += 1;
                    }
                }
            }
        }

        debug!(
            attempts = candidates.len(),
            unique = merged.len(),
            replaced,
            skipped,
            "reconciled candidates"
        );

        merged.into_values().collect()
    }

    /// Whether `challenger` should replace `current` for the same id.
    fn prefers(&self, challenger: &Article, current: &Article) -> bool {
        match self.policy {
            RepresentativePolicy::LongestBody => challenger.body_len() > current.body_len(),
            RepresentativePolicy::FirstSeen => false,
        }
    }
}
