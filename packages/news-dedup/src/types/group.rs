//! Similarity groups and candidate pairs.

use serde::{Deserialize, Serialize};

/// A set of articles transitively connected by similarity >= threshold.
///
/// Indices point into the batch the grouper was run on. Groups are built
/// once per grouping run and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleGroup {
    /// Position of this group in the sorted grouping output
    pub group_id: usize,

    /// Member positions, ascending
    pub article_indices: Vec<usize>,

    /// Highest pairwise similarity among members (0.0 for singletons)
    pub max_similarity: f32,
}

impl ArticleGroup {
    /// Create a group.
    pub fn new(group_id: usize, article_indices: Vec<usize>, max_similarity: f32) -> Self {
        Self {
            group_id,
            article_indices,
            max_similarity,
        }
    }

    /// Number of members.
    pub fn size(&self) -> usize {
        self.article_indices.len()
    }

    /// Whether the group has a single member.
    pub fn is_singleton(&self) -> bool {
        self.size() == 1
    }

    /// Lowest member index (used for deterministic ordering).
    pub fn first_index(&self) -> usize {
        self.article_indices.first().copied().unwrap_or(usize::MAX)
    }
}

/// A pair of articles at or above the similarity threshold.
///
/// Diagnostics only; grouping uses full transitive closure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePair {
    pub article_a_idx: usize,
    pub article_b_idx: usize,
    pub similarity: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_singleton() {
        let group = ArticleGroup::new(0, vec![3], 0.0);
        assert!(group.is_singleton());
        assert_eq!(group.size(), 1);
        assert_eq!(group.first_index(), 3);

        let pair = ArticleGroup::new(1, vec![0, 4], 0.93);
        assert!(!pair.is_singleton());
    }
}
