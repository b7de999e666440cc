//! Similarity matrix and transitive grouping.
//!
//! Articles are nodes; an edge joins every pair whose cosine similarity is
//! at or above the threshold. Groups are the connected components, found
//! with Union-Find, so A~B and B~C puts A, B and C together even when A and
//! C are far apart.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{DedupError, Result};
use crate::types::config::DEFAULT_SIMILARITY_THRESHOLD;
use crate::types::group::{ArticleGroup, CandidatePair};

/// Square matrix of pairwise cosine similarities.
pub type SimilarityMatrix = Vec<Vec<f32>>;

/// Cosine similarity between two vectors.
///
/// Zero-norm vectors are similar to nothing, themselves included.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Disjoint-set forest with path compression and union by rank.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    /// Root of `x`'s set, compressing the path on the way.
    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }

        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }

        root
    }

    /// Merge the sets containing `a` and `b`. Returns false if already joined.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return false;
        }

        match self.rank[root_a].cmp(&self.rank[root_b]) {
            std::cmp::Ordering::Less => self.parent[root_a] = root_b,
            std::cmp::Ordering::Greater => self.parent[root_b] = root_a,
            std::cmp::Ordering::Equal => {
                self.parent[root_b] = root_a;
                self.rank[root_a] += 1;
            }
        }
        true
    }
}

/// Groups articles by embedding similarity.
#[derive(Debug, Clone)]
pub struct SimilarityGrouper {
    threshold: f32,
}

impl Default for SimilarityGrouper {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

impl SimilarityGrouper {
    /// Create a grouper. Thresholds outside `[0, 1]` are rejected.
    pub fn new(threshold: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(DedupError::invalid(format!(
                "similarity threshold must be within [0, 1], got {threshold}"
            )));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Pairwise cosine similarity of every embedding.
    ///
    /// All embeddings must share one dimension.
    pub fn compute_similarity_matrix(&self, embeddings: &[Vec<f32>]) -> Result<SimilarityMatrix> {
        if let Some(first) = embeddings.first() {
            let dim = first.len();
            if let Some((idx, bad)) = embeddings.iter().enumerate().find(|(_, e)| e.len() != dim) {
                return Err(DedupError::invalid(format!(
                    "embedding {idx} has dimension {}, expected {dim}",
                    bad.len()
                )));
            }
        }

        let n = embeddings.len();
        let mut matrix = vec![vec![0.0; n]; n];
        for i in 0..n {
            matrix[i][i] = if embeddings[i].iter().any(|x| *x != 0.0) {
                1.0
            } else {
                0.0
            };
            for j in (i + 1)..n {
                let sim = cosine_similarity(&embeddings[i], &embeddings[j]);
                matrix[i][j] = sim;
                matrix[j][i] = sim;
            }
        }

        Ok(matrix)
    }

    /// Connected components of the threshold graph.
    ///
    /// Sorted by size (largest first), ties broken by lowest member index;
    /// `group_id` is the position in that order.
    pub fn form_groups(&self, matrix: &SimilarityMatrix, threshold: f32) -> Vec<ArticleGroup> {
        let n = matrix.len();
        if n == 0 {
            return Vec::new();
        }

        let mut uf = UnionFind::new(n);
        let mut edges = Vec::new();
        for (i, row) in matrix.iter().enumerate() {
            for (j, &sim) in row.iter().enumerate().skip(i + 1) {
                if sim >= threshold {
                    uf.union(i, j);
                    edges.push((i, sim));
                }
            }
        }

        // BTreeMap keyed by root keeps member lists ascending as we insert 0..n.
        let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..n {
            let root = uf.find(i);
            members.entry(root).or_default().push(i);
        }

        let mut max_sim: BTreeMap<usize, f32> = BTreeMap::new();
        for (i, sim) in edges {
            let root = uf.find(i);
            let entry = max_sim.entry(root).or_insert(sim);
            if sim > *entry {
                *entry = sim;
            }
        }

        // group_id is assigned after sorting
        let mut groups: Vec<ArticleGroup> = members
            .into_iter()
            .map(|(root, indices)| {
                ArticleGroup::new(0, indices, max_sim.get(&root).copied().unwrap_or(0.0))
            })
            .collect();
        groups.sort_by(|a, b| {
            b.size()
                .cmp(&a.size())
                .then(a.first_index().cmp(&b.first_index()))
        });

        let groups: Vec<ArticleGroup> = groups
            .into_iter()
            .enumerate()
            .map(|(group_id, group)| ArticleGroup { group_id, ..group })
            .collect();

        debug!(
            articles = n,
            groups = groups.len(),
            multi = groups.iter().filter(|g| !g.is_singleton()).count(),
            threshold,
            "formed groups"
        );

        groups
    }

    /// Every pair at or above `threshold` (or the configured threshold).
    ///
    /// Sorted by similarity descending, then by `(a, b)` ascending.
    pub fn get_candidate_pairs(
        &self,
        matrix: &SimilarityMatrix,
        threshold: Option<f32>,
    ) -> Vec<CandidatePair> {
        let threshold = threshold.unwrap_or(self.threshold);

        let mut pairs: Vec<CandidatePair> = matrix
            .iter()
            .enumerate()
            .flat_map(|(i, row)| {
                row.iter()
                    .enumerate()
                    .skip(i + 1)
                    .filter(move |&(_, &sim)| sim >= threshold)
                    .map(move |(j, &sim)| CandidatePair {
                        article_a_idx: i,
                        article_b_idx: j,
                        similarity: sim,
                    })
            })
            .collect();

        pairs.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(a.article_a_idx.cmp(&b.article_a_idx))
                .then(a.article_b_idx.cmp(&b.article_b_idx))
        });

        pairs
    }

    /// Matrix and grouping in one step with the configured threshold.
    pub fn group_articles(&self, embeddings: &[Vec<f32>]) -> Result<Vec<ArticleGroup>> {
        let matrix = self.compute_similarity_matrix(embeddings)?;
        Ok(self.form_groups(&matrix, self.threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn grouper() -> SimilarityGrouper {
        SimilarityGrouper::new(0.8).unwrap()
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_opposite_vectors() {
        let sim = cosine_similarity(&[1.0, 2.0, -0.5], &[-1.0, -2.0, 0.5]);
        assert!((sim + 1.0).abs() < 1e-6);

        let matrix = grouper()
            .compute_similarity_matrix(&[vec![0.6, 0.8], vec![-0.6, -0.8]])
            .unwrap();
        assert!((matrix[0][1] + 1.0).abs() < 1e-6);
        assert!((matrix[1][0] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_matrix_edge_cases() {
        let g = grouper();
        assert!(g.compute_similarity_matrix(&[]).unwrap().is_empty());

        let single = g.compute_similarity_matrix(&[vec![0.3, 0.4]]).unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0][0], 1.0);

        let with_zero = g
            .compute_similarity_matrix(&[vec![0.0, 0.0], vec![1.0, 0.0]])
            .unwrap();
        assert_eq!(with_zero[0][0], 0.0);
        assert_eq!(with_zero[0][1], 0.0);
        assert_eq!(with_zero[1][0], 0.0);
    }

    #[test]
    fn test_matrix_rejects_mismatched_dims() {
        let result = grouper().compute_similarity_matrix(&[vec![1.0, 0.0], vec![1.0]]);
        assert!(matches!(result, Err(DedupError::InvalidInput { .. })));
    }

    #[test]
    fn test_threshold_bounds() {
        assert!(SimilarityGrouper::new(0.0).is_ok());
        assert!(SimilarityGrouper::new(1.0).is_ok());
        assert!(SimilarityGrouper::new(1.01).is_err());
        assert!(SimilarityGrouper::new(-0.1).is_err());
    }

    #[test]
    fn test_three_article_scenario() {
        let g = grouper();
        let groups = g
            .group_articles(&[vec![1.0, 0.0, 0.0], vec![0.99, 0.1, 0.0], vec![0.0, 1.0, 0.0]])
            .unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].group_id, 0);
        assert_eq!(groups[0].article_indices, vec![0, 1]);
        assert!(groups[0].max_similarity > 0.99);
        assert_eq!(groups[1].article_indices, vec![2]);
        assert_eq!(groups[1].max_similarity, 0.0);
    }

    #[test]
    fn test_transitive_chain() {
        // A~B = 0.85, B~C = 0.85, A~C = 0.5
        let matrix = vec![
            vec![1.0, 0.85, 0.5],
            vec![0.85, 1.0, 0.85],
            vec![0.5, 0.85, 1.0],
        ];
        let groups = grouper().form_groups(&matrix, 0.8);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].article_indices, vec![0, 1, 2]);
        assert_eq!(groups[0].max_similarity, 0.85);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let matrix = vec![vec![1.0, 0.8], vec![0.8, 1.0]];
        let groups = grouper().form_groups(&matrix, 0.8);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].size(), 2);
    }

    #[test]
    fn test_just_below_threshold_not_grouped() {
        let matrix = vec![vec![1.0, 0.79999], vec![0.79999, 1.0]];
        let groups = grouper().form_groups(&matrix, 0.8);
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.is_singleton() && g.max_similarity == 0.0));
        assert!(grouper().get_candidate_pairs(&matrix, None).is_empty());
    }

    #[test]
    fn test_ordering_ties_by_lowest_index() {
        // {0}, {1, 3}, {2, 4}
        let mut matrix = vec![vec![0.0; 5]; 5];
        for (i, row) in matrix.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        matrix[1][3] = 0.9;
        matrix[3][1] = 0.9;
        matrix[2][4] = 0.95;
        matrix[4][2] = 0.95;

        let groups = grouper().form_groups(&matrix, 0.8);
        let indices: Vec<_> = groups.iter().map(|g| g.article_indices.clone()).collect();
        assert_eq!(indices, vec![vec![1, 3], vec![2, 4], vec![0]]);
        let ids: Vec<_> = groups.iter().map(|g| g.group_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_candidate_pairs_order() {
        let matrix = vec![
            vec![1.0, 0.9, 0.95],
            vec![0.9, 1.0, 0.9],
            vec![0.95, 0.9, 1.0],
        ];
        let pairs = grouper().get_candidate_pairs(&matrix, None);
        let order: Vec<_> = pairs
            .iter()
            .map(|p| (p.article_a_idx, p.article_b_idx))
            .collect();
        assert_eq!(order, vec![(0, 2), (0, 1), (1, 2)]);

        assert!(grouper().get_candidate_pairs(&matrix, Some(0.99)).is_empty());
    }

    #[test]
    fn test_empty_groups() {
        assert!(grouper().form_groups(&Vec::new(), 0.8).is_empty());
        assert!(grouper().group_articles(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_union_find() {
        let mut uf = UnionFind::new(4);
        assert!(uf.union(0, 1));
        assert!(uf.union(2, 3));
        assert!(!uf.union(1, 0));
        assert_ne!(uf.find(0), uf.find(2));
        assert!(uf.union(1, 3));
        assert_eq!(uf.find(0), uf.find(2));
    }

    fn embeddings() -> impl Strategy<Value = Vec<Vec<f32>>> {
        (1usize..12).prop_flat_map(|n| prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 4), n))
    }

    proptest! {
        #[test]
        fn prop_groups_partition_articles(embs in embeddings(), threshold in 0.0f32..=1.0) {
            let g = SimilarityGrouper::new(threshold).unwrap();
            let groups = g.group_articles(&embs).unwrap();

            let mut seen: Vec<usize> = groups.iter().flat_map(|g| g.article_indices.clone()).collect();
            seen.sort_unstable();
            prop_assert_eq!(seen, (0..embs.len()).collect::<Vec<_>>());

            for (pos, group) in groups.iter().enumerate() {
                prop_assert_eq!(group.group_id, pos);
                prop_assert!(group.article_indices.windows(2).all(|w| w[0] < w[1]));
                if group.is_singleton() {
                    prop_assert_eq!(group.max_similarity, 0.0);
                }
            }
        }

        #[test]
        fn prop_edges_stay_inside_one_group(embs in embeddings(), threshold in 0.0f32..=1.0) {
            let g = SimilarityGrouper::new(threshold).unwrap();
            let matrix = g.compute_similarity_matrix(&embs).unwrap();
            let groups = g.form_groups(&matrix, threshold);

            let mut owner = vec![usize::MAX; embs.len()];
            for group in &groups {
                for &i in &group.article_indices {
                    owner[i] = group.group_id;
                }
            }
            for pair in g.get_candidate_pairs(&matrix, Some(threshold)) {
                prop_assert_eq!(owner[pair.article_a_idx], owner[pair.article_b_idx]);
            }
        }

        #[test]
        fn prop_matrix_is_symmetric(embs in embeddings()) {
            let matrix = SimilarityGrouper::default().compute_similarity_matrix(&embs).unwrap();
            for i in 0..embs.len() {
                for j in 0..embs.len() {
                    prop_assert_eq!(matrix[i][j], matrix[j][i]);
                }
            }
        }
    }
}
