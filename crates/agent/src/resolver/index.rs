//! In-memory embedding index over canonical drug names
//!
//! Built once from the store's node set at startup, immutable afterwards.
//! Ranking is brute-force cosine similarity; the corpus is a drug lexicon,
//! not a document collection, so linear scans stay cheap.

use pharmgraph_common::embeddings::Embedder;
use pharmgraph_common::errors::{AppError, Result};
use std::collections::HashMap;

/// (CanonicalDrugName, vector) entries in ingestion order
pub struct EmbeddingIndex {
    names: Vec<String>,
    by_name: HashMap<String, usize>,
    vectors: Vec<Vec<f32>>,
    dimension: usize,
}

impl EmbeddingIndex {
    /// Embed all names with the given embedder and build the index.
    ///
    /// The entry order follows the input order, which drives deterministic
    /// tie-breaking: on equal scores the earlier-ingested entry wins.
    pub async fn build(names: Vec<String>, embedder: &dyn Embedder) -> Result<Self> {
        let vectors = embedder.embed_batch(&names).await?;

        if vectors.len() != names.len() {
            return Err(AppError::EmbeddingError {
                message: format!(
                    "Embedding count mismatch: {} names, {} vectors",
                    names.len(),
                    vectors.len()
                ),
            });
        }

        let by_name = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        Ok(Self {
            names,
            by_name,
            vectors,
            dimension: embedder.dimension(),
        })
    }

    /// Build from precomputed (name, vector) pairs
    pub fn from_entries(entries: Vec<(String, Vec<f32>)>, dimension: usize) -> Self {
        let mut names = Vec::with_capacity(entries.len());
        let mut vectors = Vec::with_capacity(entries.len());
        for (name, vector) in entries {
            names.push(name);
            vectors.push(vector);
        }
        let by_name = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            names,
            by_name,
            vectors,
            dimension,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Exact lookup of a canonical name
    pub fn position(&self, canonical: &str) -> Option<usize> {
        self.by_name.get(canonical).copied()
    }

    pub fn name(&self, index: usize) -> &str {
        &self.names[index]
    }

    /// Rank all entries against a query vector.
    ///
    /// Returns at most `k` (index, score) pairs with score >= `threshold`,
    /// sorted by score descending; equal scores keep ingestion order.
    pub fn rank(&self, query: &[f32], k: usize, threshold: f32) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_similarity(query, v)))
            .filter(|(_, score)| *score >= threshold)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }
}

/// Cosine similarity with a zero-magnitude guard
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_rank_orders_and_bounds() {
        let index = EmbeddingIndex::from_entries(
            vec![
                ("warfarin".to_string(), vec![1.0, 0.0, 0.0]),
                ("aspirin".to_string(), vec![0.0, 1.0, 0.0]),
                ("ibuprofen".to_string(), vec![0.7, 0.7, 0.0]),
            ],
            3,
        );

        let ranked = index.rank(&[1.0, 0.0, 0.0], 2, 0.1);
        assert_eq!(ranked.len(), 2);
        assert_eq!(index.name(ranked[0].0), "warfarin");
        assert!(ranked[0].1 >= ranked[1].1);
        assert!(ranked.iter().all(|(_, score)| *score >= 0.1));
    }

    #[test]
    fn test_rank_tie_break_keeps_ingestion_order() {
        let index = EmbeddingIndex::from_entries(
            vec![
                ("first".to_string(), vec![1.0, 0.0]),
                ("second".to_string(), vec![1.0, 0.0]),
            ],
            2,
        );

        let ranked = index.rank(&[1.0, 0.0], 2, 0.0);
        assert_eq!(index.name(ranked[0].0), "first");
        assert_eq!(index.name(ranked[1].0), "second");
    }

    #[test]
    fn test_rank_threshold_filters() {
        let index = EmbeddingIndex::from_entries(
            vec![
                ("near".to_string(), vec![1.0, 0.0]),
                ("far".to_string(), vec![0.0, 1.0]),
            ],
            2,
        );

        let ranked = index.rank(&[1.0, 0.0], 5, 0.5);
        assert_eq!(ranked.len(), 1);
        assert_eq!(index.name(ranked[0].0), "near");
    }
}
