//! Similarity metrics.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Metric used to score a query vector against stored vectors.
///
/// Must match what the embedding provider's vectors mean: `cosine` for raw
/// vectors, `dot` for vectors the provider already normalizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    Dot,
}

impl SimilarityMetric {
    /// Score `a` against `b`; higher is more similar.
    pub fn score(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            SimilarityMetric::Cosine => cosine_similarity(a, b),
            SimilarityMetric::Dot => dot_product(a, b),
        }
    }
}

impl fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimilarityMetric::Cosine => f.write_str("cosine"),
            SimilarityMetric::Dot => f.write_str("dot"),
        }
    }
}

pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine similarity in `[-1, 1]`. Zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot = dot_product(a, b);
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot / (magnitude_a * magnitude_b)
}

/// Scale `v` to unit length in place. Zero vectors are left alone.
pub fn normalize(v: &mut [f32]) {
    let magnitude = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        v.iter_mut().for_each(|x| *x /= magnitude);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 3.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_vector_scores_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_dot_on_normalized_equals_cosine() {
        let mut a = vec![3.0, 4.0];
        let mut b = vec![1.0, 2.0];
        let expected = cosine_similarity(&a, &b);
        normalize(&mut a);
        normalize(&mut b);
        assert!((SimilarityMetric::Dot.score(&a, &b) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_metric_serde() {
        assert_eq!(serde_json::to_string(&SimilarityMetric::Dot).unwrap(), "\"dot\"");
        let parsed: SimilarityMetric = serde_json::from_str("\"cosine\"").unwrap();
        assert_eq!(parsed, SimilarityMetric::Cosine);
    }
}
