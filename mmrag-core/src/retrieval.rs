//! Similarity scoring and top-k selection.
//!
//! Image and text candidates are ranked independently; nothing here fuses
//! scores across modalities.

use crate::error::{ConfigError, RetrievalError};
use crate::types::{Embedding, RetrievalSelection, ScoreVector};
use std::cmp::Ordering;

/// Dot product of `query` with every candidate. Equals cosine similarity when
/// both sides are unit-normalized.
pub fn score(query: &[f32], candidates: &[Embedding]) -> Result<ScoreVector, RetrievalError> {
    candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| {
            if candidate.len() != query.len() {
                return Err(RetrievalError::DimensionMismatch {
                    expected: query.len(),
                    got: candidate.len(),
                    index,
                });
            }
            Ok(dot(query, candidate))
        })
        .collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Select the `min(k, scores.len())` highest scores.
///
/// Indices come back in descending score order. Equal scores keep their
/// original order, so the lower index ranks first. NaN scores rank last.
/// `k == 0` is a configuration error, never an empty selection.
pub fn top_k(scores: &[f32], k: usize) -> Result<RetrievalSelection, RetrievalError> {
    if k == 0 {
        return Err(ConfigError::InvalidTopK {
            modality: "selection".into(),
        }
        .into());
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    // sort_by is stable: ties keep ascending index order
    order.sort_by(|&a, &b| {
        rank_key(scores[b])
            .partial_cmp(&rank_key(scores[a]))
            .unwrap_or(Ordering::Equal)
    });
    order.truncate(k);

    let selected_scores = order.iter().map(|&i| scores[i]).collect();
    Ok(RetrievalSelection {
        indices: order,
        scores: selected_scores,
    })
}

fn rank_key(score: f32) -> f32 {
    if score.is_nan() {
        f32::NEG_INFINITY
    } else {
        score
    }
}

/// Score and select in one step.
pub fn rank(
    query: &[f32],
    candidates: &[Embedding],
    k: usize,
) -> Result<RetrievalSelection, RetrievalError> {
    let scores = score(query, candidates)?;
    top_k(&scores, k)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_is_dot_product() {
        let query = vec![1.0, 0.0];
        let candidates = vec![vec![0.5, 0.5], vec![-1.0, 0.0], vec![0.0, 1.0]];
        let scores = score(&query, &candidates).unwrap();
        assert_eq!(scores, vec![0.5, -1.0, 0.0]);
    }

    #[test]
    fn test_score_dimension_mismatch() {
        let err = score(&[1.0, 0.0], &[vec![1.0, 0.0], vec![1.0]]).unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::DimensionMismatch {
                expected: 2,
                got: 1,
                index: 1
            }
        ));
    }

    #[test]
    fn test_top_k_descending() {
        let sel = top_k(&[0.1, 0.9, 0.5, 0.7], 3).unwrap();
        assert_eq!(sel.indices, vec![1, 3, 2]);
        assert_eq!(sel.scores, vec![0.9, 0.7, 0.5]);
    }

    #[test]
    fn test_top_k_ties_prefer_lower_index() {
        let sel = top_k(&[0.5, 0.8, 0.5, 0.8, 0.5], 4).unwrap();
        assert_eq!(sel.indices, vec![1, 3, 0, 2]);
    }

    #[test]
    fn test_top_k_larger_than_pool() {
        let sel = top_k(&[0.2, 0.4], 3).unwrap();
        assert_eq!(sel.len(), 2);
        assert_eq!(sel.indices, vec![1, 0]);
    }

    #[test]
    fn test_top_k_zero_is_config_error() {
        let err = top_k(&[0.2, 0.4], 0).unwrap_err();
        assert!(matches!(err, RetrievalError::Config(ConfigError::InvalidTopK { .. })));
    }

    #[test]
    fn test_top_k_empty_scores() {
        let sel = top_k(&[], 3).unwrap();
        assert!(sel.is_empty());
    }

    #[test]
    fn test_top_k_nan_ranks_last() {
        let sel = top_k(&[f32::NAN, 0.1, -0.3], 3).unwrap();
        assert_eq!(sel.indices, vec![1, 2, 0]);
    }

    #[test]
    fn test_rank_combines_score_and_select() {
        let query = vec![0.6, 0.8];
        let candidates = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.6, 0.8]];
        let sel = rank(&query, &candidates, 2).unwrap();
        assert_eq!(sel.indices, vec![2, 1]);
    }
}
