//! # Emission Scorer
//!
//! Per-token label potentials, linear in the emission weight vector.
//!
//! The weight space is partitioned into one block per label of the
//! extended alphabet, each `num_base_features` wide:
//!
//! ```text
//! W = [ block(label 0) | block(label 1) | ... | block(BOS) | block(EOS) ]
//! emission(i, y) = Σ_{f in active(i)} W[y * num_base_features + f]
//! ```
//!
//! The BOS/EOS blocks exist so indices line up with the transition matrix,
//! but their columns are never populated.

use crate::error::{Result, TsubameError};

/// Dense `[seq_len x num_tags]` score tensor, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Emissions {
    seq_len: usize,
    num_tags: usize,
    scores: Vec<f64>,
}

impl Emissions {
    /// All-zero tensor.
    pub fn zeros(seq_len: usize, num_tags: usize) -> Self {
        Self {
            seq_len,
            num_tags,
            scores: vec![0.0; seq_len * num_tags],
        }
    }

    /// Build from per-position rows; every row must have `num_tags` entries.
    pub fn from_rows(rows: &[Vec<f64>], num_tags: usize) -> Result<Self> {
        let mut scores = Vec::with_capacity(rows.len() * num_tags);
        for row in rows {
            if row.len() != num_tags {
                return Err(TsubameError::ShapeMismatch {
                    context: "emission row",
                    expected: num_tags,
                    actual: row.len(),
                });
            }
            scores.extend_from_slice(row);
        }
        Ok(Self {
            seq_len: rows.len(),
            num_tags,
            scores,
        })
    }

    /// Sequence length (N).
    pub fn len(&self) -> usize {
        self.seq_len
    }

    /// Whether the sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.seq_len == 0
    }

    /// Width of each row (L + 2).
    pub fn num_tags(&self) -> usize {
        self.num_tags
    }

    /// Score of `tag` at position `pos`.
    #[inline]
    pub fn get(&self, pos: usize, tag: usize) -> f64 {
        self.scores[pos * self.num_tags + tag]
    }

    /// Overwrite the score of `tag` at position `pos`.
    pub fn set(&mut self, pos: usize, tag: usize, score: f64) {
        self.scores[pos * self.num_tags + tag] = score;
    }

    /// Scores at position `pos`.
    pub fn row(&self, pos: usize) -> &[f64] {
        &self.scores[pos * self.num_tags..(pos + 1) * self.num_tags]
    }
}

/// Maps sparse per-token feature indices to an [`Emissions`] tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmissionScorer {
    num_base_features: usize,
    features_per_token: usize,
    num_labels: usize,
}

impl EmissionScorer {
    /// Create a scorer.
    ///
    /// # Arguments
    /// * `num_base_features` - Width of one label block
    /// * `features_per_token` - Exact number of active features every token carries
    /// * `num_labels` - Number of real labels (L); BOS/EOS are added on top
    pub fn new(num_base_features: usize, features_per_token: usize, num_labels: usize) -> Self {
        Self {
            num_base_features,
            features_per_token,
            num_labels,
        }
    }

    /// Width of the extended alphabet.
    pub fn num_tags(&self) -> usize {
        self.num_labels + 2
    }

    /// Required length of the weight vector.
    pub fn weight_len(&self) -> usize {
        self.num_base_features * self.num_tags()
    }

    /// Offset of feature `feature` inside the block of `label`.
    #[inline]
    pub fn weight_index(&self, label: usize, feature: usize) -> usize {
        label * self.num_base_features + feature
    }

    /// Check a token's feature set against the configured shape.
    pub fn validate_token(&self, features: &[usize]) -> Result<()> {
        if features.len() != self.features_per_token {
            return Err(TsubameError::ShapeMismatch {
                context: "active features per token",
                expected: self.features_per_token,
                actual: features.len(),
            });
        }
        if let Some(&index) = features.iter().find(|&&f| f >= self.num_base_features) {
            return Err(TsubameError::FeatureOutOfRange {
                index,
                limit: self.num_base_features,
            });
        }
        Ok(())
    }

    /// Score every real label of every token.
    ///
    /// Fails with `NumericalInstability` on a non-finite score.
    pub fn score(&self, weights: &[f64], tokens: &[Vec<usize>]) -> Result<Emissions> {
        if weights.len() != self.weight_len() {
            return Err(TsubameError::ShapeMismatch {
                context: "emission weight vector",
                expected: self.weight_len(),
                actual: weights.len(),
            });
        }

        let mut emissions = Emissions::zeros(tokens.len(), self.num_tags());
        for (pos, features) in tokens.iter().enumerate() {
            self.validate_token(features)?;
            for label in 0..self.num_labels {
                let block = &weights[self.weight_index(label, 0)..self.weight_index(label + 1, 0)];
                let score: f64 = features.iter().map(|&f| block[f]).sum();
                if !score.is_finite() {
                    return Err(TsubameError::NumericalInstability(format!(
                        "emission score {score} for label {label} at position {pos}"
                    )));
                }
                emissions.set(pos, label, score);
            }
        }
        Ok(emissions)
    }

    /// Add `coef` to the gradient of every weight active for (`features`, `label`).
    ///
    /// Callers validate `features` first (via [`score`](Self::score)).
    pub fn accumulate_gradient(
        &self,
        gradient: &mut [f64],
        features: &[usize],
        label: usize,
        coef: f64,
    ) {
        let base = self.weight_index(label, 0);
        for &f in features {
            gradient[base + f] += coef;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scores_sum_label_block() {
        // 3 base features, 2 per token, 2 real labels -> 4 blocks of 3.
        let scorer = EmissionScorer::new(3, 2, 2);
        assert_eq!(scorer.weight_len(), 12);
        let weights = vec![
            1.0, 2.0, 3.0, // label 0
            10.0, 20.0, 30.0, // label 1
            99.0, 99.0, 99.0, // BOS
            99.0, 99.0, 99.0, // EOS
        ];
        let emissions = scorer.score(&weights, &[vec![0, 2], vec![1, 1]]).unwrap();

        assert_eq!(emissions.len(), 2);
        assert_eq!(emissions.num_tags(), 4);
        assert_eq!(emissions.row(0), &[4.0, 40.0, 0.0, 0.0]);
        assert_eq!(emissions.row(1), &[4.0, 40.0, 0.0, 0.0]);
    }

    #[test]
    fn test_sentinel_columns_stay_empty() {
        let scorer = EmissionScorer::new(2, 1, 1);
        let weights = vec![0.5; scorer.weight_len()];
        let emissions = scorer.score(&weights, &[vec![1]]).unwrap();
        assert_eq!(emissions.get(0, 0), 0.5);
        assert_eq!(emissions.get(0, 1), 0.0);
        assert_eq!(emissions.get(0, 2), 0.0);
    }

    #[test]
    fn test_wrong_feature_count_is_shape_mismatch() {
        let scorer = EmissionScorer::new(3, 2, 2);
        let weights = vec![0.0; scorer.weight_len()];
        let err = scorer.score(&weights, &[vec![0]]).unwrap_err();
        assert!(matches!(
            err,
            TsubameError::ShapeMismatch {
                expected: 2,
                actual: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_out_of_range_feature() {
        let scorer = EmissionScorer::new(3, 1, 2);
        let weights = vec![0.0; scorer.weight_len()];
        let err = scorer.score(&weights, &[vec![3]]).unwrap_err();
        assert!(matches!(
            err,
            TsubameError::FeatureOutOfRange { index: 3, limit: 3 }
        ));
    }

    #[test]
    fn test_non_finite_score_is_rejected() {
        let scorer = EmissionScorer::new(3, 1, 2);
        let mut weights = vec![0.0; scorer.weight_len()];
        weights[scorer.weight_index(1, 2)] = f64::NAN;
        assert!(scorer.score(&weights, &[vec![0]]).is_ok());
        assert!(matches!(
            scorer.score(&weights, &[vec![0], vec![2]]),
            Err(TsubameError::NumericalInstability(_))
        ));
    }

    #[test]
    fn test_wrong_weight_length() {
        let scorer = EmissionScorer::new(3, 1, 2);
        assert!(scorer.score(&[0.0; 5], &[vec![0]]).is_err());
    }

    #[test]
    fn test_accumulate_gradient() {
        let scorer = EmissionScorer::new(3, 2, 2);
        let mut grad = vec![0.0; scorer.weight_len()];
        scorer.accumulate_gradient(&mut grad, &[0, 2], 1, 0.5);
        scorer.accumulate_gradient(&mut grad, &[2, 2], 1, 1.0);
        assert_eq!(&grad[3..6], &[0.5, 0.0, 2.5]);
        assert!(grad[..3].iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_from_rows() {
        let e = Emissions::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]], 2).unwrap();
        assert_eq!(e.get(1, 0), 3.0);
        assert!(Emissions::from_rows(&[vec![1.0]], 2).is_err());
    }
}
