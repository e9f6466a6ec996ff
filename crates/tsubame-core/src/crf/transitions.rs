//! # Transition Score Table
//!
//! Square matrix over the extended alphabet (real labels + BOS + EOS).
//! `T[a][b]` scores label `a` being immediately followed by label `b`.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TsubameError};
use crate::tags::TagSet;

/// Constants used to build a [`TransitionMatrix`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionConfig {
    /// Initial score of every allowed transition.
    pub allowed_score: f64,
    /// Score of a BIO-forbidden transition (e.g. `O -> I-PER`).
    pub forbidden_score: f64,
    /// Score of a transition into BOS or out of EOS.
    pub boundary_score: f64,
    /// Derive BIO constraints from label names.
    pub enforce_bio: bool,
    /// Whether unconstrained entries are updated during training.
    pub trainable: bool,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            allowed_score: 1.0,
            forbidden_score: -100.0,
            boundary_score: -10_000.0,
            enforce_bio: true,
            trainable: false,
        }
    }
}

impl TransitionConfig {
    /// Create a transition configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial score of allowed transitions.
    pub fn with_allowed_score(mut self, score: f64) -> Self {
        self.allowed_score = score;
        self
    }

    /// Set the score of BIO-forbidden transitions.
    pub fn with_forbidden_score(mut self, score: f64) -> Self {
        self.forbidden_score = score;
        self
    }

    /// Set the score of transitions into BOS / out of EOS.
    pub fn with_boundary_score(mut self, score: f64) -> Self {
        self.boundary_score = score;
        self
    }

    /// Enable or disable BIO constraint derivation.
    pub fn with_bio_constraints(mut self, enabled: bool) -> Self {
        self.enforce_bio = enabled;
        self
    }

    /// Make unconstrained transitions trainable.
    pub fn with_trainable(mut self, trainable: bool) -> Self {
        self.trainable = trainable;
        self
    }
}

/// Row-major `[size x size]` transition scores with a trainability mask.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionMatrix {
    size: usize,
    scores: Vec<f64>,
    trainable: Vec<bool>,
}

impl TransitionMatrix {
    /// Build the matrix for a tag set.
    ///
    /// Entries into BOS and out of EOS get `boundary_score`. With
    /// `enforce_bio`, every predecessor of `I-X` other than `B-X`/`I-X`
    /// (BOS included) gets `forbidden_score`. Everything else starts at
    /// `allowed_score` and is trainable when `config.trainable` is set.
    pub fn build(tags: &TagSet, config: &TransitionConfig) -> Self {
        let size = tags.size();
        let (bos, eos) = (tags.bos(), tags.eos());
        let mut scores = vec![config.allowed_score; size * size];
        let mut trainable = vec![false; size * size];

        for from in 0..size {
            for to in 0..size {
                let idx = from * size + to;
                if to == bos || from == eos {
                    scores[idx] = config.boundary_score;
                } else if from == bos && to == eos {
                    // Empty path; never scored.
                } else if config.enforce_bio && !tags.is_valid_transition(from, to) {
                    scores[idx] = config.forbidden_score;
                } else {
                    trainable[idx] = config.trainable;
                }
            }
        }

        Self {
            size,
            scores,
            trainable,
        }
    }

    /// Wrap raw row-major scores. Nothing is trainable.
    pub fn from_scores(size: usize, scores: Vec<f64>) -> Result<Self> {
        if scores.len() != size * size {
            return Err(TsubameError::ShapeMismatch {
                context: "transition matrix",
                expected: size * size,
                actual: scores.len(),
            });
        }
        Ok(Self {
            size,
            scores,
            trainable: vec![false; size * size],
        })
    }

    /// Side length (L + 2).
    pub fn size(&self) -> usize {
        self.size
    }

    /// Score of `from -> to`.
    #[inline]
    pub fn get(&self, from: usize, to: usize) -> f64 {
        self.scores[from * self.size + to]
    }

    /// Overwrite the score of `from -> to`.
    pub fn set(&mut self, from: usize, to: usize, score: f64) {
        self.scores[from * self.size + to] = score;
    }

    /// Whether `from -> to` is updated by training.
    pub fn is_trainable(&self, from: usize, to: usize) -> bool {
        self.trainable[from * self.size + to]
    }

    /// Mark `from -> to` as trainable or frozen.
    pub fn set_trainable(&mut self, from: usize, to: usize, trainable: bool) {
        self.trainable[from * self.size + to] = trainable;
    }

    /// Whether any entry is trainable.
    pub fn has_trainable(&self) -> bool {
        self.trainable.iter().any(|&t| t)
    }

    /// Flat row-major scores.
    pub fn as_slice(&self) -> &[f64] {
        &self.scores
    }

    /// Mutable flat row-major scores.
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.scores
    }

    /// Flat row-major trainability mask.
    pub fn trainable_mask(&self) -> &[bool] {
        &self.trainable
    }

    /// Replace all scores, keeping the trainability mask.
    pub(crate) fn replace_scores(&mut self, scores: Vec<f64>) -> Result<()> {
        if scores.len() != self.scores.len() {
            return Err(TsubameError::ShapeMismatch {
                context: "transition matrix",
                expected: self.scores.len(),
                actual: scores.len(),
            });
        }
        self.scores = scores;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_entries() {
        let tags = TagSet::conll();
        let t = TransitionMatrix::build(&tags, &TransitionConfig::default());
        for a in 0..tags.size() {
            assert_eq!(t.get(a, tags.bos()), -10_000.0);
            assert_eq!(t.get(tags.eos(), a), -10_000.0);
        }
        assert_eq!(t.get(tags.bos(), 0), 1.0);
        assert_eq!(t.get(0, tags.eos()), 1.0);
    }

    #[test]
    fn test_inside_labels_only_follow_their_entity() {
        let tags = TagSet::conll();
        let t = TransitionMatrix::build(&tags, &TransitionConfig::default());
        let i_per = tags.index_of("I-PER").unwrap();
        let b_per = tags.index_of("B-PER").unwrap();

        for from in 0..tags.eos() {
            let expected = if from == b_per || from == i_per {
                1.0
            } else {
                -100.0
            };
            assert_eq!(t.get(from, i_per), expected, "from {from}");
        }
    }

    #[test]
    fn test_custom_constants() {
        let tags = TagSet::conll();
        let config = TransitionConfig::new()
            .with_allowed_score(0.0)
            .with_forbidden_score(-5.0)
            .with_boundary_score(-50.0);
        let t = TransitionMatrix::build(&tags, &config);
        let o = tags.index_of("O").unwrap();
        let i_loc = tags.index_of("I-LOC").unwrap();
        assert_eq!(t.get(o, o), 0.0);
        assert_eq!(t.get(o, i_loc), -5.0);
        assert_eq!(t.get(o, tags.bos()), -50.0);
    }

    #[test]
    fn test_without_bio_constraints() {
        let tags = TagSet::conll();
        let config = TransitionConfig::new().with_bio_constraints(false);
        let t = TransitionMatrix::build(&tags, &config);
        let o = tags.index_of("O").unwrap();
        let i_loc = tags.index_of("I-LOC").unwrap();
        assert_eq!(t.get(o, i_loc), 1.0);
    }

    #[test]
    fn test_trainable_mask_excludes_constrained_entries() {
        let tags = TagSet::conll();
        let t = TransitionMatrix::build(&tags, &TransitionConfig::new().with_trainable(true));
        let o = tags.index_of("O").unwrap();
        let i_per = tags.index_of("I-PER").unwrap();
        let b_per = tags.index_of("B-PER").unwrap();

        assert!(t.is_trainable(o, o));
        assert!(t.is_trainable(b_per, i_per));
        assert!(t.is_trainable(tags.bos(), o));
        assert!(t.is_trainable(o, tags.eos()));
        assert!(!t.is_trainable(o, i_per));
        assert!(!t.is_trainable(o, tags.bos()));
        assert!(!t.is_trainable(tags.eos(), o));

        let frozen = TransitionMatrix::build(&tags, &TransitionConfig::default());
        assert!(!frozen.has_trainable());
    }

    #[test]
    fn test_from_scores_checks_shape() {
        assert!(TransitionMatrix::from_scores(3, vec![0.0; 8]).is_err());
        let t = TransitionMatrix::from_scores(2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(t.get(1, 0), 3.0);
        assert_eq!(t.as_slice(), &[1.0, 2.0, 3.0, 4.0]);
    }
}
