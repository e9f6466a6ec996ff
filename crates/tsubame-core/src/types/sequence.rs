use serde::{Deserialize, Serialize};

use crate::error::{Result, TsubameError};

/// A featurized token sequence, as produced by an external featurizer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenSequence {
    /// Surface tokens (informational; scoring only reads `features`).
    pub tokens: Vec<String>,
    /// Active base-feature indices, one set per token.
    pub features: Vec<Vec<usize>>,
}

impl TokenSequence {
    /// Creates a sequence from tokens and their feature sets.
    #[must_use]
    pub fn new(tokens: Vec<String>, features: Vec<Vec<usize>>) -> Self {
        Self { tokens, features }
    }

    /// Number of positions.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether the sequence has no positions.
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Tokens and feature sets must line up one to one.
    ///
    /// An empty token list is accepted (tokens are optional).
    pub fn validate(&self) -> Result<()> {
        if !self.tokens.is_empty() && self.tokens.len() != self.features.len() {
            return Err(TsubameError::ShapeMismatch {
                context: "feature sets per token",
                expected: self.tokens.len(),
                actual: self.features.len(),
            });
        }
        Ok(())
    }
}

/// A token sequence with its gold label indices.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LabeledSequence {
    /// The input.
    pub input: TokenSequence,
    /// Gold label per token.
    pub labels: Vec<usize>,
}

impl LabeledSequence {
    /// Creates a labeled sequence.
    #[must_use]
    pub fn new(input: TokenSequence, labels: Vec<usize>) -> Self {
        Self { input, labels }
    }

    /// Number of positions.
    pub fn len(&self) -> usize {
        self.input.len()
    }

    /// Whether the sequence has no positions.
    pub fn is_empty(&self) -> bool {
        self.input.is_empty()
    }
}
