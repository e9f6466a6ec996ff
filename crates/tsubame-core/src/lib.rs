//! # Tsubame Core
//!
//! Linear-chain conditional random fields for sequence labeling. Provides
//! the tag alphabet, the transition and emission scorers, exact inference
//! (forward-backward in log space, Viterbi) and the CRF model that ties
//! them together.
//!
//! ## Quick Start
//!
//! ```rust
//! use tsubame_core::{CrfModel, ModelConfig, TagSet, TokenSequence};
//!
//! let tags = TagSet::new(["O", "B-PER", "I-PER"]).unwrap();
//! let model = CrfModel::new(ModelConfig::new(8, 2).with_tags(tags)).unwrap();
//!
//! let input = TokenSequence::new(
//!     vec!["Ada".into(), "Lovelace".into()],
//!     vec![vec![0, 3], vec![1, 3]],
//! );
//! let labels = model.predict(&input).unwrap();
//! assert_eq!(labels.len(), 2);
//! assert_ne!(labels[0], "I-PER");
//! ```
pub mod crf;
pub mod error;
pub mod tags;
pub mod types;

// Re-export primary API
pub use crf::{
    CrfModel, Decoded, EmissionScorer, Emissions, Gradient, Lattice, ModelConfig, SequenceLoss,
    TransitionConfig, TransitionMatrix, ViterbiDecoder, log_partition, path_score,
};
pub use error::{Result, TsubameError};
pub use tags::{TagKind, TagSet};
pub use types::{LabeledSequence, TokenSequence};
