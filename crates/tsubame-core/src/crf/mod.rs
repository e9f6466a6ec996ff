pub mod emission;
pub mod forward;
pub mod gradient;
pub mod logspace;
pub mod model;
pub mod path;
pub mod transitions;
pub mod viterbi;

pub use emission::{EmissionScorer, Emissions};
pub use forward::{Lattice, log_partition, log_partition_batch};
pub use gradient::Gradient;
pub use model::{CrfModel, ModelConfig, SequenceLoss};
pub use path::{path_score, path_score_batch};
pub use transitions::{TransitionConfig, TransitionMatrix};
pub use viterbi::{Decoded, ViterbiDecoder};

use crate::error::{Result, TsubameError};

/// Check that emissions and transitions share the extended alphabet and
/// return the number of real labels.
pub(crate) fn check_shapes(emissions: &Emissions, transitions: &TransitionMatrix) -> Result<usize> {
    if emissions.num_tags() != transitions.size() {
        return Err(TsubameError::ShapeMismatch {
            context: "emission width vs transition matrix",
            expected: transitions.size(),
            actual: emissions.num_tags(),
        });
    }
    if transitions.size() < 3 {
        return Err(TsubameError::ShapeMismatch {
            context: "alphabet size (labels + BOS + EOS)",
            expected: 3,
            actual: transitions.size(),
        });
    }
    Ok(transitions.size() - 2)
}
