//! Score of a single label path (used for the gold sequence).

use super::check_shapes;
use super::emission::Emissions;
use super::transitions::TransitionMatrix;
use crate::error::{Result, TsubameError};

/// Exact score of `labels` under `emissions` and `transitions`:
///
/// ```text
/// T[BOS, y0] + e[0, y0] + Σ_{i>=1} (T[y(i-1), y(i)] + e[i, y(i)]) + T[y(N-1), EOS]
/// ```
pub fn path_score(
    emissions: &Emissions,
    transitions: &TransitionMatrix,
    labels: &[usize],
) -> Result<f64> {
    let num_labels = check_shapes(emissions, transitions)?;
    if labels.len() != emissions.len() {
        return Err(TsubameError::LengthMismatch {
            tokens: emissions.len(),
            labels: labels.len(),
        });
    }
    if let Some(&bad) = labels.iter().find(|&&y| y >= num_labels) {
        return Err(TsubameError::InvalidLabel(format!(
            "label index {bad} is not a real label (L = {num_labels})"
        )));
    }
    if labels.is_empty() {
        return Ok(0.0);
    }

    let (bos, eos) = (num_labels, num_labels + 1);
    let mut score = transitions.get(bos, labels[0]) + emissions.get(0, labels[0]);
    for (i, pair) in labels.windows(2).enumerate() {
        score += transitions.get(pair[0], pair[1]) + emissions.get(i + 1, pair[1]);
    }
    score += transitions.get(labels[labels.len() - 1], eos);
    Ok(score)
}

/// [`path_score`] over a batch of (emissions, labels) pairs.
pub fn path_score_batch(
    batch: &[(Emissions, Vec<usize>)],
    transitions: &TransitionMatrix,
) -> Result<Vec<f64>> {
    batch
        .iter()
        .map(|(emissions, labels)| path_score(emissions, transitions, labels))
        .collect()
}
